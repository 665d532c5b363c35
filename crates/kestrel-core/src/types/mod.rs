//! # Types
//!
//! Platform-agnostic types used throughout the debugger.
//!
//! These types abstract away platform-specific details, allowing the rest of
//! the crate to work with concepts like "thread ID" and "registers" without
//! knowing whether the inferior is driven by ptrace or by the Windows debug API.

pub mod address;
pub mod arch;
pub mod process;
pub mod registers;

// Re-export all public types
pub use address::Address;
pub use arch::Architecture;
pub use process::{MemoryTarget, ProcessId, ThreadId};
pub use registers::{Arm64Register, RegisterId, Registers, X86_64Register};
