//! # Windows
//!
//! Win32 debug API substrate for the push-model pump, over `windows-sys`.
//!
//! - `decode`: `DEBUG_EVENT` into [`DebugEvent`](crate::pump::push::DebugEvent)
//! - `source`: `Win32Source`, the [`DebugEventSource`](crate::pump::push::DebugEventSource)
//! - `launch`: `CreateProcessW` with `DEBUG_ONLY_THIS_PROCESS`
//!
//! Attaching to a running process is not supported.
//!
//! ## References
//!
//! - [Windows Debugging API](https://learn.microsoft.com/en-us/windows/win32/debug/debugging-functions)

mod decode;
mod handle;
pub mod launch;
pub mod source;

pub use source::Win32Source;

/// Native backend on Windows
pub type NativeBackend = crate::pump::push::PushBackend<Win32Source>;
