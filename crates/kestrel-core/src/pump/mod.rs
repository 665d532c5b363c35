//! # Event pumps
//!
//! The two ways an OS reports what a debugged process is doing:
//!
//! - [`push`]: the OS pushes debug events and freezes the whole process until
//!   each one is continued (Windows).
//! - [`pull`]: the debugger pulls per-thread stop statuses with `waitpid`
//!   (Linux ptrace).
//!
//! Both pumps implement [`Backend`](crate::backend::Backend) and are written
//! against a small trait over the native calls, so their state machines are
//! tested on every host with scripted fakes.

pub mod pull;
pub mod push;
