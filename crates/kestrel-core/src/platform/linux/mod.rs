//! # Linux
//!
//! ptrace substrate for the pull-model pump.
//!
//! - [`ptrace`]: [`LinuxTracer`], the [`Tracer`](crate::pump::pull::Tracer) over libc
//! - [`launch`]: fork/exec under `PTRACE_TRACEME`, and attach via `/proc/<pid>/task`
//!
//! ## References
//!
//! - [ptrace(2) man page](https://man7.org/linux/man-pages/man2/ptrace.2.html)
//! - [proc(5) man page](https://man7.org/linux/man-pages/man5/proc.5.html)

pub mod launch;
pub mod ptrace;

pub use ptrace::LinuxTracer;

use crate::pump::pull::PullBackend;

/// Native backend on Linux
pub type NativeBackend = PullBackend<LinuxTracer>;
