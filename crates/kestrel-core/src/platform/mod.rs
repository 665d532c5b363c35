//! # Platform-Specific Implementations
//!
//! The native leaves under the two event pumps:
//!
//! - **Linux**: `ptrace` + `waitpid`, driving [`crate::pump::pull`]
//!   - See: [ptrace(2) man page](https://man7.org/linux/man-pages/man2/ptrace.2.html)
//! - **Windows**: the Win32 debug API, driving [`crate::pump::push`]
//!   - See: [Windows Debugging API](https://learn.microsoft.com/en-us/windows/win32/debug/debugging-functions)
//!
//! Bindings come from `libc` and `windows-sys`; each leaf is compiled only for
//! its own target.

#[cfg(target_os = "linux")]
pub mod linux;

#[cfg(windows)]
pub mod windows;
