//! # Error Types
//!
//! General error handling for the process-control core.
//!
//! We use `thiserror` to automatically generate `Error` trait implementations
//! and nice error messages.
//!
//! One variant is special: [`DebuggerError::ProcessExited`] is not a fault. It
//! travels through the same channel as errors so that every blocking call
//! (launch, trap wait, single-step) can report "the inferior is gone" without a
//! second return path. Callers should check [`DebuggerError::is_process_exited`]
//! before treating a failure as a bug.

use std::io;

use thiserror::Error;

use crate::types::{ProcessId, ThreadId};

/// Main error type for debugger operations
///
/// ## Error Categories
///
/// 1. **Launch errors**: PathResolution, HandleDuplication, SpawnFailure
/// 2. **Pump errors**: PumpFailure, UnknownEvent, WaitTimeout (the first two are fatal:
///    the inferior is in an indeterminate state afterwards)
/// 3. **State errors**: InvalidState, ThreadNotFound, ProcessNotFound
/// 4. **Capability gaps**: NotImplemented
/// 5. **Termination signal**: ProcessExited (not a fault)
/// 6. **Native / I/O errors**: Native, Io
/// 7. **Image errors**: Object, SymbolLookup
#[derive(Error, Debug)]
pub enum DebuggerError
{
    /// `argv[0]` could not be resolved to an existing executable
    ///
    /// Nothing has been spawned when this is returned.
    #[error("Cannot resolve program path '{path}': {reason}")]
    PathResolution
    {
        /// The path as given by the caller
        path: String,
        /// Why resolution failed
        reason: String,
    },

    /// Duplicating one of the debugger's standard handles for the child failed
    #[error("Failed to duplicate {stream} handle: {source}")]
    HandleDuplication
    {
        /// Which standard stream (`stdin`, `stdout`, `stderr`)
        stream: &'static str,
        /// Underlying OS error
        #[source]
        source: io::Error,
    },

    /// The native spawn call failed
    #[error("Failed to spawn '{program}': {source}")]
    SpawnFailure
    {
        /// Resolved program path
        program: String,
        /// Underlying OS error
        #[source]
        source: io::Error,
    },

    /// The event pump failed while waiting for or dispatching an event
    ///
    /// This is fatal: the inferior must be treated as being in an
    /// indeterminate, unsafe-to-continue state.
    #[error("Event pump failure: {0}")]
    PumpFailure(String),

    /// The native wait returned an event kind the pump does not understand
    #[error("Unknown debug event code: {0}")]
    UnknownEvent(u32),

    /// A bounded wait expired before any event arrived
    #[error("Timed out after {0:?} waiting for a debug event")]
    WaitTimeout(std::time::Duration),

    /// The operation is not available on this platform
    #[error("Not implemented on this platform: {0}")]
    NotImplemented(&'static str),

    /// The operation is not valid in the current process/thread state
    ///
    /// Examples:
    /// - Killing a process whose current thread is running
    /// - Reading registers of a running thread
    /// - Restoring registers that were never saved
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// The inferior exited
    ///
    /// Not a fault. `status` is the exit code (or `128 + signal` for a signal death).
    #[error("Process {pid} has exited with status {status}")]
    ProcessExited
    {
        /// PID of the process that exited
        pid: ProcessId,
        /// Exit status
        status: i32,
    },

    /// The process with the given PID doesn't exist
    #[error("Process not found: PID {0}")]
    ProcessNotFound(u32),

    /// The thread is not (or no longer) part of the thread table
    #[error("Thread {0} is not part of the process")]
    ThreadNotFound(ThreadId),

    /// Invalid argument passed to a debugger function
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// A native debugging call failed
    ///
    /// Wraps the OS error of a ptrace / Win32 call together with the name of
    /// the operation, e.g. `PTRACE_GETREGS` or `GetThreadContext`.
    #[error("{operation} failed: {source}")]
    Native
    {
        /// Name of the failing native operation
        operation: &'static str,
        /// Underlying OS error
        #[source]
        source: io::Error,
    },

    /// Failed to parse an executable image
    #[error("Failed to parse executable image: {0}")]
    Object(#[from] object::Error),

    /// A boundary symbol could not be used to locate a table
    #[error("Symbol lookup failed: {0}")]
    SymbolLookup(String),

    /// I/O error (for file operations, etc.)
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl DebuggerError
{
    /// Whether this value is the "process exited" termination signal rather than a fault.
    #[must_use]
    pub fn is_process_exited(&self) -> bool
    {
        matches!(self, Self::ProcessExited { .. })
    }

    /// Exit status carried by a [`DebuggerError::ProcessExited`] value.
    #[must_use]
    pub fn exit_status(&self) -> Option<i32>
    {
        match self {
            Self::ProcessExited { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Capture `errno` (or `GetLastError`) for a failed native call.
    pub(crate) fn last_os_error(operation: &'static str) -> Self
    {
        Self::Native {
            operation,
            source: io::Error::last_os_error(),
        }
    }
}

/// Convenience type alias for `Result<T, DebuggerError>`
///
/// ```rust
/// use kestrel_core::error::Result;
/// fn foo() -> Result<()>
/// {
///     Ok(())
/// }
/// ```
pub type Result<T> = std::result::Result<T, DebuggerError>;
