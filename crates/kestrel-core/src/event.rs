//! Uniform result of a trap wait.

use std::fmt;

use crate::types::ThreadId;

/// What a trap wait observed
///
/// Together with `Err(_)` this forms the tri-state result every event pump
/// returns: the inferior stopped, the inferior exited, or the pump failed and
/// the inferior's state is indeterminate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome
{
    /// The process exited; `code` is its exit status (`128 + signal` for a signal death)
    Exited
    {
        /// Exit status
        code: i32,
    },
    /// A thread stopped on a trap, exception or requested halt
    Stopped(ThreadId),
}

impl WaitOutcome
{
    /// Thread that stopped, if any
    pub fn stopped_thread(&self) -> Option<ThreadId>
    {
        match self {
            WaitOutcome::Stopped(tid) => Some(*tid),
            WaitOutcome::Exited { .. } => None,
        }
    }
}

impl fmt::Display for WaitOutcome
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        match self {
            WaitOutcome::Exited { code } => write!(f, "exited with status {code}"),
            WaitOutcome::Stopped(tid) => write!(f, "stopped in thread {tid}"),
        }
    }
}
