//! Process and thread identifiers, and the target of a thread's memory accessor.

use std::fmt;

/// Process identifier (PID)
///
/// Using a newtype instead of a raw `u32` prevents accidentally passing a
/// thread id, an exit code, or a handle value where a PID is expected.
///
/// ## Example
///
/// ```rust
/// use kestrel_core::types::ProcessId;
///
/// let pid = ProcessId::from(12345);
/// assert_eq!(u32::from(pid), 12345);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProcessId(pub u32);

impl From<u32> for ProcessId
{
    fn from(pid: u32) -> Self
    {
        ProcessId(pid)
    }
}

impl From<ProcessId> for u32
{
    fn from(pid: ProcessId) -> Self
    {
        pid.0
    }
}

impl fmt::Display for ProcessId
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        write!(f, "{}", self.0)
    }
}

/// Thread identifier
///
/// The exact meaning is platform-specific:
///
/// - **Linux**: kernel thread id (TID); the main thread's TID equals the PID
/// - **Windows**: the thread id reported in `DEBUG_EVENT::dwThreadId`
///
/// Zero is never a valid thread id on either platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ThreadId(pub u64);

impl ThreadId
{
    /// Get the raw `u64` representation of the thread identifier
    ///
    /// ```rust
    /// use kestrel_core::types::ThreadId;
    ///
    /// let thread = ThreadId::from(12345);
    /// assert_eq!(thread.raw(), 12345);
    /// ```
    pub fn raw(&self) -> u64
    {
        self.0
    }
}

impl From<u64> for ThreadId
{
    fn from(value: u64) -> Self
    {
        Self(value)
    }
}

impl fmt::Display for ThreadId
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        write!(f, "{}", self.0)
    }
}

/// What a thread's memory accessor is bound to
///
/// On Windows memory is read through the process handle adopted from the
/// `CREATE_PROCESS_DEBUG_EVENT`; every registered thread is retargeted when that
/// handle arrives. On Linux memory is read with ptrace against the thread itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemoryTarget
{
    /// Not yet bound (thread registered before the process handle arrived)
    Unbound,
    /// Native process handle value
    Handle(isize),
    /// Traced task id
    Task(ThreadId),
}
