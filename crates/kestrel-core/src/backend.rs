//! # Backend seam
//!
//! [`Backend`] is the one trait both native substrates implement: the push
//! model (`pump::push::PushBackend`, Windows debug events) and the pull model
//! (`pump::pull::PullBackend`, ptrace stops). Everything above it, the
//! [`Inferior`] state kept on the debug worker, the breakpoint coordinator and
//! [`Process`](crate::process::Process), is written once against this trait.
//!
//! Backend methods receive the thread table explicitly; only the pump methods
//! (`trap_wait`, `halt`, `single_step`) add or remove records.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::error::{DebuggerError, Result};
use crate::event::WaitOutcome;
use crate::thread::ThreadTable;
use crate::types::{Address, ProcessId, Registers, ThreadId};

/// Asynchronous "stop the inferior" primitive
///
/// Implementations must be callable from any thread: `DebugBreakProcess` and
/// `kill(SIGSTOP)` are not bound to the debug session's thread.
pub trait ManualStop: Send + Sync
{
    /// Ask the inferior to stop; the stop is observed by the next trap wait
    fn request_stop(&self) -> Result<()>;
}

/// Cloneable handle for requesting a manual stop without going through the worker
#[derive(Clone)]
pub struct StopHandle(Arc<dyn ManualStop>);

impl StopHandle
{
    /// Wrap a platform stop primitive
    pub fn new(inner: Arc<dyn ManualStop>) -> Self
    {
        Self(inner)
    }

    /// Request that the inferior stop
    ///
    /// ## Errors
    ///
    /// `Native` if the OS primitive fails (typically because the process is gone).
    pub fn request_stop(&self) -> Result<()>
    {
        self.0.request_stop()
    }
}

impl std::fmt::Debug for StopHandle
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result
    {
        f.write_str("StopHandle")
    }
}

/// Platform process-control substrate
///
/// Implementations live on the debug worker and are never shared across
/// threads; every method is called from the worker only.
pub trait Backend: 'static
{
    /// Platform run state kept in every `ThreadRecord`
    type ThreadData: 'static;

    /// Process id of the inferior
    fn pid(&self) -> ProcessId;

    /// Block until the inferior stops or exits
    ///
    /// On exit the implementation clears `threads`.
    ///
    /// ## Errors
    ///
    /// `WaitTimeout` when `timeout` expires, `PumpFailure`/`UnknownEvent`
    /// when the pump cannot make sense of the OS (inferior state indeterminate).
    fn trap_wait(&mut self, threads: &mut ThreadTable<Self::ThreadData>, timeout: Option<Duration>)
        -> Result<WaitOutcome>;

    /// Thread that reported the most recent stop
    fn break_thread(&self) -> Option<ThreadId>;

    /// Stop `tid` and wait for the stop to be reported
    ///
    /// Must return at once when `tid` is already stopped.
    fn halt(&mut self, threads: &mut ThreadTable<Self::ThreadData>, tid: ThreadId) -> Result<WaitOutcome>;

    /// Let `tid` run, delivering `signal` where the platform supports it
    fn resume(&mut self, threads: &mut ThreadTable<Self::ThreadData>, tid: ThreadId, signal: Option<i32>)
        -> Result<()>;

    /// Execute exactly one instruction on `tid` and wait for it to stop again
    fn single_step(&mut self, threads: &mut ThreadTable<Self::ThreadData>, tid: ThreadId) -> Result<WaitOutcome>;

    /// Live query: is `tid` stopped right now
    fn stopped(&self, threads: &ThreadTable<Self::ThreadData>, tid: ThreadId) -> Result<bool>;

    /// Read the registers of a stopped thread
    fn read_registers(&self, threads: &ThreadTable<Self::ThreadData>, tid: ThreadId) -> Result<Registers>;

    /// Write the registers of a stopped thread
    fn write_registers(&mut self, threads: &ThreadTable<Self::ThreadData>, tid: ThreadId, registers: &Registers)
        -> Result<()>;

    /// Read inferior memory through `tid`'s memory accessor
    fn read_memory(&self, threads: &ThreadTable<Self::ThreadData>, tid: ThreadId, address: Address, len: usize)
        -> Result<Vec<u8>>;

    /// Write inferior memory through `tid`'s memory accessor
    fn write_memory(&mut self, threads: &ThreadTable<Self::ThreadData>, tid: ThreadId, address: Address, data: &[u8])
        -> Result<()>;

    /// Forcefully terminate the inferior, returning the exit status to record
    fn terminate(&mut self, threads: &mut ThreadTable<Self::ThreadData>) -> Result<i32>;

    /// Path of the inferior's executable image
    fn executable_path(&self) -> Result<PathBuf>;

    /// One-time setup after the first stop of a launched inferior
    fn post_launch(&mut self, _threads: &mut ThreadTable<Self::ThreadData>) -> Result<()>
    {
        Ok(())
    }

    /// Manual-stop primitive usable from any thread
    fn stop_handle(&self) -> StopHandle;
}

/// Session state owned by the debug worker
///
/// Wraps a backend with its thread table and the exited flag, and enforces
/// the state rules every backend shares: nothing runs after exit, register
/// access needs a stopped thread, restore needs a prior save.
pub struct Inferior<B: Backend>
{
    pub(crate) backend: B,
    pub(crate) threads: ThreadTable<B::ThreadData>,
    exited: Option<i32>,
    wait_timeout: Option<Duration>,
}

impl<B: Backend> Inferior<B>
{
    /// Session over a backend whose first stop (or attach) produced `threads`
    pub fn new(backend: B, threads: ThreadTable<B::ThreadData>, wait_timeout: Option<Duration>) -> Self
    {
        Self {
            backend,
            threads,
            exited: None,
            wait_timeout,
        }
    }

    /// Process id of the inferior
    pub fn pid(&self) -> ProcessId
    {
        self.backend.pid()
    }

    /// Threads known to the session
    pub fn threads(&self) -> &ThreadTable<B::ThreadData>
    {
        &self.threads
    }

    /// The platform backend
    pub fn backend(&self) -> &B
    {
        &self.backend
    }

    /// Exit status once the process has exited
    pub fn exited(&self) -> Option<i32>
    {
        self.exited
    }

    /// Thread that reported the most recent stop
    pub fn break_thread(&self) -> Option<ThreadId>
    {
        self.backend.break_thread()
    }

    /// Fail with `ProcessExited` once the process is gone
    pub fn ensure_alive(&self) -> Result<()>
    {
        match self.exited {
            Some(status) => Err(DebuggerError::ProcessExited {
                pid: self.pid(),
                status,
            }),
            None => Ok(()),
        }
    }

    fn observe(&mut self, outcome: WaitOutcome) -> WaitOutcome
    {
        if let WaitOutcome::Exited { code } = outcome {
            info!(pid = %self.pid(), status = code, "Process exited");
            self.exited = Some(code);
            self.threads.clear();
        }
        outcome
    }

    fn exit_error(&self, code: i32) -> DebuggerError
    {
        DebuggerError::ProcessExited {
            pid: self.pid(),
            status: code,
        }
    }

    /// Backend setup that needs the first stop to have happened
    pub(crate) fn post_launch(&mut self) -> Result<()>
    {
        self.backend.post_launch(&mut self.threads)
    }

    /// Block on the event pump until a stop or exit
    pub fn trap_wait(&mut self) -> Result<WaitOutcome>
    {
        self.ensure_alive()?;
        let outcome = self.backend.trap_wait(&mut self.threads, self.wait_timeout)?;
        debug!(pid = %self.pid(), %outcome, "Trap wait returned");
        Ok(self.observe(outcome))
    }

    /// Stop `tid`; a thread that is already stopped is left as it is
    pub fn halt(&mut self, tid: ThreadId) -> Result<()>
    {
        self.ensure_alive()?;
        self.threads.require(tid)?;
        match self.backend.halt(&mut self.threads, tid)? {
            WaitOutcome::Exited { code } => {
                self.observe(WaitOutcome::Exited { code });
                Err(self.exit_error(code))
            }
            WaitOutcome::Stopped(_) => Ok(()),
        }
    }

    /// Let `tid` run without looking at breakpoints
    pub fn resume_thread(&mut self, tid: ThreadId, signal: Option<i32>) -> Result<()>
    {
        self.ensure_alive()?;
        self.threads.require(tid)?;
        self.backend.resume(&mut self.threads, tid, signal)
    }

    /// Single-step `tid`; `ProcessExited` if the process died meanwhile
    pub fn step(&mut self, tid: ThreadId) -> Result<()>
    {
        self.ensure_alive()?;
        self.threads.require(tid)?;
        match self.backend.single_step(&mut self.threads, tid)? {
            WaitOutcome::Exited { code } => {
                self.observe(WaitOutcome::Exited { code });
                Err(self.exit_error(code))
            }
            WaitOutcome::Stopped(_) => Ok(()),
        }
    }

    /// Live query through the backend
    pub fn stopped(&self, tid: ThreadId) -> Result<bool>
    {
        self.ensure_alive()?;
        self.threads.require(tid)?;
        self.backend.stopped(&self.threads, tid)
    }

    fn ensure_stopped(&self, tid: ThreadId) -> Result<()>
    {
        if self.stopped(tid)? {
            Ok(())
        } else {
            Err(DebuggerError::InvalidState(format!("thread {tid} is running")))
        }
    }

    pub fn save_registers(&mut self, tid: ThreadId) -> Result<Registers>
    {
        self.ensure_stopped(tid)?;
        let registers = self.backend.read_registers(&self.threads, tid)?;
        self.threads.require_mut(tid)?.register_cache = Some(registers.clone());
        Ok(registers)
    }

    pub fn restore_registers(&mut self, tid: ThreadId) -> Result<()>
    {
        self.ensure_stopped(tid)?;
        let saved = self
            .threads
            .require(tid)?
            .register_cache
            .clone()
            .ok_or_else(|| DebuggerError::InvalidState(format!("no registers saved for thread {tid}")))?;
        self.backend.write_registers(&self.threads, tid, &saved)
    }

    pub fn registers(&self, tid: ThreadId) -> Result<Registers>
    {
        self.ensure_stopped(tid)?;
        self.backend.read_registers(&self.threads, tid)
    }

    pub fn set_registers(&mut self, tid: ThreadId, registers: &Registers) -> Result<()>
    {
        self.ensure_stopped(tid)?;
        self.backend.write_registers(&self.threads, tid, registers)
    }

    pub fn set_pc(&mut self, tid: ThreadId, pc: Address) -> Result<()>
    {
        let mut registers = self.registers(tid)?;
        registers.pc = pc;
        self.backend.write_registers(&self.threads, tid, &registers)
    }

    pub fn read_memory(&self, tid: ThreadId, address: Address, len: usize) -> Result<Vec<u8>>
    {
        self.ensure_alive()?;
        self.threads.require(tid)?;
        self.backend.read_memory(&self.threads, tid, address, len)
    }

    pub fn write_memory(&mut self, tid: ThreadId, address: Address, data: &[u8]) -> Result<()>
    {
        self.ensure_alive()?;
        self.threads.require(tid)?;
        self.backend.write_memory(&self.threads, tid, address, data)
    }

    /// Terminate the inferior
    ///
    /// Already exited: `Ok(())` without touching the OS. Otherwise the current
    /// thread must be stopped; a failing termination call is logged and
    /// swallowed, and the process is marked exited either way.
    pub fn kill(&mut self) -> Result<()>
    {
        if self.exited.is_some() {
            return Ok(());
        }
        let current = self
            .threads
            .current()
            .ok_or_else(|| DebuggerError::InvalidState("no current thread".to_string()))?;
        if !self.backend.stopped(&self.threads, current)? {
            return Err(DebuggerError::InvalidState(format!(
                "cannot kill process {} while thread {current} is running",
                self.pid()
            )));
        }

        let status = match self.backend.terminate(&mut self.threads) {
            Ok(status) => status,
            Err(err) => {
                warn!(pid = %self.pid(), error = %err, "Termination call failed, treating process as gone");
                -1
            }
        };
        info!(pid = %self.pid(), status, "Process killed");
        self.exited = Some(status);
        self.threads.clear();
        Ok(())
    }
}
