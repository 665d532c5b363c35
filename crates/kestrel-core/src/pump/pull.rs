//! # Pull-model event pump
//!
//! ptrace reports stops through `waitpid`: the debugger pulls one status at a
//! time, each thread stops and resumes on its own, and new threads announce
//! themselves through `PTRACE_EVENT_CLONE` stops of their parent.
//!
//! [`WaitStatus`] decodes the raw status integer, [`Tracer`] is the seam to
//! the ptrace calls, and [`PullBackend`] is the loop that turns statuses into
//! [`WaitOutcome`]s:
//!
//! - leader exited or killed by a signal, or no child left: `Exited`
//! - other thread exited: remove it, keep waiting
//! - clone event: register the new thread, resume the parent, keep waiting
//! - stop of a thread we have not seen yet: register it
//! - `SIGTRAP`: `Stopped`
//! - `SIGSTOP` we asked for: `Stopped`
//! - any other signal: re-inject it, keep waiting

use std::collections::HashSet;
use std::path::PathBuf;
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, error, info, trace};

use crate::backend::{Backend, StopHandle};
use crate::error::{DebuggerError, Result};
use crate::event::WaitOutcome;
use crate::thread::ThreadTable;
use crate::types::{Address, MemoryTarget, ProcessId, Registers, ThreadId};

/// Linux signal numbers the pump reasons about
pub mod signal
{
    pub const SIGKILL: i32 = 9;
    pub const SIGTRAP: i32 = 5;
    pub const SIGSTOP: i32 = 19;
}

/// `PTRACE_EVENT_CLONE`
pub const EVENT_CLONE: i32 = 3;

const POLL_INTERVAL: Duration = Duration::from_millis(2);

/// Decoded `waitpid` status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitStatus
{
    /// Exited normally with this code
    Exited(i32),
    /// Killed by this signal
    Signaled(i32),
    /// Stopped by `signal`; `event` is the `PTRACE_EVENT_*` code (0 for plain signal stops)
    Stopped
    {
        signal: i32,
        event: i32,
    },
    /// Resumed by `SIGCONT`
    Continued,
}

impl WaitStatus
{
    /// Decode a raw status as filled in by `waitpid(2)`
    ///
    /// ```rust
    /// use kestrel_core::pump::pull::WaitStatus;
    ///
    /// assert_eq!(WaitStatus::from_raw(0x0300), WaitStatus::Exited(3));
    /// assert_eq!(WaitStatus::from_raw(0x0009), WaitStatus::Signaled(9));
    /// assert_eq!(WaitStatus::from_raw(0x0003_057f), WaitStatus::Stopped { signal: 5, event: 3 });
    /// ```
    pub fn from_raw(status: i32) -> Self
    {
        let low = status & 0x7f;
        if status == 0xffff {
            WaitStatus::Continued
        } else if low == 0 {
            WaitStatus::Exited((status >> 8) & 0xff)
        } else if status & 0xff == 0x7f {
            WaitStatus::Stopped {
                signal: (status >> 8) & 0xff,
                event: (status >> 16) & 0xff,
            }
        } else {
            WaitStatus::Signaled(low)
        }
    }

    /// Exit status as reported to callers (`128 + signal` for signal deaths)
    pub fn exit_code(self) -> Option<i32>
    {
        match self {
            WaitStatus::Exited(code) => Some(code),
            WaitStatus::Signaled(signal) => Some(128 + signal),
            WaitStatus::Stopped { .. } | WaitStatus::Continued => None,
        }
    }
}

/// Which children a wait covers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitTarget
{
    /// Any traced thread (`waitpid(-1, __WALL)`)
    Any,
    /// One thread (`waitpid(tid, __WALL)`)
    Thread(ThreadId),
}

/// What a single wait produced
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reaped
{
    Status(ThreadId, WaitStatus),
    /// `WNOHANG` and nothing has changed yet
    NotReady,
    /// `ECHILD`: nothing left to wait for
    NoChild,
}

/// The native calls the pull pump needs
///
/// Implemented over libc ptrace on Linux; tests script it.
pub trait Tracer: 'static
{
    fn wait(&mut self, target: WaitTarget, nohang: bool) -> Result<Reaped>;

    /// `PTRACE_CONT`, delivering `signal` (0 for none)
    fn cont(&mut self, tid: ThreadId, signal: i32) -> Result<()>;

    /// `PTRACE_SINGLESTEP`
    fn single_step(&mut self, tid: ThreadId) -> Result<()>;

    fn get_regs(&self, tid: ThreadId) -> Result<Registers>;

    fn set_regs(&mut self, tid: ThreadId, registers: &Registers) -> Result<()>;

    /// `PTRACE_SETOPTIONS` with the clone/exit-kill options
    fn set_options(&mut self, tid: ThreadId) -> Result<()>;

    /// `PTRACE_GETEVENTMSG`
    fn event_message(&self, tid: ThreadId) -> Result<u64>;

    fn tgkill(&self, pid: ProcessId, tid: ThreadId, signal: i32) -> Result<()>;

    /// Whether `/proc` reports the thread in a tracing stop
    fn thread_stopped(&self, pid: ProcessId, tid: ThreadId) -> Result<bool>;

    fn read_memory(&self, tid: ThreadId, address: Address, len: usize) -> Result<Vec<u8>>;

    fn write_memory(&mut self, tid: ThreadId, address: Address, data: &[u8]) -> Result<()>;

    /// Send `SIGKILL` to the whole process
    fn kill(&mut self, pid: ProcessId) -> Result<()>;

    fn executable_path(&self, pid: ProcessId) -> Result<PathBuf>;

    fn manual_stop(&self, pid: ProcessId) -> StopHandle;
}

enum Step
{
    Done(WaitOutcome),
    KeepWaiting,
}

/// Pull-model [`Backend`]
pub struct PullBackend<T: Tracer>
{
    tracer: T,
    pid: ProcessId,
    break_thread: Option<ThreadId>,
    /// Threads announced by a clone event whose initial `SIGSTOP` is still due
    awaiting_first_stop: HashSet<ThreadId>,
}

impl<T: Tracer> PullBackend<T>
{
    /// Pump over `tracer` for the process `pid`; the thread table starts empty
    pub fn new(tracer: T, pid: ProcessId) -> Self
    {
        Self {
            tracer,
            pid,
            break_thread: None,
            awaiting_first_stop: HashSet::new(),
        }
    }

    /// The underlying tracer
    pub fn tracer(&self) -> &T
    {
        &self.tracer
    }

    fn leader(&self) -> ThreadId
    {
        ThreadId(u64::from(self.pid.0))
    }

    fn register(&self, threads: &mut ThreadTable<()>, tid: ThreadId) -> bool
    {
        threads.register(tid, MemoryTarget::Task(tid), ())
    }

    fn wait_for(&mut self, target: WaitTarget, nohang: bool) -> Result<Reaped>
    {
        let tid = match target {
            WaitTarget::Any => self.leader(),
            WaitTarget::Thread(tid) => tid,
        };
        self.tracer
            .wait(target, nohang)
            .map_err(|err| pump_fault("waitpid", tid, err))
    }

    fn cont(&mut self, tid: ThreadId, signal: i32) -> Result<()>
    {
        self.tracer
            .cont(tid, signal)
            .map_err(|err| pump_fault("PTRACE_CONT", tid, err))
    }

    fn reap(&mut self, target: WaitTarget, deadline: Option<Instant>, timeout: Option<Duration>) -> Result<Reaped>
    {
        let Some(deadline) = deadline else {
            return self.wait_for(target, false);
        };
        loop {
            match self.wait_for(target, true)? {
                Reaped::NotReady => {
                    if Instant::now() >= deadline {
                        return Err(DebuggerError::WaitTimeout(timeout.unwrap_or_default()));
                    }
                    thread::sleep(POLL_INTERVAL);
                }
                reaped => return Ok(reaped),
            }
        }
    }

    fn process_exited(&mut self, threads: &mut ThreadTable<()>, code: i32) -> WaitOutcome
    {
        threads.clear();
        self.break_thread = None;
        self.awaiting_first_stop.clear();
        WaitOutcome::Exited { code }
    }

    fn handle(&mut self, threads: &mut ThreadTable<()>, reaped: Reaped) -> Result<Step>
    {
        let (tid, status) = match reaped {
            Reaped::Status(tid, status) => (tid, status),
            Reaped::NoChild => return Ok(Step::Done(self.process_exited(threads, 0))),
            Reaped::NotReady => return Ok(Step::KeepWaiting),
        };

        if let Some(code) = status.exit_code() {
            if tid == self.leader() {
                return Ok(Step::Done(self.process_exited(threads, code)));
            }
            threads.remove(tid);
            self.awaiting_first_stop.remove(&tid);
            trace!(thread = %tid, code, "Thread exited");
            return Ok(Step::KeepWaiting);
        }

        let WaitStatus::Stopped { signal, event } = status else {
            return Ok(Step::KeepWaiting);
        };

        if event == EVENT_CLONE {
            let child = self
                .tracer
                .event_message(tid)
                .map(ThreadId)
                .map_err(|err| pump_fault("PTRACE_GETEVENTMSG", tid, err))?;
            if self.register(threads, child) {
                self.awaiting_first_stop.insert(child);
            }
            debug!(parent = %tid, thread = %child, "Thread cloned");
            self.cont(tid, 0)?;
            return Ok(Step::KeepWaiting);
        }

        if !threads.contains(tid) {
            self.register(threads, tid);
            if signal == signal::SIGSTOP && tid != self.leader() {
                // initial stop of a clone whose event has not been seen yet
                trace!(thread = %tid, "Absorbing early initial stop");
                self.cont(tid, 0)?;
                return Ok(Step::KeepWaiting);
            }
        }

        if signal == signal::SIGSTOP && self.awaiting_first_stop.remove(&tid) {
            trace!(thread = %tid, "Absorbing initial stop of new thread");
            self.cont(tid, 0)?;
            return Ok(Step::KeepWaiting);
        }

        if signal == signal::SIGTRAP || signal == signal::SIGSTOP {
            if let Some(record) = threads.get_mut(tid) {
                record.running = false;
            }
            self.break_thread = Some(tid);
            return Ok(Step::Done(WaitOutcome::Stopped(tid)));
        }

        trace!(thread = %tid, signal, "Re-injecting signal");
        self.cont(tid, signal)?;
        Ok(Step::KeepWaiting)
    }

    fn mark_running(threads: &mut ThreadTable<()>, tid: ThreadId)
    {
        if let Some(record) = threads.get_mut(tid) {
            record.running = true;
        }
    }
}

fn pump_fault(operation: &str, tid: ThreadId, err: DebuggerError) -> DebuggerError
{
    error!(operation, thread = %tid, error = %err, "ptrace pump failed");
    err
}

impl<T: Tracer> Backend for PullBackend<T>
{
    type ThreadData = ();

    fn pid(&self) -> ProcessId
    {
        self.pid
    }

    fn trap_wait(&mut self, threads: &mut ThreadTable<()>, timeout: Option<Duration>) -> Result<WaitOutcome>
    {
        let deadline = timeout.map(|limit| Instant::now() + limit);
        loop {
            let reaped = self.reap(WaitTarget::Any, deadline, timeout)?;
            if let Step::Done(outcome) = self.handle(threads, reaped)? {
                return Ok(outcome);
            }
        }
    }

    fn break_thread(&self) -> Option<ThreadId>
    {
        self.break_thread
    }

    fn halt(&mut self, threads: &mut ThreadTable<()>, tid: ThreadId) -> Result<WaitOutcome>
    {
        // a SIGSTOP sent to a tracee already in a ptrace stop is never reported
        if self.tracer.thread_stopped(self.pid, tid)? {
            trace!(thread = %tid, "Halt of a stopped thread is a no-op");
            return Ok(WaitOutcome::Stopped(tid));
        }
        self.tracer
            .tgkill(self.pid, tid, signal::SIGSTOP)
            .map_err(|err| pump_fault("tgkill", tid, err))?;
        loop {
            let reaped = self.wait_for(WaitTarget::Thread(tid), false)?;
            if let Reaped::Status(reaped_tid, status) = reaped {
                if reaped_tid == tid && status.exit_code().is_some() && tid != self.leader() {
                    threads.remove(tid);
                    return Err(DebuggerError::ThreadNotFound(tid));
                }
            }
            if let Step::Done(outcome) = self.handle(threads, reaped)? {
                return Ok(outcome);
            }
        }
    }

    fn resume(&mut self, threads: &mut ThreadTable<()>, tid: ThreadId, signal: Option<i32>) -> Result<()>
    {
        self.cont(tid, signal.unwrap_or(0))?;
        Self::mark_running(threads, tid);
        Ok(())
    }

    fn single_step(&mut self, threads: &mut ThreadTable<()>, tid: ThreadId) -> Result<WaitOutcome>
    {
        loop {
            self.tracer
                .single_step(tid)
                .map_err(|err| pump_fault("PTRACE_SINGLESTEP", tid, err))?;
            Self::mark_running(threads, tid);

            match self.wait_for(WaitTarget::Thread(tid), false)? {
                Reaped::NoChild => return Ok(self.process_exited(threads, 0)),
                Reaped::Status(wpid, status) => {
                    if let Some(code) = status.exit_code() {
                        if wpid == self.leader() {
                            return Ok(self.process_exited(threads, code));
                        }
                        threads.remove(wpid);
                        return Err(DebuggerError::ThreadNotFound(tid));
                    }
                    if wpid == tid && matches!(status, WaitStatus::Stopped { signal: signal::SIGTRAP, .. }) {
                        if let Some(record) = threads.get_mut(tid) {
                            record.running = false;
                        }
                        self.break_thread = Some(tid);
                        return Ok(WaitOutcome::Stopped(tid));
                    }
                    trace!(thread = %wpid, ?status, "Discarding stop while single-stepping");
                }
                Reaped::NotReady => {}
            }
        }
    }

    fn stopped(&self, threads: &ThreadTable<()>, tid: ThreadId) -> Result<bool>
    {
        threads.require(tid)?;
        self.tracer.thread_stopped(self.pid, tid)
    }

    fn read_registers(&self, threads: &ThreadTable<()>, tid: ThreadId) -> Result<Registers>
    {
        threads.require(tid)?;
        self.tracer.get_regs(tid)
    }

    fn write_registers(&mut self, threads: &ThreadTable<()>, tid: ThreadId, registers: &Registers) -> Result<()>
    {
        threads.require(tid)?;
        self.tracer.set_regs(tid, registers)
    }

    fn read_memory(&self, threads: &ThreadTable<()>, tid: ThreadId, address: Address, len: usize) -> Result<Vec<u8>>
    {
        match threads.require(tid)?.memory {
            MemoryTarget::Task(task) => self.tracer.read_memory(task, address, len),
            _ => self.tracer.read_memory(tid, address, len),
        }
    }

    fn write_memory(&mut self, threads: &ThreadTable<()>, tid: ThreadId, address: Address, data: &[u8]) -> Result<()>
    {
        let task = match threads.require(tid)?.memory {
            MemoryTarget::Task(task) => task,
            _ => tid,
        };
        self.tracer.write_memory(task, address, data)
    }

    fn terminate(&mut self, threads: &mut ThreadTable<()>) -> Result<i32>
    {
        self.tracer.kill(self.pid)?;
        loop {
            match self.wait_for(WaitTarget::Any, false)? {
                Reaped::NoChild => break,
                Reaped::Status(tid, status) if tid == self.leader() && status.exit_code().is_some() => {
                    return Ok(status.exit_code().unwrap_or(128 + signal::SIGKILL));
                }
                Reaped::Status(tid, status) => {
                    if status.exit_code().is_some() {
                        threads.remove(tid);
                    }
                }
                Reaped::NotReady => {}
            }
        }
        Ok(128 + signal::SIGKILL)
    }

    fn executable_path(&self) -> Result<PathBuf>
    {
        self.tracer.executable_path(self.pid)
    }

    fn post_launch(&mut self, threads: &mut ThreadTable<()>) -> Result<()>
    {
        for tid in threads.ids() {
            self.tracer.set_options(tid)?;
        }
        info!(pid = %self.pid, "Trace options set");
        Ok(())
    }

    fn stop_handle(&self) -> StopHandle
    {
        self.tracer.manual_stop(self.pid)
    }
}
