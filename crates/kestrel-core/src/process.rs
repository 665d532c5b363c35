//! # Process supervisor
//!
//! [`Process`] is the caller-facing side of a debug session. It owns the
//! [`DebugWorker`] on which the backend and thread table live, and forwards
//! every operation to it as a job. The only operation that bypasses the worker
//! is the manual stop, through the [`StopHandle`] captured at construction.
//!
//! A `Process` is built by [`crate::launch`] or [`crate::attach`] for the
//! native backend, or by [`Process::launch_with`] / [`Process::attach_with`]
//! for any other [`Backend`] (tests drive the supervisor through scripted
//! backends this way).

use std::path::PathBuf;

use tracing::{debug, info};

use crate::backend::{Backend, Inferior, StopHandle};
use crate::config::DebugConfig;
use crate::coordinator::{self, BreakpointLookup};
use crate::error::{DebuggerError, Result};
use crate::event::WaitOutcome;
use crate::thread::{Thread, ThreadTable};
use crate::types::{Address, Architecture, ProcessId, ThreadId};
use crate::worker::DebugWorker;

/// A debugged process
///
/// Dropping it shuts the debug worker down; the backend is dropped on the
/// worker. With `PTRACE_O_EXITKILL` set on Linux that also kills a
/// still-running inferior.
pub struct Process<B: Backend>
{
    pid: ProcessId,
    arch: Architecture,
    stop: StopHandle,
    worker: DebugWorker<Inferior<B>>,
}

impl<B: Backend> Process<B>
{
    /// Launch through `spawn` and block until the first stop
    ///
    /// `spawn` runs on the debug worker, so the native session is bound to
    /// that thread. After the first stop the backend's post-launch setup runs.
    ///
    /// ## Errors
    ///
    /// - whatever `spawn` fails with (`SpawnFailure`, `HandleDuplication`, ...)
    /// - `ProcessExited` if the process terminated before its first trap
    pub fn launch_with<F>(config: &DebugConfig, arch: Architecture, spawn: F) -> Result<Self>
    where
        F: FnOnce() -> Result<B> + Send + 'static,
    {
        let wait_timeout = config.wait_timeout();
        let worker = DebugWorker::spawn(config.worker_name(), move || {
            Ok(Inferior::new(spawn()?, ThreadTable::new(), wait_timeout))
        })?;

        let first = worker.exec(|inferior: &mut Inferior<B>| -> Result<(ProcessId, StopHandle)> {
            let pid = inferior.pid();
            match inferior.trap_wait()? {
                WaitOutcome::Exited { code } => Err(DebuggerError::ProcessExited { pid, status: code }),
                WaitOutcome::Stopped(tid) => {
                    debug!(%pid, thread = %tid, "First stop");
                    inferior.post_launch()?;
                    Ok((pid, inferior.backend().stop_handle()))
                }
            }
        })?;
        let (pid, stop) = first?;

        info!(%pid, %arch, "Process launched");
        Ok(Self {
            pid,
            arch,
            stop,
            worker,
        })
    }

    /// Attach through `attach`, which returns the backend with the threads it
    /// found already registered and stopped
    ///
    /// ## Errors
    ///
    /// Whatever `attach` fails with (`ProcessNotFound`, `Native`, `NotImplemented`).
    pub fn attach_with<F>(config: &DebugConfig, arch: Architecture, attach: F) -> Result<Self>
    where
        F: FnOnce() -> Result<(B, ThreadTable<B::ThreadData>)> + Send + 'static,
    {
        let wait_timeout = config.wait_timeout();
        let worker = DebugWorker::spawn(config.worker_name(), move || {
            let (backend, threads) = attach()?;
            Ok(Inferior::new(backend, threads, wait_timeout))
        })?;
        let (pid, stop) = worker.exec(|inferior: &mut Inferior<B>| (inferior.pid(), inferior.backend().stop_handle()))?;

        info!(%pid, %arch, "Process attached");
        Ok(Self {
            pid,
            arch,
            stop,
            worker,
        })
    }

    /// Run `job` against the session state on the debug worker
    pub(crate) fn exec<R, F>(&self, job: F) -> Result<R>
    where
        R: Send + 'static,
        F: FnOnce(&mut Inferior<B>) -> Result<R> + Send + 'static,
    {
        self.worker.exec(job)?
    }

    /// Process id
    pub fn pid(&self) -> ProcessId
    {
        self.pid
    }

    /// Architecture of the inferior
    pub fn architecture(&self) -> Architecture
    {
        self.arch
    }

    /// Handle for stopping the inferior from any thread
    pub fn stop_handle(&self) -> StopHandle
    {
        self.stop.clone()
    }

    /// Ask the running inferior to stop; the stop is reported by the next trap wait
    pub fn request_manual_stop(&self) -> Result<()>
    {
        self.stop.request_stop()
    }

    /// Ids of all live threads, ascending
    pub fn threads(&self) -> Result<Vec<ThreadId>>
    {
        self.exec(|inferior| Ok(inferior.threads().ids()))
    }

    /// The current thread
    ///
    /// ## Errors
    ///
    /// `ProcessExited` once the process is gone.
    pub fn current_thread(&self) -> Result<Thread<'_, B>>
    {
        let tid = self.exec(|inferior| {
            inferior.ensure_alive()?;
            inferior
                .threads()
                .current()
                .ok_or_else(|| DebuggerError::InvalidState("process has no threads".to_string()))
        })?;
        Ok(Thread::new(self, tid))
    }

    /// Make `tid` the current thread
    pub fn switch_thread(&self, tid: ThreadId) -> Result<()>
    {
        self.exec(move |inferior| inferior.threads.set_current(tid))
    }

    /// Handle on thread `tid`
    ///
    /// ## Errors
    ///
    /// `ThreadNotFound` if the thread is not (or no longer) registered.
    pub fn thread(&self, tid: ThreadId) -> Result<Thread<'_, B>>
    {
        self.exec(move |inferior| inferior.threads().require(tid).map(|_| ()))?;
        Ok(Thread::new(self, tid))
    }

    /// Block until the inferior stops
    ///
    /// ## Errors
    ///
    /// - `ProcessExited` when the process exited instead (or had already)
    /// - `WaitTimeout` when the configured wait bound expires
    /// - `PumpFailure` / `UnknownEvent` when the pump fails
    pub fn trap_wait(&self) -> Result<ThreadId>
    {
        let pid = self.pid;
        self.exec(move |inferior| match inferior.trap_wait()? {
            WaitOutcome::Stopped(tid) => Ok(tid),
            WaitOutcome::Exited { code } => Err(DebuggerError::ProcessExited { pid, status: code }),
        })
    }

    /// Resume after a stop, stepping the break thread off its breakpoint first
    ///
    /// Returns the thread that was resumed.
    pub fn resume(&self) -> Result<ThreadId>
    {
        self.exec(coordinator::resume_from_trap)
    }

    /// [`resume`](Self::resume), then [`trap_wait`](Self::trap_wait)
    pub fn continue_to_trap(&self) -> Result<ThreadId>
    {
        self.resume()?;
        self.trap_wait()
    }

    /// Single-step the current thread
    pub fn step_instruction(&self) -> Result<ThreadId>
    {
        self.exec(|inferior| {
            inferior.ensure_alive()?;
            let tid = inferior
                .threads()
                .current()
                .ok_or_else(|| DebuggerError::InvalidState("process has no threads".to_string()))?;
            inferior.step(tid)?;
            Ok(tid)
        })
    }

    /// Thread that reported the most recent stop
    pub fn break_thread(&self) -> Result<Option<ThreadId>>
    {
        self.exec(|inferior| Ok(inferior.break_thread()))
    }

    /// Check whether the last trap was a known breakpoint and arm it
    ///
    /// When the break thread's PC is just past an address `breakpoints`
    /// contains, the PC is rewound onto it and the thread's marker armed, so
    /// the next [`resume`](Self::resume) steps past it. Returns the breakpoint
    /// address, or `None` for any other kind of stop.
    pub fn set_current_breakpoints<L>(&self, breakpoints: &L) -> Result<Option<Address>>
    where
        L: BreakpointLookup + ?Sized,
    {
        let stopped = self.exec(|inferior| {
            inferior.ensure_alive()?;
            match inferior.break_thread() {
                Some(tid) if inferior.threads().contains(tid) => Ok(Some((tid, inferior.registers(tid)?.pc))),
                _ => Ok(None),
            }
        })?;
        let Some((tid, pc)) = stopped else {
            return Ok(None);
        };
        let Some(address) = coordinator::breakpoint_hit(self.arch, pc, breakpoints) else {
            return Ok(None);
        };
        self.exec(move |inferior| coordinator::arm_breakpoint(inferior, tid, address))?;
        Ok(Some(address))
    }

    /// Terminate the inferior
    ///
    /// ## Errors
    ///
    /// `InvalidState` unless the current thread is stopped. Calling it on an
    /// exited process succeeds without doing anything.
    pub fn kill(&self) -> Result<()>
    {
        self.exec(Inferior::kill)
    }

    /// Exit status, once the process has exited or been killed
    pub fn exited(&self) -> Result<Option<i32>>
    {
        self.exec(|inferior| Ok(inferior.exited()))
    }

    /// Path of the executable image
    pub fn executable_path(&self) -> Result<PathBuf>
    {
        self.exec(|inferior| inferior.backend().executable_path())
    }
}

impl<B: Backend> std::fmt::Debug for Process<B>
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result
    {
        f.debug_struct("Process")
            .field("pid", &self.pid)
            .field("arch", &self.arch)
            .field("worker", &self.worker.name())
            .finish_non_exhaustive()
    }
}
