//! # Debug worker
//!
//! Both native debug APIs bind a session to the OS thread that created it:
//! only the thread that called `PTRACE_TRACEME`/`PTRACE_ATTACH` may issue
//! ptrace requests for the tracee, and only the thread that called
//! `CreateProcess(DEBUG_ONLY_THIS_PROCESS)` receives its debug events.
//!
//! [`DebugWorker`] owns one dedicated thread and the state `S` that lives on
//! it. Every operation is a job submitted over an `mpsc` channel; the caller
//! blocks until the job's reply arrives, so jobs run strictly one at a time in
//! submission order.
//!
//! ```rust
//! use kestrel_core::worker::DebugWorker;
//!
//! let worker = DebugWorker::spawn("counter", || Ok(0_u32)).unwrap();
//! worker.exec(|n| *n += 2).unwrap();
//! assert_eq!(worker.exec(|n| *n).unwrap(), 2);
//! ```

use std::sync::mpsc;
use std::thread::{self, JoinHandle};

use tracing::{debug, error};

use crate::error::{DebuggerError, Result};

type Job<S> = Box<dyn FnOnce(&mut S) + Send>;

/// A dedicated thread owning state `S`, driven by submitted jobs
///
/// `S` is created on the worker by the `init` closure passed to
/// [`DebugWorker::spawn`] and dropped there when the worker shuts down, so it
/// does not need to be `Send` itself.
pub struct DebugWorker<S>
{
    jobs: Option<mpsc::Sender<Job<S>>>,
    handle: Option<JoinHandle<()>>,
    name: String,
}

impl<S: 'static> DebugWorker<S>
{
    /// Start the worker thread and run `init` on it
    ///
    /// ## Errors
    ///
    /// - `init`'s own error, after the worker thread has been joined
    /// - `Native` if the thread could not be created
    /// - `PumpFailure` if `init` panicked
    pub fn spawn<F>(name: &str, init: F) -> Result<Self>
    where
        F: FnOnce() -> Result<S> + Send + 'static,
    {
        let (job_tx, job_rx) = mpsc::channel::<Job<S>>();
        let (ready_tx, ready_rx) = mpsc::channel::<Result<()>>();

        let handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                let mut state = match init() {
                    Ok(state) => {
                        let _ = ready_tx.send(Ok(()));
                        state
                    }
                    Err(err) => {
                        let _ = ready_tx.send(Err(err));
                        return;
                    }
                };
                while let Ok(job) = job_rx.recv() {
                    job(&mut state);
                }
                debug!("Debug worker channel closed, dropping session state");
            })
            .map_err(|source| DebuggerError::Native {
                operation: "spawn debug worker",
                source,
            })?;

        match ready_rx.recv() {
            Ok(Ok(())) => {
                debug!(worker = name, "Debug worker started");
                Ok(Self {
                    jobs: Some(job_tx),
                    handle: Some(handle),
                    name: name.to_string(),
                })
            }
            Ok(Err(err)) => {
                let _ = handle.join();
                Err(err)
            }
            Err(_) => {
                let _ = handle.join();
                error!(worker = name, "Debug worker died during initialization");
                Err(DebuggerError::PumpFailure(format!(
                    "debug worker '{name}' died during initialization"
                )))
            }
        }
    }

    /// Run `job` on the worker and wait for its result
    ///
    /// ## Errors
    ///
    /// Returns `PumpFailure` if the worker has died (a previous job panicked).
    pub fn exec<R, F>(&self, job: F) -> Result<R>
    where
        R: Send + 'static,
        F: FnOnce(&mut S) -> R + Send + 'static,
    {
        let jobs = self.jobs.as_ref().ok_or_else(|| self.dead())?;
        let (reply_tx, reply_rx) = mpsc::sync_channel(1);
        jobs.send(Box::new(move |state: &mut S| {
            let _ = reply_tx.send(job(state));
        }))
        .map_err(|_| self.dead())?;
        reply_rx.recv().map_err(|_| self.dead())
    }

    /// Name of the worker thread
    pub fn name(&self) -> &str
    {
        &self.name
    }

    fn dead(&self) -> DebuggerError
    {
        error!(worker = %self.name, "Debug worker is gone");
        DebuggerError::PumpFailure(format!("debug worker '{}' is not running", self.name))
    }
}

impl<S> Drop for DebugWorker<S>
{
    fn drop(&mut self)
    {
        drop(self.jobs.take());
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                error!(worker = %self.name, "Debug worker panicked");
            }
        }
    }
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn jobs_run_on_the_named_worker_thread()
    {
        let worker = DebugWorker::spawn("kestrel-test-worker", || Ok(())).unwrap();
        let name = worker
            .exec(|_: &mut ()| thread::current().name().map(str::to_string))
            .unwrap();
        assert_eq!(name.as_deref(), Some("kestrel-test-worker"));
        assert_ne!(worker.exec(|_: &mut ()| thread::current().id()).unwrap(), thread::current().id());
    }

    #[test]
    fn jobs_run_in_submission_order()
    {
        let worker = DebugWorker::spawn("order", || Ok(Vec::new())).unwrap();
        for i in 0..16 {
            worker.exec(move |log: &mut Vec<i32>| log.push(i)).unwrap();
        }
        let log = worker.exec(|log| log.clone()).unwrap();
        assert_eq!(log, (0..16).collect::<Vec<_>>());
    }

    #[test]
    fn init_error_is_returned()
    {
        let result = DebugWorker::<()>::spawn("failing", || Err(DebuggerError::NotImplemented("attach")));
        assert!(matches!(result, Err(DebuggerError::NotImplemented("attach"))));
    }

    #[test]
    fn panicking_job_kills_the_worker()
    {
        let worker = DebugWorker::spawn("panicky", || Ok(0_u8)).unwrap();
        let result = worker.exec(|_: &mut u8| -> u8 { panic!("boom") });
        assert!(matches!(result, Err(DebuggerError::PumpFailure(_))));
        assert!(matches!(worker.exec(|n| *n), Err(DebuggerError::PumpFailure(_))));
    }

    #[test]
    fn state_is_dropped_on_the_worker()
    {
        struct Probe(mpsc::Sender<Option<String>>);
        impl Drop for Probe
        {
            fn drop(&mut self)
            {
                let _ = self.0.send(thread::current().name().map(str::to_string));
            }
        }

        let (tx, rx) = mpsc::channel();
        let worker = DebugWorker::spawn("dropper", move || Ok(Probe(tx))).unwrap();
        drop(worker);
        assert_eq!(rx.recv().unwrap().as_deref(), Some("dropper"));
    }
}
