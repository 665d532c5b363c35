//! # Push-model event pump
//!
//! The Windows debug API pushes events at the debugger: `WaitForDebugEvent`
//! returns the next event, the whole inferior stays frozen until
//! `ContinueDebugEvent` is called for it, and the calls are only valid on the
//! thread that created the debuggee.
//!
//! This module holds the platform-independent part: the decoded
//! [`DebugEvent`], the [`DebugEventSource`] seam to the Win32 calls, and
//! [`PushBackend`], the state machine that turns the event stream into
//! [`WaitOutcome`]s. The raw `DEBUG_EVENT` union is decoded in
//! `platform::windows` and never crosses this boundary.
//!
//! | Event | Action | Continue? |
//! |---|---|---|
//! | `ProcessCreated` | close file handle, adopt process handle, retarget memory, register thread | yes |
//! | `ThreadCreated` | register thread | yes |
//! | `ThreadExited` | remove thread | yes |
//! | `DllLoaded` | close file handle | yes |
//! | `DllUnloaded`, `OutputString`, `Rip` | trace only | yes |
//! | `Exception` | record break thread, return `Stopped` | no |
//! | `ProcessExited` | clear threads, continue, return `Exited` | (once) |
//! | `Unknown` | `UnknownEvent` | no |

use std::path::PathBuf;
use std::time::{Duration, Instant};

use tracing::{debug, error, trace};

use crate::backend::{Backend, StopHandle};
use crate::error::{DebuggerError, Result};
use crate::event::WaitOutcome;
use crate::thread::ThreadTable;
use crate::types::{Address, Architecture, MemoryTarget, ProcessId, Registers, ThreadId};

/// Exit code passed to `TerminateProcess` by kill
pub const KILL_EXIT_CODE: u32 = 1;

const KILL_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Raw value of a Win32 `HANDLE`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct NativeHandle(pub isize);

impl NativeHandle
{
    pub const NULL: Self = NativeHandle(0);
    pub const INVALID: Self = NativeHandle(-1);

    /// Neither null nor `INVALID_HANDLE_VALUE`
    pub fn is_valid(self) -> bool
    {
        self != Self::NULL && self != Self::INVALID
    }
}

/// One debug event, decoded from the raw `DEBUG_EVENT` union
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DebugEvent
{
    ProcessCreated
    {
        process: NativeHandle,
        thread: NativeHandle,
        /// Image file handle; the debugger must close it
        file: NativeHandle,
    },
    ThreadCreated
    {
        thread: NativeHandle,
    },
    ThreadExited
    {
        exit_code: u32,
    },
    DllLoaded
    {
        /// DLL file handle; the debugger must close it
        file: NativeHandle,
        base: Address,
    },
    DllUnloaded
    {
        base: Address,
    },
    OutputString
    {
        address: Address,
        length: u16,
        unicode: bool,
    },
    Exception
    {
        code: u32,
        address: Address,
        first_chance: bool,
    },
    ProcessExited
    {
        exit_code: u32,
    },
    Rip
    {
        error: u32,
    },
    /// Event code the decoder does not know
    Unknown(u32),
}

/// A decoded event together with the ids it was reported for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventRecord
{
    pub pid: u32,
    pub tid: u32,
    pub event: DebugEvent,
}

/// The native calls the push pump needs
///
/// Implemented over kernel32 on Windows; tests script it.
pub trait DebugEventSource: 'static
{
    /// Wait for the next event; `Ok(None)` when `timeout` expires first
    fn wait_for_event(&mut self, timeout: Option<Duration>) -> Result<Option<EventRecord>>;

    /// Release the inferior from the event reported for `(pid, tid)`
    fn continue_event(&mut self, pid: u32, tid: u32) -> Result<()>;

    fn close_handle(&mut self, handle: NativeHandle) -> Result<()>;

    /// Inject a breakpoint exception into the process (`DebugBreakProcess`)
    fn debug_break(&mut self, process: NativeHandle) -> Result<()>;

    fn get_context(&self, thread: NativeHandle) -> Result<Registers>;

    fn set_context(&mut self, thread: NativeHandle, registers: &Registers) -> Result<()>;

    fn read_memory(&self, process: NativeHandle, address: Address, len: usize) -> Result<Vec<u8>>;

    fn write_memory(&mut self, process: NativeHandle, address: Address, data: &[u8]) -> Result<()>;

    fn terminate(&mut self, process: NativeHandle, exit_code: u32) -> Result<()>;

    /// Manual-stop primitive bound to `process`
    fn manual_stop(&self, process: NativeHandle) -> StopHandle;
}

/// Push-model [`Backend`]
pub struct PushBackend<S: DebugEventSource>
{
    source: S,
    pid: ProcessId,
    arch: Architecture,
    process: NativeHandle,
    /// `(pid, tid)` of the event the inferior is frozen on
    pending: Option<(u32, u32)>,
    break_thread: Option<ThreadId>,
}

impl<S: DebugEventSource> PushBackend<S>
{
    /// Wrap a source for a freshly created debuggee
    ///
    /// The process handle is adopted from the first `ProcessCreated` event.
    pub fn new(source: S, pid: ProcessId, arch: Architecture) -> Self
    {
        Self {
            source,
            pid,
            arch,
            process: NativeHandle::NULL,
            pending: None,
            break_thread: None,
        }
    }

    /// The underlying event source
    pub fn source(&self) -> &S
    {
        &self.source
    }

    /// Process handle adopted from `ProcessCreated`
    pub fn process_handle(&self) -> NativeHandle
    {
        self.process
    }

    /// Thread whose event is outstanding, if the inferior is frozen
    pub fn pending_thread(&self) -> Option<ThreadId>
    {
        self.pending.map(|(_, tid)| ThreadId(u64::from(tid)))
    }

    fn pump(&mut self, threads: &mut ThreadTable<NativeHandle>, timeout: Option<Duration>) -> Result<WaitOutcome>
    {
        if self.pending.is_some() {
            return Err(DebuggerError::InvalidState(
                "a debug event is outstanding; resume the inferior before waiting".to_string(),
            ));
        }

        let deadline = timeout.map(|limit| Instant::now() + limit);
        loop {
            let remaining = deadline.map(|at| at.saturating_duration_since(Instant::now()));
            let record = match self.source.wait_for_event(remaining) {
                Ok(Some(record)) => record,
                Ok(None) => {
                    return Err(DebuggerError::WaitTimeout(timeout.unwrap_or_default()));
                }
                Err(err) => return Err(pump_failure("WaitForDebugEvent", &err)),
            };

            let tid = ThreadId(u64::from(record.tid));
            let mut exit_code = None;

            match record.event {
                DebugEvent::ProcessCreated { process, thread, file } => {
                    self.close_file(file, "CREATE_PROCESS_DEBUG_EVENT")?;
                    self.process = process;
                    for existing in threads.iter_mut() {
                        existing.memory = MemoryTarget::Handle(process.0);
                    }
                    threads.register(tid, MemoryTarget::Handle(process.0), thread);
                    debug!(pid = record.pid, thread = %tid, "Process created");
                }
                DebugEvent::ThreadCreated { thread } => {
                    threads.register(tid, MemoryTarget::Handle(self.process.0), thread);
                    debug!(thread = %tid, "Thread created");
                }
                DebugEvent::ThreadExited { exit_code } => {
                    threads.remove(tid);
                    debug!(thread = %tid, exit_code, "Thread exited");
                }
                DebugEvent::DllLoaded { file, base } => {
                    self.close_file(file, "LOAD_DLL_DEBUG_EVENT")?;
                    trace!(%base, "DLL loaded");
                }
                DebugEvent::DllUnloaded { base } => trace!(%base, "DLL unloaded"),
                DebugEvent::OutputString { address, length, .. } => {
                    trace!(%address, length, "Debug output string");
                }
                DebugEvent::Rip { error } => trace!(error, "RIP event"),
                DebugEvent::Exception {
                    code,
                    address,
                    first_chance,
                } => {
                    debug!(thread = %tid, code, %address, first_chance, "Exception");
                    self.break_thread = Some(tid);
                    self.pending = Some((record.pid, record.tid));
                    threads.set_all_running(false);
                    return Ok(WaitOutcome::Stopped(tid));
                }
                DebugEvent::ProcessExited { exit_code: code } => {
                    // `ExitProcess` codes are u32; NTSTATUS values keep their bit pattern
                    exit_code = Some(code as i32);
                    self.break_thread = None;
                    threads.clear();
                }
                DebugEvent::Unknown(code) => {
                    error!(code, "Unknown debug event code");
                    return Err(DebuggerError::UnknownEvent(code));
                }
            }

            self.source
                .continue_event(record.pid, record.tid)
                .map_err(|err| pump_failure("ContinueDebugEvent", &err))?;

            if let Some(code) = exit_code {
                return Ok(WaitOutcome::Exited { code });
            }
        }
    }

    fn close_file(&mut self, file: NativeHandle, event: &str) -> Result<()>
    {
        if !file.is_valid() {
            return Ok(());
        }
        self.source.close_handle(file).map_err(|err| {
            error!(event, error = %err, "Failed to close event file handle");
            DebuggerError::PumpFailure(format!("{event}: closing file handle failed: {err}"))
        })
    }

    fn continue_pending(&mut self, threads: &mut ThreadTable<NativeHandle>) -> Result<()>
    {
        let (pid, tid) = self
            .pending
            .take()
            .ok_or_else(|| DebuggerError::InvalidState("no debug event is outstanding".to_string()))?;
        self.source
            .continue_event(pid, tid)
            .map_err(|err| pump_failure("ContinueDebugEvent", &err))?;
        threads.set_all_running(true);
        Ok(())
    }

    fn thread_handle(threads: &ThreadTable<NativeHandle>, tid: ThreadId) -> Result<NativeHandle>
    {
        Ok(threads.require(tid)?.os)
    }

    fn process_for(threads: &ThreadTable<NativeHandle>, tid: ThreadId) -> Result<NativeHandle>
    {
        match threads.require(tid)?.memory {
            MemoryTarget::Handle(raw) => Ok(NativeHandle(raw)),
            other => Err(DebuggerError::InvalidState(format!(
                "thread {tid} has no process handle for memory access ({other:?})"
            ))),
        }
    }

    fn set_step_flag(&mut self, handle: NativeHandle, enabled: bool) -> Result<()>
    {
        let flag = self.arch.single_step_flag();
        let mut registers = self.source.get_context(handle)?;
        if enabled {
            registers.status |= flag;
        } else {
            registers.status &= !flag;
        }
        self.source.set_context(handle, &registers)
    }
}

fn pump_failure(operation: &str, err: &DebuggerError) -> DebuggerError
{
    error!(operation, error = %err, "Debug event pump failed");
    DebuggerError::PumpFailure(format!("{operation}: {err}"))
}

impl<S: DebugEventSource> Backend for PushBackend<S>
{
    type ThreadData = NativeHandle;

    fn pid(&self) -> ProcessId
    {
        self.pid
    }

    fn trap_wait(&mut self, threads: &mut ThreadTable<NativeHandle>, timeout: Option<Duration>) -> Result<WaitOutcome>
    {
        self.pump(threads, timeout)
    }

    fn break_thread(&self) -> Option<ThreadId>
    {
        self.break_thread
    }

    fn halt(&mut self, threads: &mut ThreadTable<NativeHandle>, tid: ThreadId) -> Result<WaitOutcome>
    {
        // every thread is frozen while an event is outstanding
        if let Some(pending) = self.pending_thread() {
            trace!(thread = %tid, "Halt while frozen on an event is a no-op");
            return Ok(WaitOutcome::Stopped(pending));
        }
        self.source.debug_break(self.process)?;
        self.pump(threads, None)
    }

    fn resume(&mut self, threads: &mut ThreadTable<NativeHandle>, tid: ThreadId, signal: Option<i32>) -> Result<()>
    {
        if let Some(signal) = signal {
            debug!(signal, "Signals cannot be delivered through the debug API, ignoring");
        }
        if self.pending_thread().is_some_and(|pending| pending != tid) {
            debug!(thread = %tid, "Continuing the outstanding event of another thread");
        }
        self.continue_pending(threads)
    }

    fn single_step(&mut self, threads: &mut ThreadTable<NativeHandle>, tid: ThreadId) -> Result<WaitOutcome>
    {
        let handle = Self::thread_handle(threads, tid)?;
        if self.pending.is_none() {
            return Err(DebuggerError::InvalidState(format!(
                "cannot step thread {tid}: the process is not stopped"
            )));
        }

        self.set_step_flag(handle, true)?;
        self.continue_pending(threads)?;
        loop {
            match self.pump(threads, None)? {
                WaitOutcome::Exited { code } => return Ok(WaitOutcome::Exited { code }),
                WaitOutcome::Stopped(stopped) if stopped == tid => break,
                WaitOutcome::Stopped(other) => {
                    trace!(thread = %other, "Discarding exception of another thread while stepping");
                    self.continue_pending(threads)?;
                }
            }
        }
        self.set_step_flag(handle, false)?;
        Ok(WaitOutcome::Stopped(tid))
    }

    fn stopped(&self, threads: &ThreadTable<NativeHandle>, tid: ThreadId) -> Result<bool>
    {
        threads.require(tid)?;
        Ok(self.pending.is_some())
    }

    fn read_registers(&self, threads: &ThreadTable<NativeHandle>, tid: ThreadId) -> Result<Registers>
    {
        self.source.get_context(Self::thread_handle(threads, tid)?)
    }

    fn write_registers(&mut self, threads: &ThreadTable<NativeHandle>, tid: ThreadId, registers: &Registers)
        -> Result<()>
    {
        let handle = Self::thread_handle(threads, tid)?;
        self.source.set_context(handle, registers)
    }

    fn read_memory(&self, threads: &ThreadTable<NativeHandle>, tid: ThreadId, address: Address, len: usize)
        -> Result<Vec<u8>>
    {
        self.source.read_memory(Self::process_for(threads, tid)?, address, len)
    }

    fn write_memory(&mut self, threads: &ThreadTable<NativeHandle>, tid: ThreadId, address: Address, data: &[u8])
        -> Result<()>
    {
        let process = Self::process_for(threads, tid)?;
        self.source.write_memory(process, address, data)
    }

    fn terminate(&mut self, threads: &mut ThreadTable<NativeHandle>) -> Result<i32>
    {
        self.source.terminate(self.process, KILL_EXIT_CODE)?;

        // let the exit event through so the system can release the debuggee
        if self.pending.is_some() {
            self.continue_pending(threads)?;
        }
        loop {
            match self.pump(threads, Some(KILL_DRAIN_TIMEOUT)) {
                Ok(WaitOutcome::Exited { code }) => return Ok(code),
                Ok(WaitOutcome::Stopped(_)) => self.continue_pending(threads)?,
                Err(err) => {
                    debug!(error = %err, "Stopped draining events after terminate");
                    return Ok(KILL_EXIT_CODE as i32);
                }
            }
        }
    }

    fn executable_path(&self) -> Result<PathBuf>
    {
        Err(DebuggerError::NotImplemented("executable path lookup by process handle"))
    }

    fn stop_handle(&self) -> StopHandle
    {
        self.source.manual_stop(self.process)
    }
}

#[cfg(test)]
mod tests
{
    use std::collections::{HashMap, VecDeque};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use super::*;
    use crate::backend::ManualStop;

    const PID: u32 = 4242;
    const PROCESS: NativeHandle = NativeHandle(0x100);
    const MAIN_THREAD: NativeHandle = NativeHandle(0x104);
    const IMAGE_FILE: NativeHandle = NativeHandle(0x108);

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Call
    {
        Wait,
        Continue(u32),
        Close(NativeHandle),
        Break,
        SetContext(NativeHandle, u64),
        Terminate,
    }

    struct Counter(AtomicUsize);

    impl ManualStop for Counter
    {
        fn request_stop(&self) -> Result<()>
        {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[derive(Default)]
    struct ScriptedSource
    {
        script: VecDeque<EventRecord>,
        calls: Vec<Call>,
        contexts: HashMap<NativeHandle, Registers>,
        memory: HashMap<u64, u8>,
        fail_close: bool,
        fail_continue: bool,
    }

    impl ScriptedSource
    {
        fn new(events: Vec<(u32, DebugEvent)>) -> Self
        {
            Self {
                script: events
                    .into_iter()
                    .map(|(tid, event)| EventRecord { pid: PID, tid, event })
                    .collect(),
                ..Self::default()
            }
        }
    }

    impl DebugEventSource for ScriptedSource
    {
        fn wait_for_event(&mut self, _timeout: Option<Duration>) -> Result<Option<EventRecord>>
        {
            self.calls.push(Call::Wait);
            Ok(self.script.pop_front())
        }

        fn continue_event(&mut self, pid: u32, tid: u32) -> Result<()>
        {
            assert_eq!(pid, PID);
            self.calls.push(Call::Continue(tid));
            if self.fail_continue {
                return Err(DebuggerError::last_os_error("ContinueDebugEvent"));
            }
            Ok(())
        }

        fn close_handle(&mut self, handle: NativeHandle) -> Result<()>
        {
            self.calls.push(Call::Close(handle));
            if self.fail_close {
                return Err(DebuggerError::InvalidArgument("bad handle".to_string()));
            }
            Ok(())
        }

        fn debug_break(&mut self, _process: NativeHandle) -> Result<()>
        {
            self.calls.push(Call::Break);
            Ok(())
        }

        fn get_context(&self, thread: NativeHandle) -> Result<Registers>
        {
            Ok(self
                .contexts
                .get(&thread)
                .cloned()
                .unwrap_or_else(|| Registers::for_arch(Architecture::X86_64)))
        }

        fn set_context(&mut self, thread: NativeHandle, registers: &Registers) -> Result<()>
        {
            self.calls.push(Call::SetContext(thread, registers.status));
            self.contexts.insert(thread, registers.clone());
            Ok(())
        }

        fn read_memory(&self, _process: NativeHandle, address: Address, len: usize) -> Result<Vec<u8>>
        {
            Ok((0..len as u64)
                .map(|i| self.memory.get(&(address.value() + i)).copied().unwrap_or(0))
                .collect())
        }

        fn write_memory(&mut self, _process: NativeHandle, address: Address, data: &[u8]) -> Result<()>
        {
            for (i, byte) in data.iter().enumerate() {
                self.memory.insert(address.value() + i as u64, *byte);
            }
            Ok(())
        }

        fn terminate(&mut self, _process: NativeHandle, _exit_code: u32) -> Result<()>
        {
            self.calls.push(Call::Terminate);
            Ok(())
        }

        fn manual_stop(&self, _process: NativeHandle) -> StopHandle
        {
            StopHandle::new(Arc::new(Counter(AtomicUsize::new(0))))
        }
    }

    fn created() -> (u32, DebugEvent)
    {
        (
            1,
            DebugEvent::ProcessCreated {
                process: PROCESS,
                thread: MAIN_THREAD,
                file: IMAGE_FILE,
            },
        )
    }

    fn exception(tid: u32) -> (u32, DebugEvent)
    {
        (
            tid,
            DebugEvent::Exception {
                code: 0x8000_0003,
                address: Address::from(0x1000),
                first_chance: true,
            },
        )
    }

    fn backend(events: Vec<(u32, DebugEvent)>) -> (PushBackend<ScriptedSource>, ThreadTable<NativeHandle>)
    {
        (
            PushBackend::new(ScriptedSource::new(events), ProcessId(PID), Architecture::X86_64),
            ThreadTable::new(),
        )
    }

    #[test]
    fn exit_before_first_trap_reports_exit_code()
    {
        let (mut backend, mut threads) = backend(vec![created(), (1, DebugEvent::ProcessExited { exit_code: 3 })]);
        let outcome = backend.trap_wait(&mut threads, None).unwrap();
        assert_eq!(outcome, WaitOutcome::Exited { code: 3 });
        assert!(threads.is_empty());
        assert_eq!(threads.current(), None);
        assert_eq!(
            backend.source().calls,
            vec![
                Call::Wait,
                Call::Close(IMAGE_FILE),
                Call::Continue(1),
                Call::Wait,
                Call::Continue(1),
            ]
        );
    }

    #[test]
    fn event_table_updates_threads_and_stops_on_exception()
    {
        let (mut backend, mut threads) = backend(vec![
            created(),
            (2, DebugEvent::ThreadCreated { thread: NativeHandle(0x200) }),
            (3, DebugEvent::ThreadCreated { thread: NativeHandle(0x300) }),
            (2, DebugEvent::ThreadExited { exit_code: 0 }),
            (
                1,
                DebugEvent::DllLoaded {
                    file: NativeHandle(0x400),
                    base: Address::from(0x7ff0_0000),
                },
            ),
            (
                1,
                DebugEvent::DllLoaded {
                    file: NativeHandle::INVALID,
                    base: Address::from(0x7ff1_0000),
                },
            ),
            (1, DebugEvent::DllUnloaded { base: Address::from(0x7ff1_0000) }),
            (
                1,
                DebugEvent::OutputString {
                    address: Address::from(0x5000),
                    length: 4,
                    unicode: false,
                },
            ),
            (1, DebugEvent::Rip { error: 0 }),
            exception(3),
        ]);

        let outcome = backend.trap_wait(&mut threads, None).unwrap();
        assert_eq!(outcome, WaitOutcome::Stopped(ThreadId(3)));
        assert_eq!(threads.ids(), vec![ThreadId(1), ThreadId(3)]);
        assert_eq!(threads.current(), Some(ThreadId(1)));
        assert_eq!(backend.break_thread(), Some(ThreadId(3)));
        assert_eq!(backend.pending_thread(), Some(ThreadId(3)));
        assert_eq!(backend.process_handle(), PROCESS);
        assert!(threads.iter().all(|t| t.memory == MemoryTarget::Handle(PROCESS.0)));
        assert_eq!(threads.get(ThreadId(3)).unwrap().os, NativeHandle(0x300));

        let calls = &backend.source().calls;
        let closes: Vec<_> = calls.iter().filter(|c| matches!(c, Call::Close(_))).collect();
        assert_eq!(closes, vec![&Call::Close(IMAGE_FILE), &Call::Close(NativeHandle(0x400))]);
        // nine events continued, the exception left outstanding
        assert_eq!(calls.iter().filter(|c| matches!(c, Call::Continue(_))).count(), 9);
    }

    #[test]
    fn every_file_handle_is_closed_before_the_next_wait()
    {
        let (mut backend, mut threads) = backend(vec![
            created(),
            (
                1,
                DebugEvent::DllLoaded {
                    file: NativeHandle(0x400),
                    base: Address::ZERO,
                },
            ),
            exception(1),
        ]);
        backend.trap_wait(&mut threads, None).unwrap();

        let calls = &backend.source().calls;
        for (index, call) in calls.iter().enumerate() {
            if let Call::Close(handle) = call {
                let next_wait = calls[index..].iter().position(|c| *c == Call::Wait);
                let later_close = calls[index + 1..].iter().any(|c| *c == Call::Close(*handle));
                assert!(next_wait.is_some(), "close must precede another wait");
                assert!(!later_close, "handle {handle:?} closed twice");
            }
        }
    }

    #[test]
    fn unknown_event_halts_the_pump()
    {
        let (mut backend, mut threads) = backend(vec![created(), (1, DebugEvent::Unknown(99)), exception(1)]);
        let err = backend.trap_wait(&mut threads, None).unwrap_err();
        assert!(matches!(err, DebuggerError::UnknownEvent(99)));
        let calls = &backend.source().calls;
        assert_eq!(calls.last(), Some(&Call::Wait));
        assert_eq!(backend.source().script.len(), 1);
    }

    #[test]
    fn failed_close_is_a_pump_failure()
    {
        let (mut backend, mut threads) = backend(vec![created()]);
        backend.source.fail_close = true;
        let err = backend.trap_wait(&mut threads, None).unwrap_err();
        assert!(matches!(err, DebuggerError::PumpFailure(_)));
    }

    #[test]
    fn failed_continue_is_a_pump_failure()
    {
        let (mut backend, mut threads) = backend(vec![created(), exception(1)]);
        backend.source.fail_continue = true;
        let err = backend.trap_wait(&mut threads, None).unwrap_err();
        assert!(matches!(err, DebuggerError::PumpFailure(_)));
    }

    #[test]
    fn empty_wait_is_a_timeout()
    {
        let (mut backend, mut threads) = backend(vec![]);
        let err = backend
            .trap_wait(&mut threads, Some(Duration::from_millis(10)))
            .unwrap_err();
        assert!(matches!(err, DebuggerError::WaitTimeout(d) if d == Duration::from_millis(10)));
    }

    #[test]
    fn waiting_with_an_outstanding_event_is_rejected()
    {
        let (mut backend, mut threads) = backend(vec![created(), exception(1)]);
        backend.trap_wait(&mut threads, None).unwrap();
        assert!(matches!(
            backend.trap_wait(&mut threads, None),
            Err(DebuggerError::InvalidState(_))
        ));
    }

    #[test]
    fn halt_is_a_no_op_while_frozen()
    {
        let (mut backend, mut threads) = backend(vec![created(), exception(1)]);
        backend.trap_wait(&mut threads, None).unwrap();
        let outcome = backend.halt(&mut threads, ThreadId(1)).unwrap();
        assert_eq!(outcome, WaitOutcome::Stopped(ThreadId(1)));
        assert!(!backend.source().calls.contains(&Call::Break));
    }

    #[test]
    fn halt_breaks_in_when_running()
    {
        let (mut backend, mut threads) = backend(vec![created(), exception(1), exception(9)]);
        backend.trap_wait(&mut threads, None).unwrap();
        backend.resume(&mut threads, ThreadId(1), None).unwrap();
        assert!(!backend.stopped(&threads, ThreadId(1)).unwrap());

        let outcome = backend.halt(&mut threads, ThreadId(1)).unwrap();
        assert_eq!(outcome, WaitOutcome::Stopped(ThreadId(9)));
        assert!(backend.source().calls.contains(&Call::Break));
        assert!(backend.stopped(&threads, ThreadId(1)).unwrap());
    }

    #[test]
    fn resume_continues_the_outstanding_event_once()
    {
        let (mut backend, mut threads) = backend(vec![created(), exception(1)]);
        backend.trap_wait(&mut threads, None).unwrap();
        backend.resume(&mut threads, ThreadId(1), None).unwrap();
        assert!(threads.iter().all(|t| t.running));
        assert!(matches!(
            backend.resume(&mut threads, ThreadId(1), None),
            Err(DebuggerError::InvalidState(_))
        ));
    }

    #[test]
    fn single_step_toggles_trap_flag_and_skips_foreign_exceptions()
    {
        let (mut backend, mut threads) = backend(vec![
            created(),
            (5, DebugEvent::ThreadCreated { thread: NativeHandle(0x500) }),
            exception(1),
            exception(5),
            exception(1),
        ]);
        backend.trap_wait(&mut threads, None).unwrap();
        let outcome = backend.single_step(&mut threads, ThreadId(1)).unwrap();
        assert_eq!(outcome, WaitOutcome::Stopped(ThreadId(1)));

        let set_contexts: Vec<_> = backend
            .source()
            .calls
            .iter()
            .filter_map(|c| match c {
                Call::SetContext(handle, status) => Some((*handle, *status)),
                _ => None,
            })
            .collect();
        assert_eq!(set_contexts, vec![(MAIN_THREAD, 0x100), (MAIN_THREAD, 0)]);
        assert_eq!(backend.pending_thread(), Some(ThreadId(1)));
        assert!(backend.source().script.is_empty());
    }

    #[test]
    fn single_step_reports_exit()
    {
        let (mut backend, mut threads) = backend(vec![
            created(),
            exception(1),
            (1, DebugEvent::ProcessExited { exit_code: 0 }),
        ]);
        backend.trap_wait(&mut threads, None).unwrap();
        let outcome = backend.single_step(&mut threads, ThreadId(1)).unwrap();
        assert_eq!(outcome, WaitOutcome::Exited { code: 0 });
        assert!(threads.is_empty());
    }

    #[test]
    fn memory_goes_through_the_process_handle()
    {
        let (mut backend, mut threads) = backend(vec![created(), exception(1)]);
        backend.trap_wait(&mut threads, None).unwrap();
        backend
            .write_memory(&threads, ThreadId(1), Address::from(0x10), &[1, 2, 3])
            .unwrap();
        let bytes = backend.read_memory(&threads, ThreadId(1), Address::from(0x0f), 5).unwrap();
        assert_eq!(bytes, vec![0, 1, 2, 3, 0]);
    }

    #[test]
    fn memory_needs_a_bound_accessor()
    {
        let (backend, mut threads) = backend(vec![]);
        threads.register(ThreadId(1), MemoryTarget::Unbound, MAIN_THREAD);
        assert!(matches!(
            backend.read_memory(&threads, ThreadId(1), Address::ZERO, 1),
            Err(DebuggerError::InvalidState(_))
        ));
    }

    #[test]
    fn process_created_retargets_existing_threads()
    {
        let (mut backend, mut threads) = backend(vec![created(), exception(1)]);
        threads.register(ThreadId(7), MemoryTarget::Unbound, NativeHandle(0x700));
        backend.trap_wait(&mut threads, None).unwrap();
        assert_eq!(threads.get(ThreadId(7)).unwrap().memory, MemoryTarget::Handle(PROCESS.0));
    }

    #[test]
    fn terminate_drains_to_exit()
    {
        let (mut backend, mut threads) = backend(vec![
            created(),
            exception(1),
            (1, DebugEvent::ProcessExited { exit_code: 1 }),
        ]);
        backend.trap_wait(&mut threads, None).unwrap();
        assert_eq!(backend.terminate(&mut threads).unwrap(), 1);
        assert!(backend.source().calls.contains(&Call::Terminate));
        assert!(threads.is_empty());
    }

    #[test]
    fn native_handle_validity()
    {
        assert!(!NativeHandle::NULL.is_valid());
        assert!(!NativeHandle::INVALID.is_valid());
        assert!(NativeHandle(0x44).is_valid());
    }
}
