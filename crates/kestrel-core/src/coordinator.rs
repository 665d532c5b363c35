//! # Breakpoint resume coordinator
//!
//! A thread stopped on a software breakpoint cannot simply be continued: the
//! trap instruction is still in memory at its PC. The breakpoint layer above
//! this crate restores the original bytes, the thread is armed with a
//! breakpoint marker, and on the next resume the coordinator single-steps it
//! past the breakpoint before letting it run.
//!
//! Only the break thread is touched. Siblings keep whatever run state they had.

use std::collections::{BTreeSet, HashSet};

use tracing::debug;

use crate::backend::{Backend, Inferior};
use crate::error::{DebuggerError, Result};
use crate::types::{Address, Architecture, ThreadId};

/// Query into the caller's breakpoint bookkeeping
pub trait BreakpointLookup
{
    /// Whether a software breakpoint is installed at `address`
    fn contains(&self, address: Address) -> bool;
}

impl BreakpointLookup for HashSet<Address>
{
    fn contains(&self, address: Address) -> bool
    {
        HashSet::contains(self, &address)
    }
}

impl BreakpointLookup for BTreeSet<Address>
{
    fn contains(&self, address: Address) -> bool
    {
        BTreeSet::contains(self, &address)
    }
}

impl BreakpointLookup for [Address]
{
    fn contains(&self, address: Address) -> bool
    {
        self.iter().any(|known| *known == address)
    }
}

/// Address of the breakpoint a thread stopped on, if `pc` is just past one
///
/// ```rust
/// use std::collections::BTreeSet;
///
/// use kestrel_core::coordinator::breakpoint_hit;
/// use kestrel_core::types::{Address, Architecture};
///
/// let known: BTreeSet<Address> = [Address::from(0x1000)].into_iter().collect();
/// assert_eq!(breakpoint_hit(Architecture::X86_64, Address::from(0x1001), &known), Some(Address::from(0x1000)));
/// assert_eq!(breakpoint_hit(Architecture::X86_64, Address::from(0x1000), &known), None);
/// ```
pub fn breakpoint_hit<L>(arch: Architecture, pc: Address, lookup: &L) -> Option<Address>
where
    L: BreakpointLookup + ?Sized,
{
    let candidate = pc.checked_sub(arch.trap_rewind())?;
    lookup.contains(candidate).then_some(candidate)
}

/// Rewind `tid` onto the breakpoint at `address` and arm its marker
pub(crate) fn arm_breakpoint<B: Backend>(inferior: &mut Inferior<B>, tid: ThreadId, address: Address) -> Result<()>
{
    inferior.set_pc(tid, address)?;
    inferior.threads.require_mut(tid)?.breakpoint = Some(address);
    debug!(thread = %tid, %address, "Breakpoint marker armed");
    Ok(())
}

/// Resume the inferior after a stop
///
/// Steps the break thread off its breakpoint first when its marker is armed,
/// then resumes the (re-resolved) break thread. Returns the thread resumed.
pub(crate) fn resume_from_trap<B: Backend>(inferior: &mut Inferior<B>) -> Result<ThreadId>
{
    inferior.ensure_alive()?;
    let tid = inferior
        .break_thread()
        .filter(|tid| inferior.threads().contains(*tid))
        .or_else(|| inferior.threads().current())
        .ok_or_else(|| DebuggerError::InvalidState("no thread to resume".to_string()))?;

    if let Some(address) = inferior.threads().require(tid)?.breakpoint {
        debug!(thread = %tid, %address, "Stepping off breakpoint");
        inferior.step(tid)?;
        if let Some(record) = inferior.threads.get_mut(tid) {
            record.breakpoint = None;
        }
    }

    // stepping pumps events, so the break thread may have moved on
    let tid = inferior
        .break_thread()
        .filter(|tid| inferior.threads().contains(*tid))
        .unwrap_or(tid);
    inferior.resume_thread(tid, None)?;
    Ok(tid)
}

#[cfg(test)]
mod tests
{
    use std::collections::{HashMap, VecDeque};
    use std::path::PathBuf;
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;
    use crate::backend::{ManualStop, StopHandle};
    use crate::event::WaitOutcome;
    use crate::thread::ThreadTable;
    use crate::types::{MemoryTarget, ProcessId, Registers};

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Call
    {
        Step(u64),
        Resume(u64),
    }

    struct Never;

    impl ManualStop for Never
    {
        fn request_stop(&self) -> Result<()>
        {
            Ok(())
        }
    }

    /// Backend whose threads execute one-byte instructions
    #[derive(Default)]
    struct FakeBackend
    {
        outcomes: VecDeque<WaitOutcome>,
        pcs: HashMap<ThreadId, u64>,
        break_thread: Option<ThreadId>,
        calls: Vec<Call>,
    }

    impl Backend for FakeBackend
    {
        type ThreadData = ();

        fn pid(&self) -> ProcessId
        {
            ProcessId(1)
        }

        fn trap_wait(&mut self, threads: &mut ThreadTable<()>, _timeout: Option<Duration>) -> Result<WaitOutcome>
        {
            let outcome = self.outcomes.pop_front().ok_or(DebuggerError::WaitTimeout(Duration::ZERO))?;
            match outcome {
                WaitOutcome::Stopped(tid) => {
                    threads.set_all_running(false);
                    self.break_thread = Some(tid);
                }
                WaitOutcome::Exited { .. } => {
                    threads.clear();
                }
            }
            Ok(outcome)
        }

        fn break_thread(&self) -> Option<ThreadId>
        {
            self.break_thread
        }

        fn halt(&mut self, threads: &mut ThreadTable<()>, tid: ThreadId) -> Result<WaitOutcome>
        {
            threads.require_mut(tid)?.running = false;
            Ok(WaitOutcome::Stopped(tid))
        }

        fn resume(&mut self, threads: &mut ThreadTable<()>, tid: ThreadId, _signal: Option<i32>) -> Result<()>
        {
            self.calls.push(Call::Resume(tid.raw()));
            threads.require_mut(tid)?.running = true;
            Ok(())
        }

        fn single_step(&mut self, _threads: &mut ThreadTable<()>, tid: ThreadId) -> Result<WaitOutcome>
        {
            self.calls.push(Call::Step(tid.raw()));
            *self.pcs.entry(tid).or_default() += 1;
            self.break_thread = Some(tid);
            Ok(WaitOutcome::Stopped(tid))
        }

        fn stopped(&self, threads: &ThreadTable<()>, tid: ThreadId) -> Result<bool>
        {
            Ok(!threads.require(tid)?.running)
        }

        fn read_registers(&self, _threads: &ThreadTable<()>, tid: ThreadId) -> Result<Registers>
        {
            let mut registers = Registers::for_arch(Architecture::X86_64);
            registers.pc = Address::from(self.pcs.get(&tid).copied().unwrap_or_default());
            Ok(registers)
        }

        fn write_registers(&mut self, _threads: &ThreadTable<()>, tid: ThreadId, registers: &Registers)
            -> Result<()>
        {
            self.pcs.insert(tid, registers.pc.value());
            Ok(())
        }

        fn read_memory(&self, _threads: &ThreadTable<()>, _tid: ThreadId, _address: Address, len: usize)
            -> Result<Vec<u8>>
        {
            Ok(vec![0; len])
        }

        fn write_memory(&mut self, _threads: &ThreadTable<()>, _tid: ThreadId, _address: Address, _data: &[u8])
            -> Result<()>
        {
            Ok(())
        }

        fn terminate(&mut self, _threads: &mut ThreadTable<()>) -> Result<i32>
        {
            Ok(9)
        }

        fn executable_path(&self) -> Result<PathBuf>
        {
            Err(DebuggerError::NotImplemented("executable_path"))
        }

        fn stop_handle(&self) -> StopHandle
        {
            StopHandle::new(Arc::new(Never))
        }
    }

    fn inferior(outcomes: Vec<WaitOutcome>) -> Inferior<FakeBackend>
    {
        let mut threads = ThreadTable::new();
        threads.register(ThreadId(1), MemoryTarget::Task(ThreadId(1)), ());
        threads.register(ThreadId(2), MemoryTarget::Task(ThreadId(2)), ());
        let backend = FakeBackend {
            outcomes: outcomes.into(),
            ..FakeBackend::default()
        };
        Inferior::new(backend, threads, None)
    }

    #[test]
    fn armed_thread_is_stepped_once_then_resumed()
    {
        let mut inferior = inferior(vec![WaitOutcome::Stopped(ThreadId(2))]);
        inferior.backend.pcs.insert(ThreadId(2), 0x1001);
        inferior.trap_wait().unwrap();

        arm_breakpoint(&mut inferior, ThreadId(2), Address::from(0x1000)).unwrap();
        assert_eq!(inferior.registers(ThreadId(2)).unwrap().pc, Address::from(0x1000));

        let resumed = resume_from_trap(&mut inferior).unwrap();
        assert_eq!(resumed, ThreadId(2));
        assert_eq!(inferior.backend().calls, vec![Call::Step(2), Call::Resume(2)]);
        assert_eq!(inferior.threads().get(ThreadId(2)).unwrap().breakpoint, None);
        assert_eq!(inferior.backend().pcs[&ThreadId(2)], 0x1001);
        assert!(!inferior.threads().get(ThreadId(1)).unwrap().running);
    }

    #[test]
    fn unarmed_thread_is_only_resumed()
    {
        let mut inferior = inferior(vec![WaitOutcome::Stopped(ThreadId(1))]);
        inferior.trap_wait().unwrap();
        assert_eq!(resume_from_trap(&mut inferior).unwrap(), ThreadId(1));
        assert_eq!(inferior.backend().calls, vec![Call::Resume(1)]);
    }

    #[test]
    fn falls_back_to_current_thread_before_any_trap()
    {
        let mut inferior = inferior(vec![]);
        assert_eq!(resume_from_trap(&mut inferior).unwrap(), ThreadId(1));
    }

    #[test]
    fn resume_after_exit_fails()
    {
        let mut inferior = inferior(vec![WaitOutcome::Exited { code: 3 }]);
        inferior.trap_wait().unwrap();
        let err = resume_from_trap(&mut inferior).unwrap_err();
        assert!(err.is_process_exited());
        assert_eq!(err.exit_status(), Some(3));
        assert!(inferior.backend().calls.is_empty());
    }

    #[test]
    fn arming_a_running_thread_is_rejected()
    {
        let mut inferior = inferior(vec![]);
        inferior.resume_thread(ThreadId(1), None).unwrap();
        let err = arm_breakpoint(&mut inferior, ThreadId(1), Address::from(0x10)).unwrap_err();
        assert!(matches!(err, DebuggerError::InvalidState(_)));
        assert_eq!(inferior.threads().get(ThreadId(1)).unwrap().breakpoint, None);
    }

    #[test]
    fn breakpoint_hit_uses_trap_rewind()
    {
        let known = vec![Address::from(0x2000)];
        assert_eq!(
            breakpoint_hit(Architecture::X86_64, Address::from(0x2001), known.as_slice()),
            Some(Address::from(0x2000))
        );
        assert_eq!(
            breakpoint_hit(Architecture::Arm64, Address::from(0x2000), known.as_slice()),
            Some(Address::from(0x2000))
        );
        assert_eq!(breakpoint_hit(Architecture::X86_64, Address::ZERO, known.as_slice()), None);

        let set: HashSet<Address> = known.into_iter().collect();
        assert_eq!(breakpoint_hit(Architecture::X86_64, Address::from(0x3001), &set), None);
    }
}
