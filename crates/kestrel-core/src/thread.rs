//! # Thread Controller
//!
//! One [`ThreadRecord`] per inferior thread, kept in a [`ThreadTable`] that
//! lives on the debug worker next to the backend. Records are created and
//! removed only by the event pumps, exactly when the OS reports a thread
//! creation or exit.
//!
//! Callers do not touch records directly: [`Thread`] is a borrowed handle
//! (obtained from [`Process::thread`](crate::process::Process::thread)) whose
//! operations are submitted to the worker.

use std::collections::HashMap;

use tracing::trace;

use crate::backend::Backend;
use crate::error::{DebuggerError, Result};
use crate::process::Process;
use crate::types::{Address, MemoryTarget, Registers, ThreadId};

/// Per-thread state
///
/// `D` is the platform-specific run state: the native thread handle on
/// Windows, nothing on Linux.
#[derive(Debug)]
pub struct ThreadRecord<D>
{
    /// OS thread id
    pub id: ThreadId,
    /// Whether the thread was last resumed and has not reported a stop since
    pub running: bool,
    /// Breakpoint the thread is currently sitting on; it must be stepped past before continuing
    pub breakpoint: Option<Address>,
    /// Snapshot taken by `save_registers`
    pub register_cache: Option<Registers>,
    /// What memory reads and writes for this thread go through
    pub memory: MemoryTarget,
    /// Platform run state
    pub os: D,
}

impl<D> ThreadRecord<D>
{
    /// New stopped record without breakpoint marker or cached registers
    pub fn new(id: ThreadId, memory: MemoryTarget, os: D) -> Self
    {
        Self {
            id,
            running: false,
            breakpoint: None,
            register_cache: None,
            memory,
            os,
        }
    }
}

/// Mapping thread id → record, plus the current-thread pointer
///
/// After the first registration `current` always names a live record: when
/// the current thread is removed the lowest-numbered survivor takes over.
#[derive(Debug)]
pub struct ThreadTable<D>
{
    threads: HashMap<ThreadId, ThreadRecord<D>>,
    current: Option<ThreadId>,
}

impl<D> ThreadTable<D>
{
    /// Empty table
    pub fn new() -> Self
    {
        Self {
            threads: HashMap::new(),
            current: None,
        }
    }

    /// Register a thread
    ///
    /// A no-op returning `false` when the id is already known; the existing
    /// record (and the `os` value passed in) is left alone. The first thread
    /// registered becomes current.
    pub fn register(&mut self, id: ThreadId, memory: MemoryTarget, os: D) -> bool
    {
        if self.threads.contains_key(&id) {
            return false;
        }
        trace!(thread = %id, "Registering thread");
        self.threads.insert(id, ThreadRecord::new(id, memory, os));
        if self.current.is_none() {
            self.current = Some(id);
        }
        true
    }

    /// Remove a thread, returning its record
    pub fn remove(&mut self, id: ThreadId) -> Option<ThreadRecord<D>>
    {
        let record = self.threads.remove(&id)?;
        trace!(thread = %id, "Removing thread");
        if self.current == Some(id) {
            self.current = self.threads.keys().min().copied();
        }
        Some(record)
    }

    /// Drop every record (the process is gone)
    pub fn clear(&mut self) -> Vec<ThreadRecord<D>>
    {
        self.current = None;
        self.threads.drain().map(|(_, record)| record).collect()
    }

    /// Current thread, if any thread exists
    pub fn current(&self) -> Option<ThreadId>
    {
        self.current
    }

    /// Make `id` the current thread
    ///
    /// ## Errors
    ///
    /// `ThreadNotFound` if `id` is not registered.
    pub fn set_current(&mut self, id: ThreadId) -> Result<()>
    {
        if !self.threads.contains_key(&id) {
            return Err(DebuggerError::ThreadNotFound(id));
        }
        self.current = Some(id);
        Ok(())
    }

    /// Look up a record
    pub fn get(&self, id: ThreadId) -> Option<&ThreadRecord<D>>
    {
        self.threads.get(&id)
    }

    /// Look up a record mutably
    pub fn get_mut(&mut self, id: ThreadId) -> Option<&mut ThreadRecord<D>>
    {
        self.threads.get_mut(&id)
    }

    /// Look up a record or fail with `ThreadNotFound`
    pub fn require(&self, id: ThreadId) -> Result<&ThreadRecord<D>>
    {
        self.get(id).ok_or(DebuggerError::ThreadNotFound(id))
    }

    /// Mutable variant of [`ThreadTable::require`]
    pub fn require_mut(&mut self, id: ThreadId) -> Result<&mut ThreadRecord<D>>
    {
        self.get_mut(id).ok_or(DebuggerError::ThreadNotFound(id))
    }

    /// Whether `id` is registered
    pub fn contains(&self, id: ThreadId) -> bool
    {
        self.threads.contains_key(&id)
    }

    /// Registered thread ids in ascending order
    pub fn ids(&self) -> Vec<ThreadId>
    {
        let mut ids: Vec<_> = self.threads.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Iterate over all records
    pub fn iter(&self) -> impl Iterator<Item = &ThreadRecord<D>>
    {
        self.threads.values()
    }

    /// Iterate mutably over all records
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut ThreadRecord<D>>
    {
        self.threads.values_mut()
    }

    /// Mark every thread running or stopped
    pub fn set_all_running(&mut self, running: bool)
    {
        for record in self.threads.values_mut() {
            record.running = running;
        }
    }

    pub fn len(&self) -> usize
    {
        self.threads.len()
    }

    pub fn is_empty(&self) -> bool
    {
        self.threads.is_empty()
    }
}

impl<D> Default for ThreadTable<D>
{
    fn default() -> Self
    {
        Self::new()
    }
}

/// Borrowed handle on one inferior thread
///
/// Every call is forwarded to the debug worker. Register operations require
/// the thread to be stopped (live query) and fail with `InvalidState`
/// otherwise.
pub struct Thread<'p, B: Backend>
{
    process: &'p Process<B>,
    id: ThreadId,
}

impl<B: Backend> std::fmt::Debug for Thread<'_, B>
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result
    {
        f.debug_struct("Thread")
            .field("process", &self.process)
            .field("id", &self.id)
            .finish()
    }
}

impl<'p, B: Backend> Thread<'p, B>
{
    pub(crate) fn new(process: &'p Process<B>, id: ThreadId) -> Self
    {
        Self { process, id }
    }

    /// Thread id
    pub fn id(&self) -> ThreadId
    {
        self.id
    }

    /// Process this thread belongs to
    pub fn process(&self) -> &'p Process<B>
    {
        self.process
    }

    /// Stop the thread
    pub fn halt(&self) -> Result<()>
    {
        let id = self.id;
        self.process.exec(move |inferior| inferior.halt(id))
    }

    /// Let the thread run, optionally delivering `signal` (ignored on Windows)
    pub fn resume(&self, signal: Option<i32>) -> Result<()>
    {
        let id = self.id;
        self.process.exec(move |inferior| inferior.resume_thread(id, signal))
    }

    /// Execute exactly one instruction
    ///
    /// ## Errors
    ///
    /// `ProcessExited` if the process died while stepping.
    pub fn step(&self) -> Result<()>
    {
        let id = self.id;
        self.process.exec(move |inferior| inferior.step(id))
    }

    /// Whether the OS reports the thread as stopped right now
    pub fn stopped(&self) -> Result<bool>
    {
        let id = self.id;
        self.process.exec(move |inferior| inferior.stopped(id))
    }

    /// Snapshot the registers into the thread's cache and return them
    pub fn save_registers(&self) -> Result<Registers>
    {
        let id = self.id;
        self.process.exec(move |inferior| inferior.save_registers(id))
    }

    /// Write the cached snapshot back to the thread
    ///
    /// ## Errors
    ///
    /// `InvalidState` if the thread is running or nothing was saved.
    pub fn restore_registers(&self) -> Result<()>
    {
        let id = self.id;
        self.process.exec(move |inferior| inferior.restore_registers(id))
    }

    /// Live register read
    pub fn registers(&self) -> Result<Registers>
    {
        let id = self.id;
        self.process.exec(move |inferior| inferior.registers(id))
    }

    /// Live register write
    pub fn set_registers(&self, registers: Registers) -> Result<()>
    {
        let id = self.id;
        self.process.exec(move |inferior| inferior.set_registers(id, &registers))
    }

    /// Program counter
    pub fn pc(&self) -> Result<Address>
    {
        Ok(self.registers()?.pc)
    }

    /// Move the program counter
    pub fn set_pc(&self, pc: Address) -> Result<()>
    {
        let id = self.id;
        self.process.exec(move |inferior| inferior.set_pc(id, pc))
    }

    /// Breakpoint marker of this thread
    pub fn current_breakpoint(&self) -> Result<Option<Address>>
    {
        let id = self.id;
        self.process
            .exec(move |inferior| inferior.threads.require(id).map(|record| record.breakpoint))
    }

    /// Read `len` bytes of inferior memory through this thread's accessor
    pub fn read_memory(&self, address: Address, len: usize) -> Result<Vec<u8>>
    {
        let id = self.id;
        self.process.exec(move |inferior| inferior.read_memory(id, address, len))
    }

    /// Write `data` to inferior memory through this thread's accessor
    pub fn write_memory(&self, address: Address, data: &[u8]) -> Result<()>
    {
        let id = self.id;
        let data = data.to_vec();
        self.process.exec(move |inferior| inferior.write_memory(id, address, &data))
    }
}

#[cfg(test)]
mod tests
{
    use super::*;

    fn tid(n: u64) -> ThreadId
    {
        ThreadId(n)
    }

    #[test]
    fn first_registered_thread_becomes_current()
    {
        let mut table = ThreadTable::new();
        assert!(table.register(tid(7), MemoryTarget::Unbound, ()));
        assert!(table.register(tid(3), MemoryTarget::Unbound, ()));
        assert_eq!(table.current(), Some(tid(7)));
        assert_eq!(table.ids(), vec![tid(3), tid(7)]);
    }

    #[test]
    fn registering_a_known_thread_is_a_no_op()
    {
        let mut table = ThreadTable::new();
        table.register(tid(1), MemoryTarget::Handle(10), "first");
        table.get_mut(tid(1)).unwrap().breakpoint = Some(Address::from(0x10));

        assert!(!table.register(tid(1), MemoryTarget::Handle(20), "second"));
        let record = table.get(tid(1)).unwrap();
        assert_eq!(record.os, "first");
        assert_eq!(record.memory, MemoryTarget::Handle(10));
        assert_eq!(record.breakpoint, Some(Address::from(0x10)));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn removing_current_promotes_lowest_survivor()
    {
        let mut table = ThreadTable::new();
        for n in [5, 9, 2] {
            table.register(tid(n), MemoryTarget::Unbound, ());
        }
        table.remove(tid(5));
        assert_eq!(table.current(), Some(tid(2)));
        table.remove(tid(9));
        assert_eq!(table.current(), Some(tid(2)));
        table.remove(tid(2));
        assert_eq!(table.current(), None);
        assert!(table.is_empty());
    }

    #[test]
    fn set_current_requires_known_thread()
    {
        let mut table = ThreadTable::new();
        table.register(tid(1), MemoryTarget::Unbound, ());
        table.register(tid(2), MemoryTarget::Unbound, ());
        table.set_current(tid(2)).unwrap();
        assert_eq!(table.current(), Some(tid(2)));
        assert!(matches!(table.set_current(tid(3)), Err(DebuggerError::ThreadNotFound(t)) if t == tid(3)));
    }

    #[test]
    fn clear_empties_table_and_current()
    {
        let mut table = ThreadTable::new();
        table.register(tid(1), MemoryTarget::Unbound, ());
        table.register(tid(2), MemoryTarget::Unbound, ());
        assert_eq!(table.clear().len(), 2);
        assert!(table.is_empty());
        assert_eq!(table.current(), None);
    }

    #[test]
    fn table_tracks_reported_live_set()
    {
        // create/exit sequence, including duplicate creation and exit of unknown ids
        let events: &[(bool, u64)] = &[
            (true, 1),
            (true, 2),
            (true, 2),
            (true, 3),
            (false, 2),
            (false, 42),
            (true, 4),
            (false, 1),
        ];
        let mut table = ThreadTable::new();
        let mut live = std::collections::BTreeSet::new();
        for &(create, n) in events {
            if create {
                table.register(tid(n), MemoryTarget::Unbound, ());
                live.insert(tid(n));
            } else {
                table.remove(tid(n));
                live.remove(&tid(n));
            }
            assert_eq!(table.ids(), live.iter().copied().collect::<Vec<_>>());
            assert!(table.current().is_some_and(|c| live.contains(&c)));
        }
    }
}
