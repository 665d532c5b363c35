//! # ptrace calls
//!
//! [`LinuxTracer`] implements the pull pump's [`Tracer`] over raw libc
//! `ptrace`/`waitpid`. Registers travel through `PTRACE_GETREGSET` /
//! `PTRACE_SETREGSET` with `NT_PRSTATUS`, which works the same on x86-64 and
//! arm64; memory goes word by word through `PTRACE_PEEKDATA` /
//! `PTRACE_POKEDATA`.
//!
//! ## References
//!
//! - [ptrace(2)](https://man7.org/linux/man-pages/man2/ptrace.2.html)
//! - [waitpid(2)](https://man7.org/linux/man-pages/man2/waitpid.2.html)

use std::fs;
use std::io;
use std::mem;
use std::path::PathBuf;
use std::ptr;
use std::sync::Arc;

use libc::{c_int, c_void, pid_t};

use crate::backend::{ManualStop, StopHandle};
use crate::error::{DebuggerError, Result};
use crate::pump::pull::{Reaped, Tracer, WaitStatus, WaitTarget};
use crate::types::{Address, ProcessId, Registers, ThreadId};

const WORD: usize = mem::size_of::<libc::c_long>();

/// Options set on every traced thread
pub(crate) const TRACE_OPTIONS: c_int = libc::PTRACE_O_TRACECLONE | libc::PTRACE_O_EXITKILL;

fn as_pid(id: u64) -> pid_t
{
    id as pid_t
}

fn check(result: libc::c_long, operation: &'static str) -> Result<libc::c_long>
{
    if result == -1 {
        Err(DebuggerError::last_os_error(operation))
    } else {
        Ok(result)
    }
}

/// ptrace-backed [`Tracer`]
///
/// Stateless apart from the traced pid; must only be used from the thread
/// that became the tracer (the debug worker).
#[derive(Debug)]
pub struct LinuxTracer
{
    pid: ProcessId,
}

impl LinuxTracer
{
    pub fn new(pid: ProcessId) -> Self
    {
        Self { pid }
    }

    /// Traced process id
    pub fn pid(&self) -> ProcessId
    {
        self.pid
    }

    /// `PTRACE_ATTACH` one task
    pub(crate) fn attach_task(&self, tid: ThreadId) -> Result<()>
    {
        let result = unsafe {
            libc::ptrace(
                libc::PTRACE_ATTACH,
                as_pid(tid.raw()),
                ptr::null_mut::<c_void>(),
                ptr::null_mut::<c_void>(),
            )
        };
        check(result, "PTRACE_ATTACH").map(|_| ())
    }

    fn peek(tid: ThreadId, address: u64) -> Result<libc::c_long>
    {
        unsafe {
            *libc::__errno_location() = 0;
            let word = libc::ptrace(
                libc::PTRACE_PEEKDATA,
                as_pid(tid.raw()),
                address as *mut c_void,
                ptr::null_mut::<c_void>(),
            );
            if word == -1 && *libc::__errno_location() != 0 {
                return Err(DebuggerError::last_os_error("PTRACE_PEEKDATA"));
            }
            Ok(word)
        }
    }

    fn poke(tid: ThreadId, address: u64, word: libc::c_long) -> Result<()>
    {
        let result = unsafe { libc::ptrace(libc::PTRACE_POKEDATA, as_pid(tid.raw()), address as *mut c_void, word) };
        check(result, "PTRACE_POKEDATA").map(|_| ())
    }

    fn get_regset(tid: ThreadId) -> Result<libc::user_regs_struct>
    {
        let mut raw: libc::user_regs_struct = unsafe { mem::zeroed() };
        let mut iov = libc::iovec {
            iov_base: ptr::addr_of_mut!(raw).cast::<c_void>(),
            iov_len: mem::size_of::<libc::user_regs_struct>(),
        };
        let result = unsafe {
            libc::ptrace(
                libc::PTRACE_GETREGSET,
                as_pid(tid.raw()),
                libc::NT_PRSTATUS as usize as *mut c_void,
                ptr::addr_of_mut!(iov).cast::<c_void>(),
            )
        };
        check(result, "PTRACE_GETREGSET")?;
        Ok(raw)
    }

    fn set_regset(tid: ThreadId, mut raw: libc::user_regs_struct) -> Result<()>
    {
        let mut iov = libc::iovec {
            iov_base: ptr::addr_of_mut!(raw).cast::<c_void>(),
            iov_len: mem::size_of::<libc::user_regs_struct>(),
        };
        let result = unsafe {
            libc::ptrace(
                libc::PTRACE_SETREGSET,
                as_pid(tid.raw()),
                libc::NT_PRSTATUS as usize as *mut c_void,
                ptr::addr_of_mut!(iov).cast::<c_void>(),
            )
        };
        check(result, "PTRACE_SETREGSET").map(|_| ())
    }
}

impl Tracer for LinuxTracer
{
    fn wait(&mut self, target: WaitTarget, nohang: bool) -> Result<Reaped>
    {
        let pid = match target {
            WaitTarget::Any => -1,
            WaitTarget::Thread(tid) => as_pid(tid.raw()),
        };
        let flags = libc::__WALL | if nohang { libc::WNOHANG } else { 0 };
        loop {
            let mut status: c_int = 0;
            let reaped = unsafe { libc::waitpid(pid, &mut status, flags) };
            if reaped > 0 {
                return Ok(Reaped::Status(ThreadId(reaped as u64), WaitStatus::from_raw(status)));
            }
            if reaped == 0 {
                return Ok(Reaped::NotReady);
            }
            let err = io::Error::last_os_error();
            match err.raw_os_error() {
                Some(libc::EINTR) => continue,
                Some(libc::ECHILD) => return Ok(Reaped::NoChild),
                _ => {
                    return Err(DebuggerError::Native {
                        operation: "waitpid",
                        source: err,
                    })
                }
            }
        }
    }

    fn cont(&mut self, tid: ThreadId, signal: i32) -> Result<()>
    {
        let result = unsafe {
            libc::ptrace(
                libc::PTRACE_CONT,
                as_pid(tid.raw()),
                ptr::null_mut::<c_void>(),
                signal as usize as *mut c_void,
            )
        };
        check(result, "PTRACE_CONT").map(|_| ())
    }

    fn single_step(&mut self, tid: ThreadId) -> Result<()>
    {
        let result = unsafe {
            libc::ptrace(
                libc::PTRACE_SINGLESTEP,
                as_pid(tid.raw()),
                ptr::null_mut::<c_void>(),
                ptr::null_mut::<c_void>(),
            )
        };
        check(result, "PTRACE_SINGLESTEP").map(|_| ())
    }

    fn get_regs(&self, tid: ThreadId) -> Result<Registers>
    {
        Ok(regs::from_raw(&Self::get_regset(tid)?))
    }

    fn set_regs(&mut self, tid: ThreadId, registers: &Registers) -> Result<()>
    {
        // start from the live set so slots Registers does not model survive
        let mut raw = Self::get_regset(tid)?;
        regs::apply(registers, &mut raw);
        Self::set_regset(tid, raw)
    }

    fn set_options(&mut self, tid: ThreadId) -> Result<()>
    {
        let result = unsafe {
            libc::ptrace(
                libc::PTRACE_SETOPTIONS,
                as_pid(tid.raw()),
                ptr::null_mut::<c_void>(),
                TRACE_OPTIONS as usize as *mut c_void,
            )
        };
        check(result, "PTRACE_SETOPTIONS").map(|_| ())
    }

    fn event_message(&self, tid: ThreadId) -> Result<u64>
    {
        let mut message: libc::c_ulong = 0;
        let result = unsafe {
            libc::ptrace(
                libc::PTRACE_GETEVENTMSG,
                as_pid(tid.raw()),
                ptr::null_mut::<c_void>(),
                ptr::addr_of_mut!(message).cast::<c_void>(),
            )
        };
        check(result, "PTRACE_GETEVENTMSG")?;
        Ok(u64::from(message))
    }

    fn tgkill(&self, pid: ProcessId, tid: ThreadId, signal: i32) -> Result<()>
    {
        let result = unsafe {
            libc::syscall(
                libc::SYS_tgkill,
                libc::c_long::from(pid.0 as pid_t),
                tid.raw() as libc::c_long,
                libc::c_long::from(signal),
            )
        };
        check(result, "tgkill").map(|_| ())
    }

    fn thread_stopped(&self, pid: ProcessId, tid: ThreadId) -> Result<bool>
    {
        let stat = fs::read_to_string(format!("/proc/{pid}/task/{tid}/stat")).map_err(|source| {
            if source.kind() == io::ErrorKind::NotFound {
                DebuggerError::ThreadNotFound(tid)
            } else {
                DebuggerError::Native {
                    operation: "read task stat",
                    source,
                }
            }
        })?;
        Ok(matches!(task_state(&stat), Some('t' | 'T')))
    }

    fn read_memory(&self, tid: ThreadId, address: Address, len: usize) -> Result<Vec<u8>>
    {
        if len == 0 {
            return Ok(Vec::new());
        }
        let (aligned, end) = word_span(address, len)?;
        let mut bytes = Vec::with_capacity(len + 2 * WORD);
        for cursor in (aligned..end).step_by(WORD) {
            bytes.extend_from_slice(&Self::peek(tid, cursor)?.to_ne_bytes());
        }
        let offset = (address.value() - aligned) as usize;
        Ok(bytes[offset..offset + len].to_vec())
    }

    fn write_memory(&mut self, tid: ThreadId, address: Address, data: &[u8]) -> Result<()>
    {
        if data.is_empty() {
            return Ok(());
        }
        let start = address.value();
        let (aligned, end) = word_span(address, data.len())?;
        for cursor in (aligned..end).step_by(WORD) {
            let mut word = Self::peek(tid, cursor)?.to_ne_bytes();
            for (i, byte) in word.iter_mut().enumerate() {
                let at = cursor + i as u64;
                if at >= start && at < end {
                    *byte = data[(at - start) as usize];
                }
            }
            Self::poke(tid, cursor, libc::c_long::from_ne_bytes(word))?;
        }
        Ok(())
    }

    fn kill(&mut self, pid: ProcessId) -> Result<()>
    {
        let result = unsafe { libc::kill(pid.0 as pid_t, libc::SIGKILL) };
        check(libc::c_long::from(result), "kill").map(|_| ())
    }

    fn executable_path(&self, pid: ProcessId) -> Result<PathBuf>
    {
        fs::read_link(format!("/proc/{pid}/exe")).map_err(|source| DebuggerError::Native {
            operation: "readlink /proc/<pid>/exe",
            source,
        })
    }

    fn manual_stop(&self, pid: ProcessId) -> StopHandle
    {
        StopHandle::new(Arc::new(SigStop { pid }))
    }
}

/// Manual stop through `kill(pid, SIGSTOP)`, which any thread may send
struct SigStop
{
    pid: ProcessId,
}

impl ManualStop for SigStop
{
    fn request_stop(&self) -> Result<()>
    {
        let result = unsafe { libc::kill(self.pid.0 as pid_t, libc::SIGSTOP) };
        check(libc::c_long::from(result), "kill(SIGSTOP)").map(|_| ())
    }
}

/// State letter of a `/proc/<pid>/task/<tid>/stat` line
///
/// The command name in parentheses may itself contain spaces or parentheses,
/// so the state is located after the last `)`.
fn task_state(stat: &str) -> Option<char>
{
    let rest = &stat[stat.rfind(')')? + 1..];
    rest.split_whitespace().next()?.chars().next()
}

#[cfg(target_arch = "x86_64")]
mod regs
{
    use crate::types::{Address, Architecture, Registers, X86_64Register as R};

    pub(super) fn from_raw(raw: &libc::user_regs_struct) -> Registers
    {
        let mut registers = Registers::for_arch(Architecture::X86_64);
        registers.pc = Address::from(raw.rip);
        registers.sp = Address::from(raw.rsp);
        registers.fp = Address::from(raw.rbp);
        registers.status = raw.eflags;
        let slots = [
            (R::Rax, raw.rax),
            (R::Rbx, raw.rbx),
            (R::Rcx, raw.rcx),
            (R::Rdx, raw.rdx),
            (R::Rsi, raw.rsi),
            (R::Rdi, raw.rdi),
            (R::R8, raw.r8),
            (R::R9, raw.r9),
            (R::R10, raw.r10),
            (R::R11, raw.r11),
            (R::R12, raw.r12),
            (R::R13, raw.r13),
            (R::R14, raw.r14),
            (R::R15, raw.r15),
            (R::OrigRax, raw.orig_rax),
            (R::Cs, raw.cs),
            (R::Ss, raw.ss),
            (R::Ds, raw.ds),
            (R::Es, raw.es),
            (R::Fs, raw.fs),
            (R::Gs, raw.gs),
            (R::FsBase, raw.fs_base),
            (R::GsBase, raw.gs_base),
        ];
        for (reg, value) in slots {
            registers.general[reg.index()] = value;
        }
        registers
    }

    pub(super) fn apply(registers: &Registers, raw: &mut libc::user_regs_struct)
    {
        let slot = |reg: R| registers.general.get(reg.index()).copied();
        let targets: [(R, &mut u64); 23] = [
            (R::Rax, &mut raw.rax),
            (R::Rbx, &mut raw.rbx),
            (R::Rcx, &mut raw.rcx),
            (R::Rdx, &mut raw.rdx),
            (R::Rsi, &mut raw.rsi),
            (R::Rdi, &mut raw.rdi),
            (R::R8, &mut raw.r8),
            (R::R9, &mut raw.r9),
            (R::R10, &mut raw.r10),
            (R::R11, &mut raw.r11),
            (R::R12, &mut raw.r12),
            (R::R13, &mut raw.r13),
            (R::R14, &mut raw.r14),
            (R::R15, &mut raw.r15),
            (R::OrigRax, &mut raw.orig_rax),
            (R::Cs, &mut raw.cs),
            (R::Ss, &mut raw.ss),
            (R::Ds, &mut raw.ds),
            (R::Es, &mut raw.es),
            (R::Fs, &mut raw.fs),
            (R::Gs, &mut raw.gs),
            (R::FsBase, &mut raw.fs_base),
            (R::GsBase, &mut raw.gs_base),
        ];
        for (reg, target) in targets {
            if let Some(value) = slot(reg) {
                *target = value;
            }
        }
        raw.rip = registers.pc.value();
        raw.rsp = registers.sp.value();
        raw.rbp = registers.fp.value();
        raw.eflags = registers.status;
    }
}

#[cfg(target_arch = "aarch64")]
mod regs
{
    use crate::types::{Address, Architecture, Registers};

    const FP: usize = 29;

    pub(super) fn from_raw(raw: &libc::user_regs_struct) -> Registers
    {
        let mut registers = Registers::for_arch(Architecture::Arm64);
        registers.general.copy_from_slice(&raw.regs);
        registers.pc = Address::from(raw.pc);
        registers.sp = Address::from(raw.sp);
        registers.fp = Address::from(raw.regs[FP]);
        registers.status = raw.pstate;
        registers
    }

    pub(super) fn apply(registers: &Registers, raw: &mut libc::user_regs_struct)
    {
        for (target, value) in raw.regs.iter_mut().zip(&registers.general) {
            *target = *value;
        }
        raw.regs[FP] = registers.fp.value();
        raw.pc = registers.pc.value();
        raw.sp = registers.sp.value();
        raw.pstate = registers.status;
    }
}

/// Word-aligned start and exclusive end of `len` bytes at `address`
fn word_span(address: Address, len: usize) -> Result<(u64, u64)>
{
    let start = address.value();
    let end = u64::try_from(len)
        .ok()
        .and_then(|len| start.checked_add(len))
        .ok_or_else(|| DebuggerError::InvalidArgument(format!("{len} bytes at {address} overflow the address space")))?;
    Ok((start - start % WORD as u64, end))
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn task_state_skips_tricky_command_names()
    {
        assert_eq!(task_state("1234 (sleep) S 1 1234"), Some('S'));
        assert_eq!(task_state("77 (a) b) (c) t 1 77"), Some('t'));
        assert_eq!(task_state("88 (my prog) T 1"), Some('T'));
        assert_eq!(task_state("garbage"), None);
    }

    #[test]
    fn word_span_rounds_down_to_a_word()
    {
        let word = WORD as u64;
        assert_eq!(word_span(Address::from(word + 3), 2).unwrap(), (word, word + 5));
        assert_eq!(word_span(Address::from(u64::MAX - 4), 4).unwrap().1, u64::MAX);
    }

    #[test]
    fn accesses_past_the_end_of_the_address_space_are_rejected()
    {
        assert!(matches!(
            word_span(Address::from(u64::MAX - 2), 8),
            Err(DebuggerError::InvalidArgument(_))
        ));
        // rejected before any ptrace call is made
        let mut tracer = LinuxTracer::new(ProcessId(1));
        let at = Address::from(u64::MAX - 2);
        assert!(matches!(
            tracer.read_memory(ThreadId(1), at, 8),
            Err(DebuggerError::InvalidArgument(_))
        ));
        assert!(matches!(
            tracer.write_memory(ThreadId(1), at, &[0; 8]),
            Err(DebuggerError::InvalidArgument(_))
        ));
    }

    #[test]
    fn register_mapping_survives_a_round_trip()
    {
        let mut raw: libc::user_regs_struct = unsafe { mem::zeroed() };
        let registers = {
            let mut registers = regs::from_raw(&raw);
            registers.pc = Address::from(0x40_1000);
            registers.sp = Address::from(0x7fff_0000);
            registers.fp = Address::from(0x7fff_0040);
            registers.status = 0x246;
            for (i, slot) in registers.general.iter_mut().enumerate() {
                *slot = i as u64 + 1;
            }
            registers
        };
        regs::apply(&registers, &mut raw);
        let back = regs::from_raw(&raw);
        assert_eq!(back.pc, registers.pc);
        assert_eq!(back.sp, registers.sp);
        assert_eq!(back.status, registers.status);
        assert_eq!(back.fp, registers.fp);
    }
}
