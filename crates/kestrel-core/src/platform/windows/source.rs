//! # Win32 debug event source
//!
//! [`Win32Source`] implements the push pump's [`DebugEventSource`] over
//! kernel32. `WaitForDebugEvent` and `ContinueDebugEvent` only work on the
//! thread that created the debuggee, so a source must stay on the debug worker.

use std::ffi::c_void;
use std::io;
use std::mem;
use std::sync::Arc;
use std::time::Duration;

use tracing::trace;
use windows_sys::Win32::Foundation::{CloseHandle, BOOL, DBG_CONTINUE, ERROR_SEM_TIMEOUT, HANDLE};
use windows_sys::Win32::System::Diagnostics::Debug::{
    ContinueDebugEvent, DebugBreakProcess, FlushInstructionCache, ReadProcessMemory, WaitForDebugEvent,
    WriteProcessMemory, DEBUG_EVENT,
};
use windows_sys::Win32::System::Threading::{TerminateProcess, INFINITE};

use super::decode::decode;
use crate::backend::{ManualStop, StopHandle};
use crate::error::{DebuggerError, Result};
use crate::pump::push::{DebugEventSource, EventRecord, NativeHandle};
use crate::types::{Address, Registers};

fn check(ok: BOOL, operation: &'static str) -> Result<()>
{
    if ok == 0 {
        Err(DebuggerError::last_os_error(operation))
    } else {
        Ok(())
    }
}

fn millis(timeout: Option<Duration>) -> u32
{
    match timeout {
        None => INFINITE,
        // INFINITE itself is reserved, so clamp just below it
        Some(limit) => u32::try_from(limit.as_millis()).unwrap_or(INFINITE - 1).min(INFINITE - 1),
    }
}

fn raw(handle: NativeHandle) -> HANDLE
{
    handle.0 as HANDLE
}

/// kernel32-backed [`DebugEventSource`]
#[derive(Debug, Default)]
pub struct Win32Source;

impl Win32Source
{
    /// Source for the debuggee created on the calling thread
    pub fn new() -> Self
    {
        Self
    }
}

impl DebugEventSource for Win32Source
{
    fn wait_for_event(&mut self, timeout: Option<Duration>) -> Result<Option<EventRecord>>
    {
        let mut event: DEBUG_EVENT = unsafe { mem::zeroed() };
        let ok = unsafe { WaitForDebugEvent(&mut event, millis(timeout)) };
        if ok == 0 {
            let err = io::Error::last_os_error();
            if err.raw_os_error() == Some(ERROR_SEM_TIMEOUT as i32) {
                return Ok(None);
            }
            return Err(DebuggerError::Native {
                operation: "WaitForDebugEvent",
                source: err,
            });
        }
        let record = decode(&event);
        trace!(code = event.dwDebugEventCode, pid = record.pid, tid = record.tid, "Debug event");
        Ok(Some(record))
    }

    fn continue_event(&mut self, pid: u32, tid: u32) -> Result<()>
    {
        check(unsafe { ContinueDebugEvent(pid, tid, DBG_CONTINUE) }, "ContinueDebugEvent")
    }

    fn close_handle(&mut self, handle: NativeHandle) -> Result<()>
    {
        check(unsafe { CloseHandle(raw(handle)) }, "CloseHandle")
    }

    fn debug_break(&mut self, process: NativeHandle) -> Result<()>
    {
        check(unsafe { DebugBreakProcess(raw(process)) }, "DebugBreakProcess")
    }

    fn get_context(&self, thread: NativeHandle) -> Result<Registers>
    {
        context::get(thread)
    }

    fn set_context(&mut self, thread: NativeHandle, registers: &Registers) -> Result<()>
    {
        context::set(thread, registers)
    }

    fn read_memory(&self, process: NativeHandle, address: Address, len: usize) -> Result<Vec<u8>>
    {
        let mut buffer = vec![0_u8; len];
        let mut read = 0_usize;
        check(
            unsafe {
                ReadProcessMemory(
                    raw(process),
                    address.value() as *const c_void,
                    buffer.as_mut_ptr().cast::<c_void>(),
                    len,
                    &mut read,
                )
            },
            "ReadProcessMemory",
        )?;
        buffer.truncate(read);
        Ok(buffer)
    }

    fn write_memory(&mut self, process: NativeHandle, address: Address, data: &[u8]) -> Result<()>
    {
        let mut written = 0_usize;
        check(
            unsafe {
                WriteProcessMemory(
                    raw(process),
                    address.value() as *const c_void,
                    data.as_ptr().cast::<c_void>(),
                    data.len(),
                    &mut written,
                )
            },
            "WriteProcessMemory",
        )?;
        check(
            unsafe { FlushInstructionCache(raw(process), address.value() as *const c_void, data.len()) },
            "FlushInstructionCache",
        )
    }

    fn terminate(&mut self, process: NativeHandle, exit_code: u32) -> Result<()>
    {
        check(unsafe { TerminateProcess(raw(process), exit_code) }, "TerminateProcess")
    }

    fn manual_stop(&self, process: NativeHandle) -> StopHandle
    {
        StopHandle::new(Arc::new(BreakIn { process }))
    }
}

/// Manual stop through `DebugBreakProcess`, which any thread may call
struct BreakIn
{
    process: NativeHandle,
}

impl ManualStop for BreakIn
{
    fn request_stop(&self) -> Result<()>
    {
        check(unsafe { DebugBreakProcess(raw(self.process)) }, "DebugBreakProcess")
    }
}

#[cfg(target_arch = "x86_64")]
mod context
{
    use windows_sys::Win32::System::Diagnostics::Debug::{
        GetThreadContext, SetThreadContext, CONTEXT, CONTEXT_CONTROL_AMD64, CONTEXT_INTEGER_AMD64,
        CONTEXT_SEGMENTS_AMD64,
    };

    use super::*;
    use crate::types::{Architecture, X86_64Register as R};

    const CONTEXT_REGISTERS: u32 = CONTEXT_CONTROL_AMD64 | CONTEXT_INTEGER_AMD64 | CONTEXT_SEGMENTS_AMD64;

    fn fetch(thread: NativeHandle) -> Result<CONTEXT>
    {
        let mut context: CONTEXT = unsafe { mem::zeroed() };
        context.ContextFlags = CONTEXT_REGISTERS;
        check(unsafe { GetThreadContext(raw(thread), &mut context) }, "GetThreadContext")?;
        Ok(context)
    }

    pub(super) fn get(thread: NativeHandle) -> Result<Registers>
    {
        let context = fetch(thread)?;
        let mut registers = Registers::for_arch(Architecture::X86_64);
        registers.pc = Address::from(context.Rip);
        registers.sp = Address::from(context.Rsp);
        registers.fp = Address::from(context.Rbp);
        registers.status = u64::from(context.EFlags);
        let slots = [
            (R::Rax, context.Rax),
            (R::Rbx, context.Rbx),
            (R::Rcx, context.Rcx),
            (R::Rdx, context.Rdx),
            (R::Rsi, context.Rsi),
            (R::Rdi, context.Rdi),
            (R::R8, context.R8),
            (R::R9, context.R9),
            (R::R10, context.R10),
            (R::R11, context.R11),
            (R::R12, context.R12),
            (R::R13, context.R13),
            (R::R14, context.R14),
            (R::R15, context.R15),
            (R::Cs, u64::from(context.SegCs)),
            (R::Ss, u64::from(context.SegSs)),
            (R::Ds, u64::from(context.SegDs)),
            (R::Es, u64::from(context.SegEs)),
            (R::Fs, u64::from(context.SegFs)),
            (R::Gs, u64::from(context.SegGs)),
        ];
        for (reg, value) in slots {
            registers.general[reg.index()] = value;
        }
        Ok(registers)
    }

    pub(super) fn set(thread: NativeHandle, registers: &Registers) -> Result<()>
    {
        let mut context = fetch(thread)?;
        let slot = |reg: R| registers.general.get(reg.index()).copied().unwrap_or_default();
        context.Rax = slot(R::Rax);
        context.Rbx = slot(R::Rbx);
        context.Rcx = slot(R::Rcx);
        context.Rdx = slot(R::Rdx);
        context.Rsi = slot(R::Rsi);
        context.Rdi = slot(R::Rdi);
        context.R8 = slot(R::R8);
        context.R9 = slot(R::R9);
        context.R10 = slot(R::R10);
        context.R11 = slot(R::R11);
        context.R12 = slot(R::R12);
        context.R13 = slot(R::R13);
        context.R14 = slot(R::R14);
        context.R15 = slot(R::R15);
        context.Rip = registers.pc.value();
        context.Rsp = registers.sp.value();
        context.Rbp = registers.fp.value();
        context.EFlags = registers.status as u32;
        context.ContextFlags = CONTEXT_REGISTERS;
        check(unsafe { SetThreadContext(raw(thread), &context) }, "SetThreadContext")
    }
}

#[cfg(not(target_arch = "x86_64"))]
mod context
{
    use super::*;

    pub(super) fn get(_thread: NativeHandle) -> Result<Registers>
    {
        Err(DebuggerError::NotImplemented("thread context on this architecture"))
    }

    pub(super) fn set(_thread: NativeHandle, _registers: &Registers) -> Result<()>
    {
        Err(DebuggerError::NotImplemented("thread context on this architecture"))
    }
}
