//! Decoding of `DEBUG_EVENT` into [`DebugEvent`].
//!
//! ## References
//!
//! - [DEBUG_EVENT](https://learn.microsoft.com/en-us/windows/win32/api/minwinbase/ns-minwinbase-debug_event)

use windows_sys::Win32::Foundation::HANDLE;
use windows_sys::Win32::System::Diagnostics::Debug::{
    CREATE_PROCESS_DEBUG_EVENT, CREATE_THREAD_DEBUG_EVENT, DEBUG_EVENT, EXCEPTION_DEBUG_EVENT,
    EXIT_PROCESS_DEBUG_EVENT, EXIT_THREAD_DEBUG_EVENT, LOAD_DLL_DEBUG_EVENT, OUTPUT_DEBUG_STRING_EVENT, RIP_EVENT,
    UNLOAD_DLL_DEBUG_EVENT,
};

use crate::pump::push::{DebugEvent, EventRecord, NativeHandle};
use crate::types::Address;

fn handle(raw: HANDLE) -> NativeHandle
{
    NativeHandle(raw as isize)
}

fn address<T>(raw: *mut T) -> Address
{
    Address::from(raw as usize as u64)
}

/// Decode a filled-in event; unknown codes become [`DebugEvent::Unknown`]
pub fn decode(raw: &DEBUG_EVENT) -> EventRecord
{
    // each arm reads the union member selected by the event code
    let event = unsafe {
        match raw.dwDebugEventCode {
            EXCEPTION_DEBUG_EVENT => {
                let info = &raw.u.Exception;
                DebugEvent::Exception {
                    code: info.ExceptionRecord.ExceptionCode as u32,
                    address: address(info.ExceptionRecord.ExceptionAddress),
                    first_chance: info.dwFirstChance != 0,
                }
            }
            CREATE_THREAD_DEBUG_EVENT => DebugEvent::ThreadCreated {
                thread: handle(raw.u.CreateThread.hThread),
            },
            CREATE_PROCESS_DEBUG_EVENT => {
                let info = &raw.u.CreateProcessInfo;
                DebugEvent::ProcessCreated {
                    process: handle(info.hProcess),
                    thread: handle(info.hThread),
                    file: handle(info.hFile),
                }
            }
            EXIT_THREAD_DEBUG_EVENT => DebugEvent::ThreadExited {
                exit_code: raw.u.ExitThread.dwExitCode,
            },
            EXIT_PROCESS_DEBUG_EVENT => DebugEvent::ProcessExited {
                exit_code: raw.u.ExitProcess.dwExitCode,
            },
            LOAD_DLL_DEBUG_EVENT => {
                let info = &raw.u.LoadDll;
                DebugEvent::DllLoaded {
                    file: handle(info.hFile),
                    base: address(info.lpBaseOfDll),
                }
            }
            UNLOAD_DLL_DEBUG_EVENT => DebugEvent::DllUnloaded {
                base: address(raw.u.UnloadDll.lpBaseOfDll),
            },
            OUTPUT_DEBUG_STRING_EVENT => {
                let info = &raw.u.DebugString;
                DebugEvent::OutputString {
                    address: address(info.lpDebugStringData),
                    length: info.nDebugStringLength,
                    unicode: info.fUnicode != 0,
                }
            }
            RIP_EVENT => DebugEvent::Rip {
                error: raw.u.RipInfo.dwError,
            },
            other => DebugEvent::Unknown(other),
        }
    };
    EventRecord {
        pid: raw.dwProcessId,
        tid: raw.dwThreadId,
        event,
    }
}
