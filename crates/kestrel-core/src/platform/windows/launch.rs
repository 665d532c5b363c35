//! # Windows launch
//!
//! `CreateProcessW` with `DEBUG_ONLY_THIS_PROCESS` makes the calling thread the
//! debugger of the new process, so this must run on the debug worker. The
//! child inherits duplicates of our stdio handles; the duplicates and the
//! process/thread handles `CreateProcessW` returns are closed once the spawn
//! completes (the debugger gets its own copies through the first debug event).

use std::ffi::OsStr;
use std::io;
use std::iter;
use std::mem;
use std::os::windows::ffi::OsStrExt;
use std::path::Path;
use std::ptr;

use tracing::info;
use windows_sys::Win32::Foundation::{DuplicateHandle, DUPLICATE_SAME_ACCESS, HANDLE, TRUE};
use windows_sys::Win32::System::Console::{
    GetStdHandle, STD_ERROR_HANDLE, STD_HANDLE, STD_INPUT_HANDLE, STD_OUTPUT_HANDLE,
};
use windows_sys::Win32::System::Threading::{
    CreateProcessW, GetCurrentProcess, DEBUG_ONLY_THIS_PROCESS, PROCESS_INFORMATION, STARTF_USESTDHANDLES,
    STARTUPINFOW,
};

use super::handle::OwnedHandle;
use super::source::Win32Source;
use crate::cmdline::make_command_line;
use crate::error::{DebuggerError, Result};
use crate::pump::push::PushBackend;
use crate::types::{Architecture, ProcessId};

fn wide(value: &OsStr) -> Vec<u16>
{
    value.encode_wide().chain(iter::once(0)).collect()
}

fn duplicate_stdio(which: STD_HANDLE, stream: &'static str) -> Result<OwnedHandle>
{
    let mut duplicate: HANDLE = ptr::null_mut();
    let ok = unsafe {
        let current = GetCurrentProcess();
        DuplicateHandle(
            current,
            GetStdHandle(which),
            current,
            &mut duplicate,
            0,
            TRUE,
            DUPLICATE_SAME_ACCESS,
        )
    };
    if ok == 0 {
        return Err(DebuggerError::HandleDuplication {
            stream,
            source: io::Error::last_os_error(),
        });
    }
    Ok(OwnedHandle::new(duplicate))
}

/// Create `path` as a debuggee with `argv` as its command line
///
/// ## Errors
///
/// - `HandleDuplication` if a stdio handle cannot be duplicated
/// - `SpawnFailure` if `CreateProcessW` fails
pub fn spawn<S: AsRef<str>>(path: &Path, argv: &[S]) -> Result<PushBackend<Win32Source>>
{
    let stdin = duplicate_stdio(STD_INPUT_HANDLE, "stdin")?;
    let stdout = duplicate_stdio(STD_OUTPUT_HANDLE, "stdout")?;
    let stderr = duplicate_stdio(STD_ERROR_HANDLE, "stderr")?;

    let application = wide(path.as_os_str());
    let mut command_line = wide(OsStr::new(&make_command_line(argv)));

    let mut startup: STARTUPINFOW = unsafe { mem::zeroed() };
    startup.cb = mem::size_of::<STARTUPINFOW>() as u32;
    startup.dwFlags = STARTF_USESTDHANDLES;
    startup.hStdInput = stdin.raw();
    startup.hStdOutput = stdout.raw();
    startup.hStdError = stderr.raw();

    let mut info: PROCESS_INFORMATION = unsafe { mem::zeroed() };
    let ok = unsafe {
        CreateProcessW(
            application.as_ptr(),
            command_line.as_mut_ptr(),
            ptr::null(),
            ptr::null(),
            TRUE,
            DEBUG_ONLY_THIS_PROCESS,
            ptr::null(),
            ptr::null(),
            &startup,
            &mut info,
        )
    };
    if ok == 0 {
        return Err(DebuggerError::SpawnFailure {
            program: path.display().to_string(),
            source: io::Error::last_os_error(),
        });
    }
    drop(OwnedHandle::new(info.hProcess));
    drop(OwnedHandle::new(info.hThread));

    let pid = ProcessId(info.dwProcessId);
    info!(%pid, program = %path.display(), "Created debuggee");
    Ok(PushBackend::new(Win32Source::new(), pid, Architecture::current()))
}
