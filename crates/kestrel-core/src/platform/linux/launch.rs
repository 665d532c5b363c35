//! # Linux launch and attach
//!
//! Launch forks; the child asks to be traced (`PTRACE_TRACEME`) and execs the
//! program, which makes the kernel stop it with `SIGTRAP` right after the
//! exec. That stop is the first trap the pull pump reports.
//!
//! Attach traces every task listed in `/proc/<pid>/task`, repeating the scan
//! until no new tasks show up (threads may be created while we attach).
//!
//! Both must run on the debug worker: the thread that forks (or attaches)
//! becomes the tracer, and only the tracer may issue ptrace requests.

use std::collections::BTreeSet;
use std::ffi::CString;
use std::fs;
use std::io;
use std::os::unix::ffi::OsStrExt;
use std::path::Path;
use std::ptr;

use libc::c_char;
use tracing::{debug, info};

use super::ptrace::LinuxTracer;
use crate::error::{DebuggerError, Result};
use crate::pump::pull::{PullBackend, Reaped, Tracer, WaitStatus, WaitTarget};
use crate::thread::ThreadTable;
use crate::types::{MemoryTarget, ProcessId, ThreadId};

/// Exit status of a child that could not be traced or whose `execv` failed
const EXEC_FAILED: i32 = 127;

fn c_string(program: &str, value: &[u8]) -> Result<CString>
{
    CString::new(value).map_err(|_| DebuggerError::SpawnFailure {
        program: program.to_string(),
        source: io::Error::new(io::ErrorKind::InvalidInput, "argument contains a NUL byte"),
    })
}

/// Fork and exec `path` with `argv` under ptrace
///
/// Returns as soon as the child exists; the caller's first trap wait observes
/// the post-exec `SIGTRAP` (or the child's exit if `execv` failed).
///
/// ## Errors
///
/// `SpawnFailure` if an argument contains a NUL byte or `fork` fails.
pub fn spawn<S: AsRef<str>>(path: &Path, argv: &[S]) -> Result<PullBackend<LinuxTracer>>
{
    let shown = path.display().to_string();
    let program = c_string(&shown, path.as_os_str().as_bytes())?;
    let args = argv
        .iter()
        .map(|arg| c_string(&shown, arg.as_ref().as_bytes()))
        .collect::<Result<Vec<_>>>()?;
    let mut arg_ptrs: Vec<*const c_char> = args.iter().map(|arg| arg.as_ptr()).collect();
    arg_ptrs.push(ptr::null());

    // everything the child touches is allocated before the fork
    let pid = unsafe { libc::fork() };
    if pid == -1 {
        return Err(DebuggerError::SpawnFailure {
            program: shown,
            source: io::Error::last_os_error(),
        });
    }
    if pid == 0 {
        unsafe {
            let traced = libc::ptrace(
                libc::PTRACE_TRACEME,
                0,
                ptr::null_mut::<libc::c_void>(),
                ptr::null_mut::<libc::c_void>(),
            );
            // never run the program untraced
            if traced == 0 {
                libc::execv(program.as_ptr(), arg_ptrs.as_ptr());
            }
            libc::_exit(EXEC_FAILED);
        }
    }

    let pid = ProcessId(pid as u32);
    info!(%pid, program = %shown, "Spawned traced child");
    Ok(PullBackend::new(LinuxTracer::new(pid), pid))
}

fn list_tasks(pid: ProcessId) -> Result<BTreeSet<ThreadId>>
{
    let entries = fs::read_dir(format!("/proc/{pid}/task")).map_err(|source| {
        if source.kind() == io::ErrorKind::NotFound {
            DebuggerError::ProcessNotFound(pid.0)
        } else {
            DebuggerError::Native {
                operation: "list /proc/<pid>/task",
                source,
            }
        }
    })?;
    let mut tasks = BTreeSet::new();
    for entry in entries {
        if let Some(tid) = entry?.file_name().to_str().and_then(|name| name.parse::<u64>().ok()) {
            tasks.insert(ThreadId(tid));
        }
    }
    Ok(tasks)
}

/// Attach to every thread of a running process
///
/// Each task is attached and waited for until it reports its attach stop; the
/// leader is registered first and becomes the current thread.
///
/// ## Errors
///
/// - `ProcessNotFound` if `/proc/<pid>` does not exist
/// - `Native` if `PTRACE_ATTACH` is refused (permissions, Yama `ptrace_scope`)
pub fn attach(pid: ProcessId) -> Result<(PullBackend<LinuxTracer>, ThreadTable<()>)>
{
    if !Path::new(&format!("/proc/{pid}")).exists() {
        return Err(DebuggerError::ProcessNotFound(pid.0));
    }

    let mut tracer = LinuxTracer::new(pid);
    let mut threads = ThreadTable::new();
    let leader = ThreadId(u64::from(pid.0));
    let mut seen = BTreeSet::new();

    loop {
        let mut fresh: Vec<ThreadId> = list_tasks(pid)?
            .into_iter()
            .filter(|tid| seen.insert(*tid))
            .collect();
        if fresh.is_empty() {
            break;
        }
        fresh.sort_by_key(|tid| *tid != leader);

        for tid in fresh {
            if let Err(err) = tracer.attach_task(tid) {
                if tid == leader {
                    return Err(err);
                }
                // the thread exited between listing and attaching
                debug!(thread = %tid, error = %err, "Skipping task");
                continue;
            }
            match tracer.wait(WaitTarget::Thread(tid), false)? {
                Reaped::Status(_, WaitStatus::Stopped { .. }) => {
                    threads.register(tid, MemoryTarget::Task(tid), ());
                }
                Reaped::Status(_, status) => {
                    debug!(thread = %tid, ?status, "Task ended while attaching");
                }
                Reaped::NoChild | Reaped::NotReady => {}
            }
        }
    }

    if !threads.contains(leader) {
        return Err(DebuggerError::ProcessNotFound(pid.0));
    }
    for tid in threads.ids() {
        tracer.set_options(tid)?;
    }
    info!(%pid, threads = threads.len(), "Attached");
    Ok((PullBackend::new(tracer, pid), threads))
}
