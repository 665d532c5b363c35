//! Resolution of `argv[0]` to an executable file before anything is spawned.

use std::env;
use std::ffi::OsString;
use std::path::{Path, PathBuf};

use crate::error::{DebuggerError, Result};

/// Resolve the program named by `argv[0]`
///
/// - absolute paths are used as-is
/// - relative paths with a directory component are joined to the current directory
/// - bare names are searched in `PATH`, then in the current directory; on
///   Windows a name without an extension also matches `<name>.exe`
///
/// ## Errors
///
/// `PathResolution` if `argv` is empty, or no existing file matches.
pub fn resolve_program<S: AsRef<str>>(argv: &[S]) -> Result<PathBuf>
{
    let program = argv.first().map(AsRef::as_ref).ok_or_else(|| DebuggerError::PathResolution {
        path: String::new(),
        reason: "empty argument vector".to_string(),
    })?;
    let cwd = env::current_dir().map_err(|err| DebuggerError::PathResolution {
        path: program.to_string(),
        reason: format!("cannot read current directory: {err}"),
    })?;
    resolve_in(program, env::var_os("PATH"), &cwd)
}

pub(crate) fn resolve_in(program: &str, path_var: Option<OsString>, cwd: &Path) -> Result<PathBuf>
{
    let failure = |reason: &str| DebuggerError::PathResolution {
        path: program.to_string(),
        reason: reason.to_string(),
    };

    if program.is_empty() {
        return Err(failure("empty program name"));
    }

    let as_path = Path::new(program);
    if is_bare_name(program) {
        let search = path_var
            .iter()
            .flat_map(env::split_paths)
            .chain(std::iter::once(cwd.to_path_buf()));
        for dir in search {
            if let Some(found) = candidates(&dir.join(as_path)).into_iter().find(|c| c.is_file()) {
                return Ok(found);
            }
        }
        return Err(failure("not found in PATH"));
    }

    let absolute = if as_path.is_absolute() { as_path.to_path_buf() } else { cwd.join(as_path) };
    candidates(&absolute)
        .into_iter()
        .find(|c| c.is_file())
        .ok_or_else(|| failure("no such file"))
}

fn is_bare_name(program: &str) -> bool
{
    !program.contains('/') && !(cfg!(windows) && (program.contains('\\') || program.contains(':')))
}

fn candidates(path: &Path) -> Vec<PathBuf>
{
    let mut out = vec![path.to_path_buf()];
    if cfg!(windows) && path.extension().is_none() {
        out.push(path.with_extension("exe"));
    }
    out
}
