// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Spawning, waiting for and killing the child processes that play a role
// against a shared store.

use std::ffi::CString;
use std::io;
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use crate::error::{Result, SyncError};

// ---------------------------------------------------------------------------
// ProcessHandle
// ---------------------------------------------------------------------------

/// Handle to a spawned child process.
#[derive(Debug, Clone)]
pub struct ProcessHandle {
    pub pid: u32,
    /// Logical name, for logging.
    pub name: String,
    pub executable: PathBuf,
}

impl ProcessHandle {
    /// `true` while the process exists (including as an unreaped zombie).
    pub fn is_alive(&self) -> bool {
        let ret = unsafe { libc::kill(self.pid as libc::pid_t, 0) };
        ret == 0 || io::Error::last_os_error().raw_os_error() != Some(libc::ESRCH)
    }
}

// ---------------------------------------------------------------------------
// WaitResult
// ---------------------------------------------------------------------------

/// Result of a [`wait_for_exit`] call.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct WaitResult {
    pub exited: bool,
    pub exit_code: i32,
    pub signaled: bool,
    pub signal: i32,
}

impl WaitResult {
    /// The process ran to completion with exit code 0.
    pub fn success(&self) -> bool {
        self.exited && self.exit_code == 0
    }

    /// The process has terminated, one way or the other.
    pub fn finished(&self) -> bool {
        self.exited || self.signaled
    }
}

// ---------------------------------------------------------------------------
// spawn
// ---------------------------------------------------------------------------

extern "C" {
    static mut environ: *mut *mut libc::c_char;
}

/// Path of the running executable, for re-spawning ourselves in another role.
pub fn current_exe() -> Result<PathBuf> {
    std::env::current_exe().map_err(|source| SyncError::Spawn {
        what: "current_exe",
        source,
    })
}

fn c_string(s: &[u8]) -> Result<CString> {
    CString::new(s).map_err(|e| SyncError::Spawn {
        what: "posix_spawn",
        source: io::Error::new(io::ErrorKind::InvalidInput, e),
    })
}

/// Spawn `executable` with `args`, inheriting the environment and stdio.
pub fn spawn(name: &str, executable: &Path, args: &[&str]) -> Result<ProcessHandle> {
    let exe = c_string(executable.as_os_str().as_bytes())?;
    let mut argv: Vec<CString> = Vec::with_capacity(args.len() + 1);
    argv.push(exe.clone());
    for a in args {
        argv.push(c_string(a.as_bytes())?);
    }

    let mut argv_ptrs: Vec<*mut libc::c_char> = argv
        .iter()
        .map(|s| s.as_ptr() as *mut libc::c_char)
        .collect();
    argv_ptrs.push(std::ptr::null_mut());

    let mut pid: libc::pid_t = -1;
    let err = unsafe {
        libc::posix_spawn(
            &mut pid,
            exe.as_ptr(),
            std::ptr::null(),
            std::ptr::null(),
            argv_ptrs.as_mut_ptr(),
            environ,
        )
    };
    if err != 0 {
        return Err(SyncError::Spawn {
            what: "posix_spawn",
            source: io::Error::from_raw_os_error(err),
        });
    }

    tracing::debug!(pid, name, exe = %executable.display(), "spawned");
    Ok(ProcessHandle {
        pid: pid as u32,
        name: name.to_owned(),
        executable: executable.to_path_buf(),
    })
}

// ---------------------------------------------------------------------------
// force_kill
// ---------------------------------------------------------------------------

/// Send SIGKILL: the process dies wherever it is, locks included.
pub fn force_kill(h: &ProcessHandle) -> Result<()> {
    if unsafe { libc::kill(h.pid as libc::pid_t, libc::SIGKILL) } != 0 {
        return Err(SyncError::Spawn {
            what: "kill",
            source: io::Error::last_os_error(),
        });
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// wait_for_exit
// ---------------------------------------------------------------------------

fn decode(status: libc::c_int) -> WaitResult {
    let mut r = WaitResult::default();
    if libc::WIFEXITED(status) {
        r.exited = true;
        r.exit_code = libc::WEXITSTATUS(status);
    }
    if libc::WIFSIGNALED(status) {
        r.signaled = true;
        r.signal = libc::WTERMSIG(status);
    }
    r
}

/// Wait for a child to terminate and reap it.
///
/// With `timeout = None` this blocks indefinitely. On timeout the returned
/// result has neither `exited` nor `signaled` set and the child is left
/// running.
pub fn wait_for_exit(h: &ProcessHandle, timeout: Option<Duration>) -> Result<WaitResult> {
    let pid = h.pid as libc::pid_t;
    let deadline = timeout.map(|t| Instant::now() + t);
    let flags = if deadline.is_some() { libc::WNOHANG } else { 0 };

    loop {
        let mut status: libc::c_int = 0;
        let ret = unsafe { libc::waitpid(pid, &mut status, flags) };
        if ret == pid {
            return Ok(decode(status));
        }
        if ret == -1 {
            let err = io::Error::last_os_error();
            if err.raw_os_error() == Some(libc::EINTR) {
                continue;
            }
            return Err(SyncError::Spawn {
                what: "waitpid",
                source: err,
            });
        }
        match deadline {
            Some(d) if Instant::now() >= d => return Ok(WaitResult::default()),
            _ => std::thread::sleep(Duration::from_millis(10)),
        }
    }
}
