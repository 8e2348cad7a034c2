// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// POSIX backing store (a regular file mapped MAP_SHARED) and in-place
// construction of process-shared, robust, priority-inheriting pthread objects.

use std::ffi::CString;
use std::io;
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};
use std::ptr;

use crate::error::{Result, SyncError};

// ---------------------------------------------------------------------------
// Robust / PI mutex symbols, not exposed by the `libc` crate on all targets.
// macOS has no robust mutexes at all; creation fails there with ENOTSUP.
// ---------------------------------------------------------------------------

#[cfg(not(target_os = "macos"))]
extern "C" {
    fn pthread_mutexattr_setrobust(
        attr: *mut libc::pthread_mutexattr_t,
        robustness: libc::c_int,
    ) -> libc::c_int;
    fn pthread_mutex_consistent(mutex: *mut libc::pthread_mutex_t) -> libc::c_int;
}

extern "C" {
    fn pthread_mutexattr_setprotocol(
        attr: *mut libc::pthread_mutexattr_t,
        protocol: libc::c_int,
    ) -> libc::c_int;
}

#[cfg(not(target_os = "macos"))]
const PTHREAD_MUTEX_ROBUST: libc::c_int = 1;

const PTHREAD_PRIO_NONE: libc::c_int = 0;
const PTHREAD_PRIO_INHERIT: libc::c_int = 1;

/// Permissions for a freshly created backing file (before umask).
const STORE_PERMS: libc::mode_t = 0o666;

fn c_path(path: &Path) -> Result<CString> {
    CString::new(path.as_os_str().as_bytes()).map_err(|e| {
        SyncError::storage("open", path, io::Error::new(io::ErrorKind::InvalidInput, e))
    })
}

// ---------------------------------------------------------------------------
// PlatformShm: file-backed MAP_SHARED region
// ---------------------------------------------------------------------------

pub struct PlatformShm {
    mem: *mut u8,
    size: usize,
    path: PathBuf,
    created: bool, // true when the file was empty and we sized it
}

// Safety: the mapping is process-shared by design; all access to its contents
// goes through process-shared pthread objects.
unsafe impl Send for PlatformShm {}
unsafe impl Sync for PlatformShm {}

impl PlatformShm {
    /// Open (creating if absent) `path`, size it to exactly `size` bytes if it
    /// is empty, and map it read/write.
    ///
    /// A non-empty file whose length differs from `size` is rejected: mapping
    /// it would either truncate the layout or expose a foreign one.
    pub fn acquire(path: &Path, size: usize) -> Result<Self> {
        if size == 0 {
            return Err(SyncError::storage(
                "ftruncate",
                path,
                io::Error::new(io::ErrorKind::InvalidInput, "size is 0"),
            ));
        }
        let c_name = c_path(path)?;

        let fd = unsafe {
            libc::open(
                c_name.as_ptr(),
                libc::O_CREAT | libc::O_RDWR | libc::O_CLOEXEC,
                STORE_PERMS as libc::c_uint,
            )
        };
        if fd < 0 {
            return Err(SyncError::storage("open", path, io::Error::last_os_error()));
        }

        let mut st: libc::stat = unsafe { std::mem::zeroed() };
        if unsafe { libc::fstat(fd, &mut st) } != 0 {
            let err = io::Error::last_os_error();
            unsafe { libc::close(fd) };
            return Err(SyncError::storage("fstat", path, err));
        }

        let created = st.st_size == 0;
        if created {
            // Undo the umask so peers running as other users can attach.
            if unsafe { libc::fchmod(fd, STORE_PERMS) } != 0 {
                let err = io::Error::last_os_error();
                tracing::warn!(path = %path.display(), "fchmod({STORE_PERMS:o}) failed: {err}");
            }
            if unsafe { libc::ftruncate(fd, size as libc::off_t) } != 0 {
                let err = io::Error::last_os_error();
                unsafe { libc::close(fd) };
                return Err(SyncError::storage("ftruncate", path, err));
            }
        } else if st.st_size as u64 != size as u64 {
            unsafe { libc::close(fd) };
            return Err(SyncError::storage(
                "fstat",
                path,
                io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("store is {} bytes, layout needs {size}", st.st_size),
                ),
            ));
        }

        let mem = unsafe {
            libc::mmap(
                ptr::null_mut(),
                size,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                fd,
                0,
            )
        };
        unsafe { libc::close(fd) };

        if mem == libc::MAP_FAILED {
            return Err(SyncError::Mapping {
                path: path.to_path_buf(),
                source: io::Error::last_os_error(),
            });
        }

        Ok(Self {
            mem: mem as *mut u8,
            size,
            path: path.to_path_buf(),
            created,
        })
    }

    pub fn as_ptr(&self) -> *const u8 {
        self.mem
    }

    pub fn as_mut_ptr(&self) -> *mut u8 {
        self.mem
    }

    pub fn mapped_size(&self) -> usize {
        self.size
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether this mapping found the file empty and sized it.
    pub fn created(&self) -> bool {
        self.created
    }

    /// Remove the backing file. Existing mappings stay valid; a missing file
    /// is not an error.
    pub fn unlink(path: &Path) -> Result<()> {
        let c_name = c_path(path)?;
        if unsafe { libc::unlink(c_name.as_ptr()) } != 0 {
            let err = io::Error::last_os_error();
            if err.raw_os_error() != Some(libc::ENOENT) {
                return Err(SyncError::storage("unlink", path, err));
            }
        }
        Ok(())
    }
}

impl Drop for PlatformShm {
    fn drop(&mut self) {
        if self.mem.is_null() {
            return;
        }
        // Never pthread_*_destroy here: other processes may still be using
        // the objects, and a dead owner's mutex must stay detectable.
        unsafe { libc::munmap(self.mem as *mut libc::c_void, self.size) };
    }
}

// ---------------------------------------------------------------------------
// In-place construction of pthread objects
// ---------------------------------------------------------------------------

/// Initialise a process-shared, robust mutex at `mtx`, optionally with the
/// priority-inheritance protocol.
///
/// # Safety
/// `mtx` must point to writable memory large enough for a `pthread_mutex_t`
/// that no other thread or process is using yet.
pub(crate) unsafe fn init_robust_mutex(
    mtx: *mut libc::pthread_mutex_t,
    priority_inherit: bool,
) -> Result<()> {
    ptr::write_bytes(mtx, 0, 1);

    let mut attr: libc::pthread_mutexattr_t = std::mem::zeroed();
    let eno = libc::pthread_mutexattr_init(&mut attr);
    if eno != 0 {
        return Err(SyncError::from_pthread("pthread_mutexattr_init", eno));
    }

    let configured = configure_mutex_attr(&mut attr, priority_inherit);
    let result = configured.and_then(|()| {
        let eno = libc::pthread_mutex_init(mtx, &attr);
        if eno != 0 {
            return Err(SyncError::from_pthread("pthread_mutex_init", eno));
        }
        Ok(())
    });
    libc::pthread_mutexattr_destroy(&mut attr);
    result
}

unsafe fn configure_mutex_attr(
    attr: &mut libc::pthread_mutexattr_t,
    priority_inherit: bool,
) -> Result<()> {
    let eno = libc::pthread_mutexattr_setpshared(attr, libc::PTHREAD_PROCESS_SHARED);
    if eno != 0 {
        return Err(SyncError::from_pthread("pthread_mutexattr_setpshared", eno));
    }

    // Often one side runs real-time and the other does not.
    let protocol = if priority_inherit {
        PTHREAD_PRIO_INHERIT
    } else {
        PTHREAD_PRIO_NONE
    };
    let eno = pthread_mutexattr_setprotocol(attr, protocol);
    if eno != 0 {
        return Err(SyncError::from_pthread("pthread_mutexattr_setprotocol", eno));
    }

    #[cfg(not(target_os = "macos"))]
    {
        let eno = pthread_mutexattr_setrobust(attr, PTHREAD_MUTEX_ROBUST);
        if eno != 0 {
            return Err(SyncError::from_pthread("pthread_mutexattr_setrobust", eno));
        }
        Ok(())
    }
    #[cfg(target_os = "macos")]
    {
        Err(SyncError::from_pthread("pthread_mutexattr_setrobust", libc::ENOTSUP))
    }
}

/// Initialise a process-shared condition variable at `cond`.
///
/// # Safety
/// Same contract as [`init_robust_mutex`].
pub(crate) unsafe fn init_shared_cond(cond: *mut libc::pthread_cond_t) -> Result<()> {
    ptr::write_bytes(cond, 0, 1);

    let mut attr: libc::pthread_condattr_t = std::mem::zeroed();
    let mut eno = libc::pthread_condattr_init(&mut attr);
    if eno != 0 {
        return Err(SyncError::from_pthread("pthread_condattr_init", eno));
    }

    eno = libc::pthread_condattr_setpshared(&mut attr, libc::PTHREAD_PROCESS_SHARED);
    if eno != 0 {
        libc::pthread_condattr_destroy(&mut attr);
        return Err(SyncError::from_pthread("pthread_condattr_setpshared", eno));
    }

    eno = libc::pthread_cond_init(cond, &attr);
    libc::pthread_condattr_destroy(&mut attr);
    if eno != 0 {
        return Err(SyncError::from_pthread("pthread_cond_init", eno));
    }
    Ok(())
}

/// `pthread_mutex_consistent`, returning the raw error number.
///
/// # Safety
/// `mtx` must point to an initialised mutex.
pub(crate) unsafe fn mutex_consistent(mtx: *mut libc::pthread_mutex_t) -> libc::c_int {
    #[cfg(not(target_os = "macos"))]
    {
        pthread_mutex_consistent(mtx)
    }
    #[cfg(target_os = "macos")]
    {
        let _ = mtx;
        libc::EINVAL
    }
}
