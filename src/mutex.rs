// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Robust, process-shared mutex living in place inside shared memory.

use std::cell::UnsafeCell;

use crate::error::{Result, SyncError};
use crate::platform::posix;

/// Outcome of a successful acquisition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Acquired {
    /// Ordinary acquisition.
    Clean,
    /// The previous owner died while holding the mutex (`EOWNERDEAD`).
    ///
    /// The caller owns the mutex now but must repair whatever it protects and
    /// call [`RobustMutex::mark_consistent`] before unlocking, or the mutex
    /// becomes permanently unusable.
    Abandoned,
}

impl Acquired {
    pub fn is_abandoned(self) -> bool {
        self == Acquired::Abandoned
    }

    /// Map a pthread return value from a lock-like call.
    pub(crate) fn from_errno(op: &'static str, eno: libc::c_int) -> Result<Self> {
        match eno {
            0 => Ok(Acquired::Clean),
            libc::EOWNERDEAD => Ok(Acquired::Abandoned),
            _ => Err(SyncError::from_pthread(op, eno)),
        }
    }
}

/// A `pthread_mutex_t` configured `PTHREAD_PROCESS_SHARED`,
/// `PTHREAD_MUTEX_ROBUST` and (normally) `PTHREAD_PRIO_INHERIT`.
///
/// Instances are never created by value: they are constructed in place inside
/// a mapped region with [`RobustMutex::init_in_place`] and only ever handed
/// out by reference, because the kernel's robust list records their address.
///
/// Unlike a `std::sync::Mutex`, abandonment is never silently repaired here.
/// `lock`, `try_lock` and [`SharedCondition::wait`](crate::SharedCondition::wait)
/// report it and leave the repair to the caller.
#[repr(transparent)]
pub struct RobustMutex {
    raw: UnsafeCell<libc::pthread_mutex_t>,
}

// Safety: a process-shared pthread mutex is designed to be used concurrently
// from any thread of any process that maps it.
unsafe impl Send for RobustMutex {}
unsafe impl Sync for RobustMutex {}

impl RobustMutex {
    /// Construct the mutex at `this`.
    ///
    /// # Safety
    /// `this` must be valid for writes and must not be in use by any thread
    /// or process; the memory must stay at this address for the mutex's life.
    pub unsafe fn init_in_place(this: *mut Self, priority_inherit: bool) -> Result<()> {
        posix::init_robust_mutex(this as *mut libc::pthread_mutex_t, priority_inherit)
    }

    pub(crate) fn raw(&self) -> *mut libc::pthread_mutex_t {
        self.raw.get()
    }

    /// Block until the mutex is acquired.
    ///
    /// Fails with `NonRecoverableLock` if a previous owner observed
    /// abandonment and unlocked without repairing, and with `FatalSync` for
    /// any other primitive error.
    pub fn lock(&self) -> Result<Acquired> {
        let eno = unsafe { libc::pthread_mutex_lock(self.raw()) };
        Acquired::from_errno("pthread_mutex_lock", eno)
    }

    /// Acquire without blocking. `Ok(None)` if another owner holds it.
    pub fn try_lock(&self) -> Result<Option<Acquired>> {
        let eno = unsafe { libc::pthread_mutex_trylock(self.raw()) };
        if eno == libc::EBUSY {
            return Ok(None);
        }
        Acquired::from_errno("pthread_mutex_trylock", eno).map(Some)
    }

    pub fn unlock(&self) -> Result<()> {
        let eno = unsafe { libc::pthread_mutex_unlock(self.raw()) };
        if eno != 0 {
            return Err(SyncError::from_pthread("pthread_mutex_unlock", eno));
        }
        Ok(())
    }

    /// Declare the protected state repaired after an [`Acquired::Abandoned`].
    ///
    /// Calling it on a mutex that is already consistent is a no-op
    /// (`pthread_mutex_consistent` reports `EINVAL`, which is swallowed).
    pub fn mark_consistent(&self) -> Result<()> {
        let eno = unsafe { posix::mutex_consistent(self.raw()) };
        match eno {
            0 => Ok(()),
            libc::EINVAL => {
                tracing::trace!("mark_consistent on a consistent mutex");
                Ok(())
            }
            _ => Err(SyncError::from_pthread("pthread_mutex_consistent", eno)),
        }
    }
}
