// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Process-shared condition variable living in place inside shared memory,
// always paired with a RobustMutex.

use std::cell::UnsafeCell;

use crate::error::{Result, SyncError};
use crate::mutex::{Acquired, RobustMutex};
use crate::platform::posix;

/// A `pthread_cond_t` configured `PTHREAD_PROCESS_SHARED`.
///
/// Waits are unbounded. Every call must be made with the paired mutex held;
/// that is what rules out lost wakeups across processes.
#[repr(transparent)]
pub struct SharedCondition {
    raw: UnsafeCell<libc::pthread_cond_t>,
}

unsafe impl Send for SharedCondition {}
unsafe impl Sync for SharedCondition {}

impl SharedCondition {
    /// Construct the condition variable at `this`.
    ///
    /// # Safety
    /// Same contract as [`RobustMutex::init_in_place`].
    pub unsafe fn init_in_place(this: *mut Self) -> Result<()> {
        posix::init_shared_cond(this as *mut libc::pthread_cond_t)
    }

    fn raw(&self) -> *mut libc::pthread_cond_t {
        self.raw.get()
    }

    /// Atomically release `mtx`, block until signalled, then re-acquire it.
    ///
    /// The caller must hold `mtx`. Re-acquisition can find the mutex
    /// abandoned by a concurrent owner; that is reported as
    /// [`Acquired::Abandoned`] with the same repair duty as `lock`.
    /// Spurious wakeups return `Acquired::Clean`; re-check the predicate.
    pub fn wait(&self, mtx: &RobustMutex) -> Result<Acquired> {
        let eno = unsafe { libc::pthread_cond_wait(self.raw(), mtx.raw()) };
        Acquired::from_errno("pthread_cond_wait", eno)
    }

    /// Wake at least one waiter. Call with the paired mutex held.
    pub fn signal(&self) -> Result<()> {
        let eno = unsafe { libc::pthread_cond_signal(self.raw()) };
        if eno != 0 {
            return Err(SyncError::from_pthread("pthread_cond_signal", eno));
        }
        Ok(())
    }

    /// Wake every waiter. Call with the paired mutex held.
    pub fn broadcast(&self) -> Result<()> {
        let eno = unsafe { libc::pthread_cond_broadcast(self.raw()) };
        if eno != 0 {
            return Err(SyncError::from_pthread("pthread_cond_broadcast", eno));
        }
        Ok(())
    }
}
