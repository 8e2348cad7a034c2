// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// The shared synchronization block: two robust mutexes, one condition
// variable and the event counter, laid out in one file-backed mapping.
// The raw mapping never leaves this module; callers reach the counter only
// through guards that prove the primary mutex is held.

use std::cell::{RefCell, UnsafeCell};
use std::marker::PhantomData;
use std::mem::ManuallyDrop;
use std::path::Path;
use std::ptr::addr_of_mut;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::condition::SharedCondition;
use crate::error::{Result, SyncError};
use crate::mutex::{Acquired, RobustMutex};
use crate::shm::ShmHandle;

/// Fixed in-memory layout of the shared block.
#[repr(C)]
pub struct SyncBlock {
    mutex_a: RobustMutex,
    mutex_b: RobustMutex,
    cond: SharedCondition,
    event: UnsafeCell<u64>,
}

/// Exact size of the backing store.
pub const BLOCK_SIZE: usize = std::mem::size_of::<SyncBlock>();

/// Settings applied by the process that creates the block. Attaching
/// processes inherit whatever the creator chose.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockOptions {
    pub priority_inheritance: bool,
}

impl Default for BlockOptions {
    fn default() -> Self {
        Self {
            priority_inheritance: true,
        }
    }
}

impl SyncBlock {
    /// # Safety
    /// `this` must point to `BLOCK_SIZE` writable bytes nobody else uses yet.
    unsafe fn init_in_place(this: *mut Self, opts: BlockOptions) -> Result<()> {
        RobustMutex::init_in_place(addr_of_mut!((*this).mutex_a), opts.priority_inheritance)?;
        RobustMutex::init_in_place(addr_of_mut!((*this).mutex_b), opts.priority_inheritance)?;
        SharedCondition::init_in_place(addr_of_mut!((*this).cond))?;
        addr_of_mut!((*this).event).write(UnsafeCell::new(0));
        Ok(())
    }
}

/// Owned handle to a mapped [`SyncBlock`].
///
/// Creating the block is not serialised against concurrent first attaches;
/// the process that creates the store must finish `attach_or_create` before
/// any other process attaches.
///
/// Once a guard has been abandoned through this handle the mapping is never
/// unmapped: the kernel walks the owner's robust list through it when the
/// owning thread or process exits.
pub struct SharedBlock {
    shm: ManuallyDrop<ShmHandle>,
    pinned: AtomicBool,
}

impl SharedBlock {
    /// Attach to the block at `path`, creating and initialising it with
    /// default options if the store is absent or empty.
    pub fn attach_or_create(path: impl AsRef<Path>) -> Result<Self> {
        Self::attach_or_create_with(path, BlockOptions::default())
    }

    pub fn attach_or_create_with(path: impl AsRef<Path>, opts: BlockOptions) -> Result<Self> {
        let path = path.as_ref();
        let shm = ShmHandle::acquire(path, BLOCK_SIZE)?;
        if shm.created() {
            let init = unsafe { SyncBlock::init_in_place(shm.as_mut_ptr() as *mut SyncBlock, opts) };
            if let Err(e) = init {
                drop(shm);
                discard_store(path);
                return Err(e);
            }
        }
        tracing::info!(
            path = %path.display(),
            "opened {} store",
            if shm.created() { "new" } else { "existing" }
        );
        Ok(Self {
            shm: ManuallyDrop::new(shm),
            pinned: AtomicBool::new(false),
        })
    }

    /// Remove the backing store. Mappings held by live handles stay valid.
    pub fn remove(path: impl AsRef<Path>) -> Result<()> {
        ShmHandle::remove(path)
    }

    /// `true` if this handle created and initialised the block.
    pub fn created(&self) -> bool {
        self.shm.created()
    }

    pub fn path(&self) -> &Path {
        self.shm.path()
    }

    fn block(&self) -> &SyncBlock {
        unsafe { &*(self.shm.as_ptr() as *const SyncBlock) }
    }

    /// `true` once a lock has been abandoned through this handle.
    pub fn pinned(&self) -> bool {
        self.pinned.load(Ordering::Acquire)
    }

    /// Acquire `mutex_a`, blocking indefinitely.
    ///
    /// Fails with `EDEADLK` if the calling thread still holds `mutex_b` of
    /// this block: taking A after B could deadlock against a peer that
    /// follows the A-before-B order.
    pub fn lock_primary(&self) -> Result<EventGuard<'_>> {
        check_order(self.block(), "pthread_mutex_lock")?;
        let acquired = self.block().mutex_a.lock()?;
        Ok(EventGuard::new(self.block(), &self.pinned, acquired))
    }

    /// Acquire `mutex_a` only if nobody holds it. Same ordering rule as
    /// [`lock_primary`](Self::lock_primary).
    pub fn try_lock_primary(&self) -> Result<Option<EventGuard<'_>>> {
        check_order(self.block(), "pthread_mutex_trylock")?;
        Ok(self
            .block()
            .mutex_a
            .try_lock()?
            .map(|acquired| EventGuard::new(self.block(), &self.pinned, acquired)))
    }
}

impl Drop for SharedBlock {
    fn drop(&mut self) {
        if self.pinned() {
            tracing::debug!(path = %self.shm.path().display(), "keeping mapping of abandoned lock");
            return;
        }
        unsafe { ManuallyDrop::drop(&mut self.shm) };
    }
}

/// Unlink a store whose in-place construction failed. Returns `false` if the
/// file could not be removed; the next attach would then trust its bytes.
fn discard_store(path: &Path) -> bool {
    match ShmHandle::remove(path) {
        Ok(()) => true,
        Err(e) => {
            tracing::warn!(path = %path.display(), "uninitialised store left behind: {e}");
            false
        }
    }
}

// ---------------------------------------------------------------------------
// Lock order
// ---------------------------------------------------------------------------

thread_local! {
    // Addresses of the mutex_b instances this thread holds, abandoned ones
    // included. Guards are !Send, so entries are added and removed on the
    // same thread. An abandoned entry never goes stale: its mapping is pinned.
    static HELD_SECONDARY: RefCell<Vec<usize>> = const { RefCell::new(Vec::new()) };
}

fn secondary_key(block: &SyncBlock) -> usize {
    &block.mutex_b as *const RobustMutex as usize
}

fn check_order(block: &SyncBlock, op: &'static str) -> Result<()> {
    let key = secondary_key(block);
    if HELD_SECONDARY.with(|held| held.borrow().contains(&key)) {
        tracing::error!("mutex_a requested while this thread holds mutex_b");
        return Err(SyncError::FatalSync {
            op,
            code: libc::EDEADLK,
        });
    }
    Ok(())
}

fn note_secondary_held(key: usize) {
    HELD_SECONDARY.with(|held| held.borrow_mut().push(key));
}

fn note_secondary_released(key: usize) {
    let _ = HELD_SECONDARY.try_with(|held| {
        let mut held = held.borrow_mut();
        if let Some(i) = held.iter().position(|&k| k == key) {
            held.swap_remove(i);
        }
    });
}

// ---------------------------------------------------------------------------
// Guards
// ---------------------------------------------------------------------------

/// One held mutex plus its repair bookkeeping. Unlocks on drop.
struct Hold<'a> {
    mtx: &'a RobustMutex,
    pin: &'a AtomicBool,
    name: &'static str,
    acquired: Acquired,
    needs_repair: bool,
    // Set for mutex_b; cleared from HELD_SECONDARY on release, kept on abandon.
    order_key: Option<usize>,
    // pthread mutexes must be unlocked by the owning thread.
    _not_send: PhantomData<*const ()>,
}

impl<'a> Hold<'a> {
    fn new(mtx: &'a RobustMutex, pin: &'a AtomicBool, name: &'static str, acquired: Acquired) -> Self {
        Self {
            mtx,
            pin,
            name,
            acquired,
            needs_repair: acquired.is_abandoned(),
            order_key: None,
            _not_send: PhantomData,
        }
    }

    fn secondary(mtx: &'a RobustMutex, pin: &'a AtomicBool, key: usize, acquired: Acquired) -> Self {
        note_secondary_held(key);
        Self {
            mtx,
            pin,
            name: "mutex_b",
            acquired,
            needs_repair: acquired.is_abandoned(),
            order_key: Some(key),
            _not_send: PhantomData,
        }
    }

    fn release(&self) -> Result<()> {
        self.warn_if_unrepaired();
        let res = self.mtx.unlock();
        if let Some(key) = self.order_key {
            note_secondary_released(key);
        }
        res
    }

    fn mark_consistent(&mut self) -> Result<()> {
        self.mtx.mark_consistent()?;
        self.needs_repair = false;
        Ok(())
    }

    fn warn_if_unrepaired(&self) {
        if self.needs_repair {
            tracing::warn!(
                mutex = self.name,
                "unlocking an abandoned mutex without marking it consistent; it is now unrecoverable"
            );
        }
    }

    fn unlock(self) -> Result<()> {
        let res = self.release();
        std::mem::forget(self);
        res
    }

    fn abandon(self) {
        self.pin.store(true, Ordering::Release);
        tracing::debug!(mutex = self.name, "leaving mutex locked");
        std::mem::forget(self);
    }
}

impl Drop for Hold<'_> {
    fn drop(&mut self) {
        let _ = self.release();
    }
}

/// Proof that `mutex_a` is held. The only way to read or write the event
/// counter, signal or wait, or acquire `mutex_b`.
pub struct EventGuard<'a> {
    block: &'a SyncBlock,
    pin: &'a AtomicBool,
    hold: Hold<'a>,
}

impl<'a> EventGuard<'a> {
    fn new(block: &'a SyncBlock, pin: &'a AtomicBool, acquired: Acquired) -> Self {
        Self {
            block,
            pin,
            hold: Hold::new(&block.mutex_a, pin, "mutex_a", acquired),
        }
    }

    /// How `mutex_a` was obtained by the lock that created this guard.
    pub fn acquired(&self) -> Acquired {
        self.hold.acquired
    }

    /// An abandonment was reported (by the lock or a later wait) and has not
    /// been confirmed repaired yet.
    pub fn needs_repair(&self) -> bool {
        self.hold.needs_repair
    }

    pub fn event(&self) -> u64 {
        unsafe { *self.block.event.get() }
    }

    pub fn set_event(&mut self, value: u64) {
        unsafe { *self.block.event.get() = value };
    }

    /// Wait on the condition variable, releasing and re-acquiring `mutex_a`.
    pub fn wait(&mut self) -> Result<Acquired> {
        let acquired = self.block.cond.wait(&self.block.mutex_a)?;
        if acquired.is_abandoned() {
            self.hold.needs_repair = true;
        }
        Ok(acquired)
    }

    pub fn signal(&self) -> Result<()> {
        self.block.cond.signal()
    }

    pub fn broadcast(&self) -> Result<()> {
        self.block.cond.broadcast()
    }

    /// Confirm the counter has been re-validated after an abandonment.
    pub fn mark_consistent(&mut self) -> Result<()> {
        self.hold.mark_consistent()
    }

    /// Acquire `mutex_b`. Only reachable while `mutex_a` is held; once
    /// `mutex_a` is released first, [`SharedBlock::lock_primary`] refuses to
    /// re-acquire it on this thread until `mutex_b` is released.
    pub fn lock_secondary(&self) -> Result<SecondaryGuard<'a>> {
        let acquired = self.block.mutex_b.lock()?;
        Ok(SecondaryGuard {
            hold: Hold::secondary(
                &self.block.mutex_b,
                self.pin,
                secondary_key(self.block),
                acquired,
            ),
        })
    }

    pub fn unlock(self) -> Result<()> {
        self.hold.unlock()
    }

    /// Leave `mutex_a` locked for good. If this thread or process then exits,
    /// the next locker observes [`Acquired::Abandoned`].
    pub fn abandon(self) {
        self.hold.abandon();
    }
}

/// Proof that `mutex_b` is held (acquired after `mutex_a`).
pub struct SecondaryGuard<'a> {
    hold: Hold<'a>,
}

impl SecondaryGuard<'_> {
    pub fn acquired(&self) -> Acquired {
        self.hold.acquired
    }

    pub fn needs_repair(&self) -> bool {
        self.hold.needs_repair
    }

    pub fn mark_consistent(&mut self) -> Result<()> {
        self.hold.mark_consistent()
    }

    pub fn unlock(self) -> Result<()> {
        self.hold.unlock()
    }

    pub fn abandon(self) {
        self.hold.abandon();
    }
}
