// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Named, file-backed shared memory handle.
// Delegates to platform::PlatformShm.

use std::path::Path;

use crate::error::Result;
use crate::platform::PlatformShm;

/// A named, persistent, inter-process shared memory region.
///
/// The region is a regular file mapped `MAP_SHARED`, sized to exactly the
/// requested byte count. It outlives every process that maps it until it is
/// removed with [`ShmHandle::remove`].
pub struct ShmHandle {
    inner: PlatformShm,
}

impl ShmHandle {
    /// Open-or-create the store at `path` and map `size` bytes of it.
    ///
    /// An empty file is grown to `size`; [`created`](Self::created) then
    /// reports `true` and the caller owns initialising the contents.
    pub fn acquire(path: impl AsRef<Path>, size: usize) -> Result<Self> {
        let inner = PlatformShm::acquire(path.as_ref(), size)?;
        Ok(Self { inner })
    }

    pub fn as_ptr(&self) -> *const u8 {
        self.inner.as_ptr()
    }

    pub fn as_mut_ptr(&self) -> *mut u8 {
        self.inner.as_mut_ptr()
    }

    pub fn mapped_size(&self) -> usize {
        self.inner.mapped_size()
    }

    pub fn path(&self) -> &Path {
        self.inner.path()
    }

    /// `true` if this handle found the store empty and sized it.
    pub fn created(&self) -> bool {
        self.inner.created()
    }

    /// Remove the backing file so the next `acquire` starts fresh.
    pub fn remove(path: impl AsRef<Path>) -> Result<()> {
        PlatformShm::unlink(path.as_ref())
    }
}
