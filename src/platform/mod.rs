// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors

// Robust mutexes are a POSIX feature; there is no Windows backend.
#[cfg(unix)]
pub mod posix;

#[cfg(unix)]
pub use posix::PlatformShm;
