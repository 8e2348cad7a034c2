// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Error type shared by every layer of the crate, plus the process exit codes
// the roles and the `robust_handshake` binary report.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Process exit codes.
///
/// An orchestrator distinguishes "the protocol ran but an abandonment
/// expectation was not met" from the fatal classes below.
pub mod exit_codes {
    /// Role completed and every expectation held.
    pub const SUCCESS: i32 = 0;
    /// Role completed but an expected abandonment was not observed (or vice versa).
    pub const PROTOCOL_FAILURE: i32 = 1;
    /// A pthread primitive failed with something other than `EOWNERDEAD`.
    pub const FATAL_SYNC: i32 = 2;
    /// A mutex was left non-recoverable by an earlier owner.
    pub const NON_RECOVERABLE: i32 = 3;
    /// The backing store could not be opened, sized, mapped or removed.
    pub const STORAGE: i32 = 4;
    /// A child process could not be spawned, waited for or killed.
    pub const SPAWN: i32 = 5;
    /// Invalid configuration or command-line input.
    pub const USAGE: i32 = 6;
}

/// Errors raised by the backing store, the primitive wrappers and the
/// process collaborator.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Any primitive failure other than the abandonment code.
    #[error("{op}: ({code}){}", strerror(.code))]
    FatalSync { op: &'static str, code: i32 },

    /// `ENOTRECOVERABLE`: an abandoned mutex was unlocked without being
    /// marked consistent and can never be acquired again.
    #[error("{op}: mutex is not recoverable (abandoned and never marked consistent)")]
    NonRecoverableLock { op: &'static str },

    #[error("{op}('{}'): {source}", .path.display())]
    Storage {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("mmap('{}'): {source}", .path.display())]
    Mapping {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("{what}: {source}")]
    Spawn {
        what: &'static str,
        #[source]
        source: io::Error,
    },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl SyncError {
    /// Translate a non-zero pthread return value.
    pub(crate) fn from_pthread(op: &'static str, code: i32) -> Self {
        if code == libc::ENOTRECOVERABLE {
            SyncError::NonRecoverableLock { op }
        } else {
            SyncError::FatalSync { op, code }
        }
    }

    pub(crate) fn storage(op: &'static str, path: impl Into<PathBuf>, source: io::Error) -> Self {
        SyncError::Storage {
            op,
            path: path.into(),
            source,
        }
    }

    /// Raw OS error code, when the error came from a syscall or pthread call.
    pub fn os_code(&self) -> Option<i32> {
        match self {
            SyncError::FatalSync { code, .. } => Some(*code),
            SyncError::NonRecoverableLock { .. } => Some(libc::ENOTRECOVERABLE),
            SyncError::Storage { source, .. }
            | SyncError::Mapping { source, .. }
            | SyncError::Spawn { source, .. } => source.raw_os_error(),
            SyncError::InvalidConfig(_) => None,
        }
    }

    /// Whether the error must end the calling process.
    ///
    /// `NonRecoverableLock` is terminal for the affected lock but is kept
    /// distinguishable so callers can log it as a programming error.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, SyncError::NonRecoverableLock { .. })
    }

    pub fn exit_code(&self) -> i32 {
        match self {
            SyncError::FatalSync { .. } => exit_codes::FATAL_SYNC,
            SyncError::NonRecoverableLock { .. } => exit_codes::NON_RECOVERABLE,
            SyncError::Storage { .. } | SyncError::Mapping { .. } => exit_codes::STORAGE,
            SyncError::Spawn { .. } => exit_codes::SPAWN,
            SyncError::InvalidConfig(_) => exit_codes::USAGE,
        }
    }
}

fn strerror(code: &i32) -> io::Error {
    io::Error::from_raw_os_error(*code)
}

pub type Result<T> = std::result::Result<T, SyncError>;
