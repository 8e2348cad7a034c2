// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Crash-resilient signaling between processes that do not trust each other's
// liveness: robust, priority-inheriting, process-shared pthread mutexes and a
// shared condition variable in one file-backed mapping. A process that dies
// holding a lock is detected by the next locker, which repairs the protected
// state and marks the lock consistent before carrying on.

#[cfg(not(unix))]
compile_error!("robust-ipc needs POSIX robust mutexes");

pub mod error;
pub use error::{exit_codes, Result, SyncError};

mod platform;

mod shm;
pub use shm::ShmHandle;

mod mutex;
pub use mutex::{Acquired, RobustMutex};

mod condition;
pub use condition::SharedCondition;

mod block;
pub use block::{BlockOptions, EventGuard, SecondaryGuard, SharedBlock, SyncBlock, BLOCK_SIZE};

pub mod protocol;

pub mod roles;
pub use roles::{ProducerExit, Role, RoleOutcome};

pub mod config;
pub use config::Config;

pub mod logging;

pub mod process_manager;
