// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Runtime configuration: where the backing store lives, which event value
// the handshake uses, and how the creator configures the mutexes.

use std::path::PathBuf;

use crate::block::BlockOptions;
use crate::error::{Result, SyncError};
use crate::protocol::DEFAULT_TARGET;

/// Backing file used when nothing else is configured.
pub const DEFAULT_STORE: &str = "shared_file_test~";

/// Environment variable behind `--store`.
pub const STORE_ENV: &str = "ROBUST_IPC_STORE";

/// Environment variable behind `--no-priority-inheritance`.
pub const NO_PI_ENV: &str = "ROBUST_IPC_NO_PI";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub store: PathBuf,
    pub target: u64,
    pub priority_inheritance: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            store: PathBuf::from(DEFAULT_STORE),
            target: DEFAULT_TARGET,
            priority_inheritance: true,
        }
    }
}

impl Config {
    pub fn validate(&self) -> Result<()> {
        if self.store.as_os_str().is_empty() {
            return Err(SyncError::InvalidConfig("store path is empty".into()));
        }
        if self.target == 0 {
            return Err(SyncError::InvalidConfig(
                "target must be non-zero (0 means not signalled)".into(),
            ));
        }
        Ok(())
    }

    pub fn block_options(&self) -> BlockOptions {
        BlockOptions {
            priority_inheritance: self.priority_inheritance,
        }
    }
}
