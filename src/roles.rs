// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// The process roles that drive the handshake, and the orchestration that
// runs a producer in a child process before consuming in this one.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use crate::block::SharedBlock;
use crate::config::Config;
use crate::error::{exit_codes, Result, SyncError};
use crate::process_manager::{self, ProcessHandle, WaitResult};
use crate::protocol::{self, CheckFailure, ConsumeReport, Expectation, Release};

/// How long `run --kill` waits for the held producer to report readiness.
pub const READY_TIMEOUT: Duration = Duration::from_secs(10);

/// One side of the handshake, as run by one process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Signals, then exits still holding both mutexes. This is the
    /// deliberate abandonment the consumer is expected to detect.
    ProducerThatExitsWithoutReleasing,
    /// Signals, then unlocks both mutexes.
    ReleasingProducer,
    /// Signals, publishes a readiness marker and blocks holding both
    /// mutexes until something kills the process.
    ProducerHeldUntilKilled,
    /// Waits for the event and checks abandonment against the expectation.
    Consumer(Expectation),
}

/// Result of a role that ran to completion.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RoleOutcome {
    pub consumed: Option<ConsumeReport>,
    pub failures: Vec<CheckFailure>,
}

impl RoleOutcome {
    pub fn succeeded(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn exit_code(&self) -> i32 {
        if self.succeeded() {
            exit_codes::SUCCESS
        } else {
            exit_codes::PROTOCOL_FAILURE
        }
    }
}

/// Marker file `ProducerHeldUntilKilled` creates once it holds both locks.
pub fn ready_marker(store: &Path) -> PathBuf {
    let mut name = store.as_os_str().to_owned();
    name.push(".ready");
    PathBuf::from(name)
}

fn remove_marker(marker: &Path) -> Result<()> {
    match std::fs::remove_file(marker) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(SyncError::storage("unlink", marker, e)),
    }
}

impl Role {
    pub fn name(&self) -> &'static str {
        match self {
            Role::ProducerThatExitsWithoutReleasing => "producer",
            Role::ReleasingProducer => "releasing-producer",
            Role::ProducerHeldUntilKilled => "held-producer",
            Role::Consumer(_) => "consumer",
        }
    }

    /// Attach to the configured store and drive this role once.
    ///
    /// Fatal primitive and storage errors are returned as `Err`; the caller
    /// is expected to end the process with [`SyncError::exit_code`].
    pub fn run(&self, config: &Config) -> Result<RoleOutcome> {
        config.validate()?;
        let _span =
            tracing::info_span!("role", pid = std::process::id(), role = self.name()).entered();
        tracing::info!("started");

        let block = SharedBlock::attach_or_create_with(&config.store, config.block_options())?;
        let outcome = match self {
            Role::ProducerThatExitsWithoutReleasing => {
                protocol::produce(&block, config.target, Release::Abandon)?;
                RoleOutcome::default()
            }
            Role::ReleasingProducer => {
                protocol::produce(&block, config.target, Release::Unlock)?;
                RoleOutcome::default()
            }
            Role::ProducerHeldUntilKilled => {
                let _held = protocol::begin_produce(&block, config.target)?;
                let marker = ready_marker(&config.store);
                std::fs::write(&marker, std::process::id().to_string())
                    .map_err(|e| SyncError::storage("write", &marker, e))?;
                tracing::info!(marker = %marker.display(), "holding both locks until killed");
                loop {
                    std::thread::park();
                }
            }
            Role::Consumer(expect) => {
                let report = protocol::consume(&block, config.target)?;
                let failures = report.check(expect);
                for f in &failures {
                    tracing::error!("check failed: {f}");
                }
                RoleOutcome {
                    consumed: Some(report),
                    failures,
                }
            }
        };

        tracing::info!("terminated");
        Ok(outcome)
    }
}

/// How the orchestrator gets rid of the producer before consuming.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProducerExit {
    /// The producer returns from its role and exits normally.
    Natural,
    /// The producer blocks holding its locks and is SIGKILLed.
    Killed,
}

fn producer_args(config: &Config, hold: bool) -> Vec<String> {
    let mut args = vec![
        "produce".to_owned(),
        "--no-reset".to_owned(),
        "--store".to_owned(),
        config.store.display().to_string(),
        "--target".to_owned(),
        config.target.to_string(),
    ];
    if hold {
        args.push("--hold".to_owned());
    }
    if !config.priority_inheritance {
        args.push("--no-priority-inheritance".to_owned());
    }
    args
}

fn wait_until_ready(child: &ProcessHandle, marker: &Path) -> Result<()> {
    let deadline = Instant::now() + READY_TIMEOUT;
    while !marker.exists() {
        let early = process_manager::wait_for_exit(child, Some(Duration::from_millis(10)))?;
        if early.finished() || Instant::now() >= deadline {
            if !early.finished() {
                process_manager::force_kill(child)?;
                process_manager::wait_for_exit(child, None)?;
            }
            return Err(SyncError::Spawn {
                what: "held producer never became ready",
                source: std::io::Error::from(std::io::ErrorKind::TimedOut),
            });
        }
    }
    Ok(())
}

/// Start from a fresh store, run a producer child process (`exe produce ...`)
/// to its end, then run the consumer in this process.
pub fn run_scenario(
    config: &Config,
    exe: &Path,
    producer_exit: ProducerExit,
    expect: Expectation,
) -> Result<RoleOutcome> {
    config.validate()?;
    SharedBlock::remove(&config.store)?;
    let marker = ready_marker(&config.store);
    remove_marker(&marker)?;

    let hold = producer_exit == ProducerExit::Killed;
    let args = producer_args(config, hold);
    let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
    let child = process_manager::spawn("producer", exe, &arg_refs)?;

    let status: WaitResult = match producer_exit {
        ProducerExit::Natural => process_manager::wait_for_exit(&child, None)?,
        ProducerExit::Killed => {
            wait_until_ready(&child, &marker)?;
            process_manager::force_kill(&child)?;
            let status = process_manager::wait_for_exit(&child, None)?;
            remove_marker(&marker)?;
            status
        }
    };
    tracing::info!(
        pid = child.pid,
        exited = status.exited,
        exit_code = status.exit_code,
        signal = status.signal,
        "producer finished"
    );

    Role::Consumer(expect).run(config)
}

#[cfg(test)]
mod tests {
    use std::thread;

    use tempfile::TempDir;

    use super::*;
    use crate::mutex::Acquired;

    fn config_in(dir: &TempDir) -> Config {
        Config {
            store: dir.path().join("store"),
            ..Config::default()
        }
    }

    #[test]
    fn marker_sits_next_to_store() {
        assert_eq!(
            ready_marker(Path::new("/tmp/x/shared_file_test~")),
            PathBuf::from("/tmp/x/shared_file_test~.ready")
        );
    }

    #[test]
    fn producer_args_round_trip_config() {
        let cfg = Config {
            store: PathBuf::from("/tmp/s"),
            target: 4,
            priority_inheritance: false,
        };
        assert_eq!(
            producer_args(&cfg, true),
            [
                "produce",
                "--no-reset",
                "--store",
                "/tmp/s",
                "--target",
                "4",
                "--hold",
                "--no-priority-inheritance"
            ]
        );
    }

    #[test]
    fn exiting_producer_then_consumer_succeeds() {
        let dir = TempDir::new().unwrap();
        let cfg = config_in(&dir);

        let produced = {
            let cfg = cfg.clone();
            thread::spawn(move || Role::ProducerThatExitsWithoutReleasing.run(&cfg).unwrap())
                .join()
                .unwrap()
        };
        assert!(produced.succeeded());

        let outcome = Role::Consumer(Expectation::ABANDONED).run(&cfg).unwrap();
        assert!(outcome.succeeded(), "{:?}", outcome.failures);
        assert_eq!(outcome.exit_code(), exit_codes::SUCCESS);
        let report = outcome.consumed.unwrap();
        assert_eq!(report.primary, Acquired::Abandoned);
        assert_eq!(report.secondary, Acquired::Abandoned);
    }

    #[test]
    fn releasing_producer_fails_abandonment_expectation() {
        let dir = TempDir::new().unwrap();
        let cfg = config_in(&dir);

        Role::ReleasingProducer.run(&cfg).unwrap();
        let outcome = Role::Consumer(Expectation::ABANDONED).run(&cfg).unwrap();
        assert_eq!(outcome.failures.len(), 2);
        assert_eq!(outcome.exit_code(), exit_codes::PROTOCOL_FAILURE);

        let outcome = Role::Consumer(Expectation::CLEAN).run(&cfg).unwrap();
        assert!(outcome.succeeded());
    }

    #[test]
    fn invalid_config_is_rejected_before_attaching() {
        let dir = TempDir::new().unwrap();
        let cfg = Config {
            target: 0,
            ..config_in(&dir)
        };
        let err = Role::ReleasingProducer.run(&cfg).unwrap_err();
        assert_eq!(err.exit_code(), exit_codes::USAGE);
        assert!(!cfg.store.exists());
    }
}
