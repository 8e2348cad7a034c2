// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Drives the robust-mutex handshake between two processes.
//
// Usage:
//   robust_handshake run [--kill]          fresh store, producer child, consumer here
//   robust_handshake produce [--release | --hold] [--no-reset]
//   robust_handshake consume [--expect abandoned|clean]
//   robust_handshake reset
//
// The default producer exits without releasing its locks, so the consumer
// that follows must report both mutexes as abandoned. Exit code 0 means every
// expectation held.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::builder::BoolishValueParser;
use clap::{Args, Parser, Subcommand, ValueEnum};

use robust_ipc::config::{DEFAULT_STORE, NO_PI_ENV, STORE_ENV};
use robust_ipc::protocol::{Expectation, DEFAULT_TARGET};
use robust_ipc::{
    exit_codes, logging, process_manager, roles, Config, ProducerExit, Role, RoleOutcome,
    SharedBlock, SyncError,
};

#[derive(Parser, Debug)]
#[command(name = "robust_handshake")]
#[command(version, about = "Cross-process handshake over robust shared-memory mutexes")]
struct Cli {
    #[command(flatten)]
    store: StoreArgs,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Args, Debug, Clone)]
struct StoreArgs {
    /// Backing store shared by producer and consumer.
    #[arg(long, global = true, env = STORE_ENV, default_value = DEFAULT_STORE)]
    store: PathBuf,

    /// Event value the producer writes and the consumer waits for.
    #[arg(long, global = true, default_value_t = DEFAULT_TARGET)]
    target: u64,

    /// Create the mutexes without priority inheritance.
    #[arg(long, global = true, env = NO_PI_ENV, value_parser = BoolishValueParser::new())]
    no_priority_inheritance: bool,
}

impl StoreArgs {
    fn config(&self) -> Config {
        Config {
            store: self.store.clone(),
            target: self.target,
            priority_inheritance: !self.no_priority_inheritance,
        }
    }
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start fresh, run a producer child to its end, then consume here.
    Run {
        /// Kill the producer while it holds both locks instead of letting it exit.
        #[arg(long)]
        kill: bool,
    },
    /// Run the producer role in this process.
    Produce {
        /// Unlock both mutexes after signalling.
        #[arg(long, conflicts_with = "hold")]
        release: bool,
        /// Hold both mutexes until killed.
        #[arg(long)]
        hold: bool,
        /// Attach to the existing store instead of removing it first.
        #[arg(long)]
        no_reset: bool,
    },
    /// Run the consumer role against an existing store.
    Consume {
        #[arg(long, value_enum, default_value_t = Expect::Abandoned)]
        expect: Expect,
    },
    /// Remove the backing store.
    Reset,
}

#[derive(ValueEnum, Debug, Clone, Copy)]
enum Expect {
    Abandoned,
    Clean,
}

impl From<Expect> for Expectation {
    fn from(e: Expect) -> Self {
        match e {
            Expect::Abandoned => Expectation::ABANDONED,
            Expect::Clean => Expectation::CLEAN,
        }
    }
}

fn dispatch(cli: Cli) -> Result<RoleOutcome, SyncError> {
    let config = cli.store.config();
    config.validate()?;

    match cli.command.unwrap_or(Command::Run { kill: false }) {
        Command::Run { kill } => {
            let exe = process_manager::current_exe()?;
            let exit = if kill {
                ProducerExit::Killed
            } else {
                ProducerExit::Natural
            };
            roles::run_scenario(&config, &exe, exit, Expectation::ABANDONED)
        }
        Command::Produce {
            release,
            hold,
            no_reset,
        } => {
            if !no_reset {
                SharedBlock::remove(&config.store)?;
            }
            let role = if hold {
                Role::ProducerHeldUntilKilled
            } else if release {
                Role::ReleasingProducer
            } else {
                Role::ProducerThatExitsWithoutReleasing
            };
            role.run(&config)
        }
        Command::Consume { expect } => Role::Consumer(expect.into()).run(&config),
        Command::Reset => {
            SharedBlock::remove(&config.store)?;
            tracing::info!(store = %config.store.display(), "store removed");
            Ok(RoleOutcome::default())
        }
    }
}

fn main() -> ExitCode {
    logging::init_tracing();
    let cli = Cli::parse();

    let code = match dispatch(cli) {
        Ok(outcome) => outcome.exit_code(),
        Err(err) => {
            if err.is_fatal() {
                tracing::error!("fatal: {err}");
            } else {
                tracing::error!("{err}");
            }
            err.exit_code()
        }
    };
    debug_assert!((0..=255).contains(&code));
    if code == exit_codes::SUCCESS {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(code as u8)
    }
}
