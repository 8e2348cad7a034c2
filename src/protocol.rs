// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Event handshake over a SharedBlock.
//
// The producer takes mutex_a then mutex_b, writes the target value into the
// event counter and signals. The consumer takes mutex_a, waits until the
// counter reaches the target, then takes mutex_b. Either side may find a lock
// abandoned by a dead peer; whoever observes that re-validates the counter
// and marks the mutex consistent before trusting it.
//
// Counter invariant: it holds either 0 (not signalled) or the target.

use std::fmt;

use crate::block::{EventGuard, SecondaryGuard, SharedBlock};
use crate::error::Result;
use crate::mutex::Acquired;

/// Event value used by the stock scenario.
pub const DEFAULT_TARGET: u64 = 1;

/// What the producer does with its locks once it has signalled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Release {
    /// Unlock both mutexes (the well-behaved path).
    Unlock,
    /// Keep both mutexes locked; the caller is about to exit, which
    /// manufactures the abandonment the consumer must detect.
    Abandon,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProduceReport {
    pub primary: Acquired,
    pub secondary: Acquired,
    /// Counter value found (after repair) before it was overwritten.
    pub previous: u64,
}

/// A producer that has signalled and still holds both mutexes.
pub struct Produced<'a> {
    primary: EventGuard<'a>,
    secondary: SecondaryGuard<'a>,
    report: ProduceReport,
}

impl Produced<'_> {
    pub fn report(&self) -> ProduceReport {
        self.report
    }

    pub fn finish(self, release: Release) -> Result<ProduceReport> {
        match release {
            Release::Unlock => {
                self.primary.unlock()?;
                self.secondary.unlock()?;
            }
            Release::Abandon => {
                self.primary.abandon();
                self.secondary.abandon();
            }
        }
        Ok(self.report)
    }
}

/// Re-validate the counter after `mutex_a` was reported abandoned, then mark
/// the mutex consistent. A value outside `{0, target}` can only come from a
/// corrupted write and is reset to "not signalled".
pub(crate) fn repair_event(guard: &mut EventGuard<'_>, target: u64) -> Result<()> {
    let found = guard.event();
    if found != 0 && found != target {
        tracing::warn!(found, target, "event counter invalid after abandonment, resetting");
        guard.set_event(0);
    } else {
        tracing::warn!(found, "mutex_a was abandoned, event counter re-validated");
    }
    guard.mark_consistent()
}

/// Run the producer path up to (and including) the signal, keeping both
/// mutexes held.
pub fn begin_produce(block: &SharedBlock, target: u64) -> Result<Produced<'_>> {
    tracing::info!("locking mutex_a...");
    let mut primary = block.lock_primary()?;
    if primary.needs_repair() {
        repair_event(&mut primary, target)?;
    }
    tracing::info!("mutex_a locked");

    tracing::info!("locking mutex_b...");
    let mut secondary = primary.lock_secondary()?;
    if secondary.needs_repair() {
        tracing::warn!("mutex_b was abandoned");
        secondary.mark_consistent()?;
    }
    tracing::info!("mutex_b locked");

    let previous = primary.event();
    primary.set_event(target);
    primary.signal()?;
    tracing::info!(event = target, "event set and signalled");

    let report = ProduceReport {
        primary: primary.acquired(),
        secondary: secondary.acquired(),
        previous,
    };
    Ok(Produced {
        primary,
        secondary,
        report,
    })
}

/// Producer path: set the counter to `target`, signal, then release or
/// abandon the locks.
pub fn produce(block: &SharedBlock, target: u64, release: Release) -> Result<ProduceReport> {
    begin_produce(block, target)?.finish(release)
}

/// What the consumer observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConsumeReport {
    /// Outcome of the initial `mutex_a` lock.
    pub primary: Acquired,
    /// Outcome of the `mutex_b` lock.
    pub secondary: Acquired,
    /// Number of condition waits performed.
    pub waits: u32,
    /// Waits whose re-acquisition of `mutex_a` found it abandoned.
    pub wait_abandonments: u32,
    /// Counter value seen when the wait loop ended.
    pub observed: u64,
}

/// Consumer path: wait for the counter to reach `target`, tolerating the
/// producer's death at any point, then take and release both mutexes.
pub fn consume(block: &SharedBlock, target: u64) -> Result<ConsumeReport> {
    tracing::info!("locking mutex_a...");
    let mut primary = block.lock_primary()?;
    if primary.needs_repair() {
        repair_event(&mut primary, target)?;
    }
    tracing::info!("mutex_a locked");

    let mut waits = 0;
    let mut wait_abandonments = 0;
    while primary.event() != target {
        waits += 1;
        if primary.wait()?.is_abandoned() {
            wait_abandonments += 1;
            repair_event(&mut primary, target)?;
        }
    }
    let observed = primary.event();

    tracing::info!("locking mutex_b...");
    let mut secondary = primary.lock_secondary()?;
    if secondary.needs_repair() {
        tracing::warn!("mutex_b was abandoned");
        secondary.mark_consistent()?;
    }
    tracing::info!("mutex_b locked");

    let report = ConsumeReport {
        primary: primary.acquired(),
        secondary: secondary.acquired(),
        waits,
        wait_abandonments,
        observed,
    };
    primary.unlock()?;
    secondary.unlock()?;
    Ok(report)
}

/// Abandonment outcomes a consumer run is expected to observe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Expectation {
    pub primary: Acquired,
    pub secondary: Acquired,
}

impl Expectation {
    /// The producer died holding both mutexes.
    pub const ABANDONED: Self = Self {
        primary: Acquired::Abandoned,
        secondary: Acquired::Abandoned,
    };
    /// Both mutexes were released (or already repaired by an earlier run).
    pub const CLEAN: Self = Self {
        primary: Acquired::Clean,
        secondary: Acquired::Clean,
    };
}

/// One unmet abandonment expectation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CheckFailure {
    pub mutex: &'static str,
    pub expected: Acquired,
    pub observed: Acquired,
}

impl fmt::Display for CheckFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.expected.is_abandoned() {
            write!(f, "{} is not reported as abandoned", self.mutex)
        } else {
            write!(f, "{} is unexpectedly reported as abandoned", self.mutex)
        }
    }
}

impl ConsumeReport {
    /// Compare the lock outcomes against `expect`. Wait-time abandonments are
    /// not part of the check; they depend on when the producer died.
    pub fn check(&self, expect: &Expectation) -> Vec<CheckFailure> {
        [
            ("mutex_a", expect.primary, self.primary),
            ("mutex_b", expect.secondary, self.secondary),
        ]
        .into_iter()
        .filter(|(_, expected, observed)| expected != observed)
        .map(|(mutex, expected, observed)| CheckFailure {
            mutex,
            expected,
            observed,
        })
        .collect()
    }
}
