// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Shared block behaviour across independent mappings of the same store.
// Threads stand in for processes: a thread that exits holding a robust
// mutex is reported as a dead owner exactly like a process would be.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::Duration;

use tempfile::TempDir;

use robust_ipc::protocol::{self, Expectation, Release};
use robust_ipc::{Acquired, SharedBlock, BLOCK_SIZE};

fn store(dir: &TempDir) -> PathBuf {
    dir.path().join("shared_file_test~")
}

#[test]
fn attach_creates_once() {
    let dir = TempDir::new().unwrap();
    let first = SharedBlock::attach_or_create(store(&dir)).expect("create");
    let second = SharedBlock::attach_or_create(store(&dir)).expect("attach");
    assert!(first.created());
    assert!(!second.created());
    assert_eq!(std::fs::metadata(store(&dir)).unwrap().len(), BLOCK_SIZE as u64);
}

#[test]
fn counter_written_through_one_mapping_is_seen_through_another() {
    let dir = TempDir::new().unwrap();
    let a = SharedBlock::attach_or_create(store(&dir)).unwrap();
    let b = SharedBlock::attach_or_create(store(&dir)).unwrap();

    let mut g = a.lock_primary().unwrap();
    g.set_event(42);
    g.unlock().unwrap();

    assert_eq!(b.lock_primary().unwrap().event(), 42);
}

#[test]
fn primary_excludes_across_mappings() {
    let dir = TempDir::new().unwrap();
    let path = store(&dir);
    SharedBlock::attach_or_create(&path).unwrap();

    let in_cs = Arc::new(AtomicBool::new(false));
    let violation = Arc::new(AtomicBool::new(false));

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let path = path.clone();
            let in_cs = Arc::clone(&in_cs);
            let violation = Arc::clone(&violation);
            thread::spawn(move || {
                let block = SharedBlock::attach_or_create(&path).unwrap();
                for _ in 0..50 {
                    let mut g = block.lock_primary().unwrap();
                    if in_cs.swap(true, Ordering::SeqCst) {
                        violation.store(true, Ordering::SeqCst);
                    }
                    let v = g.event();
                    thread::sleep(Duration::from_micros(20));
                    g.set_event(v + 1);
                    in_cs.store(false, Ordering::SeqCst);
                    g.unlock().unwrap();
                }
            })
        })
        .collect();

    for h in handles {
        h.join().unwrap();
    }

    assert!(!violation.load(Ordering::SeqCst), "two holders inside mutex_a");
    let block = SharedBlock::attach_or_create(&path).unwrap();
    assert_eq!(block.lock_primary().unwrap().event(), 200);
}

#[test]
fn each_owner_death_is_reported_exactly_once() {
    let dir = TempDir::new().unwrap();
    let path = store(&dir);
    let observer = SharedBlock::attach_or_create(&path).unwrap();

    for round in 0..3 {
        let p = path.clone();
        thread::spawn(move || {
            let block = SharedBlock::attach_or_create(&p).unwrap();
            block.lock_primary().unwrap().abandon();
        })
        .join()
        .unwrap();

        let mut g = observer.lock_primary().unwrap();
        assert_eq!(g.acquired(), Acquired::Abandoned, "round {round}");
        g.mark_consistent().unwrap();
        g.unlock().unwrap();

        for _ in 0..3 {
            assert_eq!(observer.lock_primary().unwrap().acquired(), Acquired::Clean);
        }
    }
}

#[test]
fn fresh_store_consumer_would_block() {
    // Scenario B without hanging: nothing ever produced, so mutex_a is free
    // and clean but the counter is not signalled.
    let dir = TempDir::new().unwrap();
    let block = SharedBlock::attach_or_create(store(&dir)).unwrap();
    let g = block.try_lock_primary().unwrap().expect("mutex_a is free");
    assert_eq!(g.acquired(), Acquired::Clean);
    assert_eq!(g.event(), 0);
}

#[test]
fn repeated_handshakes_keep_lock_order_without_deadlock() {
    let dir = TempDir::new().unwrap();
    let path = store(&dir);
    SharedBlock::attach_or_create(&path).unwrap();
    let rounds = 20;
    let consumed = Arc::new(AtomicU32::new(0));

    let consumer = {
        let path = path.clone();
        let consumed = Arc::clone(&consumed);
        thread::spawn(move || {
            let block = SharedBlock::attach_or_create(&path).unwrap();
            for target in 1..=rounds {
                let report = protocol::consume(&block, target).unwrap();
                assert!(report.observed >= target);
                consumed.fetch_add(1, Ordering::SeqCst);
            }
        })
    };

    let block = SharedBlock::attach_or_create(&path).unwrap();
    for target in 1..=rounds {
        while consumed.load(Ordering::SeqCst) + 1 < target as u32 {
            thread::yield_now();
        }
        protocol::produce(&block, target, Release::Unlock).unwrap();
    }
    consumer.join().unwrap();
    assert_eq!(consumed.load(Ordering::SeqCst), rounds as u32);
}

#[test]
fn consumer_on_other_mapping_detects_dead_producer() {
    let dir = TempDir::new().unwrap();
    let path = store(&dir);

    let p = path.clone();
    thread::spawn(move || {
        let block = SharedBlock::attach_or_create(&p).unwrap();
        protocol::produce(&block, 1, Release::Abandon).unwrap();
        assert!(block.pinned());
    })
    .join()
    .unwrap();

    let block = SharedBlock::attach_or_create(&path).unwrap();
    let report = protocol::consume(&block, 1).unwrap();
    assert!(report.check(&Expectation::ABANDONED).is_empty(), "{report:?}");

    let again = protocol::consume(&block, 1).unwrap();
    assert!(again.check(&Expectation::CLEAN).is_empty(), "{again:?}");
}

#[test]
fn primary_after_secondary_is_refused_instead_of_deadlocking() {
    let dir = TempDir::new().unwrap();
    let path = store(&dir);
    SharedBlock::attach_or_create(&path).unwrap();

    // Holds B, lets A go, then asks for A again.
    let p = path.clone();
    let reversed = thread::spawn(move || {
        let block = SharedBlock::attach_or_create(&p).unwrap();
        let a = block.lock_primary().unwrap();
        let b = a.lock_secondary().unwrap();
        a.unlock().unwrap();
        thread::sleep(Duration::from_millis(30));
        let refused = block.lock_primary().err().and_then(|e| e.os_code());
        b.unlock().unwrap();
        refused
    });

    // Follows A then B.
    let (tx, rx) = mpsc::channel();
    let p = path.clone();
    thread::spawn(move || {
        let block = SharedBlock::attach_or_create(&p).unwrap();
        thread::sleep(Duration::from_millis(10));
        let a = block.lock_primary().unwrap();
        let b = a.lock_secondary().unwrap();
        b.unlock().unwrap();
        a.unlock().unwrap();
        tx.send(()).unwrap();
    });

    rx.recv_timeout(Duration::from_secs(2))
        .expect("ordered locker finished");
    assert_eq!(reversed.join().unwrap(), Some(libc::EDEADLK));
}
