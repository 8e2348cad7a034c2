// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Shared condition variable paired with a robust mutex.

use std::mem::MaybeUninit;
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::thread;
use std::time::Duration;

use robust_ipc::{Acquired, RobustMutex, SharedCondition};

fn leaked<T>() -> &'static mut MaybeUninit<T> {
    Box::leak(Box::new(MaybeUninit::uninit()))
}

fn pair() -> (&'static RobustMutex, &'static SharedCondition) {
    let m = leaked::<RobustMutex>();
    let c = leaked::<SharedCondition>();
    unsafe {
        RobustMutex::init_in_place(m.as_mut_ptr(), true).expect("init mutex");
        SharedCondition::init_in_place(c.as_mut_ptr()).expect("init cond");
        (m.assume_init_ref(), c.assume_init_ref())
    }
}

fn flag() -> &'static AtomicBool {
    Box::leak(Box::new(AtomicBool::new(false)))
}

#[test]
fn signal_without_waiters() {
    let (mtx, cv) = pair();
    mtx.lock().expect("lock");
    cv.signal().expect("signal");
    cv.broadcast().expect("broadcast");
    mtx.unlock().expect("unlock");
}

#[test]
fn wait_notify() {
    let (mtx, cv) = pair();
    let ready = flag();

    let waiter = thread::spawn(move || {
        assert_eq!(mtx.lock().unwrap(), Acquired::Clean);
        while !ready.load(Ordering::Relaxed) {
            assert_eq!(cv.wait(mtx).expect("wait"), Acquired::Clean);
        }
        mtx.unlock().unwrap();
    });

    thread::sleep(Duration::from_millis(50));
    mtx.lock().expect("lock main");
    ready.store(true, Ordering::Relaxed);
    cv.signal().expect("signal");
    mtx.unlock().expect("unlock main");

    waiter.join().unwrap();
}

#[test]
fn broadcast_wakes_all() {
    let (mtx, cv) = pair();
    let ready = flag();
    let woken: &'static AtomicI32 = Box::leak(Box::new(AtomicI32::new(0)));

    let waiters: Vec<_> = (0..3)
        .map(|_| {
            thread::spawn(move || {
                mtx.lock().unwrap();
                while !ready.load(Ordering::Relaxed) {
                    cv.wait(mtx).unwrap();
                }
                woken.fetch_add(1, Ordering::Relaxed);
                mtx.unlock().unwrap();
            })
        })
        .collect();

    thread::sleep(Duration::from_millis(50));
    mtx.lock().unwrap();
    ready.store(true, Ordering::Relaxed);
    cv.broadcast().unwrap();
    mtx.unlock().unwrap();

    for w in waiters {
        w.join().unwrap();
    }
    assert_eq!(woken.load(Ordering::Relaxed), 3);
}

#[test]
fn signal_under_lock_is_never_lost() {
    // The signaller runs as soon as it can; the waiter checks the predicate
    // under the same mutex, so either it sees the flag or it is already
    // waiting when the signal arrives.
    for _ in 0..20 {
        let (mtx, cv) = pair();
        let ready = flag();

        let waiter = thread::spawn(move || {
            mtx.lock().unwrap();
            while !ready.load(Ordering::Relaxed) {
                cv.wait(mtx).unwrap();
            }
            mtx.unlock().unwrap();
        });

        mtx.lock().unwrap();
        ready.store(true, Ordering::Relaxed);
        cv.signal().unwrap();
        mtx.unlock().unwrap();

        waiter.join().unwrap();
    }
}

#[test]
fn wait_reports_abandonment_on_reacquire() {
    let (mtx, cv) = pair();
    let ready = flag();

    let waiter = thread::spawn(move || {
        let mut seen = mtx.lock().unwrap();
        if seen.is_abandoned() {
            mtx.mark_consistent().unwrap();
        }
        while !ready.load(Ordering::Relaxed) {
            if cv.wait(mtx).unwrap().is_abandoned() {
                seen = Acquired::Abandoned;
                mtx.mark_consistent().unwrap();
            }
        }
        mtx.unlock().unwrap();
        seen
    });

    thread::sleep(Duration::from_millis(50));
    // The signaller sets the flag, signals and dies still holding the mutex.
    thread::spawn(move || {
        mtx.lock().unwrap();
        ready.store(true, Ordering::Relaxed);
        cv.signal().unwrap();
    })
    .join()
    .unwrap();

    assert_eq!(waiter.join().unwrap(), Acquired::Abandoned);
    assert_eq!(mtx.lock().unwrap(), Acquired::Clean);
    mtx.unlock().unwrap();
}
