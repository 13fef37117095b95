//! Priority inheritance, mutual exclusion and mutex misuse.

mod common;

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use common::{kernel, Recorder};
use rtk::{Interval, Priority, ThreadConfig};

#[test]
fn owner_inherits_waiter_priority_and_restores_it_on_unlock() {
    let k = kernel();
    let m = k.create_mutex();
    let log = Recorder::new();

    let low = {
        let (k, log) = (k.clone(), log.clone());
        k.clone()
            .spawn(ThreadConfig::new("low", Priority(10), move || {
                k.lock_mutex(m);
                log.push("low locked".to_string());
                k.sleep(Interval::ticks(10));
                let me = k.current_thread();
                let boosted = k.thread_info(me).expect("low info").priority;
                log.push(format!("low running at {boosted}"));
                k.unlock_mutex(m);
                let restored = k.thread_info(me).expect("low info").priority;
                log.push(format!("low back to {restored}"));
                0
            }))
            .expect("spawn low")
    };

    // Let `low` take the mutex and go to sleep holding it.
    k.sleep(Interval::ticks(1));
    assert_eq!(k.mutex_owner(m), Some(low.id()));

    let high = {
        let (k, log) = (k.clone(), log.clone());
        k.clone()
            .spawn(ThreadConfig::new("high", Priority(100), move || {
                k.lock_mutex(m);
                log.push("high locked".to_string());
                k.unlock_mutex(m);
                0
            }))
            .expect("spawn high")
    };

    k.wait_for_exit(high);
    k.wait_for_exit(low);
    assert_eq!(
        log.entries(),
        vec![
            "low locked".to_string(),
            "low running at 100".to_string(),
            "high locked".to_string(),
            "low back to 10".to_string(),
        ]
    );
    assert_eq!(k.mutex_owner(m), None);
}

#[test]
fn boost_propagates_through_a_chain_of_owners() {
    let k = kernel();
    let (m1, m2) = (k.create_mutex(), k.create_mutex());
    let seen = Recorder::new();

    let low = {
        let (k, seen) = (k.clone(), seen.clone());
        k.clone()
            .spawn(ThreadConfig::new("low", Priority(10), move || {
                k.lock_mutex(m1);
                k.sleep(Interval::ticks(10));
                let me = k.current_thread();
                seen.push(k.thread_info(me).expect("low info").priority);
                k.unlock_mutex(m1);
                0
            }))
            .expect("spawn low")
    };
    k.sleep(Interval::ticks(1));

    let mid = {
        let k2 = k.clone();
        k.spawn(ThreadConfig::new("mid", Priority(50), move || {
            k2.lock_mutex(m2);
            k2.lock_mutex(m1);
            k2.unlock_mutex(m1);
            k2.unlock_mutex(m2);
            0
        }))
        .expect("spawn mid")
    };
    k.sleep(Interval::ticks(1));

    let high = {
        let k2 = k.clone();
        k.spawn(ThreadConfig::new("high", Priority(100), move || {
            k2.lock_mutex(m2);
            k2.unlock_mutex(m2);
            0
        }))
        .expect("spawn high")
    };

    k.wait_for_exit(high);
    k.wait_for_exit(mid);
    k.wait_for_exit(low);
    assert_eq!(seen.entries(), vec![Priority(100)]);
}

/// Effective and base priority of the calling thread.
fn own_priorities(k: &common::TestKernel) -> (Priority, Priority) {
    let info = k.thread_info(k.current_thread()).expect("own info");
    (info.priority, info.real_priority)
}

/// Spawns `low` at priority 10 holding `m`, then `high` at 100 blocking on
/// `m`. `low` runs `boosted` once `high` has boosted it.
fn boosted_owner(
    k: &common::TestKernel,
    m: rtk::Mutex,
    log: &Recorder<(&'static str, Priority, Priority)>,
    boosted: impl FnOnce(&common::TestKernel) + Send + 'static,
) {
    let low = {
        let k2 = k.clone();
        k.spawn(ThreadConfig::new("low", Priority(10), move || {
            k2.lock_mutex(m);
            k2.sleep(Interval::ticks(10));
            boosted(&k2);
            0
        }))
        .expect("spawn low")
    };
    k.sleep(Interval::ticks(1));

    let high = {
        let (k2, log) = (k.clone(), log.clone());
        k.spawn(ThreadConfig::new("high", Priority(100), move || {
            k2.lock_mutex(m);
            let (prio, real) = own_priorities(&k2);
            log.push(("high locked", prio, real));
            k2.unlock_mutex(m);
            0
        }))
        .expect("spawn high")
    };
    k.wait_for_exit(high);
    k.wait_for_exit(low);
}

#[test]
fn priority_changes_while_boosted_keep_the_inherited_priority() {
    let k = kernel();
    let m = k.create_mutex();
    let log = Recorder::new();

    let log2 = log.clone();
    boosted_owner(&k, m, &log, move |k| {
        assert_eq!(k.set_priority(Priority(5)), Priority(10));
        let (prio, real) = own_priorities(k);
        log2.push(("after lower", prio, real));

        assert_eq!(k.set_priority(Priority(150)), Priority(5));
        let (prio, real) = own_priorities(k);
        log2.push(("after raise", prio, real));

        k.unlock_mutex(m);
        let (prio, real) = own_priorities(k);
        log2.push(("after unlock", prio, real));
    });

    assert_eq!(
        log.entries(),
        vec![
            ("after lower", Priority(100), Priority(5)),
            ("after raise", Priority(150), Priority(150)),
            ("after unlock", Priority(150), Priority(150)),
            ("high locked", Priority(100), Priority(100)),
        ]
    );
}

#[test]
fn unlock_drops_a_boosted_owner_to_its_latest_base_priority() {
    let k = kernel();
    let m = k.create_mutex();
    let log = Recorder::new();

    let log2 = log.clone();
    boosted_owner(&k, m, &log, move |k| {
        k.set_priority(Priority(5));
        assert_eq!(k.set_priority(Priority(7)), Priority(5));
        let (prio, real) = own_priorities(k);
        log2.push(("after lower", prio, real));

        k.unlock_mutex(m);
        let (prio, real) = own_priorities(k);
        log2.push(("after unlock", prio, real));
    });

    // `high` takes the mutex and preempts the unboosted owner at once.
    assert_eq!(
        log.entries(),
        vec![
            ("after lower", Priority(100), Priority(7)),
            ("high locked", Priority(100), Priority(100)),
            ("after unlock", Priority(7), Priority(7)),
        ]
    );
    assert_eq!(k.mutex_owner(m), None);
}

#[test]
fn unboosted_owner_may_drop_below_a_queued_waiter() {
    let k = kernel();
    let m = k.create_mutex();
    let order = Recorder::new();
    let main = k.current_thread();

    k.lock_mutex(m);
    let spawn_contender = |name: &'static str, prio: u8| {
        let (k2, order) = (k.clone(), order.clone());
        k.spawn(ThreadConfig::new(name, Priority(prio), move || {
            k2.lock_mutex(m);
            order.push(name);
            k2.unlock_mutex(m);
            0
        }))
        .expect("spawn contender")
    };

    // Below main, so it only queues once main sleeps, without boosting it.
    let waiter = spawn_contender("waiter", 40);
    k.sleep(Interval::ticks(1));
    assert_eq!(own_priorities(&k), (Priority::NORMAL, Priority::NORMAL));

    k.set_priority(Priority(20));
    assert_eq!(own_priorities(&k), (Priority(20), Priority(20)));
    // Still holding the mutex below its waiter across a switch.
    k.sleep(Interval::ticks(1));
    assert_eq!(k.mutex_owner(m), Some(main));

    // A new contender re-boosts the owner.
    let contender = spawn_contender("contender", 60);
    assert_eq!(own_priorities(&k), (Priority(60), Priority(20)));

    k.unlock_mutex(m);
    assert_eq!(own_priorities(&k), (Priority(20), Priority(20)));
    k.wait_for_exit(contender);
    k.wait_for_exit(waiter);
    assert_eq!(order.entries(), vec!["contender", "waiter"]);
}

#[test]
fn mutex_serializes_read_modify_write() {
    let k = kernel();
    let m = k.create_mutex();
    let counter = Arc::new(AtomicU32::new(0));
    let order = Recorder::new();

    let handles: Vec<_> = (0..3)
        .map(|i| {
            let (k2, counter, order) = (k.clone(), counter.clone(), order.clone());
            k.spawn(ThreadConfig::new("adder", Priority(10), move || {
                k2.lock_mutex(m);
                order.push(i);
                let value = counter.load(Ordering::SeqCst);
                k2.sleep(Interval::ticks(2));
                counter.store(value + 1, Ordering::SeqCst);
                k2.unlock_mutex(m);
                0
            }))
            .expect("spawn adder")
        })
        .collect();
    for handle in handles {
        k.wait_for_exit(handle);
    }
    assert_eq!(counter.load(Ordering::SeqCst), 3);
    assert_eq!(order.entries(), vec![0, 1, 2]);
}

#[test]
fn try_lock_and_unlock_all() {
    let k = kernel();
    let (a, b) = (k.create_mutex(), k.create_mutex());
    assert!(k.try_lock_mutex(a));
    assert!(k.try_lock_mutex(b));

    let rival = {
        let k2 = k.clone();
        k.spawn(ThreadConfig::new("rival", Priority(200), move || {
            i32::from(k2.try_lock_mutex(a))
        }))
        .expect("spawn rival")
    };
    assert_eq!(k.wait_for_exit(rival), 0);

    k.unlock_all_mutexes();
    assert_eq!(k.mutex_owner(a), None);
    assert_eq!(k.mutex_owner(b), None);
    k.check_integrity();
}

#[test]
#[should_panic(expected = "kernel halted")]
fn unlocking_out_of_order_halts() {
    let k = kernel();
    let (a, b) = (k.create_mutex(), k.create_mutex());
    k.lock_mutex(a);
    k.lock_mutex(b);
    k.unlock_mutex(a);
}

#[test]
#[should_panic(expected = "kernel halted")]
fn relocking_an_owned_mutex_halts() {
    let k = kernel();
    let m = k.create_mutex();
    k.lock_mutex(m);
    k.lock_mutex(m);
}
