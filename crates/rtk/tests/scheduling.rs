//! Ready-list ordering, preemption, round robin and sleeps.

mod common;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use common::{kernel, ticked_kernel, Recorder};
use rtk::{Interval, KernelConfig, Priority, SysTime, ThreadConfig};

fn completion_order(prios: &[u8]) -> Vec<u8> {
    let k = kernel();
    let log = Recorder::new();
    let handles: Vec<_> = prios
        .iter()
        .map(|&p| {
            let log = log.clone();
            k.spawn(ThreadConfig::new("worker", Priority(p), move || {
                log.push(p);
                0
            }))
            .expect("spawn worker")
        })
        .collect();
    for handle in handles {
        k.wait_for_exit(handle);
    }
    log.entries()
}

#[test]
fn threads_run_in_priority_order_regardless_of_creation_order() {
    assert_eq!(completion_order(&[1, 2, 3, 4, 5]), vec![5, 4, 3, 2, 1]);
    assert_eq!(completion_order(&[5, 4, 3, 2, 1]), vec![5, 4, 3, 2, 1]);
    assert_eq!(completion_order(&[3, 1, 5, 2, 4]), vec![5, 4, 3, 2, 1]);
}

#[test]
fn equal_priorities_run_in_creation_order() {
    let k = kernel();
    let log = Recorder::new();
    let handles: Vec<_> = (0..4)
        .map(|i| {
            let log = log.clone();
            k.spawn(ThreadConfig::new("peer", Priority(10), move || {
                log.push(i);
                0
            }))
            .expect("spawn peer")
        })
        .collect();
    for handle in handles {
        k.wait_for_exit(handle);
    }
    assert_eq!(log.entries(), vec![0, 1, 2, 3]);
}

#[test]
fn higher_priority_thread_preempts_its_creator() {
    let k = kernel();
    let log = Recorder::new();
    let child_log = log.clone();
    let handle = k
        .spawn(ThreadConfig::new("urgent", Priority(200), move || {
            child_log.push("child");
            0
        }))
        .expect("spawn urgent thread");
    log.push("main");
    assert_eq!(k.wait_for_exit(handle), 0);
    assert_eq!(log.entries(), vec!["child", "main"]);
}

#[test]
fn lowering_priority_lets_ready_threads_run() {
    let k = kernel();
    let log = Recorder::new();
    let child_log = log.clone();
    let handle = k
        .spawn(ThreadConfig::new("mid", Priority(50), move || {
            child_log.push("mid");
            0
        }))
        .expect("spawn mid thread");

    assert_eq!(k.set_priority(Priority(20)), Priority::NORMAL);
    log.push("main");
    assert_eq!(k.set_priority(Priority::NORMAL), Priority(20));
    k.wait_for_exit(handle);
    assert_eq!(log.entries(), vec!["mid", "main"]);
}

#[test]
fn sleepers_wake_in_deadline_order() {
    let k = kernel();
    let log = Recorder::new();
    let spawn_sleeper = |name: &'static str, ticks: u32| {
        let (k2, log) = (k.clone(), log.clone());
        k.spawn(ThreadConfig::new(name, Priority(10), move || {
            k2.sleep(Interval::ticks(ticks));
            log.push(name);
            0
        }))
        .expect("spawn sleeper")
    };
    let slow = spawn_sleeper("slow", 30);
    let fast = spawn_sleeper("fast", 10);

    k.wait_for_exit(slow);
    k.wait_for_exit(fast);
    assert_eq!(log.entries(), vec!["fast", "slow"]);
    assert_eq!(k.system_time(), SysTime(30));
}

#[test]
fn sleep_until_absolute_time() {
    let k = kernel();
    k.sleep(Interval::ticks(4));
    k.sleep_until(SysTime(25));
    assert_eq!(k.system_time(), SysTime(25));
    k.sleep(Interval::IMMEDIATE);
    assert_eq!(k.system_time(), SysTime(25));
}

#[test]
fn yield_hands_over_to_equal_priority_peer() {
    let k = kernel();
    let log = Recorder::new();
    let peer_log = log.clone();
    let handle = k
        .spawn(ThreadConfig::new("peer", Priority::NORMAL, move || {
            peer_log.push("peer");
            0
        }))
        .expect("spawn peer");
    log.push("before yield");
    k.yield_now();
    log.push("after yield");
    k.wait_for_exit(handle);
    assert_eq!(log.entries(), vec!["before yield", "peer", "after yield"]);
}

fn interleaving(quantum: u8) -> Vec<(&'static str, u32)> {
    let k = ticked_kernel(
        KernelConfig::builder()
            .time_quantum(quantum)
            .integrity_checks(true)
            .build(),
    );
    let log = Recorder::new();
    let spawn_spinner = |name: &'static str| {
        let (k2, log) = (k.clone(), log.clone());
        k.spawn(ThreadConfig::new(name, Priority(10), move || {
            for i in 0..4 {
                log.push((name, i));
                k2.tick();
            }
            0
        }))
        .expect("spawn spinner")
    };
    let a = spawn_spinner("a");
    let b = spawn_spinner("b");
    k.wait_for_exit(a);
    k.wait_for_exit(b);
    log.entries()
}

#[test]
fn round_robin_rotates_on_quantum_exhaustion() {
    assert_eq!(
        interleaving(2),
        vec![
            ("a", 0),
            ("a", 1),
            ("b", 0),
            ("b", 1),
            ("a", 2),
            ("a", 3),
            ("b", 2),
            ("b", 3),
        ]
    );
}

#[test]
fn without_quantum_equal_priorities_run_to_completion() {
    assert_eq!(
        interleaving(0),
        vec![
            ("a", 0),
            ("a", 1),
            ("a", 2),
            ("a", 3),
            ("b", 0),
            ("b", 1),
            ("b", 2),
            ("b", 3),
        ]
    );
}

#[test]
fn tick_from_interrupt_thread_wakes_sleeper() {
    let k = ticked_kernel(KernelConfig::default());
    let done = Arc::new(AtomicBool::new(false));
    let ticker = {
        let (k, done) = (k.clone(), done.clone());
        std::thread::spawn(move || {
            while !done.load(Ordering::SeqCst) {
                k.tick();
                std::thread::sleep(Duration::from_millis(1));
            }
        })
    };
    let start = k.system_time();
    k.sleep(Interval::ticks(5));
    let slept = k.system_time().wrapping_since(start);
    done.store(true, Ordering::SeqCst);
    ticker.join().expect("ticker thread");
    assert!(slept >= Interval::ticks(5), "woke after {slept:?}");
}
