//! Condition variables, semaphores, thread queues and messages.

mod common;

use common::{kernel, Recorder};
use rtk::{Interval, Msg, Priority, ThreadConfig};

#[test]
fn condvar_signal_delivers_ok_and_broadcast_delivers_reset() {
    let k = kernel();
    let m = k.create_mutex();
    let cv = k.create_condvar();
    let log = Recorder::new();

    let spawn_waiter = |name: &'static str, prio: u8| {
        let (k2, log) = (k.clone(), log.clone());
        k.spawn(ThreadConfig::new(name, Priority(prio), move || {
            k2.lock_mutex(m);
            let msg = k2.cond_wait(cv);
            let me = k2.current_thread();
            let relocked = k2.mutex_owner(m) == Some(me);
            log.push((name, msg, relocked));
            k2.unlock_mutex(m);
            0
        }))
        .expect("spawn waiter")
    };
    let w1 = spawn_waiter("w1", 20);
    let w2 = spawn_waiter("w2", 30);

    k.sleep(Interval::ticks(1));
    assert_eq!(k.mutex_owner(m), None);
    k.cond_signal(cv);
    k.cond_broadcast(cv);

    k.wait_for_exit(w2);
    k.wait_for_exit(w1);
    assert_eq!(
        log.entries(),
        vec![("w2", Msg::Ok, true), ("w1", Msg::Reset, true)]
    );
}

#[test]
fn condvar_timeout_leaves_mutex_unlocked() {
    let k = kernel();
    let m = k.create_mutex();
    let cv = k.create_condvar();

    k.lock_mutex(m);
    assert_eq!(k.cond_wait_timeout(cv, Interval::ticks(5)), Msg::Timeout);
    assert_eq!(k.mutex_owner(m), None);
    assert!(k.try_lock_mutex(m));
    k.unlock_mutex(m);
}

#[test]
fn timed_out_condvar_waiter_is_not_woken_by_a_later_signal() {
    let k = kernel();
    let m = k.create_mutex();
    let cv = k.create_condvar();
    let log = Recorder::new();
    let start = k.system_time();

    let short = {
        let (k2, log) = (k.clone(), log.clone());
        k.spawn(ThreadConfig::new("short", Priority(40), move || {
            k2.lock_mutex(m);
            let msg = k2.cond_wait_timeout(cv, Interval::ticks(5));
            log.push(("short", msg, k2.system_time().wrapping_since(start)));
            // A stale wakeup would cut this sleep short.
            let before = k2.system_time();
            k2.sleep(Interval::ticks(20));
            log.push(("short slept", Msg::Ok, k2.system_time().wrapping_since(before)));
            0
        }))
        .expect("spawn short")
    };
    let patient = {
        let (k2, log) = (k.clone(), log.clone());
        k.spawn(ThreadConfig::new("patient", Priority(30), move || {
            k2.lock_mutex(m);
            let msg = k2.cond_wait(cv);
            log.push(("patient", msg, k2.system_time().wrapping_since(start)));
            k2.unlock_mutex(m);
            0
        }))
        .expect("spawn patient")
    };

    k.sleep(Interval::ticks(10));
    k.cond_signal(cv);
    k.wait_for_exit(patient);
    k.wait_for_exit(short);
    assert_eq!(
        log.entries(),
        vec![
            ("short", Msg::Timeout, Interval::ticks(5)),
            ("patient", Msg::Ok, Interval::ticks(10)),
            ("short slept", Msg::Ok, Interval::ticks(20)),
        ]
    );
    assert_eq!(k.mutex_owner(m), None);
    k.check_integrity();
}

#[test]
fn signalled_waiter_reacquires_before_running() {
    let k = kernel();
    let m = k.create_mutex();
    let cv = k.create_condvar();
    let log = Recorder::new();

    let waiter = {
        let (k2, log) = (k.clone(), log.clone());
        k.spawn(ThreadConfig::new("waiter", Priority(200), move || {
            k2.lock_mutex(m);
            let msg = k2.cond_wait(cv);
            log.push("waiter woke");
            k2.unlock_mutex(m);
            i32::from(msg == Msg::Ok)
        }))
        .expect("spawn waiter")
    };

    // The waiter outranks main, so it is already parked on the condvar.
    k.lock_mutex(m);
    k.cond_signal(cv);
    log.push("main still owns the mutex");
    k.unlock_mutex(m);
    assert_eq!(k.wait_for_exit(waiter), 1);
    assert_eq!(
        log.entries(),
        vec!["main still owns the mutex", "waiter woke"]
    );
}

#[test]
fn semaphore_counts_and_times_out() {
    let k = kernel();
    let sem = k.create_semaphore(2);
    assert_eq!(k.sem_wait(sem), Msg::Ok);
    assert_eq!(k.sem_wait_timeout(sem, Interval::IMMEDIATE), Msg::Ok);
    assert_eq!(k.sem_wait_timeout(sem, Interval::IMMEDIATE), Msg::Timeout);
    assert_eq!(k.semaphore_count(sem), 0);

    let before = k.system_time();
    assert_eq!(k.sem_wait_timeout(sem, Interval::ticks(7)), Msg::Timeout);
    assert_eq!(k.system_time().wrapping_since(before), Interval::ticks(7));
    assert_eq!(k.semaphore_count(sem), 0);

    k.sem_signal(sem);
    k.sem_add_counter(sem, 2);
    assert_eq!(k.semaphore_count(sem), 3);
    k.check_integrity();
}

#[test]
fn timed_out_semaphore_waiter_returns_its_count_and_misses_later_signals() {
    let k = kernel();
    let sem = k.create_semaphore(0);
    let log = Recorder::new();
    let start = k.system_time();

    let short = {
        let (k2, log) = (k.clone(), log.clone());
        k.spawn(ThreadConfig::new("short", Priority(40), move || {
            let msg = k2.sem_wait_timeout(sem, Interval::ticks(5));
            log.push(("short", msg, k2.system_time().wrapping_since(start)));
            let before = k2.system_time();
            k2.sleep(Interval::ticks(20));
            log.push(("short slept", Msg::Ok, k2.system_time().wrapping_since(before)));
            0
        }))
        .expect("spawn short")
    };
    let patient = {
        let (k2, log) = (k.clone(), log.clone());
        k.spawn(ThreadConfig::new("patient", Priority(30), move || {
            let msg = k2.sem_wait(sem);
            log.push(("patient", msg, k2.system_time().wrapping_since(start)));
            0
        }))
        .expect("spawn patient")
    };

    k.sleep(Interval::ticks(10));
    assert_eq!(k.semaphore_count(sem), -1);
    k.sem_signal(sem);
    assert_eq!(k.semaphore_count(sem), 0);
    k.wait_for_exit(patient);
    k.wait_for_exit(short);
    assert_eq!(
        log.entries(),
        vec![
            ("short", Msg::Timeout, Interval::ticks(5)),
            ("patient", Msg::Ok, Interval::ticks(10)),
            ("short slept", Msg::Ok, Interval::ticks(20)),
        ]
    );
    assert_eq!(k.semaphore_count(sem), 0);
    k.check_integrity();
}

#[test]
fn semaphore_wakes_waiters_by_priority_and_reset_fails_them() {
    let k = kernel();
    let sem = k.create_semaphore(0);
    let log = Recorder::new();

    let spawn_waiter = |name: &'static str, prio: u8| {
        let (k2, log) = (k.clone(), log.clone());
        k.spawn(ThreadConfig::new(name, Priority(prio), move || {
            let msg = k2.sem_wait(sem);
            log.push((name, msg));
            0
        }))
        .expect("spawn waiter")
    };
    let handles = [
        spawn_waiter("a", 10),
        spawn_waiter("b", 30),
        spawn_waiter("c", 20),
    ];

    k.sleep(Interval::ticks(1));
    assert_eq!(k.semaphore_count(sem), -3);
    k.sem_signal(sem);
    k.sem_signal(sem);
    k.sem_reset(sem, 5);
    assert_eq!(k.semaphore_count(sem), 5);

    for handle in handles {
        k.wait_for_exit(handle);
    }
    assert_eq!(
        log.entries(),
        vec![("b", Msg::Ok), ("c", Msg::Ok), ("a", Msg::Reset)]
    );
}

#[test]
fn signal_wait_hands_over_in_one_step() {
    let k = kernel();
    let ping = k.create_semaphore(0);
    let pong = k.create_semaphore(0);
    let log = Recorder::new();

    let partner = {
        let (k2, log) = (k.clone(), log.clone());
        k.spawn(ThreadConfig::new("partner", Priority(10), move || {
            for _ in 0..3 {
                k2.sem_wait(ping);
                log.push("pong");
                k2.sem_signal(pong);
            }
            0
        }))
        .expect("spawn partner")
    };

    for _ in 0..3 {
        log.push("ping");
        assert_eq!(k.sem_signal_wait(ping, pong), Msg::Ok);
    }
    k.wait_for_exit(partner);
    assert_eq!(
        log.entries(),
        vec!["ping", "pong", "ping", "pong", "ping", "pong"]
    );
}

#[test]
fn thread_queue_wakes_one_or_all() {
    let k = kernel();
    let queue = k.create_thread_queue();
    let log = Recorder::new();

    let handles: Vec<_> = [("x", 10), ("y", 40), ("z", 20)]
        .into_iter()
        .map(|(name, prio)| {
            let (k2, log) = (k.clone(), log.clone());
            k.spawn(ThreadConfig::new(name, Priority(prio), move || {
                let msg = k2.lock().enqueue_timeout_s(queue, Interval::INFINITE);
                log.push((name, msg));
                0
            }))
            .expect("spawn queued thread")
        })
        .collect();

    k.sleep(Interval::ticks(1));
    {
        let mut sys = k.lock();
        assert!(sys.dequeue_next_i(queue, Msg::Ok));
        sys.dequeue_all_i(queue, Msg::Reset);
        assert!(sys.queue_is_empty(queue));
    }
    assert_eq!(
        k.lock().enqueue_timeout_s(queue, Interval::IMMEDIATE),
        Msg::Timeout
    );

    for handle in handles {
        k.wait_for_exit(handle);
    }
    assert_eq!(
        log.entries(),
        vec![("y", Msg::Ok), ("z", Msg::Reset), ("x", Msg::Reset)]
    );
}

#[test]
fn messages_are_answered_synchronously() {
    let k = kernel();
    let server = {
        let k2 = k.clone();
        k.spawn(ThreadConfig::new("server", Priority(50), move || {
            let mut served = 0;
            while served < 3 {
                let sender = k2.wait_message();
                let value = k2.message_of(sender);
                k2.release_message(sender, value * 2);
                served += 1;
            }
            served
        }))
        .expect("spawn server")
    };

    let target = server.id();
    let replies: Vec<i32> = [21, 5, -4].iter().map(|&v| k.send(target, v)).collect();
    assert_eq!(replies, vec![42, 10, -8]);
    assert_eq!(k.wait_for_exit(server), 3);
}

#[test]
fn senders_are_served_by_priority() {
    let k = kernel();
    let log = Recorder::new();
    let server = {
        let (k2, log) = (k.clone(), log.clone());
        k.spawn(ThreadConfig::new("server", Priority(5), move || {
            for _ in 0..2 {
                let sender = k2.wait_message();
                log.push(k2.message_of(sender));
                k2.release_message(sender, 0);
            }
            0
        }))
        .expect("spawn server")
    };
    let target = server.id();
    let clients: Vec<_> = [(1, 10), (2, 20)]
        .into_iter()
        .map(|(value, prio)| {
            let k2 = k.clone();
            k.spawn(ThreadConfig::new("client", Priority(prio), move || {
                k2.send(target, value)
            }))
            .expect("spawn client")
        })
        .collect();

    for client in clients {
        k.wait_for_exit(client);
    }
    k.wait_for_exit(server);
    assert_eq!(log.entries(), vec![2, 1]);
}
