//! Producer/consumer over a pipe on the host port.
//!
//! A producer streams numbered lines through a small pipe while a consumer
//! reassembles them. A monitor thread waits on an event source and prints a
//! summary once the consumer broadcasts that it is done. Shared statistics sit
//! behind a kernel mutex.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use rtk::{event_mask, HostPort, Interval, Kernel, KernelConfig, Priority, ThreadConfig};

const LINES: u32 = 8;
const DONE: u32 = 0;

fn main() {
    let kernel = Kernel::builder(HostPort::new())
        .config(
            KernelConfig::builder()
                .name("producer-consumer")
                .time_quantum(4)
                .integrity_checks(true)
                .build(),
        )
        .start()
        .expect("start kernel");

    let pipe = kernel.create_pipe(16).expect("create pipe");
    let stats = kernel.create_mutex();
    let finished = kernel.create_event_source();
    let bytes_moved = Arc::new(AtomicU32::new(0));

    let monitor = {
        let k = kernel.clone();
        let bytes_moved = bytes_moved.clone();
        kernel
            .spawn(ThreadConfig::new("monitor", Priority(30), move || {
                let listener = k.create_listener();
                k.register(finished, listener, event_mask(DONE));
                k.wait_one(event_mask(DONE));
                k.lock_mutex(stats);
                println!(
                    "[{}] consumer done, {} bytes moved",
                    k.system_time(),
                    bytes_moved.load(Ordering::SeqCst)
                );
                k.unlock_mutex(stats);
                k.unregister(finished, listener);
                0
            }))
            .expect("spawn monitor")
    };

    let producer = {
        let k = kernel.clone();
        kernel
            .spawn(ThreadConfig::new("producer", Priority(20), move || {
                for i in 0..LINES {
                    let line = format!("line {i:02}\n");
                    if k.pipe_write(pipe, line.as_bytes(), Interval::INFINITE).is_err() {
                        return 1;
                    }
                    k.sleep(Interval::ticks(3));
                }
                0
            }))
            .expect("spawn producer")
    };

    let consumer = {
        let k = kernel.clone();
        let bytes_moved = bytes_moved.clone();
        kernel
            .spawn(ThreadConfig::new("consumer", Priority(25), move || {
                let mut text = Vec::new();
                let mut lines = 0;
                let mut chunk = [0u8; 5];
                while lines < LINES {
                    match k.pipe_read(pipe, &mut chunk, Interval::ticks(10)) {
                        Ok(n) => {
                            text.extend_from_slice(&chunk[..n]);
                            lines = text.iter().filter(|&&b| b == b'\n').count() as u32;
                            k.lock_mutex(stats);
                            bytes_moved.fetch_add(n as u32, Ordering::SeqCst);
                            k.unlock_mutex(stats);
                        }
                        Err(err) => println!("[{}] consumer: {err}", k.system_time()),
                    }
                }
                print!("{}", String::from_utf8_lossy(&text));
                k.broadcast(finished);
                0
            }))
            .expect("spawn consumer")
    };

    for handle in [consumer, producer, monitor] {
        kernel.wait_for_exit(handle);
    }
    kernel.check_integrity();
    println!("all threads joined at {}", kernel.system_time());
}
