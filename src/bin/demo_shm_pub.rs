// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Publisher half of the shared-memory transport demo.
//
// Usage:
//   demo_shm_pub <segment> <count> <interval_ms>
//
// Creates a publisher on <segment> and pushes <count> counter packets,
// one every <interval_ms> milliseconds. Run demo_shm_sub with the same
// segment name in another terminal (or start it later — pushes block
// while the ring is full, bounded by the 200 ms timeout).

#[cfg(unix)]
mod demo {
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    use pipeflow::{Node, Packet, Pipeline, SharedPublisherNode};

    #[derive(Default)]
    struct CounterPacket {
        value: u64,
    }

    impl Packet for CounterPacket {
        fn serialize_to(&self, buf: &mut [u8]) -> isize {
            if buf.len() < 8 {
                return -1;
            }
            buf[..8].copy_from_slice(&self.value.to_ne_bytes());
            8
        }
    }

    pub fn run() {
        let args: Vec<String> = std::env::args().collect();
        if args.len() < 4 {
            eprintln!("usage: demo_shm_pub <segment> <count> <interval_ms>");
            std::process::exit(1);
        }
        let segment = &args[1];
        let count: u64 = args[2].parse().expect("count");
        let interval: u64 = args[3].parse().expect("interval_ms");

        let pipeline = Pipeline::new();
        let publisher = pipeline.add_node(SharedPublisherNode::new(segment));
        let input = publisher.add_channel("counter");

        if !pipeline.start() {
            eprintln!("failed to start publisher on {segment}");
            std::process::exit(1);
        }
        println!("publishing {count} packets to {segment}");

        for value in 0..count {
            let ok = input.push_packet(Arc::new(CounterPacket { value }), 200);
            println!("push {value}: {}", if ok { "ok" } else { "failed" });
            thread::sleep(Duration::from_millis(interval));
        }

        pipeline.stop();
        println!("done");
    }
}

#[cfg(unix)]
fn main() {
    demo::run();
}

#[cfg(not(unix))]
fn main() {
    eprintln!("the shared-memory demo requires a POSIX platform");
}
