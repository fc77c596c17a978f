// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Subscriber half of the shared-memory transport demo.
//
// Usage:
//   demo_shm_sub <segment> [seconds]
//
// Attaches to the publisher on <segment> (polling until it appears) and
// prints every counter packet received for [seconds] (default 10). Kill
// and restart the publisher while this runs to watch the subscriber
// reattach to the fresh incarnation.

#[cfg(unix)]
mod demo {
    use std::thread;
    use std::time::Duration;

    use pipeflow::{downcast_packet, Node, Packet, Pipeline, SharedSubscriberNode};

    #[derive(Default)]
    struct CounterPacket {
        value: u64,
    }

    impl Packet for CounterPacket {
        fn deserialize_from(&mut self, buf: &[u8]) -> isize {
            if buf.len() < 8 {
                return -1;
            }
            self.value = u64::from_ne_bytes(buf[..8].try_into().expect("8 bytes"));
            8
        }
    }

    pub fn run() {
        let args: Vec<String> = std::env::args().collect();
        if args.len() < 2 {
            eprintln!("usage: demo_shm_sub <segment> [seconds]");
            std::process::exit(1);
        }
        let segment = &args[1];
        let seconds: u64 = args
            .get(2)
            .map(|s| s.parse().expect("seconds"))
            .unwrap_or(10);

        let pipeline = Pipeline::new();
        let subscriber = pipeline.add_node(SharedSubscriberNode::typed::<CounterPacket>(segment));
        subscriber.add_output("counter");

        let printer = pipeline.add_lambda(|packet, _pad| {
            match downcast_packet::<CounterPacket>(packet) {
                Some(p) => {
                    println!("recv {}", p.value);
                    true
                }
                None => false,
            }
        });
        printer.add_input("input");
        pipeline.connect(&subscriber.pad("counter"), &printer.pad("input"));

        if !pipeline.start() {
            eprintln!("failed to start subscriber on {segment}");
            std::process::exit(1);
        }
        println!("listening on {segment} for {seconds}s");
        thread::sleep(Duration::from_secs(seconds));
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
