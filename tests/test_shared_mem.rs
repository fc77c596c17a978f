// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Shared-memory transport tests: round-trips through the slot ring,
// channel routing, attach/reattach recovery, sustained zero-drop load.

#![cfg(unix)]

use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use pipeflow::{downcast_packet, Node, Packet, Pipeline, SharedPublisherNode, SharedSubscriberNode};

static COUNTER: AtomicUsize = AtomicUsize::new(0);

fn unique_name(tag: &str) -> String {
    let n = COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("pipeflow_{tag}_{n}_{}", std::process::id())
}

fn wait_until(deadline_ms: u64, mut done: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_millis(deadline_ms);
    while Instant::now() < deadline {
        if done() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    done()
}

#[derive(Default)]
struct PacketA {
    data: i32,
}

impl PacketA {
    fn new(data: i32) -> Self {
        Self { data }
    }
}

impl Packet for PacketA {
    fn serialize_to(&self, buf: &mut [u8]) -> isize {
        if buf.len() < 4 {
            return -1;
        }
        buf[..4].copy_from_slice(&self.data.to_ne_bytes());
        4
    }

    fn deserialize_from(&mut self, buf: &[u8]) -> isize {
        if buf.len() < 4 {
            return -1;
        }
        self.data = i32::from_ne_bytes(buf[..4].try_into().unwrap());
        4
    }
}

/// Subscriber pipeline with one output channel wired to a summing consumer.
fn summing_subscriber(
    segment: &str,
    channel: &str,
) -> (Pipeline, Arc<AtomicI64>, Arc<AtomicUsize>) {
    let pipeline = Pipeline::new();
    let sum = Arc::new(AtomicI64::new(0));
    let count = Arc::new(AtomicUsize::new(0));

    let subscriber = pipeline.add_node(SharedSubscriberNode::typed::<PacketA>(segment));
    subscriber.add_output(channel);

    let s = Arc::clone(&sum);
    let c = Arc::clone(&count);
    let consumer = pipeline.add_lambda(move |packet, _pad| {
        match downcast_packet::<PacketA>(packet) {
            Some(p) => {
                s.fetch_add(p.data as i64, Ordering::SeqCst);
                c.fetch_add(1, Ordering::SeqCst);
                true
            }
            None => false,
        }
    });
    consumer.add_input("input");
    pipeline.connect(&subscriber.pad(channel), &consumer.pad("input"));

    (pipeline, sum, count)
}

// A tiny segment with a ring of 8 carries a thousand packets across intact.
#[test]
fn round_trip_sum() {
    let segment = unique_name("roundtrip");

    let (sub_pipeline, sum, count) = summing_subscriber(&segment, "channel1");
    assert!(sub_pipeline.start());

    let pub_pipeline = Pipeline::new();
    let publisher = pub_pipeline.add_node(SharedPublisherNode::with_config(&segment, 512, 8));
    let input = publisher.add_channel("channel1");
    assert!(pub_pipeline.start());

    for i in 1..=999 {
        assert!(input.push_packet(Arc::new(PacketA::new(i)), 200), "push {i}");
    }

    assert!(wait_until(5000, || count.load(Ordering::SeqCst) == 999));
    assert_eq!(sum.load(Ordering::SeqCst), 499_500);

    pub_pipeline.stop();
    sub_pipeline.stop();
}

// Records carry their channel id; the subscriber routes each to the
// matching output pad.
#[test]
fn routes_by_channel_index() {
    let segment = unique_name("channels");

    let sub_pipeline = Pipeline::new();
    let subscriber = sub_pipeline.add_node(SharedSubscriberNode::typed::<PacketA>(&segment));
    subscriber.add_output("even");
    subscriber.add_output("odd");

    let sums: Vec<Arc<AtomicI64>> = (0..2).map(|_| Arc::new(AtomicI64::new(0))).collect();
    let counts: Vec<Arc<AtomicUsize>> = (0..2).map(|_| Arc::new(AtomicUsize::new(0))).collect();
    for (i, channel) in ["even", "odd"].iter().enumerate() {
        let s = Arc::clone(&sums[i]);
        let c = Arc::clone(&counts[i]);
        let consumer = sub_pipeline.add_lambda(move |packet, _pad| {
            match downcast_packet::<PacketA>(packet) {
                Some(p) => {
                    s.fetch_add(p.data as i64, Ordering::SeqCst);
                    c.fetch_add(1, Ordering::SeqCst);
                    true
                }
                None => false,
            }
        });
        consumer.add_input("input");
        sub_pipeline.connect(&subscriber.pad(channel), &consumer.pad("input"));
    }
    assert!(sub_pipeline.start());

    let pub_pipeline = Pipeline::new();
    let publisher = pub_pipeline.add_node(SharedPublisherNode::with_config(&segment, 4096, 8));
    let even = publisher.add_channel("even");
    let odd = publisher.add_channel("odd");
    assert!(pub_pipeline.start());

    for i in 1..=100 {
        let target = if i % 2 == 0 { &even } else { &odd };
        assert!(target.push_packet(Arc::new(PacketA::new(i)), 200), "push {i}");
    }

    assert!(wait_until(5000, || {
        counts[0].load(Ordering::SeqCst) + counts[1].load(Ordering::SeqCst) == 100
    }));
    assert_eq!(counts[0].load(Ordering::SeqCst), 50);
    assert_eq!(counts[1].load(Ordering::SeqCst), 50);
    assert_eq!(sums[0].load(Ordering::SeqCst), (2..=100).step_by(2).sum::<i64>());
    assert_eq!(sums[1].load(Ordering::SeqCst), (1..=99).step_by(2).sum::<i64>());

    pub_pipeline.stop();
    sub_pipeline.stop();
}

// A subscriber started before any publisher exists polls until the
// segment appears, then drains what accumulated in the ring.
#[test]
fn subscriber_attaches_late() {
    let segment = unique_name("late");

    let (sub_pipeline, _sum, count) = summing_subscriber(&segment, "channel1");
    assert!(sub_pipeline.start());
    thread::sleep(Duration::from_millis(150)); // let it poll at least once

    let pub_pipeline = Pipeline::new();
    let publisher = pub_pipeline.add_node(SharedPublisherNode::with_config(&segment, 4096, 8));
    let input = publisher.add_channel("channel1");
    assert!(pub_pipeline.start());

    for i in 1..=5 {
        assert!(input.push_packet(Arc::new(PacketA::new(i)), 500), "push {i}");
    }

    assert!(wait_until(3000, || count.load(Ordering::SeqCst) == 5));

    pub_pipeline.stop();
    sub_pipeline.stop();
}

// A publisher restart creates a fresh incarnation under the same name and
// the subscriber follows it without intervention.
#[test]
fn subscriber_follows_publisher_restart() {
    let segment = unique_name("restart");

    let (sub_pipeline, sum, count) = summing_subscriber(&segment, "channel1");
    assert!(sub_pipeline.start());

    let first = Pipeline::new();
    let publisher = first.add_node(SharedPublisherNode::with_config(&segment, 4096, 8));
    let input = publisher.add_channel("channel1");
    assert!(first.start());
    for i in 1..=3 {
        assert!(input.push_packet(Arc::new(PacketA::new(i)), 500));
    }
    assert!(wait_until(3000, || count.load(Ordering::SeqCst) == 3));
    first.stop();

    let second = Pipeline::new();
    let publisher = second.add_node(SharedPublisherNode::with_config(&segment, 4096, 8));
    let input = publisher.add_channel("channel1");
    assert!(second.start());

    // The subscriber needs a reattach cycle or two before pushes land.
    assert!(wait_until(5000, || {
        let _ = input.push_packet(Arc::new(PacketA::new(10)), 200);
        count.load(Ordering::SeqCst) > 3
    }));
    assert!(sum.load(Ordering::SeqCst) >= 1 + 2 + 3 + 10);

    second.stop();
    sub_pipeline.stop();
}

// Every packet of a long run arrives; throughput is printed for reference.
#[test]
fn sustained_zero_drops() {
    let segment = unique_name("sustained");
    const TOTAL: usize = 300_000;

    let (sub_pipeline, _sum, count) = summing_subscriber(&segment, "channel1");
    assert!(sub_pipeline.start());

    let pub_pipeline = Pipeline::new();
    let publisher = pub_pipeline.add_node(SharedPublisherNode::with_config(&segment, 2048, 64));
    let input = publisher.add_channel("channel1");
    assert!(pub_pipeline.start());

    let started = Instant::now();
    for i in 0..TOTAL {
        assert!(input.push_packet(Arc::new(PacketA::new(1)), 200), "push {i}");
    }
    assert!(wait_until(30_000, || count.load(Ordering::SeqCst) == TOTAL));
    let elapsed = started.elapsed();

    assert_eq!(count.load(Ordering::SeqCst), TOTAL);
    println!(
        "sustained: {TOTAL} packets in {:?} ({:.0} pkt/s)",
        elapsed,
        TOTAL as f64 / elapsed.as_secs_f64()
    );

    pub_pipeline.stop();
    sub_pipeline.stop();
}
