// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Queued-pad behavior: FIFO ordering, bounded-queue backpressure,
// lifecycle gating.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use pipeflow::{downcast_packet, Node, Packet, Pipeline};

struct SeqPacket(u32);
impl Packet for SeqPacket {}

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

// Packets pushed in order are dispatched in the same order.
#[test]
fn fifo_per_pad() {
    let pipeline = Pipeline::new();
    let order = Arc::new(Mutex::new(Vec::new()));

    let o = Arc::clone(&order);
    let consumer = pipeline.add_lambda(move |packet, _pad| {
        match downcast_packet::<SeqPacket>(packet) {
            Some(p) => {
                o.lock().unwrap().push(p.0);
                true
            }
            None => false,
        }
    });
    consumer.add_input_queued("input", 4);

    assert!(pipeline.start());
    let input = consumer.pad("input");
    for i in 0..20u32 {
        assert!(input.push_packet(Arc::new(SeqPacket(i)), 1000));
    }

    assert!(wait_until(2000, || order.lock().unwrap().len() == 20));
    let order = order.lock().unwrap();
    assert_eq!(*order, (0..20).collect::<Vec<_>>());
}

// A full queue with a stalled consumer rejects the push once the timeout
// expires, without losing anything already queued.
#[test]
fn full_queue_push_times_out() {
    let pipeline = Pipeline::new();
    let seen = Arc::new(AtomicUsize::new(0));

    let s = Arc::clone(&seen);
    let consumer = pipeline.add_lambda(move |_packet, _pad| {
        thread::sleep(Duration::from_millis(300));
        s.fetch_add(1, Ordering::SeqCst);
        true
    });
    consumer.add_input_queued("input", 1);

    assert!(pipeline.start());
    let input = consumer.pad("input");

    // First packet is picked up by the worker, second fills the queue.
    assert!(input.push_packet(Arc::new(SeqPacket(0)), 1000));
    assert!(input.push_packet(Arc::new(SeqPacket(1)), 1000));
    assert!(!input.push_packet(Arc::new(SeqPacket(2)), 50));

    assert!(wait_until(2000, || seen.load(Ordering::SeqCst) == 2));
}

// Space freed by the worker wakes a blocked producer before its timeout.
#[test]
fn blocked_producer_wakes_on_free_slot() {
    let pipeline = Pipeline::new();
    let seen = Arc::new(AtomicUsize::new(0));

    let s = Arc::clone(&seen);
    let consumer = pipeline.add_lambda(move |_packet, _pad| {
        thread::sleep(Duration::from_millis(50));
        s.fetch_add(1, Ordering::SeqCst);
        true
    });
    consumer.add_input_queued("input", 1);

    assert!(pipeline.start());
    let input = consumer.pad("input");
    for i in 0..5u32 {
        // Each push may have to wait for the previous dispatch to finish.
        assert!(input.push_packet(Arc::new(SeqPacket(i)), 2000));
    }
    assert!(wait_until(2000, || seen.load(Ordering::SeqCst) == 5));
}

// An unstarted queued pad rejects pushes immediately.
#[test]
fn unstarted_queue_rejects() {
    let pipeline = Pipeline::new();
    let consumer = pipeline.add_lambda(|_packet, _pad| true);
    consumer.add_input_queued("input", 4);

    assert!(!consumer.pad("input").push_packet(Arc::new(SeqPacket(0)), 10));
}

// Stop joins the worker after the backlog has been dispatched.
#[test]
fn stop_drains_backlog() {
    let pipeline = Pipeline::new();
    let seen = Arc::new(AtomicUsize::new(0));

    let s = Arc::clone(&seen);
    let consumer = pipeline.add_lambda(move |_packet, _pad| {
        thread::sleep(Duration::from_millis(20));
        s.fetch_add(1, Ordering::SeqCst);
        true
    });
    consumer.add_input_queued("input", 4);

    assert!(pipeline.start());
    let input = consumer.pad("input");
    for i in 0..3u32 {
        assert!(input.push_packet(Arc::new(SeqPacket(i)), 1000));
    }
    pipeline.stop();
    assert_eq!(seen.load(Ordering::SeqCst), 3);
}

// Pushes after stop fail.
#[test]
fn push_after_stop_fails() {
    let pipeline = Pipeline::new();
    let consumer = pipeline.add_lambda(|_packet, _pad| true);
    consumer.add_input_queued("input", 4);

    assert!(pipeline.start());
    pipeline.stop();
    assert!(!consumer.pad("input").push_packet(Arc::new(SeqPacket(0)), 10));
}
