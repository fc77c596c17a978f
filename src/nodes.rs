// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Ready-made node flavors: closure-backed nodes, typed dispatch nodes,
// and the splitter.

use std::marker::PhantomData;
use std::sync::Arc;

use crate::node::{Node, Pads};
use crate::packet::{downcast_packet, Packet};
use crate::pad::{Pad, PadType};

// ---------------------------------------------------------------------------
// LambdaNode — inline processing hook
// ---------------------------------------------------------------------------

/// A node whose processing hook is a closure `f(packet, input_pad) -> bool`.
///
/// The lightest way to drop a producer or consumer stage into a graph;
/// state lives in whatever the closure captures.
pub struct LambdaNode {
    pads: Pads,
    func: Box<dyn Fn(Arc<dyn Packet>, &Pad) -> bool + Send + Sync>,
}

impl LambdaNode {
    pub fn new<F>(func: F) -> Self
    where
        F: Fn(Arc<dyn Packet>, &Pad) -> bool + Send + Sync + 'static,
    {
        Self {
            pads: Pads::new(),
            func: Box::new(func),
        }
    }
}

impl Node for LambdaNode {
    fn pads(&self) -> &Pads {
        &self.pads
    }

    fn process_packet(&self, packet: Arc<dyn Packet>, pad: &Pad, _timeout_ms: u64) -> bool {
        (self.func)(packet, pad)
    }
}

// ---------------------------------------------------------------------------
// TypedNode / TypedNode2 — checked-downcast dispatch
// ---------------------------------------------------------------------------

/// A node that only processes packets of one concrete type.
///
/// Every arriving packet is downcast to `T`; a mismatch returns `false`
/// without invoking the handler.
pub struct TypedNode<T: Packet> {
    pads: Pads,
    handler: Box<dyn Fn(Arc<T>, &Pad, u64) -> bool + Send + Sync>,
    _marker: PhantomData<fn(T)>,
}

impl<T: Packet> TypedNode<T> {
    pub fn new<F>(handler: F) -> Self
    where
        F: Fn(Arc<T>, &Pad, u64) -> bool + Send + Sync + 'static,
    {
        Self {
            pads: Pads::new(),
            handler: Box::new(handler),
            _marker: PhantomData,
        }
    }
}

impl<T: Packet> Node for TypedNode<T> {
    fn pads(&self) -> &Pads {
        &self.pads
    }

    fn process_packet(&self, packet: Arc<dyn Packet>, pad: &Pad, timeout_ms: u64) -> bool {
        match downcast_packet::<T>(packet) {
            Some(packet) => (self.handler)(packet, pad, timeout_ms),
            None => false,
        }
    }
}

/// A node that processes two packet types, selected by the arriving input
/// pad: index 0 expects `T1`, index 1 expects `T2`.
///
/// A downcast mismatch, or a packet on any other pad index, returns `false`
/// without dispatch.
pub struct TypedNode2<T1: Packet, T2: Packet> {
    pads: Pads,
    first: Box<dyn Fn(Arc<T1>, &Pad, u64) -> bool + Send + Sync>,
    second: Box<dyn Fn(Arc<T2>, &Pad, u64) -> bool + Send + Sync>,
    _marker: PhantomData<fn(T1, T2)>,
}

impl<T1: Packet, T2: Packet> TypedNode2<T1, T2> {
    pub fn new<F1, F2>(first: F1, second: F2) -> Self
    where
        F1: Fn(Arc<T1>, &Pad, u64) -> bool + Send + Sync + 'static,
        F2: Fn(Arc<T2>, &Pad, u64) -> bool + Send + Sync + 'static,
    {
        Self {
            pads: Pads::new(),
            first: Box::new(first),
            second: Box::new(second),
            _marker: PhantomData,
        }
    }
}

impl<T1: Packet, T2: Packet> Node for TypedNode2<T1, T2> {
    fn pads(&self) -> &Pads {
        &self.pads
    }

    fn process_packet(&self, packet: Arc<dyn Packet>, pad: &Pad, timeout_ms: u64) -> bool {
        match pad.index() {
            0 => match downcast_packet::<T1>(packet) {
                Some(packet) => (self.first)(packet, pad, timeout_ms),
                None => false,
            },
            1 => match downcast_packet::<T2>(packet) {
                Some(packet) => (self.second)(packet, pad, timeout_ms),
                None => false,
            },
            _ => false,
        }
    }
}

// ---------------------------------------------------------------------------
// Splitter — fan-out
// ---------------------------------------------------------------------------

/// A node that forwards every packet arriving on its input pad to all of
/// its output pads, in registration order.
///
/// Packets are not cloned: every receiver observes the same shared packet.
/// A failed push to one output does not stop the others; the result is the
/// AND of all pushes.
pub struct Splitter {
    pads: Pads,
}

impl Splitter {
    /// A splitter with a direct input pad named `input` and `outputs`
    /// output pads named `output_1` .. `output_N`.
    pub fn new(outputs: usize) -> Self {
        let splitter = Self { pads: Pads::new() };
        splitter.add_input("input");
        splitter.add_output_row(outputs);
        splitter
    }

    /// A splitter whose input pad buffers through a bounded queue.
    pub fn with_queued_input(outputs: usize, capacity: usize) -> Self {
        let splitter = Self { pads: Pads::new() };
        splitter.add_input_queued("input", capacity);
        splitter.add_output_row(outputs);
        splitter
    }

    fn add_output_row(&self, outputs: usize) {
        for i in 1..=outputs {
            self.add_output(&format!("output_{i}"));
        }
    }
}

impl Node for Splitter {
    fn pads(&self) -> &Pads {
        &self.pads
    }

    fn process_packet(&self, packet: Arc<dyn Packet>, _pad: &Pad, _timeout_ms: u64) -> bool {
        let mut result = true;
        for pad in self.pads.snapshot() {
            if pad.pad_type() == PadType::Output {
                result = pad.push_packet(packet.clone(), 0) && result;
            }
        }
        result
    }
}
