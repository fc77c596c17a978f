// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Processing units and their pad registries.
//
// A node owns an ordered list of named pads and a packet-processing hook.
// Ownership is a tree: the pipeline owns nodes, nodes own pads; pads refer
// back to their node through a weak handle bound when the node joins a
// pipeline, so nothing in the graph owns through a cycle.

use std::sync::{Arc, OnceLock, RwLock, Weak};

use tracing::warn;

use crate::pad::{Pad, PadType, DEFAULT_QUEUE_CAPACITY};
use crate::packet::Packet;

pub(crate) struct PadsInner {
    owner: OnceLock<Weak<dyn Node>>,
    list: RwLock<Vec<(String, Arc<Pad>)>>,
}

impl PadsInner {
    pub(crate) fn owner(&self) -> Option<Arc<dyn Node>> {
        self.owner.get()?.upgrade()
    }
}

/// Ordered registry of named pads, shared between a node, its pads and any
/// worker threads the node spawns.
///
/// Pads are registered before the pipeline starts and the list never
/// shrinks while the pipeline runs. Names are unique within a node; the
/// index of a pad equals its registration position and is stable.
#[derive(Clone)]
pub struct Pads {
    inner: Arc<PadsInner>,
}

impl Pads {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(PadsInner {
                owner: OnceLock::new(),
                list: RwLock::new(Vec::new()),
            }),
        }
    }

    /// Bind the owning node. Called once when the node joins a pipeline.
    pub(crate) fn bind(&self, owner: Weak<dyn Node>) {
        let _ = self.inner.owner.set(owner);
    }

    pub(crate) fn register(&self, name: &str, pad: Pad, ty: PadType) -> Arc<Pad> {
        let mut list = self.inner.list.write().unwrap();
        let pad = Arc::new(pad);
        pad.attach(Arc::downgrade(&self.inner), list.len(), ty);
        list.push((name.to_string(), pad.clone()));
        pad
    }

    /// Look up a pad by name, optionally filtering by direction.
    pub fn find(&self, name: &str, ty: Option<PadType>) -> Option<Arc<Pad>> {
        let list = self.inner.list.read().unwrap();
        list.iter()
            .find(|(n, p)| n == name && ty.map_or(true, |t| p.pad_type() == t))
            .map(|(_, p)| p.clone())
    }

    /// Look up a pad by registration index.
    pub fn at(&self, index: usize) -> Option<Arc<Pad>> {
        let list = self.inner.list.read().unwrap();
        list.get(index).map(|(_, p)| p.clone())
    }

    pub fn len(&self) -> usize {
        self.inner.list.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All pads in registration order.
    pub fn snapshot(&self) -> Vec<Arc<Pad>> {
        let list = self.inner.list.read().unwrap();
        list.iter().map(|(_, p)| p.clone()).collect()
    }

    /// Start every pad in registration order. If any pad fails to start,
    /// the already-started prefix is stopped in reverse and the node is
    /// left fully stopped.
    pub(crate) fn start_all(&self) -> bool {
        let pads = self.snapshot();
        for (i, pad) in pads.iter().enumerate() {
            if !Pad::start(pad) {
                warn!(index = i, "pad failed to start, rolling back");
                for started in pads[..i].iter().rev() {
                    started.stop();
                }
                return false;
            }
        }
        true
    }

    pub(crate) fn stop_all(&self) {
        for pad in self.snapshot() {
            pad.stop();
        }
    }
}

impl Default for Pads {
    fn default() -> Self {
        Self::new()
    }
}

/// A processing unit in the pipeline.
///
/// Implementations store a [`Pads`] registry and expose it through
/// [`Node::pads`]; registration, lookup and lifecycle plumbing are provided
/// here. The `start`/`stop` hooks run per-node resource work (opening
/// files, mapping segments, spawning threads) and default to no-ops.
pub trait Node: Send + Sync + 'static {
    /// The node's pad registry.
    fn pads(&self) -> &Pads;

    /// Per-node resource startup, run by the pipeline after all pad
    /// infrastructure is up.
    fn start(&self) -> bool {
        true
    }

    /// Per-node resource teardown, run by the pipeline before the pad
    /// infrastructure goes down.
    fn stop(&self) {}

    /// Process a packet that arrived on one of this node's input pads.
    /// `timeout_ms` is the budget the original push carried. Returning
    /// `false` reports failure to the caller that cares (a splitter ANDs
    /// results) but never unwinds the pipeline.
    fn process_packet(&self, packet: Arc<dyn Packet>, pad: &Pad, timeout_ms: u64) -> bool {
        let _ = (packet, pad, timeout_ms);
        false
    }

    /// Add a direct input pad.
    fn add_input(&self, name: &str) -> Arc<Pad> {
        self.pads().register(name, Pad::direct(), PadType::Input)
    }

    /// Add a queued input pad with the given bounded capacity.
    fn add_input_queued(&self, name: &str, capacity: usize) -> Arc<Pad> {
        self.pads().register(name, Pad::queued(capacity), PadType::Input)
    }

    /// Add a queued input pad with the default capacity.
    fn add_input_queued_default(&self, name: &str) -> Arc<Pad> {
        self.add_input_queued(name, DEFAULT_QUEUE_CAPACITY)
    }

    /// Add an output pad.
    fn add_output(&self, name: &str) -> Arc<Pad> {
        self.pads().register(name, Pad::direct(), PadType::Output)
    }

    /// Look up a pad by name.
    ///
    /// # Panics
    /// Panics when no pad with that name exists. Pads are guaranteed to
    /// exist after registration, so a miss is a programming error.
    fn pad(&self, name: &str) -> Arc<Pad> {
        match self.pads().find(name, None) {
            Some(pad) => pad,
            None => panic!("no pad named {name:?}"),
        }
    }

    /// Look up a pad by registration index.
    ///
    /// # Panics
    /// Panics when the index is out of range.
    fn pad_at(&self, index: usize) -> Arc<Pad> {
        match self.pads().at(index) {
            Some(pad) => pad,
            None => panic!("no pad at index {index}"),
        }
    }

    /// Push a packet into the named input pad. Returns `false` when no
    /// input pad with that name exists.
    fn push_packet(&self, name: &str, packet: Arc<dyn Packet>, timeout_ms: u64) -> bool {
        match self.pads().find(name, Some(PadType::Input)) {
            Some(pad) => pad.push_packet(packet, timeout_ms),
            None => false,
        }
    }
}
