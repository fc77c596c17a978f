// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Pipeline: lifecycle-managed collection of nodes.
//
// Startup runs in two phases — pad infrastructure for every node first,
// user resource hooks second — and each phase rolls back in reverse on
// failure, so a half-started graph never observes packets.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex};

use tracing::{debug, warn};

use crate::node::Node;
use crate::nodes::LambdaNode;
use crate::pad::Pad;
use crate::packet::Packet;

const IDLE: u8 = 0;
const STARTING: u8 = 1;
const RUNNING: u8 = 2;
const STOPPING: u8 = 3;

/// An ordered collection of nodes started and stopped as a unit.
///
/// The pipeline owns its nodes; handles returned by [`Pipeline::add_node`]
/// are shared references. Dropping the pipeline stops it.
pub struct Pipeline {
    nodes: Mutex<Vec<Arc<dyn Node>>>,
    state: AtomicU8,
}

impl Pipeline {
    pub fn new() -> Self {
        Self {
            nodes: Mutex::new(Vec::new()),
            state: AtomicU8::new(IDLE),
        }
    }

    /// Add a node to the pipeline and return a shared handle to it.
    /// Binds the node as the owner of its pads.
    pub fn add_node<N: Node>(&self, node: N) -> Arc<N> {
        let node = Arc::new(node);
        let as_dyn: Arc<dyn Node> = node.clone();
        as_dyn.pads().bind(Arc::downgrade(&as_dyn));
        self.nodes.lock().unwrap().push(as_dyn);
        node
    }

    /// Add a closure-backed node; see [`LambdaNode`].
    pub fn add_lambda<F>(&self, func: F) -> Arc<LambdaNode>
    where
        F: Fn(Arc<dyn Packet>, &Pad) -> bool + Send + Sync + 'static,
    {
        self.add_node(LambdaNode::new(func))
    }

    /// Link an output pad to an input pad.
    pub fn connect(&self, output: &Arc<Pad>, input: &Arc<Pad>) {
        output.link_to(input);
    }

    /// Start every node, infrastructure first.
    ///
    /// Phase one starts each node's pads in insertion order; phase two runs
    /// the user `start` hooks in the same order. A failure in either phase
    /// unwinds what already started, in reverse, and returns `false` with
    /// the pipeline back in the idle state.
    pub fn start(&self) -> bool {
        if self
            .state
            .compare_exchange(IDLE, STARTING, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }
        let nodes = self.nodes.lock().unwrap().clone();

        for (i, node) in nodes.iter().enumerate() {
            if !node.pads().start_all() {
                warn!(node = i, "pad startup failed, unwinding pipeline");
                for started in nodes[..i].iter().rev() {
                    started.pads().stop_all();
                }
                self.state.store(IDLE, Ordering::Release);
                return false;
            }
        }

        for (i, node) in nodes.iter().enumerate() {
            if !node.start() {
                warn!(node = i, "node startup failed, unwinding pipeline");
                for started in nodes[..i].iter().rev() {
                    started.stop();
                }
                for node in nodes.iter().rev() {
                    node.pads().stop_all();
                }
                self.state.store(IDLE, Ordering::Release);
                return false;
            }
        }

        debug!(nodes = nodes.len(), "pipeline running");
        self.state.store(RUNNING, Ordering::Release);
        true
    }

    /// Stop every node: user `stop` hooks first, pad infrastructure after.
    pub fn stop(&self) {
        if self
            .state
            .compare_exchange(RUNNING, STOPPING, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }
        let nodes = self.nodes.lock().unwrap().clone();
        for node in &nodes {
            node.stop();
        }
        for node in &nodes {
            node.pads().stop_all();
        }
        debug!("pipeline stopped");
        self.state.store(IDLE, Ordering::Release);
    }
}

impl Default for Pipeline {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        self.stop();
    }
}
