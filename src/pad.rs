// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Connection points between pipeline nodes.
//
// A pad is either a direct hand-off (the call stack is the pipeline) or a
// bounded FIFO serviced by a dedicated worker thread. Output pads hold at
// most one weak link to an input pad of another node; input pads terminate
// a hop and route packets into their owning node's processing hook.

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex, OnceLock, Weak};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::node::{Node, PadsInner};
use crate::packet::Packet;

/// Default bounded-queue capacity for queued pads.
pub const DEFAULT_QUEUE_CAPACITY: usize = 4;

/// Direction of a pad.
///
/// A pad starts out `Undefined`; registration through a node or the first
/// `then` link promotes it to `Input` or `Output`, and the direction never
/// changes afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PadType {
    Input,
    Output,
    Undefined,
}

/// Back-reference from a pad to its owning node's registry.
/// Set exactly once when the pad is registered.
struct PadParent {
    registry: Weak<PadsInner>,
    index: usize,
}

/// Direction and peer link, guarded by one lock so in-flight pushes never
/// observe a half-updated link.
struct LinkState {
    ty: PadType,
    peer: Option<Weak<Pad>>,
}

/// A named connection point on a node.
///
/// Created through [`Node::add_input`], [`Node::add_input_queued`] or
/// [`Node::add_output`]; shared as `Arc<Pad>` so links and worker threads
/// can reference pads without owning them.
pub struct Pad {
    state: Mutex<LinkState>,
    parent: OnceLock<PadParent>,
    queue: Option<QueueState>,
}

impl Pad {
    /// A direct pad: packets are handed to the node hook on the caller's
    /// thread, with no buffering.
    pub fn direct() -> Self {
        Self {
            state: Mutex::new(LinkState {
                ty: PadType::Undefined,
                peer: None,
            }),
            parent: OnceLock::new(),
            queue: None,
        }
    }

    /// A queued pad: packets are buffered in a bounded FIFO and dispatched
    /// by a worker thread started with the pipeline.
    pub fn queued(capacity: usize) -> Self {
        Self {
            state: Mutex::new(LinkState {
                ty: PadType::Undefined,
                peer: None,
            }),
            parent: OnceLock::new(),
            queue: Some(QueueState::new(capacity)),
        }
    }

    /// The pad's direction.
    pub fn pad_type(&self) -> PadType {
        self.state.lock().unwrap().ty
    }

    /// The pad's position in its node's registration order.
    /// Stable for the pad's lifetime; 0 for an unregistered pad.
    pub fn index(&self) -> usize {
        self.parent.get().map(|p| p.index).unwrap_or(0)
    }

    /// The node owning this pad.
    ///
    /// # Panics
    /// Panics if the pad was never registered on a node, or the node is
    /// gone. Pads obtained through the node API are always attached.
    pub fn node(&self) -> Arc<dyn Node> {
        self.try_node().expect("pad is not attached to a node")
    }

    fn try_node(&self) -> Option<Arc<dyn Node>> {
        self.parent.get()?.registry.upgrade()?.owner()
    }

    /// Push a packet into this pad.
    ///
    /// For an output pad the packet is forwarded to the linked peer, and the
    /// push fails when no peer is linked. For an input pad the packet is
    /// queued according to the pad variant and eventually reaches the owning
    /// node's hook. `timeout_ms` bounds any blocking wait on the way; expiry
    /// returns `false` and leaves no trace.
    pub fn push_packet(&self, packet: Arc<dyn Packet>, timeout_ms: u64) -> bool {
        // Capture direction and link under the pad lock, then release it
        // before descending into the peer: at most one pad lock is ever held.
        let (ty, peer) = {
            let st = self.state.lock().unwrap();
            (st.ty, st.peer.clone())
        };
        if ty != PadType::Input {
            return match peer.and_then(|p| p.upgrade()) {
                Some(peer) => peer.push_packet(packet, timeout_ms),
                None => false,
            };
        }
        self.queue_packet(packet, timeout_ms)
    }

    /// Link this pad to `peer` and return the peer's owning node, so graph
    /// assembly chains naturally: `a.pad("out").then(&b.pad("in"))`.
    ///
    /// An undefined pad is promoted to output here; an undefined peer to
    /// input. The link is weak: a pad never keeps its peer's node alive.
    pub fn then(&self, peer: &Arc<Pad>) -> Arc<dyn Node> {
        self.link_to(peer);
        peer.node()
    }

    /// Drop the peer link. An undefined pad is promoted to output.
    pub fn then_clear(&self) {
        let mut st = self.state.lock().unwrap();
        if st.ty == PadType::Undefined {
            st.ty = PadType::Output;
        }
        st.peer = None;
    }

    pub(crate) fn link_to(&self, peer: &Arc<Pad>) {
        {
            let mut st = self.state.lock().unwrap();
            if st.ty == PadType::Undefined {
                st.ty = PadType::Output;
            }
            st.peer = Some(Arc::downgrade(peer));
        }
        let mut pst = peer.state.lock().unwrap();
        if pst.ty == PadType::Undefined {
            pst.ty = PadType::Input;
        }
    }

    /// Start the pad. Direct pads have no lifecycle; queued pads spawn
    /// their worker thread. Idempotent.
    pub fn start(pad: &Arc<Pad>) -> bool {
        let Some(q) = &pad.queue else { return true };
        q.start(Arc::downgrade(pad))
    }

    /// Stop the pad. Queued pads wake all waiters and join the worker.
    /// Idempotent.
    pub fn stop(&self) {
        if let Some(q) = &self.queue {
            q.stop();
        }
    }

    /// Called by the node registry when the pad is added.
    pub(crate) fn attach(&self, registry: Weak<PadsInner>, index: usize, ty: PadType) {
        let _ = self.parent.set(PadParent { registry, index });
        self.state.lock().unwrap().ty = ty;
    }

    /// Route a packet into the owning node's processing hook.
    pub(crate) fn dispatch(&self, packet: Arc<dyn Packet>, timeout_ms: u64) -> bool {
        match self.try_node() {
            Some(node) => node.process_packet(packet, self, timeout_ms),
            None => false,
        }
    }

    fn queue_packet(&self, packet: Arc<dyn Packet>, timeout_ms: u64) -> bool {
        match &self.queue {
            None => self.dispatch(packet, timeout_ms),
            Some(q) => q.enqueue(packet, timeout_ms),
        }
    }
}

// ---------------------------------------------------------------------------
// Bounded FIFO + worker thread for queued pads
// ---------------------------------------------------------------------------

struct QueueShared {
    queue: VecDeque<(u64, Arc<dyn Packet>)>,
    running: bool,
}

struct QueueState {
    capacity: usize,
    shared: Mutex<QueueShared>,
    has_packets: Condvar,
    has_space: Condvar,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl QueueState {
    fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            shared: Mutex::new(QueueShared {
                queue: VecDeque::new(),
                running: false,
            }),
            has_packets: Condvar::new(),
            has_space: Condvar::new(),
            worker: Mutex::new(None),
        }
    }

    fn start(&self, pad: Weak<Pad>) -> bool {
        let mut worker = self.worker.lock().unwrap();
        if worker.is_some() || self.shared.lock().unwrap().running {
            return true;
        }
        self.shared.lock().unwrap().running = true;
        *worker = Some(thread::spawn(move || worker_loop(pad)));
        true
    }

    fn stop(&self) {
        let handle = self.worker.lock().unwrap().take();
        let Some(handle) = handle else { return };
        self.shared.lock().unwrap().running = false;
        self.has_packets.notify_all();
        self.has_space.notify_all();
        let _ = handle.join();
    }

    /// Append a packet, waiting up to `timeout_ms` for a free slot.
    /// Fails when the pad is not running or the queue stays full.
    fn enqueue(&self, packet: Arc<dyn Packet>, timeout_ms: u64) -> bool {
        let guard = self.shared.lock().unwrap();
        let capacity = self.capacity;
        let (mut guard, _) = self
            .has_space
            .wait_timeout_while(guard, Duration::from_millis(timeout_ms), |s| {
                s.running && s.queue.len() >= capacity
            })
            .unwrap();
        if !guard.running || guard.queue.len() >= capacity {
            return false;
        }
        guard.queue.push_back((timeout_ms, packet));
        drop(guard);
        self.has_packets.notify_one();
        true
    }
}

/// Worker: pop packets in FIFO order and run the node hook outside the
/// queue lock. Exits once the pad stops and the queue has drained.
fn worker_loop(pad: Weak<Pad>) {
    loop {
        let Some(pad) = pad.upgrade() else { return };
        let Some(q) = &pad.queue else { return };
        let (timeout_ms, packet) = {
            let guard = q.shared.lock().unwrap();
            let mut guard = q
                .has_packets
                .wait_while(guard, |s| s.running && s.queue.is_empty())
                .unwrap();
            if !guard.running && guard.queue.is_empty() {
                return;
            }
            match guard.queue.pop_front() {
                Some(item) => item,
                None => continue,
            }
        };
        q.has_space.notify_one();
        pad.dispatch(packet, timeout_ms);
    }
}
