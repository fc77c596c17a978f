// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Packet dataflow pipeline runtime.
//
// Graphs of processing nodes exchange reference-counted packets through
// named pads: direct pads hand off on the caller's thread, queued pads
// decouple producers from consumers with a bounded FIFO and a worker
// thread, and the shared-memory publisher/subscriber pair extends a graph
// across process boundaries over a robustly-locked slot ring.

pub mod packet;
pub use packet::{downcast_packet, Packet};

pub mod pad;
pub use pad::{Pad, PadType, DEFAULT_QUEUE_CAPACITY};

pub mod node;
pub use node::{Node, Pads};

pub mod nodes;
pub use nodes::{LambdaNode, Splitter, TypedNode, TypedNode2};

pub mod pipeline;
pub use pipeline::Pipeline;

pub mod shm_name;

mod platform;

#[cfg(unix)]
pub mod shared_node;
#[cfg(unix)]
pub use shared_node::{
    PacketFactory, SharedPublisherNode, SharedSubscriberNode, DEFAULT_RING_CAPACITY,
    DEFAULT_SEGMENT_SIZE,
};
