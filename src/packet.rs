// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Opaque packet payload exchanged between pipeline nodes.
// The runtime never looks inside a packet; serialization only matters for
// the shared-memory transport, which moves raw bytes plus a channel id.

use std::any::Any;
use std::sync::Arc;

/// A unit of data flowing through the pipeline.
///
/// Packets are reference-counted and shared: every consumer downstream of a
/// splitter observes the same allocation, and the last holder frees it.
///
/// Both serialization hooks return a signed byte count; a negative value
/// means the operation failed (buffer too small, malformed bytes) or is not
/// supported by this packet type. Packets that never cross a process
/// boundary can rely on the defaults.
pub trait Packet: Any + Send + Sync {
    /// Write this packet's wire form into `buf`.
    /// Returns the number of bytes written, or a negative value on error.
    fn serialize_to(&self, buf: &mut [u8]) -> isize {
        let _ = buf;
        -1
    }

    /// Rebuild this packet from the wire form in `buf`.
    /// Returns the number of bytes consumed, or a negative value on error.
    fn deserialize_from(&mut self, buf: &[u8]) -> isize {
        let _ = buf;
        -1
    }
}

/// Checked downcast of a shared packet to a concrete type.
///
/// Returns `None` when the packet is not a `T`; typed nodes use this to
/// skip dispatch on a type mismatch instead of failing the pipeline.
pub fn downcast_packet<T: Packet>(packet: Arc<dyn Packet>) -> Option<Arc<T>> {
    let any: Arc<dyn Any + Send + Sync> = packet;
    any.downcast::<T>().ok()
}
