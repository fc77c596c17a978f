// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Cross-process transport: a publisher node that serializes packets into a
// bounded slot ring inside a named shared-memory segment, and a subscriber
// node whose worker thread drains the ring and forwards packets through
// its output pads.
//
// Segment layout (host byte order, not portable across architectures):
//
//   SegmentHeader { version, size, valid, mutex, cond_packet_ready,
//                   cond_slot_available, write_offset, ring }
//   SlotEntry[ring.capacity]   { size, channel, offset }
//   payload area ............. rest of the segment
//
// One process-shared robust mutex guards the whole ring; it is held across
// every slot and write_offset update and released before the subscriber
// pushes downstream. The publisher owns the segment lifecycle
// (create-and-unlink); subscribers only ever attach, and recover from a
// publisher death or restart by detaching and polling for a fresh
// incarnation.

use std::io;
use std::mem;
use std::ptr::addr_of_mut;
use std::slice;
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{debug, trace, warn};

use crate::node::{Node, Pads};
use crate::packet::Packet;
use crate::pad::{Pad, PadType};
use crate::platform::posix::{self, LockState, ShmSegment};

/// Default shared segment size.
pub const DEFAULT_SEGMENT_SIZE: usize = 1024 * 1024;

/// Default slot-ring capacity.
pub const DEFAULT_RING_CAPACITY: u32 = 1;

/// How long the subscriber sleeps between attach attempts, and how long a
/// single ring wait lasts before the stop flag is re-checked.
const QUANTUM_MS: u64 = 100;

// ---------------------------------------------------------------------------
// Segment layout
// ---------------------------------------------------------------------------

/// One ring entry describing a serialized packet in the payload area.
#[repr(C)]
#[derive(Clone, Copy)]
struct SlotEntry {
    size: u32,
    channel: u32,
    offset: usize,
}

#[repr(C)]
struct RingHeader {
    capacity: u32,
    count: u32,
    head: u32,
    tail: u32,
}

#[repr(C)]
struct SegmentHeader {
    /// Random cookie identifying one publisher incarnation.
    version: AtomicI32,
    /// Total segment bytes.
    size: AtomicI32,
    /// Set last on creation, cleared first on teardown.
    valid: AtomicBool,
    mutex: libc::pthread_mutex_t,
    cond_packet_ready: libc::pthread_cond_t,
    cond_slot_available: libc::pthread_cond_t,
    /// Next byte to append into the payload area. Guarded by `mutex`.
    write_offset: usize,
    /// Guarded by `mutex`.
    ring: RingHeader,
}

/// First payload byte: everything before it is header plus slot table.
fn payload_base(capacity: u32) -> usize {
    mem::size_of::<SegmentHeader>() + mem::size_of::<SlotEntry>() * capacity as usize
}

unsafe fn slot_ptr(hdr: *mut SegmentHeader, index: u32) -> *mut SlotEntry {
    let table = (hdr as *mut u8).add(mem::size_of::<SegmentHeader>()) as *mut SlotEntry;
    table.add(index as usize)
}

// ---------------------------------------------------------------------------
// Publisher
// ---------------------------------------------------------------------------

/// Publishes packets pushed into its channels to a named shared-memory
/// ring. The index of the channel pad travels with each packet so the
/// subscriber can route it to the matching output pad.
///
/// Producers block while the ring is full, bounded by the push timeout;
/// there is no drop policy. Only one publisher per name is supported.
pub struct SharedPublisherNode {
    pads: Pads,
    name: String,
    size: usize,
    ring_capacity: u32,
    seg: RwLock<Option<ShmSegment>>,
}

impl SharedPublisherNode {
    /// Publisher with the default segment size and ring capacity.
    pub fn new(name: &str) -> Self {
        Self::with_config(name, DEFAULT_SEGMENT_SIZE, DEFAULT_RING_CAPACITY)
    }

    pub fn with_config(name: &str, size: usize, ring_capacity: u32) -> Self {
        Self {
            pads: Pads::new(),
            name: name.to_string(),
            size,
            ring_capacity,
            seg: RwLock::new(None),
        }
    }

    /// Add a publishing channel. The pad's registration index is the wire
    /// channel id.
    pub fn add_channel(&self, name: &str) -> Arc<Pad> {
        self.add_input(name)
    }

    /// Add a publishing channel buffered through a bounded queue.
    pub fn add_channel_queued(&self, name: &str, capacity: usize) -> Arc<Pad> {
        self.add_input_queued(name, capacity)
    }

    fn create_segment(&self) -> io::Result<ShmSegment> {
        if self.ring_capacity == 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "ring capacity is 0",
            ));
        }
        if self.size <= payload_base(self.ring_capacity) {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "segment too small for header and slot table",
            ));
        }
        let seg = ShmSegment::create(&self.name, self.size)?;
        if let Err(e) = unsafe { self.init_header(&seg) } {
            seg.unlink();
            return Err(e);
        }
        Ok(seg)
    }

    unsafe fn init_header(&self, seg: &ShmSegment) -> io::Result<()> {
        let hdr = seg.as_mut_ptr() as *mut SegmentHeader;
        (*hdr).valid.store(false, Ordering::Relaxed);
        (*hdr).version.store(rand::random::<i32>(), Ordering::Relaxed);
        (*hdr).size.store(self.size as i32, Ordering::Relaxed);
        posix::init_shared_mutex(addr_of_mut!((*hdr).mutex))?;
        posix::init_shared_cond(addr_of_mut!((*hdr).cond_packet_ready))?;
        posix::init_shared_cond(addr_of_mut!((*hdr).cond_slot_available))?;
        (*hdr).ring = RingHeader {
            capacity: self.ring_capacity,
            count: 0,
            head: 0,
            tail: 0,
        };
        (*hdr).write_offset = payload_base(self.ring_capacity);
        (*hdr).valid.store(true, Ordering::Release);
        Ok(())
    }
}

impl Node for SharedPublisherNode {
    fn pads(&self) -> &Pads {
        &self.pads
    }

    fn start(&self) -> bool {
        let mut guard = self.seg.write().unwrap();
        if guard.is_some() {
            return false;
        }
        match self.create_segment() {
            Ok(seg) => {
                debug!(name = %self.name, size = self.size, "publisher segment created");
                *guard = Some(seg);
                true
            }
            Err(e) => {
                warn!(name = %self.name, error = %e, "failed to create publisher segment");
                false
            }
        }
    }

    fn stop(&self) {
        // Mark the incarnation dead and wake every waiter while producers
        // may still hold the segment.
        {
            let guard = self.seg.read().unwrap();
            if let Some(seg) = guard.as_ref() {
                let hdr = seg.as_mut_ptr() as *mut SegmentHeader;
                unsafe {
                    let mtx = addr_of_mut!((*hdr).mutex);
                    if posix::lock_mutex_recover(mtx).is_ok() {
                        (*hdr).valid.store(false, Ordering::Release);
                        let _ = posix::signal_cond(addr_of_mut!((*hdr).cond_packet_ready));
                        let _ = posix::signal_cond(addr_of_mut!((*hdr).cond_slot_available));
                        let _ = posix::unlock_mutex(mtx);
                    }
                }
            }
        }
        let seg = self.seg.write().unwrap().take();
        if let Some(seg) = seg {
            let hdr = seg.as_mut_ptr() as *mut SegmentHeader;
            unsafe {
                posix::destroy_cond(addr_of_mut!((*hdr).cond_packet_ready));
                posix::destroy_cond(addr_of_mut!((*hdr).cond_slot_available));
                posix::destroy_mutex(addr_of_mut!((*hdr).mutex));
            }
            seg.unlink();
            debug!(name = %self.name, "publisher segment unlinked");
        }
    }

    fn process_packet(&self, packet: Arc<dyn Packet>, pad: &Pad, timeout_ms: u64) -> bool {
        let guard = self.seg.read().unwrap();
        let Some(seg) = guard.as_ref() else {
            return false;
        };
        let hdr = seg.as_mut_ptr() as *mut SegmentHeader;
        unsafe {
            let mtx = addr_of_mut!((*hdr).mutex);
            if posix::lock_mutex_recover(mtx).is_err() {
                return false;
            }
            if !wait_for_free_slot(hdr, timeout_ms) {
                let _ = posix::unlock_mutex(mtx);
                return false;
            }
            let ok = serialize_into(seg, hdr, packet.as_ref(), pad.index() as u32);
            if ok {
                let _ = posix::signal_cond(addr_of_mut!((*hdr).cond_packet_ready));
            } else {
                debug!(name = %self.name, "packet serialization failed");
            }
            let _ = posix::unlock_mutex(mtx);
            ok
        }
    }
}

impl Drop for SharedPublisherNode {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Wait, with `mutex` held, until the ring has a free slot. Fails on
/// timeout, on EINVAL, or once the segment is marked invalid.
unsafe fn wait_for_free_slot(hdr: *mut SegmentHeader, timeout_ms: u64) -> bool {
    if !(*hdr).valid.load(Ordering::Acquire) {
        return false;
    }
    let deadline = Instant::now() + Duration::from_millis(timeout_ms);
    while (*hdr).ring.count == (*hdr).ring.capacity {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return false;
        }
        let mtx = addr_of_mut!((*hdr).mutex);
        let cond = addr_of_mut!((*hdr).cond_slot_available);
        match posix::timed_wait(cond, mtx, remaining.as_millis() as u64) {
            Ok(true) => {}
            Ok(false) => return false,
            Err(_) => return false,
        }
        if !(*hdr).valid.load(Ordering::Acquire) {
            return false;
        }
    }
    true
}

/// Serialize `packet` into the payload area and append a slot entry.
/// Called with the segment mutex held and a free slot guaranteed.
unsafe fn serialize_into(
    seg: &ShmSegment,
    hdr: *mut SegmentHeader,
    packet: &dyn Packet,
    channel: u32,
) -> bool {
    let base = seg.as_mut_ptr();
    let seg_len = seg.len();
    let reserved = payload_base((*hdr).ring.capacity);

    let mut offset = (*hdr).write_offset;
    let mut written = serialize_at(base, seg_len, offset, packet);
    if written < 0 {
        // Tail space exhausted: wrap to the payload base and retry once.
        offset = reserved;
        written = serialize_at(base, seg_len, offset, packet);
    }
    if written < 0 {
        return false;
    }

    let tail = (*hdr).ring.tail;
    *slot_ptr(hdr, tail) = SlotEntry {
        size: written as u32,
        channel,
        offset,
    };
    (*hdr).ring.tail = (tail + 1) % (*hdr).ring.capacity;
    (*hdr).ring.count += 1;

    let mut next = offset + written as usize;
    if next >= seg_len {
        next = reserved;
    }
    (*hdr).write_offset = next;
    true
}

unsafe fn serialize_at(base: *mut u8, seg_len: usize, offset: usize, packet: &dyn Packet) -> isize {
    if offset >= seg_len {
        return -1;
    }
    let buf = slice::from_raw_parts_mut(base.add(offset), seg_len - offset);
    packet.serialize_to(buf)
}

// ---------------------------------------------------------------------------
// Subscriber
// ---------------------------------------------------------------------------

/// Builds an empty packet for an arriving channel, typed by the concrete
/// subscriber. Returning `None` drops the record.
pub type PacketFactory = Arc<dyn Fn(&Pad) -> Option<Box<dyn Packet>> + Send + Sync>;

/// Attaches to a publisher's segment and forwards every ring entry through
/// the output pad whose index matches the record's channel id.
///
/// The worker tolerates a missing segment (polls until one appears and is
/// valid), a publisher that dies while holding the ring lock (robust mutex
/// reports the dead owner; the incarnation is abandoned and a fresh one
/// awaited), and a clean publisher restart. Packets in flight at a crash
/// are not recovered.
pub struct SharedSubscriberNode {
    pads: Pads,
    name: String,
    stopped: Arc<AtomicBool>,
    worker: Mutex<Option<JoinHandle<()>>>,
    factory: PacketFactory,
}

impl SharedSubscriberNode {
    /// Subscriber producing packets of one concrete type for every channel.
    pub fn typed<T: Packet + Default>(name: &str) -> Self {
        Self::with_factory(name, |_| Some(Box::new(T::default()) as Box<dyn Packet>))
    }

    /// Subscriber with a custom per-channel packet factory.
    pub fn with_factory<F>(name: &str, factory: F) -> Self
    where
        F: Fn(&Pad) -> Option<Box<dyn Packet>> + Send + Sync + 'static,
    {
        Self {
            pads: Pads::new(),
            name: name.to_string(),
            stopped: Arc::new(AtomicBool::new(true)),
            worker: Mutex::new(None),
            factory: Arc::new(factory),
        }
    }
}

impl Node for SharedSubscriberNode {
    fn pads(&self) -> &Pads {
        &self.pads
    }

    fn start(&self) -> bool {
        let mut worker = self.worker.lock().unwrap();
        if worker.is_some() {
            return false;
        }
        self.stopped.store(false, Ordering::Release);
        let ctx = SubscriberWorker {
            name: self.name.clone(),
            stopped: self.stopped.clone(),
            pads: self.pads.clone(),
            factory: self.factory.clone(),
            seg: None,
        };
        *worker = Some(thread::spawn(move || ctx.run()));
        true
    }

    fn stop(&self) {
        let handle = self.worker.lock().unwrap().take();
        if let Some(handle) = handle {
            self.stopped.store(true, Ordering::Release);
            let _ = handle.join();
        }
    }
}

impl Drop for SharedSubscriberNode {
    fn drop(&mut self) {
        self.stop();
    }
}

struct SubscriberWorker {
    name: String,
    stopped: Arc<AtomicBool>,
    pads: Pads,
    factory: PacketFactory,
    seg: Option<ShmSegment>,
}

impl SubscriberWorker {
    fn run(mut self) {
        while !self.stopped.load(Ordering::Acquire) {
            if self.seg.is_none() {
                match attach(&self.name) {
                    Some(seg) => {
                        trace!(name = %self.name, "attached to publisher segment");
                        self.seg = Some(seg);
                    }
                    None => {
                        thread::sleep(Duration::from_millis(QUANTUM_MS));
                        continue;
                    }
                }
            }
            let (hdr, base, seg_len) = {
                let seg = self.seg.as_ref().unwrap();
                (
                    seg.as_mut_ptr() as *mut SegmentHeader,
                    seg.as_mut_ptr(),
                    seg.len(),
                )
            };
            unsafe {
                let mtx = addr_of_mut!((*hdr).mutex);
                match posix::lock_mutex(mtx) {
                    Ok(LockState::Acquired) => {}
                    Ok(LockState::OwnerDead) => {
                        // The publisher died inside the critical section; the
                        // ring state is unknown. Unlock without making the
                        // mutex consistent and wait for a fresh incarnation.
                        let _ = posix::unlock_mutex(mtx);
                        warn!(name = %self.name, "publisher died holding the ring lock, detaching");
                        self.seg = None;
                        thread::sleep(Duration::from_millis(QUANTUM_MS));
                        continue;
                    }
                    Err(e) => {
                        debug!(name = %self.name, error = %e, "ring lock failed, detaching");
                        self.seg = None;
                        thread::sleep(Duration::from_millis(QUANTUM_MS));
                        continue;
                    }
                }
                if !(*hdr).valid.load(Ordering::Acquire) {
                    let _ = posix::unlock_mutex(mtx);
                    debug!(name = %self.name, "segment marked invalid, detaching");
                    self.seg = None;
                    continue;
                }
                if (*hdr).ring.count == 0 {
                    let cond = addr_of_mut!((*hdr).cond_packet_ready);
                    match posix::timed_wait(cond, mtx, QUANTUM_MS) {
                        Ok(true) => {}
                        Ok(false) => {
                            let _ = posix::unlock_mutex(mtx);
                            continue;
                        }
                        Err(e) => {
                            let _ = posix::unlock_mutex(mtx);
                            debug!(name = %self.name, error = %e, "ring wait failed, detaching");
                            self.seg = None;
                            continue;
                        }
                    }
                    if (*hdr).ring.count == 0 {
                        // Spurious or teardown wakeup.
                        let _ = posix::unlock_mutex(mtx);
                        continue;
                    }
                }
                let delivery = self.take_packet(hdr, base, seg_len);
                let _ = posix::signal_cond(addr_of_mut!((*hdr).cond_slot_available));
                let _ = posix::unlock_mutex(mtx);
                // Downstream hooks run arbitrary code; never under the ring lock.
                if let Some((pad, packet)) = delivery {
                    pad.push_packet(packet, 0);
                }
            }
        }
        self.seg = None;
    }

    /// Pop the head slot and deserialize it. Called with the mutex held;
    /// the payload bytes are only stable while the slot is live.
    unsafe fn take_packet(
        &self,
        hdr: *mut SegmentHeader,
        base: *mut u8,
        seg_len: usize,
    ) -> Option<(Arc<Pad>, Arc<dyn Packet>)> {
        let head = (*hdr).ring.head;
        let slot = *slot_ptr(hdr, head);
        (*hdr).ring.head = (head + 1) % (*hdr).ring.capacity;
        (*hdr).ring.count -= 1;

        let pad = self.pads.at(slot.channel as usize)?;
        if pad.pad_type() != PadType::Output {
            return None;
        }
        let mut packet = (self.factory)(&pad)?;
        let end = slot.offset.checked_add(slot.size as usize)?;
        if end > seg_len {
            return None;
        }
        let buf = slice::from_raw_parts(base.add(slot.offset), slot.size as usize);
        if packet.deserialize_from(buf) < 0 {
            debug!(name = %self.name, channel = slot.channel, "packet deserialization failed, dropping");
            return None;
        }
        Some((pad, Arc::from(packet)))
    }
}

fn attach(name: &str) -> Option<ShmSegment> {
    let seg = ShmSegment::attach(name).ok()?;
    if seg.len() < mem::size_of::<SegmentHeader>() {
        return None;
    }
    let hdr = seg.as_mut_ptr() as *const SegmentHeader;
    if !unsafe { (*hdr).valid.load(Ordering::Acquire) } {
        return None;
    }
    Some(seg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(target_pointer_width = "64")]
    #[test]
    fn slot_entry_is_16_bytes() {
        assert_eq!(mem::size_of::<SlotEntry>(), 16);
    }

    #[test]
    fn payload_base_covers_header_and_slots() {
        let one = payload_base(1);
        assert_eq!(
            one,
            mem::size_of::<SegmentHeader>() + mem::size_of::<SlotEntry>()
        );
        assert_eq!(
            payload_base(8) - one,
            7 * mem::size_of::<SlotEntry>()
        );
    }

    #[test]
    fn header_alignment_fits_slot_table() {
        assert_eq!(mem::size_of::<SegmentHeader>() % mem::align_of::<SlotEntry>(), 0);
    }
}
