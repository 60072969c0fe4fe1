use std::{
    collections::VecDeque,
    sync::{
        Arc, Mutex, MutexGuard, PoisonError,
        atomic::{AtomicBool, AtomicI64, Ordering},
    },
};

use thiserror::Error;
use tracing::{debug, warn};

use super::ringbuf::{RingReader, RingWriter, ringbuffer_spsc};
use crate::{
    buffers::{chunk::Chunk, slice::Slice, staging::StagingBuffer},
    reactor::{Ops, ReactorError, RegistrationKey},
};

/// Sentinel for [`max_pending_bytes`](crate::EndpointBuilder::max_pending_bytes)
/// disabling pending-byte accounting entirely.
pub const UNLIMITED: i64 = i64::MAX;

/// Reactor-thread errors awaiting the producer are parked in a small ring.
const ERROR_CHANNEL_CAPACITY: usize = 4;

/// Errors that can occur when handing a frame to the send pipeline.
#[derive(Debug, Error)]
pub enum SendError {
    /// The frame was rejected by backpressure.
    ///
    /// This error occurs when:
    /// 1. Accepting the frame would push the outstanding (enqueued but not yet written) byte count past the
    ///    configured cap, or
    /// 2. The send ring is full and has already grown to its maximum capacity.
    ///
    /// Non-fatal: no state changed, and the caller may retry once the
    /// reactor has drained some of the backlog.
    #[error("frame rejected: pending-byte cap reached or send queue full at maximum capacity")]
    Backpressure,

    /// The endpoint has been unregistered from its reactor.
    ///
    /// Raised by every `send` after
    /// [`Endpoint::unregistered`](crate::Endpoint::unregistered) ran, with no
    /// side effects on the pipeline. Frames queued before the transition are
    /// still flushed. This is a terminal error: a new connection must be
    /// established to continue sending.
    #[error("client does not own the socket any longer")]
    OwnershipLost,

    /// A failure collected on the reactor thread.
    ///
    /// Readiness callbacks never unwind into the reactor loop; their
    /// failures are parked in the error channel and surface here, on the
    /// first `send` that finds the ring full.
    #[error("reactor thread failure")]
    Collected(#[source] ReactorError),
}

/// State shared between the two halves of the pipeline.
pub(crate) struct Shared {
    /// The pipeline monitor: serializes topology transitions (growth,
    /// rotation, registration, revocation, interest flips).
    topology: Mutex<Topology>,
    /// Set once the endpoint no longer owns the socket.
    revoked: AtomicBool,
    /// Free-running count of bytes accepted from the producer.
    send_buffer_bytes: AtomicI64,
    /// Free-running count of bytes that traversed the staging buffer,
    /// published by the reactor under the publication throttle.
    write_buffer_bytes: AtomicI64,
    /// Cap on outstanding bytes; [`UNLIMITED`] disables accounting.
    max_pending_bytes: i64,
    /// Upper bound on a single ring's capacity.
    max_ring_capacity: usize,
}

/// Monitor-guarded pipeline topology.
struct Topology {
    key: Option<Arc<dyn RegistrationKey>>,
    /// Superseded offer rings awaiting drain, oldest first.
    retired: VecDeque<RingReader<Slice>>,
    /// Reader of the newest offer ring, not yet adopted by the drain side.
    /// `None` while the drain side already sits on the offer ring.
    handoff: Option<RingReader<Slice>>,
    /// Whether WRITE is currently asserted on the key. Starts `true` so that
    /// pre-connect sends leave the key alone.
    write_interest: bool,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Topology> {
        self.topology.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn accounting(&self) -> bool {
        self.max_pending_bytes != UNLIMITED
    }

    pub(crate) fn register(&self, key: Arc<dyn RegistrationKey>) {
        self.lock().key = Some(key);
    }

    /// Lifecycle override of the write-interest state (`connected` clears it,
    /// `disconnected` re-asserts it to suppress interest manipulation during
    /// teardown).
    pub(crate) fn set_write_interest(&self, asserted: bool) {
        self.lock().write_interest = asserted;
    }

    /// Revokes the producer's offer side. The drain side keeps its reader
    /// handles, so an in-flight flush completes against the frozen rings.
    pub(crate) fn revoke(&self) {
        let _topology = self.lock();
        self.revoked.store(true, Ordering::Release);
    }

    /// Asserts WRITE on the key and wakes the selector, once.
    fn raise_write_interest(topology: &mut Topology) {
        if topology.write_interest {
            return;
        }
        if let Some(key) = &topology.key {
            key.set_interest_ops(key.interest_ops().with(Ops::WRITE));
            key.wakeup();
        }
        topology.write_interest = true;
    }

    pub(crate) fn add_sent(&self, len: i64) {
        self.send_buffer_bytes.fetch_add(len, Ordering::Relaxed);
    }

    pub(crate) fn sent_bytes(&self) -> i64 {
        self.send_buffer_bytes.load(Ordering::Relaxed)
    }

    pub(crate) fn publish_written(&self, total: i64) {
        self.write_buffer_bytes.store(total, Ordering::Release);
    }

    /// Producer-side estimate of bytes enqueued but not yet written.
    ///
    /// Both counters are free-running signed 64-bit values. When
    /// `send_buffer_bytes` has wrapped negative while `write_buffer_bytes`
    /// is still positive, the true distance is the negated sum; otherwise it
    /// is the plain difference.
    pub(crate) fn pending_bytes(&self) -> i64 {
        let sent = self.send_buffer_bytes.load(Ordering::Relaxed);
        let written = self.write_buffer_bytes.load(Ordering::Acquire);
        if sent < 0 && written >= 0 {
            sent.wrapping_add(written).wrapping_neg()
        } else {
            sent.wrapping_sub(written)
        }
    }

    #[cfg(test)]
    fn write_interest(&self) -> bool {
        self.lock().write_interest
    }
}

/// Producer half of the send pipeline. Owned by the [`Sender`](crate::Sender).
pub(crate) struct PipelineTxIn {
    /// The ring the producer currently enqueues into.
    ring: RingWriter<Slice>,
    /// Recycled slice husks coming back from the drain side.
    free: RingReader<Slice>,
    /// Reactor-thread errors awaiting re-raise.
    errors: RingReader<ReactorError>,
    shared: Arc<Shared>,
}

impl PipelineTxIn {
    /// Hands one frame to the pipeline.
    ///
    /// Never blocks: the push onto the offer ring is wait-free, the monitor
    /// is held only for the write-interest check, and a full ring grows by
    /// doubling instead of stalling the producer.
    pub(crate) fn push(&mut self, chunk: Chunk, offset: usize, length: usize) -> Result<(), SendError> {
        if self.shared.revoked.load(Ordering::Acquire) {
            return Err(SendError::OwnershipLost);
        }

        // Don't perform the pending-byte calculation if no cap was set.
        if self.shared.accounting() {
            let pending = self.shared.pending_bytes();
            if self.shared.max_pending_bytes.wrapping_sub(pending) < length as i64 {
                return Err(SendError::Backpressure);
            }
        }

        let slice = match self.free.pull() {
            Some(mut husk) => {
                husk.fill(chunk, offset, length);
                husk
            }
            None => Slice::new(chunk, offset, length),
        };

        match self.ring.push(slice) {
            None => {
                let mut topology = self.shared.lock();
                Shared::raise_write_interest(&mut topology);
                drop(topology);
                self.shared.add_sent(length as i64);
                Ok(())
            }
            Some(slice) => self.push_slow(slice, length),
        }
    }

    /// The offer ring is full: surface a collected error if one is pending,
    /// otherwise grow by doubling, retiring the full ring for the drain side
    /// to finish.
    fn push_slow(&mut self, slice: Slice, length: usize) -> Result<(), SendError> {
        if let Some(err) = self.errors.pull() {
            return Err(SendError::Collected(err));
        }

        if self.ring.capacity() >= self.shared.max_ring_capacity {
            return Err(SendError::Backpressure);
        }

        let capacity = self.ring.capacity() << 1;
        debug!(capacity, "growing send ring");

        let mut topology = self.shared.lock();
        let (mut writer, reader) = ringbuffer_spsc(capacity);
        if let Some(previous) = topology.handoff.take() {
            // The drain side had not reached the superseded ring yet; it now
            // waits in line behind the older retired rings.
            topology.retired.push_back(previous);
        }
        topology.handoff = Some(reader);

        // A fresh ring of double capacity always has room for one frame.
        let _stale = writer.push(slice);
        debug_assert!(_stale.is_none());
        self.ring = writer;

        Shared::raise_write_interest(&mut topology);
        drop(topology);

        self.shared.add_sent(length as i64);
        Ok(())
    }

    pub(crate) fn shared(&self) -> &Arc<Shared> {
        &self.shared
    }
}

/// Drain half of the send pipeline. Owned by the [`Endpoint`](crate::Endpoint)
/// and driven from writable readiness callbacks.
pub(crate) struct PipelineTxOut {
    /// The ring the drain side currently dequeues from.
    poll: RingReader<Slice>,
    /// Consumed slice husks going back to the producer.
    free: RingWriter<Slice>,
    /// Collected reactor-thread errors.
    errors: RingWriter<ReactorError>,
    shared: Arc<Shared>,
}

impl PipelineTxOut {
    /// Snapshot of the frames queued on the poll ring.
    pub(crate) fn queued(&mut self) -> usize {
        self.poll.len()
    }

    /// Copies frames from the poll ring into `staging` until the buffer
    /// fills or the `size` snapshot runs out. A frame that does not fit
    /// entirely has its window advanced and stays at the head. Returns the
    /// un-drained remainder of the snapshot.
    pub(crate) fn drain_into(&mut self, staging: &mut StagingBuffer, mut size: usize) -> usize {
        let mut remaining = staging.remaining();
        while size > 0 && remaining > 0 {
            // SAFETY: `size` frames were observed queued, and only this side
            // dequeues.
            let frame = unsafe { self.poll.peek_mut_unchecked() };
            if remaining < frame.len() {
                staging.put(&frame.as_bytes()[..remaining]);
                frame.advance(remaining);
                return size;
            }
            staging.put(frame.as_bytes());
            remaining -= frame.len();
            // SAFETY: same snapshot as above.
            let mut frame = unsafe { self.poll.pull_unchecked() };
            frame.recycle();
            // A full free ring just means the husk is dropped and the
            // producer allocates a fresh one later.
            let _ = self.free.push(frame);
            size -= 1;
        }
        size
    }

    /// After a full flush left the poll ring empty: adopt the next ring in
    /// FIFO order (oldest retired first, then the producer's hand-off), or —
    /// when the drain side has caught up with the producer — clear write
    /// interest.
    pub(crate) fn rotate(&mut self) {
        let mut topology = self.shared.lock();
        if !self.poll.is_empty() {
            // The producer slipped frames in between the flush and the
            // monitor; keep WRITE asserted and drain them on the next
            // callback.
            return;
        }
        if let Some(next) = topology.retired.pop_front() {
            self.poll = next;
        } else if let Some(next) = topology.handoff.take() {
            self.poll = next;
        } else {
            // Offer and poll ring are one and the same: nothing left.
            if let Some(key) = &topology.key {
                key.set_interest_ops(key.interest_ops().without(Ops::WRITE));
            }
            topology.write_interest = false;
        }
    }

    /// Parks a reactor-thread failure for the producer to observe on its
    /// next send slow path.
    pub(crate) fn collect(&mut self, err: ReactorError) {
        debug!(error = %err, "collecting reactor error");
        if self.errors.push(err).is_some() {
            warn!("error channel full, dropping reactor error");
        }
    }

    pub(crate) fn shared(&self) -> &Arc<Shared> {
        &self.shared
    }
}

/// Rounds a requested send-ring capacity to the effective one: at least
/// 1024, a multiple of 1024, and a power of two.
fn effective_ring_capacity(requested: usize) -> usize {
    let mut capacity = requested.div_ceil(1024).max(1) * 1024;
    if !capacity.is_power_of_two() {
        capacity = capacity.next_power_of_two();
    }
    if capacity != requested {
        warn!(requested, capacity, "send ring capacity rounded up");
    }
    capacity
}

/// Wires up a send pipeline: one offer/poll ring shared by both halves, a
/// free ring of the same capacity, and the error channel.
pub(crate) fn pipeline_tx(
    requested_capacity: usize,
    max_ring_capacity: usize,
    max_pending_bytes: i64,
) -> (PipelineTxIn, PipelineTxOut) {
    let capacity = effective_ring_capacity(requested_capacity).min(max_ring_capacity);

    let (ring_w, ring_r) = ringbuffer_spsc(capacity);
    let (free_w, free_r) = ringbuffer_spsc(capacity);
    let (err_w, err_r) = ringbuffer_spsc(ERROR_CHANNEL_CAPACITY);

    let shared = Arc::new(Shared {
        topology: Mutex::new(Topology {
            key: None,
            // One slot per doubling step up to the capacity bound.
            retired: VecDeque::with_capacity(max_ring_capacity.ilog2() as usize),
            handoff: None,
            write_interest: true,
        }),
        revoked: AtomicBool::new(false),
        send_buffer_bytes: AtomicI64::new(0),
        write_buffer_bytes: AtomicI64::new(0),
        max_pending_bytes,
        max_ring_capacity,
    });

    let tx_in = PipelineTxIn {
        ring: ring_w,
        free: free_r,
        errors: err_r,
        shared: shared.clone(),
    };
    let tx_out = PipelineTxOut {
        poll: ring_r,
        free: free_w,
        errors: err_w,
        shared,
    };
    (tx_in, tx_out)
}

#[cfg(test)]
mod tests {
    use std::{
        io,
        sync::atomic::{AtomicBool, AtomicUsize, Ordering},
    };

    use super::*;
    use crate::reactor::ReactorOp;

    struct TestKey {
        ops: Mutex<Ops>,
        wakeups: AtomicUsize,
        valid: AtomicBool,
    }

    impl TestKey {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                ops: Mutex::new(Ops::READ),
                wakeups: AtomicUsize::new(0),
                valid: AtomicBool::new(true),
            })
        }
    }

    impl RegistrationKey for TestKey {
        fn interest_ops(&self) -> Ops {
            *self.ops.lock().unwrap()
        }

        fn set_interest_ops(&self, ops: Ops) {
            *self.ops.lock().unwrap() = ops;
        }

        fn wakeup(&self) {
            self.wakeups.fetch_add(1, Ordering::SeqCst);
        }

        fn is_valid(&self) -> bool {
            self.valid.load(Ordering::SeqCst)
        }
    }

    fn frame(byte: u8, len: usize) -> Chunk {
        Chunk::from(vec![byte; len])
    }

    fn pipeline(
        capacity: usize,
        max_capacity: usize,
        max_pending: i64,
    ) -> (PipelineTxIn, PipelineTxOut, Arc<TestKey>) {
        let (tx_in, tx_out) = pipeline_tx(capacity, max_capacity, max_pending);
        let key = TestKey::new();
        tx_in.shared().register(key.clone());
        // Connection established: eligible to assert write interest.
        tx_in.shared().set_write_interest(false);
        (tx_in, tx_out, key)
    }

    /// Drains everything currently reachable, rotating between rings, and
    /// returns the concatenated bytes.
    fn drain_all(tx_out: &mut PipelineTxOut, staging_capacity: usize) -> Vec<u8> {
        let mut staging = StagingBuffer::with_capacity(staging_capacity);
        let mut bytes = Vec::new();
        loop {
            let queued = tx_out.queued();
            if queued == 0 {
                tx_out.rotate();
                if tx_out.queued() == 0 && !tx_out.shared().write_interest() {
                    return bytes;
                }
                continue;
            }
            tx_out.drain_into(&mut staging, queued);
            bytes.extend_from_slice(staging.readable());
            staging.clear();
        }
    }

    #[test]
    fn first_send_asserts_write_interest() {
        let (mut tx_in, _tx_out, key) = pipeline(1024, 4096, UNLIMITED);
        assert!(!key.interest_ops().contains(Ops::WRITE));

        tx_in.push(frame(1, 8), 0, 8).unwrap();
        assert!(key.interest_ops().contains(Ops::WRITE));
        assert_eq!(key.wakeups.load(Ordering::SeqCst), 1);

        // Subsequent sends find the interest already asserted.
        tx_in.push(frame(2, 8), 0, 8).unwrap();
        assert_eq!(key.wakeups.load(Ordering::SeqCst), 1);
        assert_eq!(tx_in.shared().sent_bytes(), 16);
    }

    #[test]
    fn growth_preserves_frame_order() {
        let (mut tx_in, mut tx_out, key) = pipeline(1024, 4096, UNLIMITED);

        // Two doublings: 1024 frames fill the first ring, the next pushes
        // land in rings of 2048 and 4096.
        let total = 1024 + 2048 + 16;
        for i in 0..total {
            tx_in.push(frame((i % 251) as u8, 1), 0, 1).unwrap();
        }

        let bytes = drain_all(&mut tx_out, 4096);
        assert_eq!(bytes.len(), total);
        for (i, b) in bytes.iter().enumerate() {
            assert_eq!(*b, (i % 251) as u8);
        }
        // Fully drained: interest dropped back to READ only.
        assert_eq!(key.interest_ops(), Ops::READ);
    }

    #[test]
    fn growth_stops_at_max_capacity() {
        let (mut tx_in, _tx_out, _key) = pipeline(1024, 4096, UNLIMITED);

        // 1024 + 2048 + 4096 frames fit with no reactor progress.
        let total = 1024 + 2048 + 4096;
        for i in 0..total {
            tx_in.push(frame((i % 256) as u8, 1), 0, 1).unwrap();
        }

        let err = tx_in.push(frame(0, 1), 0, 1).unwrap_err();
        assert!(matches!(err, SendError::Backpressure));
        // The rejection left the byte counter untouched.
        assert_eq!(tx_in.shared().sent_bytes(), total as i64);
    }

    #[test]
    fn byte_cap_rejects_without_side_effects() {
        let (mut tx_in, _tx_out, _key) = pipeline(1024, 4096, 100);

        tx_in.push(frame(1, 60), 0, 60).unwrap();
        tx_in.push(frame(2, 40), 0, 40).unwrap();

        // The cap is reached: 100 pending, no room for one more byte.
        let err = tx_in.push(frame(3, 1), 0, 1).unwrap_err();
        assert!(matches!(err, SendError::Backpressure));
        assert_eq!(tx_in.shared().sent_bytes(), 100);
        assert_eq!(tx_in.shared().pending_bytes(), 100);
    }

    #[test]
    fn byte_cap_reopens_after_publication() {
        let (mut tx_in, mut tx_out, _key) = pipeline(1024, 4096, 100);

        tx_in.push(frame(1, 100), 0, 100).unwrap();
        assert!(matches!(
            tx_in.push(frame(2, 1), 0, 1),
            Err(SendError::Backpressure)
        ));

        // The reactor drains and publishes; the cap reopens.
        let bytes = drain_all(&mut tx_out, 4096);
        assert_eq!(bytes.len(), 100);
        tx_out.shared().publish_written(100);
        tx_in.push(frame(2, 1), 0, 1).unwrap();
    }

    #[test]
    fn collected_error_surfaces_on_slow_path() {
        let (mut tx_in, mut tx_out, _key) = pipeline(1024, 1024, UNLIMITED);

        tx_out.collect(ReactorError::new(
            ReactorOp::Write,
            io::Error::from(io::ErrorKind::BrokenPipe),
        ));

        // Sends keep succeeding while the ring has room.
        for _ in 0..1024 {
            tx_in.push(frame(0, 1), 0, 1).unwrap();
        }

        // The first push that finds the ring full re-raises the error.
        let err = tx_in.push(frame(0, 1), 0, 1).unwrap_err();
        match err {
            SendError::Collected(e) => {
                assert_eq!(e.op, ReactorOp::Write);
                assert_eq!(e.source.kind(), io::ErrorKind::BrokenPipe);
            }
            other => panic!("expected a collected error, got {other:?}"),
        }
    }

    #[test]
    fn revoked_send_fails_without_accounting() {
        let (mut tx_in, mut tx_out, _key) = pipeline(1024, 4096, UNLIMITED);

        tx_in.push(frame(7, 16), 0, 16).unwrap();
        tx_in.shared().revoke();

        let err = tx_in.push(frame(8, 16), 0, 16).unwrap_err();
        assert!(matches!(err, SendError::OwnershipLost));
        assert_eq!(tx_in.shared().sent_bytes(), 16);

        // The in-flight frame still drains after revocation.
        let bytes = drain_all(&mut tx_out, 64);
        assert_eq!(bytes, vec![7u8; 16]);
    }

    #[test]
    fn partial_drain_advances_the_head_frame() {
        let (mut tx_in, mut tx_out, _key) = pipeline(1024, 4096, UNLIMITED);
        tx_in.push(frame(5, 96), 0, 96).unwrap();

        let mut staging = StagingBuffer::with_capacity(64);
        let queued = tx_out.queued();
        let left = tx_out.drain_into(&mut staging, queued);
        assert_eq!(left, 1);
        assert_eq!(staging.readable(), &[5u8; 64][..]);

        staging.clear();
        let left = tx_out.drain_into(&mut staging, left);
        assert_eq!(left, 0);
        assert_eq!(staging.readable(), &[5u8; 32][..]);
    }

    #[test]
    fn capacity_rounding() {
        assert_eq!(effective_ring_capacity(0), 1024);
        assert_eq!(effective_ring_capacity(1), 1024);
        assert_eq!(effective_ring_capacity(1024), 1024);
        assert_eq!(effective_ring_capacity(1500), 2048);
        assert_eq!(effective_ring_capacity(3000), 4096);
        assert_eq!(effective_ring_capacity(32768), 32768);
    }
}
