//! Reactor-facing endpoint driver.

use std::{io, sync::Arc, time::Duration};

use tracing::debug;

use crate::{
    buffers::staging::StagingBuffer,
    pipeline::{LOCAL_EPOCH, tx::PipelineTxOut},
    reactor::{Channel, Ops, ReactorError, ReactorOp, RegistrationKey},
};

/// The application-protocol surface of an endpoint.
///
/// The handler decides what inbound bytes *mean*; the endpoint only moves
/// them. All methods run on the reactor thread.
pub trait ClientHandler: Send {
    /// Returns the region to fill on the next readable event.
    ///
    /// Must be non-empty: a zero-length read is indistinguishable from end
    /// of stream. Implementations typically reset and return a fixed region.
    fn buffer(&mut self) -> &mut [u8];

    /// Interprets the first `len` bytes of the last [`buffer`](Self::buffer)
    /// region.
    ///
    /// Sending from inside this callback is allowed; the reactor thread then
    /// acts as the (single) producer.
    fn read(&mut self, len: usize);

    /// The connection has been established.
    fn connected(&mut self) {}

    /// The connection is gone.
    fn disconnected(&mut self) {}
}

/// The reactor-facing half of a client endpoint.
///
/// The reactor owns this object together with the socket and calls into it
/// on readiness events ([`on_readable`](Self::on_readable),
/// [`on_writable`](Self::on_writable)) and lifecycle transitions
/// ([`registered`](Self::registered), [`connected`](Self::connected),
/// [`disconnected`](Self::disconnected),
/// [`unregistered`](Self::unregistered)). All methods are reactor-thread
/// only; the producer side lives in [`Sender`](crate::Sender).
///
/// Readiness callbacks return `io::Result` instead of unwinding; the reactor
/// is expected to route failures into
/// [`collect_error`](Self::collect_error), which parks them for the producer:
///
/// ```no_run
/// # use penstock::{ClientHandler, ReactorOp};
/// # struct H { fill: [u8; 1024] }
/// # impl ClientHandler for H {
/// #     fn buffer(&mut self) -> &mut [u8] { &mut self.fill }
/// #     fn read(&mut self, _len: usize) {}
/// # }
/// # let (_sender, mut endpoint) = penstock::client(H { fill: [0; 1024] }).build();
/// # let mut socket: std::net::TcpStream = unimplemented!();
/// if let Err(e) = endpoint.on_writable(&mut socket) {
///     endpoint.collect_error(ReactorOp::Write, e);
/// }
/// ```
pub struct Endpoint<H> {
    handler: H,
    pipeline: PipelineTxOut,
    staging: StagingBuffer,
    key: Option<Arc<dyn RegistrationKey>>,
    connected: bool,
    /// Reactor-local accumulator behind the publication throttle.
    curr_write_buffer_bytes: i64,
    last_publish: Duration,
    publish_interval: Duration,
}

impl<H: ClientHandler> Endpoint<H> {
    pub(crate) fn new(
        handler: H,
        pipeline: PipelineTxOut,
        write_buffer_capacity: usize,
        publish_interval: Duration,
    ) -> Self {
        Self {
            handler,
            pipeline,
            staging: StagingBuffer::with_capacity(write_buffer_capacity),
            key: None,
            connected: false,
            curr_write_buffer_bytes: 0,
            last_publish: LOCAL_EPOCH.elapsed(),
            publish_interval,
        }
    }

    /// The reactor has registered the endpoint's socket with its selector.
    pub fn registered(&mut self, key: Arc<dyn RegistrationKey>) {
        self.pipeline.shared().register(key.clone());
        self.key = Some(key);
    }

    /// The connection has been established; the endpoint may now manipulate
    /// write interest.
    pub fn connected(&mut self) {
        self.pipeline.shared().set_write_interest(false);
        self.connected = true;
        self.handler.connected();
    }

    /// The connection is gone. Re-asserts the write-interest flag so that
    /// teardown does not fight over the interest set.
    pub fn disconnected(&mut self) {
        self.pipeline.shared().set_write_interest(true);
        self.connected = false;
        self.handler.disconnected();
    }

    /// The reactor has deregistered the endpoint.
    ///
    /// Revokes the producer's offer side: every subsequent
    /// [`send`](crate::Sender::send) fails with
    /// [`SendError::OwnershipLost`](crate::SendError::OwnershipLost) while
    /// frames already queued keep draining.
    pub fn unregistered(&mut self) {
        self.pipeline.shared().revoke();
    }

    /// Whether the registration is valid and the connection established.
    pub fn is_connected(&self) -> bool {
        self.connected && self.key.as_ref().is_some_and(|key| key.is_valid())
    }

    /// Handles a read-readiness event.
    ///
    /// One read per event: the bytes land in the handler's fill region and
    /// their count is handed to [`ClientHandler::read`]. End of stream runs
    /// the orderly teardown (`disconnected`, `unregistered`, key
    /// neutralization) internally.
    pub fn on_readable<C: Channel>(&mut self, channel: &mut C) -> io::Result<()> {
        loop {
            return match channel.read(self.handler.buffer()) {
                Ok(0) => {
                    // End of stream.
                    let _ = channel.shutdown();
                    self.disconnected();
                    self.unregistered();
                    if let Some(key) = &self.key {
                        key.neutralize();
                    }
                    Ok(())
                }
                Ok(n) => {
                    self.handler.read(n);
                    Ok(())
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    debug!("read 0 bytes");
                    Ok(())
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => Err(e),
            };
        }
    }

    /// Handles a write-readiness event.
    ///
    /// Fills the staging buffer from the poll ring, flushes it to the
    /// socket, and refills as long as both frames and socket capacity
    /// remain. When the socket stops accepting bytes the residue is
    /// compacted and WRITE interest stays asserted; when the pipeline runs
    /// dry the poll ring rotates and, with nothing left anywhere, WRITE is
    /// cleared before returning.
    pub fn on_writable<C: Channel>(&mut self, channel: &mut C) -> io::Result<()> {
        // Fill: coalesce queued frames into the staging buffer.
        let mut size = self.pipeline.queued();
        if size > 0 && self.staging.remaining() > 0 {
            let before = self.staging.remaining();
            size = self.pipeline.drain_into(&mut self.staging, size);
            if self.accounting() {
                self.curr_write_buffer_bytes += (before - self.staging.remaining()) as i64;
                let now = LOCAL_EPOCH.elapsed();
                if now.saturating_sub(self.last_publish) >= self.publish_interval {
                    self.pipeline.shared().publish_written(self.curr_write_buffer_bytes);
                    self.last_publish = now;
                }
            }
        }

        // Flush: hand the staged bytes to the socket.
        while self.staging.readable_len() > 0 {
            let n = match channel.write(self.staging.readable()) {
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => 0,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            };
            self.staging.consume(n);

            if self.staging.readable_len() > 0 {
                // The socket is not ready for more; the residue waits in
                // fill mode for the next writable event.
                self.staging.compact();
                return Ok(());
            }

            if size > 0 {
                // More than one buffer's worth is queued: refill and keep
                // flushing. Already off the fast path, so publish the
                // counter eagerly instead of through the throttle.
                self.staging.clear();
                let before = self.staging.remaining();
                size = self.pipeline.drain_into(&mut self.staging, size);
                if self.accounting() {
                    self.curr_write_buffer_bytes += (before - self.staging.remaining()) as i64;
                    self.pipeline.shared().publish_written(self.curr_write_buffer_bytes);
                }
            }
        }

        // Exhausted: move to the next ring, or clear WRITE when the whole
        // pipeline is empty.
        self.staging.clear();
        self.pipeline.rotate();
        Ok(())
    }

    /// Parks a reactor-thread failure for the producer.
    ///
    /// The reactor calls this instead of letting a readiness callback's
    /// error unwind its loop; the producer sees the envelope as
    /// [`SendError::Collected`](crate::SendError::Collected) on its next
    /// send slow path.
    pub fn collect_error(&mut self, op: ReactorOp, error: io::Error) {
        self.pipeline.collect(ReactorError::new(op, error));
    }

    /// Whether read readiness is currently not subscribed.
    pub fn is_read_suspended(&self) -> bool {
        self.key.as_ref().is_some_and(|key| !key.interest_ops().contains(Ops::READ))
    }

    /// Drops READ from the interest set if it was subscribed. Returns
    /// whether the call changed anything.
    pub fn suspend_read_if_resumed(&self) -> bool {
        let Some(key) = &self.key else { return false };
        let ops = key.interest_ops();
        if !ops.contains(Ops::READ) {
            return false;
        }
        debug!("suspending read");
        key.set_interest_ops(ops.without(Ops::READ));
        true
    }

    /// Adds READ to the interest set if it was suspended, waking the
    /// selector. Returns whether the call changed anything.
    pub fn resume_read_if_suspended(&self) -> bool {
        let Some(key) = &self.key else { return false };
        let ops = key.interest_ops();
        if ops.contains(Ops::READ) {
            return false;
        }
        debug!("resuming read");
        key.set_interest_ops(ops.with(Ops::READ));
        key.wakeup();
        true
    }

    #[deprecated(note = "use `suspend_read_if_resumed` instead")]
    pub fn suspend_read(&self) {
        if let Some(key) = &self.key {
            key.set_interest_ops(key.interest_ops().without(Ops::READ));
        }
    }

    #[deprecated(note = "use `resume_read_if_suspended` instead")]
    pub fn resume_read(&self) {
        if let Some(key) = &self.key {
            key.set_interest_ops(key.interest_ops().with(Ops::READ));
            key.wakeup();
        }
    }

    /// Access to the application handler.
    pub fn handler(&self) -> &H {
        &self.handler
    }

    /// Mutable access to the application handler.
    pub fn handler_mut(&mut self) -> &mut H {
        &mut self.handler
    }

    fn accounting(&self) -> bool {
        self.pipeline.shared().accounting()
    }
}
