//! Public construction API: the builder tying a handler, the send pipeline,
//! and the staging buffer into a ([`Sender`], [`Endpoint`]) pair.

pub(crate) mod endpoint;
pub(crate) mod sender;

use std::time::Duration;

pub use endpoint::{ClientHandler, Endpoint};
pub use sender::Sender;

use crate::{config, pipeline::tx::pipeline_tx};

/// Starts building a client endpoint around `handler`.
///
/// ```
/// use penstock::ClientHandler;
///
/// struct H {
///     fill: [u8; 4096],
/// }
///
/// impl ClientHandler for H {
///     fn buffer(&mut self) -> &mut [u8] {
///         &mut self.fill
///     }
///     fn read(&mut self, len: usize) {
///         println!("{len} bytes in");
///     }
/// }
///
/// let (sender, endpoint) = penstock::client(H { fill: [0; 4096] })
///     .send_ring_capacity(2048)
///     .max_pending_bytes(1 << 20)
///     .build();
/// ```
pub fn client<H: ClientHandler>(handler: H) -> EndpointBuilder<H> {
    EndpointBuilder {
        handler,
        write_buffer_capacity: 8 * 1024,
        send_ring_capacity: 1024,
        max_ring_capacity: None,
        max_pending_bytes: None,
        publish_interval: None,
    }
}

/// Builder for a ([`Sender`], [`Endpoint`]) pair.
///
/// Unset knobs fall back to the environment-injected defaults (see the
/// `PENSTOCK_*` variables in the crate docs).
pub struct EndpointBuilder<H> {
    handler: H,
    write_buffer_capacity: usize,
    send_ring_capacity: usize,
    max_ring_capacity: Option<usize>,
    max_pending_bytes: Option<i64>,
    publish_interval: Option<Duration>,
}

impl<H: ClientHandler> EndpointBuilder<H> {
    /// Capacity of the staging write buffer. Default: 8 KiB.
    pub fn write_buffer_capacity(mut self, capacity: usize) -> Self {
        self.write_buffer_capacity = capacity;
        self
    }

    /// Initial capacity of the send ring, in frames. Rounded up to at least
    /// 1024 and to a power of two. Default: 1024.
    pub fn send_ring_capacity(mut self, capacity: usize) -> Self {
        self.send_ring_capacity = capacity;
        self
    }

    /// Upper bound a send ring may grow to, in frames. Rounded up to a
    /// power of two. Default: `PENSTOCK_MAX_RING_CAPACITY` (32768).
    pub fn max_ring_capacity(mut self, capacity: usize) -> Self {
        self.max_ring_capacity = Some(capacity);
        self
    }

    /// Cap on outstanding (accepted but unwritten) bytes; [`UNLIMITED`]
    /// disables accounting. Default: `PENSTOCK_MAX_PENDING_BYTES`
    /// (unlimited).
    ///
    /// [`UNLIMITED`]: crate::UNLIMITED
    pub fn max_pending_bytes(mut self, bytes: i64) -> Self {
        self.max_pending_bytes = Some(bytes);
        self
    }

    /// Throttle for publishing the written-byte counter to the producer.
    /// Default: `PENSTOCK_PUBLISH_INTERVAL_MS` (30 seconds).
    pub fn publish_interval(mut self, interval: Duration) -> Self {
        self.publish_interval = Some(interval);
        self
    }

    /// Wires the pipeline and returns the producer and reactor halves.
    pub fn build(self) -> (Sender, Endpoint<H>) {
        let max_ring_capacity = self
            .max_ring_capacity
            .map(|capacity| config::round_ring_capacity("max_ring_capacity", capacity))
            .unwrap_or(*config::MAX_RING_CAPACITY);
        let max_pending_bytes = self.max_pending_bytes.unwrap_or(*config::MAX_PENDING_BYTES);
        let publish_interval = self.publish_interval.unwrap_or(*config::PUBLISH_INTERVAL);

        let (tx_in, tx_out) = pipeline_tx(self.send_ring_capacity, max_ring_capacity, max_pending_bytes);
        let sender = Sender::new(tx_in);
        let endpoint = Endpoint::new(self.handler, tx_out, self.write_buffer_capacity, publish_interval);
        (sender, endpoint)
    }
}
