//! Producer-facing send handle.

use crate::{
    buffers::chunk::Chunk,
    pipeline::tx::{PipelineTxIn, SendError},
};

/// The producer's handle onto an endpoint's send pipeline.
///
/// A `Sender` is `Send` but deliberately not `Clone`: the pipeline supports
/// exactly one producer thread. Multiple producers require external
/// synchronization around a single `Sender`.
///
/// # Backpressure
///
/// [`send`](Self::send) never blocks. A full send ring grows by doubling up
/// to the configured maximum; past that — or past the pending-byte cap —
/// the frame is rejected with [`SendError::Backpressure`] and the caller may
/// retry once the reactor has drained the backlog.
///
/// # Examples
///
/// ```
/// use penstock::{Chunk, ClientHandler};
///
/// struct Discard;
///
/// impl ClientHandler for Discard {
///     fn buffer(&mut self) -> &mut [u8] {
///         unreachable!("send-only example")
///     }
///     fn read(&mut self, _len: usize) {}
/// }
///
/// let (mut sender, _endpoint) = penstock::client(Discard).build();
///
/// // Frames queue up until a reactor drives the endpoint.
/// sender.send("hello, world").unwrap();
/// sender.send(Chunk::from(vec![0u8; 512])).unwrap();
/// assert_eq!(sender.sent_bytes(), 12 + 512);
/// ```
pub struct Sender {
    pipeline: PipelineTxIn,
}

impl Sender {
    pub(crate) fn new(pipeline: PipelineTxIn) -> Self {
        Self { pipeline }
    }

    /// Hands one frame to the send pipeline.
    ///
    /// On success the frame's bytes are transmitted verbatim, in send order,
    /// after every previously accepted frame. The [`Chunk`] keeps the bytes
    /// alive until they have been handed to the socket.
    pub fn send(&mut self, frame: impl Into<Chunk>) -> Result<(), SendError> {
        let chunk = frame.into();
        let length = chunk.len();
        self.pipeline.push(chunk, 0, length)
    }

    /// Like [`send`](Self::send), but transmits only the `offset..offset + length`
    /// window of the frame.
    ///
    /// # Panics
    ///
    /// Panics if the window is out of bounds.
    pub fn send_slice(&mut self, frame: impl Into<Chunk>, offset: usize, length: usize) -> Result<(), SendError> {
        let chunk = frame.into();
        assert!(
            offset + length <= chunk.len(),
            "frame window {}..{} out of bounds for a chunk of {} bytes",
            offset,
            offset + length,
            chunk.len(),
        );
        self.pipeline.push(chunk, offset, length)
    }

    /// Estimate of bytes accepted but not yet handed to the socket.
    ///
    /// Based on the reactor's throttled counter publication, so it may lag
    /// by up to one publication interval plus one staging buffer.
    pub fn pending_bytes(&self) -> i64 {
        self.pipeline.shared().pending_bytes()
    }

    /// Total bytes accepted by this sender since the endpoint started.
    pub fn sent_bytes(&self) -> i64 {
        self.pipeline.shared().sent_bytes()
    }
}
