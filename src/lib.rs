//! Penstock: a non-blocking TCP client endpoint for single-threaded
//! readiness-selector reactors, built around a wait-free outbound send
//! pipeline.
//!
//! A penstock endpoint splits the classic reactor client along its
//! two-thread seam: the application thread holds a [`Sender`] and hands it
//! byte frames; the reactor thread owns the [`Endpoint`] and drives it from
//! readiness callbacks. In between sits a pipeline of single-producer/
//! single-consumer rings that never blocks the producer: when the current
//! ring fills up, the producer retires it and moves on to one of double the
//! capacity, while the reactor keeps draining the retired rings in order.
//!
//! # Overview
//!
//! ```text
//!  PRODUCER THREAD                                              User code
//! ┌──────────────┐ send(frame)
//! │   Sender     ├───────────────┐
//! └──────────────┘               ▼
//! ~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~ Penstock code
//!  SEND PIPELINE
//! ┌─────────────────────────────────────────────────────────────┐
//! │  offer ring (cap 4096)   [F9][F10][F11]        ← push       │
//! │  retired    (cap 2048)   [F5][F6][F7][F8]                   │
//! │  poll ring  (cap 1024)   [F1][F2][F3][F4]      → drain      │
//! └───────────┬─────────────────────────────────────────────────┘
//!             ▼ drained FIFO: F1 F2 F3 … F11
//! ┌─────────────────────────┐
//! │  staging buffer         │  [F1|F2|F3|F4...]  one socket write
//! └───────────┬─────────────┘
//! ~~~~~~~~~~~~│~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~ Reactor code
//!  REACTOR THREAD
//!             ▼ on write-readiness          ▲ on read-readiness
//!        socket write                  handler.buffer() / handler.read(n)
//! ```
//!
//! Frames are transmitted in exactly the order they were accepted: the
//! reactor finishes the oldest retired ring before advancing to the next,
//! and adopts the producer's current ring last.
//!
//! # Features
//!
//! - **Wait-free send**: no lock on the producer fast path; a full ring
//!   grows by doubling (bounded by a configurable maximum) instead of
//!   blocking.
//! - **Backpressure accounting**: an optional cap on outstanding bytes,
//!   tracked by two independently published counters so neither thread ever
//!   locks for accounting.
//! - **Coalescing staging buffer**: small frames become one socket write;
//!   partial writes keep their residue across readiness events.
//! - **Interest-ops discipline**: WRITE is asserted on the first buffered
//!   frame and cleared only once rings and staging are empty.
//! - **Error collection**: reactor-thread failures never unwind the event
//!   loop; they surface on the producer's next send.
//! - **Zero-copy frames**: [`Chunk`] shares the caller's buffer by
//!   refcount until the bytes are on the wire.
//!
//! # Quick start
//!
//! ```
//! use penstock::ClientHandler;
//!
//! struct Echo {
//!     fill: [u8; 4096],
//! }
//!
//! impl ClientHandler for Echo {
//!     fn buffer(&mut self) -> &mut [u8] {
//!         &mut self.fill
//!     }
//!
//!     fn read(&mut self, len: usize) {
//!         println!("received {len} bytes");
//!     }
//! }
//!
//! let (mut sender, endpoint) = penstock::client(Echo { fill: [0; 4096] })
//!     .write_buffer_capacity(8 * 1024)
//!     .build();
//!
//! // The reactor registers the socket, then drives `endpoint` from its
//! // readiness loop. The application sends from any single thread:
//! sender.send("hello, world").unwrap();
//! ```
//!
//! The reactor side plugs in through two narrow traits: a
//! [`RegistrationKey`] wrapping the selector registration (interest ops,
//! wakeup, validity) and a [`Channel`] wrapping the socket
//! (`Read + Write + shutdown`). On readiness the reactor calls
//! [`Endpoint::on_readable`] / [`Endpoint::on_writable`] and routes any
//! returned error into [`Endpoint::collect_error`] rather than unwinding.
//!
//! # Configuration
//!
//! One-shot environment defaults, overridable per instance on the builder:
//!
//! - `PENSTOCK_MAX_RING_CAPACITY` (default 32768): bound on a single send
//!   ring's capacity; rounded up to a power of two with a warning.
//! - `PENSTOCK_MAX_PENDING_BYTES` (default unlimited): byte cap on
//!   outstanding send data.
//! - `PENSTOCK_PUBLISH_INTERVAL_MS` (default 30000): throttle for
//!   publishing the written-byte counter to the producer.

mod api;
mod buffers;
mod config;
mod pipeline;
mod reactor;

pub use api::{ClientHandler, Endpoint, EndpointBuilder, Sender, client};
pub use buffers::chunk::{Chunk, ChunkBuf};
pub use pipeline::tx::{SendError, UNLIMITED};
pub use reactor::{Channel, Ops, ReactorError, ReactorOp, RegistrationKey};
