//! Contracts between the endpoint and the reactor that hosts it.
//!
//! The reactor itself lives outside this crate: it owns the readiness
//! selector, the socket, and the dispatch loop. The endpoint only needs a
//! narrow handle onto the selector registration ([`RegistrationKey`]) and a
//! socket it can read, write, and shut down ([`Channel`]).

use core::fmt;
use std::io;

use thiserror::Error;

/// A set of readiness interest operations.
///
/// ```
/// use penstock::Ops;
///
/// let ops = Ops::READ.with(Ops::WRITE);
/// assert!(ops.contains(Ops::WRITE));
/// assert_eq!(ops.without(Ops::WRITE), Ops::READ);
/// ```
#[derive(Clone, Copy, PartialEq, Eq, Default)]
pub struct Ops(u8);

impl Ops {
    /// The empty interest set.
    pub const NONE: Ops = Ops(0);
    /// Interest in read readiness.
    pub const READ: Ops = Ops(1 << 0);
    /// Interest in write readiness.
    pub const WRITE: Ops = Ops(1 << 1);

    #[must_use]
    pub const fn with(self, other: Ops) -> Ops {
        Ops(self.0 | other.0)
    }

    #[must_use]
    pub const fn without(self, other: Ops) -> Ops {
        Ops(self.0 & !other.0)
    }

    pub const fn contains(self, other: Ops) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Debug for Ops {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.contains(Ops::READ), self.contains(Ops::WRITE)) {
            (true, true) => f.write_str("READ | WRITE"),
            (true, false) => f.write_str("READ"),
            (false, true) => f.write_str("WRITE"),
            (false, false) => f.write_str("NONE"),
        }
    }
}

/// Handle onto a selector registration.
///
/// The reactor hands one of these to the endpoint via
/// [`Endpoint::registered`](crate::Endpoint::registered). Both the reactor
/// thread and the producer thread manipulate it (the producer asserts write
/// interest from `send`), so implementations must be internally
/// synchronized.
pub trait RegistrationKey: Send + Sync {
    /// Current interest set of this registration.
    fn interest_ops(&self) -> Ops;

    /// Replaces the interest set.
    fn set_interest_ops(&self, ops: Ops);

    /// Wakes the selector out of its current wait so that a changed interest
    /// set takes effect before the next natural wakeup.
    fn wakeup(&self);

    /// Whether the registration is still valid (not cancelled).
    fn is_valid(&self) -> bool;

    /// Swaps the dispatch target of this registration for a no-op listener.
    ///
    /// Called by the endpoint after end-of-stream so that readiness events
    /// still in flight dispatch harmlessly. The default does nothing.
    fn neutralize(&self) {}
}

/// The socket surface the endpoint drives.
pub trait Channel: io::Read + io::Write {
    /// Shuts the connection down in both directions.
    fn shutdown(&mut self) -> io::Result<()>;
}

impl Channel for std::net::TcpStream {
    fn shutdown(&mut self) -> io::Result<()> {
        std::net::TcpStream::shutdown(self, std::net::Shutdown::Both)
    }
}

/// The readiness operation a reactor-thread error was raised from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReactorOp {
    Read,
    Write,
}

impl fmt::Display for ReactorOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReactorOp::Read => f.write_str("read"),
            ReactorOp::Write => f.write_str("write"),
        }
    }
}

/// A reactor-thread failure wrapped for recovery on the producer thread.
///
/// Readiness callbacks never unwind into the reactor loop; instead the
/// reactor deposits failures here (see
/// [`Endpoint::collect_error`](crate::Endpoint::collect_error)) and the
/// producer observes them from `send` as
/// [`SendError::Collected`](crate::SendError::Collected).
#[derive(Debug, Error)]
#[error("{op} failed on the reactor thread")]
pub struct ReactorError {
    /// Which readiness operation failed.
    pub op: ReactorOp,
    /// The underlying I/O failure.
    #[source]
    pub source: io::Error,
}

impl ReactorError {
    pub fn new(op: ReactorOp, source: io::Error) -> Self {
        Self { op, source }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ops_algebra() {
        assert!(Ops::NONE.is_empty());
        assert!(!Ops::READ.is_empty());

        let both = Ops::READ.with(Ops::WRITE);
        assert!(both.contains(Ops::READ));
        assert!(both.contains(Ops::WRITE));
        assert_eq!(both.without(Ops::READ), Ops::WRITE);
        assert_eq!(both.without(both), Ops::NONE);

        // Re-asserting an interest is idempotent.
        assert_eq!(Ops::WRITE.with(Ops::WRITE), Ops::WRITE);
        assert_eq!(format!("{both:?}"), "READ | WRITE");
    }
}
