use std::sync::LazyLock;

pub(crate) mod ringbuf;
pub(crate) mod tx;

/// Process-wide monotonic anchor; all elapsed-time arithmetic (publication
/// throttling, spin deadlines) is expressed as durations since this instant.
pub(crate) static LOCAL_EPOCH: LazyLock<quanta::Instant> = LazyLock::new(quanta::Instant::now);
