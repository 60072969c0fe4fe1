/// Fixed-capacity staging area between the poll ring and the socket.
///
/// Frames are coalesced here so many small sends become one socket write.
/// Instead of switching a single cursor between fill and read modes, the
/// buffer keeps both cursors explicit: `buf[filled..]` is the fillable
/// region, `buf[consumed..filled]` the readable one.
pub(crate) struct StagingBuffer {
    buf: Box<[u8]>,
    filled: usize,
    consumed: usize,
}

impl StagingBuffer {
    pub(crate) fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: vec![0u8; capacity].into_boxed_slice(),
            filled: 0,
            consumed: 0,
        }
    }

    /// Space left in the fillable region.
    pub(crate) fn remaining(&self) -> usize {
        self.buf.len() - self.filled
    }

    /// Appends bytes to the fillable region. The caller has checked
    /// [`remaining`](Self::remaining).
    pub(crate) fn put(&mut self, bytes: &[u8]) {
        self.buf[self.filled..self.filled + bytes.len()].copy_from_slice(bytes);
        self.filled += bytes.len();
    }

    /// Bytes staged and not yet accepted by the socket.
    pub(crate) fn readable(&self) -> &[u8] {
        &self.buf[self.consumed..self.filled]
    }

    pub(crate) fn readable_len(&self) -> usize {
        self.filled - self.consumed
    }

    /// Records that the socket accepted `n` readable bytes.
    pub(crate) fn consume(&mut self, n: usize) {
        debug_assert!(n <= self.readable_len());
        self.consumed += n;
    }

    /// Moves the residual readable bytes to the front so filling can resume
    /// behind them.
    pub(crate) fn compact(&mut self) {
        let len = self.readable_len();
        self.buf.copy_within(self.consumed..self.filled, 0);
        self.filled = len;
        self.consumed = 0;
    }

    /// Discards both regions.
    pub(crate) fn clear(&mut self) {
        self.filled = 0;
        self.consumed = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fill_then_read() {
        let mut b = StagingBuffer::with_capacity(8);
        assert_eq!(b.remaining(), 8);

        b.put(b"hello");
        assert_eq!(b.remaining(), 3);
        assert_eq!(b.readable(), b"hello");

        b.consume(5);
        assert_eq!(b.readable_len(), 0);

        b.clear();
        assert_eq!(b.remaining(), 8);
    }

    #[test]
    fn compact_preserves_residual() {
        let mut b = StagingBuffer::with_capacity(8);
        b.put(b"abcdef");
        b.consume(4);
        assert_eq!(b.readable(), b"ef");

        b.compact();
        assert_eq!(b.readable(), b"ef");
        assert_eq!(b.remaining(), 6);

        // Filling resumes behind the residual bytes.
        b.put(b"gh");
        assert_eq!(b.readable(), b"efgh");
    }
}
