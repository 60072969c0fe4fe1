use core::{
    fmt,
    ops::{Deref, RangeBounds},
};
use std::sync::Arc;

/// Backing storage for a [`Chunk`].
///
/// Any byte-sliceable owner that can be shared across threads qualifies:
/// `Vec<u8>`, `Box<[u8]>`, arrays, `String`, static slices and strings, and
/// so on — everything `AsRef<[u8]> + Send + Sync`.
pub trait ChunkBuf: Send + Sync {
    /// Returns a byte slice view of the entire buffer.
    fn as_slice(&self) -> &[u8];
}

impl<T> ChunkBuf for T
where
    T: AsRef<[u8]> + Send + Sync,
{
    fn as_slice(&self) -> &[u8] {
        self.as_ref()
    }
}

/// A reference-counted, immutable run of bytes.
///
/// The backing buffer lives behind an [`Arc`] and a `Chunk` carries a
/// `start..end` window into it, so clones and subrange views cost a
/// refcount bump and never copy. A frame handed to the send pipeline stays
/// alive until fully written while the caller keeps using its own handle.
///
/// Immutability is the point: once wrapped, the bytes a queued frame refers
/// to cannot change between enqueue and transmission.
///
/// # Examples
///
/// ```
/// use penstock::Chunk;
///
/// let data = vec![1, 2, 3, 4, 5];
/// let chunk: Chunk = data.into();
/// assert_eq!(chunk.len(), 5);
/// assert_eq!(chunk.as_slice(), &[1, 2, 3, 4, 5]);
///
/// // Cloning is cheap - only increments the reference count.
/// let clone = chunk.clone();
/// assert_eq!(chunk, clone);
///
/// // Views are zero-copy subslices.
/// let view = chunk.view(1..4).unwrap();
/// assert_eq!(view.as_slice(), &[2, 3, 4]);
/// ```
#[derive(Clone)]
pub struct Chunk {
    buf: Arc<dyn ChunkBuf>,
    start: usize,
    end: usize,
}

impl Chunk {
    /// Returns the length of the buffer in bytes.
    pub const fn len(&self) -> usize {
        self.end - self.start
    }

    /// Returns `true` if the buffer has a length of 0.
    pub const fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns a byte slice view of the buffer.
    pub fn as_slice(&self) -> &[u8] {
        // start..end is in bounds by construction: `From` covers the whole
        // backing buffer and `view()` only narrows validated windows.
        &self.buf.as_slice()[self.start..self.end]
    }

    /// Creates a view into a subrange of this buffer, relative to the
    /// current view.
    ///
    /// The new [`Chunk`] shares the backing buffer; no bytes are copied.
    ///
    /// # Returns
    ///
    /// Returns `Some(Chunk)` if the range is valid, or `None` if the range is
    /// out of bounds.
    ///
    /// # Examples
    ///
    /// ```
    /// use penstock::Chunk;
    ///
    /// let buf: Chunk = vec![1, 2, 3, 4, 5].into();
    /// let view = buf.view(1..4).unwrap();
    /// assert_eq!(&*view, &[2, 3, 4]);
    ///
    /// // Can create views of views
    /// let sub_view = view.view(1..2).unwrap();
    /// assert_eq!(&*sub_view, &[3]);
    /// ```
    #[must_use]
    pub fn view(&self, range: impl RangeBounds<usize>) -> Option<Self> {
        // Let the standard library normalize and bounds-check the range
        // against the current window, then recover the window offsets from
        // where the subslice landed.
        let base = self.as_slice();
        let sub = base.get((range.start_bound().cloned(), range.end_bound().cloned()))?;
        let start = self.start + (sub.as_ptr() as usize - base.as_ptr() as usize);
        Some(Chunk {
            buf: Arc::clone(&self.buf),
            start,
            end: start + sub.len(),
        })
    }
}

impl Deref for Chunk {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        self.as_slice()
    }
}

impl PartialEq for Chunk {
    fn eq(&self, other: &Chunk) -> bool {
        self.as_slice() == other.as_slice()
    }
}

impl<Rhs: AsRef<[u8]> + ?Sized> PartialEq<Rhs> for Chunk {
    fn eq(&self, other: &Rhs) -> bool {
        self.as_slice() == other.as_ref()
    }
}

impl Eq for Chunk {}

impl fmt::Debug for Chunk {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:02x?}", self.as_slice())
    }
}

impl<T> From<T> for Chunk
where
    T: ChunkBuf + 'static,
{
    fn from(buf: T) -> Self {
        let end = buf.as_slice().len();
        Self {
            buf: Arc::new(buf),
            start: 0,
            end,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_as_slice() {
        let chunk: Chunk = vec![1u8, 2, 3, 4, 5].into();
        assert_eq!(chunk.as_slice(), &[1, 2, 3, 4, 5]);

        let view = chunk.view(2..4).unwrap();
        assert_eq!(view.as_slice(), &[3, 4]);

        let empty = chunk.view(2..2).unwrap();
        assert!(empty.is_empty());

        // Different backing buffer types
        let box_chunk: Chunk = vec![4u8, 5, 6].into_boxed_slice().into();
        assert_eq!(box_chunk.as_slice(), &[4, 5, 6]);

        let array_chunk: Chunk = [7u8, 8, 9].into();
        assert_eq!(array_chunk.as_slice(), &[7, 8, 9]);

        let str_chunk: Chunk = "hello".into();
        assert_eq!(str_chunk.as_slice(), b"hello");
    }

    #[test]
    fn chunk_view() {
        let chunk: Chunk = vec![0u8, 1, 2, 3, 4, 5, 6, 7, 8, 9].into();

        assert_eq!(chunk.view(..).unwrap().as_slice(), &[0, 1, 2, 3, 4, 5, 6, 7, 8, 9]);
        assert_eq!(chunk.view(2..6).unwrap().as_slice(), &[2, 3, 4, 5]);
        assert_eq!(chunk.view(..3).unwrap().as_slice(), &[0, 1, 2]);
        assert_eq!(chunk.view(7..).unwrap().as_slice(), &[7, 8, 9]);
        assert_eq!(chunk.view(1..=4).unwrap().as_slice(), &[1, 2, 3, 4]);

        // Nested views
        let view = chunk.view(2..8).unwrap();
        let sub = view.view(1..4).unwrap();
        assert_eq!(sub.as_slice(), &[3, 4, 5]);

        // Out of bounds
        assert!(chunk.view(0..20).is_none());
        assert!(chunk.view(15..).is_none());
        assert!(view.view(0..10).is_none());

        // Inverted ranges are rejected, not collapsed.
        #[allow(clippy::reversed_empty_ranges)]
        let inverted = chunk.view(5..2);
        assert!(inverted.is_none());
    }

    #[test]
    fn chunk_clone_shares_buffer() {
        let chunk: Chunk = vec![1u8, 2, 3, 4].into();
        let clone = chunk.clone();
        assert_eq!(chunk, clone);
        assert_eq!(clone, [1u8, 2, 3, 4]);
    }
}
