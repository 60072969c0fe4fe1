use std::{
    mem::{self, MaybeUninit},
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use crossbeam_utils::CachePadded;

use super::LOCAL_EPOCH;

/// Creates a single-producer/single-consumer ring buffer of the given
/// power-of-two capacity, returning the producer and consumer handles.
pub(crate) fn ringbuffer_spsc<T>(capacity: usize) -> (RingWriter<T>, RingReader<T>) {
    let rb = Arc::new(RingBuffer::new(capacity));
    (RingWriter::new(rb.clone(), None), RingReader::new(rb))
}

/// Like [`ringbuffer_spsc`], but a push against a full ring spins for up to
/// `bound` before giving the element back. The send pipeline relies on ring
/// growth instead, so nothing there asks for a spin bound.
#[allow(dead_code)]
pub(crate) fn ringbuffer_spsc_spin<T>(capacity: usize, bound: Duration) -> (RingWriter<T>, RingReader<T>) {
    let rb = Arc::new(RingBuffer::new(capacity));
    (RingWriter::new(rb.clone(), Some(bound)), RingReader::new(rb))
}

/// Backing storage shared by exactly one writer and one reader handle.
///
/// Holds the raw slot array behind a boxed-slice pointer plus the two
/// atomic cursors. Cursors are free-running (they wrap at `usize::MAX`,
/// never reset); a cursor masked by `capacity - 1` yields its slot
/// position.
struct RingBuffer<T> {
    ptr: *mut [MaybeUninit<T>],
    mask: usize,
    idx_r: CachePadded<AtomicUsize>,
    idx_w: CachePadded<AtomicUsize>,
}

impl<T> RingBuffer<T> {
    fn new(capacity: usize) -> Self {
        assert!(capacity.is_power_of_two(), "Capacity must be a power of 2");

        let ptr = Box::into_raw(
            (0..capacity)
                .map(|_| MaybeUninit::uninit())
                .collect::<Vec<_>>()
                .into_boxed_slice(),
        );

        RingBuffer {
            ptr,
            // capacity - 1 only works as a position mask because capacity
            // is a power of two.
            mask: capacity - 1,
            idx_r: CachePadded::new(AtomicUsize::new(0)),
            idx_w: CachePadded::new(AtomicUsize::new(0)),
        }
    }

    #[inline]
    const fn is_empty(r: usize, w: usize) -> bool {
        r == w
    }

    #[inline]
    const fn is_full(r: usize, w: usize, c: usize) -> bool {
        w.wrapping_sub(r) == c
    }

    fn capacity(&self) -> usize {
        self.mask + 1
    }

    #[allow(clippy::mut_from_ref)]
    unsafe fn get_slice_mut(&self) -> &mut [MaybeUninit<T>] {
        unsafe { &mut *self.ptr }
    }

    #[allow(clippy::mut_from_ref)]
    unsafe fn get_elem_mut(&self, idx: usize) -> &mut MaybeUninit<T> {
        let idx = idx & self.mask;
        unsafe { self.get_slice_mut().get_unchecked_mut(idx) }
    }
}

// Runs once the last handle is gone (the storage lives in an `Arc`): first
// drop whatever is still queued, then free the slot array itself.
impl<T> Drop for RingBuffer<T> {
    fn drop(&mut self) {
        let mut idx_r = self.idx_r.load(Ordering::Acquire);
        let idx_w = self.idx_w.load(Ordering::Acquire);

        while idx_r != idx_w {
            // SAFETY: both handles are gone, so nothing races this loop,
            // and every slot in idx_r..idx_w holds an initialized element
            // that was never pulled. Taking each one out exactly once is
            // sound.
            let t = unsafe { mem::replace(self.get_elem_mut(idx_r), MaybeUninit::uninit()).assume_init() };
            mem::drop(t);
            idx_r = idx_r.wrapping_add(1);
        }

        // With no live elements left in the slots, reconstituting the `Box`
        // frees the allocation without running any element destructor twice.
        let ptr = unsafe { Box::from_raw(self.ptr) };
        mem::drop(ptr);
    }
}

/// Producer-side handle; owns the write cursor and a cached copy of the
/// read cursor that is refreshed only when the ring looks full.
pub(crate) struct RingWriter<T> {
    inner: Arc<RingBuffer<T>>,
    cached_idx_r: usize,
    local_idx_w: usize,
    spin: Option<Duration>,
}

unsafe impl<T: Send> Send for RingWriter<T> {}
unsafe impl<T: Sync> Sync for RingWriter<T> {}

impl<T> RingWriter<T> {
    fn new(inner: Arc<RingBuffer<T>>, spin: Option<Duration>) -> Self {
        Self {
            inner,
            cached_idx_r: 0,
            local_idx_w: 0,
            spin,
        }
    }

    pub(crate) fn capacity(&self) -> usize {
        self.inner.capacity()
    }

    #[inline]
    fn is_full(&mut self) -> bool {
        let mut is_full = RingBuffer::<T>::is_full(self.cached_idx_r, self.local_idx_w, self.inner.capacity());
        if is_full {
            self.cached_idx_r = self.inner.idx_r.load(Ordering::Acquire);
            is_full = RingBuffer::<T>::is_full(self.cached_idx_r, self.local_idx_w, self.inner.capacity());
        }
        is_full
    }

    /// Attempts to append `t`.
    ///
    /// A full ring hands the value back as `Some(t)`; on success the element
    /// becomes visible to the reader and `None` is returned. When the ring
    /// was built with a spin bound, a push against a full ring keeps
    /// retrying until the bound elapses.
    #[inline]
    pub(crate) fn push(&mut self, t: T) -> Option<T> {
        if self.is_full() {
            let Some(bound) = self.spin else {
                return Some(t);
            };
            let deadline = LOCAL_EPOCH.elapsed() + bound;
            loop {
                std::thread::yield_now();
                if !self.is_full() {
                    break;
                }
                if LOCAL_EPOCH.elapsed() >= deadline {
                    return Some(t);
                }
            }
        }

        let _ = mem::replace(
            // SAFETY: the slot at `local_idx_w` is free, hence it is not
            // aliased by the reader side.
            unsafe { self.inner.get_elem_mut(self.local_idx_w) },
            MaybeUninit::new(t),
        );

        // Publish the advanced write cursor; it is free-running and wraps
        // on overflow.
        self.local_idx_w = self.local_idx_w.wrapping_add(1);
        self.inner.idx_w.store(self.local_idx_w, Ordering::Release);

        None
    }
}

/// Consumer-side handle; owns the read cursor and a cached copy of the
/// write cursor that is refreshed by `len()` and empty checks.
pub(crate) struct RingReader<T> {
    inner: Arc<RingBuffer<T>>,
    local_idx_r: usize,
    cached_idx_w: usize,
}

unsafe impl<T: Send> Send for RingReader<T> {}
unsafe impl<T: Sync> Sync for RingReader<T> {}

impl<T> RingReader<T> {
    fn new(inner: Arc<RingBuffer<T>>) -> Self {
        Self {
            inner,
            local_idx_r: 0,
            cached_idx_w: 0,
        }
    }

    /// Number of queued elements, from a fresh snapshot of the producer
    /// counter.
    ///
    /// The producer only ever adds elements, so the returned count is a valid
    /// lower bound for a subsequent batch of unchecked dequeues.
    #[inline]
    pub(crate) fn len(&mut self) -> usize {
        self.cached_idx_w = self.inner.idx_w.load(Ordering::Acquire);
        self.cached_idx_w.wrapping_sub(self.local_idx_r)
    }

    #[inline]
    pub(crate) fn is_empty(&mut self) -> bool {
        let mut is_empty = RingBuffer::<T>::is_empty(self.local_idx_r, self.cached_idx_w);
        if is_empty {
            self.cached_idx_w = self.inner.idx_w.load(Ordering::Acquire);
            is_empty = RingBuffer::<T>::is_empty(self.local_idx_r, self.cached_idx_w);
        }
        is_empty
    }

    /// Removes and returns the head element, or `None` on an empty ring.
    #[inline]
    pub(crate) fn pull(&mut self) -> Option<T> {
        if self.is_empty() {
            return None;
        }
        // SAFETY: the emptiness check above guarantees the head element is
        // initialized.
        Some(unsafe { self.pull_unchecked() })
    }

    /// Pull the head element without checking for emptiness.
    ///
    /// # Safety
    ///
    /// The caller must have observed `len() > 0` (or a non-empty ring) and
    /// not consumed more elements than observed since. Pulling from an empty
    /// ring reads uninitialized memory.
    #[inline]
    pub(crate) unsafe fn pull_unchecked(&mut self) -> T {
        let t = unsafe { mem::replace(self.inner.get_elem_mut(self.local_idx_r), MaybeUninit::uninit()).assume_init() };
        // Publish the advanced read cursor (free-running, wraps on
        // overflow), releasing the slot back to the writer.
        self.local_idx_r = self.local_idx_r.wrapping_add(1);
        self.inner.idx_r.store(self.local_idx_r, Ordering::Release);
        t
    }

    /// Peek a mutable reference to the head element without pulling it out.
    #[cfg(test)]
    #[inline]
    pub(crate) fn peek_mut(&mut self) -> Option<&mut T> {
        if self.is_empty() {
            return None;
        }
        // SAFETY: the emptiness check above guarantees the head element is
        // initialized.
        Some(unsafe { self.peek_mut_unchecked() })
    }

    /// Peek a mutable reference to the head element without checking for
    /// emptiness.
    ///
    /// # Safety
    ///
    /// Same contract as [`pull_unchecked`](Self::pull_unchecked): the caller
    /// has already observed that the ring is non-empty.
    #[inline]
    pub(crate) unsafe fn peek_mut_unchecked(&mut self) -> &mut T {
        unsafe { self.inner.get_elem_mut(self.local_idx_r).assume_init_mut() }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    // Elements arrive in order
    #[test]
    fn it_works() {
        const N: usize = 1_000_000;

        let (mut tx, mut rx) = ringbuffer_spsc::<usize>(16);

        let p = std::thread::spawn(move || {
            let mut current: usize = 0;
            while current < N {
                if tx.push(current).is_none() {
                    current = current.wrapping_add(1);
                } else {
                    std::thread::yield_now();
                }
            }
        });

        let c = std::thread::spawn(move || {
            let mut current: usize = 0;
            while current < N {
                if let Some(c) = rx.peek_mut() {
                    assert_eq!(*c, current);
                    let c = rx.pull().unwrap();
                    assert_eq!(c, current);
                    current = current.wrapping_add(1);
                } else {
                    std::thread::yield_now();
                }
            }
        });

        p.join().unwrap();
        c.join().unwrap();
    }

    #[test]
    fn unchecked_batch() {
        let (mut tx, mut rx) = ringbuffer_spsc::<u32>(8);
        for i in 0..6 {
            assert!(tx.push(i).is_none());
        }

        // A single length snapshot covers the whole batch of dequeues.
        let mut size = rx.len();
        assert_eq!(size, 6);
        let mut expected = 0;
        while size > 0 {
            // SAFETY: `size` elements were observed queued above.
            let head = unsafe { rx.peek_mut_unchecked() };
            assert_eq!(*head, expected);
            // SAFETY: same snapshot as above.
            let t = unsafe { rx.pull_unchecked() };
            assert_eq!(t, expected);
            expected += 1;
            size -= 1;
        }
        assert!(rx.pull().is_none());
    }

    #[test]
    fn spin_gives_up() {
        let (mut tx, mut rx) = ringbuffer_spsc_spin::<u32>(2, Duration::from_millis(5));
        assert!(tx.push(1).is_none());
        assert!(tx.push(2).is_none());

        // Full and nobody pulling: the push must come back after the bound.
        let start = std::time::Instant::now();
        assert_eq!(tx.push(3), Some(3));
        assert!(start.elapsed() >= Duration::from_millis(5));

        // Space opens up: the spin variant behaves like the plain one.
        assert_eq!(rx.pull(), Some(1));
        assert!(tx.push(3).is_none());
    }

    // Memory drop check
    static COUNTER: AtomicUsize = AtomicUsize::new(0);

    struct DropCounter;

    impl DropCounter {
        fn new() -> Self {
            COUNTER.fetch_add(1, Ordering::SeqCst);
            Self
        }
    }

    impl Drop for DropCounter {
        fn drop(&mut self) {
            COUNTER.fetch_sub(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn memcheck() {
        const N: usize = 128;

        let (mut tx, rx) = ringbuffer_spsc::<DropCounter>(N);
        for _ in 0..N {
            assert!(tx.push(DropCounter::new()).is_none());
        }
        assert!(tx.push(DropCounter::new()).is_some());

        assert_eq!(
            COUNTER.load(Ordering::SeqCst),
            N,
            "There should be as many counters as ringbuffer capacity"
        );

        // Drop both reader and writer
        drop(tx);
        drop(rx);

        assert_eq!(
            COUNTER.load(Ordering::SeqCst),
            0,
            "All the drop counters should have been dropped"
        );
    }
}
