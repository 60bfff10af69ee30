/// Growable write buffer keeping track of the filled region.
///
/// Used where the total output size is not known up front, e.g. when
/// accumulating feedback elements to piggyback on the reverse channel.
#[derive(Debug, Default)]
pub struct WriteBuf {
    inner: Vec<u8>,
    filled: usize,
}

impl WriteBuf {
    /// Creates an empty buffer.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Vec::new(),
            filled: 0,
        }
    }

    /// Creates an empty buffer with at least `capacity` bytes of capacity.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: vec![0; capacity],
            filled: 0,
        }
    }

    /// Returns the filled region.
    #[inline]
    pub fn filled(&self) -> &[u8] {
        &self.inner[..self.filled]
    }

    /// Returns the number of filled bytes.
    #[inline]
    pub const fn filled_len(&self) -> usize {
        self.filled
    }

    #[inline]
    pub const fn is_empty(&self) -> bool {
        self.filled == 0
    }

    /// Returns a mutable slice of `len` unfilled bytes, growing the buffer as required.
    pub fn unfilled_to(&mut self, len: usize) -> &mut [u8] {
        let required = self.filled + len;
        if self.inner.len() < required {
            self.inner.resize(required, 0);
        }
        &mut self.inner[self.filled..required]
    }

    /// Marks `len` additional bytes as filled.
    #[inline]
    pub fn advance(&mut self, len: usize) {
        self.filled += len;
        debug_assert!(self.filled <= self.inner.len());
    }

    /// Appends a byte slice to the filled region.
    pub fn write_slice(&mut self, slice: &[u8]) {
        self.unfilled_to(slice.len()).copy_from_slice(slice);
        self.advance(slice.len());
    }

    /// Resets the filled region without releasing the allocation.
    #[inline]
    pub fn clear(&mut self) {
        self.filled = 0;
    }

    /// Consumes the buffer and returns the filled region as a `Vec`.
    #[must_use]
    pub fn into_vec(mut self) -> Vec<u8> {
        self.inner.truncate(self.filled);
        self.inner
    }
}
