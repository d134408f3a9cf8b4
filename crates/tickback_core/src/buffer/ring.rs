//! Fixed-capacity circular store addressed by raw index.

/// Ring buffer with a wrapping write cursor.
///
/// Storage is allocated once at construction and never resized. The buffer
/// knows nothing about ticks: owners that store tick-tagged data map ticks to
/// indices themselves (see [`crate::Tick::slot`]).
#[derive(Clone, Debug)]
pub struct RingBuffer<T> {
    /// Element storage.
    slots: Vec<T>,
    /// Next write position.
    cursor: usize,
    /// Number of logically valid elements (saturates at capacity).
    fill: usize,
}

impl<T: Clone + Default> RingBuffer<T> {
    /// Creates a ring buffer of `capacity` default-initialized slots.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "ring buffer capacity must be non-zero");
        Self {
            slots: vec![T::default(); capacity],
            cursor: 0,
            fill: 0,
        }
    }

    /// Resets cursor and fill. Slot contents are reset to default so stale
    /// data never leaks through raw access.
    pub fn clear(&mut self) {
        for slot in &mut self.slots {
            *slot = T::default();
        }
        self.cursor = 0;
        self.fill = 0;
    }
}

impl<T> RingBuffer<T> {
    /// Writes `value` at the cursor and advances it.
    pub fn add(&mut self, value: T) {
        self.slots[self.cursor] = value;
        self.cursor = (self.cursor + 1) % self.slots.len();
        if self.fill < self.slots.len() {
            self.fill += 1;
        }
    }

    /// Element physically stored at `index mod capacity`.
    #[inline]
    #[must_use]
    pub fn get(&self, index: usize) -> &T {
        &self.slots[index % self.slots.len()]
    }

    /// Mutable element at `index mod capacity`.
    #[inline]
    pub fn get_mut(&mut self, index: usize) -> &mut T {
        let len = self.slots.len();
        &mut self.slots[index % len]
    }

    /// Overwrites the element at `index mod capacity`.
    ///
    /// Raw writes do not move the cursor or change the fill.
    #[inline]
    pub fn set(&mut self, index: usize, value: T) {
        let len = self.slots.len();
        self.slots[index % len] = value;
    }

    /// Oldest element written through [`RingBuffer::add`].
    #[must_use]
    pub fn start(&self) -> Option<&T> {
        if self.fill == 0 {
            return None;
        }
        let len = self.slots.len();
        Some(&self.slots[(self.cursor + len - self.fill) % len])
    }

    /// Newest element written through [`RingBuffer::add`].
    #[must_use]
    pub fn end(&self) -> Option<&T> {
        if self.fill == 0 {
            return None;
        }
        let len = self.slots.len();
        Some(&self.slots[(self.cursor + len - 1) % len])
    }

    /// Iterates the added elements oldest to newest.
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        let len = self.slots.len();
        let first = (self.cursor + len - self.fill) % len;
        (0..self.fill).map(move |i| &self.slots[(first + i) % len])
    }

    /// Number of logically valid elements.
    #[inline]
    #[must_use]
    pub fn fill(&self) -> usize {
        self.fill
    }

    /// True if nothing was added since construction or the last clear.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fill == 0
    }

    /// Fixed capacity.
    #[inline]
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }
}
