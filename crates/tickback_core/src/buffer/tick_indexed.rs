//! Ring buffer addressed by tick instead of raw index.

use super::ring::RingBuffer;
use crate::tick::Tick;

/// Tick-addressed history with out-of-order and missing-entry tolerance.
///
/// Each tick maps to slot `tick mod capacity`. A slot remembers which tick it
/// holds, so a lookup for an evicted or never-written tick yields `None`
/// instead of whatever happens to share the slot. Only ticks inside the
/// window `[end - capacity + 1, end]` are retrievable.
///
/// ```text
///   capacity = 4, end = 9
///   slot:   0      1      2      3
///   tick:  [8]    [9]    [ ]    [7]      window = 6..=9, tick 6 missing
/// ```
#[derive(Clone, Debug)]
pub struct TickIndexedBuffer<T> {
    slots: RingBuffer<Option<(Tick, T)>>,
    /// Oldest present tick (meaningful when fill > 0).
    start: Tick,
    /// Newest present tick (meaningful when fill > 0).
    end: Tick,
    fill: usize,
}

impl<T: Clone> TickIndexedBuffer<T> {
    /// Creates an empty buffer holding at most `capacity` ticks.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: RingBuffer::new(capacity),
            start: Tick::ZERO,
            end: Tick::ZERO,
            fill: 0,
        }
    }

    /// Removes every entry.
    pub fn clear(&mut self) {
        self.slots.clear();
        self.start = Tick::ZERO;
        self.end = Tick::ZERO;
        self.fill = 0;
    }
}

impl<T> TickIndexedBuffer<T> {
    /// Stores `value` for `tick`, replacing any previous value for that tick.
    ///
    /// A tick newer than the current end slides the window forward and
    /// evicts entries that fall out of it. A tick already older than the
    /// window cannot be represented and is rejected with `false`.
    pub fn add(&mut self, tick: Tick, value: T) -> bool {
        let capacity = self.slots.capacity() as u64;
        if self.fill > 0 {
            if u64::from(tick.0) + capacity <= u64::from(self.end.0) {
                return false;
            }
            if tick > self.end {
                let window_start = Tick(tick.0.saturating_sub(capacity as u32 - 1));
                self.evict_before(window_start);
            }
        }

        let slot = self.slots.get_mut(tick.slot(self.slots.capacity()));
        let replaced = slot.replace((tick, value));
        match replaced {
            Some((old, _)) if old == tick => {}
            _ => self.fill += 1,
        }

        if self.fill == 1 {
            self.start = tick;
            self.end = tick;
        } else {
            self.start = self.start.min(tick);
            self.end = self.end.max(tick);
        }
        true
    }

    /// Value stored for `tick`, or `None` if missing, evicted or out of window.
    #[must_use]
    pub fn get(&self, tick: Tick) -> Option<&T> {
        if !self.in_window(tick) {
            return None;
        }
        match self.slots.get(tick.slot(self.slots.capacity())) {
            Some((stored, value)) if *stored == tick => Some(value),
            _ => None,
        }
    }

    /// True if a value is present for `tick`.
    #[must_use]
    pub fn contains(&self, tick: Tick) -> bool {
        self.get(tick).is_some()
    }

    /// Removes and returns the value for `tick`.
    pub fn remove(&mut self, tick: Tick) -> Option<T> {
        if !self.contains(tick) {
            return None;
        }
        let (_, value) = self.slots.get_mut(tick.slot(self.slots.capacity())).take()?;
        self.fill -= 1;

        if self.fill > 0 {
            if tick == self.start {
                if let Some(next) = self.scan_forward(tick.next()) {
                    self.start = next;
                }
            } else if tick == self.end {
                if let Some(prev) = self.scan_backward(tick.prev()) {
                    self.end = prev;
                }
            }
        }
        Some(value)
    }

    /// Next present tick strictly after `after`.
    #[must_use]
    pub fn next_tick(&self, after: Tick) -> Option<Tick> {
        if self.fill == 0 || after >= self.end {
            return None;
        }
        self.scan_forward(after.next().max(self.start))
    }

    /// Oldest present tick.
    #[must_use]
    pub fn start_tick(&self) -> Option<Tick> {
        (self.fill > 0).then_some(self.start)
    }

    /// Newest present tick.
    #[must_use]
    pub fn end_tick(&self) -> Option<Tick> {
        (self.fill > 0).then_some(self.end)
    }

    /// Oldest present entry.
    #[must_use]
    pub fn first(&self) -> Option<(Tick, &T)> {
        let tick = self.start_tick()?;
        self.get(tick).map(|value| (tick, value))
    }

    /// Newest present entry.
    #[must_use]
    pub fn last(&self) -> Option<(Tick, &T)> {
        let tick = self.end_tick()?;
        self.get(tick).map(|value| (tick, value))
    }

    /// Span between oldest and newest present tick.
    ///
    /// Used as a lag/jitter metric: a growing range means entries are piling
    /// up faster than they are consumed.
    #[must_use]
    pub fn range(&self) -> u32 {
        if self.fill == 0 {
            0
        } else {
            self.end.since(self.start)
        }
    }

    /// Present entries, oldest to newest.
    pub fn iter(&self) -> impl Iterator<Item = (Tick, &T)> {
        let (first, last) = if self.fill == 0 { (1, 0) } else { (self.start.0, self.end.0) };
        (first..=last).filter_map(move |t| self.get(Tick(t)).map(|value| (Tick(t), value)))
    }

    /// Number of present entries.
    #[inline]
    #[must_use]
    pub fn fill(&self) -> usize {
        self.fill
    }

    /// True if no entry is present.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fill == 0
    }

    /// Fixed capacity in ticks.
    #[inline]
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.slots.capacity()
    }

    fn in_window(&self, tick: Tick) -> bool {
        self.fill > 0
            && tick <= self.end
            && u64::from(tick.0) + self.slots.capacity() as u64 > u64::from(self.end.0)
    }

    /// Drops every entry older than `window_start`.
    fn evict_before(&mut self, window_start: Tick) {
        if window_start > self.end {
            let capacity = self.slots.capacity();
            for index in 0..capacity {
                *self.slots.get_mut(index) = None;
            }
            self.fill = 0;
            return;
        }
        let mut t = self.start;
        while t < window_start {
            let slot = self.slots.get_mut(t.slot(self.slots.capacity()));
            if matches!(slot, Some((stored, _)) if *stored == t) {
                *slot = None;
                self.fill -= 1;
            }
            t = t.next();
        }
        if self.fill > 0 {
            if let Some(start) = self.scan_forward(window_start) {
                self.start = start;
            }
        }
    }

    fn scan_forward(&self, from: Tick) -> Option<Tick> {
        let capacity = self.slots.capacity();
        let mut t = from;
        while t <= self.end {
            if matches!(self.slots.get(t.slot(capacity)), Some((stored, _)) if *stored == t) {
                return Some(t);
            }
            t = t.next();
        }
        None
    }

    fn scan_backward(&self, from: Tick) -> Option<Tick> {
        let capacity = self.slots.capacity();
        let mut t = from;
        loop {
            if t < self.start {
                return None;
            }
            if matches!(self.slots.get(t.slot(capacity)), Some((stored, _)) if *stored == t) {
                return Some(t);
            }
            if t == Tick::ZERO {
                return None;
            }
            t = t.prev();
        }
    }
}
