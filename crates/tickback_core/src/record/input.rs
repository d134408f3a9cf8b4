//! Packed input channels.
//!
//! Every input-producing component declares how many scalar and boolean
//! channels it needs. An entity's record width is the sum over its
//! components, and components write and read their channels in declaration
//! order. The cursor types make the order explicit; running past the
//! declared width is flagged rather than panicking, so owners can report a
//! layout mismatch as a diagnostic.

use serde::{Deserialize, Serialize};

/// Channel counts for one component or a whole entity.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InputLayout {
    /// Number of `f32` channels.
    pub scalars: usize,
    /// Number of `bool` channels.
    pub bools: usize,
}

impl InputLayout {
    /// No channels.
    pub const EMPTY: Self = Self::new(0, 0);

    /// Creates a layout.
    #[must_use]
    pub const fn new(scalars: usize, bools: usize) -> Self {
        Self { scalars, bools }
    }

    /// True if the layout has no channels.
    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.scalars == 0 && self.bools == 0
    }
}

impl std::ops::Add for InputLayout {
    type Output = Self;
    fn add(self, rhs: Self) -> Self {
        Self::new(self.scalars + rhs.scalars, self.bools + rhs.bools)
    }
}

impl std::ops::AddAssign for InputLayout {
    fn add_assign(&mut self, rhs: Self) {
        *self = *self + rhs;
    }
}

/// Fixed-width packed input (also used for component state payloads).
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct InputRecord {
    scalars: Vec<f32>,
    bools: Vec<bool>,
}

impl InputRecord {
    /// Creates a zeroed record with the given layout.
    #[must_use]
    pub fn new(layout: InputLayout) -> Self {
        Self {
            scalars: vec![0.0; layout.scalars],
            bools: vec![false; layout.bools],
        }
    }

    /// Creates a record from raw channel values.
    #[must_use]
    pub fn from_channels(scalars: Vec<f32>, bools: Vec<bool>) -> Self {
        Self { scalars, bools }
    }

    /// Layout of this record.
    #[must_use]
    pub fn layout(&self) -> InputLayout {
        InputLayout::new(self.scalars.len(), self.bools.len())
    }

    /// Scalar channels.
    #[must_use]
    pub fn scalars(&self) -> &[f32] {
        &self.scalars
    }

    /// Boolean channels.
    #[must_use]
    pub fn bools(&self) -> &[bool] {
        &self.bools
    }

    /// Zeroes every channel, keeping the width.
    pub fn reset(&mut self) {
        self.scalars.iter_mut().for_each(|s| *s = 0.0);
        self.bools.iter_mut().for_each(|b| *b = false);
    }

    /// Starts writing from the first channel.
    pub fn writer(&mut self) -> InputWriter<'_> {
        InputWriter {
            record: self,
            scalar: 0,
            flag: 0,
            overrun: false,
        }
    }

    /// Starts reading from the first channel.
    #[must_use]
    pub fn reader(&self) -> InputReader<'_> {
        InputReader {
            record: self,
            scalar: 0,
            flag: 0,
            overrun: false,
        }
    }
}

/// Sequential writer over an [`InputRecord`].
#[derive(Debug)]
pub struct InputWriter<'a> {
    record: &'a mut InputRecord,
    scalar: usize,
    flag: usize,
    overrun: bool,
}

impl InputWriter<'_> {
    /// Writes the next scalar channel.
    pub fn write_scalar(&mut self, value: f32) {
        match self.record.scalars.get_mut(self.scalar) {
            Some(slot) => *slot = value,
            None => self.overrun = true,
        }
        self.scalar += 1;
    }

    /// Writes the next boolean channel.
    pub fn write_bool(&mut self, value: bool) {
        match self.record.bools.get_mut(self.flag) {
            Some(slot) => *slot = value,
            None => self.overrun = true,
        }
        self.flag += 1;
    }

    /// True if a write went past the record width.
    #[must_use]
    pub fn overrun(&self) -> bool {
        self.overrun
    }

    /// Channels written so far.
    #[must_use]
    pub fn position(&self) -> InputLayout {
        InputLayout::new(self.scalar, self.flag)
    }

    /// Moves the cursors to `position`.
    pub fn seek(&mut self, position: InputLayout) {
        self.scalar = position.scalars;
        self.flag = position.bools;
    }
}

/// Sequential reader over an [`InputRecord`].
#[derive(Debug, Clone)]
pub struct InputReader<'a> {
    record: &'a InputRecord,
    scalar: usize,
    flag: usize,
    overrun: bool,
}

impl InputReader<'_> {
    /// Reads the next scalar channel, `0.0` past the end.
    pub fn read_scalar(&mut self) -> f32 {
        let value = self.record.scalars.get(self.scalar).copied();
        self.scalar += 1;
        value.unwrap_or_else(|| {
            self.overrun = true;
            0.0
        })
    }

    /// Reads the next boolean channel, `false` past the end.
    pub fn read_bool(&mut self) -> bool {
        let value = self.record.bools.get(self.flag).copied();
        self.flag += 1;
        value.unwrap_or_else(|| {
            self.overrun = true;
            false
        })
    }

    /// True if a read went past the record width.
    #[must_use]
    pub fn overrun(&self) -> bool {
        self.overrun
    }

    /// Channels consumed so far.
    #[must_use]
    pub fn position(&self) -> InputLayout {
        InputLayout::new(self.scalar, self.flag)
    }

    /// Moves the cursors to `position`.
    pub fn seek(&mut self, position: InputLayout) {
        self.scalar = position.scalars;
        self.flag = position.bools;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_then_read_in_order() {
        let mut record = InputRecord::new(InputLayout::new(2, 1));
        {
            let mut writer = record.writer();
            writer.write_scalar(0.5);
            writer.write_bool(true);
            writer.write_scalar(-1.0);
            assert!(!writer.overrun());
        }

        let mut reader = record.reader();
        assert_eq!(reader.read_scalar(), 0.5);
        assert_eq!(reader.read_scalar(), -1.0);
        assert!(reader.read_bool());
        assert!(!reader.overrun());
    }

    #[test]
    fn test_overrun_is_flagged_not_fatal() {
        let mut record = InputRecord::new(InputLayout::new(1, 0));
        let mut writer = record.writer();
        writer.write_scalar(1.0);
        writer.write_scalar(2.0);
        writer.write_bool(true);
        assert!(writer.overrun());

        let mut reader = record.reader();
        assert_eq!(reader.read_scalar(), 1.0);
        assert_eq!(reader.read_scalar(), 0.0);
        assert!(!reader.read_bool());
        assert!(reader.overrun());
    }

    #[test]
    fn test_seek_realigns_cursor() {
        let record = InputRecord::from_channels(vec![1.0, 2.0, 3.0], vec![true]);
        let mut reader = record.reader();
        reader.read_scalar();
        assert_eq!(reader.position(), InputLayout::new(1, 0));
        reader.seek(InputLayout::new(2, 1));
        assert_eq!(reader.read_scalar(), 3.0);
        assert!(!reader.read_bool());
        assert!(reader.overrun());
    }

    #[test]
    fn test_layout_sum() {
        let mut total = InputLayout::EMPTY;
        total += InputLayout::new(3, 0);
        total += InputLayout::new(1, 2);
        assert_eq!(total, InputLayout::new(4, 2));
        assert!(InputLayout::EMPTY.is_empty());
        assert_eq!(InputRecord::new(total).layout(), total);
    }
}
