//! History buffers.
//!
//! Two addressing schemes, two types:
//!
//! - [`RingBuffer`]: raw `usize` index, wrapping write cursor.
//! - [`TickIndexedBuffer`]: [`crate::Tick`] keyed, tolerant of gaps and
//!   out-of-order arrival.

mod ring;
mod tick_indexed;

pub use ring::RingBuffer;
pub use tick_indexed::TickIndexedBuffer;
