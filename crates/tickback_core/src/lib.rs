//! # Tickback Core - Tick-Addressed History
//!
//! The data layer under the rollback engine. Everything here is plain data
//! and plain containers: no physics, no policy, no I/O.
//!
//! ## Contents
//!
//! - **Ticks**: [`Tick`] newtype plus entity, body and connection ids
//! - **Buffers**: [`RingBuffer`] (raw index) and [`TickIndexedBuffer`] (tick)
//! - **Records**: [`InputRecord`], [`StateRecord`], [`WorldStateRecord`]
//! - **Math**: [`Vec3`], [`Quaternion`]
//!
//! ## Addressing
//!
//! ```text
//!   RingBuffer<T>            TickIndexedBuffer<T>
//!   get(usize) -> &T          get(Tick) -> Option<&T>
//!   wraps silently            None when evicted / never written
//! ```
//!
//! Keeping the two behind different types means a slot index can never be
//! passed where a tick is expected.

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![deny(clippy::perf)]
#![allow(clippy::cast_possible_truncation)]

pub mod buffer;
pub mod math;
pub mod record;
pub mod tick;

pub use buffer::{RingBuffer, TickIndexedBuffer};
pub use math::{Quaternion, Vec3};
pub use record::{BodyState, InputLayout, InputReader, InputRecord, InputWriter, StateRecord, WorldStateRecord};
pub use tick::{BodyHandle, ConnectionId, EntityId, Tick};

/// Default history depth in ticks (about one second at 60 Hz).
pub const DEFAULT_HISTORY_SIZE: usize = 64;
