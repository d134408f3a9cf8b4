//! Records exchanged between client and authority.

pub mod input;
pub mod state;

pub use input::{InputLayout, InputReader, InputRecord, InputWriter};
pub use state::{BodyState, StateRecord, WorldStateRecord};
