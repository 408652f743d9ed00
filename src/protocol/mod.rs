//! Wire protocol implementation.

pub mod messages;

pub use messages::*;
