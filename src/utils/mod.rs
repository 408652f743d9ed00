//! Utility types.

pub mod timers;

pub use timers::CancellableTimer;
