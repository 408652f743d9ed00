//! Channel types and management.

mod channel;
mod members;
mod presence;
mod registry;

pub use channel::{Channel, ChannelType, MemberHook, SendEventFn};
pub use members::{Member, Members};
pub use presence::PresenceChannel;
pub use registry::ChannelRegistry;
