//! Per-channel follow/contact state for LINE, Facebook, and webchat guests.
//!
//! One `ChannelFriendRegistry` instance exists per channel. The registry owns
//! follow-state transitions and interaction bookkeeping; identity assignment
//! is exclusively the merge engine's job, so nothing here mutates members.

mod channel_friend;
mod channel_friend_registry;
mod channel_friend_sqlite;

pub use channel_friend::{ChannelFriend, FriendProfile};
pub use channel_friend_registry::{ChannelFriendRegistry, InMemoryChannelFriendRegistry};
pub use channel_friend_sqlite::SqliteChannelFriendRegistry;
