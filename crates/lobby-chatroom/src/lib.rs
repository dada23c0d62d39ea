//! Agent-facing chatroom assembly over the identity and conversation cores.
//!
//! Read-side aggregation: which channels a member can be reached on, which
//! one the agent should reply through by default, and the merged timeline.
//! The only write is the documented lazy thread creation.

mod chatroom_member_list;
mod chatroom_session;

pub use chatroom_member_list::MemberListEntry;
pub use chatroom_session::{
    ChannelAvailability, ChatroomError, ChatroomSession, ChatroomSessionAssembler,
    REPLY_WINDOW_MS,
};
