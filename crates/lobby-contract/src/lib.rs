//! Normalized channel-event contract shared by adapters and the identity core.
//!
//! Channel adapters (LINE webhook, Facebook webhook, webchat gateway)
//! translate provider payloads into the types defined here before anything
//! touches identity or conversation state.

mod channel_event_contract;

pub use channel_event_contract::{
    load_channel_event_fixture, parse_channel_event_fixture, validate_channel_inbound_event,
    ChannelEventFixture, ChannelEventKind, ChannelInboundEvent, ChannelKind,
    CHANNEL_EVENT_CONTRACT_SCHEMA_VERSION,
};
