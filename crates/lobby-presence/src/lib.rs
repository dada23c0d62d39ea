//! Webchat session continuity: online/offline debounce and uid issuance.
//!
//! Webchat has no native follow or presence signal, so presence is derived
//! from websocket connect/disconnect signals with a grace window. The
//! gateway owns heartbeats; this crate only consumes the resulting signals.

mod presence_tracker;

pub use presence_tracker::{
    offline_deadline_ms, SessionContinuityTracker, DEFAULT_GRACE_WINDOW,
};
