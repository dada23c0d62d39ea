//! Grace-window debounce for webchat disconnects.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use anyhow::Result;
use lobby_channels::ChannelFriendRegistry;
use uuid::Uuid;

/// Disconnects not followed by a reconnect within this window become a real
/// offline transition.
pub const DEFAULT_GRACE_WINDOW: Duration = Duration::from_secs(60);

/// Instant at which a disconnect observed at `disconnect_unix_ms` is treated
/// as a confirmed offline transition.
pub fn offline_deadline_ms(disconnect_unix_ms: u64, grace_window: Duration) -> u64 {
    disconnect_unix_ms.saturating_add(grace_window.as_millis().min(u64::MAX as u128) as u64)
}

#[derive(Debug)]
struct PendingOffline {
    generation: u64,
    handle: tokio::task::JoinHandle<()>,
}

/// Public struct `SessionContinuityTracker` used across Lobby components.
///
/// A reconnect inside the grace window cancels the pending transition under
/// the same mutex that guards the registry write, so `Offline` is never
/// observed and then reverted. Initial state for a brand-new uid is offline.
pub struct SessionContinuityTracker {
    registry: Arc<dyn ChannelFriendRegistry>,
    grace_window: Duration,
    pending: Arc<Mutex<HashMap<String, PendingOffline>>>,
    next_generation: Mutex<u64>,
}

impl SessionContinuityTracker {
    pub fn new(registry: Arc<dyn ChannelFriendRegistry>, grace_window: Duration) -> Self {
        Self {
            registry,
            grace_window,
            pending: Arc::new(Mutex::new(HashMap::new())),
            next_generation: Mutex::new(0),
        }
    }

    pub fn with_default_grace(registry: Arc<dyn ChannelFriendRegistry>) -> Self {
        Self::new(registry, DEFAULT_GRACE_WINDOW)
    }

    /// Server-issued UUIDv4 webchat uid, minted only when the client
    /// presents none. A client that lost its cached uid becomes a brand-new
    /// identity; history is not backfilled.
    pub fn generate_uid() -> String {
        Uuid::new_v4().to_string()
    }

    pub fn ensure_uid(&self, presented: Option<&str>) -> String {
        match presented.map(str::trim).filter(|uid| !uid.is_empty()) {
            Some(existing) => existing.to_string(),
            None => {
                let issued = Self::generate_uid();
                tracing::info!(channel_uid = %issued, "issued new webchat uid");
                issued
            }
        }
    }

    /// Websocket (re)connect signal.
    ///
    /// Cancels a pending offline transition when one is armed; otherwise
    /// re-establishes `Following` after a confirmed offline (or first
    /// contact), stamping `followed_at` and clearing `unfollowed_at`.
    pub fn handle_connect(&self, channel_uid: &str, at_unix_ms: u64) -> Result<()> {
        let channel_uid = channel_uid.trim();
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(cancelled) = pending.remove(channel_uid) {
            cancelled.handle.abort();
            tracing::info!(
                channel_uid,
                "webchat reconnected inside grace window; same session continues"
            );
            return Ok(());
        }

        let already_online = self
            .registry
            .find(channel_uid)?
            .map(|friend| friend.is_following)
            .unwrap_or(false);
        if !already_online {
            self.registry.set_following(channel_uid, true, at_unix_ms)?;
            tracing::info!(channel_uid, "webchat session established");
        }
        Ok(())
    }

    /// Websocket disconnect signal; arms the grace-window timer.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn handle_disconnect(&self, channel_uid: &str, at_unix_ms: u64) -> Result<()> {
        let channel_uid = channel_uid.trim().to_string();
        let is_following = self
            .registry
            .find(&channel_uid)?
            .map(|friend| friend.is_following)
            .unwrap_or(false);
        if !is_following {
            return Ok(());
        }

        let generation = {
            let mut next = self
                .next_generation
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            *next += 1;
            *next
        };
        let offline_at = offline_deadline_ms(at_unix_ms, self.grace_window);
        let registry = Arc::clone(&self.registry);
        let pending = Arc::clone(&self.pending);
        let task_uid = channel_uid.clone();
        let grace_window = self.grace_window;
        // Holding the pending lock across spawn+insert keeps the timer task
        // from observing the map before its own entry lands.
        let mut armed = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(grace_window).await;
            let mut pending = pending.lock().unwrap_or_else(PoisonError::into_inner);
            let still_armed = pending
                .get(&task_uid)
                .map(|entry| entry.generation == generation)
                .unwrap_or(false);
            if !still_armed {
                return;
            }
            pending.remove(&task_uid);
            // The registry write happens under the pending lock so a racing
            // reconnect either cancels first or observes the final state.
            match registry.set_following(&task_uid, false, offline_at) {
                Ok(_) => {
                    tracing::info!(channel_uid = %task_uid, "webchat session expired after grace window");
                }
                Err(error) => {
                    tracing::warn!(channel_uid = %task_uid, %error, "failed to mark webchat session offline");
                }
            }
        });

        if let Some(replaced) = armed.insert(
            channel_uid.clone(),
            PendingOffline { generation, handle },
        ) {
            replaced.handle.abort();
        }
        drop(armed);
        tracing::info!(
            channel_uid = %channel_uid,
            grace_ms = grace_window.as_millis() as u64,
            "webchat disconnect observed; offline transition pending"
        );
        Ok(())
    }

    /// Current presence as derived state: true only while `Following`.
    pub fn is_online(&self, channel_uid: &str) -> Result<bool> {
        Ok(self
            .registry
            .find(channel_uid.trim())?
            .map(|friend| friend.is_following)
            .unwrap_or(false))
    }
}
