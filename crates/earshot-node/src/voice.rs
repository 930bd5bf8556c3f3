//! In-process mirror of the voice channel graph.
//!
//! Membership is fed by voice-state updates pushed from the gateway relay
//! (`POST /api/v1/voice-state`). Channel lists per category are pulled from a
//! [`ChannelDirectory`] on demand and cached for a refresh interval. The
//! mirror doubles as the voice-presence event source: every membership
//! change is published on a broadcast channel.

use crate::collaborators::{ChannelDirectory, ChannelGraphProvider, VoiceEvent};
use crate::error::Result;
use async_trait::async_trait;
use earshot_core::{ChannelId, IdentityId};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, Mutex, RwLock};
use tracing::{debug, warn};

/// Default lifetime of a cached channel list.
pub const DEFAULT_POOL_REFRESH: Duration = Duration::from_secs(30);

const EVENT_CAPACITY: usize = 256;

struct CachedChannels {
    channels: Vec<ChannelId>,
    fetched_at: Instant,
}

pub struct VoiceGraph {
    members: RwLock<HashMap<IdentityId, ChannelId>>,
    categories: Mutex<HashMap<ChannelId, CachedChannels>>,
    directory: Arc<dyn ChannelDirectory>,
    refresh: Duration,
    events: broadcast::Sender<VoiceEvent>,
}

impl VoiceGraph {
    pub fn new(directory: Arc<dyn ChannelDirectory>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            members: RwLock::new(HashMap::new()),
            categories: Mutex::new(HashMap::new()),
            directory,
            refresh: DEFAULT_POOL_REFRESH,
            events,
        }
    }

    pub fn with_refresh(mut self, refresh: Duration) -> Self {
        self.refresh = refresh;
        self
    }

    /// Subscribe to voice presence changes.
    pub fn subscribe(&self) -> broadcast::Receiver<VoiceEvent> {
        self.events.subscribe()
    }

    /// Apply a voice-state update. `None` means the member left voice.
    ///
    /// Returns the published event, or `None` if nothing changed.
    pub async fn apply(
        &self,
        identity: IdentityId,
        channel: Option<ChannelId>,
    ) -> Option<VoiceEvent> {
        let event = {
            let mut members = self.members.write().await;
            let previous = match &channel {
                Some(channel) => members.insert(identity.clone(), channel.clone()),
                None => members.remove(&identity),
            };
            match (channel, previous) {
                (Some(channel), previous) if previous.as_ref() != Some(&channel) => {
                    VoiceEvent::Joined {
                        identity,
                        channel,
                        previous,
                    }
                }
                (None, Some(previous)) => VoiceEvent::Left { identity, previous },
                _ => return None,
            }
        };

        debug!("Voice state: {:?}", event);
        // No subscribers is fine
        let _ = self.events.send(event.clone());
        Some(event)
    }

    /// Members currently connected to any channel.
    pub async fn member_count(&self) -> usize {
        self.members.read().await.len()
    }

    async fn cached_channels(&self, category: &ChannelId) -> Result<Vec<ChannelId>> {
        let mut categories = self.categories.lock().await;
        if let Some(cached) = categories.get(category) {
            if cached.fetched_at.elapsed() < self.refresh {
                return Ok(cached.channels.clone());
            }
        }

        match self.directory.voice_channels_in(category).await {
            Ok(channels) => {
                debug!("Refreshed {} channels in category {}", channels.len(), category);
                categories.insert(
                    category.clone(),
                    CachedChannels {
                        channels: channels.clone(),
                        fetched_at: Instant::now(),
                    },
                );
                Ok(channels)
            }
            Err(e) => match categories.get(category) {
                Some(stale) => {
                    warn!("Channel list refresh for {} failed, using stale list: {}", category, e);
                    Ok(stale.channels.clone())
                }
                None => Err(e),
            },
        }
    }
}

#[async_trait]
impl ChannelGraphProvider for VoiceGraph {
    async fn current_channel_of(&self, identity: &IdentityId) -> Result<Option<ChannelId>> {
        Ok(self.members.read().await.get(identity).cloned())
    }

    async fn channels_in_category(&self, category: &ChannelId) -> Result<Vec<ChannelId>> {
        self.cached_channels(category).await
    }

    async fn occupancy(&self, channel: &ChannelId) -> Result<usize> {
        Ok(self
            .members
            .read()
            .await
            .values()
            .filter(|c| *c == channel)
            .count())
    }
}
