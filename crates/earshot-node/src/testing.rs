//! In-memory collaborators for tests.

use crate::collaborators::{
    ChannelDirectory, ChannelMutationSink, IdentityResolver, IdentityStore,
};
use crate::error::{Error, Result};
use crate::voice::VoiceGraph;
use async_trait::async_trait;
use earshot_core::{ChannelId, IdentityId, PlayerKey};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Semaphore;

/// Member directory with a fixed roster. Matches names case-insensitively.
#[derive(Default)]
pub struct FakeDirectory {
    members: HashMap<String, IdentityId>,
    calls: AtomicUsize,
    failing: bool,
}

impl FakeDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_member(mut self, name: &str, identity: &str) -> Self {
        self.members.insert(name.to_lowercase(), IdentityId::from(identity));
        self
    }

    /// Every lookup fails as if the directory timed out.
    pub fn failing(mut self) -> Self {
        self.failing = true;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl IdentityResolver for FakeDirectory {
    async fn resolve(&self, name: &str) -> Result<Option<IdentityId>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing {
            return Err(Error::Unavailable("directory timed out".into()));
        }
        Ok(self.members.get(&name.to_lowercase()).cloned())
    }
}

/// Identity store backed by a `HashMap`.
#[derive(Default)]
pub struct MemoryStore {
    links: Mutex<HashMap<PlayerKey, IdentityId>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn links(&self) -> HashMap<PlayerKey, IdentityId> {
        self.links.lock().unwrap().clone()
    }
}

#[async_trait]
impl IdentityStore for MemoryStore {
    async fn get_link(&self, player: &PlayerKey) -> Result<Option<IdentityId>> {
        Ok(self.links.lock().unwrap().get(player).cloned())
    }

    async fn create_link(&self, player: &PlayerKey, identity: &IdentityId) -> Result<IdentityId> {
        let mut links = self.links.lock().unwrap();
        Ok(links
            .entry(player.clone())
            .or_insert_with(|| identity.clone())
            .clone())
    }
}

/// Channel directory with a fixed channel list per category.
#[derive(Default)]
pub struct StaticDirectory {
    categories: HashMap<ChannelId, Vec<ChannelId>>,
    calls: AtomicUsize,
    failing: AtomicBool,
}

impl StaticDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_category(mut self, category: &str, channels: &[&str]) -> Self {
        self.categories.insert(
            ChannelId::from(category),
            channels.iter().map(|c| ChannelId::from(*c)).collect(),
        );
        self
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ChannelDirectory for StaticDirectory {
    async fn voice_channels_in(&self, category: &ChannelId) -> Result<Vec<ChannelId>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(Error::Unavailable("channel list unavailable".into()));
        }
        Ok(self.categories.get(category).cloned().unwrap_or_default())
    }
}

/// Move sink that records every command. When attached to a [`VoiceGraph`]
/// it echoes successful moves back into it, the way the gateway would.
///
/// [`RecordingSink::hold`] parks moves until [`RecordingSink::release`], for
/// tests that need a move to still be in flight.
#[derive(Default)]
pub struct RecordingSink {
    moves: Mutex<Vec<(IdentityId, ChannelId)>>,
    graph: Option<Arc<VoiceGraph>>,
    failing: AtomicBool,
    gate: Mutex<Option<Arc<Semaphore>>>,
    waiting: AtomicUsize,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn echoing_into(graph: Arc<VoiceGraph>) -> Self {
        Self {
            graph: Some(graph),
            ..Self::default()
        }
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn hold(&self) {
        *self.gate.lock().unwrap() = Some(Arc::new(Semaphore::new(0)));
    }

    /// Let parked and future moves through.
    pub fn release(&self) {
        if let Some(gate) = self.gate.lock().unwrap().take() {
            gate.close();
        }
    }

    /// Moves currently parked by [`RecordingSink::hold`].
    pub fn waiting(&self) -> usize {
        self.waiting.load(Ordering::SeqCst)
    }

    pub fn moves(&self) -> Vec<(IdentityId, ChannelId)> {
        self.moves.lock().unwrap().clone()
    }

    /// Moves issued for one member.
    pub fn moves_of(&self, identity: &str) -> Vec<ChannelId> {
        self.moves()
            .into_iter()
            .filter(|(id, _)| id.as_str() == identity)
            .map(|(_, channel)| channel)
            .collect()
    }
}

#[async_trait]
impl ChannelMutationSink for RecordingSink {
    async fn move_to(&self, identity: &IdentityId, channel: &ChannelId) -> Result<()> {
        let gate = self.gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            self.waiting.fetch_add(1, Ordering::SeqCst);
            // Closing the semaphore is the release signal
            let _ = gate.acquire().await;
            self.waiting.fetch_sub(1, Ordering::SeqCst);
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(Error::Upstream {
                status: 503,
                message: "move rejected".into(),
            });
        }
        self.moves
            .lock()
            .unwrap()
            .push((identity.clone(), channel.clone()));
        if let Some(graph) = &self.graph {
            graph.apply(identity.clone(), Some(channel.clone())).await;
        }
        Ok(())
    }
}
