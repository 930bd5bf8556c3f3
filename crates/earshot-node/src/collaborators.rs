//! Seams to the outside world.
//!
//! The engine only talks to the chat platform through these traits. The
//! production implementations live in [`crate::discord`], [`crate::storage`]
//! and [`crate::voice`]; tests plug in the fakes from `crate::testing`.

use crate::error::Result;
use async_trait::async_trait;
use earshot_core::{ChannelId, IdentityId, PlayerKey};

/// Looks a player name up in the platform's member directory.
#[async_trait]
pub trait IdentityResolver: Send + Sync {
    /// Find the member whose display name or handle matches `name`.
    ///
    /// Name normalization (bridge markers, separators, case) is the
    /// resolver's business.
    async fn resolve(&self, name: &str) -> Result<Option<IdentityId>>;
}

/// Durable player → identity links.
#[async_trait]
pub trait IdentityStore: Send + Sync {
    async fn get_link(&self, player: &PlayerKey) -> Result<Option<IdentityId>>;

    /// Create a link unless one exists. Returns the identity that is linked
    /// afterwards, which is the existing one if there was one.
    async fn create_link(&self, player: &PlayerKey, identity: &IdentityId) -> Result<IdentityId>;
}

/// Read access to the voice channel graph.
#[async_trait]
pub trait ChannelGraphProvider: Send + Sync {
    /// Channel the member is connected to, if any.
    async fn current_channel_of(&self, identity: &IdentityId) -> Result<Option<ChannelId>>;

    /// Voice channels under a category, in display order.
    async fn channels_in_category(&self, category: &ChannelId) -> Result<Vec<ChannelId>>;

    /// Number of members connected to a channel.
    async fn occupancy(&self, channel: &ChannelId) -> Result<usize>;
}

/// Lists the voice channels under a category on the platform.
#[async_trait]
pub trait ChannelDirectory: Send + Sync {
    async fn voice_channels_in(&self, category: &ChannelId) -> Result<Vec<ChannelId>>;
}

/// Moves members between voice channels.
#[async_trait]
pub trait ChannelMutationSink: Send + Sync {
    /// Move a member. Moving a member into the channel it already occupies
    /// is a harmless no-op on the platform side.
    async fn move_to(&self, identity: &IdentityId, channel: &ChannelId) -> Result<()>;
}

/// Voice presence changes, as published by [`crate::voice::VoiceGraph`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VoiceEvent {
    /// Member connected to `channel`, coming from `previous` if it was
    /// already in voice.
    Joined {
        identity: IdentityId,
        channel: ChannelId,
        previous: Option<ChannelId>,
    },
    /// Member disconnected from voice.
    Left {
        identity: IdentityId,
        previous: ChannelId,
    },
}
