//! Earshot Node - proximity voice service
//!
//! Keeps players that stand close together in a game world inside the same
//! Discord voice channel. The game server plugin posts positions to `/sync`;
//! the node links each player name to a guild member, runs the core
//! assignment pipeline and moves members between voice channels.
//!
//! # Architecture
//!
//! - **Engine**: drives `earshot-core` once per report and per lobby arrival
//! - **Linker**: player name → member id, store first, directory second
//! - **Storage**: RocksDB-backed identity links
//! - **Voice**: mirror of voice membership, fed by the gateway relay
//! - **Discord**: REST adapter (member search, channel list, member moves)
//! - **API**: HTTP endpoints for the plugin and the relay
//! - **Admin Socket**: Unix socket for local admin commands (earshot-admin CLI)
//!
//! # Example
//!
//! ```no_run
//! use earshot_node::{EarshotNode, NodeConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = NodeConfig::from_env()?;
//!     let node = EarshotNode::new(config)?;
//!     node.run().await?;
//!     Ok(())
//! }
//! ```

pub mod admin_socket;
pub mod api;
pub mod collaborators;
pub mod discord;
pub mod engine;
pub mod error;
pub mod linker;
pub mod node;
pub mod storage;
pub mod voice;

#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

pub use collaborators::{
    ChannelDirectory, ChannelGraphProvider, ChannelMutationSink, IdentityResolver, IdentityStore,
    VoiceEvent,
};
pub use discord::DiscordClient;
pub use engine::{EngineConfig, MoveCommand, Outcome, ProximityEngine, Skip};
pub use error::{Error, Result};
pub use linker::IdentityLinker;
pub use node::{EarshotNode, NodeConfig, NodeState};
pub use storage::{IdentityLink, Storage};
pub use voice::VoiceGraph;
