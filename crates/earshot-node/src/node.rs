//! Earshot Node - the main application entry point.
//!
//! Architecture:
//! - Single daemon process with RocksDB storage for identity links
//! - HTTP API for the game server plugin and the gateway relay
//! - Background tasks: expiry sweep and lobby routing
//! - Unix admin socket for local admin ops (earshot-admin CLI)

use crate::admin_socket::AdminSocket;
use crate::api;
use crate::discord::{DiscordClient, DEFAULT_API_BASE};
use crate::engine::{EngineConfig, ProximityEngine};
use crate::error::{Error, Result};
use crate::linker::IdentityLinker;
use crate::storage::Storage;
use crate::voice::VoiceGraph;
use earshot_core::{
    AssignmentPolicy, ChannelId, DistanceMetric, NeighborResolver, PartnerStrategy, PolicyConfig,
    PoolIntent, SplitPolicy, DEFAULT_DISTANCE_LIMIT,
};
use std::fmt::Display;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

/// Configuration for an Earshot node.
#[derive(Clone)]
pub struct NodeConfig {
    /// HTTP API listen address
    pub api_addr: SocketAddr,

    /// Data directory for storage
    pub data_dir: PathBuf,

    /// Admin socket path (for earshot-admin CLI)
    pub admin_socket: PathBuf,

    pub discord_token: String,
    pub guild_id: String,
    pub api_base: String,

    pub lobby: ChannelId,
    pub category: ChannelId,
    pub talk_room: Option<ChannelId>,

    pub distance_limit: f64,
    pub metric: DistanceMetric,
    pub strategy: PartnerStrategy,
    pub split: SplitPolicy,
    pub split_target: PoolIntent,
    pub lobby_target: PoolIntent,

    pub stale_after: Duration,
    pub sweep_every: Duration,
    pub resolve_cooldown: Duration,
    pub pool_refresh: Duration,
}

impl std::fmt::Debug for NodeConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeConfig")
            .field("api_addr", &self.api_addr)
            .field("data_dir", &self.data_dir)
            .field("guild_id", &self.guild_id)
            .field("lobby", &self.lobby)
            .field("category", &self.category)
            .field("distance_limit", &self.distance_limit)
            .field("metric", &self.metric)
            .field("split", &self.split)
            .finish_non_exhaustive()
    }
}

impl NodeConfig {
    /// Create config from environment variables with sensible defaults.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create config from any key/value source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env(lookup);

        let data_dir = PathBuf::from(env.or("EARSHOT_DATA_DIR", "./earshot-data".to_string())?);
        let admin_socket = env
            .get("EARSHOT_ADMIN_SOCKET")
            .map(PathBuf::from)
            .unwrap_or_else(|| data_dir.join("admin.sock"));

        Ok(Self {
            api_addr: env.or("EARSHOT_API_ADDR", SocketAddr::from(([0, 0, 0, 0], 3000)))?,
            data_dir,
            admin_socket,
            discord_token: env.required("DISCORD_BOT_TOKEN")?,
            guild_id: env.required("DISCORD_GUILD_ID")?,
            api_base: env.or("DISCORD_API_BASE", DEFAULT_API_BASE.to_string())?,
            lobby: ChannelId::from(env.required("EARSHOT_LOBBY_ID")?),
            category: ChannelId::from(env.required("EARSHOT_CATEGORY_ID")?),
            talk_room: env.get("EARSHOT_TALK_ROOM_ID").map(ChannelId::from),
            distance_limit: env.or("EARSHOT_DISTANCE_LIMIT", DEFAULT_DISTANCE_LIMIT)?,
            metric: env.or("EARSHOT_METRIC", DistanceMetric::Planar)?,
            strategy: env.or("EARSHOT_PARTNER_STRATEGY", PartnerStrategy::Nearest)?,
            split: env.or("EARSHOT_SPLIT_POLICY", SplitPolicy::Occupied)?,
            split_target: env.or("EARSHOT_SPLIT_TARGET", PoolIntent::RandomEmpty)?,
            lobby_target: env.or("EARSHOT_LOBBY_TARGET", PoolIntent::FirstEmpty)?,
            stale_after: env.millis("EARSHOT_STALE_MS", 10_000)?,
            sweep_every: env.millis("EARSHOT_SWEEP_MS", 5_000)?,
            resolve_cooldown: env.millis("EARSHOT_RESOLVE_COOLDOWN_MS", 60_000)?,
            pool_refresh: env.millis("EARSHOT_POOL_REFRESH_MS", 30_000)?,
        })
    }
}

struct Env<F>(F);

impl<F: Fn(&str) -> Option<String>> Env<F> {
    fn get(&self, key: &str) -> Option<String> {
        (self.0)(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
    }

    fn required(&self, key: &str) -> Result<String> {
        self.get(key)
            .ok_or_else(|| Error::Config(format!("{} must be set", key)))
    }

    fn or<T>(&self, key: &str, default: T) -> Result<T>
    where
        T: FromStr,
        T::Err: Display,
    {
        match self.get(key) {
            Some(raw) => raw
                .parse()
                .map_err(|e| Error::Config(format!("Invalid {} '{}': {}", key, raw, e))),
            None => Ok(default),
        }
    }

    fn millis(&self, key: &str, default: u64) -> Result<Duration> {
        let ms: u64 = self.or(key, default)?;
        if ms == 0 {
            return Err(Error::Config(format!("{} must be positive", key)));
        }
        Ok(Duration::from_millis(ms))
    }
}

/// Shared state handed to the HTTP handlers.
pub struct NodeState {
    pub engine: Arc<ProximityEngine>,
    pub voice: Arc<VoiceGraph>,
}

/// An Earshot node instance.
pub struct EarshotNode {
    state: Arc<NodeState>,
    storage: Arc<Storage>,
    config: NodeConfig,
}

impl EarshotNode {
    /// Create a new node: open storage and wire the engine to Discord.
    pub fn new(config: NodeConfig) -> Result<Self> {
        std::fs::create_dir_all(&config.data_dir)?;
        let storage = Arc::new(Storage::open(&config.data_dir)?);

        let discord = Arc::new(
            DiscordClient::new(config.discord_token.clone(), config.guild_id.clone())
                .base_url(config.api_base.clone()),
        );
        let voice = Arc::new(VoiceGraph::new(discord.clone()).with_refresh(config.pool_refresh));
        let linker = IdentityLinker::new(storage.clone(), discord.clone())
            .with_cooldown(config.resolve_cooldown);
        let resolver =
            NeighborResolver::new(config.distance_limit, config.metric, config.strategy)?;
        let policy = AssignmentPolicy::new(PolicyConfig {
            split: config.split,
            split_target: config.split_target,
        });

        let engine = Arc::new(ProximityEngine::new(
            resolver,
            policy,
            linker,
            voice.clone(),
            discord,
            EngineConfig {
                lobby: config.lobby.clone(),
                category: config.category.clone(),
                talk_room: config.talk_room.clone(),
                lobby_target: config.lobby_target,
                stale_after: config.stale_after,
            },
        ));

        Ok(Self {
            state: Arc::new(NodeState { engine, voice }),
            storage,
            config,
        })
    }

    /// Get the shared state (for API handlers).
    pub fn state(&self) -> Arc<NodeState> {
        Arc::clone(&self.state)
    }

    /// Run the node (background tasks, admin socket, HTTP server).
    pub async fn run(self) -> Result<()> {
        tracing::info!("Earshot node starting");
        tracing::info!("  API: http://{}", self.config.api_addr);
        tracing::info!("  Admin: {:?}", self.config.admin_socket);
        tracing::info!("  Data: {:?}", self.config.data_dir);
        tracing::info!(
            "  Limit: {} ({:?}, {:?}, split {:?})",
            self.config.distance_limit,
            self.config.metric,
            self.config.strategy,
            self.config.split
        );

        let engine = Arc::clone(&self.state.engine);
        tokio::spawn(Arc::clone(&engine).run_sweeper(self.config.sweep_every));
        tokio::spawn(Arc::clone(&engine).run_lobby_listener(self.state.voice.subscribe()));

        let admin_socket = AdminSocket::new(
            Arc::clone(&self.storage),
            Arc::clone(engine.registry()),
            self.config.admin_socket.clone(),
        );
        tokio::spawn(async move {
            if let Err(e) = admin_socket.run().await {
                tracing::error!("Admin socket error: {}", e);
            }
        });

        let app = api::build_router(self.state());

        let listener = tokio::net::TcpListener::bind(self.config.api_addr).await?;
        tracing::info!("HTTP server listening on {}", self.config.api_addr);

        axum::serve(listener, app).await?;

        Ok(())
    }
}
