//! The proximity engine.
//!
//! One report runs to completion per player before the next one for that
//! player starts: link the identity if needed, snapshot the neighborhood,
//! read the channel graph, ask the policy, and issue at most one move.
//! Reports for different players run concurrently.
//!
//! Locks on the registry and the policy are only held while computing; every
//! collaborator call happens with no lock held. A decision can therefore be a
//! few reports stale by the time its move lands, which the next report
//! corrects.

use crate::collaborators::{ChannelGraphProvider, ChannelMutationSink, VoiceEvent};
use crate::linker::IdentityLinker;
use earshot_core::{
    Action, AssignmentPolicy, ChannelId, ChannelPool, IdentityId, NeighborResolver, Observation,
    PartnerView, PlayerKey, PlayerState, PoolIntent, Position, Reason, Registry, Target,
};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

/// Default age after which a silent player is treated as offline.
pub const DEFAULT_STALE_AFTER: Duration = Duration::from_secs(10);

/// Channel layout and lobby behaviour.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Designated home/lobby channel
    pub lobby: ChannelId,
    /// Category holding the talk rooms
    pub category: ChannelId,
    /// Channel for the fixed-talk-room intent
    pub talk_room: Option<ChannelId>,
    /// Where members arriving in the lobby are sent
    pub lobby_target: PoolIntent,
    pub stale_after: Duration,
}

/// A move issued to the channel mutation sink.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MoveCommand {
    pub identity: IdentityId,
    pub channel: ChannelId,
}

/// Why a report ended without a move.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Skip {
    /// Player not in the registry (expired or never reported)
    UnknownPlayer,
    /// No identity linked yet
    Unlinked,
    /// Member not connected to voice
    NotInVoice,
    /// Channel graph could not be read this cycle
    GraphUnavailable,
    /// No eligible destination in the pool
    PoolExhausted,
    /// Target equals the current channel
    AlreadyThere,
    /// Lobby event for a channel other than the lobby
    NotLobby,
    /// Lobby arrival caused by the engine sending the member home
    SentHome,
    /// The sink rejected the move
    MoveFailed,
}

/// Result of processing one report or voice event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Moved(MoveCommand),
    Stayed(Reason),
    Skipped(Skip),
}

pub struct ProximityEngine {
    registry: Arc<Registry>,
    resolver: NeighborResolver,
    policy: Mutex<AssignmentPolicy>,
    linker: IdentityLinker,
    graph: Arc<dyn ChannelGraphProvider>,
    sink: Arc<dyn ChannelMutationSink>,
    config: EngineConfig,
    /// Per-player serialization of report processing
    in_flight: Mutex<HashMap<PlayerKey, Arc<tokio::sync::Mutex<()>>>>,
    /// Members the engine moved into the lobby whose arrival is still pending
    sent_home: Mutex<HashSet<IdentityId>>,
}

impl ProximityEngine {
    pub fn new(
        resolver: NeighborResolver,
        policy: AssignmentPolicy,
        linker: IdentityLinker,
        graph: Arc<dyn ChannelGraphProvider>,
        sink: Arc<dyn ChannelMutationSink>,
        config: EngineConfig,
    ) -> Self {
        Self {
            registry: Arc::new(Registry::new()),
            resolver,
            policy: Mutex::new(policy),
            linker,
            graph,
            sink,
            config,
            in_flight: Mutex::new(HashMap::new()),
            sent_home: Mutex::new(HashSet::new()),
        }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    fn policy(&self) -> MutexGuard<'_, AssignmentPolicy> {
        self.policy.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn sent_home(&self) -> MutexGuard<'_, HashSet<IdentityId>> {
        self.sent_home.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record a planned transition. Dropped if the player expired while the
    /// report was being processed.
    fn commit(&self, key: &PlayerKey, state: Option<PlayerState>) {
        let Some(state) = state else {
            return;
        };
        let mut policy = self.policy();
        if self.registry.contains(key) {
            policy.commit(key, state);
        } else {
            debug!("{} expired mid-report, dropping {:?}", key, state);
        }
    }

    /// Tracked partnership state of a player.
    pub fn player_state(&self, key: &PlayerKey) -> PlayerState {
        self.policy().state(key)
    }

    /// Record a position report. Cheap and synchronous; the assignment work
    /// is done by [`ProximityEngine::process`].
    pub fn report(&self, name: &str, position: Position) -> PlayerKey {
        self.registry.report(name, position, None)
    }

    /// Record a report and process it in the background.
    pub fn submit(self: &Arc<Self>, name: &str, position: Position) -> PlayerKey {
        let key = self.report(name, position);
        let engine = Arc::clone(self);
        let task_key = key.clone();
        tokio::spawn(async move {
            let outcome = engine.process(&task_key).await;
            debug!("Report for {} -> {:?}", task_key, outcome);
        });
        key
    }

    fn player_lock(&self, key: &PlayerKey) -> Arc<tokio::sync::Mutex<()>> {
        let mut in_flight = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(in_flight.entry(key.clone()).or_default())
    }

    /// Run the assignment pipeline for one player.
    pub async fn process(&self, key: &PlayerKey) -> Outcome {
        let lock = self.player_lock(key);
        let _held = lock.lock().await;

        let Some(record) = self.registry.get(key) else {
            return Outcome::Skipped(Skip::UnknownPlayer);
        };

        if !record.is_linked() {
            let Some(identity) = self.linker.identity_for(&record.name).await else {
                return Outcome::Skipped(Skip::Unlinked);
            };
            if !self.registry.link(key, identity) {
                return Outcome::Skipped(Skip::UnknownPlayer);
            }
        }

        let Some((mover, others)) = self.registry.neighborhood(key) else {
            return Outcome::Skipped(Skip::UnknownPlayer);
        };
        let Some(identity) = mover.identity.clone() else {
            return Outcome::Skipped(Skip::Unlinked);
        };
        let partner = self.resolver.find_partner(&mover, &others);

        let current = match self.graph.current_channel_of(&identity).await {
            Ok(Some(channel)) => channel,
            Ok(None) => return Outcome::Skipped(Skip::NotInVoice),
            Err(e) => {
                warn!("Channel lookup for {} failed: {}", key, e);
                return Outcome::Skipped(Skip::GraphUnavailable);
            }
        };

        let partner_channel = match &partner {
            Some(partner) => match self.graph.current_channel_of(&partner.identity).await {
                Ok(channel) => channel,
                Err(e) => {
                    warn!("Channel lookup for partner {} failed: {}", partner.key, e);
                    return Outcome::Skipped(Skip::GraphUnavailable);
                }
            },
            None => None,
        };

        let occupancy = match self.graph.occupancy(&current).await {
            Ok(n) => n,
            Err(e) => {
                warn!("Occupancy lookup for {} failed: {}", current, e);
                return Outcome::Skipped(Skip::GraphUnavailable);
            }
        };

        let decision = self.policy().plan(&Observation {
            mover: key,
            current: &current,
            occupancy,
            partner: partner.as_ref().map(|p| PartnerView {
                key: &p.key,
                channel: partner_channel.as_ref(),
            }),
        });

        let target = match decision.action {
            Action::Stay => {
                self.commit(key, decision.commit);
                debug!("{} stays in {} ({:?})", key, current, decision.reason);
                return Outcome::Stayed(decision.reason);
            }
            Action::MoveTo(target) => target,
        };

        let destination = match target {
            Target::Channel(channel) => channel,
            Target::Pool(intent) => match self.select_from_pool(intent, &current).await {
                Some(channel) => channel,
                None => {
                    info!("No free channel for {} ({:?}), will retry", key, intent);
                    return Outcome::Skipped(Skip::PoolExhausted);
                }
            },
        };

        if destination == current {
            self.commit(key, decision.commit);
            return Outcome::Skipped(Skip::AlreadyThere);
        }

        info!(
            "Moving {} to {} ({:?}, partner: {:?})",
            key,
            destination,
            decision.reason,
            partner.as_ref().map(|p| &p.key)
        );
        let homing = destination == self.config.lobby;
        if homing {
            // The echo can arrive before the sink call returns
            self.sent_home().insert(identity.clone());
        }
        match self.issue_move(&identity, &destination).await {
            Some(command) => {
                self.commit(key, decision.commit);
                Outcome::Moved(command)
            }
            None => {
                if homing {
                    self.sent_home().remove(&identity);
                }
                Outcome::Skipped(Skip::MoveFailed)
            }
        }
    }

    async fn issue_move(
        &self,
        identity: &IdentityId,
        channel: &ChannelId,
    ) -> Option<MoveCommand> {
        match self.sink.move_to(identity, channel).await {
            Ok(()) => Some(MoveCommand {
                identity: identity.clone(),
                channel: channel.clone(),
            }),
            Err(e) => {
                warn!("Move of {} to {} failed: {}", identity, channel, e);
                None
            }
        }
    }

    /// Pick a destination for `intent`, never returning `current`.
    async fn select_from_pool(
        &self,
        intent: PoolIntent,
        current: &ChannelId,
    ) -> Option<ChannelId> {
        let talk_rooms = match self.graph.channels_in_category(&self.config.category).await {
            Ok(channels) => channels,
            Err(e) => {
                warn!("Channel list for {} unavailable: {}", self.config.category, e);
                return None;
            }
        };

        let mut occupancy = HashMap::with_capacity(talk_rooms.len());
        for channel in &talk_rooms {
            match self.graph.occupancy(channel).await {
                Ok(n) => {
                    occupancy.insert(channel.clone(), n);
                }
                Err(e) => warn!("Occupancy lookup for {} failed: {}", channel, e),
            }
        }

        let mut pool = ChannelPool::new(talk_rooms, self.config.lobby.clone());
        if let Some(room) = &self.config.talk_room {
            pool = pool.with_fixed_room(room.clone());
        }
        // Channels we could not inspect count as busy
        pool.select(
            intent,
            Some(current),
            |c| occupancy.get(c).copied().unwrap_or(usize::MAX),
            &mut rand::thread_rng(),
        )
    }

    /// Send a member that just arrived in the lobby to a talk room.
    pub async fn on_voice_event(&self, event: &VoiceEvent) -> Outcome {
        let (identity, channel) = match event {
            VoiceEvent::Joined { identity, channel, .. } => (identity, channel),
            VoiceEvent::Left { identity, .. } => {
                self.sent_home().remove(identity);
                return Outcome::Skipped(Skip::NotLobby);
            }
        };
        // Any event for the member settles a pending send-home
        let sent_home = self.sent_home().remove(identity);
        if *channel != self.config.lobby {
            return Outcome::Skipped(Skip::NotLobby);
        }
        if sent_home {
            debug!("{} was sent home, leaving it in the lobby", identity);
            return Outcome::Skipped(Skip::SentHome);
        }

        let destination = self
            .select_from_pool(self.config.lobby_target, channel)
            .await;
        let Some(destination) = destination else {
            info!("Lobby arrival {} has no free channel to go to", identity);
            return Outcome::Skipped(Skip::PoolExhausted);
        };

        info!("Lobby arrival {} -> {}", identity, destination);
        match self.issue_move(identity, &destination).await {
            Some(command) => Outcome::Moved(command),
            None => Outcome::Skipped(Skip::MoveFailed),
        }
    }

    /// Remove players that stopped reporting and forget their state.
    pub fn expire_stale(&self, now: Instant) -> Vec<PlayerKey> {
        let removed = {
            // Policy lock held across removal; see `commit`
            let mut policy = self.policy();
            let removed = self.registry.expire_stale(now, self.config.stale_after);
            for key in &removed {
                policy.forget(key);
            }
            removed
        };

        // A lock still held by a running report is kept until a later sweep
        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|key, lock| Arc::strong_count(lock) > 1 || self.registry.contains(key));

        self.linker.prune(now);
        removed
    }

    /// Number of players with a report lock allocated.
    pub fn tracked_locks(&self) -> usize {
        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Periodic expiry sweep. Runs until the task is dropped.
    pub async fn run_sweeper(self: Arc<Self>, every: Duration) {
        let mut interval = tokio::time::interval(every);
        loop {
            interval.tick().await;
            for key in self.expire_stale(Instant::now()) {
                info!(
                    "{} went offline (no report for {:?})",
                    key, self.config.stale_after
                );
            }
        }
    }

    /// Route lobby arrivals from the voice-presence event source.
    pub async fn run_lobby_listener(
        self: Arc<Self>,
        mut events: broadcast::Receiver<VoiceEvent>,
    ) {
        loop {
            match events.recv().await {
                Ok(event) => {
                    let engine = Arc::clone(&self);
                    tokio::spawn(async move {
                        engine.on_voice_event(&event).await;
                    });
                }
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    warn!("Lobby listener lagged, missed {} voice events", missed);
                }
                Err(broadcast::error::RecvError::Closed) => {
                    error!("Voice event source closed, lobby listener stopping");
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeDirectory, MemoryStore, RecordingSink, StaticDirectory};
    use crate::voice::VoiceGraph;
    use earshot_core::{DistanceMetric, PartnerStrategy, PolicyConfig, SplitPolicy};

    struct Harness {
        engine: Arc<ProximityEngine>,
        graph: Arc<VoiceGraph>,
        sink: Arc<RecordingSink>,
        directory: Arc<FakeDirectory>,
    }

    fn id(s: &str) -> IdentityId {
        IdentityId::from(s)
    }

    fn ch(s: &str) -> ChannelId {
        ChannelId::from(s)
    }

    fn at(x: f64) -> Position {
        Position::new(x, 64.0, 0.0)
    }

    fn harness_with(policy: PolicyConfig) -> Harness {
        let directory = Arc::new(
            FakeDirectory::new()
                .with_member("alice", "A")
                .with_member("bob", "B")
                .with_member("zed", "Z"),
        );
        let channels =
            Arc::new(StaticDirectory::new().with_category("cat", &["lobby", "t1", "t2", "t3"]));
        let graph = Arc::new(VoiceGraph::new(channels));
        let sink = Arc::new(RecordingSink::echoing_into(graph.clone()));
        let linker = IdentityLinker::new(Arc::new(MemoryStore::new()), directory.clone());
        let resolver =
            NeighborResolver::new(15.0, DistanceMetric::Spatial, PartnerStrategy::Nearest).unwrap();

        let engine = Arc::new(ProximityEngine::new(
            resolver,
            AssignmentPolicy::new(policy),
            linker,
            graph.clone(),
            sink.clone(),
            EngineConfig {
                lobby: ch("lobby"),
                category: ch("cat"),
                talk_room: Some(ch("t3")),
                lobby_target: PoolIntent::FirstEmpty,
                stale_after: DEFAULT_STALE_AFTER,
            },
        ));
        Harness { engine, graph, sink, directory }
    }

    fn harness() -> Harness {
        harness_with(PolicyConfig::default())
    }

    async fn report(h: &Harness, name: &str, position: Position) -> Outcome {
        let key = h.engine.report(name, position);
        h.engine.process(&key).await
    }

    #[tokio::test]
    async fn nearby_pair_greater_name_joins() {
        let h = harness();
        h.graph.apply(id("A"), Some(ch("t1"))).await;
        h.graph.apply(id("B"), Some(ch("t2"))).await;

        assert_eq!(report(&h, "Alice", at(0.0)).await, Outcome::Stayed(Reason::NoPartner));
        assert_eq!(
            report(&h, "bob", at(5.0)).await,
            Outcome::Moved(MoveCommand { identity: id("B"), channel: ch("t1") })
        );
        assert_eq!(h.sink.moves_of("A"), Vec::<ChannelId>::new());
    }

    #[tokio::test]
    async fn repeated_reports_move_at_most_once() {
        let h = harness();
        h.graph.apply(id("A"), Some(ch("t1"))).await;
        h.graph.apply(id("B"), Some(ch("t2"))).await;

        for _ in 0..5 {
            report(&h, "alice", at(0.0)).await;
            report(&h, "bob", at(5.0)).await;
        }

        assert_eq!(h.sink.moves(), vec![(id("B"), ch("t1"))]);
    }

    #[tokio::test]
    async fn smaller_name_waits_for_partner() {
        let h = harness();
        h.graph.apply(id("A"), Some(ch("t1"))).await;
        h.graph.apply(id("B"), Some(ch("t2"))).await;
        report(&h, "bob", at(5.0)).await;

        assert_eq!(report(&h, "alice", at(0.0)).await, Outcome::Stayed(Reason::AwaitPartner));
        assert_eq!(
            h.engine.player_state(&PlayerKey::new("alice")),
            PlayerState::Paired(PlayerKey::new("bob"))
        );
        assert!(h.sink.moves_of("A").is_empty());
    }

    #[tokio::test]
    async fn boundary_distance_is_not_close_enough() {
        let h = harness();
        h.graph.apply(id("A"), Some(ch("t1"))).await;
        h.graph.apply(id("B"), Some(ch("t2"))).await;

        report(&h, "alice", at(0.0)).await;
        assert_eq!(report(&h, "bob", at(15.0)).await, Outcome::Stayed(Reason::NoPartner));
        assert!(h.sink.moves().is_empty());
    }

    #[tokio::test]
    async fn drifting_apart_splits_shared_channel() {
        let h = harness();
        h.graph.apply(id("A"), Some(ch("t1"))).await;
        h.graph.apply(id("B"), Some(ch("t2"))).await;
        report(&h, "alice", at(0.0)).await;
        report(&h, "bob", at(5.0)).await;

        report(&h, "alice", at(0.0)).await;
        let outcome = report(&h, "bob", at(20.0)).await;

        let Outcome::Moved(command) = outcome else {
            panic!("expected a split move, got {:?}", outcome);
        };
        assert_eq!(command.identity, id("B"));
        assert_ne!(command.channel, ch("t1"));
        assert_ne!(command.channel, ch("lobby"));
        assert_eq!(h.engine.player_state(&PlayerKey::new("bob")), PlayerState::Solo);
    }

    #[tokio::test]
    async fn split_from_solo_channel_does_not_move() {
        let h = harness();
        h.graph.apply(id("A"), Some(ch("t1"))).await;
        h.graph.apply(id("B"), Some(ch("t2"))).await;
        report(&h, "bob", at(5.0)).await;
        report(&h, "alice", at(0.0)).await;

        // Alice paired but bob never moved in; she is alone in t1
        assert_eq!(report(&h, "alice", at(-40.0)).await, Outcome::Stayed(Reason::AlreadyAlone));
        assert!(h.sink.moves_of("A").is_empty());
    }

    #[tokio::test]
    async fn always_home_split_returns_to_lobby() {
        let h = harness_with(PolicyConfig {
            split: SplitPolicy::AlwaysHome,
            split_target: PoolIntent::FirstEmpty,
        });
        h.graph.apply(id("A"), Some(ch("t1"))).await;
        h.graph.apply(id("B"), Some(ch("t2"))).await;
        report(&h, "alice", at(0.0)).await;
        report(&h, "bob", at(5.0)).await;

        assert_eq!(
            report(&h, "bob", at(50.0)).await,
            Outcome::Moved(MoveCommand { identity: id("B"), channel: ch("lobby") })
        );
    }

    #[tokio::test]
    async fn sent_home_member_is_left_in_lobby() {
        let h = harness_with(PolicyConfig {
            split: SplitPolicy::AlwaysHome,
            split_target: PoolIntent::FirstEmpty,
        });
        h.graph.apply(id("A"), Some(ch("t1"))).await;
        h.graph.apply(id("B"), Some(ch("t2"))).await;
        report(&h, "alice", at(0.0)).await;
        report(&h, "bob", at(5.0)).await;

        let mut events = h.graph.subscribe();
        assert!(matches!(report(&h, "bob", at(50.0)).await, Outcome::Moved(_)));
        let echo = events.recv().await.unwrap();
        assert_eq!(
            echo,
            VoiceEvent::Joined { identity: id("B"), channel: ch("lobby"), previous: Some(ch("t1")) }
        );

        assert_eq!(h.engine.on_voice_event(&echo).await, Outcome::Skipped(Skip::SentHome));
        assert_eq!(h.sink.moves_of("B"), vec![ch("t1"), ch("lobby")]);

        // Coming back to the lobby on their own is routed as usual
        h.graph.apply(id("B"), Some(ch("t3"))).await;
        let event = h.graph.apply(id("B"), Some(ch("lobby"))).await.unwrap();
        assert_eq!(
            h.engine.on_voice_event(&event).await,
            Outcome::Moved(MoveCommand { identity: id("B"), channel: ch("t2") })
        );
    }

    #[tokio::test]
    async fn failed_move_is_retried_on_next_report() {
        let h = harness();
        h.graph.apply(id("A"), Some(ch("t1"))).await;
        h.graph.apply(id("B"), Some(ch("t2"))).await;
        report(&h, "alice", at(0.0)).await;

        h.sink.set_failing(true);
        assert_eq!(report(&h, "bob", at(5.0)).await, Outcome::Skipped(Skip::MoveFailed));
        assert_eq!(h.engine.player_state(&PlayerKey::new("bob")), PlayerState::Solo);

        h.sink.set_failing(false);
        assert!(matches!(report(&h, "bob", at(5.0)).await, Outcome::Moved(_)));
    }

    #[tokio::test]
    async fn same_channel_needs_no_move() {
        let h = harness();
        h.graph.apply(id("A"), Some(ch("t1"))).await;
        h.graph.apply(id("B"), Some(ch("t1"))).await;
        report(&h, "alice", at(0.0)).await;

        assert_eq!(report(&h, "bob", at(5.0)).await, Outcome::Stayed(Reason::SameChannel));
        assert!(h.sink.moves().is_empty());
    }

    #[tokio::test]
    async fn members_outside_voice_are_skipped() {
        let h = harness();
        report(&h, "alice", at(0.0)).await;
        assert_eq!(report(&h, "alice", at(0.0)).await, Outcome::Skipped(Skip::NotInVoice));
    }

    #[tokio::test]
    async fn unknown_names_skip_and_hit_directory_once() {
        let h = harness();
        assert_eq!(report(&h, "Carol", at(0.0)).await, Outcome::Skipped(Skip::Unlinked));
        assert_eq!(report(&h, "Carol", at(1.0)).await, Outcome::Skipped(Skip::Unlinked));
        assert_eq!(h.directory.calls(), 1);
    }

    #[tokio::test]
    async fn expired_players_are_not_partners() {
        let h = harness();
        h.graph.apply(id("A"), Some(ch("t1"))).await;
        h.graph.apply(id("B"), Some(ch("t2"))).await;
        report(&h, "alice", at(0.0)).await;

        let later = Instant::now() + DEFAULT_STALE_AFTER + Duration::from_secs(1);
        let removed = h.engine.expire_stale(later);
        assert_eq!(removed, vec![PlayerKey::new("alice")]);

        assert_eq!(report(&h, "bob", at(5.0)).await, Outcome::Stayed(Reason::NoPartner));
        assert_eq!(report(&h, "alice", at(0.0)).await, Outcome::Stayed(Reason::AwaitPartner));
    }

    #[tokio::test]
    async fn expiry_drops_partnership() {
        let h = harness();
        h.graph.apply(id("A"), Some(ch("t1"))).await;
        h.graph.apply(id("B"), Some(ch("t2"))).await;
        report(&h, "alice", at(0.0)).await;
        report(&h, "bob", at(5.0)).await;
        assert_ne!(h.engine.player_state(&PlayerKey::new("bob")), PlayerState::Solo);

        h.engine.expire_stale(Instant::now() + Duration::from_secs(60));
        assert_eq!(h.engine.player_state(&PlayerKey::new("bob")), PlayerState::Solo);
        assert!(h.engine.registry().is_empty());
    }

    #[tokio::test]
    async fn expiry_during_move_discards_its_commit() {
        let h = harness();
        h.graph.apply(id("A"), Some(ch("t1"))).await;
        h.graph.apply(id("B"), Some(ch("t2"))).await;
        report(&h, "alice", at(0.0)).await;

        h.sink.hold();
        let bob = h.engine.report("bob", at(5.0));
        let engine = Arc::clone(&h.engine);
        let task_key = bob.clone();
        let task = tokio::spawn(async move { engine.process(&task_key).await });
        for _ in 0..200 {
            if h.sink.waiting() == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(h.sink.waiting(), 1);

        let later = Instant::now() + Duration::from_secs(60);
        assert_eq!(h.engine.expire_stale(later).len(), 2);
        // Bob's report still holds its lock
        assert_eq!(h.engine.tracked_locks(), 1);

        h.sink.release();
        assert!(matches!(task.await.unwrap(), Outcome::Moved(_)));
        assert_eq!(h.engine.player_state(&bob), PlayerState::Solo);
        assert!(!h.engine.registry().contains(&bob));

        h.engine.expire_stale(later);
        assert_eq!(h.engine.tracked_locks(), 0);

        // Rejoining starts from a clean partnership
        assert_eq!(report(&h, "alice", at(0.0)).await, Outcome::Stayed(Reason::NoPartner));
        assert_eq!(report(&h, "bob", at(5.0)).await, Outcome::Stayed(Reason::SameChannel));
    }

    #[tokio::test]
    async fn lobby_arrival_goes_to_first_free_room() {
        let h = harness();
        h.graph.apply(id("X"), Some(ch("t1"))).await;
        let event = h.graph.apply(id("Z"), Some(ch("lobby"))).await.unwrap();

        assert_eq!(
            h.engine.on_voice_event(&event).await,
            Outcome::Moved(MoveCommand { identity: id("Z"), channel: ch("t2") })
        );
    }

    #[tokio::test]
    async fn non_lobby_events_are_ignored() {
        let h = harness();
        let event = h.graph.apply(id("Z"), Some(ch("t1"))).await.unwrap();
        assert_eq!(h.engine.on_voice_event(&event).await, Outcome::Skipped(Skip::NotLobby));
        assert!(h.sink.moves().is_empty());
    }

    #[tokio::test]
    async fn full_pool_skips_lobby_arrival() {
        let h = harness();
        for (member, room) in [("1", "t1"), ("2", "t2"), ("3", "t3")] {
            h.graph.apply(id(member), Some(ch(room))).await;
        }
        let event = h.graph.apply(id("Z"), Some(ch("lobby"))).await.unwrap();
        assert_eq!(h.engine.on_voice_event(&event).await, Outcome::Skipped(Skip::PoolExhausted));
    }

    #[tokio::test]
    async fn lobby_listener_moves_arrivals() {
        let h = harness();
        let engine = Arc::clone(&h.engine);
        let listener = tokio::spawn(engine.run_lobby_listener(h.graph.subscribe()));

        h.graph.apply(id("Z"), Some(ch("lobby"))).await;
        for _ in 0..50 {
            if !h.sink.moves().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        listener.abort();

        assert_eq!(h.sink.moves(), vec![(id("Z"), ch("t1"))]);
    }
}
