//! Assignment policy state machine.
//!
//! Per linked player the policy tracks one of two states:
//!
//! ```text
//!            partner found                 partner changes to q
//!   Solo ────────────────────► Paired(p) ───────────────────────► Paired(q)
//!    ▲                             │
//!    └──────── partner lost ───────┘   (split: occupied-only or always-home)
//! ```
//!
//! Unlinked players never reach the policy. Tracked state is a hint used to
//! suppress repeated moves; the channel graph stays the source of truth and
//! the two may drift apart when players are moved by hand.
//!
//! Decisions are two-phase. [`AssignmentPolicy::plan`] is pure and returns a
//! [`Decision`] carrying the state to commit. The caller commits once the move
//! has landed (or immediately when no move is needed), so a failed move is
//! planned again on the next report.

use crate::error::{Error, Result};
use crate::ids::{ChannelId, PlayerKey};
use crate::pool::PoolIntent;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::str::FromStr;

/// Tracked partnership state of a linked player.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum PlayerState {
    #[default]
    Solo,
    Paired(PlayerKey),
}

/// What to do when a paired player loses its partner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SplitPolicy {
    /// Move away only if the current channel holds someone else too.
    #[default]
    Occupied,
    /// Always return to the home channel.
    AlwaysHome,
}

impl FromStr for SplitPolicy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "occupied" | "occupied-only" => Ok(Self::Occupied),
            "always-home" | "home" => Ok(Self::AlwaysHome),
            other => Err(Error::UnknownOption {
                option: "split policy",
                value: other.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PolicyConfig {
    pub split: SplitPolicy,
    /// Destination intent for [`SplitPolicy::Occupied`] splits.
    pub split_target: PoolIntent,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            split: SplitPolicy::Occupied,
            split_target: PoolIntent::RandomEmpty,
        }
    }
}

/// Where a move should go.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    /// A concrete channel (a partner's channel).
    Channel(ChannelId),
    /// A channel picked from the pool, excluding the mover's current one.
    Pool(PoolIntent),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Stay,
    MoveTo(Target),
}

/// Why a decision came out the way it did. Used for logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reason {
    /// Already paired with this partner
    AlreadyPaired,
    /// Partner is not in any voice channel
    PartnerNotInVoice,
    /// Already in the partner's channel
    SameChannel,
    /// Mover sorts greater and joins the partner
    Merge,
    /// Mover sorts smaller and waits to be joined
    AwaitPartner,
    /// Keys compare equal, neither side moves
    AmbiguousOrder,
    NoPartner,
    /// Partner lost, leaving a shared channel
    Split,
    /// Partner lost but the mover is already alone
    AlreadyAlone,
    /// Partner lost, returning home
    ReturnHome,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decision {
    pub action: Action,
    /// State to record for the mover once the action has been carried out.
    pub commit: Option<PlayerState>,
    pub reason: Reason,
}

impl Decision {
    fn stay(reason: Reason, commit: Option<PlayerState>) -> Self {
        Self { action: Action::Stay, commit, reason }
    }

    fn move_to(target: Target, commit: PlayerState, reason: Reason) -> Self {
        Self {
            action: Action::MoveTo(target),
            commit: Some(commit),
            reason,
        }
    }
}

/// The partner as seen by the policy.
#[derive(Debug, Clone, Copy)]
pub struct PartnerView<'a> {
    pub key: &'a PlayerKey,
    pub channel: Option<&'a ChannelId>,
}

/// Everything the policy needs to know about one report.
#[derive(Debug, Clone, Copy)]
pub struct Observation<'a> {
    pub mover: &'a PlayerKey,
    /// Channel the mover currently sits in
    pub current: &'a ChannelId,
    /// Number of members in `current`, the mover included
    pub occupancy: usize,
    pub partner: Option<PartnerView<'a>>,
}

/// Partnership tracker and transition rules.
#[derive(Debug, Default)]
pub struct AssignmentPolicy {
    config: PolicyConfig,
    partners: HashMap<PlayerKey, PlayerKey>,
}

impl AssignmentPolicy {
    pub fn new(config: PolicyConfig) -> Self {
        Self {
            config,
            partners: HashMap::new(),
        }
    }

    pub fn config(&self) -> &PolicyConfig {
        &self.config
    }

    pub fn state(&self, key: &PlayerKey) -> PlayerState {
        match self.partners.get(key) {
            Some(partner) => PlayerState::Paired(partner.clone()),
            None => PlayerState::Solo,
        }
    }

    /// Decide the next action for a mover.
    pub fn plan(&self, obs: &Observation<'_>) -> Decision {
        let state = self.state(obs.mover);

        let Some(partner) = obs.partner else {
            return self.plan_without_partner(obs, state);
        };

        if state == PlayerState::Paired(partner.key.clone()) {
            return Decision::stay(Reason::AlreadyPaired, None);
        }

        let Some(partner_channel) = partner.channel else {
            return Decision::stay(Reason::PartnerNotInVoice, None);
        };

        let paired = PlayerState::Paired(partner.key.clone());
        if partner_channel == obs.current {
            return Decision::stay(Reason::SameChannel, Some(paired));
        }

        match obs.mover.cmp(partner.key) {
            Ordering::Greater => Decision::move_to(
                Target::Channel(partner_channel.clone()),
                paired,
                Reason::Merge,
            ),
            Ordering::Less => Decision::stay(Reason::AwaitPartner, Some(paired)),
            Ordering::Equal => Decision::stay(Reason::AmbiguousOrder, None),
        }
    }

    fn plan_without_partner(&self, obs: &Observation<'_>, state: PlayerState) -> Decision {
        if state == PlayerState::Solo {
            return Decision::stay(Reason::NoPartner, None);
        }

        match self.config.split {
            SplitPolicy::Occupied if obs.occupancy > 1 => Decision::move_to(
                Target::Pool(self.config.split_target),
                PlayerState::Solo,
                Reason::Split,
            ),
            SplitPolicy::Occupied => Decision::stay(Reason::AlreadyAlone, Some(PlayerState::Solo)),
            SplitPolicy::AlwaysHome => Decision::move_to(
                Target::Pool(PoolIntent::Home),
                PlayerState::Solo,
                Reason::ReturnHome,
            ),
        }
    }

    /// Record a player's new state.
    pub fn commit(&mut self, key: &PlayerKey, state: PlayerState) {
        match state {
            PlayerState::Solo => {
                self.partners.remove(key);
            }
            PlayerState::Paired(partner) => {
                self.partners.insert(key.clone(), partner);
            }
        }
    }

    /// Drop all tracked state for a player that went offline.
    pub fn forget(&mut self, key: &PlayerKey) {
        self.partners.remove(key);
    }

    /// Number of players currently tracked as paired.
    pub fn paired_count(&self) -> usize {
        self.partners.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn key(name: &str) -> PlayerKey {
        PlayerKey::new(name)
    }

    fn ch(id: &str) -> ChannelId {
        ChannelId::from(id)
    }

    fn observe<'a>(
        mover: &'a PlayerKey,
        current: &'a ChannelId,
        occupancy: usize,
        partner: Option<(&'a PlayerKey, Option<&'a ChannelId>)>,
    ) -> Observation<'a> {
        Observation {
            mover,
            current,
            occupancy,
            partner: partner.map(|(key, channel)| PartnerView { key, channel }),
        }
    }

    #[test]
    fn greater_key_merges_into_partner_channel() {
        let policy = AssignmentPolicy::default();
        let (bob, alice) = (key("bob"), key("Alice"));
        let (b_room, a_room) = (ch("b"), ch("a"));

        let d = policy.plan(&observe(&bob, &b_room, 1, Some((&alice, Some(&a_room)))));
        assert_eq!(d.action, Action::MoveTo(Target::Channel(a_room)));
        assert_eq!(d.commit, Some(PlayerState::Paired(alice)));
        assert_eq!(d.reason, Reason::Merge);
    }

    #[test]
    fn smaller_key_waits_and_records_pairing() {
        let policy = AssignmentPolicy::default();
        let (alice, bob) = (key("alice"), key("bob"));
        let (a_room, b_room) = (ch("a"), ch("b"));

        let d = policy.plan(&observe(&alice, &a_room, 1, Some((&bob, Some(&b_room)))));
        assert_eq!(d.action, Action::Stay);
        assert_eq!(d.commit, Some(PlayerState::Paired(bob)));
        assert_eq!(d.reason, Reason::AwaitPartner);
    }

    #[test]
    fn equal_keys_never_move() {
        let policy = AssignmentPolicy::default();
        let (a, b) = (key("Twin"), key("twin"));
        let (r1, r2) = (ch("1"), ch("2"));

        let d = policy.plan(&observe(&a, &r1, 1, Some((&b, Some(&r2)))));
        assert_eq!(d, Decision::stay(Reason::AmbiguousOrder, None));
    }

    #[test]
    fn same_channel_is_not_a_move() {
        let policy = AssignmentPolicy::default();
        let (zed, amy) = (key("zed"), key("amy"));
        let room = ch("room");

        let d = policy.plan(&observe(&zed, &room, 2, Some((&amy, Some(&room)))));
        assert_eq!(d.action, Action::Stay);
        assert_eq!(d.commit, Some(PlayerState::Paired(amy)));
    }

    #[test]
    fn partner_outside_voice_is_skipped_without_commit() {
        let policy = AssignmentPolicy::default();
        let (zed, amy) = (key("zed"), key("amy"));
        let room = ch("room");

        let d = policy.plan(&observe(&zed, &room, 1, Some((&amy, None))));
        assert_eq!(d, Decision::stay(Reason::PartnerNotInVoice, None));
    }

    #[test]
    fn already_paired_suppresses_repeat_moves() {
        let mut policy = AssignmentPolicy::default();
        let (bob, alice) = (key("bob"), key("alice"));
        let (b_room, a_room) = (ch("b"), ch("a"));
        policy.commit(&bob, PlayerState::Paired(alice.clone()));

        // Even if the channel graph still shows bob elsewhere
        let d = policy.plan(&observe(&bob, &b_room, 1, Some((&alice, Some(&a_room)))));
        assert_eq!(d, Decision::stay(Reason::AlreadyPaired, None));
    }

    #[test]
    fn partner_change_reruns_tie_break() {
        let mut policy = AssignmentPolicy::default();
        let (mia, alice, zoe) = (key("mia"), key("alice"), key("zoe"));
        let (m_room, z_room) = (ch("m"), ch("z"));
        policy.commit(&mia, PlayerState::Paired(alice));

        let d = policy.plan(&observe(&mia, &m_room, 2, Some((&zoe, Some(&z_room)))));
        assert_eq!(d.action, Action::Stay);
        assert_eq!(d.commit, Some(PlayerState::Paired(zoe.clone())));

        let (ann, a_room) = (key("ann"), ch("ann-room"));
        let d = policy.plan(&observe(&mia, &m_room, 2, Some((&ann, Some(&a_room)))));
        assert_eq!(d.action, Action::MoveTo(Target::Channel(a_room)));
    }

    #[test]
    fn solo_without_partner_does_nothing() {
        let policy = AssignmentPolicy::default();
        let bob = key("bob");
        let room = ch("room");

        let d = policy.plan(&observe(&bob, &room, 3, None));
        assert_eq!(d, Decision::stay(Reason::NoPartner, None));
    }

    #[test]
    fn occupied_split_only_moves_out_of_shared_channel() {
        let mut policy = AssignmentPolicy::default();
        let (bob, alice) = (key("bob"), key("alice"));
        let room = ch("room");
        policy.commit(&bob, PlayerState::Paired(alice));

        let d = policy.plan(&observe(&bob, &room, 2, None));
        assert_eq!(d.action, Action::MoveTo(Target::Pool(PoolIntent::RandomEmpty)));
        assert_eq!(d.commit, Some(PlayerState::Solo));

        let d = policy.plan(&observe(&bob, &room, 1, None));
        assert_eq!(d, Decision::stay(Reason::AlreadyAlone, Some(PlayerState::Solo)));
    }

    #[test]
    fn always_home_split_targets_home() {
        let mut policy = AssignmentPolicy::new(PolicyConfig {
            split: SplitPolicy::AlwaysHome,
            split_target: PoolIntent::FirstEmpty,
        });
        let (bob, alice) = (key("bob"), key("alice"));
        let room = ch("room");
        policy.commit(&bob, PlayerState::Paired(alice));

        let d = policy.plan(&observe(&bob, &room, 1, None));
        assert_eq!(d.action, Action::MoveTo(Target::Pool(PoolIntent::Home)));
        assert_eq!(d.reason, Reason::ReturnHome);
    }

    #[test]
    fn commit_and_forget() {
        let mut policy = AssignmentPolicy::default();
        let (bob, alice) = (key("bob"), key("alice"));

        policy.commit(&bob, PlayerState::Paired(alice.clone()));
        assert_eq!(policy.state(&bob), PlayerState::Paired(alice));
        assert_eq!(policy.paired_count(), 1);

        policy.forget(&bob);
        assert_eq!(policy.state(&bob), PlayerState::Solo);
        assert_eq!(policy.paired_count(), 0);
    }

    #[test]
    fn parse_split_policy() {
        assert_eq!("occupied".parse::<SplitPolicy>(), Ok(SplitPolicy::Occupied));
        assert_eq!("always-home".parse::<SplitPolicy>(), Ok(SplitPolicy::AlwaysHome));
        assert!("never".parse::<SplitPolicy>().is_err());
    }

    proptest! {
        /// Two players near each other, in different channels, reporting in
        /// any interleaving: at most one of them ever moves, and only once.
        #[test]
        fn pair_never_cross_moves(
            a in "[a-zA-Z]{1,8}",
            b in "[a-zA-Z]{1,8}",
            order in proptest::collection::vec(any::<bool>(), 1..20),
        ) {
            let (ka, kb) = (PlayerKey::new(&a), PlayerKey::new(&b));
            prop_assume!(ka != kb);

            let mut policy = AssignmentPolicy::default();
            let mut rooms = HashMap::from([(ka.clone(), ch("room-a")), (kb.clone(), ch("room-b"))]);
            let mut moves: Vec<PlayerKey> = Vec::new();

            for a_turn in order {
                let (mover, partner) = if a_turn { (&ka, &kb) } else { (&kb, &ka) };
                let current = rooms[mover].clone();
                let partner_room = rooms[partner].clone();
                let partner_view = Some((partner, Some(&partner_room)));
                let d = policy.plan(&observe(mover, &current, 1, partner_view));
                if let Action::MoveTo(Target::Channel(to)) = d.action {
                    moves.push(mover.clone());
                    rooms.insert(mover.clone(), to);
                }
                if let Some(state) = d.commit {
                    policy.commit(mover, state);
                }
            }

            prop_assert!(moves.len() <= 1);
            if let Some(mover) = moves.first() {
                prop_assert_eq!(mover, std::cmp::max(&ka, &kb));
            }
        }
    }
}
