//! Channel pool selection.
//!
//! The pool is a set of interchangeable talk rooms plus one home/lobby
//! channel. The home channel never counts as an empty talk room.

use crate::error::{Error, Result};
use crate::ids::ChannelId;
use rand::seq::SliceRandom;
use rand::Rng;
use std::str::FromStr;

/// How to pick a destination from the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolIntent {
    /// First empty talk room in pool order.
    FirstEmpty,
    /// A random empty talk room.
    RandomEmpty,
    /// The configured fixed talk room.
    FixedTalkRoom,
    /// The home/lobby channel.
    Home,
}

impl FromStr for PoolIntent {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "first-empty" | "first" => Ok(Self::FirstEmpty),
            "random-empty" | "random" => Ok(Self::RandomEmpty),
            "talk-room" | "fixed" => Ok(Self::FixedTalkRoom),
            "home" | "lobby" => Ok(Self::Home),
            other => Err(Error::UnknownOption {
                option: "pool intent",
                value: other.to_string(),
            }),
        }
    }
}

/// Read-only view of the destination channels.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelPool {
    talk_rooms: Vec<ChannelId>,
    home: ChannelId,
    fixed: Option<ChannelId>,
}

impl ChannelPool {
    /// Build a pool. The home channel is dropped from the talk rooms if the
    /// category happens to contain it.
    pub fn new(talk_rooms: Vec<ChannelId>, home: ChannelId) -> Self {
        let talk_rooms = talk_rooms.into_iter().filter(|c| *c != home).collect();
        Self {
            talk_rooms,
            home,
            fixed: None,
        }
    }

    /// Set the channel used by [`PoolIntent::FixedTalkRoom`].
    pub fn with_fixed_room(mut self, room: ChannelId) -> Self {
        self.fixed = Some(room);
        self
    }

    pub fn home(&self) -> &ChannelId {
        &self.home
    }

    pub fn talk_rooms(&self) -> &[ChannelId] {
        &self.talk_rooms
    }

    /// Pick a destination channel.
    ///
    /// `exclude` (the mover's current channel) is never returned for the
    /// empty-room intents. `occupancy` reports how many members sit in a
    /// channel. Returns `None` when nothing is eligible; callers skip the
    /// move and try again on a later report.
    pub fn select<F, R>(
        &self,
        intent: PoolIntent,
        exclude: Option<&ChannelId>,
        occupancy: F,
        rng: &mut R,
    ) -> Option<ChannelId>
    where
        F: Fn(&ChannelId) -> usize,
        R: Rng + ?Sized,
    {
        let mut empty = self
            .talk_rooms
            .iter()
            .filter(|c| Some(*c) != exclude && occupancy(*c) == 0);

        match intent {
            PoolIntent::FirstEmpty => empty.next().cloned(),
            PoolIntent::RandomEmpty => {
                let candidates: Vec<&ChannelId> = empty.collect();
                candidates.choose(rng).map(|c| (*c).clone())
            }
            PoolIntent::FixedTalkRoom => self.fixed.clone(),
            PoolIntent::Home => Some(self.home.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::collections::{HashMap, HashSet};

    fn ch(id: &str) -> ChannelId {
        ChannelId::from(id)
    }

    fn pool() -> ChannelPool {
        ChannelPool::new(vec![ch("lobby"), ch("t1"), ch("t2"), ch("t3")], ch("lobby"))
    }

    fn occupied(busy: &[&str]) -> impl Fn(&ChannelId) -> usize {
        let busy: HashMap<ChannelId, usize> = busy.iter().map(|c| (ch(c), 1)).collect();
        move |c: &ChannelId| busy.get(c).copied().unwrap_or(0)
    }

    #[test]
    fn home_is_never_a_talk_room() {
        let pool = pool();
        assert_eq!(pool.talk_rooms(), &[ch("t1"), ch("t2"), ch("t3")]);
        assert_eq!(pool.home(), &ch("lobby"));
    }

    #[test]
    fn first_empty_skips_busy_and_excluded() {
        let pool = pool();
        let mut rng = StdRng::seed_from_u64(7);

        let picked = pool.select(PoolIntent::FirstEmpty, None, occupied(&["t1"]), &mut rng);
        assert_eq!(picked, Some(ch("t2")));

        let busy = occupied(&["t1"]);
        let picked = pool.select(PoolIntent::FirstEmpty, Some(&ch("t2")), busy, &mut rng);
        assert_eq!(picked, Some(ch("t3")));
    }

    #[test]
    fn random_empty_never_returns_current_or_busy() {
        let pool = pool();
        let mut rng = StdRng::seed_from_u64(1);
        let mut seen = HashSet::new();

        for _ in 0..64 {
            let picked = pool
                .select(PoolIntent::RandomEmpty, Some(&ch("t1")), occupied(&["t3"]), &mut rng)
                .unwrap();
            seen.insert(picked);
        }
        assert_eq!(seen, HashSet::from([ch("t2")]));
    }

    #[test]
    fn exhausted_pool_yields_none() {
        let pool = pool();
        let mut rng = StdRng::seed_from_u64(3);
        let all_busy = occupied(&["t1", "t2", "t3"]);

        assert_eq!(pool.select(PoolIntent::FirstEmpty, None, &all_busy, &mut rng), None);
        assert_eq!(pool.select(PoolIntent::RandomEmpty, None, &all_busy, &mut rng), None);
    }

    #[test]
    fn fixed_and_home_intents() {
        let mut rng = StdRng::seed_from_u64(5);
        let none_busy = occupied(&[]);

        assert_eq!(pool().select(PoolIntent::FixedTalkRoom, None, &none_busy, &mut rng), None);
        let pool = pool().with_fixed_room(ch("t2"));
        let picked = pool.select(PoolIntent::FixedTalkRoom, None, &none_busy, &mut rng);
        assert_eq!(picked, Some(ch("t2")));
        assert_eq!(pool.select(PoolIntent::Home, None, &none_busy, &mut rng), Some(ch("lobby")));
    }

    #[test]
    fn parse_intents() {
        assert_eq!("random-empty".parse::<PoolIntent>(), Ok(PoolIntent::RandomEmpty));
        assert_eq!("lobby".parse::<PoolIntent>(), Ok(PoolIntent::Home));
        assert!("anywhere".parse::<PoolIntent>().is_err());
    }
}
