//! Live registry of player positions.
//!
//! The registry is the only owner of position records. Reports overwrite the
//! record for a player, a periodic sweep removes records that have gone quiet.
//! Every operation takes the lock for its whole read-modify-write, so reports
//! and sweeps can run from different tasks without losing updates.

use crate::geometry::Position;
use crate::ids::{IdentityId, PlayerKey};
use std::collections::BTreeMap;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, Instant};

/// Last known state of a player.
#[derive(Debug, Clone, PartialEq)]
pub struct PlayerRecord {
    pub key: PlayerKey,
    /// Name as it was last reported (original casing)
    pub name: String,
    pub position: Position,
    pub last_update: Instant,
    /// Linked platform identity, absent until resolved
    pub identity: Option<IdentityId>,
}

impl PlayerRecord {
    pub fn is_linked(&self) -> bool {
        self.identity.is_some()
    }

    /// Time since the last report.
    pub fn age(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_update)
    }
}

/// Lock-guarded map from player key to record.
///
/// Iteration follows ascending key order, which is the "registry order" the
/// first-found partner strategy walks.
#[derive(Debug, Default)]
pub struct Registry {
    records: RwLock<BTreeMap<PlayerKey, PlayerRecord>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, BTreeMap<PlayerKey, PlayerRecord>> {
        self.records.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, BTreeMap<PlayerKey, PlayerRecord>> {
        self.records.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record a position report stamped with the current time.
    pub fn report(
        &self,
        name: &str,
        position: Position,
        identity: Option<IdentityId>,
    ) -> PlayerKey {
        self.report_at(name, position, identity, Instant::now())
    }

    /// Record a position report at an explicit time.
    ///
    /// A report without an identity keeps the identity already linked to the
    /// record; links are never dropped by a position update.
    pub fn report_at(
        &self,
        name: &str,
        position: Position,
        identity: Option<IdentityId>,
        now: Instant,
    ) -> PlayerKey {
        let key = PlayerKey::new(name);
        let mut records = self.write();
        let identity = identity.or_else(|| records.get(&key).and_then(|r| r.identity.clone()));
        records.insert(
            key.clone(),
            PlayerRecord {
                key: key.clone(),
                name: name.trim().to_string(),
                position,
                last_update: now,
                identity,
            },
        );
        key
    }

    /// Attach an identity to an existing record. Returns false if the player
    /// is not (or no longer) in the registry.
    pub fn link(&self, key: &PlayerKey, identity: IdentityId) -> bool {
        match self.write().get_mut(key) {
            Some(record) => {
                record.identity = Some(identity);
                true
            }
            None => false,
        }
    }

    /// Clear the identity of a record. Returns false if nothing was linked.
    pub fn unlink(&self, key: &PlayerKey) -> bool {
        self.write()
            .get_mut(key)
            .and_then(|record| record.identity.take())
            .is_some()
    }

    /// Remove every record older than `threshold` and return their keys.
    pub fn expire_stale(&self, now: Instant, threshold: Duration) -> Vec<PlayerKey> {
        let mut records = self.write();
        let stale: Vec<PlayerKey> = records
            .values()
            .filter(|r| r.age(now) > threshold)
            .map(|r| r.key.clone())
            .collect();
        for key in &stale {
            records.remove(key);
        }
        stale
    }

    pub fn get(&self, key: &PlayerKey) -> Option<PlayerRecord> {
        self.read().get(key).cloned()
    }

    pub fn contains(&self, key: &PlayerKey) -> bool {
        self.read().contains_key(key)
    }

    /// Every record with a linked identity.
    pub fn all_linked(&self) -> Vec<PlayerRecord> {
        self.read().values().filter(|r| r.is_linked()).cloned().collect()
    }

    /// The mover's record together with every other linked record, taken
    /// under a single lock acquisition.
    pub fn neighborhood(&self, key: &PlayerKey) -> Option<(PlayerRecord, Vec<PlayerRecord>)> {
        let records = self.read();
        let mover = records.get(key)?.clone();
        let others = records
            .values()
            .filter(|r| r.key != *key && r.is_linked())
            .cloned()
            .collect();
        Some((mover, others))
    }

    /// Copy of every record, linked or not.
    pub fn snapshot(&self) -> Vec<PlayerRecord> {
        self.read().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }
}
