//! Identity linking.
//!
//! Lookup order for a reported name: the durable store first, then the
//! member directory. A name that failed to resolve is not sent to the
//! directory again until its cooldown has passed, so an unknown player
//! reporting several times per second costs one directory call per window.

use crate::collaborators::{IdentityResolver, IdentityStore};
use earshot_core::{IdentityId, PlayerKey};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Default wait before retrying an unresolved name.
pub const DEFAULT_RESOLVE_COOLDOWN: Duration = Duration::from_secs(60);

pub struct IdentityLinker {
    store: Arc<dyn IdentityStore>,
    resolver: Arc<dyn IdentityResolver>,
    cooldown: Duration,
    /// Last failed resolution per player
    attempts: Mutex<HashMap<PlayerKey, Instant>>,
}

impl IdentityLinker {
    pub fn new(store: Arc<dyn IdentityStore>, resolver: Arc<dyn IdentityResolver>) -> Self {
        Self {
            store,
            resolver,
            cooldown: DEFAULT_RESOLVE_COOLDOWN,
            attempts: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown = cooldown;
        self
    }

    /// Identity for a reported name, or `None` if it is unknown this cycle.
    pub async fn identity_for(&self, name: &str) -> Option<IdentityId> {
        self.identity_for_at(name, Instant::now()).await
    }

    pub async fn identity_for_at(&self, name: &str, now: Instant) -> Option<IdentityId> {
        let key = PlayerKey::new(name);

        match self.store.get_link(&key).await {
            Ok(Some(identity)) => return Some(identity),
            Ok(None) => {}
            Err(e) => {
                warn!("Identity store lookup for {} failed: {}", key, e);
                return None;
            }
        }

        if !self.begin_attempt(&key, now) {
            debug!("Skipping lookup for {} (cooling down)", key);
            return None;
        }

        match self.resolver.resolve(name).await {
            Ok(Some(identity)) => match self.store.create_link(&key, &identity).await {
                Ok(linked) => {
                    info!("Linked {} to member {}", key, linked);
                    self.clear_attempt(&key);
                    Some(linked)
                }
                Err(e) => {
                    warn!("Failed to persist link {} -> {}: {}", key, identity, e);
                    None
                }
            },
            Ok(None) => {
                info!("No member matches [{}]; retrying after {:?}", name, self.cooldown);
                None
            }
            Err(e) => {
                warn!("Member lookup for {} failed: {}", key, e);
                None
            }
        }
    }

    /// Claim a resolution attempt for `key`. Returns false while the previous
    /// attempt is still inside the cooldown window.
    fn begin_attempt(&self, key: &PlayerKey, now: Instant) -> bool {
        let mut attempts = self.attempts.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(last) = attempts.get(key) {
            if now.saturating_duration_since(*last) < self.cooldown {
                return false;
            }
        }
        attempts.insert(key.clone(), now);
        true
    }

    fn clear_attempt(&self, key: &PlayerKey) {
        self.attempts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key);
    }

    /// Drop cooldown entries that have run out.
    pub fn prune(&self, now: Instant) {
        let cooldown = self.cooldown;
        self.attempts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|_, last| now.saturating_duration_since(*last) < cooldown);
    }

    /// Number of names currently cooling down.
    pub fn pending_attempts(&self) -> usize {
        self.attempts.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}
