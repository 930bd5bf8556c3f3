//! Persistent identity links using RocksDB.
//!
//! A link is created once and never re-resolved, even if the member later
//! renames on the platform. Only the admin socket removes links.

use crate::collaborators::IdentityStore;
use crate::error::Result;
use async_trait::async_trait;
use earshot_core::{IdentityId, PlayerKey};
use rocksdb::{Options, DB};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Mutex;

/// A durable player → identity link.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityLink {
    pub player: PlayerKey,
    pub identity: IdentityId,
    /// Unix time in milliseconds when the link was created
    pub linked_at: u64,
}

impl IdentityLink {
    pub fn new(player: PlayerKey, identity: IdentityId) -> Self {
        let linked_at = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or_default();
        Self {
            player,
            identity,
            linked_at,
        }
    }
}

/// Storage backend for identity links.
pub struct Storage {
    db: DB,
    // Serializes check-then-put so two racing resolutions cannot both link.
    create_lock: Mutex<()>,
}

impl Storage {
    /// Open or create storage at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        let db = DB::open(&opts, path)?;
        Ok(Self {
            db,
            create_lock: Mutex::new(()),
        })
    }

    fn link_key(player: &PlayerKey) -> String {
        format!("link:{}", player)
    }

    /// Get the link for a player.
    pub fn get_link(&self, player: &PlayerKey) -> Result<Option<IdentityLink>> {
        match self.db.get(Self::link_key(player).as_bytes())? {
            Some(data) => Ok(Some(serde_json::from_slice(&data)?)),
            None => Ok(None),
        }
    }

    /// Store a link unless the player is already linked. Returns the link
    /// that is in place afterwards.
    pub fn put_link_if_absent(&self, link: &IdentityLink) -> Result<IdentityLink> {
        let _guard = self
            .create_lock
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);

        if let Some(existing) = self.get_link(&link.player)? {
            return Ok(existing);
        }
        let value = serde_json::to_vec(link)?;
        self.db.put(Self::link_key(&link.player).as_bytes(), value)?;
        Ok(link.clone())
    }

    /// Delete a link. Returns whether one existed.
    pub fn delete_link(&self, player: &PlayerKey) -> Result<bool> {
        let key = Self::link_key(player);
        let existed = self.db.get(key.as_bytes())?.is_some();
        self.db.delete(key.as_bytes())?;
        Ok(existed)
    }

    /// List all links.
    pub fn list_links(&self) -> Result<Vec<IdentityLink>> {
        let prefix = b"link:";
        let mut links = Vec::new();

        let iter = self.db.prefix_iterator(prefix);
        for item in iter {
            let (key, value) = item?;
            if key.starts_with(prefix) {
                let link: IdentityLink = serde_json::from_slice(&value)?;
                links.push(link);
            } else {
                break;
            }
        }

        Ok(links)
    }
}

#[async_trait]
impl IdentityStore for Storage {
    async fn get_link(&self, player: &PlayerKey) -> Result<Option<IdentityId>> {
        Ok(Storage::get_link(self, player)?.map(|link| link.identity))
    }

    async fn create_link(&self, player: &PlayerKey, identity: &IdentityId) -> Result<IdentityId> {
        let link = IdentityLink::new(player.clone(), identity.clone());
        Ok(self.put_link_if_absent(&link)?.identity)
    }
}
