//! Identifier newtypes shared by every stage of the pipeline.

use std::fmt;

/// Case-insensitive key of a player in the world.
///
/// Two reports for `"Alice"` and `"alice"` address the same player. Ordering
/// follows the lowercased name, which is what the merge tie-break compares.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(transparent))]
pub struct PlayerKey(String);

impl PlayerKey {
    /// Build the key for a reported player name.
    pub fn new(name: &str) -> Self {
        Self(name.trim().to_lowercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PlayerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A communications-platform account linked to a player.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(transparent))]
pub struct IdentityId(String);

impl IdentityId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for IdentityId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for IdentityId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl fmt::Display for IdentityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A voice channel in the external channel graph.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(transparent))]
pub struct ChannelId(String);

impl ChannelId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ChannelId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for ChannelId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn player_key_ignores_case_and_padding() {
        assert_eq!(PlayerKey::new("  Alice "), PlayerKey::new("alice"));
        assert_eq!(PlayerKey::new("ALICE").as_str(), "alice");
    }

    #[test]
    fn player_key_orders_by_lowercased_name() {
        assert!(PlayerKey::new("bob") > PlayerKey::new("Alice"));
        assert!(PlayerKey::new("Zed") > PlayerKey::new("bob"));
    }
}
