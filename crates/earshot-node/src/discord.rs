//! Discord REST adapter.
//!
//! Implements the member directory, the channel directory and the move sink
//! on top of the guild REST endpoints. Voice membership itself is not
//! readable over REST; it arrives through [`crate::voice::VoiceGraph`].

use crate::collaborators::{ChannelDirectory, ChannelMutationSink, IdentityResolver};
use crate::error::{Error, Result};
use async_trait::async_trait;
use earshot_core::{ChannelId, IdentityId};
use serde::Deserialize;
use tracing::debug;

/// Default Discord API base URL.
pub const DEFAULT_API_BASE: &str = "https://discord.com/api/v10";

/// Channel type of a guild voice channel.
const GUILD_VOICE: u8 = 2;

/// Members fetched per directory search.
const SEARCH_LIMIT: usize = 10;

/// Largest page the member list endpoint serves.
pub const MAX_MEMBER_PAGE: usize = 1000;

/// Markers some bridges prepend to player names (e.g. Bedrock players).
const BRIDGE_MARKERS: &[char] = &['.', '*'];

/// Cosmetic separators ignored when comparing names.
const SEPARATORS: &[char] = &['_', '-', ' '];

/// Strip a leading bridge marker and surrounding whitespace.
pub fn strip_marker(name: &str) -> &str {
    let name = name.trim();
    name.strip_prefix(BRIDGE_MARKERS).unwrap_or(name)
}

/// Comparison form of a name: no bridge marker, no separators, lowercase.
pub fn normalize_name(name: &str) -> String {
    strip_marker(name)
        .chars()
        .filter(|c| !SEPARATORS.contains(c))
        .flat_map(char::to_lowercase)
        .collect()
}

#[derive(Debug, Deserialize)]
struct GuildMember {
    user: User,
    nick: Option<String>,
}

impl GuildMember {
    /// Name shown in the guild: nickname, then global name, then username.
    fn display_name(&self) -> &str {
        self.nick
            .as_deref()
            .or(self.user.global_name.as_deref())
            .unwrap_or(&self.user.username)
    }

    fn answers_to(&self, wanted: &str) -> bool {
        normalize_name(self.display_name()) == wanted
            || normalize_name(&self.user.username) == wanted
    }
}

fn first_match(members: Vec<GuildMember>, wanted: &str) -> Option<IdentityId> {
    members
        .into_iter()
        .find(|m| m.answers_to(wanted))
        .map(|m| IdentityId::from(m.user.id))
}

#[derive(Debug, Deserialize)]
struct User {
    id: String,
    username: String,
    global_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Channel {
    id: String,
    #[serde(rename = "type")]
    kind: u8,
    parent_id: Option<String>,
    #[serde(default)]
    position: i64,
}

/// Client for the guild endpoints of the Discord REST API.
pub struct DiscordClient {
    base_url: String,
    token: String,
    guild_id: String,
    page_size: usize,
    client: reqwest::Client,
}

impl DiscordClient {
    pub fn new(token: impl Into<String>, guild_id: impl Into<String>) -> Self {
        Self {
            base_url: DEFAULT_API_BASE.into(),
            token: token.into(),
            guild_id: guild_id.into(),
            page_size: MAX_MEMBER_PAGE,
            client: reqwest::Client::new(),
        }
    }

    /// Override the API base URL.
    #[must_use]
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    /// Members requested per page when scanning the full member list.
    #[must_use]
    pub fn member_page_size(mut self, size: usize) -> Self {
        self.page_size = size.clamp(1, MAX_MEMBER_PAGE);
        self
    }

    fn guild_url(&self, path: &str) -> String {
        format!("{}/guilds/{}{}", self.base_url, self.guild_id, path)
    }

    fn authorization(&self) -> String {
        format!("Bot {}", self.token)
    }

    async fn check(response: reqwest::Response) -> Result<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let message = response.text().await.unwrap_or_default();
        Err(Error::Upstream {
            status: status.as_u16(),
            message,
        })
    }

    /// Server-side prefix search. Cheap, but only sees nicknames and
    /// usernames as typed.
    async fn search_members(&self, name: &str, wanted: &str) -> Result<Option<IdentityId>> {
        let query = strip_marker(name).to_lowercase();
        let limit = SEARCH_LIMIT.to_string();
        let response = self
            .client
            .get(self.guild_url("/members/search"))
            .header(reqwest::header::AUTHORIZATION, self.authorization())
            .query(&[("query", query.as_str()), ("limit", limit.as_str())])
            .send()
            .await?;
        let members: Vec<GuildMember> = Self::check(response).await?.json().await?;
        debug!("Directory search '{}' returned {} members", query, members.len());
        Ok(first_match(members, wanted))
    }

    /// Walk the whole member list in id order.
    async fn scan_members(&self, wanted: &str) -> Result<Option<IdentityId>> {
        let limit = self.page_size.to_string();
        let mut after = String::from("0");
        loop {
            let response = self
                .client
                .get(self.guild_url("/members"))
                .header(reqwest::header::AUTHORIZATION, self.authorization())
                .query(&[("limit", limit.as_str()), ("after", after.as_str())])
                .send()
                .await?;
            let page: Vec<GuildMember> = Self::check(response).await?.json().await?;
            let full = page.len() >= self.page_size;
            let Some(last) = page.last() else {
                return Ok(None);
            };
            after = last.user.id.clone();

            if let Some(identity) = first_match(page, wanted) {
                return Ok(Some(identity));
            }
            if !full {
                return Ok(None);
            }
        }
    }
}

#[async_trait]
impl IdentityResolver for DiscordClient {
    async fn resolve(&self, name: &str) -> Result<Option<IdentityId>> {
        let wanted = normalize_name(name);
        if wanted.is_empty() {
            return Ok(None);
        }

        if let Some(identity) = self.search_members(name, &wanted).await? {
            return Ok(Some(identity));
        }
        debug!("No search hit for '{}', scanning member list", wanted);
        self.scan_members(&wanted).await
    }
}

#[async_trait]
impl ChannelDirectory for DiscordClient {
    async fn voice_channels_in(&self, category: &ChannelId) -> Result<Vec<ChannelId>> {
        let response = self
            .client
            .get(self.guild_url("/channels"))
            .header(reqwest::header::AUTHORIZATION, self.authorization())
            .send()
            .await?;
        let mut channels: Vec<Channel> = Self::check(response).await?.json().await?;

        channels.retain(|c| {
            c.kind == GUILD_VOICE && c.parent_id.as_deref() == Some(category.as_str())
        });
        channels.sort_by(|a, b| a.position.cmp(&b.position).then_with(|| a.id.cmp(&b.id)));
        Ok(channels.into_iter().map(|c| ChannelId::from(c.id)).collect())
    }
}

#[async_trait]
impl ChannelMutationSink for DiscordClient {
    async fn move_to(&self, identity: &IdentityId, channel: &ChannelId) -> Result<()> {
        let response = self
            .client
            .patch(self.guild_url(&format!("/members/{}", identity)))
            .header(reqwest::header::AUTHORIZATION, self.authorization())
            .json(&serde_json::json!({ "channel_id": channel.as_str() }))
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }
}
