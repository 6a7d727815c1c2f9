//! Helix response shapes and the domain types they map into.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Envelope shared by every Helix collection endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct HelixPage<T> {
    #[serde(default = "Vec::new")]
    pub data: Vec<T>,
    #[serde(default)]
    pub pagination: Option<Pagination>,
    #[serde(default)]
    pub total: Option<u64>,
    #[serde(default)]
    pub points: Option<u64>,
}

impl<T> HelixPage<T> {
    pub fn cursor(&self) -> Option<&str> {
        self.pagination
            .as_ref()
            .and_then(|p| p.cursor.as_deref())
            .filter(|c| !c.is_empty())
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Pagination {
    #[serde(default)]
    pub cursor: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HelixUser {
    pub id: String,
    pub login: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub broadcaster_type: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub profile_image_url: Option<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HelixStream {
    pub user_login: String,
    #[serde(default)]
    pub user_name: String,
    #[serde(default)]
    pub game_name: String,
    #[serde(default, rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub viewer_count: u64,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub language: String,
    #[serde(default)]
    pub thumbnail_url: Option<String>,
    #[serde(default)]
    pub tags: Option<Vec<String>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HelixChannel {
    pub broadcaster_id: String,
    #[serde(default)]
    pub broadcaster_language: String,
    #[serde(default)]
    pub game_name: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HelixFollower {
    pub user_id: String,
    pub user_login: String,
    #[serde(default)]
    pub user_name: String,
    pub followed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HelixSubscription {
    pub user_id: String,
    pub user_login: String,
    #[serde(default)]
    pub user_name: String,
    #[serde(default)]
    pub tier: String,
    #[serde(default)]
    pub is_gift: bool,
}

fn non_empty(s: String) -> Option<String> {
    if s.is_empty() {
        None
    } else {
        Some(s)
    }
}

/// Live status of one channel. Offline channels carry only `channel`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamInfo {
    pub channel: String,
    pub is_live: bool,
    pub title: Option<String>,
    pub game: Option<String>,
    pub viewer_count: u64,
    pub started_at: Option<DateTime<Utc>>,
    pub language: Option<String>,
    pub tags: Vec<String>,
    pub thumbnail_url: Option<String>,
}

impl StreamInfo {
    pub fn offline(channel: &str) -> Self {
        Self {
            channel: channel.to_string(),
            is_live: false,
            title: None,
            game: None,
            viewer_count: 0,
            started_at: None,
            language: None,
            tags: Vec::new(),
            thumbnail_url: None,
        }
    }
}

impl From<HelixStream> for StreamInfo {
    fn from(s: HelixStream) -> Self {
        Self {
            channel: s.user_login.to_lowercase(),
            is_live: s.kind == "live",
            title: non_empty(s.title),
            game: non_empty(s.game_name),
            viewer_count: s.viewer_count,
            started_at: s.started_at,
            language: non_empty(s.language),
            tags: s.tags.unwrap_or_default(),
            thumbnail_url: s.thumbnail_url,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelInfo {
    pub id: String,
    pub login: String,
    pub display_name: String,
    pub description: Option<String>,
    pub broadcaster_type: Option<String>,
    pub profile_image_url: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub title: Option<String>,
    pub game: Option<String>,
    pub language: Option<String>,
    pub tags: Vec<String>,
}

impl ChannelInfo {
    pub(crate) fn from_parts(user: HelixUser, channel: Option<HelixChannel>) -> Self {
        let (title, game, language, tags) = match channel {
            Some(c) => (
                non_empty(c.title),
                non_empty(c.game_name),
                non_empty(c.broadcaster_language),
                c.tags,
            ),
            None => (None, None, None, Vec::new()),
        };
        Self {
            id: user.id,
            login: user.login,
            display_name: user.display_name,
            description: non_empty(user.description),
            broadcaster_type: non_empty(user.broadcaster_type),
            profile_image_url: user.profile_image_url,
            created_at: user.created_at,
            title,
            game,
            language,
            tags,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Follower {
    pub user_id: String,
    pub login: String,
    pub display_name: String,
    pub followed_at: DateTime<Utc>,
}

impl From<HelixFollower> for Follower {
    fn from(f: HelixFollower) -> Self {
        Self {
            user_id: f.user_id,
            login: f.user_login,
            display_name: f.user_name,
            followed_at: f.followed_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FollowerList {
    pub channel: String,
    /// Total follower count reported by the platform.
    pub total: u64,
    pub followers: Vec<Follower>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscriber {
    pub user_id: String,
    pub login: String,
    pub display_name: String,
    /// "1000", "2000" or "3000".
    pub tier: String,
    pub is_gift: bool,
}

impl From<HelixSubscription> for Subscriber {
    fn from(s: HelixSubscription) -> Self {
        Self {
            user_id: s.user_id,
            login: s.user_login,
            display_name: s.user_name,
            tier: s.tier,
            is_gift: s.is_gift,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscriberInfo {
    pub channel: String,
    pub total: u64,
    pub points: u64,
    pub subscribers: Vec<Subscriber>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stream_mapping() {
        let page: HelixPage<HelixStream> = serde_json::from_str(
            r#"{
                "data": [{
                    "id": "1", "user_id": "2", "user_login": "Streamer", "user_name": "Streamer",
                    "game_name": "Chess", "type": "live", "title": "Blitz",
                    "viewer_count": 42, "started_at": "2024-01-01T12:00:00Z",
                    "language": "en", "tags": ["English"]
                }],
                "pagination": {}
            }"#,
        )
        .unwrap();

        assert!(page.cursor().is_none());
        let info = StreamInfo::from(page.data.into_iter().next().unwrap());
        assert_eq!(info.channel, "streamer");
        assert!(info.is_live);
        assert_eq!(info.game.as_deref(), Some("Chess"));
        assert_eq!(info.viewer_count, 42);
        assert_eq!(info.tags, vec!["English"]);
    }

    #[test]
    fn test_follower_page_with_cursor() {
        let page: HelixPage<HelixFollower> = serde_json::from_str(
            r#"{
                "total": 12345,
                "data": [{"user_id": "9", "user_login": "fan", "user_name": "Fan", "followed_at": "2023-05-01T00:00:00Z"}],
                "pagination": {"cursor": "abc"}
            }"#,
        )
        .unwrap();
        assert_eq!(page.total, Some(12345));
        assert_eq!(page.cursor(), Some("abc"));
        assert_eq!(Follower::from(page.data[0].clone()).login, "fan");
    }
}
