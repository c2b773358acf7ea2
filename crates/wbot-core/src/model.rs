//! Typed records for the payloads handlers receive.
//!
//! The platform's JSON is mapped into explicit schemas with optional fields;
//! unknown keys are ignored (serde's default for non-`deny_unknown_fields`
//! structs). Ids arrive as strings on some endpoints and numbers on others,
//! so the raw string is kept and parsed on demand.

use serde::Deserialize;

use crate::domain::{CommentId, PostId, UserId};

/// Author of a post or comment. A small slice of the platform's user
/// object; everything else is dropped at the adapter boundary.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct User {
    pub id: i64,
    #[serde(default)]
    pub screen_name: String,
    #[serde(default)]
    pub profile_image_url: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub verified: bool,
    #[serde(default)]
    pub follow_count: i64,
    #[serde(default)]
    pub statuses_count: i64,
}

impl User {
    pub fn user_id(&self) -> UserId {
        UserId(self.id)
    }
}

/// One post from the feed.
///
/// `retweeted` embeds the reposted original as an owned, depth-bounded
/// recursive field; real-world nesting is one level.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct Post {
    pub id: String,
    #[serde(default)]
    pub mid: String,
    #[serde(default)]
    pub created_at: String,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub source: String,
    #[serde(default)]
    pub user: Option<User>,
    #[serde(default)]
    pub reposts_count: i64,
    #[serde(default)]
    pub comments_count: i64,
    #[serde(default)]
    pub attitudes_count: i64,
    #[serde(default, rename = "isLongText")]
    pub is_long_text: bool,
    #[serde(default, rename = "longText")]
    pub long_text: Option<LongText>,
    #[serde(default)]
    pub pics: Vec<Pic>,
    #[serde(default)]
    pub retweeted_status: Option<Box<Post>>,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct LongText {
    #[serde(default, rename = "longTextContent")]
    pub content: String,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct Pic {
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub large: Option<PicVariant>,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct PicVariant {
    #[serde(default)]
    pub url: String,
}

impl Post {
    pub fn post_id(&self) -> Option<PostId> {
        self.id.parse().ok().map(PostId)
    }

    /// Full text, preferring the long-text body when the platform
    /// truncated the inline one.
    pub fn full_text(&self) -> &str {
        match &self.long_text {
            Some(lt) if !lt.content.is_empty() => &lt.content,
            _ => &self.text,
        }
    }

    pub fn image_urls(&self) -> Vec<&str> {
        self.pics
            .iter()
            .filter_map(|p| p.large.as_ref().map(|l| l.url.as_str()))
            .collect()
    }
}

/// A comment, as delivered by the mentions endpoint. `reply_id` points at
/// the parent comment when this is a reply; `comments` carries the child
/// replies the endpoint chose to inline (small, finite depth).
#[derive(Clone, Debug, Default, Deserialize)]
pub struct Comment {
    pub id: i64,
    #[serde(default)]
    pub mid: String,
    #[serde(default)]
    pub created_at: String,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub source: String,
    #[serde(default)]
    pub reply_id: Option<i64>,
    #[serde(default)]
    pub reply_text: Option<String>,
    #[serde(default)]
    pub like_counts: i64,
    #[serde(default)]
    pub user: Option<User>,
    #[serde(default, deserialize_with = "lenient_children")]
    pub comments: Vec<Comment>,
}

impl Comment {
    pub fn comment_id(&self) -> CommentId {
        CommentId(self.id)
    }
}

/// The mentions endpoint sends `comments: false` instead of an empty list
/// when there are no children.
fn lenient_children<'de, D>(deserializer: D) -> std::result::Result<Vec<Comment>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        List(Vec<Comment>),
        Other(serde_json::Value),
    }

    Ok(match Raw::deserialize(deserializer)? {
        Raw::List(list) => list,
        Raw::Other(_) => Vec::new(),
    })
}

/// One page of the friends feed, with the pagination cursor.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct Page {
    #[serde(default)]
    pub since_id: i64,
    #[serde(default)]
    pub max_id: i64,
    #[serde(default)]
    pub statuses: Vec<Post>,
}

/// Entry in the conversation list.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct ChatSummary {
    #[serde(default)]
    pub created_at: String,
    /// Detail-page URL; group conversations carry a `gid` parameter here.
    #[serde(default)]
    pub scheme: String,
    #[serde(default)]
    pub unread: i64,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub user: Option<User>,
}

impl ChatSummary {
    /// Group conversations are skipped by the chat scan.
    pub fn is_group(&self) -> bool {
        self.scheme.contains("gid")
    }
}

/// Normal direct message; `dm_type` 1 is a plain message.
pub const DM_TYPE_NORMAL: i64 = 1;

#[derive(Clone, Debug, Default, Deserialize)]
pub struct DirectMessage {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub created_at: String,
    #[serde(default)]
    pub dm_type: i64,
    #[serde(default)]
    pub sender_id: i64,
    #[serde(default)]
    pub sender_screen_name: String,
    #[serde(default)]
    pub recipient_id: i64,
    #[serde(default)]
    pub text: String,
}

/// One conversation, newest messages first.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct ChatDetail {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub total_number: i64,
    #[serde(default)]
    pub msgs: Vec<DirectMessage>,
}

/// Post visibility, encoded the way the platform expects it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Visibility {
    All,
    OnlyMe,
    Friends,
    Followers,
}

impl Visibility {
    pub fn as_param(self) -> u8 {
        match self {
            Visibility::All => 0,
            Visibility::OnlyMe => 1,
            Visibility::Friends => 6,
            Visibility::Followers => 10,
        }
    }
}
