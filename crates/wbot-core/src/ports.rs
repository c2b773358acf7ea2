//! Hexagonal ports for the platform adapter.
//!
//! The core never builds URLs or parses wire payloads; it consumes these
//! capability traits and stays agnostic to who implements them.

use async_trait::async_trait;

use crate::{
    domain::{AccountId, PostId, UserId},
    model::{ChatDetail, ChatSummary, Comment, Page, Post, Visibility},
    Result,
};

/// Result of a passive login probe.
#[derive(Clone, Debug)]
pub struct LoginProbe {
    pub is_logged_in: bool,
    /// Fresh anti-forgery token, present when logged in.
    pub token: String,
    pub account_id: Option<AccountId>,
}

/// Opaque handle for one issued interactive login code.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CodeId(pub String);

/// Remote status of an issued login code.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CodePollStatus {
    /// Nobody has scanned the code yet.
    Unused,
    /// Scanned on a device, waiting for the in-app confirmation.
    Scanned,
    /// The platform timed the code out; a fresh one must be issued.
    Expired,
    /// Confirmed; following the redirect mints the session.
    Confirmed { redirect_url: String },
}

/// Authentication collaborator.
#[async_trait]
pub trait AuthPort: Send + Sync {
    /// Probe the current credentials. Also refreshes the anti-forgery
    /// token as a side effect when the session is alive.
    async fn check_login(&self) -> Result<LoginProbe>;

    /// Issue a new interactive login code (QR on the original platform).
    async fn issue_code(&self) -> Result<CodeId>;

    /// Ask the platform what happened to an issued code.
    async fn poll_code(&self, code: &CodeId) -> Result<CodePollStatus>;

    /// Follow a confirmed code's redirect and persist the new credentials.
    async fn complete_code_login(&self, redirect_url: &str) -> Result<()>;
}

/// Read-side collaborator: paginated and point reads.
#[async_trait]
pub trait FetchPort: Send + Sync {
    /// One page of the friends feed, newest first, starting at `max_id`
    /// (0 = newest).
    async fn fetch_feed(&self, max_id: i64) -> Result<Page>;

    /// Comments mentioning the bot.
    async fn fetch_mentions(&self, page: u32) -> Result<Vec<Comment>>;

    /// Conversation list.
    async fn chat_list(&self, page: u32) -> Result<Vec<ChatSummary>>;

    /// Messages of one conversation.
    async fn chat_detail(&self, with: UserId, since_id: i64) -> Result<ChatDetail>;

    /// Point read of a single post.
    async fn post_info(&self, id: PostId) -> Result<Post>;
}

/// Write-side collaborator. Operations are as idempotent as the platform
/// allows; each returns a structured error on failure.
#[async_trait]
pub trait OutboundPort: Send + Sync {
    async fn post_status(&self, content: &str, visible: Visibility) -> Result<Post>;
    async fn repost(&self, id: PostId, content: &str) -> Result<Post>;
    async fn comment(&self, id: PostId, content: &str) -> Result<Comment>;
    async fn like(&self, id: PostId) -> Result<()>;
    async fn send_message(&self, to: UserId, content: &str) -> Result<ChatDetail>;
    async fn delete_status(&self, id: PostId) -> Result<()>;
}
