//! Lifecycle loop tying the runtime together.
//!
//! Login first: the passive credential probe runs under a timeout and is
//! retried, while the interactive code flow waits for the user as long as
//! it takes. Then ticks: every tick launches the rate-gated poll tasks
//! concurrently, joins them under one batch timeout, runs one drain pass
//! over the action queue, and starts the next tick. A tick in which
//! nothing ran backs off briefly instead of spinning; the rate gate
//! enforces per-task cadence.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;

use crate::{
    config::Config,
    dedup::{DedupStore, Namespace},
    dispatch::{EventDispatcher, Handler},
    domain::AccountId,
    errors::Error,
    model::{ChatDetail, Comment, Post, DM_TYPE_NORMAL},
    ports::{FetchPort, OutboundPort},
    queue::{ActionQueue, OutboundOp},
    rategate::RateGate,
    session::Session,
    Result,
};

/// Floor applied when a tick ran no task and executed no action, so the
/// loop parks instead of spinning while every gate is closed.
const IDLE_TICK_FLOOR: Duration = Duration::from_millis(50);

/// Lifecycle phase, for logging and sanity only; transitions are linear.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Phase {
    NotStarted,
    LoggingIn,
    Ticking,
    ShuttingDown,
}

/// Cloneable producer handle handed to user handlers. Handlers never touch
/// the queue directly; submissions are collected into it by the
/// orchestrator's own drain step.
#[derive(Clone)]
pub struct ActionSender(mpsc::UnboundedSender<OutboundOp>);

impl ActionSender {
    pub fn submit(&self, op: OutboundOp) {
        // Fails only when the orchestrator is already gone.
        let _ = self.0.send(op);
    }
}

/// Shared context for the spawned poll tasks.
struct Engine {
    cfg: Config,
    session: Arc<Session>,
    fetch: Arc<dyn FetchPort>,
    outbound: Arc<dyn OutboundPort>,
    dedup: DedupStore,
    dispatcher: EventDispatcher,
    gate: RateGate,
}

pub struct Orchestrator {
    engine: Engine,
    tx: mpsc::UnboundedSender<OutboundOp>,
    rx: mpsc::UnboundedReceiver<OutboundOp>,
}

impl Orchestrator {
    pub fn new(
        cfg: Config,
        session: Arc<Session>,
        fetch: Arc<dyn FetchPort>,
        outbound: Arc<dyn OutboundPort>,
        dedup: DedupStore,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            engine: Engine {
                cfg,
                session,
                fetch,
                outbound,
                dedup,
                dispatcher: EventDispatcher::new(),
                gate: RateGate::new(),
            },
            tx,
            rx,
        }
    }

    /// Producer handle for handlers that want to queue outbound actions.
    pub fn actions(&self) -> ActionSender {
        ActionSender(self.tx.clone())
    }

    // Plugin registration surface. Call before `run`.

    pub fn on_new_message(&mut self, priority: i32, handler: Arc<dyn Handler<ChatDetail>>) {
        self.engine.dispatcher.on_new_message(priority, handler);
    }

    pub fn on_new_post(&mut self, priority: i32, handler: Arc<dyn Handler<Post>>) {
        self.engine.dispatcher.on_new_post(priority, handler);
    }

    pub fn on_mention_comment(&mut self, priority: i32, handler: Arc<dyn Handler<Comment>>) {
        self.engine.dispatcher.on_mention_comment(priority, handler);
    }

    pub fn on_tick(&mut self, priority: i32, handler: Arc<dyn Handler<()>>) {
        self.engine.dispatcher.on_tick(priority, handler);
    }

    /// Run until `shutdown` fires. Remote-API and handler errors never end
    /// the loop; only the token (or a store failure at startup, before this
    /// point) stops the process.
    pub async fn run(self, shutdown: CancellationToken) -> Result<()> {
        let Self { engine, tx, mut rx } = self;
        drop(tx); // producers hold their own clones via `actions()`

        let engine = Arc::new(engine);
        let mut phase = Phase::NotStarted;
        transition(&mut phase, Phase::LoggingIn);

        loop {
            if shutdown.is_cancelled() {
                break;
            }
            tokio::select! {
                _ = shutdown.cancelled() => break,
                res = Self::login(&engine) => match res {
                    Ok(account) => {
                        tracing::info!(account = %account, "login complete");
                        break;
                    }
                    Err(err) => tracing::error!(error = %err, "login failed, retrying"),
                }
            }
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = sleep(Duration::from_secs(1)) => {}
            }
        }

        let mut queue = ActionQueue::new(engine.cfg.action_retry_ceiling, engine.cfg.action_pacing);

        if !shutdown.is_cancelled() {
            transition(&mut phase, Phase::Ticking);
        }
        while !shutdown.is_cancelled() {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = Self::tick(&engine, &mut queue, &mut rx) => {}
            }
        }

        transition(&mut phase, Phase::ShuttingDown);
        engine.dedup.close().await;
        tracing::info!("shut down cleanly");
        Ok(())
    }

    /// One login attempt. The timeout covers only the passive credential
    /// probe; the interactive code flow blocks until the user confirms,
    /// and only a platform-side expiry makes it issue a fresh code.
    async fn login(engine: &Engine) -> Result<AccountId> {
        match timeout(engine.cfg.login_timeout, engine.session.try_stored_login()).await {
            Ok(Ok(Some(account))) => Ok(account),
            Ok(Ok(None)) => {
                tracing::warn!("stored credentials rejected, starting interactive code login");
                engine.session.login_by_code().await
            }
            Ok(Err(err)) => Err(err),
            Err(_) => Err(Error::TransientNetwork("login probe timed out".to_string())),
        }
    }

    /// One tick: concurrent gated poll batch under one timeout, then one
    /// drain pass.
    async fn tick(engine: &Arc<Engine>, queue: &mut ActionQueue, rx: &mut mpsc::UnboundedReceiver<OutboundOp>) {
        let tasks: Vec<(&'static str, JoinHandle<Option<Result<()>>>)> = vec![
            ("feed-scan", {
                let e = engine.clone();
                tokio::spawn(async move {
                    e.gate
                        .guard("feed-scan", e.cfg.feed_interval, || e.scan_feed())
                        .await
                })
            }),
            ("mention-scan", {
                let e = engine.clone();
                tokio::spawn(async move {
                    e.gate
                        .guard("mention-scan", e.cfg.mention_interval, || e.scan_mentions())
                        .await
                })
            }),
            ("chat-scan", {
                let e = engine.clone();
                tokio::spawn(async move {
                    e.gate
                        .guard("chat-scan", e.cfg.chat_interval, || e.scan_chats())
                        .await
                })
            }),
            ("timer-tick", {
                let e = engine.clone();
                tokio::spawn(async move {
                    e.gate
                        .guard("timer-tick", e.cfg.timer_interval, || async {
                            e.dispatcher.fire_tick().await;
                            Ok(())
                        })
                        .await
                })
            }),
        ];

        let mut auth_failed = false;
        let mut any_ran = false;
        let deadline = tokio::time::Instant::now() + engine.cfg.tick_timeout;
        for (name, mut handle) in tasks {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            match timeout(remaining, &mut handle).await {
                Ok(Ok(Some(result))) => {
                    any_ran = true;
                    if let Err(err) = result {
                        if matches!(err, Error::Auth(_)) {
                            auth_failed = true;
                        }
                        tracing::warn!(task = name, error = %err, "poll task failed");
                    }
                }
                Ok(Ok(None)) => {}
                Ok(Err(join_err)) => {
                    tracing::error!(task = name, error = %join_err, "poll task panicked");
                }
                Err(_) => {
                    // The batch timeout cancels the wait, not the task: the
                    // already-issued call keeps running in the background
                    // and its outcome is logged once it settles.
                    any_ran = true;
                    tracing::warn!(task = name, "tick batch timed out waiting for task");
                    tokio::spawn(async move {
                        match handle.await {
                            Ok(Some(Err(err))) => {
                                tracing::warn!(task = name, error = %err, "straggler task failed")
                            }
                            Ok(_) => tracing::debug!(task = name, "straggler task settled"),
                            Err(join_err) => {
                                tracing::error!(task = name, error = %join_err, "straggler task panicked")
                            }
                        }
                    });
                }
            }
        }

        if auth_failed {
            tracing::warn!("auth failure during tick, re-running login");
            match Self::login(engine).await {
                Ok(account) => tracing::info!(account = %account, "re-login complete"),
                Err(err) => tracing::error!(error = %err, "re-login failed"),
            }
        }

        // Collect handler submissions, then one drain pass.
        while let Ok(op) = rx.try_recv() {
            queue.enqueue(op);
        }
        if !queue.is_empty() {
            any_ran = true;
            let e = engine.clone();
            queue
                .drain(move |op| {
                    let e = e.clone();
                    async move { e.execute(op).await }
                })
                .await;
        }

        if !any_ran {
            // Every gate was closed and nothing was queued; park briefly
            // so the loop does not spin between gate openings.
            sleep(IDLE_TICK_FLOOR).await;
        }
    }
}

fn transition(phase: &mut Phase, next: Phase) {
    tracing::debug!(from = ?phase, to = ?next, "lifecycle transition");
    *phase = next;
}

impl Engine {
    /// Feed scan: deliver unseen posts, then mark them read.
    async fn scan_feed(&self) -> Result<()> {
        self.session.ensure_valid().await?;
        let page = self.fetch.fetch_feed(0).await?;
        for post in &page.statuses {
            let Some(id) = post.post_id() else {
                tracing::warn!(raw = %post.id, "feed post without a parseable id, skipping");
                continue;
            };
            if self.dedup.is_marked(Namespace::ReadPost, id.0).await? {
                continue;
            }
            self.dispatcher.fire_new_post(post).await;
            // Marked only after every handler returned: a crash in between
            // redelivers rather than loses.
            self.dedup.mark(Namespace::ReadPost, id.0).await?;
        }
        Ok(())
    }

    /// Mention scan: same shape as the feed scan, separate namespace.
    async fn scan_mentions(&self) -> Result<()> {
        self.session.ensure_valid().await?;
        let mentions = self.fetch.fetch_mentions(1).await?;
        for comment in &mentions {
            if self.dedup.is_marked(Namespace::ReadMention, comment.id).await? {
                continue;
            }
            self.dispatcher.fire_mention_comment(comment).await;
            self.dedup.mark(Namespace::ReadMention, comment.id).await?;
        }
        Ok(())
    }

    /// Chat scan: conversations with unread messages. The unread counter is
    /// the platform's own cursor, so chats are not deduped here.
    async fn scan_chats(&self) -> Result<()> {
        self.session.ensure_valid().await?;
        let chats = self.fetch.chat_list(1).await?;
        for chat in chats {
            if chat.unread == 0 || chat.is_group() {
                continue;
            }
            let Some(peer) = chat.user.as_ref().map(|u| u.user_id()) else {
                continue;
            };
            let mut detail = match self.fetch.chat_detail(peer, 0).await {
                Ok(detail) => detail,
                Err(err @ Error::Auth(_)) => return Err(err),
                Err(Error::NotFound(reason)) => {
                    tracing::debug!(peer = %peer, reason = %reason, "conversation gone, skipping");
                    continue;
                }
                Err(err) => {
                    tracing::warn!(peer = %peer, error = %err, "failed to fetch conversation");
                    continue;
                }
            };
            // Newest-first: keep only the unread plain messages.
            detail.msgs.truncate(chat.unread as usize);
            detail.msgs.retain(|m| m.dm_type == DM_TYPE_NORMAL);
            if detail.msgs.is_empty() {
                continue;
            }
            self.dispatcher.fire_new_message(&detail).await;
        }
        Ok(())
    }

    /// Queue executor: one outbound call per action.
    async fn execute(&self, op: OutboundOp) -> Result<()> {
        self.session.ensure_valid().await?;
        match op {
            OutboundOp::Post { content, visible } => {
                self.outbound.post_status(&content, visible).await?;
            }
            OutboundOp::Repost { id, content } => {
                self.outbound.repost(id, &content).await?;
                self.dedup.mark(Namespace::Reposted, id.0).await?;
            }
            OutboundOp::Comment { id, content } => {
                self.outbound.comment(id, &content).await?;
            }
            OutboundOp::Like { id } => {
                self.outbound.like(id).await?;
            }
            OutboundOp::SendMessage { to, content } => {
                self.outbound.send_message(to, &content).await?;
            }
            OutboundOp::Delete { id } => {
                self.outbound.delete_status(id).await?;
            }
        }
        Ok(())
    }
}
