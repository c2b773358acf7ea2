//! Priority event dispatch.
//!
//! One ordered handler registry per event category. Firing is
//! fire-and-collect: the caller awaits every handler before proceeding, in
//! strict priority-descending order (stable on ties). A failing handler is
//! logged and isolated; it never stops the remaining handlers or reaches
//! the caller.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;

use crate::{
    model::{ChatDetail, Comment, Post},
    Result,
};

/// Priority given to handlers that do not care about ordering.
pub const DEFAULT_PRIORITY: i32 = 10;

/// User-supplied callback for one event category.
#[async_trait]
pub trait Handler<T: Send + 'static>: Send + Sync {
    async fn handle(&self, payload: T) -> Result<()>;
}

struct FnHandler<F>(F);

#[async_trait]
impl<T, F, Fut> Handler<T> for FnHandler<F>
where
    T: Send + 'static,
    F: Fn(T) -> Fut + Send + Sync,
    Fut: Future<Output = Result<()>> + Send,
{
    async fn handle(&self, payload: T) -> Result<()> {
        (self.0)(payload).await
    }
}

/// Wrap an async closure as a registrable handler.
pub fn handler_fn<T, F, Fut>(f: F) -> Arc<dyn Handler<T>>
where
    T: Send + 'static,
    F: Fn(T) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    Arc::new(FnHandler(f))
}

struct Registration<T: Send + 'static> {
    priority: i32,
    handler: Arc<dyn Handler<T>>,
}

/// Ordered handler list for one category.
struct Registry<T: Send + 'static> {
    category: &'static str,
    entries: Vec<Registration<T>>,
}

impl<T: Clone + Send + 'static> Registry<T> {
    fn new(category: &'static str) -> Self {
        Self {
            category,
            entries: Vec::new(),
        }
    }

    fn register(&mut self, priority: i32, handler: Arc<dyn Handler<T>>) {
        if self
            .entries
            .iter()
            .any(|r| Arc::ptr_eq(&r.handler, &handler))
        {
            tracing::warn!(category = self.category, "handler already registered, ignoring");
            return;
        }
        self.entries.push(Registration { priority, handler });
        // Stable sort keeps registration order on equal priorities.
        self.entries.sort_by_key(|r| std::cmp::Reverse(r.priority));
    }

    async fn fire(&self, payload: &T) {
        for reg in &self.entries {
            if let Err(err) = reg.handler.handle(payload.clone()).await {
                tracing::warn!(
                    category = self.category,
                    priority = reg.priority,
                    error = %err,
                    "event handler failed"
                );
            }
        }
    }
}

/// The plugin boundary: four event categories with independent registries.
pub struct EventDispatcher {
    new_message: Registry<ChatDetail>,
    new_post: Registry<Post>,
    mention_comment: Registry<Comment>,
    timer_tick: Registry<()>,
}

impl Default for EventDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self {
            new_message: Registry::new("new-message"),
            new_post: Registry::new("new-post"),
            mention_comment: Registry::new("new-mention-comment"),
            timer_tick: Registry::new("timer-tick"),
        }
    }

    pub fn on_new_message(&mut self, priority: i32, handler: Arc<dyn Handler<ChatDetail>>) {
        self.new_message.register(priority, handler);
    }

    pub fn on_new_post(&mut self, priority: i32, handler: Arc<dyn Handler<Post>>) {
        self.new_post.register(priority, handler);
    }

    pub fn on_mention_comment(&mut self, priority: i32, handler: Arc<dyn Handler<Comment>>) {
        self.mention_comment.register(priority, handler);
    }

    pub fn on_tick(&mut self, priority: i32, handler: Arc<dyn Handler<()>>) {
        self.timer_tick.register(priority, handler);
    }

    pub async fn fire_new_message(&self, chat: &ChatDetail) {
        self.new_message.fire(chat).await;
    }

    pub async fn fire_new_post(&self, post: &Post) {
        self.new_post.fire(post).await;
    }

    pub async fn fire_mention_comment(&self, comment: &Comment) {
        self.mention_comment.fire(comment).await;
    }

    pub async fn fire_tick(&self) {
        self.timer_tick.fire(&()).await;
    }
}
