/// Core error type for the bot runtime.
///
/// Adapter crates map their platform-specific failures into this type so the
/// orchestrator can classify them consistently: only `Auth` escalates out of
/// a poll task (it triggers a re-login), everything else is absorbed and
/// logged at the component where it occurred.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Token invalid or expired. Crosses the poll-task boundary and makes
    /// the orchestrator re-run the login flow.
    #[error("auth error: {0}")]
    Auth(String),

    /// Timeout / 5xx / connection reset. Retried on the next tick or the
    /// next queue drain pass, never escalated.
    #[error("transient network error: {0}")]
    TransientNetwork(String),

    /// Resource permanently gone. Callers skip the item and mark it seen so
    /// it is not refetched forever.
    #[error("not found: {0}")]
    NotFound(String),

    #[error("config error: {0}")]
    Config(String),

    /// Durable store failure. Fatal at startup, logged afterwards.
    #[error("store error: {0}")]
    Store(#[from] sqlx::Error),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("external error: {0}")]
    External(String),
}

impl Error {
    /// Whether a failed action should stay in the queue for another drain
    /// pass (below the attempt ceiling) instead of being dropped outright.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::TransientNetwork(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
