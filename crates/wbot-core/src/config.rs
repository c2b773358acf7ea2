use std::{env, path::PathBuf, time::Duration};

use crate::{errors::Error, Result};

/// Where the adapter finds its stored credentials (cookie set).
#[derive(Clone, Debug)]
pub enum CredentialSource {
    /// Credential JSON supplied directly (e.g. from a secret manager).
    Inline(String),
    /// Path to the credential file; rewritten whenever the token refreshes.
    File(PathBuf),
}

/// Typed runtime configuration.
///
/// Everything is supplied at construction; `load()` reads the environment
/// with the documented defaults and nothing else.
#[derive(Clone, Debug)]
pub struct Config {
    /// Upper bound for one whole batch of poll tasks within a tick.
    pub tick_timeout: Duration,
    /// Upper bound for one login attempt (passive or interactive).
    pub login_timeout: Duration,

    // Per-task poll cadences, enforced by the rate gate.
    pub feed_interval: Duration,
    pub mention_interval: Duration,
    pub chat_interval: Duration,
    pub timer_interval: Duration,

    /// How long a token is trusted before `ensure_valid` refreshes it.
    pub token_refresh_interval: Duration,
    /// Cadence of the interactive-login code poll.
    pub code_poll_interval: Duration,

    /// Attempts before a queued action is dropped as exhausted.
    pub action_retry_ceiling: u32,
    /// Delay inserted after each executed action to pace outbound writes.
    pub action_pacing: Duration,

    pub credentials: CredentialSource,
    /// Durable dedup store (sqlite file).
    pub store_path: PathBuf,
}

impl Config {
    pub fn load() -> Result<Self> {
        let credentials = match env_str("WBOT_COOKIES").and_then(non_empty) {
            Some(inline) => CredentialSource::Inline(inline),
            None => CredentialSource::File(
                env_path("WBOT_COOKIES_FILE")
                    .unwrap_or_else(|| PathBuf::from("wbot_cookies.json")),
            ),
        };

        let store_path = env_path("WBOT_STORE_PATH").unwrap_or_else(|| PathBuf::from("wbot.db"));

        let cfg = Self {
            tick_timeout: secs(env_u64("WBOT_TICK_TIMEOUT_SECS").unwrap_or(30)),
            login_timeout: secs(env_u64("WBOT_LOGIN_TIMEOUT_SECS").unwrap_or(10)),
            feed_interval: secs(env_u64("WBOT_FEED_INTERVAL_SECS").unwrap_or(5)),
            mention_interval: secs(env_u64("WBOT_MENTION_INTERVAL_SECS").unwrap_or(5)),
            chat_interval: secs(env_u64("WBOT_CHAT_INTERVAL_SECS").unwrap_or(5)),
            timer_interval: secs(env_u64("WBOT_TIMER_INTERVAL_SECS").unwrap_or(1)),
            token_refresh_interval: secs(env_u64("WBOT_TOKEN_REFRESH_SECS").unwrap_or(600)),
            code_poll_interval: Duration::from_millis(
                env_u64("WBOT_CODE_POLL_MS").unwrap_or(1_000),
            ),
            action_retry_ceiling: env_u64("WBOT_ACTION_RETRIES").unwrap_or(5) as u32,
            action_pacing: Duration::from_millis(env_u64("WBOT_ACTION_PACING_MS").unwrap_or(1_000)),
            credentials,
            store_path,
        };

        if cfg.action_retry_ceiling == 0 {
            return Err(Error::Config(
                "WBOT_ACTION_RETRIES must be at least 1".to_string(),
            ));
        }

        Ok(cfg)
    }
}

fn secs(n: u64) -> Duration {
    Duration::from_secs(n)
}

fn env_str(key: &str) -> Option<String> {
    env::var(key).ok()
}

fn env_path(key: &str) -> Option<PathBuf> {
    env_str(key).and_then(non_empty).map(PathBuf::from)
}

fn env_u64(key: &str) -> Option<u64> {
    env_str(key).and_then(|v| v.trim().parse::<u64>().ok())
}

fn non_empty(s: String) -> Option<String> {
    if s.trim().is_empty() {
        None
    } else {
        Some(s)
    }
}
