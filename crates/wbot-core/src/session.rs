//! Authenticated session lifecycle.
//!
//! Two paths into a valid session: passive reuse of stored credentials, and
//! the interactive code login (a polling state machine against the
//! platform's code endpoints). Once logged in, `ensure_valid` keeps the
//! anti-forgery token fresh on a staleness clock.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::{sleep, Instant};

use crate::{
    domain::AccountId,
    errors::Error,
    ports::{AuthPort, CodePollStatus},
    Result,
};

#[derive(Debug, Default)]
struct SessionState {
    token: Option<String>,
    account_id: Option<AccountId>,
    last_refreshed_at: Option<Instant>,
}

/// Owns the authentication state; all privileged calls go through
/// `ensure_valid` first.
pub struct Session {
    auth: Arc<dyn AuthPort>,
    refresh_interval: Duration,
    code_poll_interval: Duration,
    state: Mutex<SessionState>,
}

impl Session {
    pub fn new(
        auth: Arc<dyn AuthPort>,
        refresh_interval: Duration,
        code_poll_interval: Duration,
    ) -> Self {
        Self {
            auth,
            refresh_interval,
            code_poll_interval,
            state: Mutex::new(SessionState::default()),
        }
    }

    pub async fn account_id(&self) -> Option<AccountId> {
        self.state.lock().await.account_id
    }

    /// Return a token that is fresh enough for a privileged call,
    /// refreshing first when the staleness threshold is exceeded.
    ///
    /// The staleness decision is time-gated, not single-flight: the lock is
    /// not held across the network refresh, so two concurrent callers that
    /// both observe a stale token will both refresh. Harmless (the second
    /// refresh just rewrites the token) and kept to match the source
    /// behavior.
    pub async fn ensure_valid(&self) -> Result<String> {
        {
            let st = self.state.lock().await;
            if let (Some(token), Some(at)) = (&st.token, st.last_refreshed_at) {
                if at.elapsed() <= self.refresh_interval {
                    return Ok(token.clone());
                }
            }
        }
        self.refresh().await
    }

    async fn refresh(&self) -> Result<String> {
        let probe = self.auth.check_login().await?;
        if !probe.is_logged_in {
            let mut st = self.state.lock().await;
            st.token = None;
            return Err(Error::Auth("session expired".to_string()));
        }
        let mut st = self.state.lock().await;
        st.token = Some(probe.token.clone());
        st.account_id = probe.account_id.or(st.account_id);
        st.last_refreshed_at = Some(Instant::now());
        Ok(probe.token)
    }

    /// Passive probe against the stored credentials. `Ok(None)` means the
    /// platform no longer honors them and an interactive login is needed.
    pub async fn try_stored_login(&self) -> Result<Option<AccountId>> {
        let probe = self.auth.check_login().await?;
        if probe.is_logged_in {
            if let Some(account_id) = probe.account_id {
                let mut st = self.state.lock().await;
                st.token = Some(probe.token);
                st.account_id = Some(account_id);
                st.last_refreshed_at = Some(Instant::now());
                tracing::info!(account = %account_id, "logged in with stored credentials");
                return Ok(Some(account_id));
            }
        }
        Ok(None)
    }

    /// Log in: passive first, interactive code flow as the fallback.
    pub async fn login(&self) -> Result<AccountId> {
        if let Some(account_id) = self.try_stored_login().await? {
            return Ok(account_id);
        }
        tracing::warn!("not logged in, starting interactive code login");
        self.login_by_code().await
    }

    /// Interactive code login. Blocks for as long as the user takes to scan
    /// and confirm; only the platform expiring the code makes it re-issue.
    /// The loop ends on confirmation or a hard error, never on a clock.
    pub async fn login_by_code(&self) -> Result<AccountId> {
        let mut code = self.auth.issue_code().await?;
        loop {
            sleep(self.code_poll_interval).await;
            match self.auth.poll_code(&code).await? {
                CodePollStatus::Unused => {
                    tracing::debug!("login code not scanned yet");
                }
                CodePollStatus::Scanned => {
                    tracing::info!("code scanned, waiting for confirmation on the device");
                }
                CodePollStatus::Expired => {
                    tracing::info!("login code expired, issuing a fresh one");
                    code = self.auth.issue_code().await?;
                }
                CodePollStatus::Confirmed { redirect_url } => {
                    self.auth.complete_code_login(&redirect_url).await?;
                    let probe = self.auth.check_login().await?;
                    let account_id = match (probe.is_logged_in, probe.account_id) {
                        (true, Some(id)) => id,
                        _ => {
                            return Err(Error::Auth(
                                "code confirmed but session probe failed".to_string(),
                            ))
                        }
                    };
                    let mut st = self.state.lock().await;
                    st.token = Some(probe.token);
                    st.account_id = Some(account_id);
                    st.last_refreshed_at = Some(Instant::now());
                    tracing::info!(account = %account_id, "interactive login confirmed");
                    return Ok(account_id);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::{CodeId, LoginProbe};
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex as StdMutex;

    struct FakeAuth {
        logged_in: StdMutex<bool>,
        check_calls: AtomicUsize,
        issue_calls: AtomicUsize,
        poll_script: StdMutex<VecDeque<CodePollStatus>>,
    }

    impl FakeAuth {
        fn new(logged_in: bool, script: Vec<CodePollStatus>) -> Self {
            Self {
                logged_in: StdMutex::new(logged_in),
                check_calls: AtomicUsize::new(0),
                issue_calls: AtomicUsize::new(0),
                poll_script: StdMutex::new(script.into()),
            }
        }
    }

    #[async_trait]
    impl AuthPort for FakeAuth {
        async fn check_login(&self) -> Result<LoginProbe> {
            self.check_calls.fetch_add(1, Ordering::SeqCst);
            let logged_in = *self.logged_in.lock().unwrap();
            Ok(LoginProbe {
                is_logged_in: logged_in,
                token: format!("tok-{}", self.check_calls.load(Ordering::SeqCst)),
                account_id: logged_in.then_some(AccountId(42)),
            })
        }

        async fn issue_code(&self) -> Result<CodeId> {
            let n = self.issue_calls.fetch_add(1, Ordering::SeqCst);
            Ok(CodeId(format!("code-{n}")))
        }

        async fn poll_code(&self, _code: &CodeId) -> Result<CodePollStatus> {
            Ok(self
                .poll_script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(CodePollStatus::Unused))
        }

        async fn complete_code_login(&self, _redirect_url: &str) -> Result<()> {
            *self.logged_in.lock().unwrap() = true;
            Ok(())
        }
    }

    fn session(auth: Arc<FakeAuth>) -> Session {
        Session::new(auth, Duration::from_secs(600), Duration::from_millis(1))
    }

    #[tokio::test]
    async fn passive_login_returns_account_id() {
        let auth = Arc::new(FakeAuth::new(true, vec![]));
        let s = session(auth.clone());
        assert_eq!(s.login().await.unwrap(), AccountId(42));
        assert_eq!(s.account_id().await, Some(AccountId(42)));
    }

    #[tokio::test]
    async fn ensure_valid_refreshes_once_then_caches() {
        let auth = Arc::new(FakeAuth::new(true, vec![]));
        let s = session(auth.clone());
        let t1 = s.ensure_valid().await.unwrap();
        let t2 = s.ensure_valid().await.unwrap();
        assert_eq!(t1, t2);
        assert_eq!(auth.check_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn ensure_valid_refreshes_again_after_staleness() {
        let auth = Arc::new(FakeAuth::new(true, vec![]));
        let s = session(auth.clone());
        s.ensure_valid().await.unwrap();
        tokio::time::advance(Duration::from_secs(601)).await;
        s.ensure_valid().await.unwrap();
        assert_eq!(auth.check_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn interactive_login_walks_the_code_states() {
        let auth = Arc::new(FakeAuth::new(
            false,
            vec![
                CodePollStatus::Unused,
                CodePollStatus::Scanned,
                CodePollStatus::Confirmed {
                    redirect_url: "https://example.invalid/sso".to_string(),
                },
            ],
        ));
        let s = session(auth.clone());
        assert_eq!(s.login().await.unwrap(), AccountId(42));
        assert_eq!(auth.issue_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn expired_code_is_reissued() {
        let auth = Arc::new(FakeAuth::new(
            false,
            vec![
                CodePollStatus::Expired,
                CodePollStatus::Confirmed {
                    redirect_url: "https://example.invalid/sso".to_string(),
                },
            ],
        ));
        let s = session(auth.clone());
        assert_eq!(s.login().await.unwrap(), AccountId(42));
        assert_eq!(auth.issue_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn stale_session_surfaces_auth_error() {
        let auth = Arc::new(FakeAuth::new(false, vec![]));
        let s = session(auth);
        match s.ensure_valid().await {
            Err(Error::Auth(_)) => {}
            other => panic!("expected auth error, got {other:?}"),
        }
    }
}
