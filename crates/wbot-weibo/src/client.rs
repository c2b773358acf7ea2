//! HTTP client against the platform's mobile-web API.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use reqwest::cookie::{CookieStore, Jar};
use reqwest::{StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tokio::sync::Mutex;

use wbot_core::{
    config::CredentialSource,
    domain::{AccountId, PostId, UserId},
    errors::Error,
    model::{ChatDetail, ChatSummary, Comment, Page, Post, Visibility},
    ports::{AuthPort, CodeId, CodePollStatus, FetchPort, LoginProbe, OutboundPort},
    Result,
};

use crate::cookies;

const MOBILE_BASE: &str = "https://m.weibo.cn";
const PASSPORT_BASE: &str = "https://passport.weibo.com";

/// Platform code for an empty result set; a warning, not a failure.
const ERR_NO_DATA: i64 = 100_011;

const QR_UNUSED: i64 = 50_114_001;
const QR_SCANNED: i64 = 50_114_002;
const QR_EXPIRED: i64 = 50_114_003;

/// Adapter implementing all three core ports over m.weibo.cn.
pub struct WeiboClient {
    http: reqwest::Client,
    jar: Arc<Jar>,
    mobile_url: Url,
    passport_url: Url,
    cookie_file: Option<PathBuf>,
    /// Last anti-forgery token seen; sent as `st` + `x-xsrf-token` on
    /// privileged calls. The core's session decides when to refresh it.
    token: Mutex<String>,
}

impl WeiboClient {
    pub fn new(credentials: &CredentialSource) -> Result<Self> {
        let mobile_url = parse_url(MOBILE_BASE)?;
        let passport_url = parse_url(PASSPORT_BASE)?;

        let jar = Arc::new(Jar::default());
        let stored = cookies::load(credentials)?;
        for (name, value) in &stored {
            // The session cookies are shared across both hosts.
            jar.add_cookie_str(&format!("{name}={value}; Domain=.weibo.cn; Path=/"), &mobile_url);
            jar.add_cookie_str(
                &format!("{name}={value}; Domain=.weibo.com; Path=/"),
                &passport_url,
            );
        }

        let http = reqwest::Client::builder()
            .cookie_provider(jar.clone())
            .redirect(reqwest::redirect::Policy::limited(10))
            .build()
            .map_err(|e| Error::Config(format!("http client: {e}")))?;

        let cookie_file = match credentials {
            CredentialSource::File(path) => Some(path.clone()),
            CredentialSource::Inline(_) => None,
        };
        if !stored.is_empty() {
            tracing::info!(cookies = stored.len(), "loaded stored credentials");
        }

        Ok(Self {
            http,
            jar,
            mobile_url,
            passport_url,
            cookie_file,
            token: Mutex::new(String::new()),
        })
    }

    /// Rewrite the credential file from the live cookie jar.
    fn persist_cookies(&self) -> Result<()> {
        let Some(path) = &self.cookie_file else {
            return Ok(());
        };
        let mut merged = BTreeMap::new();
        for url in [&self.mobile_url, &self.passport_url] {
            if let Some(header) = self.jar.cookies(url) {
                if let Ok(raw) = header.to_str() {
                    merged.extend(cookies::from_header_value(raw));
                }
            }
        }
        cookies::save(path, &merged)
    }

    async fn get_json<T: DeserializeOwned>(&self, url: String, query: &[(&str, String)]) -> Result<T> {
        let resp = self
            .http
            .get(url)
            .header(reqwest::header::REFERER, MOBILE_BASE)
            .query(query)
            .send()
            .await
            .map_err(map_reqwest)?
            .error_for_status()
            .map_err(map_reqwest)?;
        resp.json().await.map_err(map_reqwest)
    }

    /// Privileged POST: `st` query param plus the anti-forgery header.
    async fn post_json<T: DeserializeOwned>(
        &self,
        url: String,
        params: &mut Vec<(&str, String)>,
    ) -> Result<T> {
        let st = self.token.lock().await.clone();
        params.push(("st", st.clone()));
        let resp = self
            .http
            .post(url)
            .header(reqwest::header::REFERER, MOBILE_BASE)
            .header("x-xsrf-token", st)
            .query(params)
            .send()
            .await
            .map_err(map_reqwest)?
            .error_for_status()
            .map_err(map_reqwest)?;
        resp.json().await.map_err(map_reqwest)
    }
}

fn parse_url(raw: &str) -> Result<Url> {
    Url::parse(raw).map_err(|e| Error::Config(format!("bad base url {raw}: {e}")))
}

fn map_reqwest(err: reqwest::Error) -> Error {
    if err.is_timeout() || err.is_connect() {
        return Error::TransientNetwork(err.to_string());
    }
    if let Some(status) = err.status() {
        if status.is_server_error() {
            return Error::TransientNetwork(err.to_string());
        }
        if status == StatusCode::NOT_FOUND {
            return Error::NotFound(err.to_string());
        }
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Error::Auth(err.to_string());
        }
    }
    Error::External(err.to_string())
}

/// Standard `{"ok": 1, "data": …}` envelope of the mobile API.
#[derive(Debug, Deserialize)]
struct Envelope<T> {
    #[serde(default)]
    ok: i64,
    data: Option<T>,
    #[serde(default)]
    msg: Option<String>,
    /// Sent as a number or a string depending on the endpoint.
    #[serde(default)]
    errno: Option<serde_json::Value>,
}

impl<T> Envelope<T> {
    fn errno_i64(&self) -> Option<i64> {
        match &self.errno {
            Some(serde_json::Value::Number(n)) => n.as_i64(),
            Some(serde_json::Value::String(s)) => s.parse().ok(),
            _ => None,
        }
    }

    fn failure(&self, what: &str) -> Error {
        Error::External(format!(
            "{what} failed: {}",
            self.msg.as_deref().unwrap_or("unknown platform error")
        ))
    }

    /// Payload required; "no data" is a missing resource.
    fn into_data(mut self, what: &str) -> Result<T> {
        match self.data.take() {
            Some(data) if self.ok == 1 => Ok(data),
            _ if self.errno_i64() == Some(ERR_NO_DATA) => Err(Error::NotFound(what.to_string())),
            _ => Err(self.failure(what)),
        }
    }
}

impl<T: Default> Envelope<T> {
    /// Payload optional; "no data" is an empty result.
    fn data_or_default(self, what: &str) -> Result<T> {
        if self.ok == 1 {
            return Ok(self.data.unwrap_or_default());
        }
        if self.errno_i64() == Some(ERR_NO_DATA) {
            return Ok(T::default());
        }
        Err(self.failure(what))
    }
}

fn ensure_ok(env: Envelope<serde_json::Value>, what: &str) -> Result<()> {
    if env.ok == 1 {
        Ok(())
    } else {
        Err(env.failure(what))
    }
}

/// Envelope of the passport (login-code) endpoints.
#[derive(Debug, Deserialize)]
struct SsoEnvelope<T> {
    #[serde(default)]
    retcode: i64,
    #[serde(default)]
    msg: String,
    data: Option<T>,
}

#[derive(Debug, Deserialize)]
struct QrIssue {
    qrid: String,
}

#[derive(Debug, Default, Deserialize)]
struct QrCheck {
    #[serde(default)]
    url: Option<String>,
}

fn code_status(retcode: i64, redirect: Option<String>) -> Result<CodePollStatus> {
    match retcode {
        QR_UNUSED => Ok(CodePollStatus::Unused),
        QR_SCANNED => Ok(CodePollStatus::Scanned),
        QR_EXPIRED => Ok(CodePollStatus::Expired),
        _ => match redirect {
            Some(redirect_url) => Ok(CodePollStatus::Confirmed { redirect_url }),
            None => Err(Error::Auth(format!(
                "login code check returned {retcode} without a redirect"
            ))),
        },
    }
}

#[derive(Debug, Deserialize)]
struct ConfigData {
    #[serde(default)]
    login: bool,
    #[serde(default)]
    st: String,
    #[serde(default)]
    uid: Option<String>,
}

#[async_trait]
impl AuthPort for WeiboClient {
    async fn check_login(&self) -> Result<LoginProbe> {
        let env: Envelope<ConfigData> =
            self.get_json(format!("{MOBILE_BASE}/api/config"), &[]).await?;
        let data = env.into_data("api/config")?;
        if !data.login {
            return Ok(LoginProbe {
                is_logged_in: false,
                token: String::new(),
                account_id: None,
            });
        }
        *self.token.lock().await = data.st.clone();
        self.persist_cookies()?;
        let account_id = data
            .uid
            .as_deref()
            .and_then(|uid| uid.parse().ok())
            .map(AccountId);
        Ok(LoginProbe {
            is_logged_in: true,
            token: data.st,
            account_id,
        })
    }

    async fn issue_code(&self) -> Result<CodeId> {
        let env: SsoEnvelope<QrIssue> = self
            .get_json(
                format!("{PASSPORT_BASE}/sso/v2/qrcode/image"),
                &[("entry", "wapsso".to_string()), ("size", "180".to_string())],
            )
            .await?;
        let issue = env
            .data
            .ok_or_else(|| Error::Auth(format!("code issue failed: {}", env.msg)))?;
        // Rendering is someone else's job; operators get the URL.
        tracing::info!(
            url = %format!("https://passport.weibo.cn/signin/qrcode/scan?qr={}", issue.qrid),
            "scan this URL with the app to log in"
        );
        Ok(CodeId(issue.qrid))
    }

    async fn poll_code(&self, code: &CodeId) -> Result<CodePollStatus> {
        let env: SsoEnvelope<QrCheck> = self
            .get_json(
                format!("{PASSPORT_BASE}/sso/v2/qrcode/check"),
                &[
                    ("entry", "wapsso".to_string()),
                    ("source", "wapsso".to_string()),
                    ("url", MOBILE_BASE.to_string()),
                    ("qrid", code.0.clone()),
                ],
            )
            .await?;
        code_status(env.retcode, env.data.and_then(|d| d.url))
    }

    async fn complete_code_login(&self, redirect_url: &str) -> Result<()> {
        self.http
            .get(redirect_url)
            .header(reqwest::header::REFERER, MOBILE_BASE)
            .send()
            .await
            .map_err(map_reqwest)?
            .error_for_status()
            .map_err(map_reqwest)?;
        self.persist_cookies()
    }
}

#[async_trait]
impl FetchPort for WeiboClient {
    async fn fetch_feed(&self, max_id: i64) -> Result<Page> {
        let env: Envelope<Page> = self
            .get_json(
                format!("{MOBILE_BASE}/feed/friends"),
                &[("max_id", max_id.to_string())],
            )
            .await?;
        env.data_or_default("feed/friends")
    }

    async fn fetch_mentions(&self, page: u32) -> Result<Vec<Comment>> {
        let env: Envelope<Vec<Comment>> = self
            .get_json(
                format!("{MOBILE_BASE}/message/mentionsCmt"),
                &[("page", page.to_string())],
            )
            .await?;
        env.data_or_default("message/mentionsCmt")
    }

    async fn chat_list(&self, page: u32) -> Result<Vec<ChatSummary>> {
        let env: Envelope<Vec<ChatSummary>> = self
            .get_json(
                format!("{MOBILE_BASE}/message/msglist"),
                &[("page", page.to_string())],
            )
            .await?;
        env.data_or_default("message/msglist")
    }

    async fn chat_detail(&self, with: UserId, since_id: i64) -> Result<ChatDetail> {
        let env: Envelope<ChatDetail> = self
            .get_json(
                format!("{MOBILE_BASE}/api/chat/list"),
                &[
                    ("count", "20".to_string()),
                    ("uid", with.to_string()),
                    ("since_id", since_id.to_string()),
                    ("is_continuous", "0".to_string()),
                ],
            )
            .await?;
        env.into_data("api/chat/list")
    }

    async fn post_info(&self, id: PostId) -> Result<Post> {
        let env: Envelope<Post> = self
            .get_json(
                format!("{MOBILE_BASE}/statuses/show"),
                &[("id", id.to_string())],
            )
            .await?;
        env.into_data("statuses/show")
    }
}

#[async_trait]
impl OutboundPort for WeiboClient {
    async fn post_status(&self, content: &str, visible: Visibility) -> Result<Post> {
        let mut params = vec![
            ("content", content.to_string()),
            ("visible", visible.as_param().to_string()),
        ];
        let env: Envelope<Post> = self
            .post_json(format!("{MOBILE_BASE}/api/statuses/update"), &mut params)
            .await?;
        env.into_data("statuses/update")
    }

    async fn repost(&self, id: PostId, content: &str) -> Result<Post> {
        let mut params = vec![
            ("id", id.to_string()),
            ("mid", id.to_string()),
            ("content", content.to_string()),
        ];
        let env: Envelope<Post> = self
            .post_json(format!("{MOBILE_BASE}/api/statuses/repost"), &mut params)
            .await?;
        env.into_data("statuses/repost")
    }

    async fn comment(&self, id: PostId, content: &str) -> Result<Comment> {
        let mut params = vec![
            ("id", id.to_string()),
            ("mid", id.to_string()),
            ("content", content.to_string()),
        ];
        let env: Envelope<Comment> = self
            .post_json(format!("{MOBILE_BASE}/api/comments/create"), &mut params)
            .await?;
        env.into_data("comments/create")
    }

    async fn like(&self, id: PostId) -> Result<()> {
        let mut params = vec![("id", id.to_string()), ("attitude", "heart".to_string())];
        let env: Envelope<serde_json::Value> = self
            .post_json(format!("{MOBILE_BASE}/api/attitudes/create"), &mut params)
            .await?;
        ensure_ok(env, "attitudes/create")
    }

    async fn send_message(&self, to: UserId, content: &str) -> Result<ChatDetail> {
        let mut params = vec![("uid", to.to_string()), ("content", content.to_string())];
        let env: Envelope<ChatDetail> = self
            .post_json(format!("{MOBILE_BASE}/api/chat/send"), &mut params)
            .await?;
        env.into_data("chat/send")
    }

    async fn delete_status(&self, id: PostId) -> Result<()> {
        let mut params = vec![("mid", id.to_string())];
        let env: Envelope<serde_json::Value> = self
            .post_json(format!("{MOBILE_BASE}/profile/delMyblog"), &mut params)
            .await?;
        ensure_ok(env, "profile/delMyblog")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn qr_retcodes_map_to_states() {
        assert_eq!(code_status(QR_UNUSED, None).unwrap(), CodePollStatus::Unused);
        assert_eq!(code_status(QR_SCANNED, None).unwrap(), CodePollStatus::Scanned);
        assert_eq!(code_status(QR_EXPIRED, None).unwrap(), CodePollStatus::Expired);
        assert_eq!(
            code_status(20_000_000, Some("https://sso".to_string())).unwrap(),
            CodePollStatus::Confirmed {
                redirect_url: "https://sso".to_string()
            }
        );
        assert!(matches!(code_status(20_000_000, None), Err(Error::Auth(_))));
    }

    #[test]
    fn envelope_no_data_is_empty_for_lists() {
        let raw = r#"{"ok": 0, "errno": "100011", "msg": "no data"}"#;
        let env: Envelope<Vec<Comment>> = serde_json::from_str(raw).unwrap();
        assert!(env.data_or_default("mentions").unwrap().is_empty());
    }

    #[test]
    fn envelope_no_data_is_not_found_for_point_reads() {
        let raw = r#"{"ok": 0, "errno": 100011}"#;
        let env: Envelope<Post> = serde_json::from_str(raw).unwrap();
        assert!(matches!(env.into_data("post"), Err(Error::NotFound(_))));
    }

    #[test]
    fn envelope_failure_carries_platform_message() {
        let raw = r#"{"ok": 0, "msg": "token expired"}"#;
        let env: Envelope<Post> = serde_json::from_str(raw).unwrap();
        match env.into_data("repost") {
            Err(Error::External(m)) => assert!(m.contains("token expired")),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn config_payload_parses() {
        let raw = r#"{"ok":1,"data":{"login":true,"st":"abcd","uid":"12345","extra":{}}}"#;
        let env: Envelope<ConfigData> = serde_json::from_str(raw).unwrap();
        let data = env.into_data("api/config").unwrap();
        assert!(data.login);
        assert_eq!(data.st, "abcd");
        assert_eq!(data.uid.as_deref(), Some("12345"));
    }
}
