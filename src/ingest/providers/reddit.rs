// src/ingest/providers/reddit.rs
//! Reddit source: newest submissions of a subreddit plus their full comment trees.
//!
//! With credentials the client uses the OAuth "script app" password grant against
//! `oauth.reddit.com`; without them it falls back to the public JSON endpoints.
//! Every HTTP call runs under the shared backoff policy.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use metrics::counter;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::ingest::source::{SourceClient, SourceError};
use crate::ingest::types::{Comment, Harvest, Post};
use crate::retry::{with_backoff, Attempt, RetryError, RetryPolicy};

pub const DEFAULT_API_BASE: &str = "https://oauth.reddit.com";
pub const PUBLIC_API_BASE: &str = "https://www.reddit.com";
pub const DEFAULT_AUTH_BASE: &str = "https://www.reddit.com";

/// Reddit refuses listings larger than this.
const MAX_LISTING_LIMIT: u32 = 100;
/// Subreddit names as Reddit allows them; anything else would reshape the request path.
const SUBREDDIT_PATTERN: &str = r"^[A-Za-z0-9_]{2,21}$";
/// Refresh the token a bit before Reddit expires it.
const TOKEN_EXPIRY_MARGIN_SECS: u64 = 60;

#[derive(Debug, Clone)]
pub struct RedditCredentials {
    pub username: String,
    pub password: String,
    pub app_id: String,
    pub app_secret: String,
}

#[derive(Debug, Clone)]
pub struct RedditClientConfig {
    pub user_agent: String,
    pub credentials: Option<RedditCredentials>,
    /// Overrides the listing host (tests, proxies).
    pub api_base: Option<String>,
    pub auth_base: String,
    pub connect_timeout: Duration,
    pub timeout: Duration,
}

impl Default for RedditClientConfig {
    fn default() -> Self {
        Self {
            user_agent: concat!("reddit-harvester/", env!("CARGO_PKG_VERSION")).to_string(),
            credentials: None,
            api_base: None,
            auth_base: DEFAULT_AUTH_BASE.to_string(),
            connect_timeout: Duration::from_secs(4),
            timeout: Duration::from_secs(15),
        }
    }
}

struct CachedToken {
    value: String,
    expires_at: Instant,
}

pub struct RedditClient {
    http: reqwest::Client,
    cfg: RedditClientConfig,
    retry: RetryPolicy,
    token: Mutex<Option<CachedToken>>,
}

/// Why one HTTP attempt failed.
#[derive(Debug)]
enum Failure {
    Http(reqwest::Error),
    Status(StatusCode),
    Decode(String),
    Auth(String),
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Failure::Http(e) => write!(f, "http: {e}"),
            Failure::Status(s) => write!(f, "status {s}"),
            Failure::Decode(e) => write!(f, "decode: {e}"),
            Failure::Auth(e) => write!(f, "auth: {e}"),
        }
    }
}

fn classify_http(e: reqwest::Error) -> Attempt<Failure> {
    if e.is_builder() || e.is_decode() {
        Attempt::Fatal(Failure::Http(e))
    } else {
        Attempt::Transient(Failure::Http(e))
    }
}

fn classify_status(status: StatusCode) -> Attempt<Failure> {
    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        Attempt::Transient(Failure::Status(status))
    } else {
        Attempt::Fatal(Failure::Status(status))
    }
}

fn lift(feed: &str, e: RetryError<Failure>) -> SourceError {
    match e {
        RetryError::Exhausted { attempts, last } => SourceError::Unavailable {
            feed: feed.to_string(),
            attempts,
            reason: last.to_string(),
        },
        RetryError::Fatal(Failure::Status(s)) => SourceError::Rejected {
            feed: feed.to_string(),
            status: s.as_u16(),
        },
        RetryError::Fatal(Failure::Auth(m)) => SourceError::Auth(m),
        RetryError::Fatal(f) => SourceError::Decode {
            feed: feed.to_string(),
            reason: f.to_string(),
        },
    }
}

#[derive(Debug, Deserialize)]
struct Listing<T> {
    data: ListingData<T>,
}

#[derive(Debug, Deserialize)]
struct ListingData<T> {
    children: Vec<Thing<T>>,
}

#[derive(Debug, Deserialize)]
struct Thing<T> {
    kind: String,
    data: T,
}

#[derive(Debug, Deserialize)]
struct SubmissionData {
    /// Short id, used in the comments URL.
    id: String,
    /// Fullname (`t3_...`), globally unique.
    name: String,
    #[serde(default)]
    title: String,
    created_utc: f64,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
    expires_in: Option<u64>,
    error: Option<String>,
}

impl RedditClient {
    pub fn new(cfg: RedditClientConfig, retry: RetryPolicy) -> Result<Self, SourceError> {
        let http = reqwest::Client::builder()
            .user_agent(cfg.user_agent.clone())
            .connect_timeout(cfg.connect_timeout)
            .timeout(cfg.timeout)
            .build()
            .map_err(|e| SourceError::Client(e.to_string()))?;
        tracing::info!(
            authenticated = cfg.credentials.is_some(),
            api_base = %Self::base_for(&cfg),
            "reddit client initialized"
        );
        Ok(Self {
            http,
            cfg,
            retry,
            token: Mutex::new(None),
        })
    }

    fn base_for(cfg: &RedditClientConfig) -> &str {
        match (&cfg.api_base, &cfg.credentials) {
            (Some(base), _) => base.as_str(),
            (None, Some(_)) => DEFAULT_API_BASE,
            (None, None) => PUBLIC_API_BASE,
        }
    }

    fn api_base(&self) -> &str {
        Self::base_for(&self.cfg).trim_end_matches('/')
    }

    /// Public endpoints need the `.json` suffix; the OAuth host does not.
    fn suffix(&self) -> &'static str {
        if self.cfg.credentials.is_some() {
            ""
        } else {
            ".json"
        }
    }

    async fn bearer(&self) -> Result<Option<String>, Attempt<Failure>> {
        let Some(creds) = &self.cfg.credentials else {
            return Ok(None);
        };

        let mut guard = self.token.lock().await;
        if let Some(tok) = guard.as_ref() {
            if tok.expires_at > Instant::now() {
                return Ok(Some(tok.value.clone()));
            }
        }

        let url = format!(
            "{}/api/v1/access_token",
            self.cfg.auth_base.trim_end_matches('/')
        );
        let resp = self
            .http
            .post(&url)
            .basic_auth(&creds.app_id, Some(&creds.app_secret))
            .form(&[
                ("grant_type", "password"),
                ("username", creds.username.as_str()),
                ("password", creds.password.as_str()),
            ])
            .send()
            .await
            .map_err(classify_http)?;

        let status = resp.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(Attempt::Fatal(Failure::Auth(format!(
                "token endpoint answered {status}"
            ))));
        }
        if !status.is_success() {
            return Err(classify_status(status));
        }

        let body: TokenResponse = resp
            .json()
            .await
            .map_err(|e| Attempt::Fatal(Failure::Decode(e.to_string())))?;
        let value = match (body.access_token, body.error) {
            (Some(t), None) => t,
            (_, Some(err)) => return Err(Attempt::Fatal(Failure::Auth(err))),
            (None, None) => {
                return Err(Attempt::Fatal(Failure::Auth(
                    "token response without access_token".into(),
                )))
            }
        };
        let ttl = body
            .expires_in
            .unwrap_or(3600)
            .saturating_sub(TOKEN_EXPIRY_MARGIN_SECS);
        *guard = Some(CachedToken {
            value: value.clone(),
            expires_at: Instant::now() + Duration::from_secs(ttl),
        });
        tracing::debug!(ttl_secs = ttl, "reddit token refreshed");
        Ok(Some(value))
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        feed: &str,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T, SourceError> {
        let url = format!("{}{}", self.api_base(), path);
        with_backoff(&self.retry, "reddit get", || async {
            let mut req = self.http.get(&url).query(query);
            if let Some(token) = self.bearer().await? {
                req = req.bearer_auth(token);
            }
            let resp = req.send().await.map_err(classify_http)?;
            let status = resp.status();
            if status == StatusCode::UNAUTHORIZED && self.cfg.credentials.is_some() {
                // Token revoked early; fetch a fresh one on the next attempt.
                *self.token.lock().await = None;
                return Err(Attempt::Transient(Failure::Status(status)));
            }
            if !status.is_success() {
                return Err(classify_status(status));
            }
            let bytes = resp.bytes().await.map_err(classify_http)?;
            serde_json::from_slice::<T>(&bytes)
                .map_err(|e| Attempt::Fatal(Failure::Decode(e.to_string())))
        })
        .await
        .map_err(|e| lift(feed, e))
    }

    async fn fetch_comments(
        &self,
        feed: &str,
        post: &SubmissionData,
    ) -> Result<Vec<Comment>, SourceError> {
        let path = format!("/comments/{}{}", post.id, self.suffix());
        let pages: Vec<Value> = self
            .get_json(feed, &path, &[("raw_json", "1".to_string())])
            .await?;
        let mut out = Vec::new();
        // [0] is the submission itself, [1] the comment forest.
        if let Some(forest) = pages.get(1) {
            collect_comments(forest, feed, &mut out);
        }
        Ok(out)
    }
}

pub fn is_valid_subreddit(name: &str) -> bool {
    static RE_SUBREDDIT: once_cell::sync::OnceCell<regex::Regex> = once_cell::sync::OnceCell::new();
    RE_SUBREDDIT
        .get_or_init(|| regex::Regex::new(SUBREDDIT_PATTERN).expect("subreddit pattern compiles"))
        .is_match(name)
}

/// Flatten a comment listing depth-first. "Load more" stubs (`kind = more`) are skipped.
fn collect_comments(listing: &Value, feed: &str, out: &mut Vec<Comment>) {
    let Some(children) = listing.pointer("/data/children").and_then(Value::as_array) else {
        return;
    };
    for child in children {
        if child.get("kind").and_then(Value::as_str) != Some("t1") {
            continue;
        }
        let data = &child["data"];
        let (Some(id), Some(created)) = (data["name"].as_str(), data["created_utc"].as_f64())
        else {
            continue;
        };
        out.push(Comment {
            id: id.to_string(),
            text: data["body"].as_str().unwrap_or_default().to_string(),
            created,
            source: feed.to_string(),
        });
        // `replies` is "" when empty, otherwise a nested listing.
        collect_comments(&data["replies"], feed, out);
    }
}

#[async_trait]
impl SourceClient for RedditClient {
    async fn fetch(&self, source: &str, limit: u32) -> Result<Harvest, SourceError> {
        if !is_valid_subreddit(source) {
            return Err(SourceError::InvalidSource(source.to_string()));
        }
        if limit == 0 {
            return Ok(Harvest::empty());
        }
        let limit = limit.min(MAX_LISTING_LIMIT);
        tracing::info!(source, limit, "retrieve newest submissions");

        let path = format!("/r/{}/new{}", source, self.suffix());
        let listing: Listing<SubmissionData> = self
            .get_json(
                source,
                &path,
                &[("limit", limit.to_string()), ("raw_json", "1".to_string())],
            )
            .await?;

        let mut harvest = Harvest::empty();
        for thing in listing.data.children {
            if thing.kind != "t3" {
                continue;
            }
            let submission = thing.data;
            match self.fetch_comments(source, &submission).await {
                Ok(comments) => harvest.comments.extend(comments),
                // Quarantined or removed threads; the post itself is still good.
                Err(SourceError::Rejected { status, .. }) => {
                    tracing::warn!(source, post = %submission.name, status, "comment tree rejected, skipping");
                    counter!("harvest_comment_trees_skipped_total").increment(1);
                }
                Err(e) => return Err(e),
            }
            harvest.posts.push(Post {
                id: submission.name,
                title: submission.title,
                created: submission.created_utc,
                source: source.to_string(),
            });
        }

        counter!("harvest_posts_fetched_total").increment(harvest.posts.len() as u64);
        counter!("harvest_comments_fetched_total").increment(harvest.comments.len() as u64);
        Ok(harvest)
    }

    fn name(&self) -> &'static str {
        "reddit"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn comment_tree_is_flattened_and_more_stubs_skipped() {
        let forest = json!({
            "kind": "Listing",
            "data": {"children": [
                {"kind": "t1", "data": {
                    "name": "t1_a", "body": "top", "created_utc": 10.0,
                    "replies": {"kind": "Listing", "data": {"children": [
                        {"kind": "t1", "data": {"name": "t1_b", "body": "reply", "created_utc": 11.5, "replies": ""}},
                        {"kind": "more", "data": {"count": 3}}
                    ]}}
                }},
                {"kind": "t1", "data": {"name": "t1_c", "body": "second", "created_utc": 12.0, "replies": ""}}
            ]}
        });
        let mut out = Vec::new();
        collect_comments(&forest, "rust", &mut out);
        let ids: Vec<&str> = out.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["t1_a", "t1_b", "t1_c"]);
        assert_eq!(out[1].created, 11.5);
        assert!(out.iter().all(|c| c.source == "rust"));
    }

    #[test]
    fn server_errors_and_throttling_are_retried() {
        assert!(matches!(
            classify_status(StatusCode::BAD_GATEWAY),
            Attempt::Transient(_)
        ));
        assert!(matches!(
            classify_status(StatusCode::TOO_MANY_REQUESTS),
            Attempt::Transient(_)
        ));
        assert!(matches!(
            classify_status(StatusCode::NOT_FOUND),
            Attempt::Fatal(_)
        ));
    }

    #[test]
    fn subreddit_names_are_checked() {
        assert!(is_valid_subreddit("rust"));
        assert!(is_valid_subreddit("AskReddit"));
        assert!(is_valid_subreddit("de"));
        assert!(!is_valid_subreddit("a"));
        assert!(!is_valid_subreddit("rust/new.json?limit=1&x="));
        assert!(!is_valid_subreddit("../comments"));
        assert!(!is_valid_subreddit("this_name_is_far_too_long"));
    }

    #[test]
    fn base_depends_on_credentials() {
        let mut cfg = RedditClientConfig::default();
        assert_eq!(RedditClient::base_for(&cfg), PUBLIC_API_BASE);
        cfg.credentials = Some(RedditCredentials {
            username: "u".into(),
            password: "p".into(),
            app_id: "id".into(),
            app_secret: "s".into(),
        });
        assert_eq!(RedditClient::base_for(&cfg), DEFAULT_API_BASE);
        cfg.api_base = Some("http://127.0.0.1:9".into());
        assert_eq!(RedditClient::base_for(&cfg), "http://127.0.0.1:9");
    }
}
