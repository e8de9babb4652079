// src/config.rs
//! Harvester configuration: a sectioned TOML file (`[default]`, `[dev]`, `[test]`, ...)
//! read once at startup. Secrets may be given as `"ENV"` and are then taken from the
//! environment.

use std::collections::HashSet;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use serde::Deserialize;

use crate::ingest::providers::reddit::{
    is_valid_subreddit, RedditClientConfig, RedditCredentials, DEFAULT_AUTH_BASE,
};
use crate::ingest::scheduler::SchedulerCfg;
use crate::ingest::Targets;
use crate::retry::RetryPolicy;
use crate::store::postgres::PgStoreConfig;
use crate::store::validate_identifier;

pub const ENV_CONFIG_PATH: &str = "HARVESTER_CONFIG_PATH";
pub const ENV_CONFIG_SECTION: &str = "HARVESTER_CONFIG_SECTION";
pub const DEFAULT_CONFIG_PATH: &str = "config/harvester.toml";
pub const DEFAULT_SECTION: &str = "default";

fn default_query_limit() -> u32 {
    20
}
fn default_max_connections() -> u32 {
    5
}
fn default_collections() -> Vec<String> {
    vec!["posts".to_string(), "comments".to_string()]
}
fn default_index_field() -> String {
    "created".to_string()
}
fn default_run_frequency_secs() -> u64 {
    60
}
fn default_concurrency() -> usize {
    1
}
fn default_initial_delay_ms() -> u64 {
    1000
}
fn default_max_elapsed_secs() -> u64 {
    10
}
fn default_user_agent() -> String {
    concat!("reddit-harvester/", env!("CARGO_PKG_VERSION")).to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct RedditSection {
    pub username: Option<String>,
    pub password: Option<String>,
    pub app_id: Option<String>,
    pub app_secret: Option<String>,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default = "default_query_limit")]
    pub query_limit: u32,
    pub subreddits: Vec<String>,
    pub api_base: Option<String>,
    pub auth_base: Option<String>,
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    Postgres,
    Memory,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StoreSection {
    #[serde(default)]
    pub backend: StoreBackend,
    pub url: Option<String>,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    #[serde(default = "default_collections")]
    pub collections: Vec<String>,
    #[serde(default = "default_index_field")]
    pub index_field: String,
}

impl Default for StoreSection {
    fn default() -> Self {
        Self {
            backend: StoreBackend::default(),
            url: None,
            max_connections: default_max_connections(),
            collections: default_collections(),
            index_field: default_index_field(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerSection {
    #[serde(default = "default_run_frequency_secs")]
    pub run_frequency_secs: u64,
    #[serde(default = "default_concurrency")]
    pub max_concurrent_sources: usize,
}

impl Default for SchedulerSection {
    fn default() -> Self {
        Self {
            run_frequency_secs: default_run_frequency_secs(),
            max_concurrent_sources: default_concurrency(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RetrySection {
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
    #[serde(default = "default_max_elapsed_secs")]
    pub max_elapsed_secs: u64,
}

impl Default for RetrySection {
    fn default() -> Self {
        Self {
            initial_delay_ms: default_initial_delay_ms(),
            max_elapsed_secs: default_max_elapsed_secs(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MetricsSection {
    /// e.g. "127.0.0.1:9100"; no endpoint when absent.
    pub listen: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HarvesterConfig {
    pub reddit: RedditSection,
    #[serde(default)]
    pub store: StoreSection,
    #[serde(default)]
    pub scheduler: SchedulerSection,
    #[serde(default)]
    pub retry: RetrySection,
    #[serde(default)]
    pub metrics: MetricsSection,
}

impl HarvesterConfig {
    pub fn load_from(path: &Path, section: &str) -> Result<Self> {
        tracing::info!(path = %path.display(), section, "read configuration");
        let content = fs::read_to_string(path)
            .with_context(|| format!("reading config from {}", path.display()))?;
        parse_config(&content, section)
    }

    /// Path from $HARVESTER_CONFIG_PATH (else `config/harvester.toml`), section from
    /// $HARVESTER_CONFIG_SECTION (else `default`).
    pub fn load_default() -> Result<Self> {
        let path = env::var(ENV_CONFIG_PATH)
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH));
        let section = env::var(ENV_CONFIG_SECTION).unwrap_or_else(|_| DEFAULT_SECTION.into());
        Self::load_from(&path, &section)
    }

    pub fn sources(&self) -> &[String] {
        &self.reddit.subreddits
    }

    pub fn targets(&self) -> Targets {
        Targets {
            posts: self.store.collections[0].clone(),
            comments: self.store.collections[1].clone(),
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            Duration::from_millis(self.retry.initial_delay_ms),
            Duration::from_secs(self.retry.max_elapsed_secs),
        )
    }

    pub fn scheduler_cfg(&self) -> SchedulerCfg {
        SchedulerCfg::every(Duration::from_secs(self.scheduler.run_frequency_secs))
    }

    pub fn reddit_client_config(&self) -> RedditClientConfig {
        let r = &self.reddit;
        let credentials = match (&r.username, &r.password, &r.app_id, &r.app_secret) {
            (Some(username), Some(password), Some(app_id), Some(app_secret)) => {
                Some(RedditCredentials {
                    username: username.clone(),
                    password: password.clone(),
                    app_id: app_id.clone(),
                    app_secret: app_secret.clone(),
                })
            }
            _ => None,
        };
        RedditClientConfig {
            user_agent: r.user_agent.clone(),
            credentials,
            api_base: r.api_base.clone(),
            auth_base: r
                .auth_base
                .clone()
                .unwrap_or_else(|| DEFAULT_AUTH_BASE.to_string()),
            ..RedditClientConfig::default()
        }
    }

    pub fn pg_store_config(&self) -> Result<PgStoreConfig> {
        let url = self
            .store
            .url
            .clone()
            .ok_or_else(|| anyhow!("store.url is required for the postgres backend"))?;
        Ok(PgStoreConfig {
            url,
            max_connections: self.store.max_connections,
            ..PgStoreConfig::default()
        })
    }
}

/// Parse the whole file and pick one section (case-insensitive).
pub fn parse_config(s: &str, section: &str) -> Result<HarvesterConfig> {
    let table: toml::Table = toml::from_str(s).context("parsing config toml")?;
    let value = table
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(section))
        .map(|(_, v)| v.clone())
        .ok_or_else(|| anyhow!("config section `{section}` not found"))?;
    let cfg: HarvesterConfig = value
        .try_into()
        .with_context(|| format!("invalid config section `{section}`"))?;
    finalize(cfg)
}

fn finalize(mut cfg: HarvesterConfig) -> Result<HarvesterConfig> {
    let r = &mut cfg.reddit;
    r.username = resolve_secret(r.username.take(), "REDDIT_USERNAME")?;
    r.password = resolve_secret(r.password.take(), "REDDIT_PASSWORD")?;
    r.app_id = resolve_secret(r.app_id.take(), "REDDIT_APP_ID")?;
    r.app_secret = resolve_secret(r.app_secret.take(), "REDDIT_APP_SECRET")?;
    let given = [&r.username, &r.password, &r.app_id, &r.app_secret]
        .iter()
        .filter(|v| v.is_some())
        .count();
    if given != 0 && given != 4 {
        bail!("reddit credentials are incomplete: need username, password, app_id and app_secret");
    }

    r.subreddits = clean_list(std::mem::take(&mut r.subreddits));
    if r.subreddits.is_empty() {
        bail!("reddit.subreddits must list at least one subreddit");
    }
    if let Some(bad) = r.subreddits.iter().find(|s| !is_valid_subreddit(s)) {
        bail!("reddit.subreddits: `{bad}` is not a valid subreddit name");
    }
    if r.query_limit == 0 {
        bail!("reddit.query_limit must be > 0");
    }

    cfg.store.url = resolve_secret(cfg.store.url.take(), "DATABASE_URL")?;
    if cfg.store.collections.len() != 2 {
        bail!("store.collections must be exactly [posts, comments]");
    }
    for name in cfg.store.collections.iter().chain([&cfg.store.index_field]) {
        validate_identifier(name).map_err(|e| anyhow!("store: {e}"))?;
    }
    if cfg.store.backend == StoreBackend::Postgres && cfg.store.url.is_none() {
        bail!("store.url is required for the postgres backend");
    }

    if cfg.scheduler.run_frequency_secs == 0 {
        bail!("scheduler.run_frequency_secs must be > 0");
    }
    cfg.scheduler.max_concurrent_sources = cfg.scheduler.max_concurrent_sources.max(1);

    Ok(cfg)
}

/// `"ENV"` (any case) means: read from `var`. Empty strings count as unset.
fn resolve_secret(value: Option<String>, var: &str) -> Result<Option<String>> {
    match value {
        Some(v) if v.trim().eq_ignore_ascii_case("env") => env::var(var)
            .map(Some)
            .map_err(|_| anyhow!("Missing {var} env var")),
        Some(v) if v.trim().is_empty() => Ok(None),
        other => Ok(other),
    }
}

/// Trim, drop empties and repeated entries; keeps first-seen order.
fn clean_list(items: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    items
        .into_iter()
        .map(|it| it.trim().to_string())
        .filter(|it| !it.is_empty() && seen.insert(it.clone()))
        .collect()
}
