/*!
common/src/lib.rs

Shared configuration types and DB helper functions for blogbrief.

This file provides:
- Config data structures (deserialized from TOML, overridden from the environment)
- An async loader that layers a default file, an override file and env vars
- Helpers to initialize and migrate the SQLite state database
*/

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

pub const DEFAULT_FEED_URL: &str = "https://blog.cloudflare.com/rss/";
pub const DEFAULT_DATABASE_PATH: &str = "data/blogbrief.db";
pub const DEFAULT_OPENAI_API_URL: &str = "https://api.openai.com/v1/chat/completions";
pub const DEFAULT_MODEL: &str = "gpt-4o-mini";
pub const DEFAULT_MESSAGE_KEY: &str = "messages";
pub const DEFAULT_INITIAL_SUMMARY_LIMIT: usize = 5;

/// Feed polling configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedConfig {
    /// RSS/Atom feed to poll
    pub url: String,
    pub timeout_seconds: u64,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_FEED_URL.to_string(),
            timeout_seconds: 20,
        }
    }
}

/// Database configuration section
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Path to the sqlite database file (e.g. "data/blogbrief.db")
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: DEFAULT_DATABASE_PATH.to_string(),
        }
    }
}

/// Article page download settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScrapingConfig {
    pub timeout_seconds: u64,
}

impl Default for ScrapingConfig {
    fn default() -> Self {
        Self { timeout_seconds: 20 }
    }
}

/// Generic chat-completion endpoint, tried before the default provider
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CustomLlmConfig {
    pub api_url: String,
    pub api_key: Option<String>,
    /// Falls back to `LlmConfig::model` when unset
    pub model: Option<String>,
    /// Name of the field carrying the role/content message list
    #[serde(default = "default_message_key")]
    pub message_key: String,
}

fn default_message_key() -> String {
    DEFAULT_MESSAGE_KEY.to_string()
}

/// LLM configuration: optional custom endpoint, then the OpenAI-compatible default
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub openai_api_key: Option<String>,
    pub openai_api_url: String,
    pub model: String,
    pub custom: Option<CustomLlmConfig>,
    pub timeout_seconds: u64,
    /// Language the summary should be written in
    pub language: String,
    /// Article text is cut to this many characters before prompting
    pub max_input_chars: usize,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            openai_api_key: None,
            openai_api_url: DEFAULT_OPENAI_API_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            custom: None,
            timeout_seconds: 30,
            language: "English".to_string(),
            max_input_chars: 6000,
        }
    }
}

/// Chat surface the webhook belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WebhookFormat {
    #[default]
    Wecom,
    Slack,
    Discord,
}

impl FromStr for WebhookFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "wecom" | "wechat" => Ok(Self::Wecom),
            "slack" => Ok(Self::Slack),
            "discord" => Ok(Self::Discord),
            other => anyhow::bail!("unknown webhook format: {}", other),
        }
    }
}

impl fmt::Display for WebhookFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Wecom => "wecom",
            Self::Slack => "slack",
            Self::Discord => "discord",
        };
        f.write_str(name)
    }
}

/// Group chat webhook configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WebhookConfig {
    pub url: Option<String>,
    pub format: WebhookFormat,
    pub timeout_seconds: u64,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            url: None,
            format: WebhookFormat::default(),
            timeout_seconds: 10,
        }
    }
}

/// Top-level application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub feed: FeedConfig,
    pub database: DatabaseConfig,
    pub scraping: ScrapingConfig,
    pub llm: LlmConfig,
    pub webhook: WebhookConfig,
    /// Number of articles summarized on the very first run; the rest are only recorded
    pub initial_summary_limit: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            feed: FeedConfig::default(),
            database: DatabaseConfig::default(),
            scraping: ScrapingConfig::default(),
            llm: LlmConfig::default(),
            webhook: WebhookConfig::default(),
            initial_summary_limit: DEFAULT_INITIAL_SUMMARY_LIMIT,
        }
    }
}

impl Config {
    /// Load configuration from a TOML file asynchronously.
    pub async fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let data = tokio::fs::read_to_string(path.as_ref())
            .await
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;
        let cfg: Config = toml::from_str(&data).context("Failed to parse TOML configuration")?;
        Ok(cfg)
    }

    /// Load configuration with an optional default file and an optional override file.
    /// If both are present, they are merged (override takes precedence). Missing keys
    /// keep their built-in defaults.
    pub async fn load_with_defaults(default_path: Option<&Path>, override_path: Option<&Path>) -> Result<Self> {
        let mut config_value = toml::Value::Table(toml::map::Map::new());

        if let Some(path) = default_path {
            if path.exists() {
                let data = tokio::fs::read_to_string(path).await
                    .with_context(|| format!("Failed to read default config: {}", path.display()))?;
                let val: toml::Value = toml::from_str(&data)
                    .context("Failed to parse default configuration")?;
                merge_toml(&mut config_value, val);
            }
        }

        if let Some(path) = override_path {
            if path.exists() {
                let data = tokio::fs::read_to_string(path).await
                    .with_context(|| format!("Failed to read override config: {}", path.display()))?;
                let val: toml::Value = toml::from_str(&data)
                    .context("Failed to parse override configuration")?;
                merge_toml(&mut config_value, val);
            }
        }

        let cfg: Config = config_value.try_into().context("Failed to parse merged configuration")?;
        Ok(cfg)
    }

    /// Override fields from environment-style variables. `lookup` is `std::env::var`
    /// in production and a map in tests. Empty values count as unset.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        if let Some(v) = var("FEED_URL").or_else(|| var("CF_BLOG_FEED")) {
            self.feed.url = v;
        }
        if let Some(v) = var("FEED_TIMEOUT_SECONDS") {
            self.feed.timeout_seconds = parse_number("FEED_TIMEOUT_SECONDS", &v)?;
        }
        if let Some(v) = var("DATABASE_PATH").or_else(|| var("CF_BLOG_DB")) {
            self.database.path = v;
        }
        if let Some(v) = var("SCRAPE_TIMEOUT_SECONDS") {
            self.scraping.timeout_seconds = parse_number("SCRAPE_TIMEOUT_SECONDS", &v)?;
        }

        if let Some(v) = var("OPENAI_API_KEY") {
            self.llm.openai_api_key = Some(v);
        }
        if let Some(v) = var("OPENAI_API_URL") {
            self.llm.openai_api_url = v;
        }
        if let Some(v) = var("OPENAI_MODEL") {
            self.llm.model = v;
        }
        if let Some(v) = var("LLM_TIMEOUT_SECONDS") {
            self.llm.timeout_seconds = parse_number("LLM_TIMEOUT_SECONDS", &v)?;
        }
        if let Some(v) = var("SUMMARY_LANGUAGE") {
            self.llm.language = v;
        }

        if let Some(url) = var("LLM_API_URL") {
            let custom = self.llm.custom.get_or_insert_with(|| CustomLlmConfig {
                api_url: String::new(),
                api_key: None,
                model: None,
                message_key: default_message_key(),
            });
            custom.api_url = url;
        }
        if let Some(custom) = self.llm.custom.as_mut() {
            if let Some(v) = var("LLM_API_KEY") {
                custom.api_key = Some(v);
            }
            if let Some(v) = var("LLM_MODEL") {
                custom.model = Some(v);
            }
            if let Some(v) = var("LLM_MESSAGE_KEY") {
                custom.message_key = v;
            }
        }

        if let Some(v) = var("WEBHOOK_URL").or_else(|| var("WECOM_WEBHOOK")) {
            self.webhook.url = Some(v);
        }
        if let Some(v) = var("WEBHOOK_FORMAT") {
            self.webhook.format = v.parse().context("Invalid WEBHOOK_FORMAT")?;
        }
        if let Some(v) = var("WEBHOOK_TIMEOUT_SECONDS") {
            self.webhook.timeout_seconds = parse_number("WEBHOOK_TIMEOUT_SECONDS", &v)?;
        }

        if let Some(v) = var("INITIAL_SUMMARY_LIMIT") {
            self.initial_summary_limit = parse_number("INITIAL_SUMMARY_LIMIT", &v)?;
        }

        Ok(())
    }
}

fn parse_number<T>(key: &str, value: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    value
        .parse::<T>()
        .with_context(|| format!("{} must be a non-negative integer, got {:?}", key, value))
}

fn merge_toml(a: &mut toml::Value, b: toml::Value) {
    match (a, b) {
        (toml::Value::Table(a_map), toml::Value::Table(b_map)) => {
            for (k, v) in b_map {
                if let Some(a_val) = a_map.get_mut(&k) {
                    merge_toml(a_val, v);
                } else {
                    a_map.insert(k, v);
                }
            }
        }
        (a_val, b_val) => *a_val = b_val,
    }
}

/// Run SQL migrations using sqlx's migration macro.
/// Migrations live in the workspace-level `migrations` directory and are embedded at build time.
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    sqlx::migrate!("../migrations")
        .run(pool)
        .await
        .context("Failed to run sqlx migrations")?;

    Ok(())
}

/// Initialize an SQLite connection pool.
///
/// Creates the parent directory if necessary and makes sure the DB file exists before
/// connecting, so filesystem problems surface with a clear message. One process polls
/// one feed, so the pool stays small.
pub async fn init_db_pool(path: &str) -> Result<SqlitePool> {
    if let Some(parent) = Path::new(path).parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await.with_context(|| {
                format!("Failed to create DB parent directory: {}", parent.display())
            })?;
        }
    }

    tokio::fs::OpenOptions::new()
        .create(true)
        .write(true)
        .open(path)
        .await
        .with_context(|| format!("Failed to create or open DB file: {}", path))?;

    let options = SqliteConnectOptions::from_str(&format!("sqlite://{}", path))?
        .create_if_missing(true)
        .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);

    let pool = SqlitePoolOptions::new()
        .max_connections(2)
        .connect_with(options)
        .await
        .with_context(|| format!("Failed to connect to sqlite database at path: {}", path))?;

    Ok(pool)
}
