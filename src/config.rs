//! Export configuration: CLI flags and environment variables layered over an
//! optional TOML file, then validated into an [`ExportConfig`].
//!
//! Precedence is CLI/env > config file > built-in defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::Args;
use secrecy::SecretString;
use serde::Deserialize;
use serde_json::Value;
use url::Url;

use crate::elastic::client::DEFAULT_TIMEOUT_SECS;
use crate::elastic::{Credentials, ScrollSettings};
use crate::error::AppError;
use crate::pipeline::PipelineSettings;
use crate::streaming::ChunkSize;

// ─────────────────────────────────────────────────────────────────────────────
// Defaults
// ─────────────────────────────────────────────────────────────────────────────

const DEFAULT_USER: &str = "elastic";
const DEFAULT_PASSWORD: &str = "elastic";
const DEFAULT_SCHEME: &str = "https";
const DEFAULT_HOST: &str = "localhost";
const DEFAULT_PORT: u16 = 9200;
const DEFAULT_PAGE_SIZE: u32 = 100;
const DEFAULT_KEEP_ALIVE: &str = "1m";
const DEFAULT_SPLIT: usize = 1000;
const DEFAULT_OUTPUT: &str = "./";

/// Time units accepted by Elasticsearch for the scroll keep-alive.
const KEEP_ALIVE_UNITS: &[&str] = &["nanos", "micros", "ms", "s", "m", "h", "d"];

// ─────────────────────────────────────────────────────────────────────────────
// Config file (TOML)
// ─────────────────────────────────────────────────────────────────────────────

/// Contents of the optional `--config` file. Every key is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigFile {
    pub user: Option<String>,
    pub password: Option<String>,
    pub scheme: Option<String>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub index: Option<String>,
    pub size: Option<u32>,
    pub scroll: Option<String>,
    pub split: Option<usize>,
    pub limit: Option<u64>,
    pub output: Option<PathBuf>,
    /// Inline JSON search body.
    pub query: Option<String>,
    pub keep_cursor: Option<bool>,
    pub timeout_secs: Option<u64>,
}

pub fn load_config(path: &Path) -> Result<ConfigFile, AppError> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| AppError::Config(format!("cannot read config {}: {}", path.display(), e)))?;
    parse_config(&content)
        .map_err(|e| AppError::Config(format!("bad config {}: {}", path.display(), e)))
}

fn parse_config(content: &str) -> Result<ConfigFile, toml::de::Error> {
    toml::from_str(content)
}

// ─────────────────────────────────────────────────────────────────────────────
// CLI args
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Args, Clone, Debug, Default)]
pub struct ExportArgs {
    /// Path to a TOML config file
    #[arg(long, env = "ESDUMP_CONFIG")]
    pub config: Option<PathBuf>,

    /// Basic-auth username; empty disables authentication [default: elastic]
    #[arg(long, env = "ESDUMP_USER")]
    pub user: Option<String>,

    /// Basic-auth password [default: elastic]
    #[arg(long, env = "ESDUMP_PASSWORD", hide_env_values = true)]
    pub password: Option<String>,

    /// http or https [default: https]
    #[arg(long)]
    pub scheme: Option<String>,

    /// Cluster host [default: localhost]
    #[arg(long)]
    pub host: Option<String>,

    /// Cluster port [default: 9200]
    #[arg(long)]
    pub port: Option<u16>,

    /// Index name or pattern to export
    #[arg(long)]
    pub index: Option<String>,

    /// Hits per scroll page [default: 100]
    #[arg(long)]
    pub size: Option<u32>,

    /// Scroll keep-alive, e.g. 30s or 1m [default: 1m]
    #[arg(long)]
    pub scroll: Option<String>,

    /// Records per output file; 0 writes a single file [default: 1000]
    #[arg(long)]
    pub split: Option<usize>,

    /// Maximum number of records to export (unlimited when unset)
    #[arg(long)]
    pub limit: Option<u64>,

    /// Output directory [default: ./]
    #[arg(long)]
    pub output: Option<PathBuf>,

    /// JSON search body, e.g. '{"query":{"match_all":{}}}'
    #[arg(long)]
    pub query: Option<String>,

    /// Leave the scroll cursor to expire instead of releasing it
    #[arg(long)]
    pub keep_cursor: bool,

    /// Per-request HTTP timeout in seconds [default: 300]
    #[arg(long)]
    pub timeout_secs: Option<u64>,
}

// ─────────────────────────────────────────────────────────────────────────────
// ExportConfig
// ─────────────────────────────────────────────────────────────────────────────

/// Fully resolved settings for one export run.
#[derive(Debug, Clone)]
pub struct ExportConfig {
    pub base_url: Url,
    pub credentials: Credentials,
    pub index: String,
    pub page_size: u32,
    pub keep_alive: String,
    /// Records per file; 0 means a single file.
    pub split: usize,
    pub limit: Option<u64>,
    pub output_dir: PathBuf,
    pub query: Option<Value>,
    pub release_cursor: bool,
    pub timeout: Duration,
}

impl ExportConfig {
    /// Loads the config file named by `args` (if any) and merges it.
    pub fn resolve(args: &ExportArgs) -> Result<Self, AppError> {
        let file = match &args.config {
            Some(path) => load_config(path)?,
            None => ConfigFile::default(),
        };
        Self::merge(args, file)
    }

    /// Merges CLI values over file values over defaults, then validates.
    pub fn merge(args: &ExportArgs, file: ConfigFile) -> Result<Self, AppError> {
        let scheme = args
            .scheme
            .clone()
            .or(file.scheme)
            .unwrap_or_else(|| DEFAULT_SCHEME.into())
            .to_ascii_lowercase();
        let host = args
            .host
            .clone()
            .or(file.host)
            .unwrap_or_else(|| DEFAULT_HOST.into());
        let port = args.port.or(file.port).unwrap_or(DEFAULT_PORT);
        let base_url = build_base_url(&scheme, &host, port)?;

        let user = args
            .user
            .clone()
            .or(file.user)
            .unwrap_or_else(|| DEFAULT_USER.into());
        let credentials = if user.is_empty() {
            Credentials::anonymous()
        } else {
            let password = args
                .password
                .clone()
                .or(file.password)
                .unwrap_or_else(|| DEFAULT_PASSWORD.into());
            Credentials::new(user, SecretString::from(password))
        };

        let index = args
            .index
            .clone()
            .or(file.index)
            .ok_or_else(|| AppError::Config("--index is required".into()))?;
        validate_index(&index)?;

        let page_size = args.size.or(file.size).unwrap_or(DEFAULT_PAGE_SIZE);
        if page_size == 0 {
            return Err(AppError::Config("--size must be at least 1".into()));
        }

        let keep_alive = args
            .scroll
            .clone()
            .or(file.scroll)
            .unwrap_or_else(|| DEFAULT_KEEP_ALIVE.into());
        validate_keep_alive(&keep_alive)?;

        let query = match args.query.clone().or(file.query) {
            Some(raw) => Some(parse_query(&raw)?),
            None => None,
        };

        let timeout_secs = args
            .timeout_secs
            .or(file.timeout_secs)
            .unwrap_or(DEFAULT_TIMEOUT_SECS);
        if timeout_secs == 0 {
            return Err(AppError::Config("--timeout-secs must be at least 1".into()));
        }

        Ok(Self {
            base_url,
            credentials,
            index,
            page_size,
            keep_alive,
            split: args.split.or(file.split).unwrap_or(DEFAULT_SPLIT),
            limit: args.limit.or(file.limit),
            output_dir: args
                .output
                .clone()
                .or(file.output)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_OUTPUT)),
            query,
            release_cursor: !(args.keep_cursor || file.keep_cursor.unwrap_or(false)),
            timeout: Duration::from_secs(timeout_secs),
        })
    }

    pub fn chunk_size(&self) -> ChunkSize {
        ChunkSize::from_split(self.split)
    }

    /// One chunk's worth of records, or one page in single-file mode.
    pub fn relay_capacity(&self) -> usize {
        let capacity = if self.split > 0 {
            self.split
        } else {
            self.page_size as usize
        };
        capacity.max(1)
    }

    pub fn scroll_settings(&self) -> ScrollSettings {
        ScrollSettings {
            index: self.index.clone(),
            page_size: self.page_size,
            keep_alive: self.keep_alive.clone(),
        }
    }

    pub fn pipeline_settings(&self) -> PipelineSettings {
        PipelineSettings {
            output_dir: self.output_dir.clone(),
            index_name: self.index.clone(),
            chunk_size: self.chunk_size(),
            relay_capacity: self.relay_capacity(),
            limit: self.limit,
            query: self.query.clone(),
            release_cursor: self.release_cursor,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Validation
// ─────────────────────────────────────────────────────────────────────────────

fn build_base_url(scheme: &str, host: &str, port: u16) -> Result<Url, AppError> {
    if scheme != "http" && scheme != "https" {
        return Err(AppError::Config(format!(
            "--scheme must be http or https, got '{}'",
            scheme
        )));
    }
    if host.trim().is_empty() {
        return Err(AppError::Config("--host must not be empty".into()));
    }
    Url::parse(&format!("{}://{}:{}/", scheme, host, port))
        .map_err(|e| AppError::Config(format!("invalid endpoint {}://{}:{}: {}", scheme, host, port, e)))
}

/// Characters that would escape the index path segment or the output file name.
const INDEX_FORBIDDEN_CHARS: &[char] = &['/', '\\', '?', '#', '%'];

/// The index name becomes one URL path segment and the output file prefix.
fn validate_index(index: &str) -> Result<(), AppError> {
    if index.trim().is_empty() {
        return Err(AppError::Config("--index must not be empty".into()));
    }
    if index == "." || index == ".." {
        return Err(AppError::Config(format!("--index '{}' is not an index name", index)));
    }
    if index.contains(INDEX_FORBIDDEN_CHARS) || index.chars().any(char::is_whitespace) {
        return Err(AppError::Config(format!(
            "--index '{}' must not contain whitespace or any of / \\ ? # %",
            index
        )));
    }
    Ok(())
}

/// Accepts a positive integer followed by an Elasticsearch time unit.
pub fn validate_keep_alive(value: &str) -> Result<(), AppError> {
    let digits_end = value
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(value.len());
    let (amount, unit) = value.split_at(digits_end);

    let amount_ok = amount.parse::<u64>().is_ok_and(|n| n > 0);
    if !amount_ok || !KEEP_ALIVE_UNITS.contains(&unit) {
        return Err(AppError::Config(format!(
            "--scroll '{}' is not a valid time value (expected e.g. 30s, 1m, 2h)",
            value
        )));
    }
    Ok(())
}

fn parse_query(raw: &str) -> Result<Value, AppError> {
    let value: Value = serde_json::from_str(raw)
        .map_err(|e| AppError::Config(format!("--query is not valid JSON: {}", e)))?;
    if !value.is_object() {
        return Err(AppError::Config("--query must be a JSON object".into()));
    }
    Ok(value)
}
