//! CLI arguments, share definitions and the immutable configuration snapshot.

use clap::Parser;
use serde::{Deserialize, Serialize};
use shadow_rs::formatcp;
use std::collections::HashSet;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use crate::build;

const VERSION_INFO: &str = formatcp!(
    r#"{}\ncommit_hash: {}\nbuild_time: {}\nbuild_env: {},{}"#,
    build::PKG_VERSION,
    build::SHORT_COMMIT,
    build::BUILD_TIME,
    build::RUST_VERSION,
    build::RUST_CHANNEL
);

pub const DEFAULT_DAV_PORT: u16 = 8080;
pub const DEFAULT_FRONTEND_PORT: u16 = 8081;
pub const DEFAULT_WORKERS: usize = 8;
pub const DEFAULT_QUEUE_CAPACITY: usize = 256;
pub const DEFAULT_MAX_CONNECTIONS: usize = 50;
pub const DEFAULT_CACHE_MAX_ENTRIES: usize = 100;
pub const DEFAULT_CACHE_MAX_BYTES: u64 = 64 * 1024 * 1024;
pub const DEFAULT_CACHE_TTL_SECS: u64 = 3600;
pub const DEFAULT_CONNECTION_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_LOCK_WAIT_TIMEOUT_SECS: u64 = 5;
pub const SHUTDOWN_GRACE_SECS: u64 = 10;

/// CLI arguments and environment configuration for the server.
#[derive(Parser, Debug, Clone)]
#[command(name = "nas-dav", version = VERSION_INFO, about = "NAS WebDAV and frontend server")]
pub struct Args {
    #[arg(
        short = 'b',
        long,
        env = "NAS_BIND",
        default_value = "0.0.0.0",
        help = "Bind address for both listeners"
    )]
    pub host: String,
    #[arg(
        short = 'p',
        long,
        env = "NAS_DAV_PORT",
        default_value_t = DEFAULT_DAV_PORT,
        help = "WebDAV port"
    )]
    pub port: u16,
    #[arg(
        short = 'f',
        long,
        env = "NAS_FRONTEND_PORT",
        default_value_t = DEFAULT_FRONTEND_PORT,
        help = "Static frontend/API port"
    )]
    pub frontend_port: u16,
    #[arg(
        short = 's',
        long,
        env = "NAS_SHARES_FILE",
        help = "JSON file describing the exported shares"
    )]
    pub shares_file: Option<PathBuf>,
    #[arg(
        long,
        env = "NAS_FRONTEND_PATH",
        default_value = "./dist",
        help = "Directory holding the built frontend"
    )]
    pub frontend_path: PathBuf,
    #[arg(long, env = "NAS_API_PREFIX", default_value = "/api", help = "API path prefix")]
    pub api_prefix: String,
    #[arg(
        short = 'w',
        long,
        env = "NAS_WORKERS",
        default_value_t = DEFAULT_WORKERS,
        help = "Number of request workers"
    )]
    pub workers: usize,
    #[arg(
        long,
        env = "NAS_QUEUE_CAPACITY",
        default_value_t = DEFAULT_QUEUE_CAPACITY,
        help = "Pending connection queue capacity"
    )]
    pub queue_capacity: usize,
    #[arg(
        long,
        env = "NAS_MAX_CONNECTIONS",
        default_value_t = DEFAULT_MAX_CONNECTIONS,
        help = "Max concurrent connections"
    )]
    pub max_connections: usize,
    #[arg(long, env = "NAS_ALLOW_ANONYMOUS", help = "Allow anonymous access")]
    pub allow_anonymous: bool,
    #[arg(long, env = "NAS_READ_ONLY", help = "Refuse writes on every share")]
    pub read_only: bool,
    #[arg(long, env = "NAS_NO_CACHE", help = "Disable the file content cache")]
    pub no_cache: bool,
    #[arg(
        long,
        env = "NAS_CACHE_MAX_ENTRIES",
        default_value_t = DEFAULT_CACHE_MAX_ENTRIES,
        help = "Max cached files"
    )]
    pub cache_max_entries: usize,
    #[arg(
        long,
        env = "NAS_CACHE_MAX_BYTES",
        default_value_t = DEFAULT_CACHE_MAX_BYTES,
        help = "Max cached bytes"
    )]
    pub cache_max_bytes: u64,
    #[arg(
        long,
        env = "NAS_CACHE_TTL_SECS",
        default_value_t = DEFAULT_CACHE_TTL_SECS,
        help = "Cache-Control max-age for static assets"
    )]
    pub cache_ttl_secs: u64,
    #[arg(
        long,
        env = "NAS_CONNECTION_TIMEOUT_SECS",
        default_value_t = DEFAULT_CONNECTION_TIMEOUT_SECS,
        help = "Per-connection read/write deadline in seconds"
    )]
    pub connection_timeout_secs: u64,
}

/// An exported directory reachable under `/<alias>`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Share {
    pub alias: String,
    pub real_path: PathBuf,
    pub read_only: bool,
    pub auth_required: bool,
}

impl Share {
    pub fn new(alias: impl Into<String>, real_path: impl Into<PathBuf>) -> Self {
        Self {
            alias: alias.into(),
            real_path: real_path.into(),
            read_only: false,
            auth_required: true,
        }
    }

    pub fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }
}

/// Immutable configuration snapshot. A reload builds a new one.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub allow_anonymous: bool,
    pub read_only_global: bool,
    pub max_connections: usize,
    pub shares: Vec<Share>,
    pub frontend_path: PathBuf,
    pub api_prefix: String,
    pub cache_enabled: bool,
    pub cache_max_entries: usize,
    pub cache_max_bytes: u64,
    pub cache_ttl: Duration,
    pub connection_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_DAV_PORT,
            allow_anonymous: false,
            read_only_global: false,
            max_connections: DEFAULT_MAX_CONNECTIONS,
            shares: Vec::new(),
            frontend_path: PathBuf::from("./dist"),
            api_prefix: "/api".into(),
            cache_enabled: true,
            cache_max_entries: DEFAULT_CACHE_MAX_ENTRIES,
            cache_max_bytes: DEFAULT_CACHE_MAX_BYTES,
            cache_ttl: Duration::from_secs(DEFAULT_CACHE_TTL_SECS),
            connection_timeout: Duration::from_secs(DEFAULT_CONNECTION_TIMEOUT_SECS),
        }
    }
}

impl ServerConfig {
    /// Builds the startup snapshot from CLI arguments and the optional share file.
    pub fn from_args(args: &Args) -> Result<Self, ConfigError> {
        let config = Self {
            port: args.port,
            allow_anonymous: args.allow_anonymous,
            read_only_global: args.read_only,
            max_connections: args.max_connections,
            shares: Vec::new(),
            frontend_path: args.frontend_path.clone(),
            api_prefix: normalize_prefix(&args.api_prefix),
            cache_enabled: !args.no_cache,
            cache_max_entries: args.cache_max_entries,
            cache_max_bytes: args.cache_max_bytes,
            cache_ttl: Duration::from_secs(args.cache_ttl_secs),
            connection_timeout: Duration::from_secs(args.connection_timeout_secs.max(1)),
        };
        match args.shares_file.as_deref() {
            Some(path) => config.reload_from(path),
            None => Ok(config),
        }
    }

    /// Returns a copy with the share file applied on top of this snapshot.
    pub fn reload_from(&self, path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read(path).map_err(ConfigError::Io)?;
        let file: ShareFile = serde_json::from_slice(&content).map_err(ConfigError::Parse)?;
        let mut next = self.clone();
        if let Some(port) = file.port {
            next.port = port;
        }
        if let Some(allow_anonymous) = file.allow_anonymous {
            next.allow_anonymous = allow_anonymous;
        }
        if let Some(read_only) = file.read_only {
            next.read_only_global = read_only;
        }
        if let Some(max_connections) = file.max_connections {
            next.max_connections = max_connections;
        }
        let shares = file
            .shares
            .into_iter()
            .map(|entry| {
                let share = Share {
                    auth_required: entry.auth_required,
                    ..Share::new(entry.alias, entry.path)
                };
                if entry.read_only { share.read_only() } else { share }
            })
            .collect();
        next.with_shares(shares)
    }

    /// Replaces the share list after validating aliases and paths.
    pub fn with_shares(mut self, shares: Vec<Share>) -> Result<Self, ConfigError> {
        validate_shares(&shares)?;
        self.shares = shares;
        Ok(self)
    }

    pub fn share(&self, alias: &str) -> Option<&Share> {
        self.shares.iter().find(|share| share.alias == alias)
    }

    /// Whether writes to `share` are refused by either the global or the share flag.
    pub fn is_read_only(&self, share: &Share) -> bool {
        self.read_only_global || share.read_only
    }
}

fn validate_shares(shares: &[Share]) -> Result<(), ConfigError> {
    let mut seen = HashSet::new();
    for share in shares {
        let alias = share.alias.as_str();
        if alias.is_empty() || alias.contains(['/', '\\']) || alias == "." || alias == ".." {
            return Err(ConfigError::InvalidShare(format!("invalid alias {alias:?}")));
        }
        if !seen.insert(alias) {
            return Err(ConfigError::InvalidShare(format!("duplicate alias {alias:?}")));
        }
        if !share.real_path.is_absolute() {
            return Err(ConfigError::InvalidShare(format!(
                "share {alias:?} path must be absolute"
            )));
        }
    }
    Ok(())
}

fn normalize_prefix(prefix: &str) -> String {
    let trimmed = prefix.trim().trim_end_matches('/');
    if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{trimmed}")
    }
}

fn default_auth_required() -> bool {
    true
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ShareFile {
    port: Option<u16>,
    allow_anonymous: Option<bool>,
    read_only: Option<bool>,
    max_connections: Option<usize>,
    #[serde(default)]
    shares: Vec<ShareEntry>,
}

#[derive(Deserialize)]
struct ShareEntry {
    alias: String,
    path: PathBuf,
    #[serde(default)]
    read_only: bool,
    #[serde(default = "default_auth_required")]
    auth_required: bool,
}

#[derive(Debug)]
pub enum ConfigError {
    Io(io::Error),
    Parse(serde_json::Error),
    InvalidShare(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Io(err) => write!(f, "cannot read share file: {err}"),
            ConfigError::Parse(err) => write!(f, "invalid share file: {err}"),
            ConfigError::InvalidShare(msg) => f.write_str(msg),
        }
    }
}

impl std::error::Error for ConfigError {}

/// Holds the current snapshot; readers clone the `Arc`, writers swap it.
#[derive(Debug)]
pub struct ConfigStore {
    current: RwLock<Arc<ServerConfig>>,
}

impl ConfigStore {
    pub fn new(config: ServerConfig) -> Self {
        Self {
            current: RwLock::new(Arc::new(config)),
        }
    }

    pub fn get(&self) -> Arc<ServerConfig> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Publishes a new snapshot; requests already holding the old one keep it.
    pub fn replace(&self, config: ServerConfig) {
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(config);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn rejects_duplicate_and_slashed_aliases() {
        let root = std::env::temp_dir();
        let duplicate = vec![Share::new("docs", &root), Share::new("docs", &root)];
        assert!(matches!(
            ServerConfig::default().with_shares(duplicate),
            Err(ConfigError::InvalidShare(_))
        ));
        let slashed = vec![Share::new("a/b", &root)];
        assert!(ServerConfig::default().with_shares(slashed).is_err());
        let relative = vec![Share::new("docs", "relative/dir")];
        assert!(ServerConfig::default().with_shares(relative).is_err());
    }

    #[test]
    fn share_file_overrides_snapshot() {
        let temp = tempdir().expect("tempdir");
        let share_dir = temp.path().join("backup");
        let file = temp.path().join("shares.json");
        let json = serde_json::json!({
            "port": 9000,
            "readOnly": true,
            "shares": [
                { "alias": "backup", "path": share_dir, "read_only": true },
                { "alias": "media", "path": temp.path(), "auth_required": false }
            ]
        });
        std::fs::write(&file, json.to_string()).expect("write share file");

        let config = ServerConfig::default().reload_from(&file).expect("load");
        assert_eq!(config.port, 9000);
        assert!(config.read_only_global);
        assert_eq!(config.shares.len(), 2);
        assert!(config.share("backup").expect("backup").read_only);
        assert!(config.share("backup").expect("backup").auth_required);
        assert!(!config.share("media").expect("media").auth_required);
    }

    #[test]
    fn store_swaps_snapshots_without_touching_readers() {
        let store = ConfigStore::new(ServerConfig::default());
        let before = store.get();
        let next = ServerConfig {
            port: 1234,
            ..ServerConfig::default()
        };
        store.replace(next);
        assert_eq!(before.port, DEFAULT_DAV_PORT);
        assert_eq!(store.get().port, 1234);
    }

    #[test]
    fn api_prefix_is_normalized() {
        assert_eq!(normalize_prefix("api/"), "/api");
        assert_eq!(normalize_prefix("/v1/api"), "/v1/api");
    }
}
