//! Configuration management for the Almacen server

use std::env;
use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub ipfs: IpfsConfig,
    pub upload: UploadConfig,
    pub database: DatabaseConfig,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone)]
pub struct IpfsConfig {
    /// Base URL of the IPFS node HTTP RPC API
    pub api_url: String,
    /// Timeout applied to every backend request
    pub timeout_secs: u64,
}

#[derive(Debug, Clone)]
pub struct UploadConfig {
    /// Maximum assembled object size in bytes
    pub max_object_size: u64,
    /// Directory for spooled chunks and buffered objects
    pub spool_dir: PathBuf,
    /// Age after which an incomplete chunked session is reaped
    pub session_max_age_secs: u64,
    /// Interval between reaper sweeps
    pub reap_interval_secs: u64,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 3232,
            },
            ipfs: IpfsConfig {
                api_url: "http://127.0.0.1:5001".to_string(),
                timeout_secs: 30,
            },
            upload: UploadConfig {
                max_object_size: 2000 * 1024 * 1024,
                spool_dir: PathBuf::from("./spool"),
                session_max_age_secs: 3600,
                reap_interval_secs: 300,
            },
            database: DatabaseConfig {
                url: "sqlite:./almacen.db".to_string(),
            },
        }
    }
}

impl Config {
    /// Build a configuration from environment variables, falling back to
    /// defaults for anything unset or unparsable.
    pub fn from_env() -> Self {
        let defaults = Config::default();

        Config {
            server: ServerConfig {
                host: env::var("SERVER_HOST").unwrap_or(defaults.server.host),
                port: parse_var("SERVER_PORT", defaults.server.port),
            },
            ipfs: IpfsConfig {
                api_url: env::var("IPFS_API_URL").unwrap_or(defaults.ipfs.api_url),
                timeout_secs: parse_var("IPFS_TIMEOUT_SECS", defaults.ipfs.timeout_secs),
            },
            upload: UploadConfig {
                max_object_size: parse_var("UPLOAD_MAX_SIZE_MB", 2000u64) * 1024 * 1024,
                spool_dir: env::var("UPLOAD_SPOOL_DIR")
                    .map(PathBuf::from)
                    .unwrap_or(defaults.upload.spool_dir),
                session_max_age_secs: parse_var(
                    "UPLOAD_SESSION_MAX_AGE_SECS",
                    defaults.upload.session_max_age_secs,
                ),
                reap_interval_secs: parse_var(
                    "UPLOAD_REAP_INTERVAL_SECS",
                    defaults.upload.reap_interval_secs,
                ),
            },
            database: DatabaseConfig {
                url: env::var("DATABASE_URL").unwrap_or(defaults.database.url),
            },
        }
    }
}

fn parse_var<T: std::str::FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
