//! Configuration model: a raw file-shaped struct (`FileConfig`) separate
//! from the resolved runtime `Config`, so optional fields in the file
//! format don't leak into the defaults every other layer relies on.

use std::time::Duration;

use serde::{Deserialize, Serialize};

fn default_worker_count() -> usize {
    std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1)
}

/// Raw YAML shape. Every field optional; absent fields fall back to
/// environment variables, then to [`Config::defaults`].
#[derive(Debug, Default, Clone, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct FileConfig {
    #[serde(default)]
    pub database: FileDatabaseConfig,
    #[serde(default)]
    pub sync: FileSyncConfig,
    #[serde(default)]
    pub priority_sync: FilePrioritySyncConfig,
    #[serde(default)]
    pub monitor: FileMonitorConfig,
    #[serde(default)]
    pub finder: FileFinderConfig,
    #[serde(default)]
    pub rate_limit: FileRateLimitConfig,
    #[serde(default)]
    pub health: FileHealthConfig,
    #[serde(default)]
    pub initializer: FileInitializerConfig,
    #[serde(default)]
    pub socks5_proxy: Option<String>,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct FileDatabaseConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url_file: Option<String>,
    pub min_connections: Option<u32>,
    pub max_connections: Option<u32>,
    pub acquire_timeout_secs: Option<u64>,
    pub statement_timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct FileSyncConfig {
    pub freshness_cutoff_secs: Option<i64>,
    pub worker_count: Option<usize>,
    pub worker_concurrency: Option<usize>,
    pub loop_interval_secs: Option<u64>,
    pub request_timeout_secs: Option<u64>,
    pub max_iterations: Option<u32>,
    pub min_limit: Option<u32>,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct FilePrioritySyncConfig {
    #[serde(default)]
    pub relay_urls: Vec<String>,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct FileMonitorConfig {
    pub freshness_cutoff_secs: Option<i64>,
    pub worker_count: Option<usize>,
    pub worker_concurrency: Option<usize>,
    pub loop_interval_secs: Option<u64>,
    pub request_timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct FileFinderConfig {
    #[serde(default)]
    pub directory_urls: Vec<String>,
    #[serde(default)]
    pub url_blocklist: Vec<String>,
    pub scan_nip11_extra_fields: Option<bool>,
    pub loop_interval_secs: Option<u64>,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct FileRateLimitConfig {
    pub events_per_sec: Option<u32>,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct FileHealthConfig {
    pub bind_address: Option<String>,
    pub bearer_token_file: Option<String>,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct FileInitializerConfig {
    /// Path to a newline-delimited file of seed relay URLs, applied once at
    /// startup.
    pub seed_file: Option<String>,
}

/// The resolved, fully-defaulted runtime configuration. Every `Duration`
/// here is already converted from the file/env's plain-second integers.
#[derive(Debug, Clone)]
pub struct Config {
    pub database: DatabaseConfig,
    pub sync: SyncServiceConfig,
    pub priority_sync: PrioritySyncConfig,
    pub monitor: MonitorServiceConfig,
    pub finder: FinderServiceConfig,
    pub rate_limit: RateLimitConfig,
    pub health: HealthConfig,
    pub initializer: InitializerConfig,
    pub socks5_proxy: Option<String>,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub min_connections: u32,
    pub max_connections: u32,
    pub acquire_timeout: Duration,
    pub statement_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct SyncServiceConfig {
    pub freshness_cutoff_secs: i64,
    pub worker_count: usize,
    pub worker_concurrency: usize,
    pub loop_interval: Duration,
    pub request_timeout: Duration,
    pub relay_deadline: Duration,
    pub max_iterations: u32,
    pub min_limit: u32,
}

#[derive(Debug, Clone)]
pub struct PrioritySyncConfig {
    pub relay_urls: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct MonitorServiceConfig {
    pub freshness_cutoff_secs: i64,
    pub worker_count: usize,
    pub worker_concurrency: usize,
    pub loop_interval: Duration,
    pub request_timeout: Duration,
    pub probe_deadline: Duration,
}

#[derive(Debug, Clone)]
pub struct FinderServiceConfig {
    pub directory_urls: Vec<String>,
    pub url_blocklist: Vec<String>,
    pub scan_nip11_extra_fields: bool,
    pub loop_interval: Duration,
}

#[derive(Debug, Clone, Copy)]
pub struct RateLimitConfig {
    pub events_per_sec: u32,
}

#[derive(Debug, Clone)]
pub struct HealthConfig {
    pub bind_address: String,
    pub bearer_token: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct InitializerConfig {
    pub seed_file: Option<String>,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            min_connections: 2,
            max_connections: 5,
            acquire_timeout: Duration::from_secs(30),
            statement_timeout: Duration::from_secs(60),
        }
    }
}

impl Default for SyncServiceConfig {
    fn default() -> Self {
        let request_timeout = Duration::from_secs(20);
        Self {
            freshness_cutoff_secs: 12 * 3600,
            worker_count: default_worker_count(),
            worker_concurrency: 10,
            loop_interval: Duration::from_secs(15 * 60),
            request_timeout,
            relay_deadline: request_timeout * 2,
            max_iterations: 200,
            min_limit: 10,
        }
    }
}

impl Default for PrioritySyncConfig {
    fn default() -> Self {
        Self { relay_urls: Vec::new() }
    }
}

impl Default for MonitorServiceConfig {
    fn default() -> Self {
        let request_timeout = Duration::from_secs(20);
        Self {
            freshness_cutoff_secs: 12 * 3600,
            worker_count: default_worker_count(),
            worker_concurrency: 10,
            loop_interval: Duration::from_secs(15 * 60),
            request_timeout,
            probe_deadline: request_timeout * 2,
        }
    }
}

impl Default for FinderServiceConfig {
    fn default() -> Self {
        Self {
            directory_urls: Vec::new(),
            url_blocklist: Vec::new(),
            scan_nip11_extra_fields: false,
            loop_interval: Duration::from_secs(15 * 60),
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self { events_per_sec: 1000 }
    }
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1:8080".to_string(),
            bearer_token: None,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database: DatabaseConfig::default(),
            sync: SyncServiceConfig::default(),
            priority_sync: PrioritySyncConfig::default(),
            monitor: MonitorServiceConfig::default(),
            finder: FinderServiceConfig::default(),
            rate_limit: RateLimitConfig::default(),
            health: HealthConfig::default(),
            initializer: InitializerConfig::default(),
            socks5_proxy: None,
        }
    }
}
