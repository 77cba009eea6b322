//! Layered configuration loading: environment, then a YAML file, then
//! [`Config::default`]. Secrets (`DATABASE_URL`, the health endpoint bearer
//! token) are only ever read from the environment or a `*_FILE` secret-file
//! indirection, never from a committed YAML file.

use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;

use crate::model::{Config, FileConfig};

#[derive(Debug, Error)]
pub enum ConfigLoadError {
    #[error("failed to read config file {path}: {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    ParseFile {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("failed to read secret file {path}: {source}")]
    SecretFileIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("DATABASE_URL is not set and no config file provided a database.url")]
    MissingDatabaseUrl,
}

/// Load configuration from, in increasing precedence order: defaults, an
/// optional YAML file at `path`, then environment variables.
pub fn load(path: Option<&Path>) -> Result<Config, ConfigLoadError> {
    let _ = dotenvy::dotenv();

    let file_config = match path {
        Some(path) => read_file_config(path)?,
        None => FileConfig::default(),
    };

    let mut config = Config::default();
    apply_file_config(&mut config, &file_config);
    apply_env_overrides(&mut config)?;

    if config.database.url.trim().is_empty() {
        return Err(ConfigLoadError::MissingDatabaseUrl);
    }

    Ok(config)
}

fn read_file_config(path: &Path) -> Result<FileConfig, ConfigLoadError> {
    let contents = std::fs::read_to_string(path).map_err(|source| ConfigLoadError::ReadFile {
        path: path.to_path_buf(),
        source,
    })?;
    serde_yaml::from_str(&contents).map_err(|source| ConfigLoadError::ParseFile {
        path: path.to_path_buf(),
        source,
    })
}

fn apply_file_config(config: &mut Config, file: &FileConfig) {
    if let Some(url) = &file.database.url {
        config.database.url = url.clone();
    }
    if let Some(n) = file.database.min_connections {
        config.database.min_connections = n;
    }
    if let Some(n) = file.database.max_connections {
        config.database.max_connections = n;
    }
    if let Some(secs) = file.database.acquire_timeout_secs {
        config.database.acquire_timeout = Duration::from_secs(secs);
    }
    if let Some(secs) = file.database.statement_timeout_secs {
        config.database.statement_timeout = Duration::from_secs(secs);
    }

    if let Some(secs) = file.sync.freshness_cutoff_secs {
        config.sync.freshness_cutoff_secs = secs;
    }
    if let Some(n) = file.sync.worker_count {
        config.sync.worker_count = n;
    }
    if let Some(n) = file.sync.worker_concurrency {
        config.sync.worker_concurrency = n;
    }
    if let Some(secs) = file.sync.loop_interval_secs {
        config.sync.loop_interval = Duration::from_secs(secs);
    }
    if let Some(secs) = file.sync.request_timeout_secs {
        config.sync.request_timeout = Duration::from_secs(secs);
        config.sync.relay_deadline = config.sync.request_timeout * 2;
    }
    if let Some(n) = file.sync.max_iterations {
        config.sync.max_iterations = n;
    }
    if let Some(n) = file.sync.min_limit {
        config.sync.min_limit = n;
    }

    if !file.priority_sync.relay_urls.is_empty() {
        config.priority_sync.relay_urls = file.priority_sync.relay_urls.clone();
    }

    if let Some(secs) = file.monitor.freshness_cutoff_secs {
        config.monitor.freshness_cutoff_secs = secs;
    }
    if let Some(n) = file.monitor.worker_count {
        config.monitor.worker_count = n;
    }
    if let Some(n) = file.monitor.worker_concurrency {
        config.monitor.worker_concurrency = n;
    }
    if let Some(secs) = file.monitor.loop_interval_secs {
        config.monitor.loop_interval = Duration::from_secs(secs);
    }
    if let Some(secs) = file.monitor.request_timeout_secs {
        config.monitor.request_timeout = Duration::from_secs(secs);
        config.monitor.probe_deadline = config.monitor.request_timeout * 2;
    }

    if !file.finder.directory_urls.is_empty() {
        config.finder.directory_urls = file.finder.directory_urls.clone();
    }
    if !file.finder.url_blocklist.is_empty() {
        config.finder.url_blocklist = file.finder.url_blocklist.clone();
    }
    if let Some(b) = file.finder.scan_nip11_extra_fields {
        config.finder.scan_nip11_extra_fields = b;
    }
    if let Some(secs) = file.finder.loop_interval_secs {
        config.finder.loop_interval = Duration::from_secs(secs);
    }

    if let Some(n) = file.rate_limit.events_per_sec {
        config.rate_limit.events_per_sec = n;
    }

    if let Some(addr) = &file.health.bind_address {
        config.health.bind_address = addr.clone();
    }

    if file.socks5_proxy.is_some() {
        config.socks5_proxy = file.socks5_proxy.clone();
    }

    if file.initializer.seed_file.is_some() {
        config.initializer.seed_file = file.initializer.seed_file.clone();
    }
}

fn apply_env_overrides(config: &mut Config) -> Result<(), ConfigLoadError> {
    if let Some(url) = non_empty_env("DATABASE_URL") {
        config.database.url = url;
    } else if let Some(path) = non_empty_env("DATABASE_URL_FILE") {
        if let Some(url) = read_secret_file(Path::new(&path))? {
            config.database.url = url;
        }
    }

    if let Some(token) = non_empty_env("BIGBROTR_HEALTH_BEARER_TOKEN") {
        config.health.bearer_token = Some(token);
    } else if let Some(path) = non_empty_env("BIGBROTR_HEALTH_BEARER_TOKEN_FILE") {
        if let Some(token) = read_secret_file(Path::new(&path))? {
            config.health.bearer_token = Some(token);
        }
    }

    if let Some(proxy) = non_empty_env("BIGBROTR_SOCKS5_PROXY") {
        config.socks5_proxy = Some(proxy);
    }

    if let Some(addr) = non_empty_env("BIGBROTR_HEALTH_BIND_ADDRESS") {
        config.health.bind_address = addr;
    }

    if let Some(path) = non_empty_env("BIGBROTR_SEED_FILE") {
        config.initializer.seed_file = Some(path);
    }

    Ok(())
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn read_secret_file(path: &Path) -> Result<Option<String>, ConfigLoadError> {
    let contents = std::fs::read_to_string(path).map_err(|source| ConfigLoadError::SecretFileIo {
        path: path.to_path_buf(),
        source,
    })?;
    let trimmed = contents.trim();
    Ok(if trimmed.is_empty() { None } else { Some(trimmed.to_string()) })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn env_database_url_overrides_file_config() {
        let mut dir = tempfile::NamedTempFile::new().unwrap();
        writeln!(dir, "database:\n  url: \"postgres://file-only/db\"\n").unwrap();

        std::env::set_var("DATABASE_URL", "postgres://env-wins/db");
        let config = load(Some(dir.path())).unwrap();
        assert_eq!(config.database.url, "postgres://env-wins/db");
        std::env::remove_var("DATABASE_URL");
    }

    #[test]
    fn missing_database_url_is_an_error() {
        std::env::remove_var("DATABASE_URL");
        std::env::remove_var("DATABASE_URL_FILE");
        let result = load(None);
        assert!(matches!(result, Err(ConfigLoadError::MissingDatabaseUrl)));
    }

    #[test]
    fn secret_file_indirection_is_honored() {
        let mut secret_file = tempfile::NamedTempFile::new().unwrap();
        writeln!(secret_file, "postgres://from-secret-file/db").unwrap();

        std::env::remove_var("DATABASE_URL");
        std::env::set_var("DATABASE_URL_FILE", secret_file.path());
        let config = load(None).unwrap();
        assert_eq!(config.database.url, "postgres://from-secret-file/db");
        std::env::remove_var("DATABASE_URL_FILE");
    }
}
