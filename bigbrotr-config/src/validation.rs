//! Configuration guard-rails: checks that catch obviously-unsafe or
//! self-contradictory settings before a service starts.

use crate::model::Config;

#[derive(Debug, thiserror::Error)]
pub enum ConfigGuardRailError {
    #[error("database.min_connections ({min}) must not exceed database.max_connections ({max})")]
    PoolSizeInverted { min: u32, max: u32 },

    #[error("database.max_connections must be at least 1")]
    PoolSizeZero,

    #[error("health.bind_address {0} is not loopback and no bearer token is configured")]
    HealthEndpointExposedWithoutAuth(String),

    #[error("finder.directory_urls entry {0} is not a valid http(s) URL")]
    InvalidDirectoryUrl(String),
}

/// Non-fatal observations worth surfacing at startup but that don't block
/// it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigWarning(pub String);

pub fn validate(config: &Config) -> Result<Vec<ConfigWarning>, ConfigGuardRailError> {
    let mut warnings = Vec::new();

    if config.database.max_connections == 0 {
        return Err(ConfigGuardRailError::PoolSizeZero);
    }
    if config.database.min_connections > config.database.max_connections {
        return Err(ConfigGuardRailError::PoolSizeInverted {
            min: config.database.min_connections,
            max: config.database.max_connections,
        });
    }

    if !is_loopback_bind_address(&config.health.bind_address) && config.health.bearer_token.is_none() {
        return Err(ConfigGuardRailError::HealthEndpointExposedWithoutAuth(
            config.health.bind_address.clone(),
        ));
    }

    for directory_url in &config.finder.directory_urls {
        match url::Url::parse(directory_url) {
            Ok(url) if url.scheme() == "http" || url.scheme() == "https" => {}
            _ => return Err(ConfigGuardRailError::InvalidDirectoryUrl(directory_url.clone())),
        }
    }

    if config.sync.worker_concurrency > 100 {
        warnings.push(ConfigWarning(format!(
            "sync.worker_concurrency = {} is unusually high; this multiplies against worker_count for total in-flight relay tasks",
            config.sync.worker_concurrency
        )));
    }

    if config.rate_limit.events_per_sec == 0 {
        warnings.push(ConfigWarning(
            "rate_limit.events_per_sec = 0 will stall every relay task indefinitely".to_string(),
        ));
    }

    Ok(warnings)
}

fn is_loopback_bind_address(addr: &str) -> bool {
    addr.split(':')
        .next()
        .map(|host| host == "127.0.0.1" || host == "localhost" || host == "::1")
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> Config {
        Config::default()
    }

    #[test]
    fn default_config_passes_validation() {
        let mut config = base_config();
        config.database.url = "postgres://localhost/bigbrotr".to_string();
        assert!(validate(&config).unwrap().is_empty());
    }

    #[test]
    fn inverted_pool_bounds_are_rejected() {
        let mut config = base_config();
        config.database.min_connections = 10;
        config.database.max_connections = 5;
        assert!(matches!(
            validate(&config),
            Err(ConfigGuardRailError::PoolSizeInverted { min: 10, max: 5 })
        ));
    }

    #[test]
    fn exposed_health_endpoint_without_token_is_rejected() {
        let mut config = base_config();
        config.health.bind_address = "0.0.0.0:8080".to_string();
        config.health.bearer_token = None;
        assert!(matches!(
            validate(&config),
            Err(ConfigGuardRailError::HealthEndpointExposedWithoutAuth(_))
        ));
    }

    #[test]
    fn exposed_health_endpoint_with_token_is_accepted() {
        let mut config = base_config();
        config.health.bind_address = "0.0.0.0:8080".to_string();
        config.health.bearer_token = Some("secret".to_string());
        assert!(validate(&config).is_ok());
    }

    #[test]
    fn non_http_directory_url_is_rejected() {
        let mut config = base_config();
        config.finder.directory_urls.push("ftp://directory.example.com".to_string());
        assert!(matches!(validate(&config), Err(ConfigGuardRailError::InvalidDirectoryUrl(_))));
    }
}
