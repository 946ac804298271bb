//! Process configuration.
//!
//! One explicit struct, filled from the environment and overridden by CLI
//! flags, then handed to component constructors. No global client state.

use std::time::Duration;

use ambassador_common::error::{AmbassadorError, Result};

pub const DEFAULT_ETCD_URL: &str = "http://127.0.0.1:2379";
pub const DEFAULT_DOCKER_URL: &str = "http://127.0.0.1:2375";
pub const DEFAULT_SERVICES_PATH: &str = "/services";
pub const DEFAULT_PROPERTIES_PATH: &str = "/properties/shared";
pub const DEFAULT_TTL_SECS: u64 = 30;

#[derive(Debug, Clone)]
pub struct Config {
    /// Coordination store endpoint (`ETCD_URL`).
    pub etcd_url: String,
    /// Docker Engine endpoint (`DOCKER_URL`).
    pub docker_url: String,
    /// Root under which services are advertised (`PUBLISHER_PATH`).
    pub services_path: String,
    /// Root of the shared properties injected into the wrapped command
    /// (`PROPERTIES_PATH`).
    pub properties_path: String,
    /// TTL on published entries (`PUBLISHER_TTL`, seconds).
    pub ttl: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            etcd_url: DEFAULT_ETCD_URL.to_string(),
            docker_url: DEFAULT_DOCKER_URL.to_string(),
            services_path: DEFAULT_SERVICES_PATH.to_string(),
            properties_path: DEFAULT_PROPERTIES_PATH.to_string(),
            ttl: Duration::from_secs(DEFAULT_TTL_SECS),
        }
    }
}

impl Config {
    /// Reads the environment, falling back to defaults.
    pub fn from_env() -> Result<Self> {
        let mut config = Config::default();
        if let Ok(url) = std::env::var("ETCD_URL") {
            config.etcd_url = url;
        }
        if let Ok(url) = std::env::var("DOCKER_URL") {
            config.docker_url = url;
        }
        if let Ok(path) = std::env::var("PUBLISHER_PATH") {
            config.services_path = path;
        }
        if let Ok(path) = std::env::var("PROPERTIES_PATH") {
            config.properties_path = path;
        }
        if let Ok(ttl) = std::env::var("PUBLISHER_TTL") {
            let secs = ttl.parse::<u64>().map_err(|_| {
                AmbassadorError::InvalidConfig(format!("PUBLISHER_TTL is not a number: {}", ttl))
            })?;
            config.ttl = Duration::from_secs(secs);
        }
        config.validate()?;
        Ok(config)
    }

    /// Applies CLI overrides on top.
    pub fn with_overrides(
        mut self,
        etcd: Option<String>,
        docker: Option<String>,
        services_path: Option<String>,
        properties_path: Option<String>,
        ttl_secs: Option<u64>,
    ) -> Result<Self> {
        if let Some(url) = etcd {
            self.etcd_url = url;
        }
        if let Some(url) = docker {
            self.docker_url = url;
        }
        if let Some(path) = services_path {
            self.services_path = path;
        }
        if let Some(path) = properties_path {
            self.properties_path = path;
        }
        if let Some(secs) = ttl_secs {
            self.ttl = Duration::from_secs(secs);
        }
        self.validate()?;
        Ok(self)
    }

    fn validate(&self) -> Result<()> {
        if self.ttl.is_zero() {
            return Err(AmbassadorError::InvalidConfig(
                "ttl must be at least one second".to_string(),
            ));
        }
        if self.etcd_url.is_empty() {
            return Err(AmbassadorError::InvalidConfig("etcd endpoint is empty".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.etcd_url, DEFAULT_ETCD_URL);
        assert_eq!(config.services_path, "/services");
        assert_eq!(config.properties_path, "/properties/shared");
        assert_eq!(config.ttl, Duration::from_secs(30));
    }

    #[test]
    fn test_overrides_win() {
        let config = Config::default()
            .with_overrides(
                Some("http://etcd.local:2379".to_string()),
                None,
                Some("/svc".to_string()),
                None,
                Some(60),
            )
            .unwrap();
        assert_eq!(config.etcd_url, "http://etcd.local:2379");
        assert_eq!(config.docker_url, DEFAULT_DOCKER_URL);
        assert_eq!(config.services_path, "/svc");
        assert_eq!(config.ttl, Duration::from_secs(60));
    }

    #[test]
    fn test_zero_ttl_is_rejected() {
        let result = Config::default().with_overrides(None, None, None, None, Some(0));
        assert!(result.is_err());
    }
}
