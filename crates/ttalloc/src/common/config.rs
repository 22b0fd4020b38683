use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Deserializer};

use crate::Set;

/// Interval between heartbeats while an allocation waits in a queue.
pub const DEFAULT_KEEPALIVE_PERIOD: Duration = Duration::from_secs(4);
/// Interval between heartbeats while a granted allocation is being held.
pub const DEFAULT_HOLD_PERIOD: Duration = Duration::from_secs(2);
/// Maximum number of waiters displayed per target.
pub const DEFAULT_MAX_WAITERS: usize = 30;
/// Upper bound of concurrently running fan-out tasks.
pub const DEFAULT_MAX_WORKERS: usize = 16;
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);
pub const DEFAULT_API_PREFIX: &str = "ttb-v2/";

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClientConfig {
    #[serde(default = "default_keepalive_period", deserialize_with = "parse_duration")]
    pub keepalive_period: Duration,
    #[serde(default = "default_hold_period", deserialize_with = "parse_duration")]
    pub hold_period: Duration,
    #[serde(default = "default_max_waiters")]
    pub max_waiters: usize,
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,
    #[serde(default = "default_request_timeout", deserialize_with = "parse_duration")]
    pub request_timeout: Duration,
    #[serde(default = "default_api_prefix")]
    pub api_prefix: String,
    #[serde(default, rename = "broker")]
    pub brokers: Vec<BrokerConfig>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BrokerConfig {
    pub url: String,
    /// Short name of the broker, used to qualify allocation and target ids.
    #[serde(default)]
    pub aka: Option<String>,
    /// Skip TLS certificate verification.
    #[serde(default)]
    pub ssl_ignore: bool,
    /// Identity the broker knows us as; resolves the `self` user filter.
    #[serde(default)]
    pub username: Option<String>,
}

impl BrokerConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            aka: None,
            ssl_ignore: false,
            username: None,
        }
    }

    pub fn parsed_url(&self) -> anyhow::Result<reqwest::Url> {
        let url = reqwest::Url::parse(&self.url)
            .with_context(|| format!("{}: malformed URL?", self.url))?;
        if !url.has_host() || url.scheme().is_empty() {
            anyhow::bail!("{}: malformed URL?", self.url);
        }
        Ok(url)
    }

    /// Alias of the broker; the first label of the URL host unless configured.
    pub fn alias(&self) -> anyhow::Result<String> {
        if let Some(aka) = &self.aka {
            return Ok(aka.clone());
        }
        let url = self.parsed_url()?;
        let host = url
            .host_str()
            .ok_or_else(|| anyhow::anyhow!("{}: URL has no host", self.url))?;
        Ok(host.split('.').next().unwrap_or(host).to_string())
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            keepalive_period: DEFAULT_KEEPALIVE_PERIOD,
            hold_period: DEFAULT_HOLD_PERIOD,
            max_waiters: DEFAULT_MAX_WAITERS,
            max_workers: DEFAULT_MAX_WORKERS,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            api_prefix: DEFAULT_API_PREFIX.to_string(),
            brokers: Vec::new(),
        }
    }
}

impl ClientConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Cannot read configuration file {}", path.display()))?;
        Self::from_toml(&text)
            .with_context(|| format!("Invalid configuration file {}", path.display()))
    }

    pub fn from_toml(text: &str) -> anyhow::Result<Self> {
        let mut config: ClientConfig = toml::from_str(text)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.max_workers == 0 {
            anyhow::bail!("max_workers must be at least 1");
        }
        if self.brokers.is_empty() {
            log::warn!("No servers configured");
        }
        let mut aliases = Set::new();
        for broker in &self.brokers {
            broker.parsed_url()?;
            let alias = broker.alias()?;
            if !aliases.insert(alias.clone()) {
                anyhow::bail!("Server alias {alias} is used more than once");
            }
        }
        Ok(())
    }

    fn apply_env_overrides(&mut self) {
        if let Some(period) = get_duration_from_env("TTALLOC_KEEPALIVE_PERIOD_MS") {
            self.keepalive_period = period;
        }
        if let Some(period) = get_duration_from_env("TTALLOC_HOLD_PERIOD_MS") {
            self.hold_period = period;
        }
    }
}

fn get_duration_from_env(key: &str) -> Option<Duration> {
    std::env::var(key)
        .ok()
        .and_then(|value| value.parse::<u64>().ok())
        .map(Duration::from_millis)
}

fn parse_duration<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
    let text = String::deserialize(deserializer)?;
    humantime::parse_duration(&text).map_err(serde::de::Error::custom)
}

fn default_keepalive_period() -> Duration {
    DEFAULT_KEEPALIVE_PERIOD
}
fn default_hold_period() -> Duration {
    DEFAULT_HOLD_PERIOD
}
fn default_max_waiters() -> usize {
    DEFAULT_MAX_WAITERS
}
fn default_max_workers() -> usize {
    DEFAULT_MAX_WORKERS
}
fn default_request_timeout() -> Duration {
    DEFAULT_REQUEST_TIMEOUT
}
fn default_api_prefix() -> String {
    DEFAULT_API_PREFIX.to_string()
}

#[cfg(test)]
mod tests {
    use super::{ClientConfig, DEFAULT_HOLD_PERIOD, DEFAULT_MAX_WAITERS};
    use std::io::Write;
    use std::time::Duration;

    #[test]
    fn parse_full_config() {
        let config = ClientConfig::from_toml(
            r#"
keepalive_period = "1s 500ms"
max_waiters = 10

[[broker]]
url = "https://broker1.example.com:5000"

[[broker]]
url = "http://10.0.0.2:5000"
aka = "lab"
ssl_ignore = true
username = "alice"
"#,
        )
        .unwrap();
        assert_eq!(config.keepalive_period, Duration::from_millis(1500));
        assert_eq!(config.hold_period, DEFAULT_HOLD_PERIOD);
        assert_eq!(config.max_waiters, 10);
        assert_eq!(config.brokers.len(), 2);
        assert_eq!(config.brokers[0].alias().unwrap(), "broker1");
        assert_eq!(config.brokers[1].alias().unwrap(), "lab");
        assert!(config.brokers[1].ssl_ignore);
    }

    #[test]
    fn empty_config_uses_defaults() {
        let config = ClientConfig::from_toml("").unwrap();
        assert_eq!(config.max_waiters, DEFAULT_MAX_WAITERS);
        assert!(config.brokers.is_empty());
    }

    #[test]
    fn reject_malformed_url() {
        assert!(ClientConfig::from_toml("[[broker]]\nurl = \"broker1\"\n").is_err());
    }

    #[test]
    fn reject_duplicate_alias() {
        let result = ClientConfig::from_toml(
            r#"
[[broker]]
url = "https://a.example.com"
aka = "x"

[[broker]]
url = "https://b.example.com"
aka = "x"
"#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn reject_unknown_keys() {
        assert!(ClientConfig::from_toml("keepalive = \"4s\"").is_err());
    }

    #[test]
    fn load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[[broker]]\nurl = \"https://b1.example.com\"").unwrap();
        let config = ClientConfig::load(file.path()).unwrap();
        assert_eq!(config.brokers[0].alias().unwrap(), "b1");
    }
}
