//! Bridge configuration: JSON5 file with environment-variable overrides for
//! broker and store credentials.

use serde::{Deserialize, Serialize};
use std::path::Path;
use url::Url;

use crate::error::{Error, Result};

/// Maximum number of topic-pattern filters the bridge subscribes to.
pub const MAX_TOPIC_PATTERNS: usize = 3;

/// Complete bridge configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// MQTT broker connection settings.
    #[serde(default)]
    pub broker: BrokerConfig,

    /// Topic patterns to subscribe to (`+`/`#` wildcards allowed).
    #[serde(default = "default_topics")]
    pub topics: Vec<String>,

    /// HTTP API settings.
    #[serde(default)]
    pub http: HttpConfig,

    /// Primary (embedded) store settings.
    #[serde(default)]
    pub primary: PrimaryStoreConfig,

    /// Secondary (document) store settings. Absent means the bridge runs
    /// with the primary store only.
    #[serde(default)]
    pub secondary: Option<SecondaryStoreConfig>,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

fn default_topics() -> Vec<String> {
    vec!["energy/+/+/telemetry".to_string(), "battery/data".to_string()]
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            broker: BrokerConfig::default(),
            topics: default_topics(),
            http: HttpConfig::default(),
            primary: PrimaryStoreConfig::default(),
            secondary: None,
            logging: LoggingConfig::default(),
        }
    }
}

/// MQTT broker connection configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerConfig {
    /// Broker URL, `mqtt://host:port` or `mqtts://host:port`.
    #[serde(default = "default_broker_url")]
    pub url: String,

    #[serde(default)]
    pub username: Option<String>,

    #[serde(default)]
    pub password: Option<String>,

    /// Client identifier prefix; a random suffix is appended per process.
    #[serde(default = "default_client_id_prefix")]
    pub client_id_prefix: String,

    #[serde(default = "default_keep_alive_secs")]
    pub keep_alive_secs: u64,

    /// Fixed backoff between reconnect attempts.
    #[serde(default = "default_reconnect_secs")]
    pub reconnect_secs: u64,
}

fn default_broker_url() -> String {
    "mqtt://localhost:1883".to_string()
}

fn default_client_id_prefix() -> String {
    "gridpulse".to_string()
}

fn default_keep_alive_secs() -> u64 {
    60
}

fn default_reconnect_secs() -> u64 {
    5
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            url: default_broker_url(),
            username: None,
            password: None,
            client_id_prefix: default_client_id_prefix(),
            keep_alive_secs: default_keep_alive_secs(),
            reconnect_secs: default_reconnect_secs(),
        }
    }
}

/// Resolved broker endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerEndpoint {
    pub host: String,
    pub port: u16,
    pub tls: bool,
}

impl BrokerConfig {
    /// Parse the broker URL into host, port, and TLS flag.
    ///
    /// The port defaults to 8883 for TLS schemes and 1883 otherwise.
    pub fn endpoint(&self) -> Result<BrokerEndpoint> {
        let url = Url::parse(&self.url).map_err(|e| Error::BrokerUrl {
            url: self.url.clone(),
            reason: e.to_string(),
        })?;

        let tls = matches!(url.scheme(), "mqtts" | "ssl");
        if !tls && !matches!(url.scheme(), "mqtt" | "tcp") {
            return Err(Error::BrokerUrl {
                url: self.url.clone(),
                reason: format!("unsupported scheme '{}'", url.scheme()),
            });
        }

        let host = url
            .host_str()
            .ok_or_else(|| Error::BrokerUrl {
                url: self.url.clone(),
                reason: "missing host".to_string(),
            })?
            .to_string();

        let port = url.port().unwrap_or(if tls { 8883 } else { 1883 });

        Ok(BrokerEndpoint { host, port, tls })
    }
}

/// HTTP API configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    /// Address to listen on (default: "0.0.0.0:8080").
    #[serde(default = "default_http_listen")]
    pub listen: String,
}

fn default_http_listen() -> String {
    "0.0.0.0:8080".to_string()
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            listen: default_http_listen(),
        }
    }
}

/// Primary store (embedded SQLite) configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrimaryStoreConfig {
    /// Database file path (default: "gridpulse.db").
    #[serde(default = "default_primary_path")]
    pub path: String,
}

fn default_primary_path() -> String {
    "gridpulse.db".to_string()
}

impl Default for PrimaryStoreConfig {
    fn default() -> Self {
        Self {
            path: default_primary_path(),
        }
    }
}

/// Secondary store (MongoDB) configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecondaryStoreConfig {
    /// Connection URI, e.g. "mongodb://localhost:27017".
    pub uri: String,

    #[serde(default = "default_database")]
    pub database: String,

    #[serde(default = "default_collection")]
    pub collection: String,

    /// Documents older than this many days are eligible for automatic
    /// expiry. `None` disables expiry.
    #[serde(default = "default_retention_days")]
    pub retention_days: Option<u32>,
}

fn default_database() -> String {
    "energy_monitor".to_string()
}

fn default_collection() -> String {
    "telemetry".to_string()
}

fn default_retention_days() -> Option<u32> {
    Some(30)
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable text format (default).
    #[default]
    Text,
    /// Structured JSON format.
    Json,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error".
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log output format: "text" or "json".
    #[serde(default)]
    pub format: LogFormat,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

impl BridgeConfig {
    /// Load configuration from a JSON5 file. Does not validate; call
    /// [`BridgeConfig::validate`] after applying overrides.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!(
                "Failed to read config file '{}': {}",
                path.display(),
                e
            ))
        })?;

        Self::parse(&content)
    }

    /// Parse configuration from a JSON5 string.
    pub fn parse(content: &str) -> Result<Self> {
        json5::from_str(content)
            .map_err(|e| Error::Config(format!("Failed to parse config: {}", e)))
    }

    /// Apply environment-variable overrides.
    ///
    /// Recognized variables match the original deployment's `.env` names:
    /// `MQTT_URL`, `MQTT_USERNAME`, `MQTT_PASSWORD`, `MQTT_TOPIC_FILTER`,
    /// and `MONGO_URI` (which enables the secondary store when the file
    /// leaves it unconfigured).
    pub fn apply_env_overrides(&mut self) {
        if let Ok(url) = std::env::var("MQTT_URL") {
            self.broker.url = url;
        }
        if let Ok(username) = std::env::var("MQTT_USERNAME") {
            self.broker.username = Some(username);
        }
        if let Ok(password) = std::env::var("MQTT_PASSWORD") {
            self.broker.password = Some(password);
        }
        if let Ok(topic) = std::env::var("MQTT_TOPIC_FILTER") {
            self.topics = vec![topic];
        }
        if let Ok(uri) = std::env::var("MONGO_URI") {
            match &mut self.secondary {
                Some(secondary) => secondary.uri = uri,
                None => {
                    self.secondary = Some(SecondaryStoreConfig {
                        uri,
                        database: default_database(),
                        collection: default_collection(),
                        retention_days: default_retention_days(),
                    });
                }
            }
        }
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.topics.is_empty() {
            return Err(Error::Config(
                "At least one topic pattern must be configured".to_string(),
            ));
        }

        if self.topics.len() > MAX_TOPIC_PATTERNS {
            return Err(Error::Config(format!(
                "At most {} topic patterns are supported, got {}",
                MAX_TOPIC_PATTERNS,
                self.topics.len()
            )));
        }

        if self.topics.iter().any(|t| t.is_empty()) {
            return Err(Error::Config("Empty topic pattern".to_string()));
        }

        self.broker.endpoint()?;

        if self.http.listen.parse::<std::net::SocketAddr>().is_err() {
            return Err(Error::Config(format!(
                "Invalid HTTP listen address: {}",
                self.http.listen
            )));
        }

        if self.primary.path.is_empty() {
            return Err(Error::Config(
                "Primary store path must not be empty".to_string(),
            ));
        }

        if let Some(secondary) = &self.secondary {
            if secondary.uri.is_empty() {
                return Err(Error::Config(
                    "Secondary store URI must not be empty".to_string(),
                ));
            }
            if secondary.retention_days == Some(0) {
                return Err(Error::Config(
                    "retention_days must be > 0 when set".to_string(),
                ));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = BridgeConfig::default();
        config.validate().unwrap();

        assert_eq!(config.broker.url, "mqtt://localhost:1883");
        assert_eq!(config.topics.len(), 2);
        assert_eq!(config.http.listen, "0.0.0.0:8080");
        assert_eq!(config.primary.path, "gridpulse.db");
        assert!(config.secondary.is_none());
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_parse_full_config() {
        let json = r#"{
            broker: {
                url: "mqtts://broker.example.com:8883",
                username: "battery",
                password: "secret",
                keep_alive_secs: 30,
            },
            topics: ["energy/+/+/telemetry", "battery/data", "energy/#"],
            http: { listen: "127.0.0.1:9000" },
            primary: { path: "/var/lib/gridpulse/telemetry.db" },
            secondary: {
                uri: "mongodb://localhost:27017",
                database: "battery_monitor",
                retention_days: 14,
            },
            logging: { level: "debug", format: "json" },
        }"#;

        let config = BridgeConfig::parse(json).unwrap();
        config.validate().unwrap();

        assert_eq!(config.broker.username.as_deref(), Some("battery"));
        assert_eq!(config.broker.keep_alive_secs, 30);
        assert_eq!(config.topics.len(), 3);
        assert_eq!(config.http.listen, "127.0.0.1:9000");

        let secondary = config.secondary.unwrap();
        assert_eq!(secondary.database, "battery_monitor");
        assert_eq!(secondary.collection, "telemetry");
        assert_eq!(secondary.retention_days, Some(14));
        assert_eq!(config.logging.format, LogFormat::Json);
    }

    #[test]
    fn test_endpoint_plain() {
        let broker = BrokerConfig {
            url: "mqtt://broker.local".to_string(),
            ..BrokerConfig::default()
        };

        let endpoint = broker.endpoint().unwrap();
        assert_eq!(endpoint.host, "broker.local");
        assert_eq!(endpoint.port, 1883);
        assert!(!endpoint.tls);
    }

    #[test]
    fn test_endpoint_tls_default_port() {
        let broker = BrokerConfig {
            url: "mqtts://broker.example.com".to_string(),
            ..BrokerConfig::default()
        };

        let endpoint = broker.endpoint().unwrap();
        assert_eq!(endpoint.port, 8883);
        assert!(endpoint.tls);
    }

    #[test]
    fn test_endpoint_rejects_unknown_scheme() {
        let broker = BrokerConfig {
            url: "http://broker.example.com".to_string(),
            ..BrokerConfig::default()
        };

        assert!(broker.endpoint().is_err());
    }

    #[test]
    fn test_validate_rejects_too_many_topics() {
        let mut config = BridgeConfig::default();
        config.topics = vec!["a/b".into(), "c/d".into(), "e/f".into(), "g/h".into()];

        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_empty_topics() {
        let mut config = BridgeConfig::default();
        config.topics = vec![];
        assert!(config.validate().is_err());

        config.topics = vec!["".into()];
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_retention() {
        let mut config = BridgeConfig::default();
        config.secondary = Some(SecondaryStoreConfig {
            uri: "mongodb://localhost:27017".to_string(),
            database: default_database(),
            collection: default_collection(),
            retention_days: Some(0),
        });

        assert!(config.validate().is_err());
    }

    #[test]
    fn test_minimal_secondary_config_defaults() {
        let json = r#"{ secondary: { uri: "mongodb://localhost:27017" } }"#;
        let config = BridgeConfig::parse(json).unwrap();

        let secondary = config.secondary.unwrap();
        assert_eq!(secondary.database, "energy_monitor");
        assert_eq!(secondary.collection, "telemetry");
        assert_eq!(secondary.retention_days, Some(30));
    }
}
