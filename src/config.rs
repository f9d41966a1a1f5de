use serde::Deserialize;
use std::env;
use std::time::Duration;

use crate::adapter::AdapterSettings;
use crate::error::ConfigError;

#[derive(Debug, Clone)]
pub struct Config {
    pub mqtt: MqttConfig,
    pub meross: MerossConfig,
}

#[derive(Debug, Clone)]
pub struct MqttConfig {
    pub broker_host: String,
    pub broker_port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub topic_prefix: String,
    pub client_id: String,
}

#[derive(Debug, Clone)]
pub struct MerossConfig {
    /// `None` disables every call into the Meross cloud.
    pub credentials: Option<Credentials>,
    pub poll_interval_secs: u64,
    pub repair_delay_secs: u64,
    pub pairing_timeout_secs: u64,
    /// Default log level `debug` instead of `info`.
    pub verbose: bool,
}

#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

// The add-on's persisted settings: a flat JSON object.
#[derive(Deserialize)]
struct RawStore {
    #[serde(default)]
    username: Option<String>,
    #[serde(default)]
    password: Option<String>,
}

fn env_required(key: &'static str) -> Result<String, ConfigError> {
    env::var(key).map_err(|_| ConfigError::Missing(key))
}

fn env_optional(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.is_empty())
}

fn env_or_default<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let store_file = env_or_default("MEROSS_CONFIG_FILE", "meross.json".to_string());
        let credentials = load_credentials(&store_file)?;

        let config = Self {
            mqtt: MqttConfig {
                broker_host: env_required("MQTT_BROKER_HOST")?,
                broker_port: env_or_default("MQTT_BROKER_PORT", 1883),
                username: env_optional("MQTT_USERNAME"),
                password: env_optional("MQTT_PASSWORD"),
                topic_prefix: env_or_default("MQTT_TOPIC_PREFIX", "meross".to_string()),
                client_id: env_or_default("MQTT_CLIENT_ID", "meross-to-mqtt".to_string()),
            },
            meross: MerossConfig {
                credentials,
                poll_interval_secs: env_or_default("MEROSS_POLL_INTERVAL_SECS", 5),
                repair_delay_secs: env_or_default("MEROSS_REPAIR_DELAY_SECS", 5),
                pairing_timeout_secs: env_or_default("MEROSS_PAIRING_TIMEOUT_SECS", 3),
                verbose: env_or_default("MEROSS_VERBOSE", false),
            },
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.mqtt.broker_host.is_empty() {
            return Err(ConfigError::Invalid("MQTT_BROKER_HOST must not be empty".into()));
        }
        if self.meross.poll_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "MEROSS_POLL_INTERVAL_SECS must be > 0".into(),
            ));
        }
        if self.meross.pairing_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "MEROSS_PAIRING_TIMEOUT_SECS must be > 0".into(),
            ));
        }
        Ok(())
    }

    pub fn adapter_settings(&self) -> AdapterSettings {
        AdapterSettings {
            poll_interval: Duration::from_secs(self.meross.poll_interval_secs),
            repair_delay: Duration::from_secs(self.meross.repair_delay_secs),
            pairing_timeout: Duration::from_secs(self.meross.pairing_timeout_secs),
        }
    }

    pub fn bridge_status_topic(&self) -> String {
        format!("{}/bridge_status", self.mqtt.topic_prefix)
    }

    pub fn device_topic(&self, device_id: &str, leaf: &str) -> String {
        format!("{}/{}/{}", self.mqtt.topic_prefix, device_id, leaf)
    }
}

/// Read the credential store. A missing file means "not configured"; a file
/// that exists but is not valid JSON is an error.
fn load_credentials(path: &str) -> Result<Option<Credentials>, ConfigError> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(source) => {
            return Err(ConfigError::Io {
                path: path.to_string(),
                source,
            });
        }
    };
    parse_credentials(&content).map_err(|source| ConfigError::Parse {
        path: path.to_string(),
        source,
    })
}

fn parse_credentials(content: &str) -> Result<Option<Credentials>, serde_json::Error> {
    let raw: RawStore = serde_json::from_str(content)?;
    Ok(match (raw.username, raw.password) {
        (Some(username), Some(password)) if !username.is_empty() && !password.is_empty() => {
            Some(Credentials { username, password })
        }
        _ => None,
    })
}
