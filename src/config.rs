use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::fmt;
use std::path::Path;

use crate::transport::{parse_mqtt_endpoint, MqttEndpoint};

const DEFAULT_KEEP_ALIVE_TOPIC: &str = "keep_alive";
const DEFAULT_KEEP_ALIVE_MESSAGE: &str = "keep_alive";
const DEFAULT_HTTP_PORT: u16 = 5000;

/// One layer of bridge settings (flags, settings file or environment).
///
/// Unset and empty values fall through to the next layer.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct ConfigLayer {
    pub mqtt_url: Option<String>,
    pub mqtt_user: Option<String>,
    pub mqtt_pass: Option<String>,
    pub mqtt_clientid: Option<String>,
    pub keep_alive_topic: Option<String>,
    pub keep_alive_message: Option<String>,
    pub debug: Option<bool>,
    pub secret: Option<String>,
    pub port: Option<u16>,
}

impl ConfigLayer {
    pub fn from_env() -> Result<Self> {
        let debug = match env_value(&["DEBUG_MODE"]) {
            Some(raw) => Some(
                parse_bool(&raw).ok_or_else(|| anyhow!("DEBUG_MODE must be a boolean, got '{}'", raw))?,
            ),
            None => None,
        };
        let port = match env_value(&["PORT"]) {
            Some(raw) => Some(
                raw.trim()
                    .parse::<u16>()
                    .map_err(|_| anyhow!("PORT must be a TCP port number, got '{}'", raw))?,
            ),
            None => None,
        };
        Ok(Self {
            mqtt_url: env_value(&["MQTT_URL", "MQTT_HOST"]),
            mqtt_user: env_value(&["MQTT_USER"]),
            mqtt_pass: env_value(&["MQTT_PASS"]),
            mqtt_clientid: env_value(&["MQTT_CLIENT_ID"]),
            keep_alive_topic: env_value(&["KEEP_ALIVE_TOPIC"]),
            keep_alive_message: env_value(&["KEEP_ALIVE_MESSAGE"]),
            debug,
            secret: env_value(&["SECRET", "AUTH_KEY"]),
            port,
        })
    }

    /// Reads a settings file. Files ending in `.toml` are parsed as TOML,
    /// everything else as JSON.
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| anyhow!("failed to read settings file {}: {}", path.display(), e))?;
        let is_toml = path
            .extension()
            .map(|ext| ext.eq_ignore_ascii_case("toml"))
            .unwrap_or(false);
        let layer = if is_toml {
            toml::from_str(&raw)
                .map_err(|e| anyhow!("invalid settings file {}: {}", path.display(), e))?
        } else {
            serde_json::from_str(&raw)
                .map_err(|e| anyhow!("invalid settings file {}: {}", path.display(), e))?
        };
        Ok(layer)
    }

    /// Returns this layer with unset or empty values taken from `lower`.
    pub fn or(self, lower: ConfigLayer) -> ConfigLayer {
        ConfigLayer {
            mqtt_url: pick(self.mqtt_url, lower.mqtt_url),
            mqtt_user: pick(self.mqtt_user, lower.mqtt_user),
            mqtt_pass: pick(self.mqtt_pass, lower.mqtt_pass),
            mqtt_clientid: pick(self.mqtt_clientid, lower.mqtt_clientid),
            keep_alive_topic: pick(self.keep_alive_topic, lower.keep_alive_topic),
            keep_alive_message: pick(self.keep_alive_message, lower.keep_alive_message),
            debug: self.debug.or(lower.debug),
            secret: pick(self.secret, lower.secret),
            port: self.port.or(lower.port),
        }
    }
}

/// Broker connection settings shared by the publisher and every subscription.
#[derive(Clone)]
pub struct MqttSettings {
    pub url: String,
    pub endpoint: MqttEndpoint,
    pub username: String,
    pub password: String,
    pub client_id: Option<String>,
}

impl fmt::Debug for MqttSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MqttSettings")
            .field("url", &self.url)
            .field("endpoint", &self.endpoint)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("client_id", &self.client_id)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeepAliveSettings {
    pub topic: String,
    pub message: String,
}

/// Immutable process-wide configuration, built once at startup.
#[derive(Clone)]
pub struct BridgeConfig {
    pub mqtt: MqttSettings,
    pub keep_alive: KeepAliveSettings,
    pub debug: bool,
    pub secret: String,
    pub http_port: u16,
}

impl fmt::Debug for BridgeConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BridgeConfig")
            .field("mqtt", &self.mqtt)
            .field("keep_alive", &self.keep_alive)
            .field("debug", &self.debug)
            .field("secret", &if self.secret.is_empty() { "" } else { "<redacted>" })
            .field("http_port", &self.http_port)
            .finish()
    }
}

impl BridgeConfig {
    /// Resolves settings with precedence flags > settings file > environment > defaults.
    pub fn load(flags: ConfigLayer, settings_path: Option<&Path>) -> Result<Self> {
        let file = match settings_path {
            Some(path) => ConfigLayer::from_file(path)?,
            None => ConfigLayer::default(),
        };
        let env = ConfigLayer::from_env()?;
        Self::from_layer(flags.or(file).or(env))
    }

    pub fn from_layer(layer: ConfigLayer) -> Result<Self> {
        let url = layer
            .mqtt_url
            .ok_or_else(|| anyhow!("MQTT broker URL not configured (set --mqtt-url or MQTT_URL)"))?;
        let endpoint = parse_mqtt_endpoint(&url)
            .with_context(|| format!("invalid MQTT broker URL '{}'", url))?;
        let mqtt = MqttSettings {
            url,
            endpoint,
            username: layer.mqtt_user.unwrap_or_default(),
            password: layer.mqtt_pass.unwrap_or_default(),
            client_id: layer.mqtt_clientid,
        };
        let keep_alive = KeepAliveSettings {
            topic: layer
                .keep_alive_topic
                .unwrap_or_else(|| DEFAULT_KEEP_ALIVE_TOPIC.to_string()),
            message: layer
                .keep_alive_message
                .unwrap_or_else(|| DEFAULT_KEEP_ALIVE_MESSAGE.to_string()),
        };
        Ok(Self {
            mqtt,
            keep_alive,
            debug: layer.debug.unwrap_or(false),
            secret: layer.secret.unwrap_or_default(),
            http_port: layer.port.unwrap_or(DEFAULT_HTTP_PORT),
        })
    }
}

fn pick(value: Option<String>, fallback: Option<String>) -> Option<String> {
    match value {
        Some(value) if !value.is_empty() => Some(value),
        _ => fallback.filter(|value| !value.is_empty()),
    }
}

fn env_value(keys: &[&str]) -> Option<String> {
    keys.iter()
        .filter_map(|key| std::env::var(key).ok())
        .find(|value| !value.trim().is_empty())
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
