//! MQTT broker endpoint parsing.
//!
//! Supports formats:
//! - `host` / `host:port` (plain TCP)
//! - `mqtt://host[:port]`, `tcp://host[:port]` (plain TCP)
//! - `mqtts://host[:port]`, `ssl://host[:port]`, `tls://host[:port]` (TLS)
//! - `[ipv6]:port` (IPv6 with brackets)
//!
//! Ports default to 1883 for plain TCP and 8883 for TLS.

use anyhow::{anyhow, Context, Result};
use rumqttc::Transport;
use std::fmt;

pub const DEFAULT_MQTT_PORT: u16 = 1883;
pub const DEFAULT_MQTTS_PORT: u16 = 8883;

/// MQTT endpoint with TLS selection.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MqttEndpoint {
    pub host: String,
    pub port: u16,
    pub use_tls: bool,
}

impl MqttEndpoint {
    /// Build the rumqttc transport for this endpoint.
    ///
    /// TLS connections verify the broker against the webpki root store.
    pub fn transport(&self) -> Transport {
        if self.use_tls {
            Transport::tls_with_default_config()
        } else {
            Transport::tcp()
        }
    }
}

impl fmt::Display for MqttEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let scheme = if self.use_tls { "mqtts" } else { "mqtt" };
        if self.host.contains(':') {
            write!(f, "{}://[{}]:{}", scheme, self.host, self.port)
        } else {
            write!(f, "{}://{}:{}", scheme, self.host, self.port)
        }
    }
}

/// Parse an MQTT endpoint from a broker URL.
pub fn parse_mqtt_endpoint(url: &str) -> Result<MqttEndpoint> {
    let mut use_tls = false;
    let mut remainder = url.trim();
    if remainder.is_empty() {
        return Err(anyhow!("MQTT broker URL is empty"));
    }

    if let Some((scheme, rest)) = remainder.split_once("://") {
        match scheme.to_ascii_lowercase().as_str() {
            "mqtt" | "tcp" => {}
            "mqtts" | "ssl" | "tls" => use_tls = true,
            other => return Err(anyhow!("unsupported MQTT scheme: {}", other)),
        }
        remainder = rest;
    }

    // mqtt://broker:1883/ carries an empty path
    let remainder = remainder.split('/').next().unwrap_or(remainder);
    if remainder.contains('@') {
        return Err(anyhow!(
            "credentials in the MQTT broker URL are not supported: use --mqtt-user and --mqtt-pass"
        ));
    }

    let default_port = if use_tls {
        DEFAULT_MQTTS_PORT
    } else {
        DEFAULT_MQTT_PORT
    };
    let (host, port) = split_host_port(remainder, default_port)?;
    if host.is_empty() {
        return Err(anyhow!("missing MQTT host in {}", url));
    }
    Ok(MqttEndpoint {
        host,
        port,
        use_tls,
    })
}

fn split_host_port(addr: &str, default_port: u16) -> Result<(String, u16)> {
    // Handle IPv6 addresses in brackets: [::1]:1883
    if let Some(rest) = addr.strip_prefix('[') {
        let (host, rest) = rest
            .split_once(']')
            .ok_or_else(|| anyhow!("invalid MQTT address: {}", addr))?;
        let port = match rest.strip_prefix(':') {
            Some(port) => parse_port(port, addr)?,
            None if rest.is_empty() => default_port,
            None => return Err(anyhow!("invalid MQTT address: {}", addr)),
        };
        return Ok((host.to_string(), port));
    }

    match addr.rsplit_once(':') {
        Some((host, port)) => Ok((host.to_string(), parse_port(port, addr)?)),
        None => Ok((addr.to_string(), default_port)),
    }
}

fn parse_port(port: &str, addr: &str) -> Result<u16> {
    port.parse()
        .with_context(|| format!("invalid MQTT port in {}", addr))
}
