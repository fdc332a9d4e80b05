use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::RelayError;

pub const DEFAULT_STUN_URL: &str = "stun:stun.l.google.com:19302";
pub const DEFAULT_HTTP_PORT: u16 = 8889;

/// How the ingestor reaches the upstream telemetry source.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Transport {
    /// Outbound WebSocket client, one record per frame.
    #[serde(rename = "ws")]
    WebSocket,
    /// Outbound TCP client, newline-delimited records.
    #[serde(rename = "tcp")]
    Tcp,
    /// Local UDP listener, one record per datagram.
    #[serde(rename = "udp")]
    Udp,
}

impl FromStr for Transport {
    type Err = RelayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ws" => Ok(Transport::WebSocket),
            "tcp" => Ok(Transport::Tcp),
            "udp" => Ok(Transport::Udp),
            other => Err(RelayError::Config(format!("unknown feed protocol '{other}'"))),
        }
    }
}

impl fmt::Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Transport::WebSocket => "ws",
            Transport::Tcp => "tcp",
            Transport::Udp => "udp",
        })
    }
}

/// Upstream feed location.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct FeedConfig {
    #[serde(rename = "protocol")]
    pub transport: Transport,
    pub address: String,
    pub port: u16,
}

impl FeedConfig {
    pub fn new(transport: Transport, address: impl Into<String>, port: u16) -> Self {
        Self { transport, address: address.into(), port }
    }

    /// `ws://host:port` for WebSocket feeds, `host:port` otherwise.
    pub fn endpoint(&self) -> String {
        match self.transport {
            Transport::WebSocket => format!("ws://{}:{}", self.address, self.port),
            Transport::Tcp | Transport::Udp => format!("{}:{}", self.address, self.port),
        }
    }
}

/// One STUN/TURN server as configured by the operator.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceServerConfig {
    pub url: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
}

impl IceServerConfig {
    pub fn stun(url: impl Into<String>) -> Self {
        Self { url: url.into(), username: String::new(), password: String::new() }
    }
}

pub fn default_ice_servers() -> Vec<IceServerConfig> {
    vec![IceServerConfig::stun(DEFAULT_STUN_URL)]
}

/// Parse the `ICE_SERVERS` JSON array.
pub fn parse_ice_servers(json: &str) -> Result<Vec<IceServerConfig>, RelayError> {
    serde_json::from_str(json).map_err(|e| RelayError::Config(format!("ICE_SERVERS: {e}")))
}

/// Everything the relay reads from its environment.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RelayConfig {
    pub feed: FeedConfig,
    pub ice_servers: Vec<IceServerConfig>,
    pub http_port: u16,
}

impl RelayConfig {
    pub fn from_env() -> Result<Self, RelayError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; `from_env` passes `std::env::var`.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, RelayError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let transport = lookup("FEED_PROTOCOL")
            .ok_or_else(|| RelayError::Config("FEED_PROTOCOL must be set".into()))?
            .parse::<Transport>()?;
        let address = lookup("FEED_ADDRESS").unwrap_or_else(|| "0.0.0.0".into());
        let port = parse_port(
            "FEED_PORT",
            &lookup("FEED_PORT").ok_or_else(|| RelayError::Config("FEED_PORT must be set".into()))?,
        )?;

        let ice_servers = match lookup("ICE_SERVERS") {
            Some(json) if !json.trim().is_empty() => parse_ice_servers(&json)?,
            _ => default_ice_servers(),
        };

        let http_port = match lookup("HTTP_PORT") {
            Some(raw) => parse_port("HTTP_PORT", &raw)?,
            None => DEFAULT_HTTP_PORT,
        };

        Ok(Self {
            feed: FeedConfig::new(transport, address, port),
            ice_servers,
            http_port,
        })
    }
}

fn parse_port(key: &str, raw: &str) -> Result<u16, RelayError> {
    raw.trim()
        .parse()
        .map_err(|_| RelayError::Config(format!("{key} is not a valid port: '{raw}'")))
}
