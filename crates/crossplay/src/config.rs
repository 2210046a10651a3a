//! Gateway configuration.
//!
//! Every section has a `Default`, and every field may be left out of a
//! config file. Durations are written as milliseconds.

use std::path::Path;
use std::time::Duration;

use crossplay_transport::datagram::{DEFAULT_MTU, MIN_MTU};
use serde::{Deserialize, Deserializer};

use crate::GatewayError;

fn millis<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
    u64::deserialize(deserializer).map(Duration::from_millis)
}

// ---------------------------------------------------------------------------
// GatewayConfig
// ---------------------------------------------------------------------------

/// Top-level configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// The client-facing listener.
    pub bedrock: ListenerConfig,
    /// The backend every session links to.
    pub remote: RemoteConfig,
    pub session: SessionConfig,
    pub ping: PingConfig,
}

impl GatewayConfig {
    /// Parses a JSON config document. Missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self, GatewayError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Reads and parses a JSON config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, GatewayError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json(&raw)
    }

    /// Replaces values that would stall or break the gateway.
    pub fn validated(mut self) -> Self {
        let defaults = Self::default();
        fix_zero(
            &mut self.session.handshake_timeout,
            defaults.session.handshake_timeout,
            "session.handshake_timeout",
        );
        fix_zero(
            &mut self.session.linking_timeout,
            defaults.session.linking_timeout,
            "session.linking_timeout",
        );
        fix_zero(
            &mut self.session.idle_timeout,
            defaults.session.idle_timeout,
            "session.idle_timeout",
        );
        fix_zero(
            &mut self.ping.refresh_interval,
            defaults.ping.refresh_interval,
            "ping.refresh_interval",
        );
        fix_zero(
            &mut self.ping.probe_timeout,
            defaults.ping.probe_timeout,
            "ping.probe_timeout",
        );
        if self.bedrock.mtu < MIN_MTU {
            tracing::warn!(mtu = self.bedrock.mtu, min = MIN_MTU, "mtu too small, raising it");
            self.bedrock.mtu = MIN_MTU;
        }
        self
    }
}

fn fix_zero(value: &mut Duration, default: Duration, name: &str) {
    if value.is_zero() {
        tracing::warn!(field = name, ?default, "zero duration, using default");
        *value = default;
    }
}

// ---------------------------------------------------------------------------
// ListenerConfig
// ---------------------------------------------------------------------------

/// Where clients connect, and what discovery replies advertise.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ListenerConfig {
    pub address: String,
    pub port: u16,
    /// Shown when MOTD passthrough is off or the backend was never reached.
    pub motd: String,
    pub sub_motd: String,
    pub max_players: u32,
    /// Client packets at least this long are compressed.
    pub compression_threshold: u16,
    pub mtu: u16,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            address: "0.0.0.0".to_string(),
            port: 19132,
            motd: "Crossplay".to_string(),
            sub_motd: "Crossplay".to_string(),
            max_players: 100,
            compression_threshold: 256,
            mtu: DEFAULT_MTU,
        }
    }
}

impl ListenerConfig {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.address, self.port)
    }
}

// ---------------------------------------------------------------------------
// RemoteConfig
// ---------------------------------------------------------------------------

/// How the gateway proves a player's identity to the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthMode {
    /// The backend trusts the username.
    #[default]
    Offline,
    /// The backend challenges, and the identity service answers.
    Online,
}

/// The backend server.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    pub address: String,
    pub port: u16,
    pub auth: AuthMode,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            address: "127.0.0.1".to_string(),
            port: 25565,
            auth: AuthMode::Offline,
        }
    }
}

// ---------------------------------------------------------------------------
// SessionConfig
// ---------------------------------------------------------------------------

/// Timeouts for one player session.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// From accept until the client acknowledges the pack offer.
    #[serde(deserialize_with = "millis")]
    pub handshake_timeout: Duration,
    /// Upper bound on opening the backend link.
    #[serde(deserialize_with = "millis")]
    pub linking_timeout: Duration,
    /// Longest silence tolerated from an established client.
    #[serde(deserialize_with = "millis")]
    pub idle_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            handshake_timeout: Duration::from_secs(10),
            linking_timeout: Duration::from_secs(5),
            idle_timeout: Duration::from_secs(30),
        }
    }
}

// ---------------------------------------------------------------------------
// PingConfig
// ---------------------------------------------------------------------------

/// Discovery reply settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PingConfig {
    /// Advertise the backend's MOTD instead of the configured one.
    pub passthrough_motd: bool,
    /// Advertise the backend's player counts instead of the gateway's own.
    pub passthrough_player_counts: bool,
    #[serde(deserialize_with = "millis")]
    pub refresh_interval: Duration,
    #[serde(deserialize_with = "millis")]
    pub probe_timeout: Duration,
}

impl Default for PingConfig {
    fn default() -> Self {
        Self {
            passthrough_motd: true,
            passthrough_player_counts: true,
            refresh_interval: Duration::from_secs(3),
            probe_timeout: Duration::from_secs(2),
        }
    }
}
