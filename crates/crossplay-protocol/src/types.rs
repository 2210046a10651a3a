//! Types shared by both editions and by every layer above the protocol.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::ProtocolError;

// ---------------------------------------------------------------------------
// Identity types
// ---------------------------------------------------------------------------

/// Identifies one gateway session for its whole life.
///
/// Allocated by the listener; never reused within a process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "S-{}", self.0)
    }
}

/// An entity id as the client-facing edition sees it.
///
/// Scoped to one session. The player's own entity is always
/// [`RuntimeId::PLAYER`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RuntimeId(pub u64);

impl RuntimeId {
    /// The runtime id of the connected player.
    pub const PLAYER: RuntimeId = RuntimeId(1);
}

impl fmt::Display for RuntimeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Geometry
// ---------------------------------------------------------------------------

/// A position in the client-facing edition.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Vec3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Vec3 {
    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }
}

/// Integer block coordinates, identical in both editions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct BlockPos {
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

impl BlockPos {
    pub const fn new(x: i32, y: i32, z: i32) -> Self {
        Self { x, y, z }
    }
}

// ---------------------------------------------------------------------------
// Disconnects
// ---------------------------------------------------------------------------

/// Why a session ended, as a machine-readable category.
///
/// The first three are failures; the last two are orderly closes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DisconnectCategory {
    /// The link itself broke: reset, timeout, or a malformed frame.
    TransportFailure,
    /// Identity rejected, malformed client data, or a failed pack handshake.
    AuthFailure,
    /// The backend could not be reached or refused the login.
    BackendUnreachable,
    /// The gateway is shutting down.
    ServerShutdown,
    /// The player left, or the backend ended the session normally.
    ClientQuit,
}

impl DisconnectCategory {
    /// Stable numeric code carried next to the readable reason.
    pub fn code(self) -> u16 {
        match self {
            Self::TransportFailure => 1,
            Self::AuthFailure => 2,
            Self::BackendUnreachable => 3,
            Self::ServerShutdown => 4,
            Self::ClientQuit => 5,
        }
    }

    /// A readable fallback message for this category.
    pub fn default_message(self) -> &'static str {
        match self {
            Self::TransportFailure => "Connection lost",
            Self::AuthFailure => "Authentication failed",
            Self::BackendUnreachable => "Could not connect to the server",
            Self::ServerShutdown => "Server closed",
            Self::ClientQuit => "Disconnected",
        }
    }

    /// Returns `true` for categories that represent a failure.
    pub fn is_failure(self) -> bool {
        matches!(
            self,
            Self::TransportFailure | Self::AuthFailure | Self::BackendUnreachable
        )
    }
}

impl fmt::Display for DisconnectCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::TransportFailure => "TRANSPORT_FAILURE",
            Self::AuthFailure => "AUTH_FAILURE",
            Self::BackendUnreachable => "BACKEND_UNREACHABLE",
            Self::ServerShutdown => "SERVER_SHUTDOWN",
            Self::ClientQuit => "CLIENT_QUIT",
        };
        f.write_str(name)
    }
}

/// A readable reason plus its category.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisconnectReason {
    pub category: DisconnectCategory,
    pub message: String,
}

impl DisconnectReason {
    pub fn new(category: DisconnectCategory, message: impl Into<String>) -> Self {
        Self {
            category,
            message: message.into(),
        }
    }

    /// A reason carrying the category's default message.
    pub fn from_category(category: DisconnectCategory) -> Self {
        Self::new(category, category.default_message())
    }
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.message, self.category)
    }
}

// ---------------------------------------------------------------------------
// Backend status
// ---------------------------------------------------------------------------

/// What the backend last reported about itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendStatus {
    pub motd: String,
    pub online_players: u32,
    pub max_players: u32,
    /// The backend's version label, e.g. `"1.21.1"`.
    pub version_name: String,
    pub protocol: i32,
    /// Round trip of the status probe that produced this value.
    pub latency_ms: Option<u64>,
}

// ---------------------------------------------------------------------------
// Advertisement
// ---------------------------------------------------------------------------

/// The semicolon-separated server advertisement sent in discovery pongs.
///
/// ```text
/// MCPE;motd;protocol;version;online;max;guid;sub_motd;game_mode;1;port_v4;port_v6;
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Advertisement {
    pub edition: String,
    pub motd: String,
    pub protocol: u32,
    pub version: String,
    pub online_players: u32,
    pub max_players: u32,
    pub server_guid: u64,
    pub sub_motd: String,
    pub game_mode: String,
    pub port_v4: u16,
    pub port_v6: u16,
}

const ADVERTISEMENT_FIELDS: usize = 12;

// Fields are joined with ';', so the free-text ones must not contain it.
fn sanitize(s: &str) -> String {
    s.replace(';', "\\;")
}

impl Advertisement {
    /// Renders the advertisement in wire format.
    pub fn encode(&self) -> String {
        format!(
            "{};{};{};{};{};{};{};{};{};1;{};{};",
            self.edition,
            sanitize(&self.motd),
            self.protocol,
            self.version,
            self.online_players,
            self.max_players,
            self.server_guid,
            sanitize(&self.sub_motd),
            self.game_mode,
            self.port_v4,
            self.port_v6,
        )
    }

    /// Parses the wire format back.
    pub fn parse(s: &str) -> Result<Self, ProtocolError> {
        let fields = split_unescaped(s);
        if fields.len() < ADVERTISEMENT_FIELDS {
            return Err(ProtocolError::MalformedAdvertisement(format!(
                "expected {ADVERTISEMENT_FIELDS} fields, got {}",
                fields.len()
            )));
        }
        fn num<T: FromStr>(field: &str, name: &str) -> Result<T, ProtocolError> {
            field
                .parse()
                .map_err(|_| ProtocolError::MalformedAdvertisement(format!("bad {name}: {field:?}")))
        }
        Ok(Self {
            edition: fields[0].clone(),
            motd: fields[1].clone(),
            protocol: num(&fields[2], "protocol")?,
            version: fields[3].clone(),
            online_players: num(&fields[4], "online players")?,
            max_players: num(&fields[5], "max players")?,
            server_guid: num(&fields[6], "guid")?,
            sub_motd: fields[7].clone(),
            game_mode: fields[8].clone(),
            port_v4: num(&fields[10], "ipv4 port")?,
            port_v6: num(&fields[11], "ipv6 port")?,
        })
    }
}

fn split_unescaped(s: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut chars = s.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\\' if chars.peek() == Some(&';') => {
                current.push(';');
                chars.next();
            }
            ';' => fields.push(std::mem::take(&mut current)),
            _ => current.push(c),
        }
    }
    if !current.is_empty() {
        fields.push(current);
    }
    fields
}
