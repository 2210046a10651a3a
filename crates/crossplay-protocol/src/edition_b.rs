//! Packets of the backend-facing edition.
//!
//! The backend protocol is split into sub-protocols. A connection starts
//! in [`ProtocolState::Handshake`], and the handshake packet chooses
//! either status or login; a successful login moves it to play. A packet
//! arriving in the wrong state is a protocol violation.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::text::TextComponent;
use crate::types::BlockPos;

/// The backend protocol number this gateway speaks.
pub const PROTOCOL_VERSION: i32 = 767;

/// Human label for [`PROTOCOL_VERSION`].
pub const VERSION_NAME: &str = "1.21.1";

/// The sub-protocol a backend connection is in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProtocolState {
    Handshake,
    Status,
    Login,
    Play,
}

/// Where the handshake sends the connection next.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NextState {
    Status,
    Login,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChatPosition {
    Chat,
    System,
    GameInfo,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Hand {
    Main,
    Off,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClientAction {
    Respawn,
    RequestStats,
}

/// A backend-facing packet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Packet {
    // -- Handshake --
    Handshake {
        protocol_version: i32,
        server_address: String,
        server_port: u16,
        next_state: NextState,
    },

    // -- Status --
    StatusRequest,
    /// Status JSON: `{"version":{..},"players":{..},"description":{..}}`.
    StatusResponse {
        json: String,
    },
    PingRequest {
        payload: i64,
    },
    PongResponse {
        payload: i64,
    },

    // -- Login --
    LoginStart {
        username: String,
        uuid: Option<Uuid>,
    },
    /// Online-mode identity challenge.
    LoginChallenge {
        server_id: String,
        verify_token: Vec<u8>,
    },
    LoginChallengeResponse {
        verify_token: Vec<u8>,
        session_token: String,
    },
    /// Negative disables compression.
    SetCompression {
        threshold: i32,
    },
    LoginSuccess {
        uuid: Uuid,
        username: String,
    },
    LoginDisconnect {
        reason: TextComponent,
    },

    // -- Play --
    JoinGame {
        entity_id: i32,
        game_mode: u8,
        dimension: i32,
        difficulty: u8,
        max_players: u8,
        view_distance: i32,
        hardcore: bool,
    },
    ChatMessage {
        message: TextComponent,
        sender: Option<String>,
        position: ChatPosition,
    },
    ClientChat {
        message: String,
    },
    ClientSettings {
        locale: String,
        view_distance: u8,
        chat_colors: bool,
        main_hand: Hand,
    },
    KeepAlive {
        id: i64,
    },
    KeepAliveResponse {
        id: i64,
    },
    PlayerPosition {
        x: f64,
        y: f64,
        z: f64,
        yaw: f32,
        pitch: f32,
        on_ground: bool,
    },
    PlayerPositionAndLook {
        x: f64,
        y: f64,
        z: f64,
        yaw: f32,
        pitch: f32,
        teleport_id: i32,
    },
    TeleportConfirm {
        teleport_id: i32,
    },
    Animation {
        hand: Hand,
    },
    TimeUpdate {
        world_age: i64,
        time_of_day: i64,
    },
    UpdateHealth {
        health: f32,
        food: i32,
        saturation: f32,
    },
    ClientCommand {
        action: ClientAction,
    },
    SpawnEntity {
        entity_id: i32,
        uuid: Uuid,
        entity_type: i32,
        x: f64,
        y: f64,
        z: f64,
        pitch: f32,
        yaw: f32,
    },
    RemoveEntities {
        entity_ids: Vec<i32>,
    },
    BlockChange {
        position: BlockPos,
        block_state: i32,
    },
    SoundEffect {
        sound_id: i32,
        /// Fixed-point, eight units per block.
        x: i32,
        y: i32,
        z: i32,
        volume: f32,
        pitch: f32,
    },
    Disconnect {
        reason: TextComponent,
    },
}

/// The fieldless tag of a [`Packet`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PacketKind {
    Handshake,
    StatusRequest,
    StatusResponse,
    PingRequest,
    PongResponse,
    LoginStart,
    LoginChallenge,
    LoginChallengeResponse,
    SetCompression,
    LoginSuccess,
    LoginDisconnect,
    JoinGame,
    ChatMessage,
    ClientChat,
    ClientSettings,
    KeepAlive,
    KeepAliveResponse,
    PlayerPosition,
    PlayerPositionAndLook,
    TeleportConfirm,
    Animation,
    TimeUpdate,
    UpdateHealth,
    ClientCommand,
    SpawnEntity,
    RemoveEntities,
    BlockChange,
    SoundEffect,
    Disconnect,
}

impl PacketKind {
    /// The sub-protocol this packet belongs to.
    pub fn state(self) -> ProtocolState {
        use PacketKind::*;
        match self {
            Handshake => ProtocolState::Handshake,
            StatusRequest | StatusResponse | PingRequest | PongResponse => ProtocolState::Status,
            LoginStart | LoginChallenge | LoginChallengeResponse | SetCompression
            | LoginSuccess | LoginDisconnect => ProtocolState::Login,
            _ => ProtocolState::Play,
        }
    }
}

impl Packet {
    pub fn kind(&self) -> PacketKind {
        match self {
            Self::Handshake { .. } => PacketKind::Handshake,
            Self::StatusRequest => PacketKind::StatusRequest,
            Self::StatusResponse { .. } => PacketKind::StatusResponse,
            Self::PingRequest { .. } => PacketKind::PingRequest,
            Self::PongResponse { .. } => PacketKind::PongResponse,
            Self::LoginStart { .. } => PacketKind::LoginStart,
            Self::LoginChallenge { .. } => PacketKind::LoginChallenge,
            Self::LoginChallengeResponse { .. } => PacketKind::LoginChallengeResponse,
            Self::SetCompression { .. } => PacketKind::SetCompression,
            Self::LoginSuccess { .. } => PacketKind::LoginSuccess,
            Self::LoginDisconnect { .. } => PacketKind::LoginDisconnect,
            Self::JoinGame { .. } => PacketKind::JoinGame,
            Self::ChatMessage { .. } => PacketKind::ChatMessage,
            Self::ClientChat { .. } => PacketKind::ClientChat,
            Self::ClientSettings { .. } => PacketKind::ClientSettings,
            Self::KeepAlive { .. } => PacketKind::KeepAlive,
            Self::KeepAliveResponse { .. } => PacketKind::KeepAliveResponse,
            Self::PlayerPosition { .. } => PacketKind::PlayerPosition,
            Self::PlayerPositionAndLook { .. } => PacketKind::PlayerPositionAndLook,
            Self::TeleportConfirm { .. } => PacketKind::TeleportConfirm,
            Self::Animation { .. } => PacketKind::Animation,
            Self::TimeUpdate { .. } => PacketKind::TimeUpdate,
            Self::UpdateHealth { .. } => PacketKind::UpdateHealth,
            Self::ClientCommand { .. } => PacketKind::ClientCommand,
            Self::SpawnEntity { .. } => PacketKind::SpawnEntity,
            Self::RemoveEntities { .. } => PacketKind::RemoveEntities,
            Self::BlockChange { .. } => PacketKind::BlockChange,
            Self::SoundEffect { .. } => PacketKind::SoundEffect,
            Self::Disconnect { .. } => PacketKind::Disconnect,
        }
    }

    /// Shorthand for `self.kind().state()`.
    pub fn state(&self) -> ProtocolState {
        self.kind().state()
    }
}

/// Status JSON as the backend sends it.
///
/// Only the fields the gateway reads are modelled; anything else in the
/// document is ignored.
#[cfg(feature = "json")]
pub mod status {
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    pub struct StatusVersion {
        pub name: String,
        pub protocol: i32,
    }

    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    pub struct StatusPlayers {
        pub max: u32,
        pub online: u32,
    }

    /// The description is either a bare string or a text component.
    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    #[serde(untagged)]
    pub enum StatusDescription {
        Plain(String),
        Component { text: String },
    }

    impl StatusDescription {
        pub fn text(&self) -> &str {
            match self {
                Self::Plain(s) => s,
                Self::Component { text } => text,
            }
        }
    }

    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    pub struct StatusJson {
        pub version: StatusVersion,
        pub players: StatusPlayers,
        pub description: StatusDescription,
    }

    impl StatusJson {
        pub fn parse(json: &str) -> Result<Self, crate::ProtocolError> {
            serde_json::from_str(json).map_err(crate::ProtocolError::Decode)
        }

        pub fn to_json(&self) -> Result<String, crate::ProtocolError> {
            serde_json::to_string(self).map_err(crate::ProtocolError::Encode)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_state_groups() {
        assert_eq!(PacketKind::Handshake.state(), ProtocolState::Handshake);
        assert_eq!(PacketKind::PongResponse.state(), ProtocolState::Status);
        assert_eq!(PacketKind::SetCompression.state(), ProtocolState::Login);
        assert_eq!(PacketKind::KeepAlive.state(), ProtocolState::Play);
        assert_eq!(
            Packet::Disconnect {
                reason: "x".into()
            }
            .state(),
            ProtocolState::Play
        );
    }

    #[cfg(feature = "json")]
    #[test]
    fn test_status_json_accepts_both_description_forms() {
        let plain = r#"{"version":{"name":"1.21.1","protocol":767},
            "players":{"max":101,"online":1},"description":"Test."}"#;
        let status = status::StatusJson::parse(plain).unwrap();
        assert_eq!(status.description.text(), "Test.");
        assert_eq!(status.players.max, 101);

        let component = r#"{"version":{"name":"1.21.1","protocol":767},
            "players":{"max":20,"online":0,"sample":[]},
            "description":{"text":"Hello"},"favicon":"data:"}"#;
        let status = status::StatusJson::parse(component).unwrap();
        assert_eq!(status.description.text(), "Hello");
    }

    #[cfg(feature = "json")]
    #[test]
    fn test_status_json_missing_players_is_error() {
        let bad = r#"{"version":{"name":"x","protocol":1},"description":"m"}"#;
        assert!(status::StatusJson::parse(bad).is_err());
    }
}
