//! Packets of the client-facing edition.
//!
//! Every packet is one variant of [`Packet`]. The handler side never
//! matches on raw ids: [`Packet::kind`] returns a fieldless [`PacketKind`]
//! that dispatch tables are keyed by.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::{BlockPos, RuntimeId, Vec3};

/// A codec version the gateway can speak to clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CodecVersion {
    pub protocol: u32,
    pub name: &'static str,
}

/// Every client protocol version the gateway accepts, oldest first.
pub const SUPPORTED_VERSIONS: &[CodecVersion] = &[
    CodecVersion {
        protocol: 712,
        name: "1.21.20",
    },
    CodecVersion {
        protocol: 729,
        name: "1.21.30",
    },
    CodecVersion {
        protocol: 748,
        name: "1.21.40",
    },
];

/// The version advertised in discovery replies: the newest one supported.
pub const DEFAULT_VERSION: CodecVersion = SUPPORTED_VERSIONS[SUPPORTED_VERSIONS.len() - 1];

/// Picks the codec for a client's requested protocol. Exact matches only.
pub fn select_version(requested: u32) -> Option<CodecVersion> {
    SUPPORTED_VERSIONS
        .iter()
        .copied()
        .find(|v| v.protocol == requested)
}

/// Result codes carried by [`Packet::PlayStatus`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlayStatus {
    LoginSuccess,
    /// The client is older than anything we support.
    FailedClient,
    /// The client is newer than anything we support.
    FailedServer,
    PlayerSpawn,
    ServerFull,
}

/// The client's answer to the resource pack offer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PackResponse {
    Completed,
    NoneRequired,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TextKind {
    Raw,
    Chat,
    System,
    Tip,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MoveMode {
    Normal,
    Reset,
    Teleport,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AnimateAction {
    SwingArm,
    WakeUp,
    CriticalHit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RespawnState {
    Searching,
    ReadyToSpawn,
    ClientReady,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GameMode {
    Survival,
    Creative,
    Adventure,
    Spectator,
}

impl GameMode {
    pub fn label(self) -> &'static str {
        match self {
            Self::Survival => "Survival",
            Self::Creative => "Creative",
            Self::Adventure => "Adventure",
            Self::Spectator => "Spectator",
        }
    }
}

/// A client-facing packet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Packet {
    // -- Connection setup --
    RequestNetworkSettings {
        protocol_version: u32,
    },
    NetworkSettings {
        compression_threshold: u16,
    },
    /// Identity chain, already verified by the client's platform.
    Login {
        protocol_version: u32,
        username: String,
        uuid: Uuid,
        xuid: String,
        token: String,
    },
    /// Client capability data as a JSON object.
    ClientData {
        payload: String,
    },
    PlayStatus {
        status: PlayStatus,
    },
    ResourcePacksInfo {
        must_accept: bool,
        packs: Vec<String>,
    },
    ResourcePackClientResponse {
        status: PackResponse,
    },
    ResourcePackStack {
        must_accept: bool,
        packs: Vec<String>,
        game_version: String,
    },

    // -- Gameplay --
    StartGame {
        runtime_id: RuntimeId,
        game_mode: GameMode,
        position: Vec3,
        yaw: f32,
        pitch: f32,
        dimension: i32,
        difficulty: u8,
        hardcore: bool,
    },
    Text {
        kind: TextKind,
        source: String,
        message: String,
    },
    CommandRequest {
        command: String,
    },
    MovePlayer {
        runtime_id: RuntimeId,
        position: Vec3,
        pitch: f32,
        yaw: f32,
        head_yaw: f32,
        mode: MoveMode,
        on_ground: bool,
    },
    Animate {
        action: AnimateAction,
        runtime_id: RuntimeId,
    },
    RequestChunkRadius {
        radius: i32,
    },
    ChunkRadiusUpdated {
        radius: i32,
    },
    SetTime {
        time: i32,
    },
    SetHealth {
        health: i32,
    },
    Respawn {
        position: Vec3,
        state: RespawnState,
        runtime_id: RuntimeId,
    },
    AddEntity {
        runtime_id: RuntimeId,
        identifier: String,
        position: Vec3,
        pitch: f32,
        yaw: f32,
    },
    RemoveEntity {
        runtime_id: RuntimeId,
    },
    UpdateBlock {
        position: BlockPos,
        block_runtime_id: u32,
    },
    LevelSoundEvent {
        sound: u32,
        position: Vec3,
        volume: f32,
        pitch: f32,
    },
    /// Latency probe. With `needs_response` set the peer echoes it back.
    NetworkStackLatency {
        timestamp: u64,
        needs_response: bool,
    },
    Disconnect {
        hide_screen: bool,
        message: String,
    },
}

/// The fieldless tag of a [`Packet`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PacketKind {
    RequestNetworkSettings,
    NetworkSettings,
    Login,
    ClientData,
    PlayStatus,
    ResourcePacksInfo,
    ResourcePackClientResponse,
    ResourcePackStack,
    StartGame,
    Text,
    CommandRequest,
    MovePlayer,
    Animate,
    RequestChunkRadius,
    ChunkRadiusUpdated,
    SetTime,
    SetHealth,
    Respawn,
    AddEntity,
    RemoveEntity,
    UpdateBlock,
    LevelSoundEvent,
    NetworkStackLatency,
    Disconnect,
}

impl Packet {
    pub fn kind(&self) -> PacketKind {
        match self {
            Self::RequestNetworkSettings { .. } => PacketKind::RequestNetworkSettings,
            Self::NetworkSettings { .. } => PacketKind::NetworkSettings,
            Self::Login { .. } => PacketKind::Login,
            Self::ClientData { .. } => PacketKind::ClientData,
            Self::PlayStatus { .. } => PacketKind::PlayStatus,
            Self::ResourcePacksInfo { .. } => PacketKind::ResourcePacksInfo,
            Self::ResourcePackClientResponse { .. } => PacketKind::ResourcePackClientResponse,
            Self::ResourcePackStack { .. } => PacketKind::ResourcePackStack,
            Self::StartGame { .. } => PacketKind::StartGame,
            Self::Text { .. } => PacketKind::Text,
            Self::CommandRequest { .. } => PacketKind::CommandRequest,
            Self::MovePlayer { .. } => PacketKind::MovePlayer,
            Self::Animate { .. } => PacketKind::Animate,
            Self::RequestChunkRadius { .. } => PacketKind::RequestChunkRadius,
            Self::ChunkRadiusUpdated { .. } => PacketKind::ChunkRadiusUpdated,
            Self::SetTime { .. } => PacketKind::SetTime,
            Self::SetHealth { .. } => PacketKind::SetHealth,
            Self::Respawn { .. } => PacketKind::Respawn,
            Self::AddEntity { .. } => PacketKind::AddEntity,
            Self::RemoveEntity { .. } => PacketKind::RemoveEntity,
            Self::UpdateBlock { .. } => PacketKind::UpdateBlock,
            Self::LevelSoundEvent { .. } => PacketKind::LevelSoundEvent,
            Self::NetworkStackLatency { .. } => PacketKind::NetworkStackLatency,
            Self::Disconnect { .. } => PacketKind::Disconnect,
        }
    }

    /// Builds a disconnect packet showing `message` to the player.
    pub fn disconnect(message: impl Into<String>) -> Self {
        Self::Disconnect {
            hide_screen: false,
            message: message.into(),
        }
    }

    /// A plain system message for the chat window.
    pub fn system_text(message: impl Into<String>) -> Self {
        Self::Text {
            kind: TextKind::System,
            source: String::new(),
            message: message.into(),
        }
    }
}
