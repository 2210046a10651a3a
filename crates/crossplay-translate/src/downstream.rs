//! Backend → client translators.

use crossplay_protocol::edition_a::{self, GameMode, MoveMode, TextKind};
use crossplay_protocol::edition_b::{self, ChatPosition, PacketKind};
use crossplay_protocol::{RuntimeId, Vec3};
use crossplay_session::SessionContext;

use crate::registry::TranslatorRegistryBuilder;
use crate::upstream::EYE_HEIGHT;
use crate::{MappingTables, TranslateError};

type Out = Result<Vec<edition_a::Packet>, TranslateError>;

const TICKS_PER_DAY: i64 = 24_000;

/// Backend sound coordinates are fixed-point with this many units per block.
const SOUND_POSITION_SCALE: f32 = 8.0;

pub(crate) fn register(builder: &mut TranslatorRegistryBuilder) {
    builder
        .downstream(PacketKind::ChatMessage, chat_message)
        .downstream(PacketKind::JoinGame, join_game)
        .downstream(PacketKind::KeepAlive, keep_alive)
        .downstream(PacketKind::PlayerPositionAndLook, player_position_and_look)
        .downstream(PacketKind::TimeUpdate, time_update)
        .downstream(PacketKind::UpdateHealth, update_health)
        .downstream(PacketKind::SpawnEntity, spawn_entity)
        .downstream(PacketKind::RemoveEntities, remove_entities)
        .downstream(PacketKind::BlockChange, block_change)
        .downstream(PacketKind::SoundEffect, sound_effect)
        .downstream(PacketKind::Disconnect, disconnect);
}

fn chat_message(packet: &edition_b::Packet, _ctx: &SessionContext, _m: &dyn MappingTables) -> Out {
    let edition_b::Packet::ChatMessage {
        message,
        sender,
        position,
    } = packet
    else {
        return Ok(Vec::new());
    };
    let body = message.to_legacy();
    let (kind, source, line) = match (sender, position) {
        (_, ChatPosition::GameInfo) => (TextKind::Tip, String::new(), body),
        (Some(sender), _) => (TextKind::Chat, sender.clone(), format!("{sender}: {body}")),
        (None, _) => (TextKind::System, String::new(), body),
    };
    Ok(vec![edition_a::Packet::Text {
        kind,
        source,
        message: line,
    }])
}

fn game_mode(raw: u8) -> GameMode {
    match raw {
        1 => GameMode::Creative,
        2 => GameMode::Adventure,
        3 => GameMode::Spectator,
        _ => GameMode::Survival,
    }
}

/// The backend numbers the nether -1 and the end 1; the client uses 1 and 2.
fn dimension(raw: i32) -> Result<i32, TranslateError> {
    match raw {
        0 => Ok(0),
        -1 => Ok(1),
        1 => Ok(2),
        other => Err(TranslateError::InvalidValue {
            field: "dimension",
            detail: other.to_string(),
        }),
    }
}

fn join_game(packet: &edition_b::Packet, ctx: &SessionContext, _m: &dyn MappingTables) -> Out {
    let edition_b::Packet::JoinGame {
        entity_id,
        game_mode: mode,
        dimension: dim,
        difficulty,
        view_distance,
        hardcore,
        ..
    } = packet
    else {
        return Ok(Vec::new());
    };
    let dimension = dimension(*dim)?;
    ctx.bind_player_entity(*entity_id);
    Ok(vec![
        edition_a::Packet::StartGame {
            runtime_id: RuntimeId::PLAYER,
            game_mode: game_mode(*mode),
            position: ctx.position().unwrap_or_default(),
            yaw: 0.0,
            pitch: 0.0,
            dimension,
            difficulty: *difficulty,
            hardcore: *hardcore,
        },
        edition_a::Packet::ChunkRadiusUpdated {
            radius: *view_distance,
        },
    ])
}

fn keep_alive(packet: &edition_b::Packet, _ctx: &SessionContext, _m: &dyn MappingTables) -> Out {
    let edition_b::Packet::KeepAlive { id } = packet else {
        return Ok(Vec::new());
    };
    let timestamp = u64::try_from(*id).map_err(|_| TranslateError::InvalidValue {
        field: "keep-alive id",
        detail: id.to_string(),
    })?;
    Ok(vec![edition_a::Packet::NetworkStackLatency {
        timestamp,
        needs_response: true,
    }])
}

fn player_position_and_look(packet: &edition_b::Packet, ctx: &SessionContext, _m: &dyn MappingTables) -> Out {
    let edition_b::Packet::PlayerPositionAndLook {
        x,
        y,
        z,
        yaw,
        pitch,
        teleport_id,
    } = packet
    else {
        return Ok(Vec::new());
    };
    let position = Vec3::new(*x as f32, *y as f32 + EYE_HEIGHT, *z as f32);
    if ![position.x, position.y, position.z].iter().all(|v| v.is_finite()) {
        return Err(TranslateError::InvalidValue {
            field: "position",
            detail: format!("{x} {y} {z}"),
        });
    }
    ctx.set_pending_teleport(*teleport_id);
    ctx.set_position(position);
    Ok(vec![edition_a::Packet::MovePlayer {
        runtime_id: RuntimeId::PLAYER,
        position,
        pitch: *pitch,
        yaw: *yaw,
        head_yaw: *yaw,
        mode: MoveMode::Teleport,
        on_ground: false,
    }])
}

fn time_update(packet: &edition_b::Packet, _ctx: &SessionContext, _m: &dyn MappingTables) -> Out {
    let edition_b::Packet::TimeUpdate { time_of_day, .. } = packet else {
        return Ok(Vec::new());
    };
    // A negative time of day means the daylight cycle is frozen at |t|.
    let time = time_of_day.unsigned_abs() % TICKS_PER_DAY as u64;
    Ok(vec![edition_a::Packet::SetTime { time: time as i32 }])
}

fn update_health(packet: &edition_b::Packet, _ctx: &SessionContext, _m: &dyn MappingTables) -> Out {
    let edition_b::Packet::UpdateHealth { health, .. } = packet else {
        return Ok(Vec::new());
    };
    if !health.is_finite() {
        return Err(TranslateError::InvalidValue {
            field: "health",
            detail: health.to_string(),
        });
    }
    Ok(vec![edition_a::Packet::SetHealth {
        health: health.ceil().max(0.0) as i32,
    }])
}

fn spawn_entity(packet: &edition_b::Packet, ctx: &SessionContext, m: &dyn MappingTables) -> Out {
    let edition_b::Packet::SpawnEntity {
        entity_id,
        entity_type,
        x,
        y,
        z,
        pitch,
        yaw,
        ..
    } = packet
    else {
        return Ok(Vec::new());
    };
    // Look the type up first so unmapped entities never consume an id.
    let identifier = m
        .entity_identifier(*entity_type)
        .ok_or(TranslateError::NoMapping {
            table: "entity",
            id: *entity_type,
        })?
        .to_string();
    let runtime_id = ctx.map_entity(*entity_id);
    Ok(vec![edition_a::Packet::AddEntity {
        runtime_id,
        identifier,
        position: Vec3::new(*x as f32, *y as f32, *z as f32),
        pitch: *pitch,
        yaw: *yaw,
    }])
}

fn remove_entities(packet: &edition_b::Packet, ctx: &SessionContext, _m: &dyn MappingTables) -> Out {
    let edition_b::Packet::RemoveEntities { entity_ids } = packet else {
        return Ok(Vec::new());
    };
    Ok(entity_ids
        .iter()
        .filter_map(|id| ctx.forget_entity(*id))
        .map(|runtime_id| edition_a::Packet::RemoveEntity { runtime_id })
        .collect())
}

fn block_change(packet: &edition_b::Packet, _ctx: &SessionContext, m: &dyn MappingTables) -> Out {
    let edition_b::Packet::BlockChange {
        position,
        block_state,
    } = packet
    else {
        return Ok(Vec::new());
    };
    let block_runtime_id = m.block(*block_state).ok_or(TranslateError::NoMapping {
        table: "block",
        id: *block_state,
    })?;
    Ok(vec![edition_a::Packet::UpdateBlock {
        position: *position,
        block_runtime_id,
    }])
}

fn sound_effect(packet: &edition_b::Packet, _ctx: &SessionContext, m: &dyn MappingTables) -> Out {
    let edition_b::Packet::SoundEffect {
        sound_id,
        x,
        y,
        z,
        volume,
        pitch,
    } = packet
    else {
        return Ok(Vec::new());
    };
    let sound = m.sound(*sound_id).ok_or(TranslateError::NoMapping {
        table: "sound",
        id: *sound_id,
    })?;
    Ok(vec![edition_a::Packet::LevelSoundEvent {
        sound,
        position: Vec3::new(
            *x as f32 / SOUND_POSITION_SCALE,
            *y as f32 / SOUND_POSITION_SCALE,
            *z as f32 / SOUND_POSITION_SCALE,
        ),
        volume: *volume,
        pitch: *pitch,
    }])
}

fn disconnect(packet: &edition_b::Packet, _ctx: &SessionContext, _m: &dyn MappingTables) -> Out {
    let edition_b::Packet::Disconnect { reason } = packet else {
        return Ok(Vec::new());
    };
    Ok(vec![edition_a::Packet::disconnect(reason.to_legacy())])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{EmptyMappings, StaticMappings};
    use crossplay_protocol::{BlockPos, SessionId, TextComponent};

    fn ctx() -> SessionContext {
        SessionContext::new(SessionId(1))
    }

    fn chat(sender: Option<&str>, message: &str, position: ChatPosition) -> edition_b::Packet {
        edition_b::Packet::ChatMessage {
            message: TextComponent::new(message),
            sender: sender.map(str::to_string),
            position,
        }
    }

    #[test]
    fn test_chat_with_sender_is_prefixed() {
        let out = chat_message(&chat(Some("Test"), "Test", ChatPosition::Chat), &ctx(), &EmptyMappings)
            .unwrap();
        assert_eq!(
            out,
            vec![edition_a::Packet::Text {
                kind: TextKind::Chat,
                source: "Test".into(),
                message: "Test: Test".into(),
            }]
        );
    }

    #[test]
    fn test_chat_without_sender_is_system() {
        let out = chat_message(&chat(None, "Server restarting", ChatPosition::System), &ctx(), &EmptyMappings)
            .unwrap();
        assert_eq!(out, vec![edition_a::Packet::system_text("Server restarting")]);
    }

    #[test]
    fn test_chat_game_info_is_tip() {
        let out = chat_message(&chat(Some("x"), "+1 XP", ChatPosition::GameInfo), &ctx(), &EmptyMappings)
            .unwrap();
        assert!(matches!(&out[0], edition_a::Packet::Text { kind: TextKind::Tip, message, .. } if message == "+1 XP"));
    }

    #[test]
    fn test_join_game_binds_player_and_sets_radius() {
        let c = ctx();
        let p = edition_b::Packet::JoinGame {
            entity_id: 321,
            game_mode: 1,
            dimension: -1,
            difficulty: 2,
            max_players: 20,
            view_distance: 10,
            hardcore: false,
        };
        let out = join_game(&p, &c, &EmptyMappings).unwrap();
        assert_eq!(out.len(), 2);
        assert!(matches!(
            out[0],
            edition_a::Packet::StartGame {
                runtime_id: RuntimeId::PLAYER,
                game_mode: GameMode::Creative,
                dimension: 1,
                ..
            }
        ));
        assert_eq!(out[1], edition_a::Packet::ChunkRadiusUpdated { radius: 10 });
        assert_eq!(c.runtime_id_for(321), Some(RuntimeId::PLAYER));
    }

    #[test]
    fn test_join_game_unknown_dimension_fails() {
        let p = edition_b::Packet::JoinGame {
            entity_id: 1,
            game_mode: 0,
            dimension: 7,
            difficulty: 0,
            max_players: 20,
            view_distance: 10,
            hardcore: false,
        };
        assert!(join_game(&p, &ctx(), &EmptyMappings).is_err());
    }

    #[test]
    fn test_keep_alive_needs_response() {
        let out = keep_alive(&edition_b::Packet::KeepAlive { id: 12 }, &ctx(), &EmptyMappings).unwrap();
        assert_eq!(
            out,
            vec![edition_a::Packet::NetworkStackLatency {
                timestamp: 12,
                needs_response: true
            }]
        );
        assert!(keep_alive(&edition_b::Packet::KeepAlive { id: -1 }, &ctx(), &EmptyMappings).is_err());
    }

    #[test]
    fn test_position_and_look_records_teleport_and_adds_eye_height() {
        let c = ctx();
        let p = edition_b::Packet::PlayerPositionAndLook {
            x: 1.0,
            y: 64.0,
            z: 2.0,
            yaw: 45.0,
            pitch: 0.0,
            teleport_id: 5,
        };
        let out = player_position_and_look(&p, &c, &EmptyMappings).unwrap();
        let edition_a::Packet::MovePlayer { position, mode, .. } = &out[0] else {
            panic!("expected MovePlayer");
        };
        assert_eq!(*mode, MoveMode::Teleport);
        assert!((position.y - 65.62).abs() < 1e-4);
        assert_eq!(c.take_pending_teleport(), Some(5));
    }

    #[test]
    fn test_time_update_wraps_into_one_day() {
        let p = edition_b::Packet::TimeUpdate {
            world_age: 0,
            time_of_day: -30_000,
        };
        let out = time_update(&p, &ctx(), &EmptyMappings).unwrap();
        assert_eq!(out, vec![edition_a::Packet::SetTime { time: 6_000 }]);
    }

    #[test]
    fn test_update_health_rounds_up() {
        let p = edition_b::Packet::UpdateHealth {
            health: 19.5,
            food: 20,
            saturation: 5.0,
        };
        let out = update_health(&p, &ctx(), &EmptyMappings).unwrap();
        assert_eq!(out, vec![edition_a::Packet::SetHealth { health: 20 }]);
    }

    #[test]
    fn test_spawn_entity_without_mapping_consumes_no_id() {
        let c = ctx();
        let p = edition_b::Packet::SpawnEntity {
            entity_id: 40,
            uuid: uuid::Uuid::nil(),
            entity_type: 90,
            x: 0.0,
            y: 0.0,
            z: 0.0,
            pitch: 0.0,
            yaw: 0.0,
        };
        let err = spawn_entity(&p, &c, &EmptyMappings).unwrap_err();
        assert!(err.is_unmapped());
        assert_eq!(c.entity_count(), 0);

        let m = StaticMappings::new().with_entity(90, "minecraft:pig");
        let out = spawn_entity(&p, &c, &m).unwrap();
        let edition_a::Packet::AddEntity { runtime_id, identifier, .. } = &out[0] else {
            panic!("expected AddEntity");
        };
        assert_eq!(identifier, "minecraft:pig");
        assert_eq!(c.runtime_id_for(40), Some(*runtime_id));
    }

    #[test]
    fn test_remove_entities_skips_unknown_ids() {
        let c = ctx();
        let a = c.map_entity(1);
        let b = c.map_entity(2);
        let p = edition_b::Packet::RemoveEntities {
            entity_ids: vec![1, 99, 2],
        };
        let out = remove_entities(&p, &c, &EmptyMappings).unwrap();
        assert_eq!(
            out,
            vec![
                edition_a::Packet::RemoveEntity { runtime_id: a },
                edition_a::Packet::RemoveEntity { runtime_id: b },
            ]
        );
    }

    #[test]
    fn test_block_change_uses_mapping() {
        let p = edition_b::Packet::BlockChange {
            position: BlockPos::new(1, 2, 3),
            block_state: 9,
        };
        assert!(block_change(&p, &ctx(), &EmptyMappings).unwrap_err().is_unmapped());
        let m = StaticMappings::new().with_block(9, 4242);
        assert_eq!(
            block_change(&p, &ctx(), &m).unwrap(),
            vec![edition_a::Packet::UpdateBlock {
                position: BlockPos::new(1, 2, 3),
                block_runtime_id: 4242,
            }]
        );
    }

    #[test]
    fn test_sound_effect_scales_position() {
        let p = edition_b::Packet::SoundEffect {
            sound_id: 3,
            x: 80,
            y: 16,
            z: -8,
            volume: 1.0,
            pitch: 1.0,
        };
        let m = StaticMappings::new().with_sound(3, 7);
        let out = sound_effect(&p, &ctx(), &m).unwrap();
        assert_eq!(
            out,
            vec![edition_a::Packet::LevelSoundEvent {
                sound: 7,
                position: Vec3::new(10.0, 2.0, -1.0),
                volume: 1.0,
                pitch: 1.0,
            }]
        );
    }

    #[test]
    fn test_disconnect_carries_reason() {
        let p = edition_b::Packet::Disconnect {
            reason: TextComponent::new("Kicked"),
        };
        assert_eq!(
            disconnect(&p, &ctx(), &EmptyMappings).unwrap(),
            vec![edition_a::Packet::disconnect("Kicked")]
        );
    }
}
