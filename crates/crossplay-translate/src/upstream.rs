//! Client → backend translators.

use crossplay_protocol::edition_a::{self, AnimateAction, PacketKind, RespawnState, TextKind};
use crossplay_protocol::edition_b::{self, ClientAction, Hand};
use crossplay_session::{DEFAULT_LANGUAGE, SessionContext};

use crate::registry::TranslatorRegistryBuilder;
use crate::{MappingTables, TranslateError};

type Out = Result<Vec<edition_b::Packet>, TranslateError>;

/// Distance from a player's feet to their eyes. Client positions are at
/// eye level, backend positions at the feet.
pub const EYE_HEIGHT: f32 = 1.62;

/// The backend drops chat lines longer than this.
pub const MAX_CHAT_LEN: usize = 256;

const MIN_VIEW_DISTANCE: i32 = 2;
const MAX_VIEW_DISTANCE: i32 = 32;

pub(crate) fn register(builder: &mut TranslatorRegistryBuilder) {
    builder
        .upstream(PacketKind::Text, text)
        .upstream(PacketKind::CommandRequest, command_request)
        .upstream(PacketKind::MovePlayer, move_player)
        .upstream(PacketKind::Animate, animate)
        .upstream(PacketKind::RequestChunkRadius, request_chunk_radius)
        .upstream(PacketKind::Respawn, respawn)
        .upstream(PacketKind::NetworkStackLatency, network_stack_latency);
}

fn truncate_chars(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => s[..idx].to_string(),
        None => s.to_string(),
    }
}

fn text(packet: &edition_a::Packet, _ctx: &SessionContext, _m: &dyn MappingTables) -> Out {
    let edition_a::Packet::Text { kind, message, .. } = packet else {
        return Ok(Vec::new());
    };
    if !matches!(kind, TextKind::Chat | TextKind::Raw) || message.trim().is_empty() {
        return Ok(Vec::new());
    }
    Ok(vec![edition_b::Packet::ClientChat {
        message: truncate_chars(message, MAX_CHAT_LEN),
    }])
}

fn command_request(packet: &edition_a::Packet, _ctx: &SessionContext, _m: &dyn MappingTables) -> Out {
    let edition_a::Packet::CommandRequest { command } = packet else {
        return Ok(Vec::new());
    };
    let body = command.trim().trim_start_matches('/');
    if body.is_empty() {
        return Ok(Vec::new());
    }
    Ok(vec![edition_b::Packet::ClientChat {
        message: truncate_chars(&format!("/{body}"), MAX_CHAT_LEN),
    }])
}

fn move_player(packet: &edition_a::Packet, ctx: &SessionContext, _m: &dyn MappingTables) -> Out {
    let edition_a::Packet::MovePlayer {
        position,
        pitch,
        yaw,
        on_ground,
        ..
    } = packet
    else {
        return Ok(Vec::new());
    };
    let finite = [position.x, position.y, position.z, *pitch, *yaw]
        .iter()
        .all(|v| v.is_finite());
    if !finite {
        return Err(TranslateError::InvalidValue {
            field: "position",
            detail: format!("{position:?} yaw {yaw} pitch {pitch}"),
        });
    }
    ctx.set_position(*position);

    let mut out = Vec::with_capacity(2);
    // The backend ignores movement until the last teleport is confirmed.
    if let Some(teleport_id) = ctx.take_pending_teleport() {
        out.push(edition_b::Packet::TeleportConfirm { teleport_id });
    }
    out.push(edition_b::Packet::PlayerPosition {
        x: f64::from(position.x),
        y: f64::from(position.y - EYE_HEIGHT),
        z: f64::from(position.z),
        yaw: *yaw,
        pitch: *pitch,
        on_ground: *on_ground,
    });
    Ok(out)
}

fn animate(packet: &edition_a::Packet, _ctx: &SessionContext, _m: &dyn MappingTables) -> Out {
    match packet {
        edition_a::Packet::Animate {
            action: AnimateAction::SwingArm,
            ..
        } => Ok(vec![edition_b::Packet::Animation { hand: Hand::Main }]),
        _ => Ok(Vec::new()),
    }
}

fn request_chunk_radius(packet: &edition_a::Packet, ctx: &SessionContext, _m: &dyn MappingTables) -> Out {
    let edition_a::Packet::RequestChunkRadius { radius } = packet else {
        return Ok(Vec::new());
    };
    let locale = ctx
        .client_data()
        .map(|d| d.locale())
        .unwrap_or_else(|| DEFAULT_LANGUAGE.to_ascii_lowercase());
    Ok(vec![edition_b::Packet::ClientSettings {
        locale,
        view_distance: (*radius).clamp(MIN_VIEW_DISTANCE, MAX_VIEW_DISTANCE) as u8,
        chat_colors: true,
        main_hand: Hand::Main,
    }])
}

fn respawn(packet: &edition_a::Packet, _ctx: &SessionContext, _m: &dyn MappingTables) -> Out {
    match packet {
        edition_a::Packet::Respawn {
            state: RespawnState::ClientReady,
            ..
        } => Ok(vec![edition_b::Packet::ClientCommand {
            action: ClientAction::Respawn,
        }]),
        _ => Ok(Vec::new()),
    }
}

fn network_stack_latency(packet: &edition_a::Packet, _ctx: &SessionContext, _m: &dyn MappingTables) -> Out {
    let edition_a::Packet::NetworkStackLatency {
        timestamp,
        needs_response,
    } = packet
    else {
        return Ok(Vec::new());
    };
    // Only echoes of our own probes carry a backend keep-alive id.
    if *needs_response {
        return Ok(Vec::new());
    }
    let id = i64::try_from(*timestamp).map_err(|_| TranslateError::InvalidValue {
        field: "timestamp",
        detail: timestamp.to_string(),
    })?;
    Ok(vec![edition_b::Packet::KeepAliveResponse { id }])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::EmptyMappings;
    use crossplay_protocol::{RuntimeId, SessionId, Vec3};
    use crossplay_protocol::edition_a::MoveMode;

    fn ctx() -> SessionContext {
        SessionContext::new(SessionId(1))
    }

    fn chat(kind: TextKind, message: &str) -> edition_a::Packet {
        edition_a::Packet::Text {
            kind,
            source: "Steve".into(),
            message: message.into(),
        }
    }

    fn moved(y: f32) -> edition_a::Packet {
        edition_a::Packet::MovePlayer {
            runtime_id: RuntimeId::PLAYER,
            position: Vec3::new(10.0, y, -4.0),
            pitch: 5.0,
            yaw: 90.0,
            head_yaw: 90.0,
            mode: MoveMode::Normal,
            on_ground: true,
        }
    }

    #[test]
    fn test_text_chat_becomes_client_chat() {
        let out = text(&chat(TextKind::Chat, "hello"), &ctx(), &EmptyMappings).unwrap();
        assert_eq!(out, vec![edition_b::Packet::ClientChat { message: "hello".into() }]);
    }

    #[test]
    fn test_text_non_chat_and_blank_are_dropped() {
        assert!(text(&chat(TextKind::Tip, "hi"), &ctx(), &EmptyMappings).unwrap().is_empty());
        assert!(text(&chat(TextKind::Chat, "   "), &ctx(), &EmptyMappings).unwrap().is_empty());
    }

    #[test]
    fn test_text_is_truncated_on_char_boundary() {
        let long = "é".repeat(300);
        let out = text(&chat(TextKind::Chat, &long), &ctx(), &EmptyMappings).unwrap();
        let edition_b::Packet::ClientChat { message } = &out[0] else {
            panic!("expected chat");
        };
        assert_eq!(message.chars().count(), MAX_CHAT_LEN);
    }

    #[test]
    fn test_command_request_gets_exactly_one_slash() {
        for input in ["tp 0 64 0", "/tp 0 64 0", "  /tp 0 64 0 "] {
            let p = edition_a::Packet::CommandRequest { command: input.into() };
            let out = command_request(&p, &ctx(), &EmptyMappings).unwrap();
            assert_eq!(
                out,
                vec![edition_b::Packet::ClientChat { message: "/tp 0 64 0".into() }]
            );
        }
    }

    #[test]
    fn test_move_player_removes_eye_height() {
        let c = ctx();
        let out = move_player(&moved(65.62), &c, &EmptyMappings).unwrap();
        let [edition_b::Packet::PlayerPosition { y, on_ground, .. }] = out.as_slice() else {
            panic!("expected a single position packet, got {out:?}");
        };
        assert!((*y - 64.0).abs() < 1e-4);
        assert!(*on_ground);
        assert_eq!(c.position().map(|p| p.x), Some(10.0));
    }

    #[test]
    fn test_move_player_confirms_pending_teleport_first() {
        let c = ctx();
        c.set_pending_teleport(7);
        let out = move_player(&moved(70.0), &c, &EmptyMappings).unwrap();
        assert_eq!(out[0], edition_b::Packet::TeleportConfirm { teleport_id: 7 });
        assert!(matches!(out[1], edition_b::Packet::PlayerPosition { .. }));
        // Confirmed once only.
        let out = move_player(&moved(70.0), &c, &EmptyMappings).unwrap();
        assert_eq!(out.len(), 1);
    }

    #[test]
    fn test_move_player_rejects_nan() {
        let err = move_player(&moved(f32::NAN), &ctx(), &EmptyMappings).unwrap_err();
        assert!(!err.is_unmapped());
    }

    #[test]
    fn test_animate_only_swing_is_forwarded() {
        let swing = edition_a::Packet::Animate {
            action: AnimateAction::SwingArm,
            runtime_id: RuntimeId::PLAYER,
        };
        let wake = edition_a::Packet::Animate {
            action: AnimateAction::WakeUp,
            runtime_id: RuntimeId::PLAYER,
        };
        assert_eq!(animate(&swing, &ctx(), &EmptyMappings).unwrap().len(), 1);
        assert!(animate(&wake, &ctx(), &EmptyMappings).unwrap().is_empty());
    }

    #[test]
    fn test_chunk_radius_is_clamped_and_uses_default_locale() {
        let p = edition_a::Packet::RequestChunkRadius { radius: 96 };
        let out = request_chunk_radius(&p, &ctx(), &EmptyMappings).unwrap();
        assert_eq!(
            out,
            vec![edition_b::Packet::ClientSettings {
                locale: "en_us".into(),
                view_distance: 32,
                chat_colors: true,
                main_hand: Hand::Main,
            }]
        );
    }

    #[test]
    fn test_respawn_only_when_client_ready() {
        let ready = edition_a::Packet::Respawn {
            position: Vec3::default(),
            state: RespawnState::ClientReady,
            runtime_id: RuntimeId::PLAYER,
        };
        let searching = edition_a::Packet::Respawn {
            position: Vec3::default(),
            state: RespawnState::Searching,
            runtime_id: RuntimeId::PLAYER,
        };
        assert_eq!(respawn(&ready, &ctx(), &EmptyMappings).unwrap().len(), 1);
        assert!(respawn(&searching, &ctx(), &EmptyMappings).unwrap().is_empty());
    }

    #[test]
    fn test_latency_echo_becomes_keep_alive_response() {
        let echo = edition_a::Packet::NetworkStackLatency {
            timestamp: 99,
            needs_response: false,
        };
        let probe = edition_a::Packet::NetworkStackLatency {
            timestamp: 99,
            needs_response: true,
        };
        assert_eq!(
            network_stack_latency(&echo, &ctx(), &EmptyMappings).unwrap(),
            vec![edition_b::Packet::KeepAliveResponse { id: 99 }]
        );
        assert!(network_stack_latency(&probe, &ctx(), &EmptyMappings).unwrap().is_empty());
    }
}
