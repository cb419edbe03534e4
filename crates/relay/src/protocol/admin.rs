use num_bigint::BigInt;

use crate::auth::{HandshakeError, VERIFICATION_TOKEN_LEN};
use crate::chat::{ChatMessage, ChatScope};
use crate::hub::PlayerSummary;
use crate::net::{CodecError, Packet, PacketReader, PacketWriter, VarInt, Wire};
use crate::session::{Context, HandlerTable, Phase, SessionError};

use super::{Protocol, ProtocolKind};

pub mod id {
    pub const AUTHORIZATION_REQUEST: i32 = 0x00;
    pub const AUTHORIZATION_RESPONSE: i32 = 0x01;
    pub const ENCRYPTION_REQUEST: i32 = 0x02;
    pub const ENCRYPTION_RESPONSE: i32 = 0x03;
    pub const AUTHORIZATION_PASSWORD: i32 = 0x04;
    pub const AUTHORIZATION_COMPLETE: i32 = 0x05;
    pub const AUTHORIZATION_DISCONNECT: i32 = 0x06;
    pub const PLAYER_LIST_REQUEST: i32 = 0x07;
    pub const PLAYER_LIST_RESPONSE: i32 = 0x08;
    pub const KICK_PLAYER: i32 = 0x09;
    pub const BROADCAST_MESSAGE: i32 = 0x0A;
    pub const CHAT_STREAM: i32 = 0x0B;
    pub const CHAT_FEED: i32 = 0x0C;
    pub const RESPONSE: i32 = 0x0D;
    pub const KICKED: i32 = 0x0E;
}

/// One row of the remote player list.
#[derive(Debug, Clone, PartialEq)]
pub struct PlayerEntry {
    pub module: String,
    pub id: i32,
    pub name: String,
    pub level: String,
    pub position: glam::Vec3,
    pub address: String,
}

impl From<PlayerSummary> for PlayerEntry {
    fn from(player: PlayerSummary) -> Self {
        Self {
            module: player.module.to_string(),
            id: player.id,
            name: player.name,
            level: player.level.unwrap_or_default(),
            position: player.position,
            address: player.addr.map(|a| a.to_string()).unwrap_or_default(),
        }
    }
}

impl Wire for PlayerEntry {
    fn write(&self, writer: &mut PacketWriter) {
        self.module.write(writer);
        VarInt(self.id).write(writer);
        self.name.write(writer);
        self.level.write(writer);
        self.position.write(writer);
        self.address.write(writer);
    }

    fn read(reader: &mut PacketReader<'_>) -> Result<Self, CodecError> {
        Ok(Self {
            module: String::read(reader)?,
            id: VarInt::read(reader)?.0,
            name: String::read(reader)?,
            level: String::read(reader)?,
            position: glam::Vec3::read(reader)?,
            address: String::read(reader)?,
        })
    }
}

crate::packets! {
    pub enum AdminPacket {
        id::AUTHORIZATION_REQUEST => AuthorizationRequest { name: String },
        id::AUTHORIZATION_RESPONSE => AuthorizationResponse { status: VarInt },
        id::ENCRYPTION_REQUEST => EncryptionRequest {
            modulus: BigInt,
            exponent: BigInt,
            token: [u8; VERIFICATION_TOKEN_LEN],
        },
        id::ENCRYPTION_RESPONSE => EncryptionResponse { shared_secret: Vec<u8>, token: Vec<u8> },
        id::AUTHORIZATION_PASSWORD => AuthorizationPassword { password_hash: String },
        id::AUTHORIZATION_COMPLETE => AuthorizationComplete {},
        id::AUTHORIZATION_DISCONNECT => AuthorizationDisconnect { reason: String },
        id::PLAYER_LIST_REQUEST => PlayerListRequest {},
        id::PLAYER_LIST_RESPONSE => PlayerListResponse { players: Vec<PlayerEntry> },
        id::KICK_PLAYER => KickPlayer { name: String, reason: String },
        id::BROADCAST_MESSAGE => BroadcastMessage { message: String },
        id::CHAT_STREAM => ChatStream { enabled: bool },
        id::CHAT_FEED => ChatFeed { channel: String, sender: String, message: String },
        id::RESPONSE => Response { message: String },
        id::KICKED => Kicked { reason: String },
    }
}

/// Remote administration. Admin sessions never show up as players; they
/// act on the other modules through the hub.
#[derive(Debug, Clone, Copy, Default)]
pub struct AdminProtocol;

type Ctx<'a> = Context<'a, AdminProtocol>;
type HandlerResult = Result<(), SessionError>;

impl Protocol for AdminProtocol {
    type Message = AdminPacket;

    const KIND: ProtocolKind = ProtocolKind::Admin;
    const VISIBLE: bool = false;
    const PASSWORD_STEP: bool = true;

    fn handlers() -> HandlerTable<Self> {
        HandlerTable::new()
            .on(id::AUTHORIZATION_REQUEST, Phase::Handshake, authorization_request)
            .on(id::ENCRYPTION_RESPONSE, Phase::Handshake, encryption_response)
            .on(id::AUTHORIZATION_PASSWORD, Phase::Handshake, authorization_password)
            .on(id::PLAYER_LIST_REQUEST, Phase::Joined, player_list)
            .on(id::KICK_PLAYER, Phase::Joined, kick_player)
            .on(id::BROADCAST_MESSAGE, Phase::Joined, broadcast_message)
            .on(id::CHAT_STREAM, Phase::Joined, chat_stream)
    }

    fn kick(reason: &str) -> AdminPacket {
        AdminPacket::Kicked {
            reason: reason.to_string(),
        }
    }

    fn auth_failure(reason: &str) -> AdminPacket {
        AdminPacket::AuthorizationDisconnect {
            reason: reason.to_string(),
        }
    }

    fn authorization_complete() -> Option<AdminPacket> {
        Some(AdminPacket::AuthorizationComplete {})
    }

    fn chat(message: &ChatMessage) -> Option<AdminPacket> {
        let ChatScope::Channel(channel) = &message.scope else {
            return None;
        };
        Some(AdminPacket::ChatFeed {
            channel: channel.clone(),
            sender: message.sender_name.clone(),
            message: message.text.clone(),
        })
    }

    fn server_message(text: &str) -> Option<AdminPacket> {
        Some(AdminPacket::Response {
            message: text.to_string(),
        })
    }
}

fn authorization_request(ctx: &mut Ctx<'_>, packet: Packet<AdminPacket>) -> HandlerResult {
    let AdminPacket::AuthorizationRequest { name } = packet.message else {
        return Ok(());
    };
    let greeting = ctx
        .negotiator
        .begin(name.trim(), ctx.module.hub().keys())?;
    ctx.session
        .update_profile(|profile| profile.name = name.trim().to_string());

    ctx.reply(AdminPacket::AuthorizationResponse {
        status: VarInt(greeting.status.bits() as i32),
    });
    if let Some(request) = greeting.encryption {
        ctx.reply(AdminPacket::EncryptionRequest {
            modulus: request.modulus,
            exponent: request.exponent,
            token: request.token,
        });
    }
    complete_if_ready(ctx)
}

fn encryption_response(ctx: &mut Ctx<'_>, packet: Packet<AdminPacket>) -> HandlerResult {
    let AdminPacket::EncryptionResponse {
        shared_secret,
        token,
    } = packet.message
    else {
        return Ok(());
    };
    let secret = ctx
        .negotiator
        .complete_encryption(ctx.module.hub().keys(), &shared_secret, &token)?;
    ctx.transport
        .enable_encryption(&secret)
        .map_err(HandshakeError::from)?;
    complete_if_ready(ctx)
}

fn authorization_password(ctx: &mut Ctx<'_>, packet: Packet<AdminPacket>) -> HandlerResult {
    let AdminPacket::AuthorizationPassword { password_hash } = packet.message else {
        return Ok(());
    };
    let Some(expected) = ctx.module.config().password_hash.as_deref() else {
        return Err(HandshakeError::OutOfOrder.into());
    };
    ctx.negotiator.verify_password(&password_hash, expected)?;
    complete_if_ready(ctx)
}

fn complete_if_ready(ctx: &mut Ctx<'_>) -> HandlerResult {
    if !ctx.negotiator.is_ready() {
        return Ok(());
    }
    ctx.join()
}

fn player_list(ctx: &mut Ctx<'_>, _packet: Packet<AdminPacket>) -> HandlerResult {
    let players = ctx
        .module
        .hub()
        .players()
        .into_iter()
        .map(PlayerEntry::from)
        .collect();
    ctx.reply(AdminPacket::PlayerListResponse { players });
    Ok(())
}

fn kick_player(ctx: &mut Ctx<'_>, packet: Packet<AdminPacket>) -> HandlerResult {
    let AdminPacket::KickPlayer { name, reason } = packet.message else {
        return Ok(());
    };
    let reason = if reason.is_empty() {
        "Kicked by an administrator.".to_string()
    } else {
        reason
    };
    let message = if ctx.module.hub().kick(&name, &reason) {
        log::info!("{} kicked {}: {}", ctx.session.name(), name, reason);
        format!("Kicked {name}.")
    } else {
        format!("The player with the name \"{name}\" doesn't exist.")
    };
    ctx.reply(AdminPacket::Response { message });
    Ok(())
}

fn broadcast_message(ctx: &mut Ctx<'_>, packet: Packet<AdminPacket>) -> HandlerResult {
    if let AdminPacket::BroadcastMessage { message } = packet.message {
        ctx.module.hub().server_message(&message);
        ctx.reply(AdminPacket::Response {
            message: "Message sent.".to_string(),
        });
    }
    Ok(())
}

fn chat_stream(ctx: &mut Ctx<'_>, packet: Packet<AdminPacket>) -> HandlerResult {
    let AdminPacket::ChatStream { enabled } = packet.message else {
        return Ok(());
    };
    let global = ctx.module.hub().chat().global();
    let message = if enabled {
        global.subscribe(ctx.session);
        "Chat stream enabled."
    } else {
        global.unsubscribe(ctx.session.key());
        "Chat stream disabled."
    };
    ctx.reply(AdminPacket::Response {
        message: message.to_string(),
    });
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::decode_frame;
    use crate::permissions::PermissionFlags;

    #[test]
    fn test_player_list_round_trip() {
        let summary = PlayerSummary {
            module: ProtocolKind::Legacy,
            id: 4,
            name: "Misty".into(),
            level: None,
            position: glam::Vec3::new(1.0, 0.0, -2.5),
            permissions: PermissionFlags::USER,
            addr: None,
        };
        let packet = Packet::server(AdminPacket::PlayerListResponse {
            players: vec![summary.into()],
        });
        let bytes = packet.to_frame_bytes();
        let (frame, _) = decode_frame(&bytes).unwrap().unwrap();
        let decoded = Packet::<AdminPacket>::from_frame(&frame).unwrap();
        let AdminPacket::PlayerListResponse { players } = decoded.message else {
            panic!("wrong packet");
        };
        assert_eq!(players.len(), 1);
        assert_eq!(players[0].module, "legacy");
        assert_eq!(players[0].name, "Misty");
        assert_eq!(players[0].level, "");
        assert_eq!(players[0].position.z, -2.5);
    }

    #[test]
    fn test_private_lines_are_not_streamed() {
        let message = ChatMessage::private(2, 1, "Ash", "secret");
        assert_eq!(AdminProtocol::chat(&message), None);
        let public = ChatMessage::channel("global", 1, "Ash", "hello");
        assert!(matches!(
            AdminProtocol::chat(&public),
            Some(AdminPacket::ChatFeed { ref sender, .. }) if sender == "Ash"
        ));
    }
}
