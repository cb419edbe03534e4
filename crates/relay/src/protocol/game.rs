use num_bigint::BigInt;

use crate::auth::{HandshakeError, VERIFICATION_TOKEN_LEN};
use crate::chat::{ChatMessage, ChatScope, GLOBAL_CHANNEL};
use crate::exchange::{ExchangeEvent, ExchangeKind, Notice, NoticeKind};
use crate::module::Recipient;
use crate::net::{Packet, VarInt};
use crate::session::{Context, HandlerTable, Phase, Profile, SessionError};
use crate::world::WorldState;

use super::{Protocol, ProtocolKind};

pub mod id {
    pub const KEEP_ALIVE: i32 = 0x00;
    pub const AUTHORIZATION_REQUEST: i32 = 0x01;
    pub const AUTHORIZATION_RESPONSE: i32 = 0x02;
    pub const ENCRYPTION_REQUEST: i32 = 0x03;
    pub const ENCRYPTION_RESPONSE: i32 = 0x04;
    pub const AUTHORIZATION_COMPLETE: i32 = 0x05;
    pub const AUTHORIZATION_DISCONNECT: i32 = 0x06;
    pub const KICK: i32 = 0x07;
    pub const CREATE_PLAYER: i32 = 0x08;
    pub const DESTROY_PLAYER: i32 = 0x09;
    pub const OWN_ID: i32 = 0x0A;
    pub const PLAYER_STATE: i32 = 0x0B;
    pub const WORLD_STATE: i32 = 0x0C;
    pub const CHAT_GLOBAL: i32 = 0x0D;
    pub const CHAT_PRIVATE: i32 = 0x0E;
    pub const CHAT_CHANNEL_JOIN: i32 = 0x0F;
    pub const CHAT_CHANNEL_LEAVE: i32 = 0x10;
    pub const CHAT_CHANNEL_MESSAGE: i32 = 0x11;
    pub const SERVER_MESSAGE: i32 = 0x12;
    pub const TRADE_OFFER: i32 = 0x13;
    pub const TRADE_ACCEPT: i32 = 0x14;
    pub const TRADE_REFUSE: i32 = 0x15;
    pub const TRADE_CANCEL: i32 = 0x16;
    pub const TRADE_UPDATE: i32 = 0x17;
    pub const TRADE_CONFIRM: i32 = 0x18;
    pub const TRADE_COMPLETE: i32 = 0x19;
    pub const BATTLE_REQUEST: i32 = 0x1A;
    pub const BATTLE_ACCEPT: i32 = 0x1B;
    pub const BATTLE_ACTION: i32 = 0x1C;
    pub const BATTLE_FLEE: i32 = 0x1D;
    pub const BATTLE_END: i32 = 0x1E;
    pub const BATTLE_CANCELLED: i32 = 0x1F;
}

crate::packets! {
    pub enum GamePacket {
        id::KEEP_ALIVE => KeepAlive { value: VarInt },
        id::AUTHORIZATION_REQUEST => AuthorizationRequest { name: String, password_hash: String },
        id::AUTHORIZATION_RESPONSE => AuthorizationResponse { status: VarInt },
        id::ENCRYPTION_REQUEST => EncryptionRequest {
            modulus: BigInt,
            exponent: BigInt,
            token: [u8; VERIFICATION_TOKEN_LEN],
        },
        id::ENCRYPTION_RESPONSE => EncryptionResponse { shared_secret: Vec<u8>, token: Vec<u8> },
        id::AUTHORIZATION_COMPLETE => AuthorizationComplete {},
        id::AUTHORIZATION_DISCONNECT => AuthorizationDisconnect { reason: String },
        id::KICK => Kick { reason: String },
        id::CREATE_PLAYER => CreatePlayer { player_id: VarInt },
        id::DESTROY_PLAYER => DestroyPlayer { player_id: VarInt },
        id::OWN_ID => OwnId { player_id: VarInt },
        id::PLAYER_STATE => PlayerState {
            name: String,
            level: String,
            position: glam::Vec3,
            facing: VarInt,
            moving: bool,
            skin: String,
        },
        id::WORLD_STATE => WorldState { season: VarInt, weather: VarInt, time: String },
        id::CHAT_GLOBAL => ChatGlobal { sender: String, message: String },
        id::CHAT_PRIVATE => ChatPrivate { player_id: VarInt, sender: String, message: String },
        id::CHAT_CHANNEL_JOIN => ChatChannelJoin { channel: String },
        id::CHAT_CHANNEL_LEAVE => ChatChannelLeave { channel: String },
        id::CHAT_CHANNEL_MESSAGE => ChatChannelMessage { channel: String, sender: String, message: String },
        id::SERVER_MESSAGE => ServerMessage { message: String },
        id::TRADE_OFFER => TradeOffer { player_id: VarInt, monster: String },
        id::TRADE_ACCEPT => TradeAccept { player_id: VarInt },
        id::TRADE_REFUSE => TradeRefuse { player_id: VarInt },
        id::TRADE_CANCEL => TradeCancel { player_id: VarInt },
        id::TRADE_UPDATE => TradeUpdate { player_id: VarInt, monster: String },
        id::TRADE_CONFIRM => TradeConfirm { player_id: VarInt },
        id::TRADE_COMPLETE => TradeComplete { player_id: VarInt },
        id::BATTLE_REQUEST => BattleRequest { player_id: VarInt, message: String },
        id::BATTLE_ACCEPT => BattleAccept { player_id: VarInt, accepted: bool },
        id::BATTLE_ACTION => BattleAction { player_id: VarInt, action: VarInt, data: String },
        id::BATTLE_FLEE => BattleFlee { player_id: VarInt },
        id::BATTLE_END => BattleEnd { player_id: VarInt },
        id::BATTLE_CANCELLED => BattleCancelled { reason: String },
    }
}

/// Current-generation player protocol with optional encryption.
#[derive(Debug, Clone, Copy, Default)]
pub struct GameProtocol;

type Ctx<'a> = Context<'a, GameProtocol>;
type HandlerResult = Result<(), SessionError>;

impl Protocol for GameProtocol {
    type Message = GamePacket;

    const KIND: ProtocolKind = ProtocolKind::Game;
    const CHECKS_PASSWORD: bool = true;

    fn handlers() -> HandlerTable<Self> {
        HandlerTable::new()
            .on(id::KEEP_ALIVE, Phase::Handshake, keep_alive)
            .on(id::AUTHORIZATION_REQUEST, Phase::Handshake, authorization_request)
            .on(id::ENCRYPTION_RESPONSE, Phase::Handshake, encryption_response)
            .on(id::PLAYER_STATE, Phase::Joined, player_state)
            .on(id::CHAT_GLOBAL, Phase::Joined, chat_global)
            .on(id::CHAT_PRIVATE, Phase::Joined, chat_private)
            .on(id::CHAT_CHANNEL_JOIN, Phase::Joined, chat_channel_join)
            .on(id::CHAT_CHANNEL_LEAVE, Phase::Joined, chat_channel_leave)
            .on(id::CHAT_CHANNEL_MESSAGE, Phase::Joined, chat_channel_message)
            .on(id::TRADE_OFFER, Phase::Joined, trade)
            .on(id::TRADE_ACCEPT, Phase::Joined, trade)
            .on(id::TRADE_REFUSE, Phase::Joined, trade)
            .on(id::TRADE_CANCEL, Phase::Joined, trade)
            .on(id::TRADE_UPDATE, Phase::Joined, trade)
            .on(id::TRADE_CONFIRM, Phase::Joined, trade)
            .on(id::BATTLE_REQUEST, Phase::Joined, battle)
            .on(id::BATTLE_ACCEPT, Phase::Joined, battle)
            .on(id::BATTLE_ACTION, Phase::Joined, battle)
            .on(id::BATTLE_FLEE, Phase::Joined, battle)
            .on(id::BATTLE_END, Phase::Joined, battle)
    }

    fn kick(reason: &str) -> GamePacket {
        GamePacket::Kick {
            reason: reason.to_string(),
        }
    }

    fn auth_failure(reason: &str) -> GamePacket {
        GamePacket::AuthorizationDisconnect {
            reason: reason.to_string(),
        }
    }

    fn authorization_complete() -> Option<GamePacket> {
        Some(GamePacket::AuthorizationComplete {})
    }

    fn own_id(id: i32) -> Option<GamePacket> {
        Some(GamePacket::OwnId {
            player_id: VarInt(id),
        })
    }

    fn create_player(id: i32) -> Option<GamePacket> {
        Some(GamePacket::CreatePlayer {
            player_id: VarInt(id),
        })
    }

    fn destroy_player(id: i32) -> Option<GamePacket> {
        Some(GamePacket::DestroyPlayer {
            player_id: VarInt(id),
        })
    }

    fn player_state(profile: &Profile) -> Option<GamePacket> {
        Some(GamePacket::PlayerState {
            name: profile.name.clone(),
            level: profile.level.clone().unwrap_or_default(),
            position: profile.position,
            facing: VarInt(profile.facing),
            moving: profile.moving,
            skin: profile.skin.clone(),
        })
    }

    fn world_state(state: &WorldState) -> Option<GamePacket> {
        Some(GamePacket::WorldState {
            season: VarInt(state.season as i32),
            weather: VarInt(state.weather as i32),
            time: state.time.clone(),
        })
    }

    fn chat(message: &ChatMessage) -> Option<GamePacket> {
        let sender = message.sender_name.clone();
        let text = message.text.clone();
        Some(match &message.scope {
            ChatScope::Channel(_) if message.is_from_server() => {
                GamePacket::ServerMessage { message: text }
            }
            ChatScope::Channel(channel) if channel == GLOBAL_CHANNEL => GamePacket::ChatGlobal {
                sender,
                message: text,
            },
            ChatScope::Channel(channel) => GamePacket::ChatChannelMessage {
                channel: channel.clone(),
                sender,
                message: text,
            },
            ChatScope::Private { recipient } => GamePacket::ChatPrivate {
                player_id: VarInt(*recipient),
                sender,
                message: text,
            },
        })
    }

    fn server_message(text: &str) -> Option<GamePacket> {
        Some(GamePacket::ServerMessage {
            message: text.to_string(),
        })
    }

    fn exchange_notice(notice: &Notice) -> Option<GamePacket> {
        let player_id = VarInt(notice.from);
        let packet = match (notice.kind, &notice.notice) {
            (ExchangeKind::Trade, NoticeKind::Offered { payload }) => GamePacket::TradeOffer {
                player_id,
                monster: payload.clone(),
            },
            (ExchangeKind::Trade, NoticeKind::Started) => GamePacket::TradeAccept { player_id },
            (ExchangeKind::Trade, NoticeKind::Updated { payload, .. }) => GamePacket::TradeUpdate {
                player_id,
                monster: payload.clone(),
            },
            (ExchangeKind::Trade, NoticeKind::Confirmed) => GamePacket::TradeConfirm { player_id },
            (ExchangeKind::Trade, NoticeKind::Completed) => GamePacket::TradeComplete { player_id },
            (ExchangeKind::Trade, NoticeKind::Refused) => GamePacket::TradeRefuse { player_id },
            (ExchangeKind::Trade, NoticeKind::Cancelled) => GamePacket::TradeCancel { player_id },
            (ExchangeKind::Trade, NoticeKind::Failed { .. }) => return None,
            (ExchangeKind::Battle, NoticeKind::Offered { payload }) => GamePacket::BattleRequest {
                player_id,
                message: payload.clone(),
            },
            (ExchangeKind::Battle, NoticeKind::Started) => GamePacket::BattleAccept {
                player_id,
                accepted: true,
            },
            (ExchangeKind::Battle, NoticeKind::Refused) => GamePacket::BattleAccept {
                player_id,
                accepted: false,
            },
            (ExchangeKind::Battle, NoticeKind::Updated { action, payload }) => {
                GamePacket::BattleAction {
                    player_id,
                    action: VarInt(*action),
                    data: payload.clone(),
                }
            }
            (ExchangeKind::Battle, NoticeKind::Completed) => GamePacket::BattleEnd { player_id },
            (ExchangeKind::Battle, NoticeKind::Confirmed) => return None,
            (ExchangeKind::Battle, NoticeKind::Cancelled) => GamePacket::BattleCancelled {
                reason: "The battle was cancelled.".to_string(),
            },
            (ExchangeKind::Battle, NoticeKind::Failed { reason }) => GamePacket::BattleCancelled {
                reason: reason.clone(),
            },
        };
        Some(packet)
    }
}

fn keep_alive(_ctx: &mut Ctx<'_>, _packet: Packet<GamePacket>) -> HandlerResult {
    Ok(())
}

fn authorization_request(ctx: &mut Ctx<'_>, packet: Packet<GamePacket>) -> HandlerResult {
    let GamePacket::AuthorizationRequest {
        name,
        password_hash,
    } = packet.message
    else {
        return Ok(());
    };
    let greeting = ctx
        .negotiator
        .begin(name.trim(), ctx.module.hub().keys())?;
    ctx.session.update_profile(|profile| {
        profile.name = name.trim().to_string();
        profile.password_hash = (!password_hash.is_empty()).then(|| password_hash.to_lowercase());
    });

    ctx.reply(GamePacket::AuthorizationResponse {
        status: VarInt(greeting.status.bits() as i32),
    });
    match greeting.encryption {
        Some(request) => {
            ctx.reply(GamePacket::EncryptionRequest {
                modulus: request.modulus,
                exponent: request.exponent,
                token: request.token,
            });
            Ok(())
        }
        None => ctx.join(),
    }
}

fn encryption_response(ctx: &mut Ctx<'_>, packet: Packet<GamePacket>) -> HandlerResult {
    let GamePacket::EncryptionResponse {
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
    ctx.join()
}

fn player_state(ctx: &mut Ctx<'_>, packet: Packet<GamePacket>) -> HandlerResult {
    let GamePacket::PlayerState {
        level,
        position,
        facing,
        moving,
        skin,
        ..
    } = packet.message
    else {
        return Ok(());
    };
    ctx.module.update_state(ctx.session, |profile| {
        profile.level = (!level.is_empty()).then_some(level);
        profile.position = position;
        profile.facing = facing.0;
        profile.moving = moving;
        profile.skin = skin;
    });
    Ok(())
}

fn chat_global(ctx: &mut Ctx<'_>, packet: Packet<GamePacket>) -> HandlerResult {
    if let GamePacket::ChatGlobal { message, .. } = packet.message {
        ctx.module.global_chat(ctx.session, &message);
    }
    Ok(())
}

fn chat_private(ctx: &mut Ctx<'_>, packet: Packet<GamePacket>) -> HandlerResult {
    if let GamePacket::ChatPrivate {
        player_id, message, ..
    } = packet.message
    {
        ctx.module
            .private_chat(ctx.session, Recipient::Id(player_id.0), &message);
    }
    Ok(())
}

fn chat_channel_join(ctx: &mut Ctx<'_>, packet: Packet<GamePacket>) -> HandlerResult {
    if let GamePacket::ChatChannelJoin { channel } = packet.message {
        ctx.module.join_channel(ctx.session, &channel);
    }
    Ok(())
}

fn chat_channel_leave(ctx: &mut Ctx<'_>, packet: Packet<GamePacket>) -> HandlerResult {
    if let GamePacket::ChatChannelLeave { channel } = packet.message {
        ctx.module.leave_channel(ctx.session, &channel);
    }
    Ok(())
}

fn chat_channel_message(ctx: &mut Ctx<'_>, packet: Packet<GamePacket>) -> HandlerResult {
    if let GamePacket::ChatChannelMessage {
        channel, message, ..
    } = packet.message
    {
        ctx.module.channel_chat(ctx.session, &channel, &message);
    }
    Ok(())
}

fn trade(ctx: &mut Ctx<'_>, packet: Packet<GamePacket>) -> HandlerResult {
    let kind = ExchangeKind::Trade;
    let event = match packet.message {
        GamePacket::TradeOffer { player_id, monster } => {
            ctx.module.offer(kind, ctx.session, player_id.0, monster);
            return Ok(());
        }
        GamePacket::TradeAccept { .. } => ExchangeEvent::Accept,
        GamePacket::TradeRefuse { .. } => ExchangeEvent::Refuse,
        GamePacket::TradeCancel { .. } => ExchangeEvent::Cancel,
        GamePacket::TradeUpdate { monster, .. } => ExchangeEvent::Update {
            action: id::TRADE_UPDATE,
            payload: monster,
        },
        GamePacket::TradeConfirm { .. } => ExchangeEvent::Confirm,
        _ => return Ok(()),
    };
    ctx.module.exchange(kind, ctx.session, event);
    Ok(())
}

fn battle(ctx: &mut Ctx<'_>, packet: Packet<GamePacket>) -> HandlerResult {
    let kind = ExchangeKind::Battle;
    let event = match packet.message {
        GamePacket::BattleRequest { player_id, message } => {
            ctx.module.offer(kind, ctx.session, player_id.0, message);
            return Ok(());
        }
        GamePacket::BattleAccept { accepted: true, .. } => ExchangeEvent::Accept,
        GamePacket::BattleAccept { accepted: false, .. } => ExchangeEvent::Refuse,
        GamePacket::BattleAction { action, data, .. } => ExchangeEvent::Update {
            action: action.0,
            payload: data,
        },
        GamePacket::BattleFlee { .. } => ExchangeEvent::Cancel,
        GamePacket::BattleEnd { .. } => ExchangeEvent::Confirm,
        _ => return Ok(()),
    };
    ctx.module.exchange(kind, ctx.session, event);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::decode_frame;

    #[test]
    fn test_handler_table_covers_client_packets() {
        let handlers = GameProtocol::handlers();
        assert!(handlers.contains(id::AUTHORIZATION_REQUEST));
        assert!(!handlers.contains(id::KICK));
        assert_eq!(handlers.len(), 20);
    }

    #[test]
    fn test_encryption_request_layout() {
        let packet = Packet::server(GamePacket::EncryptionRequest {
            modulus: BigInt::from(255),
            exponent: BigInt::from(3),
            token: [1, 2, 3, 4],
        });
        let bytes = packet.to_frame_bytes();
        let (frame, _) = decode_frame(&bytes).unwrap().unwrap();
        assert_eq!(frame.id, id::ENCRYPTION_REQUEST);
        // 255 needs a sign byte: [2, 0x00, 0xFF], then [1, 0x03], then the raw token.
        assert_eq!(frame.payload, vec![2, 0x00, 0xFF, 1, 0x03, 1, 2, 3, 4]);
        assert_eq!(Packet::<GamePacket>::from_frame(&frame).unwrap(), packet);
    }

    #[test]
    fn test_server_chat_becomes_server_message() {
        let packet = GameProtocol::chat(&ChatMessage::server(GLOBAL_CHANNEL, "Player Ash joined the game!"));
        assert_eq!(
            packet,
            Some(GamePacket::ServerMessage {
                message: "Player Ash joined the game!".into()
            })
        );
    }

    #[test]
    fn test_failed_trade_falls_back_to_chat() {
        let notice = Notice {
            to: 1,
            from: 1,
            kind: ExchangeKind::Trade,
            notice: NoticeKind::Failed {
                reason: "nope".into(),
            },
        };
        assert!(GameProtocol::exchange_notice(&notice).is_none());

        let battle = Notice {
            kind: ExchangeKind::Battle,
            ..notice
        };
        assert_eq!(
            GameProtocol::exchange_notice(&battle),
            Some(GamePacket::BattleCancelled {
                reason: "nope".into()
            })
        );
    }
}
