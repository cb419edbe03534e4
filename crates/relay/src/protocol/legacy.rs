use crate::chat::{ChatMessage, ChatScope, GLOBAL_CHANNEL};
use crate::exchange::{ExchangeEvent, ExchangeKind, Notice, NoticeKind};
use crate::module::Recipient;
use crate::net::{Packet, VarInt};
use crate::session::{Context, HandlerTable, Phase, Profile, SessionError};
use crate::world::WorldState;

use super::{Protocol, ProtocolKind};

pub mod id {
    pub const GAME_DATA: i32 = 0x00;
    pub const PRIVATE_MESSAGE: i32 = 0x02;
    pub const CHAT_MESSAGE: i32 = 0x03;
    pub const KICKED: i32 = 0x04;
    pub const ID: i32 = 0x07;
    pub const CREATE_PLAYER: i32 = 0x08;
    pub const DESTROY_PLAYER: i32 = 0x09;
    pub const SERVER_CLOSE: i32 = 0x0A;
    pub const SERVER_MESSAGE: i32 = 0x0B;
    pub const WORLD_DATA: i32 = 0x0C;
    pub const PING: i32 = 0x0D;
    pub const GAME_STATE_MESSAGE: i32 = 0x0E;
    pub const TRADE_REQUEST: i32 = 0x1E;
    pub const TRADE_JOIN: i32 = 0x1F;
    pub const TRADE_QUIT: i32 = 0x20;
    pub const TRADE_OFFER: i32 = 0x21;
    pub const TRADE_START: i32 = 0x22;
    pub const BATTLE_REQUEST: i32 = 0x32;
    pub const BATTLE_JOIN: i32 = 0x33;
    pub const BATTLE_QUIT: i32 = 0x34;
    pub const BATTLE_OFFER: i32 = 0x35;
    pub const BATTLE_START: i32 = 0x36;
    pub const BATTLE_CLIENT_DATA: i32 = 0x37;
    pub const BATTLE_HOST_DATA: i32 = 0x38;
    pub const BATTLE_END_ROUND_DATA: i32 = 0x39;
    pub const SERVER_INFO_DATA: i32 = 0x62;
    pub const SERVER_DATA_REQUEST: i32 = 0x63;
}

crate::packets! {
    pub enum LegacyPacket {
        id::GAME_DATA => GameData {
            game_mode: String,
            is_gamejolt: bool,
            account_id: i64,
            name: String,
            level: String,
            position: glam::Vec3,
            facing: VarInt,
            moving: bool,
            skin: String,
            busy: VarInt,
        },
        /// Client to server: `partner` is the recipient. Server to client:
        /// `partner` is the sender.
        id::PRIVATE_MESSAGE => PrivateMessage { partner: String, message: String },
        id::CHAT_MESSAGE => ChatMessage { message: String },
        id::KICKED => Kicked { reason: String },
        id::ID => Id { player_id: VarInt },
        id::CREATE_PLAYER => CreatePlayer { player_id: VarInt },
        id::DESTROY_PLAYER => DestroyPlayer { player_id: VarInt },
        id::SERVER_CLOSE => ServerClose { reason: String },
        id::SERVER_MESSAGE => ServerMessage { message: String },
        id::WORLD_DATA => WorldData { season: VarInt, weather: VarInt, time: String },
        id::PING => Ping {},
        id::GAME_STATE_MESSAGE => GameStateMessage { message: String },
        id::TRADE_REQUEST => TradeRequest { player_id: VarInt },
        id::TRADE_JOIN => TradeJoin { player_id: VarInt },
        id::TRADE_QUIT => TradeQuit { player_id: VarInt },
        id::TRADE_OFFER => TradeOffer { player_id: VarInt, data: String },
        id::TRADE_START => TradeStart { player_id: VarInt },
        id::BATTLE_REQUEST => BattleRequest { player_id: VarInt },
        id::BATTLE_JOIN => BattleJoin { player_id: VarInt },
        id::BATTLE_QUIT => BattleQuit { player_id: VarInt },
        id::BATTLE_OFFER => BattleOffer { player_id: VarInt, data: String },
        id::BATTLE_START => BattleStart { player_id: VarInt },
        id::BATTLE_CLIENT_DATA => BattleClientData { player_id: VarInt, data: String },
        id::BATTLE_HOST_DATA => BattleHostData { player_id: VarInt, data: String },
        id::BATTLE_END_ROUND_DATA => BattleEndRoundData { player_id: VarInt, data: String },
        id::SERVER_INFO_DATA => ServerInfoData {
            player_count: VarInt,
            max_players: VarInt,
            server_name: String,
            server_message: String,
            players: Vec<String>,
        },
        id::SERVER_DATA_REQUEST => ServerDataRequest {},
    }
}

/// Older plain-text-era client protocol. No encryption, no passwords, and
/// the player's whole state travels in one `GameData` packet.
#[derive(Debug, Clone, Copy, Default)]
pub struct LegacyProtocol;

type Ctx<'a> = Context<'a, LegacyProtocol>;
type HandlerResult = Result<(), SessionError>;

impl Protocol for LegacyProtocol {
    type Message = LegacyPacket;

    const KIND: ProtocolKind = ProtocolKind::Legacy;
    const ENCRYPTS: bool = false;

    fn handlers() -> HandlerTable<Self> {
        HandlerTable::new()
            .on(id::GAME_DATA, Phase::Handshake, game_data)
            .on(id::PING, Phase::Handshake, ping)
            .on(id::SERVER_DATA_REQUEST, Phase::Handshake, server_data_request)
            .on(id::CHAT_MESSAGE, Phase::Joined, chat_message)
            .on(id::PRIVATE_MESSAGE, Phase::Joined, private_message)
            .on(id::GAME_STATE_MESSAGE, Phase::Joined, game_state_message)
            .on(id::TRADE_REQUEST, Phase::Joined, trade)
            .on(id::TRADE_JOIN, Phase::Joined, trade)
            .on(id::TRADE_QUIT, Phase::Joined, trade)
            .on(id::TRADE_OFFER, Phase::Joined, trade)
            .on(id::TRADE_START, Phase::Joined, trade)
            .on(id::BATTLE_REQUEST, Phase::Joined, battle)
            .on(id::BATTLE_JOIN, Phase::Joined, battle)
            .on(id::BATTLE_QUIT, Phase::Joined, battle)
            .on(id::BATTLE_OFFER, Phase::Joined, battle)
            .on(id::BATTLE_START, Phase::Joined, battle)
            .on(id::BATTLE_CLIENT_DATA, Phase::Joined, battle)
            .on(id::BATTLE_HOST_DATA, Phase::Joined, battle)
            .on(id::BATTLE_END_ROUND_DATA, Phase::Joined, battle)
    }

    fn kick(reason: &str) -> LegacyPacket {
        LegacyPacket::Kicked {
            reason: reason.to_string(),
        }
    }

    fn own_id(id: i32) -> Option<LegacyPacket> {
        Some(LegacyPacket::Id {
            player_id: VarInt(id),
        })
    }

    fn create_player(id: i32) -> Option<LegacyPacket> {
        Some(LegacyPacket::CreatePlayer {
            player_id: VarInt(id),
        })
    }

    fn destroy_player(id: i32) -> Option<LegacyPacket> {
        Some(LegacyPacket::DestroyPlayer {
            player_id: VarInt(id),
        })
    }

    fn player_state(profile: &Profile) -> Option<LegacyPacket> {
        Some(LegacyPacket::GameData {
            game_mode: String::new(),
            is_gamejolt: profile.account_id.is_some(),
            account_id: profile.account_id.unwrap_or_default(),
            name: profile.name.clone(),
            level: profile.level.clone().unwrap_or_default(),
            position: profile.position,
            facing: VarInt(profile.facing),
            moving: profile.moving,
            skin: profile.skin.clone(),
            busy: VarInt(profile.busy),
        })
    }

    fn world_state(state: &WorldState) -> Option<LegacyPacket> {
        Some(LegacyPacket::WorldData {
            season: VarInt(state.season as i32),
            weather: VarInt(state.weather as i32),
            time: state.time.clone(),
        })
    }

    fn chat(message: &ChatMessage) -> Option<LegacyPacket> {
        match &message.scope {
            ChatScope::Channel(channel) if channel == GLOBAL_CHANNEL => {
                Some(LegacyPacket::ChatMessage {
                    message: message.text.clone(),
                })
            }
            ChatScope::Channel(_) => None,
            ChatScope::Private { .. } => Some(LegacyPacket::PrivateMessage {
                partner: message.sender_name.clone(),
                message: message.text.clone(),
            }),
        }
    }

    fn server_message(text: &str) -> Option<LegacyPacket> {
        Some(LegacyPacket::ServerMessage {
            message: text.to_string(),
        })
    }

    fn exchange_notice(notice: &Notice) -> Option<LegacyPacket> {
        let player_id = VarInt(notice.from);
        let packet = match (notice.kind, &notice.notice) {
            (_, NoticeKind::Failed { .. }) => return None,
            (ExchangeKind::Trade, NoticeKind::Offered { .. }) => {
                LegacyPacket::TradeRequest { player_id }
            }
            (ExchangeKind::Trade, NoticeKind::Started) => LegacyPacket::TradeJoin { player_id },
            (ExchangeKind::Trade, NoticeKind::Updated { payload, .. }) => LegacyPacket::TradeOffer {
                player_id,
                data: payload.clone(),
            },
            (ExchangeKind::Trade, NoticeKind::Confirmed | NoticeKind::Completed) => {
                LegacyPacket::TradeStart { player_id }
            }
            (ExchangeKind::Trade, NoticeKind::Refused | NoticeKind::Cancelled) => {
                LegacyPacket::TradeQuit { player_id }
            }
            (ExchangeKind::Battle, NoticeKind::Offered { .. }) => {
                LegacyPacket::BattleRequest { player_id }
            }
            (ExchangeKind::Battle, NoticeKind::Started) => LegacyPacket::BattleJoin { player_id },
            (ExchangeKind::Battle, NoticeKind::Updated { action, payload }) => {
                battle_update(*action, player_id, payload.clone())?
            }
            (
                ExchangeKind::Battle,
                NoticeKind::Confirmed
                | NoticeKind::Completed
                | NoticeKind::Refused
                | NoticeKind::Cancelled,
            ) => LegacyPacket::BattleQuit { player_id },
        };
        Some(packet)
    }
}

/// Rebuilds a relayed battle packet from the action it was recorded under.
fn battle_update(action: i32, player_id: VarInt, data: String) -> Option<LegacyPacket> {
    let packet = match action {
        id::BATTLE_OFFER => LegacyPacket::BattleOffer { player_id, data },
        id::BATTLE_START => LegacyPacket::BattleStart { player_id },
        id::BATTLE_CLIENT_DATA => LegacyPacket::BattleClientData { player_id, data },
        id::BATTLE_HOST_DATA => LegacyPacket::BattleHostData { player_id, data },
        id::BATTLE_END_ROUND_DATA => LegacyPacket::BattleEndRoundData { player_id, data },
        _ => return None,
    };
    Some(packet)
}

fn game_data(ctx: &mut Ctx<'_>, packet: Packet<LegacyPacket>) -> HandlerResult {
    let LegacyPacket::GameData {
        is_gamejolt,
        account_id,
        name,
        level,
        position,
        facing,
        moving,
        skin,
        busy,
        ..
    } = packet.message
    else {
        return Ok(());
    };

    if ctx.session.is_joined() {
        ctx.module.update_state(ctx.session, |profile| {
            profile.level = (!level.is_empty()).then_some(level);
            profile.position = position;
            profile.facing = facing.0;
            profile.moving = moving;
            profile.skin = skin;
            profile.busy = busy.0;
        });
        return Ok(());
    }

    ctx.negotiator.begin(name.trim(), ctx.module.hub().keys())?;
    ctx.session.update_profile(|profile| {
        profile.name = name.trim().to_string();
        profile.account_id = is_gamejolt.then_some(account_id);
        profile.level = (!level.is_empty()).then_some(level);
        profile.position = position;
        profile.facing = facing.0;
        profile.moving = moving;
        profile.skin = skin;
        profile.busy = busy.0;
    });
    ctx.join()
}

fn ping(_ctx: &mut Ctx<'_>, _packet: Packet<LegacyPacket>) -> HandlerResult {
    Ok(())
}

/// Server list query. Answers and hangs up unless the session already
/// joined.
fn server_data_request(ctx: &mut Ctx<'_>, _packet: Packet<LegacyPacket>) -> HandlerResult {
    let config = ctx.module.config();
    let players: Vec<String> = ctx
        .module
        .registry()
        .snapshot()
        .iter()
        .map(|session| session.name())
        .collect();
    ctx.reply(LegacyPacket::ServerInfoData {
        player_count: VarInt(players.len() as i32),
        max_players: VarInt(config.max_clients as i32),
        server_name: config.server_name.clone(),
        server_message: config.server_message.clone(),
        players,
    });
    if !ctx.session.is_joined() {
        ctx.session.stop();
    }
    Ok(())
}

fn chat_message(ctx: &mut Ctx<'_>, packet: Packet<LegacyPacket>) -> HandlerResult {
    if let LegacyPacket::ChatMessage { message } = packet.message {
        ctx.module.global_chat(ctx.session, &message);
    }
    Ok(())
}

fn private_message(ctx: &mut Ctx<'_>, packet: Packet<LegacyPacket>) -> HandlerResult {
    if let LegacyPacket::PrivateMessage { partner, message } = packet.message {
        ctx.module
            .private_chat(ctx.session, Recipient::Name(&partner), &message);
    }
    Ok(())
}

fn game_state_message(ctx: &mut Ctx<'_>, packet: Packet<LegacyPacket>) -> HandlerResult {
    if let LegacyPacket::GameStateMessage { message } = packet.message {
        let text = format!("The player {} {}", ctx.session.name(), message);
        ctx.module.hub().chat().announce(&text);
    }
    Ok(())
}

fn trade(ctx: &mut Ctx<'_>, packet: Packet<LegacyPacket>) -> HandlerResult {
    let kind = ExchangeKind::Trade;
    let event = match packet.message {
        LegacyPacket::TradeRequest { player_id } => {
            ctx.module.offer(kind, ctx.session, player_id.0, String::new());
            return Ok(());
        }
        LegacyPacket::TradeJoin { .. } => ExchangeEvent::Accept,
        LegacyPacket::TradeQuit { .. } => ExchangeEvent::Cancel,
        LegacyPacket::TradeOffer { data, .. } => ExchangeEvent::Update {
            action: id::TRADE_OFFER,
            payload: data,
        },
        LegacyPacket::TradeStart { .. } => ExchangeEvent::Confirm,
        _ => return Ok(()),
    };
    ctx.module.exchange(kind, ctx.session, event);
    Ok(())
}

fn battle(ctx: &mut Ctx<'_>, packet: Packet<LegacyPacket>) -> HandlerResult {
    let kind = ExchangeKind::Battle;
    let action = packet.id();
    let event = match packet.message {
        LegacyPacket::BattleRequest { player_id } => {
            ctx.module.offer(kind, ctx.session, player_id.0, String::new());
            return Ok(());
        }
        LegacyPacket::BattleJoin { .. } => ExchangeEvent::Accept,
        LegacyPacket::BattleQuit { .. } => ExchangeEvent::Cancel,
        LegacyPacket::BattleStart { .. } => ExchangeEvent::Update {
            action,
            payload: String::new(),
        },
        LegacyPacket::BattleOffer { data, .. }
        | LegacyPacket::BattleClientData { data, .. }
        | LegacyPacket::BattleHostData { data, .. }
        | LegacyPacket::BattleEndRoundData { data, .. } => ExchangeEvent::Update {
            action,
            payload: data,
        },
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
    fn test_ping_is_empty() {
        let bytes = Packet::new(3, LegacyPacket::Ping {}).to_frame_bytes();
        let (frame, used) = decode_frame(&bytes).unwrap().unwrap();
        assert_eq!(used, bytes.len());
        assert_eq!(frame.id, id::PING);
        assert_eq!(frame.origin, 3);
        assert!(frame.payload.is_empty());
    }

    #[test]
    fn test_private_chat_names_the_sender() {
        let message = ChatMessage::private(2, 1, "Ash", "hi");
        assert_eq!(
            LegacyProtocol::chat(&message),
            Some(LegacyPacket::PrivateMessage {
                partner: "Ash".into(),
                message: "hi".into()
            })
        );
        let channel = ChatMessage::channel("league", 1, "Ash", "hi");
        assert_eq!(LegacyProtocol::chat(&channel), None);
    }

    #[test]
    fn test_battle_updates_keep_their_packet() {
        let notice = Notice {
            to: 2,
            from: 1,
            kind: ExchangeKind::Battle,
            notice: NoticeKind::Updated {
                action: id::BATTLE_HOST_DATA,
                payload: "turn".into(),
            },
        };
        assert_eq!(
            LegacyProtocol::exchange_notice(&notice),
            Some(LegacyPacket::BattleHostData {
                player_id: VarInt(1),
                data: "turn".into()
            })
        );
    }

    #[test]
    fn test_profile_maps_to_game_data() {
        let profile = Profile {
            name: "Ash".into(),
            level: Some("route1.dat".into()),
            account_id: Some(77),
            busy: 2,
            ..Profile::default()
        };
        let Some(LegacyPacket::GameData {
            is_gamejolt,
            account_id,
            level,
            busy,
            ..
        }) = LegacyProtocol::player_state(&profile)
        else {
            panic!("expected game data");
        };
        assert!(is_gamejolt);
        assert_eq!(account_id, 77);
        assert_eq!(level, "route1.dat");
        assert_eq!(busy, VarInt(2));
    }
}
