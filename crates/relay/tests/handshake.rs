mod common;

use std::io::Write;
use std::sync::Arc;

use relay::auth::{hash_password, random_secret, seal_for};
use relay::net::{MemoryPipe, VarInt, encode_frame};
use relay::protocol::admin::{AdminPacket, AdminProtocol};
use relay::protocol::game::GamePacket;
use relay::{
    ConfigError, GameProtocol, LegacyProtocol, Module, ModuleConfig, ProtocolKind, ServerEvent,
    Transport,
};

use common::{Client, connect, hub, join_game};

#[test]
fn test_encrypted_handshake_joins() {
    let hub = hub();
    let config = ModuleConfig {
        encryption_required: true,
        ..common::config(ProtocolKind::Game)
    };
    let module = Module::<GameProtocol>::new(config, Arc::clone(&hub)).unwrap();
    let (mut pump, mut client) = connect(&module);

    client.send(GamePacket::AuthorizationRequest {
        name: "Ash".into(),
        password_hash: String::new(),
    });
    assert!(pump.pump_once());
    let replies = client.messages();
    assert_eq!(replies.len(), 2);
    assert_eq!(
        replies[0],
        GamePacket::AuthorizationResponse { status: VarInt(1) }
    );
    let GamePacket::EncryptionRequest {
        modulus,
        exponent,
        token,
    } = &replies[1]
    else {
        panic!("expected an encryption request, got {:?}", replies[1]);
    };
    assert!(!pump.session().is_joined());

    let secret = random_secret();
    client.send(GamePacket::EncryptionResponse {
        shared_secret: seal_for(modulus, exponent, &secret).unwrap(),
        token: seal_for(modulus, exponent, token).unwrap(),
    });
    client.transport.enable_encryption(&secret).unwrap();
    assert!(pump.pump_once());

    assert!(pump.session().is_joined());
    assert!(pump.transport().encryption_enabled());
    let id = pump.session().id();
    let replies = client.messages();
    assert_eq!(replies[0], GamePacket::AuthorizationComplete {});
    assert!(replies.contains(&GamePacket::OwnId {
        player_id: VarInt(id)
    }));
    assert!(replies.contains(&GamePacket::ServerMessage {
        message: "Player Ash joined the game!".into()
    }));
    assert_eq!(module.session_by_name("ash").map(|s| s.id()), Some(id));
}

#[test]
fn test_altered_token_is_refused() {
    let hub = hub();
    let config = ModuleConfig {
        encryption_required: true,
        ..common::config(ProtocolKind::Game)
    };
    let module = Module::<GameProtocol>::new(config, Arc::clone(&hub)).unwrap();
    let (mut pump, mut client) = connect(&module);

    client.send(GamePacket::AuthorizationRequest {
        name: "Ash".into(),
        password_hash: String::new(),
    });
    pump.pump_once();
    let replies = client.messages();
    let GamePacket::EncryptionRequest {
        modulus,
        exponent,
        token,
    } = &replies[1]
    else {
        panic!("expected an encryption request");
    };

    let mut altered = *token;
    altered[3] ^= 0x80;
    client.send(GamePacket::EncryptionResponse {
        shared_secret: seal_for(modulus, exponent, &random_secret()).unwrap(),
        token: seal_for(modulus, exponent, &altered).unwrap(),
    });
    assert!(!pump.pump_once());

    assert_eq!(
        client.messages(),
        vec![GamePacket::AuthorizationDisconnect {
            reason: "Unable to authenticate.".into()
        }]
    );
    assert!(!pump.session().is_joined());
    assert!(module.registry().is_empty());
    assert_eq!(
        common::events_matching(&hub, |e| matches!(e, ServerEvent::ConnectionDenied { .. })),
        1
    );
}

#[test]
fn test_encryption_response_without_encryption() {
    let hub = hub();
    let module = common::game_module(&hub);
    let (mut pump, mut client) = join_game(&module, "Ash");

    client.send(GamePacket::EncryptionResponse {
        shared_secret: vec![1, 2, 3],
        token: vec![4],
    });
    assert!(!pump.pump_once());
    assert_eq!(
        client.messages(),
        vec![GamePacket::AuthorizationDisconnect {
            reason: "Encryption not enabled!".into()
        }]
    );
    assert!(module.registry().is_empty());
}

#[test]
fn test_unknown_packet_kicks() {
    let hub = hub();
    let module = common::game_module(&hub);
    let (mut raw, server) = MemoryPipe::pair();
    let mut pump = module.attach(Box::new(server));

    raw.write_all(&encode_frame(0x7F, 0, &[])).unwrap();
    assert!(!pump.pump_once());

    let mut client = Client {
        transport: Transport::<GamePacket>::new(Box::new(raw)),
    };
    assert_eq!(
        client.messages(),
        vec![GamePacket::Kick {
            reason: "Invalid packet".into()
        }]
    );
}

#[test]
fn test_packets_before_join_are_dropped() {
    let hub = hub();
    let module = common::game_module(&hub);
    let (mut watcher_pump, mut watcher) = join_game(&module, "Misty");
    let (mut pump, mut client) = connect(&module);

    client.send(GamePacket::ChatGlobal {
        sender: String::new(),
        message: "too early".into(),
    });
    assert!(pump.pump_once());
    assert!(client.messages().is_empty());
    watcher_pump.pump_once();
    assert!(watcher.messages().is_empty());

    client.send(GamePacket::AuthorizationRequest {
        name: "Brock".into(),
        password_hash: String::new(),
    });
    assert!(pump.pump_once());
    assert!(pump.session().is_joined());
}

#[test]
fn test_empty_name_is_refused() {
    let hub = hub();
    let module = common::game_module(&hub);
    let (mut pump, mut client) = connect(&module);
    client.send(GamePacket::AuthorizationRequest {
        name: "   ".into(),
        password_hash: String::new(),
    });
    assert!(!pump.pump_once());
    assert_eq!(
        client.messages(),
        vec![GamePacket::AuthorizationDisconnect {
            reason: "Invalid name!".into()
        }]
    );
}

#[test]
fn test_player_password_is_checked_on_return() {
    let hub = hub();
    let module = common::game_module(&hub);
    let (mut pump, mut client) = connect(&module);
    client.send(GamePacket::AuthorizationRequest {
        name: "Ash".into(),
        password_hash: hash_password("pikachu"),
    });
    assert!(pump.pump_once());
    assert!(pump.session().is_joined());
    client.transport.shutdown();
    assert!(!pump.pump_once());

    let (mut pump, mut client) = connect(&module);
    client.send(GamePacket::AuthorizationRequest {
        name: "Ash".into(),
        password_hash: hash_password("raichu"),
    });
    assert!(!pump.pump_once());
    let replies = client.messages();
    assert_eq!(
        replies.last(),
        Some(&GamePacket::Kick {
            reason: "Password is wrong!".into()
        })
    );
}

fn admin_module(hub: &Arc<relay::Hub>) -> Arc<Module<AdminProtocol>> {
    let config = ModuleConfig {
        password_hash: Some(hash_password("hunter2")),
        ..common::config(ProtocolKind::Admin)
    };
    Module::new(config, Arc::clone(hub)).unwrap()
}

#[test]
fn test_admin_password_flow() {
    let hub = hub();
    let game = common::game_module(&hub);
    let (_player_pump, _player) = join_game(&game, "Ash");
    let admin = admin_module(&hub);
    let (mut pump, mut client) = connect(&admin);

    client.send(AdminPacket::AuthorizationRequest {
        name: "root".into(),
    });
    assert!(pump.pump_once());
    assert_eq!(
        client.messages(),
        vec![AdminPacket::AuthorizationResponse { status: VarInt(2) }]
    );
    assert!(!pump.session().is_joined());

    client.send(AdminPacket::AuthorizationPassword {
        password_hash: hash_password("hunter2"),
    });
    assert!(pump.pump_once());
    assert!(pump.session().is_joined());
    assert_eq!(client.messages()[0], AdminPacket::AuthorizationComplete {});

    client.send(AdminPacket::PlayerListRequest {});
    assert!(pump.pump_once());
    let replies = client.messages();
    let [AdminPacket::PlayerListResponse { players }] = replies.as_slice() else {
        panic!("expected a player list, got {replies:?}");
    };
    assert_eq!(players.len(), 1);
    assert_eq!(players[0].name, "Ash");
    assert_eq!(players[0].module, "game");
    assert!(hub.players().iter().all(|p| p.name != "root"));
}

#[test]
fn test_admin_wrong_password() {
    let hub = hub();
    let admin = admin_module(&hub);
    let (mut pump, mut client) = connect(&admin);
    client.send(AdminPacket::AuthorizationRequest {
        name: "root".into(),
    });
    pump.pump_once();
    client.messages();

    client.send(AdminPacket::AuthorizationPassword {
        password_hash: hash_password("guess"),
    });
    assert!(!pump.pump_once());
    assert_eq!(
        client.messages(),
        vec![AdminPacket::AuthorizationDisconnect {
            reason: "Password is wrong!".into()
        }]
    );
    assert!(admin.registry().is_empty());
}

#[test]
fn test_module_refuses_unreachable_handshake_steps() {
    let hub = hub();
    let encrypted_legacy = ModuleConfig {
        encryption_required: true,
        ..common::config(ProtocolKind::Legacy)
    };
    assert!(matches!(
        Module::<LegacyProtocol>::new(encrypted_legacy, Arc::clone(&hub)),
        Err(ConfigError::EncryptionUnsupported(ProtocolKind::Legacy))
    ));

    let locked_game = ModuleConfig {
        password_hash: Some(hash_password("hunter2")),
        ..common::config(ProtocolKind::Game)
    };
    assert!(matches!(
        Module::<GameProtocol>::new(locked_game, Arc::clone(&hub)),
        Err(ConfigError::PasswordUnsupported(ProtocolKind::Game))
    ));
    assert!(hub.modules().is_empty());
}
