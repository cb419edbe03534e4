#![allow(dead_code)]

use std::sync::{Arc, OnceLock};

use relay::auth::DEFAULT_KEY_BITS;
use relay::net::MemoryPipe;
use relay::protocol::game::GamePacket;
use relay::{
    GameProtocol, Hub, LegacyProtocol, MemoryStore, Message, Module, ModuleConfig, Packet, Protocol, ProtocolKind,
    ServerEvent, ServerKeys, SessionPump, Transport, WorldConfig,
};

pub fn keys() -> Arc<ServerKeys> {
    static KEYS: OnceLock<Arc<ServerKeys>> = OnceLock::new();
    Arc::clone(KEYS.get_or_init(|| Arc::new(ServerKeys::generate(DEFAULT_KEY_BITS).unwrap())))
}

pub fn hub() -> Arc<Hub> {
    Hub::new(Arc::new(MemoryStore::new()), keys(), WorldConfig::default())
}

pub fn config(kind: ProtocolKind) -> ModuleConfig {
    ModuleConfig {
        encryption_required: false,
        ..ModuleConfig::for_kind(kind)
    }
}

pub fn game_module(hub: &Arc<Hub>) -> Arc<Module<GameProtocol>> {
    Module::new(config(ProtocolKind::Game), Arc::clone(hub)).unwrap()
}

pub fn legacy_module(hub: &Arc<Hub>) -> Arc<Module<LegacyProtocol>> {
    Module::new(config(ProtocolKind::Legacy), Arc::clone(hub)).unwrap()
}

/// Test-side end of a session.
pub struct Client<M: Message> {
    pub transport: Transport<M>,
}

impl<M: Message> Client<M> {
    pub fn send(&mut self, message: M) {
        self.transport.write_packet(&Packet::new(0, message)).unwrap();
    }

    pub fn receive(&mut self) -> Vec<Packet<M>> {
        let mut packets = Vec::new();
        while let Some(packet) = self.transport.read_packet().unwrap() {
            packets.push(packet);
        }
        packets
    }

    pub fn messages(&mut self) -> Vec<M> {
        self.receive().into_iter().map(|p| p.message).collect()
    }
}

pub fn connect<P: Protocol>(module: &Arc<Module<P>>) -> (SessionPump<P>, Client<P::Message>) {
    let (client, server) = MemoryPipe::pair();
    let pump = module.attach(Box::new(server));
    let client = Client {
        transport: Transport::new(Box::new(client)),
    };
    (pump, client)
}

/// Connects and joins a game session over an unencrypted module, then
/// drains the join traffic.
pub fn join_game(
    module: &Arc<Module<GameProtocol>>,
    name: &str,
) -> (SessionPump<GameProtocol>, Client<GamePacket>) {
    let (mut pump, mut client) = connect(module);
    client.send(GamePacket::AuthorizationRequest {
        name: name.to_string(),
        password_hash: String::new(),
    });
    assert!(pump.pump_once());
    assert!(pump.session().is_joined(), "{name} did not join");
    client.receive();
    (pump, client)
}

/// Runs one pump iteration on each session, so everything queued so far
/// reaches its client.
pub fn pump_all<P: Protocol>(pumps: &mut [&mut SessionPump<P>]) {
    for pump in pumps.iter_mut() {
        pump.pump_once();
    }
}

pub fn events_matching(hub: &Hub, predicate: impl Fn(&ServerEvent) -> bool) -> usize {
    hub.drain_events().iter().filter(|e| predicate(e)).count()
}
