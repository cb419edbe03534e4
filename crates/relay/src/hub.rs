use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, RwLock, Weak};

use glam::Vec3;

use crate::auth::ServerKeys;
use crate::chat::ChatBus;
use crate::event::ServerEvent;
use crate::permissions::PermissionFlags;
use crate::protocol::ProtocolKind;
use crate::store::RecordStore;
use crate::world::{World, WorldConfig, WorldState};

const MAX_PENDING_EVENTS: usize = 4096;

#[derive(Debug, Clone, PartialEq)]
pub struct PlayerSummary {
    pub module: ProtocolKind,
    pub id: i32,
    pub name: String,
    pub level: Option<String>,
    pub position: Vec3,
    pub permissions: PermissionFlags,
    pub addr: Option<SocketAddr>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModuleStats {
    pub clients: usize,
    pub attached: usize,
    pub groups: usize,
    pub exchanges: usize,
    pub discovery_micros: u64,
    pub relay_micros: u64,
}

/// What the rest of the server may do with a module without knowing its
/// protocol.
pub trait ModuleView: Send + Sync {
    fn kind(&self) -> ProtocolKind;
    fn visible(&self) -> bool;
    fn players(&self) -> Vec<PlayerSummary>;
    fn kick(&self, name: &str, reason: &str) -> bool;
    fn server_message(&self, text: &str);
    fn stats(&self) -> ModuleStats;
    fn dispose(&self);
}

pub struct CommandCall<'a> {
    pub caller_id: i32,
    pub caller_name: &'a str,
    pub permissions: PermissionFlags,
    /// The full line, leading slash included.
    pub line: &'a str,
}

/// Executes chat commands. Replies are sent back to the caller as server
/// messages.
pub trait CommandExecutor: Send + Sync {
    fn execute(&self, hub: &Hub, call: &CommandCall<'_>) -> Vec<String>;
}

#[derive(Debug, Default)]
pub struct UnknownCommands;

impl CommandExecutor for UnknownCommands {
    fn execute(&self, _hub: &Hub, call: &CommandCall<'_>) -> Vec<String> {
        let name = call.line.split_whitespace().next().unwrap_or(call.line);
        vec![format!("Invalid command \"{name}\"!")]
    }
}

/// Server-wide display name reservations.
#[derive(Debug, Default)]
pub struct Directory {
    names: Mutex<HashMap<String, ProtocolKind>>,
}

impl Directory {
    pub fn claim(&self, name: &str, module: ProtocolKind) -> bool {
        let mut names = self.lock();
        let key = name.to_lowercase();
        if names.contains_key(&key) {
            return false;
        }
        names.insert(key, module);
        true
    }

    pub fn release(&self, name: &str, module: ProtocolKind) {
        let mut names = self.lock();
        let key = name.to_lowercase();
        if names.get(&key) == Some(&module) {
            names.remove(&key);
        }
    }

    pub fn holder(&self, name: &str) -> Option<ProtocolKind> {
        self.lock().get(&name.to_lowercase()).copied()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, ProtocolKind>> {
        self.names.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// State shared by every module of one server process.
pub struct Hub {
    store: Arc<dyn RecordStore>,
    keys: Arc<ServerKeys>,
    world: World,
    chat: ChatBus,
    directory: Directory,
    modules: RwLock<Vec<Weak<dyn ModuleView>>>,
    commands: RwLock<Arc<dyn CommandExecutor>>,
    events: Mutex<VecDeque<ServerEvent>>,
}

impl Hub {
    pub fn new(store: Arc<dyn RecordStore>, keys: Arc<ServerKeys>, world: WorldConfig) -> Arc<Self> {
        Arc::new(Self {
            store,
            keys,
            world: World::new(world),
            chat: ChatBus::new(),
            directory: Directory::default(),
            modules: RwLock::new(Vec::new()),
            commands: RwLock::new(Arc::new(UnknownCommands)),
            events: Mutex::new(VecDeque::new()),
        })
    }

    pub fn store(&self) -> &dyn RecordStore {
        self.store.as_ref()
    }

    pub fn keys(&self) -> &ServerKeys {
        &self.keys
    }

    pub fn chat(&self) -> &ChatBus {
        &self.chat
    }

    pub fn directory(&self) -> &Directory {
        &self.directory
    }

    pub fn world_state(&self) -> WorldState {
        self.world.state()
    }

    pub fn set_commands(&self, commands: Arc<dyn CommandExecutor>) {
        *self.commands.write().unwrap_or_else(|e| e.into_inner()) = commands;
    }

    pub fn execute_command(&self, call: &CommandCall<'_>) -> Vec<String> {
        let commands = Arc::clone(&self.commands.read().unwrap_or_else(|e| e.into_inner()));
        commands.execute(self, call)
    }

    pub fn register_module(&self, module: Weak<dyn ModuleView>) {
        let mut modules = self.modules.write().unwrap_or_else(|e| e.into_inner());
        modules.retain(|m| m.strong_count() > 0);
        modules.push(module);
    }

    pub fn modules(&self) -> Vec<Arc<dyn ModuleView>> {
        let modules = self.modules.read().unwrap_or_else(|e| e.into_inner());
        modules.iter().filter_map(Weak::upgrade).collect()
    }

    /// Players of every visible module.
    pub fn players(&self) -> Vec<PlayerSummary> {
        self.modules()
            .iter()
            .filter(|m| m.visible())
            .flat_map(|m| m.players())
            .collect()
    }

    pub fn kick(&self, name: &str, reason: &str) -> bool {
        self.modules()
            .iter()
            .filter(|m| m.visible())
            .any(|m| m.kick(name, reason))
    }

    pub fn server_message(&self, text: &str) {
        for module in self.modules().iter().filter(|m| m.visible()) {
            module.server_message(text);
        }
    }

    pub fn push_event(&self, event: ServerEvent) {
        let mut events = self.events.lock().unwrap_or_else(|e| e.into_inner());
        if events.len() >= MAX_PENDING_EVENTS {
            events.pop_front();
        }
        events.push_back(event);
    }

    pub fn drain_events(&self) -> Vec<ServerEvent> {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .drain(..)
            .collect()
    }

    pub fn dispose(&self) {
        for module in self.modules() {
            module.dispose();
        }
        if let Err(e) = self.store.flush() {
            log::error!("Failed to save player records: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn hub() -> Arc<Hub> {
        Hub::new(
            Arc::new(MemoryStore::new()),
            crate::auth::tests::test_keys(),
            WorldConfig::default(),
        )
    }

    #[test]
    fn test_directory_claims_are_case_insensitive() {
        let directory = Directory::default();
        assert!(directory.claim("Ash", ProtocolKind::Game));
        assert!(!directory.claim("ASH", ProtocolKind::Legacy));
        directory.release("ash", ProtocolKind::Legacy);
        assert_eq!(directory.holder("ash"), Some(ProtocolKind::Game));
        directory.release("ash", ProtocolKind::Game);
        assert!(directory.is_empty());
    }

    #[test]
    fn test_default_command_reply() {
        let hub = hub();
        let replies = hub.execute_command(&CommandCall {
            caller_id: 1,
            caller_name: "Ash",
            permissions: PermissionFlags::USER,
            line: "/warp route1",
        });
        assert_eq!(replies, vec!["Invalid command \"/warp\"!"]);
    }

    #[test]
    fn test_events_drain_in_order() {
        let hub = hub();
        hub.push_event(ServerEvent::Error {
            message: "one".into(),
        });
        hub.push_event(ServerEvent::Error {
            message: "two".into(),
        });
        let drained: Vec<String> = hub.drain_events().iter().map(|e| e.describe()).collect();
        assert_eq!(drained, vec!["one", "two"]);
        assert!(hub.drain_events().is_empty());
    }
}
