use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak};

use crate::net::SERVER_ORIGIN;

pub const GLOBAL_CHANNEL: &str = "global";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatScope {
    Channel(String),
    Private { recipient: i32 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    pub scope: ChatScope,
    pub sender_id: i32,
    pub sender_name: String,
    pub text: String,
}

impl ChatMessage {
    pub fn channel(channel: &str, sender_id: i32, sender_name: &str, text: &str) -> Self {
        Self {
            scope: ChatScope::Channel(channel.to_string()),
            sender_id,
            sender_name: sender_name.to_string(),
            text: text.to_string(),
        }
    }

    pub fn private(recipient: i32, sender_id: i32, sender_name: &str, text: &str) -> Self {
        Self {
            scope: ChatScope::Private { recipient },
            sender_id,
            sender_name: sender_name.to_string(),
            text: text.to_string(),
        }
    }

    pub fn server(channel: &str, text: &str) -> Self {
        Self::channel(channel, SERVER_ORIGIN, "Server", text)
    }

    pub fn is_from_server(&self) -> bool {
        self.sender_id == SERVER_ORIGIN
    }

    pub fn channel_name(&self) -> Option<&str> {
        match &self.scope {
            ChatScope::Channel(name) => Some(name),
            ChatScope::Private { .. } => None,
        }
    }
}

/// Anything that can receive chat lines. Keys must be unique per process.
pub trait ChatSink: Send + Sync {
    fn sink_key(&self) -> u64;
    fn deliver(&self, message: &ChatMessage);
}

pub struct ChatChannel {
    name: String,
    subscribers: Mutex<HashMap<u64, Weak<dyn ChatSink>>>,
}

impl ChatChannel {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            subscribers: Mutex::new(HashMap::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns false if the sink was already subscribed.
    pub fn subscribe<S: ChatSink + 'static>(&self, sink: &Arc<S>) -> bool {
        let weak: Weak<dyn ChatSink> = Arc::<S>::downgrade(sink);
        let mut subscribers = self.lock();
        match subscribers.get(&sink.sink_key()) {
            Some(existing) if existing.strong_count() > 0 => false,
            _ => {
                subscribers.insert(sink.sink_key(), weak);
                true
            }
        }
    }

    pub fn unsubscribe(&self, key: u64) -> bool {
        self.lock().remove(&key).is_some()
    }

    pub fn contains(&self, key: u64) -> bool {
        self.lock().contains_key(&key)
    }

    /// Live subscribers; dropped sinks are pruned on the way.
    pub fn len(&self) -> usize {
        let mut subscribers = self.lock();
        subscribers.retain(|_, sink| sink.strong_count() > 0);
        subscribers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Delivers to every live subscriber except `exclude`; returns the
    /// number of sinks reached.
    pub fn publish(&self, message: &ChatMessage, exclude: Option<u64>) -> usize {
        let targets: Vec<Arc<dyn ChatSink>> = {
            let mut subscribers = self.lock();
            subscribers.retain(|_, sink| sink.strong_count() > 0);
            subscribers
                .iter()
                .filter(|(key, _)| Some(**key) != exclude)
                .filter_map(|(_, sink)| sink.upgrade())
                .collect()
        };
        for sink in &targets {
            sink.deliver(message);
        }
        targets.len()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<u64, Weak<dyn ChatSink>>> {
        self.subscribers.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Named channels. The global channel always exists; any other channel
/// lives only while it has subscribers.
pub struct ChatBus {
    global: Arc<ChatChannel>,
    channels: RwLock<HashMap<String, Arc<ChatChannel>>>,
}

impl ChatBus {
    pub fn new() -> Self {
        let global = Arc::new(ChatChannel::new(GLOBAL_CHANNEL));
        let mut channels = HashMap::new();
        channels.insert(GLOBAL_CHANNEL.to_string(), Arc::clone(&global));
        Self {
            global,
            channels: RwLock::new(channels),
        }
    }

    pub fn global(&self) -> Arc<ChatChannel> {
        Arc::clone(&self.global)
    }

    pub fn get(&self, name: &str) -> Option<Arc<ChatChannel>> {
        self.read().get(&name.to_lowercase()).cloned()
    }

    /// Subscribes `sink` to the named channel, creating it on first use.
    /// Returns false if it was already a member.
    pub fn join<S: ChatSink + 'static>(&self, name: &str, sink: &Arc<S>) -> bool {
        let key = name.to_lowercase();
        let mut channels = self.write();
        channels
            .entry(key.clone())
            .or_insert_with(|| Arc::new(ChatChannel::new(&key)))
            .subscribe(sink)
    }

    /// Drops the sink from the named channel. The channel goes away with
    /// its last subscriber.
    pub fn leave(&self, name: &str, key: u64) -> bool {
        let name = name.to_lowercase();
        let mut channels = self.write();
        let Some(channel) = channels.get(&name) else {
            return false;
        };
        let left = channel.unsubscribe(key);
        if name != GLOBAL_CHANNEL && channel.is_empty() {
            channels.remove(&name);
        }
        left
    }

    pub fn unsubscribe_all(&self, key: u64) {
        let mut channels = self.write();
        for channel in channels.values() {
            channel.unsubscribe(key);
        }
        channels.retain(|name, channel| name == GLOBAL_CHANNEL || !channel.is_empty());
    }

    /// Posts a server line on the global channel.
    pub fn announce(&self, text: &str) -> usize {
        self.global
            .publish(&ChatMessage::server(GLOBAL_CHANNEL, text), None)
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, Arc<ChatChannel>>> {
        self.channels.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, Arc<ChatChannel>>> {
        self.channels.write().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for ChatBus {
    fn default() -> Self {
        Self::new()
    }
}
