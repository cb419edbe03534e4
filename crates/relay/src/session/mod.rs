mod handlers;
mod pump;

pub use handlers::{Handler, HandlerEntry, HandlerTable, Phase};
pub use pump::{Context, SessionError, SessionPump};

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::time::SystemTime;

use glam::Vec3;

use crate::chat::{ChatMessage, ChatSink};
use crate::module::StopSignal;
use crate::net::Packet;
use crate::permissions::PermissionFlags;
use crate::protocol::Protocol;

static NEXT_SESSION_KEY: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Connecting,
    Negotiating,
    Joined,
    Disconnected,
}

/// Game-relevant state of a connected player.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Profile {
    pub name: String,
    pub permissions: PermissionFlags,
    pub position: Vec3,
    pub level: Option<String>,
    pub facing: i32,
    pub moving: bool,
    pub skin: String,
    pub busy: i32,
    /// Externally verified account id, where the protocol has one.
    pub account_id: Option<i64>,
    pub password_hash: Option<String>,
}

/// Shared handle to one connection. The owning pump is the only reader of
/// the outbound queue; anyone holding the handle may enqueue.
pub struct Session<P: Protocol> {
    key: u64,
    id: AtomicI32,
    addr: Option<SocketAddr>,
    connected_at: SystemTime,
    profile: RwLock<Profile>,
    status: Mutex<SessionStatus>,
    outbound: Mutex<VecDeque<Packet<P::Message>>>,
    stop: StopSignal,
    cleaned_up: AtomicBool,
}

impl<P: Protocol> Session<P> {
    pub fn new(addr: Option<SocketAddr>) -> Arc<Self> {
        let profile = Profile {
            permissions: PermissionFlags::UNVERIFIED,
            ..Default::default()
        };
        Arc::new(Self {
            key: NEXT_SESSION_KEY.fetch_add(1, Ordering::Relaxed),
            id: AtomicI32::new(0),
            addr,
            connected_at: SystemTime::now(),
            profile: RwLock::new(profile),
            status: Mutex::new(SessionStatus::Connecting),
            outbound: Mutex::new(VecDeque::new()),
            stop: StopSignal::new(),
            cleaned_up: AtomicBool::new(false),
        })
    }

    /// Process-unique key, stable even before an id is assigned.
    pub fn key(&self) -> u64 {
        self.key
    }

    pub fn id(&self) -> i32 {
        self.id.load(Ordering::SeqCst)
    }

    pub(crate) fn set_id(&self, id: i32) {
        self.id.store(id, Ordering::SeqCst);
    }

    pub fn addr(&self) -> Option<SocketAddr> {
        self.addr
    }

    pub fn connected_at(&self) -> SystemTime {
        self.connected_at
    }

    pub fn profile(&self) -> Profile {
        self.profile.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn name(&self) -> String {
        self.profile
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .name
            .clone()
    }

    pub fn update_profile<R>(&self, update: impl FnOnce(&mut Profile) -> R) -> R {
        update(&mut self.profile.write().unwrap_or_else(|e| e.into_inner()))
    }

    pub fn status(&self) -> SessionStatus {
        *self.lock_status()
    }

    pub(crate) fn set_status(&self, status: SessionStatus) {
        *self.lock_status() = status;
    }

    /// Moves a negotiating session to `Joined`; false if it was not negotiating.
    pub(crate) fn mark_joined(&self) -> bool {
        let mut status = self.lock_status();
        match *status {
            SessionStatus::Connecting | SessionStatus::Negotiating => {
                *status = SessionStatus::Joined;
                true
            }
            _ => false,
        }
    }

    pub fn is_joined(&self) -> bool {
        self.status() == SessionStatus::Joined
    }

    pub fn send(&self, packet: Packet<P::Message>) {
        if self.status() == SessionStatus::Disconnected {
            return;
        }
        self.lock_outbound().push_back(packet);
    }

    pub fn send_server(&self, message: P::Message) {
        self.send(Packet::server(message));
    }

    pub fn server_message(&self, text: &str) {
        if let Some(message) = P::server_message(text) {
            self.send_server(message);
        }
    }

    pub fn queued(&self) -> usize {
        self.lock_outbound().len()
    }

    pub fn drain_outbound(&self) -> Vec<Packet<P::Message>> {
        self.lock_outbound().drain(..).collect()
    }

    /// Queues a kick carrying `reason` and stops the session. The pump
    /// flushes the kick before closing.
    pub fn kick(&self, reason: &str) {
        if self.stop.is_stopped() {
            return;
        }
        log::info!("Kicking {} ({}): {}", self.name(), self.id(), reason);
        self.send_server(P::kick(reason));
        self.stop.stop();
    }

    pub fn stop(&self) {
        self.stop.stop();
    }

    pub fn is_stopped(&self) -> bool {
        self.stop.is_stopped()
    }

    pub fn stop_signal(&self) -> &StopSignal {
        &self.stop
    }

    /// True exactly once, for whoever runs disconnect cleanup.
    pub(crate) fn begin_cleanup(&self) -> bool {
        !self.cleaned_up.swap(true, Ordering::SeqCst)
    }

    fn lock_status(&self) -> MutexGuard<'_, SessionStatus> {
        self.status.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_outbound(&self) -> MutexGuard<'_, VecDeque<Packet<P::Message>>> {
        self.outbound.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl<P: Protocol> ChatSink for Session<P> {
    fn sink_key(&self) -> u64 {
        self.key
    }

    fn deliver(&self, message: &ChatMessage) {
        if let Some(chat) = P::chat(message) {
            self.send(Packet::new(message.sender_id, chat));
        }
    }
}
