mod cadence;
mod config;
mod proximity;
mod registry;

pub use cadence::{CycleTiming, StopSignal, run_cadence};
pub use config::{ConfigError, ModuleConfig};
pub use proximity::{GroupMap, ProximityGroups};
pub use registry::Registry;

use std::collections::HashMap;
use std::io;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::chat::{ChatMessage, ChatSink, GLOBAL_CHANNEL};
use crate::event::ServerEvent;
use crate::exchange::{Coordinator, ExchangeEvent, ExchangeKind, Notice, NoticeKind};
use crate::hub::{CommandCall, Hub, ModuleStats, ModuleView, PlayerSummary};
use crate::net::{ByteStream, Packet, Transport};
use crate::permissions::PermissionFlags;
use crate::protocol::{Protocol, ProtocolKind};
use crate::session::{HandlerTable, Profile, Session, SessionError, SessionPump};
use crate::store::{PlayerRecord, StoreError, unix_now};

const ACCEPT_POLL: Duration = Duration::from_millis(10);
const SERVER_FULL: &str = "Server is full.";
const SERVER_CLOSING: &str = "Server is closing!";

#[derive(Debug, thiserror::Error)]
pub enum AdmissionError {
    #[error("You are already on server!")]
    Duplicate,
    #[error("Password is wrong!")]
    WrongPassword,
    #[error("You are banned from this server; Reason: {0}")]
    Banned(String),
    #[error("Invalid name!")]
    InvalidName,
    #[error("Server is closing!")]
    Closing,
    #[error("Unable to load player data.")]
    Store(#[from] StoreError),
}

/// Who a private message is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recipient<'a> {
    Id(i32),
    Name(&'a str),
}

/// All sessions speaking one protocol, plus the background work that
/// keeps them in sync.
pub struct Module<P: Protocol> {
    config: ModuleConfig,
    hub: Arc<Hub>,
    registry: Registry<P>,
    proximity: ProximityGroups,
    coordinator: Coordinator,
    handlers: Arc<HandlerTable<P>>,
    attached: Mutex<HashMap<u64, Weak<Session<P>>>>,
    stop: StopSignal,
    disposed: AtomicBool,
    next_local_id: AtomicI32,
    last_broadcast: Mutex<Instant>,
    discovery_timing: CycleTiming,
    relay_timing: CycleTiming,
}

impl<P: Protocol> Module<P> {
    /// Builds a module and registers it with the hub. Fails if the config
    /// asks for a handshake step the protocol cannot perform.
    pub fn new(config: ModuleConfig, hub: Arc<Hub>) -> Result<Arc<Self>, ConfigError> {
        config.validate::<P>()?;
        let module = Arc::new(Self {
            config,
            hub,
            registry: Registry::new(),
            proximity: ProximityGroups::new(),
            coordinator: Coordinator::new(),
            handlers: Arc::new(P::handlers()),
            attached: Mutex::new(HashMap::new()),
            stop: StopSignal::new(),
            disposed: AtomicBool::new(false),
            next_local_id: AtomicI32::new(1),
            last_broadcast: Mutex::new(Instant::now()),
            discovery_timing: CycleTiming::default(),
            relay_timing: CycleTiming::default(),
        });
        let view: Weak<dyn ModuleView> = Arc::<Module<P>>::downgrade(&module);
        module.hub.register_module(view);
        Ok(module)
    }

    pub fn config(&self) -> &ModuleConfig {
        &self.config
    }

    pub fn hub(&self) -> &Arc<Hub> {
        &self.hub
    }

    pub fn registry(&self) -> &Registry<P> {
        &self.registry
    }

    pub fn proximity(&self) -> &ProximityGroups {
        &self.proximity
    }

    pub fn coordinator(&self) -> &Coordinator {
        &self.coordinator
    }

    pub fn discovery_timing(&self) -> &CycleTiming {
        &self.discovery_timing
    }

    pub fn relay_timing(&self) -> &CycleTiming {
        &self.relay_timing
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    pub fn session(&self, id: i32) -> Option<Arc<Session<P>>> {
        self.registry.get(id)
    }

    pub fn session_by_name(&self, name: &str) -> Option<Arc<Session<P>>> {
        self.registry.by_name(name)
    }

    /// Wraps an accepted connection in a new session and returns the pump
    /// that drives it.
    pub fn attach(self: &Arc<Self>, stream: Box<dyn ByteStream>) -> SessionPump<P> {
        let transport = Transport::new(stream);
        let session = Session::new(transport.peer_addr());
        self.lock_attached()
            .insert(session.key(), Arc::downgrade(&session));
        if self.is_disposed() {
            session.kick(SERVER_CLOSING);
        }
        log::debug!("{} connection from {:?}", P::KIND, session.addr());
        SessionPump::new(
            session,
            Arc::clone(self),
            transport,
            Arc::clone(&self.handlers),
        )
    }

    pub(crate) fn detach(&self, session: &Session<P>) {
        self.lock_attached().remove(&session.key());
    }

    /// Sessions with a live pump, joined or not.
    pub fn attached(&self) -> usize {
        let mut attached = self.lock_attached();
        attached.retain(|_, session| session.strong_count() > 0);
        attached.len()
    }

    fn live_sessions(&self) -> Vec<Arc<Session<P>>> {
        self.lock_attached()
            .values()
            .filter_map(Weak::upgrade)
            .collect()
    }

    /// Admits a session whose handshake finished. On success the session is
    /// registered, everyone is told about everyone, and its id is returned.
    pub fn admit(&self, session: &Arc<Session<P>>) -> Result<i32, AdmissionError> {
        if self.is_disposed() {
            return Err(AdmissionError::Closing);
        }
        let profile = session.profile();
        if profile.name.trim().is_empty() {
            return Err(AdmissionError::InvalidName);
        }
        if P::VISIBLE && !self.hub.directory().claim(&profile.name, P::KIND) {
            return Err(AdmissionError::Duplicate);
        }

        let result = self.register(session, &profile);
        if result.is_err() && P::VISIBLE {
            self.hub.directory().release(&profile.name, P::KIND);
        }
        let id = result?;

        if let Some(complete) = P::authorization_complete() {
            session.send_server(complete);
        }
        self.announce(session);
        log::info!("{} joined {} as {}", profile.name, P::KIND, id);
        self.hub.push_event(ServerEvent::ClientConnected {
            module: P::KIND,
            id,
            name: profile.name.clone(),
            addr: session.addr(),
        });
        if P::VISIBLE {
            self.hub.chat().global().subscribe(session);
            self.hub
                .chat()
                .announce(&format!("Player {} joined the game!", profile.name));
        }
        Ok(id)
    }

    fn register(&self, session: &Arc<Session<P>>, profile: &Profile) -> Result<i32, AdmissionError> {
        let (id, permissions) = if P::VISIBLE {
            self.load_record(profile)?
        } else {
            let id = self.next_local_id.fetch_add(1, Ordering::SeqCst);
            (id, profile.permissions.verified())
        };
        session.set_id(id);
        session.update_profile(|p| p.permissions = permissions);
        if !self.registry.insert(Arc::clone(session)) {
            return Err(AdmissionError::Duplicate);
        }
        if !session.mark_joined() {
            self.registry.remove(session);
            return Err(AdmissionError::Closing);
        }
        Ok(id)
    }

    fn load_record(&self, profile: &Profile) -> Result<(i32, PermissionFlags), AdmissionError> {
        let store = self.hub.store();
        let mut record = match store.find_by_name(&profile.name) {
            Some(record) => record,
            None => {
                let mut record = PlayerRecord::new(profile.name.clone());
                record.permissions = PermissionFlags::UNVERIFIED.bits();
                if P::CHECKS_PASSWORD {
                    record.password_hash.clone_from(&profile.password_hash);
                }
                record.id = store.insert(record.clone()).inspect_err(|e| {
                    log::error!("Failed to create record for {}: {}", profile.name, e);
                })?;
                record
            }
        };

        if let Some(ban) = store.active_ban(record.id) {
            return Err(AdmissionError::Banned(ban.reason));
        }

        if P::CHECKS_PASSWORD {
            match (&record.password_hash, &profile.password_hash) {
                (Some(stored), Some(given)) if stored.eq_ignore_ascii_case(given) => {}
                (Some(_), _) => return Err(AdmissionError::WrongPassword),
                (None, Some(given)) => {
                    record.password_hash = Some(given.clone());
                    store.update(record.clone())?;
                }
                (None, None) => {}
            }
        }

        let permissions = PermissionFlags::from_bits_truncate(record.permissions).verified();
        Ok((record.id, permissions))
    }

    fn announce(&self, session: &Arc<Session<P>>) {
        let id = session.id();
        let profile = session.profile();
        if let Some(own) = P::own_id(id) {
            session.send_server(own);
        }
        for other in self.registry.snapshot() {
            if other.key() == session.key() {
                continue;
            }
            if let Some(create) = P::create_player(id) {
                other.send_server(create);
            }
            if let Some(state) = P::player_state(&profile) {
                other.send(Packet::new(id, state));
            }
            if let Some(create) = P::create_player(other.id()) {
                session.send_server(create);
            }
            if let Some(state) = P::player_state(&other.profile()) {
                session.send(Packet::new(other.id(), state));
            }
        }
        if let Some(world) = P::world_state(&self.hub.world_state()) {
            session.send_server(world);
        }
        if !self.config.server_message.is_empty() {
            session.server_message(&self.config.server_message);
        }
    }

    /// Deregisters a session. Safe to call any number of times; only the
    /// first call for a registered session has effects.
    pub fn remove(&self, session: &Arc<Session<P>>) {
        if self.registry.remove(session).is_none() {
            return;
        }
        let id = session.id();
        let profile = session.profile();
        let disposing = self.is_disposed();

        if P::VISIBLE {
            self.hub.directory().release(&profile.name, P::KIND);
        }
        self.hub.chat().unsubscribe_all(session.key());
        let notices = self.coordinator.disconnect(id);
        self.deliver(&notices);

        if !disposing {
            if let Some(destroy) = P::destroy_player(id) {
                for other in self.registry.snapshot() {
                    other.send_server(destroy.clone());
                }
            }
        }
        if P::VISIBLE {
            self.save_record(id, session, &profile);
        }

        log::info!("{} left {} ({})", profile.name, P::KIND, id);
        self.hub.push_event(ServerEvent::ClientDisconnected {
            module: P::KIND,
            id,
            name: profile.name.clone(),
        });
        if P::VISIBLE && !disposing {
            self.hub
                .chat()
                .announce(&format!("Player {} disconnected!", profile.name));
        }
    }

    fn save_record(&self, id: i32, session: &Session<P>, profile: &Profile) {
        let store = self.hub.store();
        let Some(mut record) = store.get(id) else {
            return;
        };
        record.position = profile.position.to_array();
        record.level.clone_from(&profile.level);
        record.last_ip = session.addr().map(|addr| addr.ip().to_string());
        record.last_seen = unix_now();
        if let Err(e) = store.update(record) {
            log::error!("Failed to save record of {}: {}", profile.name, e);
        }
    }

    pub(crate) fn denied(&self, session: &Session<P>, error: &SessionError) {
        self.hub.push_event(ServerEvent::ConnectionDenied {
            module: P::KIND,
            addr: session.addr(),
            reason: error.to_string(),
        });
    }

    /// Drops sessions that stopped; returns how many were removed.
    pub fn sweep(&self) -> usize {
        let mut removed = 0;
        for session in self.registry.snapshot() {
            if session.is_stopped() || !session.is_joined() {
                self.remove(&session);
                removed += 1;
            }
        }
        self.attached();
        removed
    }

    /// Sends the current world state to every joined session.
    pub fn broadcast_world(&self) -> usize {
        let Some(world) = P::world_state(&self.hub.world_state()) else {
            return 0;
        };
        let sessions = self.registry.snapshot();
        for session in &sessions {
            session.send_server(world.clone());
        }
        sessions.len()
    }

    /// One module tick: sweep, then the world broadcast when it is due.
    pub fn tick(&self) {
        self.sweep();
        let due = {
            let mut last = self
                .last_broadcast
                .lock()
                .unwrap_or_else(|e| e.into_inner());
            if last.elapsed() >= self.config.broadcast_interval() {
                *last = Instant::now();
                true
            } else {
                false
            }
        };
        if due {
            self.broadcast_world();
        }
    }

    pub fn discover(&self) -> usize {
        self.proximity.discover(&self.registry)
    }

    pub fn relay(&self) -> usize {
        self.proximity.relay(&self.registry)
    }

    /// Applies a state change from the session's own client. With move
    /// correction on, a moving player's updates are left to the relay
    /// worker; level changes, start, stop and standing updates go out here.
    pub fn update_state(&self, session: &Arc<Session<P>>, update: impl FnOnce(&mut Profile)) {
        let (immediate, profile) = session.update_profile(|profile| {
            let level = profile.level.clone();
            let moving = profile.moving;
            update(profile);
            let immediate =
                level != profile.level || moving != profile.moving || !profile.moving;
            (immediate, profile.clone())
        });
        if !session.is_joined() || (self.config.move_correction && !immediate) {
            return;
        }
        let Some(state) = P::player_state(&profile) else {
            return;
        };
        let packet = Packet::new(session.id(), state);
        for other in self.registry.snapshot() {
            if other.key() != session.key() {
                other.send(packet.clone());
            }
        }
    }

    pub fn global_chat(&self, session: &Arc<Session<P>>, text: &str) {
        let name = session.name();
        if text.starts_with('/') {
            if !text.to_lowercase().starts_with("/login") {
                session.deliver(&ChatMessage::channel(GLOBAL_CHANNEL, session.id(), &name, text));
            }
            self.run_command(session, text);
            return;
        }
        log::info!("<{}> {}", name, text);
        self.hub.push_event(ServerEvent::Chat {
            channel: GLOBAL_CHANNEL.to_string(),
            sender: name.clone(),
            text: text.to_string(),
        });
        let message = ChatMessage::channel(GLOBAL_CHANNEL, session.id(), &name, text);
        self.hub.chat().global().publish(&message, None);
    }

    pub fn run_command(&self, session: &Arc<Session<P>>, line: &str) {
        let name = session.name();
        let profile = session.profile();
        let replies = self.hub.execute_command(&CommandCall {
            caller_id: session.id(),
            caller_name: &name,
            permissions: profile.permissions,
            line,
        });
        for reply in replies {
            session.server_message(&reply);
        }
    }

    pub fn join_channel(&self, session: &Arc<Session<P>>, channel: &str) {
        self.hub.chat().join(channel, session);
    }

    pub fn leave_channel(&self, session: &Session<P>, channel: &str) {
        self.hub.chat().leave(channel, session.key());
    }

    /// Posts to a named channel the session has joined.
    pub fn channel_chat(&self, session: &Arc<Session<P>>, channel: &str, text: &str) {
        let target = self
            .hub
            .chat()
            .get(channel)
            .filter(|c| c.contains(session.key()));
        let Some(target) = target else {
            session.server_message(&format!("You are not in channel \"{channel}\"."));
            return;
        };
        let name = session.name();
        self.hub.push_event(ServerEvent::Chat {
            channel: target.name().to_string(),
            sender: name.clone(),
            text: text.to_string(),
        });
        target.publish(
            &ChatMessage::channel(target.name(), session.id(), &name, text),
            None,
        );
    }

    /// Delivers a private line straight to the recipient; the sender gets
    /// an error line if there is nobody to deliver to.
    pub fn private_chat(&self, session: &Arc<Session<P>>, recipient: Recipient<'_>, text: &str) {
        let target = match recipient {
            Recipient::Id(id) => self.registry.get(id),
            Recipient::Name(name) => self.registry.by_name(name),
        };
        let Some(target) = target.filter(|t| t.is_joined()) else {
            let label = match recipient {
                Recipient::Id(id) => format!("id {id}"),
                Recipient::Name(name) => format!("name \"{name}\""),
            };
            session.server_message(&format!("The player with the {label} doesn't exist."));
            return;
        };
        let message = ChatMessage::private(target.id(), session.id(), &session.name(), text);
        target.deliver(&message);
        if target.key() != session.key() {
            session.deliver(&message);
        }
    }

    pub fn offer(&self, kind: ExchangeKind, session: &Session<P>, to: i32, payload: String) {
        let available = self.registry.get(to).is_some_and(|s| s.is_joined());
        let notices = self
            .coordinator
            .offer(kind, session.id(), to, payload, available);
        self.deliver(&notices);
    }

    pub fn exchange(&self, kind: ExchangeKind, session: &Session<P>, event: ExchangeEvent) {
        let notices = self.coordinator.handle(kind, session.id(), event);
        self.deliver(&notices);
    }

    fn deliver(&self, notices: &[Notice]) {
        for notice in notices {
            let Some(target) = self.registry.get(notice.to) else {
                continue;
            };
            match P::exchange_notice(notice) {
                Some(message) => target.send(Packet::new(notice.from, message)),
                None => {
                    if let NoticeKind::Failed { reason } = &notice.notice {
                        target.server_message(reason);
                    }
                }
            }
        }
    }

    pub fn kick_player(&self, name: &str, reason: &str) -> bool {
        match self.registry.by_name(name) {
            Some(session) => {
                session.kick(reason);
                true
            }
            None => false,
        }
    }

    /// Stops every worker and kicks every session. Later calls do nothing.
    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.stop.stop();
        for session in self.live_sessions() {
            session.kick(SERVER_CLOSING);
        }
        for session in self.registry.snapshot() {
            self.remove(&session);
        }
        log::info!("{} module stopped", P::KIND);
        self.hub
            .push_event(ServerEvent::ModuleStopped { module: P::KIND });
    }

    /// Binds the listener and spawns the accept, tick, discovery and relay
    /// workers.
    pub fn start(self: &Arc<Self>) -> io::Result<ModuleHandle> {
        let listener = TcpListener::bind(self.config.address())?;
        listener.set_nonblocking(true)?;
        let addr = listener.local_addr()?;

        let mut threads = Vec::new();
        let module = Arc::clone(self);
        threads.push(spawn_worker("listener", P::KIND, move || {
            module.accept_loop(listener)
        })?);
        let module = Arc::clone(self);
        threads.push(spawn_worker("ticker", P::KIND, move || {
            let tick = module.config.tick_interval();
            while !module.stop.sleep(tick) {
                module.tick();
            }
        })?);
        if self.config.move_correction {
            let module = Arc::clone(self);
            threads.push(spawn_worker("discovery", P::KIND, move || {
                run_cadence(
                    module.config.discovery_interval(),
                    &module.stop,
                    &module.discovery_timing,
                    || {
                        module.discover();
                    },
                )
            })?);
            let module = Arc::clone(self);
            threads.push(spawn_worker("relay", P::KIND, move || {
                run_cadence(
                    module.config.relay_interval(),
                    &module.stop,
                    &module.relay_timing,
                    || {
                        module.relay();
                    },
                )
            })?);
        }

        log::info!("{} module listening on {}", P::KIND, addr);
        self.hub.push_event(ServerEvent::ModuleStarted {
            module: P::KIND,
            addr,
        });
        let view: Arc<dyn ModuleView> = Arc::clone(self) as Arc<dyn ModuleView>;
        Ok(ModuleHandle {
            module: view,
            addr,
            threads,
        })
    }

    fn accept_loop(self: Arc<Self>, listener: TcpListener) {
        while !self.stop.is_stopped() {
            match listener.accept() {
                Ok((stream, addr)) => self.accept(stream, addr),
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
                    if self.stop.sleep(ACCEPT_POLL) {
                        break;
                    }
                }
                Err(e) => {
                    log::error!("{} accept failed: {}", P::KIND, e);
                    self.hub.push_event(ServerEvent::Error {
                        message: format!("{} accept failed: {}", P::KIND, e),
                    });
                    if self.stop.sleep(ACCEPT_POLL) {
                        break;
                    }
                }
            }
        }
    }

    fn accept(self: &Arc<Self>, stream: TcpStream, addr: SocketAddr) {
        if let Err(e) = stream.set_nonblocking(true) {
            log::error!("{} could not configure {}: {}", P::KIND, addr, e);
            return;
        }
        let _ = stream.set_nodelay(true);

        if self.attached() >= self.config.max_clients {
            let mut transport = Transport::<P::Message>::new(Box::new(stream));
            let _ = transport.write_packet(&Packet::server(P::kick(SERVER_FULL)));
            transport.shutdown();
            log::warn!("{} refused {}: server is full", P::KIND, addr);
            self.hub.push_event(ServerEvent::ConnectionDenied {
                module: P::KIND,
                addr: Some(addr),
                reason: SERVER_FULL.to_string(),
            });
            return;
        }

        let pump = self.attach(Box::new(stream));
        let spawned = thread::Builder::new()
            .name(format!("{}-session-{}", P::KIND, addr))
            .spawn(move || pump.run());
        if let Err(e) = spawned {
            log::error!("{} could not spawn session worker: {}", P::KIND, e);
        }
    }

    fn lock_attached(&self) -> MutexGuard<'_, HashMap<u64, Weak<Session<P>>>> {
        self.attached.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl<P: Protocol> ModuleView for Module<P> {
    fn kind(&self) -> ProtocolKind {
        P::KIND
    }

    fn visible(&self) -> bool {
        P::VISIBLE
    }

    fn players(&self) -> Vec<PlayerSummary> {
        self.registry
            .snapshot()
            .iter()
            .map(|session| {
                let profile = session.profile();
                PlayerSummary {
                    module: P::KIND,
                    id: session.id(),
                    name: profile.name,
                    level: profile.level,
                    position: profile.position,
                    permissions: profile.permissions,
                    addr: session.addr(),
                }
            })
            .collect()
    }

    fn kick(&self, name: &str, reason: &str) -> bool {
        self.kick_player(name, reason)
    }

    fn server_message(&self, text: &str) {
        for session in self.registry.snapshot() {
            session.server_message(text);
        }
    }

    fn stats(&self) -> ModuleStats {
        ModuleStats {
            clients: self.registry.len(),
            attached: self.attached(),
            groups: self.proximity.current().len(),
            exchanges: self.coordinator.active(),
            discovery_micros: self.discovery_timing.last().as_micros() as u64,
            relay_micros: self.relay_timing.last().as_micros() as u64,
        }
    }

    fn dispose(&self) {
        Module::dispose(self);
    }
}

fn spawn_worker(
    role: &str,
    kind: ProtocolKind,
    work: impl FnOnce() + Send + 'static,
) -> io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name(format!("{kind}-{role}"))
        .spawn(work)
}

/// A started module. Dropping the handle stops the module.
pub struct ModuleHandle {
    module: Arc<dyn ModuleView>,
    addr: SocketAddr,
    threads: Vec<JoinHandle<()>>,
}

impl ModuleHandle {
    pub fn kind(&self) -> ProtocolKind {
        self.module.kind()
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn view(&self) -> &Arc<dyn ModuleView> {
        &self.module
    }

    /// Disposes the module and waits for its workers.
    pub fn stop(mut self) {
        self.module.dispose();
        for thread in self.threads.drain(..) {
            if thread.join().is_err() {
                log::error!("{} worker panicked", self.module.kind());
            }
        }
    }
}

impl Drop for ModuleHandle {
    fn drop(&mut self) {
        self.module.dispose();
    }
}
