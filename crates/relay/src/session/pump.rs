use std::io;
use std::sync::Arc;
use std::time::Duration;

use crate::auth::{HandshakeError, Negotiator, ServerKeys};
use crate::module::{AdmissionError, Module};
use crate::net::{Packet, Transport, TransportError};
use crate::protocol::Protocol;

use super::handlers::{HandlerTable, Phase};
use super::{Session, SessionStatus};

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("handshake failed: {0}")]
    Handshake(#[from] HandshakeError),
    #[error("admission refused: {0}")]
    Admission(#[from] AdmissionError),
    #[error("no handler for packet {0:#04x}")]
    Unhandled(i32),
    #[error("write failed: {0}")]
    Io(#[from] io::Error),
}

impl SessionError {
    fn is_fault(&self) -> bool {
        matches!(
            self,
            SessionError::Io(_) | SessionError::Transport(TransportError::Io(_))
        )
    }
}

/// What a handler gets to work with.
pub struct Context<'a, P: Protocol> {
    pub session: &'a Arc<Session<P>>,
    pub module: &'a Arc<Module<P>>,
    pub transport: &'a mut Transport<P::Message>,
    pub negotiator: &'a mut Negotiator,
}

impl<P: Protocol> Context<'_, P> {
    pub fn id(&self) -> i32 {
        self.session.id()
    }

    pub fn reply(&self, message: P::Message) {
        self.session.send_server(message);
    }

    pub fn keys(&self) -> &ServerKeys {
        self.module.hub().keys()
    }

    /// Admits the session into the module once the handshake is done.
    /// Calling it again after a successful join does nothing.
    pub fn join(&mut self) -> Result<(), SessionError> {
        if !self.negotiator.is_ready() {
            return Err(HandshakeError::OutOfOrder.into());
        }
        if self.session.is_joined() {
            return Ok(());
        }
        self.module.admit(self.session)?;
        Ok(())
    }
}

/// Drives one session: reads and dispatches inbound packets, then writes
/// everything queued for it.
pub struct SessionPump<P: Protocol> {
    session: Arc<Session<P>>,
    module: Arc<Module<P>>,
    transport: Transport<P::Message>,
    negotiator: Negotiator,
    handlers: Arc<HandlerTable<P>>,
    tick: Duration,
}

impl<P: Protocol> SessionPump<P> {
    pub(crate) fn new(
        session: Arc<Session<P>>,
        module: Arc<Module<P>>,
        transport: Transport<P::Message>,
        handlers: Arc<HandlerTable<P>>,
    ) -> Self {
        let config = module.config();
        let negotiator = Negotiator::new(config.encryption_required, config.password_hash.is_some());
        let tick = config.tick_interval();
        Self {
            session,
            module,
            transport,
            negotiator,
            handlers,
            tick,
        }
    }

    pub fn session(&self) -> &Arc<Session<P>> {
        &self.session
    }

    pub fn transport(&self) -> &Transport<P::Message> {
        &self.transport
    }

    pub fn negotiator(&self) -> &Negotiator {
        &self.negotiator
    }

    /// One pump iteration. Returns false once the session is finished and
    /// cleaned up.
    pub fn pump_once(&mut self) -> bool {
        if self.session.status() == SessionStatus::Connecting {
            self.session.set_status(SessionStatus::Negotiating);
        }

        while !self.session.is_stopped() && self.transport.connected() {
            match self.transport.read_packet() {
                Ok(Some(packet)) => {
                    if let Err(e) = self.dispatch(packet) {
                        self.fail(e);
                    }
                }
                Ok(None) => break,
                Err(e) => self.fail(e.into()),
            }
        }

        self.flush();

        if self.session.is_stopped() || !self.transport.connected() {
            self.cleanup();
            return false;
        }
        true
    }

    pub fn run(mut self) {
        while self.pump_once() {
            self.session.stop_signal().sleep(self.tick);
        }
    }

    fn dispatch(&mut self, packet: Packet<P::Message>) -> Result<(), SessionError> {
        let id = packet.id();
        let Some(entry) = self.handlers.get(id) else {
            return Err(SessionError::Unhandled(id));
        };
        if entry.phase == Phase::Joined && !self.session.is_joined() {
            log::debug!(
                "{} dropped packet {:#04x} from {:?} before join",
                P::KIND,
                id,
                self.session.addr()
            );
            return Ok(());
        }
        let mut context = Context {
            session: &self.session,
            module: &self.module,
            transport: &mut self.transport,
            negotiator: &mut self.negotiator,
        };
        (entry.handler)(&mut context, packet)
    }

    fn fail(&mut self, error: SessionError) {
        if error.is_fault() {
            log::debug!("{} session {:?}: {}", P::KIND, self.session.addr(), error);
            self.session.stop();
            return;
        }
        log::warn!(
            "{} session {} ({:?}): {}",
            P::KIND,
            self.session.name(),
            self.session.addr(),
            error
        );
        let message = match &error {
            SessionError::Handshake(e) => P::auth_failure(e.reason()),
            SessionError::Admission(e) => P::kick(&e.to_string()),
            _ => P::kick("Invalid packet"),
        };
        if matches!(
            error,
            SessionError::Handshake(_) | SessionError::Admission(_)
        ) {
            self.module.denied(&self.session, &error);
        }
        self.session.send_server(message);
        self.session.stop();
    }

    fn flush(&mut self) {
        for packet in self.session.drain_outbound() {
            if let Err(e) = self.transport.write_packet(&packet) {
                log::debug!("{} write to {:?} failed: {}", P::KIND, self.session.addr(), e);
                break;
            }
        }
    }

    fn cleanup(&mut self) {
        if !self.session.begin_cleanup() {
            return;
        }
        self.session.stop();
        self.session.set_status(SessionStatus::Disconnected);
        self.transport.shutdown();
        self.module.remove(&self.session);
        self.module.detach(&self.session);
    }
}

impl<P: Protocol> Drop for SessionPump<P> {
    fn drop(&mut self) {
        self.cleanup();
    }
}
