use std::collections::HashMap;

use crate::net::Packet;
use crate::protocol::Protocol;

use super::pump::{Context, SessionError};

/// When a handler may run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Any time, including before the session joined.
    Handshake,
    /// Only once the session joined; earlier packets are dropped.
    Joined,
}

pub type Handler<P> =
    fn(&mut Context<'_, P>, Packet<<P as Protocol>::Message>) -> Result<(), SessionError>;

pub struct HandlerEntry<P: Protocol> {
    pub phase: Phase,
    pub handler: Handler<P>,
}

impl<P: Protocol> Clone for HandlerEntry<P> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<P: Protocol> Copy for HandlerEntry<P> {}

/// Packet id to handler mapping for one protocol.
pub struct HandlerTable<P: Protocol> {
    entries: HashMap<i32, HandlerEntry<P>>,
}

impl<P: Protocol> HandlerTable<P> {
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    pub fn on(mut self, id: i32, phase: Phase, handler: Handler<P>) -> Self {
        if self
            .entries
            .insert(id, HandlerEntry { phase, handler })
            .is_some()
        {
            log::warn!("{} handler for {:#04x} registered twice", P::KIND, id);
        }
        self
    }

    pub fn get(&self, id: i32) -> Option<HandlerEntry<P>> {
        self.entries.get(&id).copied()
    }

    pub fn contains(&self, id: i32) -> bool {
        self.entries.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<P: Protocol> Default for HandlerTable<P> {
    fn default() -> Self {
        Self::new()
    }
}
