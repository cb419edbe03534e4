pub mod admin;
pub mod game;
pub mod legacy;

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::chat::ChatMessage;
use crate::exchange::Notice;
use crate::net::Message;
use crate::session::{HandlerTable, Profile};
use crate::world::WorldState;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProtocolKind {
    Game,
    Legacy,
    Admin,
}

impl ProtocolKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProtocolKind::Game => "game",
            ProtocolKind::Legacy => "legacy",
            ProtocolKind::Admin => "admin",
        }
    }
}

impl fmt::Display for ProtocolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// One wire protocol: its packet set, its handler table, and how the
/// module's generic events are spelled in it. Anything a protocol cannot
/// express returns `None` and is skipped.
pub trait Protocol: Sized + Send + Sync + 'static {
    type Message: Message;

    const KIND: ProtocolKind;
    /// Sessions take part in the name directory, chat and player lists.
    const VISIBLE: bool = true;
    /// Admission compares the client's password hash with the stored one.
    const CHECKS_PASSWORD: bool = false;
    /// The handshake can switch the stream to AES-CFB8.
    const ENCRYPTS: bool = true;
    /// The handshake has a module password step.
    const PASSWORD_STEP: bool = false;

    fn handlers() -> HandlerTable<Self>;

    fn kick(reason: &str) -> Self::Message;

    fn auth_failure(reason: &str) -> Self::Message {
        Self::kick(reason)
    }

    /// Sent once admission succeeds, ahead of everything else.
    fn authorization_complete() -> Option<Self::Message> {
        None
    }

    fn own_id(_id: i32) -> Option<Self::Message> {
        None
    }

    fn create_player(_id: i32) -> Option<Self::Message> {
        None
    }

    fn destroy_player(_id: i32) -> Option<Self::Message> {
        None
    }

    fn player_state(_profile: &Profile) -> Option<Self::Message> {
        None
    }

    fn world_state(_state: &WorldState) -> Option<Self::Message> {
        None
    }

    fn chat(_message: &ChatMessage) -> Option<Self::Message> {
        None
    }

    fn server_message(_text: &str) -> Option<Self::Message> {
        None
    }

    fn exchange_notice(_notice: &Notice) -> Option<Self::Message> {
        None
    }
}
