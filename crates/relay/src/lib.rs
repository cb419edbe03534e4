pub mod auth;
pub mod chat;
pub mod event;
pub mod exchange;
pub mod hub;
pub mod module;
pub mod net;
pub mod permissions;
pub mod protocol;
pub mod session;
pub mod store;
pub mod world;

pub use auth::{HandshakeError, Negotiator, ServerKeys, hash_password};
pub use chat::{ChatBus, ChatChannel, ChatMessage, ChatScope, ChatSink, GLOBAL_CHANNEL};
pub use event::ServerEvent;
pub use exchange::{Coordinator, ExchangeEvent, ExchangeKind, ExchangeState, Notice, NoticeKind};
pub use hub::{CommandCall, CommandExecutor, Hub, ModuleStats, ModuleView, PlayerSummary};
pub use module::{AdmissionError, ConfigError, Module, ModuleConfig, ModuleHandle, Recipient};
pub use net::{Message, Packet, Transport, TransportError};
pub use permissions::PermissionFlags;
pub use protocol::admin::AdminProtocol;
pub use protocol::game::GameProtocol;
pub use protocol::legacy::LegacyProtocol;
pub use protocol::{Protocol, ProtocolKind};
pub use session::{Profile, Session, SessionError, SessionPump, SessionStatus};
pub use store::{BanRecord, MemoryStore, PlayerRecord, RecordStore, StoreError};
pub use world::{Season, Weather, World, WorldConfig, WorldState};
