use std::net::SocketAddr;

use crate::protocol::ProtocolKind;

#[derive(Debug, Clone, PartialEq)]
pub enum ServerEvent {
    ModuleStarted {
        module: ProtocolKind,
        addr: SocketAddr,
    },
    ModuleStopped {
        module: ProtocolKind,
    },
    ClientConnected {
        module: ProtocolKind,
        id: i32,
        name: String,
        addr: Option<SocketAddr>,
    },
    ClientDisconnected {
        module: ProtocolKind,
        id: i32,
        name: String,
    },
    ConnectionDenied {
        module: ProtocolKind,
        addr: Option<SocketAddr>,
        reason: String,
    },
    Chat {
        channel: String,
        sender: String,
        text: String,
    },
    Error {
        message: String,
    },
}

impl ServerEvent {
    pub fn is_warning(&self) -> bool {
        matches!(self, ServerEvent::ConnectionDenied { .. })
    }

    pub fn is_error(&self) -> bool {
        matches!(self, ServerEvent::Error { .. })
    }

    pub fn describe(&self) -> String {
        match self {
            ServerEvent::ModuleStarted { module, addr } => {
                format!("{module} module listening on {addr}")
            }
            ServerEvent::ModuleStopped { module } => format!("{module} module stopped"),
            ServerEvent::ClientConnected {
                module,
                id,
                name,
                addr,
            } => match addr {
                Some(addr) => format!("{name} ({id}) joined {module} from {addr}"),
                None => format!("{name} ({id}) joined {module}"),
            },
            ServerEvent::ClientDisconnected { module, id, name } => {
                format!("{name} ({id}) left {module}")
            }
            ServerEvent::ConnectionDenied {
                module,
                addr,
                reason,
            } => match addr {
                Some(addr) => format!("{module} denied {addr}: {reason}"),
                None => format!("{module} denied a client: {reason}"),
            },
            ServerEvent::Chat {
                channel,
                sender,
                text,
            } => format!("[{channel}] <{sender}> {text}"),
            ServerEvent::Error { message } => message.clone(),
        }
    }
}
