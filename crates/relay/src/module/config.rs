use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::protocol::{Protocol, ProtocolKind};

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} clients cannot negotiate encryption")]
    EncryptionUnsupported(ProtocolKind),
    #[error("{0} clients have no password step")]
    PasswordUnsupported(ProtocolKind),
    #[error("{0} must be above zero")]
    ZeroInterval(&'static str),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModuleConfig {
    pub enabled: bool,
    pub bind: String,
    pub port: u16,
    pub max_clients: usize,
    pub encryption_required: bool,
    /// Run the proximity relay loop.
    pub move_correction: bool,
    pub server_name: String,
    pub server_message: String,
    /// Hex SHA-256 of the module password, for protocols that ask for one.
    pub password_hash: Option<String>,
    pub tick_interval_ms: u64,
    pub broadcast_interval_ms: u64,
    pub discovery_interval_ms: u64,
    pub relay_interval_ms: u64,
}

impl ModuleConfig {
    pub fn for_kind(kind: ProtocolKind) -> Self {
        let base = Self {
            enabled: true,
            bind: "0.0.0.0".to_string(),
            port: 15125,
            max_clients: 1000,
            encryption_required: true,
            move_correction: true,
            server_name: "Relay Server".to_string(),
            server_message: "Welcome!".to_string(),
            password_hash: None,
            tick_interval_ms: 100,
            broadcast_interval_ms: 1000,
            discovery_interval_ms: 400,
            relay_interval_ms: 5,
        };
        match kind {
            ProtocolKind::Game => base,
            ProtocolKind::Legacy => Self {
                port: 15124,
                encryption_required: false,
                ..base
            },
            ProtocolKind::Admin => Self {
                port: 15126,
                max_clients: 8,
                move_correction: false,
                ..base
            },
        }
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn broadcast_interval(&self) -> Duration {
        Duration::from_millis(self.broadcast_interval_ms)
    }

    pub fn discovery_interval(&self) -> Duration {
        Duration::from_millis(self.discovery_interval_ms)
    }

    pub fn relay_interval(&self) -> Duration {
        Duration::from_millis(self.relay_interval_ms)
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }

    /// Checks the settings against what the protocol's handshake can do.
    pub fn validate<P: Protocol>(&self) -> Result<(), ConfigError> {
        if self.encryption_required && !P::ENCRYPTS {
            return Err(ConfigError::EncryptionUnsupported(P::KIND));
        }
        if self.password_hash.is_some() && !P::PASSWORD_STEP {
            return Err(ConfigError::PasswordUnsupported(P::KIND));
        }
        let intervals = [
            ("tick_interval_ms", self.tick_interval_ms),
            ("broadcast_interval_ms", self.broadcast_interval_ms),
            ("discovery_interval_ms", self.discovery_interval_ms),
            ("relay_interval_ms", self.relay_interval_ms),
        ];
        match intervals.into_iter().find(|(_, ms)| *ms == 0) {
            Some((name, _)) => Err(ConfigError::ZeroInterval(name)),
            None => Ok(()),
        }
    }
}

impl Default for ModuleConfig {
    fn default() -> Self {
        Self::for_kind(ProtocolKind::Game)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::admin::AdminProtocol;
    use crate::protocol::game::GameProtocol;
    use crate::protocol::legacy::LegacyProtocol;

    #[test]
    fn test_defaults_per_kind() {
        let game = ModuleConfig::for_kind(ProtocolKind::Game);
        let legacy = ModuleConfig::for_kind(ProtocolKind::Legacy);
        let admin = ModuleConfig::for_kind(ProtocolKind::Admin);
        assert_eq!((game.port, legacy.port, admin.port), (15125, 15124, 15126));
        assert!(game.encryption_required);
        assert!(!legacy.encryption_required);
        assert!(!admin.move_correction);
        assert_eq!(game.discovery_interval(), Duration::from_millis(400));
        assert_eq!(game.relay_interval(), Duration::from_millis(5));
        assert_eq!(legacy.address(), "0.0.0.0:15124");
    }

    #[test]
    fn test_defaults_are_valid() {
        let admin = ModuleConfig {
            password_hash: Some("ab".repeat(32)),
            ..ModuleConfig::for_kind(ProtocolKind::Admin)
        };
        assert_eq!(admin.validate::<AdminProtocol>(), Ok(()));
        assert_eq!(
            ModuleConfig::for_kind(ProtocolKind::Game).validate::<GameProtocol>(),
            Ok(())
        );
        assert_eq!(
            ModuleConfig::for_kind(ProtocolKind::Legacy).validate::<LegacyProtocol>(),
            Ok(())
        );
    }

    #[test]
    fn test_unsupported_handshake_settings() {
        let legacy = ModuleConfig {
            encryption_required: true,
            ..ModuleConfig::for_kind(ProtocolKind::Legacy)
        };
        assert_eq!(
            legacy.validate::<LegacyProtocol>(),
            Err(ConfigError::EncryptionUnsupported(ProtocolKind::Legacy))
        );

        let game = ModuleConfig {
            password_hash: Some("ab".repeat(32)),
            ..ModuleConfig::for_kind(ProtocolKind::Game)
        };
        assert_eq!(
            game.validate::<GameProtocol>(),
            Err(ConfigError::PasswordUnsupported(ProtocolKind::Game))
        );

        let stalled = ModuleConfig {
            relay_interval_ms: 0,
            ..ModuleConfig::for_kind(ProtocolKind::Game)
        };
        assert_eq!(
            stalled.validate::<GameProtocol>(),
            Err(ConfigError::ZeroInterval("relay_interval_ms"))
        );
    }
}
