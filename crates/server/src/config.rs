use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;

use relay::auth::DEFAULT_KEY_BITS;
use relay::{ModuleConfig, ProtocolKind, WorldConfig, hash_password};

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub game: ModuleConfig,
    pub legacy: ModuleConfig,
    pub admin: ModuleConfig,
    pub store_path: Option<PathBuf>,
    pub rsa_bits: usize,
    pub world: WorldConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            game: ModuleConfig::for_kind(ProtocolKind::Game),
            legacy: legacy_defaults(),
            admin: ModuleConfig::for_kind(ProtocolKind::Admin),
            store_path: None,
            rsa_bits: DEFAULT_KEY_BITS,
            world: WorldConfig::default(),
        }
    }
}

/// On-disk layout. Module sections only list what differs from the
/// defaults of their kind.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ConfigFile {
    game: Option<toml::Table>,
    legacy: Option<toml::Table>,
    admin: Option<toml::Table>,
    admin_password: Option<String>,
    store_path: Option<PathBuf>,
    rsa_bits: Option<usize>,
    world: WorldConfig,
}

impl ServerConfig {
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let text = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        Self::parse(&text).with_context(|| format!("Invalid config {}", path.display()))
    }

    pub fn parse(text: &str) -> Result<Self> {
        let file: ConfigFile = toml::from_str(text)?;
        let mut config = Self {
            game: merge(ModuleConfig::for_kind(ProtocolKind::Game), file.game)?,
            legacy: merge(legacy_defaults(), file.legacy)?,
            admin: merge(ModuleConfig::for_kind(ProtocolKind::Admin), file.admin)?,
            store_path: file.store_path,
            rsa_bits: file.rsa_bits.unwrap_or(DEFAULT_KEY_BITS),
            world: file.world,
        };
        if let Some(password) = file.admin_password.filter(|p| !p.is_empty()) {
            config.admin.password_hash = Some(hash_password(&password));
        }
        Ok(config)
    }

    /// The admin module only runs once a password is set.
    pub fn admin_enabled(&self) -> bool {
        self.admin.enabled && self.admin.password_hash.is_some()
    }
}

fn legacy_defaults() -> ModuleConfig {
    ModuleConfig::for_kind(ProtocolKind::Legacy)
}

fn merge(defaults: ModuleConfig, overrides: Option<toml::Table>) -> Result<ModuleConfig> {
    let Some(overrides) = overrides else {
        return Ok(defaults);
    };
    let mut table = toml::Table::try_from(defaults)?;
    table.extend(overrides);
    Ok(table.try_into()?)
}
