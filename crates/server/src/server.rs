use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};

use relay::{
    AdminProtocol, GameProtocol, Hub, LegacyProtocol, MemoryStore, Module, ModuleConfig,
    ModuleHandle, ModuleStats, PlayerSummary, Protocol, ProtocolKind, RecordStore, ServerEvent,
    ServerKeys,
};

use crate::config::ServerConfig;

const KICK_REASON: &str = "Kicked by the server console.";

#[derive(Debug, Clone)]
pub struct ModuleOverview {
    pub kind: ProtocolKind,
    pub addr: SocketAddr,
    pub max_clients: usize,
    pub stats: ModuleStats,
}

pub struct RelayServer {
    hub: Arc<Hub>,
    store: Arc<dyn RecordStore>,
    handles: Vec<(ModuleHandle, usize)>,
    running: Arc<AtomicBool>,
    start_time: Instant,
}

impl RelayServer {
    pub fn start(config: &ServerConfig) -> Result<Self> {
        let store: Arc<dyn RecordStore> = match &config.store_path {
            Some(path) => Arc::new(
                MemoryStore::open(path)
                    .with_context(|| format!("Failed to open store {}", path.display()))?,
            ),
            None => Arc::new(MemoryStore::new()),
        };
        log::info!("Generating {}-bit server key", config.rsa_bits);
        let keys = Arc::new(ServerKeys::generate(config.rsa_bits)?);
        let hub = Hub::new(Arc::clone(&store), keys, config.world.clone());

        let mut server = Self {
            hub,
            store,
            handles: Vec::new(),
            running: Arc::new(AtomicBool::new(true)),
            start_time: Instant::now(),
        };
        server.launch::<GameProtocol>(&config.game)?;
        server.launch::<LegacyProtocol>(&config.legacy)?;
        if config.admin_enabled() {
            server.launch::<AdminProtocol>(&config.admin)?;
        } else if config.admin.enabled {
            log::warn!("Admin module disabled: no admin_password configured");
        }
        Ok(server)
    }

    fn launch<P: Protocol>(&mut self, config: &ModuleConfig) -> Result<()> {
        if !config.enabled {
            log::info!("{} module disabled", P::KIND);
            return Ok(());
        }
        let module = Module::<P>::new(config.clone(), Arc::clone(&self.hub))
            .with_context(|| format!("Invalid {} module config", P::KIND))?;
        let handle = module
            .start()
            .with_context(|| format!("Failed to start {} module on {}", P::KIND, config.address()))?;
        self.handles.push((handle, config.max_clients));
        Ok(())
    }

    pub fn running(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.running)
    }

    pub fn uptime(&self) -> Duration {
        self.start_time.elapsed()
    }

    pub fn drain_events(&self) -> Vec<ServerEvent> {
        self.hub.drain_events()
    }

    pub fn modules(&self) -> Vec<ModuleOverview> {
        self.handles
            .iter()
            .map(|(handle, max_clients)| ModuleOverview {
                kind: handle.kind(),
                addr: handle.local_addr(),
                max_clients: *max_clients,
                stats: handle.view().stats(),
            })
            .collect()
    }

    pub fn players(&self) -> Vec<PlayerSummary> {
        self.hub.players()
    }

    pub fn kick(&self, name: &str) -> bool {
        self.hub.kick(name, KICK_REASON)
    }

    pub fn flush_store(&self) {
        if let Err(e) = self.store.flush() {
            log::error!("Failed to flush player records: {}", e);
        }
    }

    /// Stops every module, kicking their sessions, and saves the store.
    pub fn shutdown(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        for (handle, _) in self.handles.drain(..) {
            handle.stop();
        }
        self.hub.dispose();
    }
}

impl Drop for RelayServer {
    fn drop(&mut self) {
        if !self.handles.is_empty() {
            self.shutdown();
        }
    }
}
