use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{SystemTime, UNIX_EPOCH};

use rkyv::util::AlignedVec;
use rkyv::{Archive, Deserialize, Serialize, rancor};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store i/o error: {0}")]
    Io(#[from] io::Error),
    #[error("store snapshot is corrupt: {0}")]
    Archive(rancor::Error),
    #[error("no player record with id {0}")]
    NotFound(i32),
}

#[derive(Debug, Clone, PartialEq, Archive, Serialize, Deserialize)]
#[rkyv(derive(Debug))]
pub struct PlayerRecord {
    pub id: i32,
    pub name: String,
    pub permissions: u32,
    pub password_hash: Option<String>,
    pub position: [f32; 3],
    pub level: Option<String>,
    pub last_ip: Option<String>,
    /// Unix seconds.
    pub last_seen: u64,
}

impl PlayerRecord {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: 0,
            name: name.into(),
            permissions: 0,
            password_hash: None,
            position: [0.0; 3],
            level: None,
            last_ip: None,
            last_seen: unix_now(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Archive, Serialize, Deserialize)]
#[rkyv(derive(Debug))]
pub struct BanRecord {
    pub player_id: i32,
    pub reason: String,
    /// Unix seconds; `None` never expires.
    pub until: Option<u64>,
}

impl BanRecord {
    pub fn is_active(&self, now: u64) -> bool {
        self.until.is_none_or(|until| until > now)
    }
}

/// Persistent player and ban records.
pub trait RecordStore: Send + Sync {
    fn find(&self, predicate: &dyn Fn(&PlayerRecord) -> bool) -> Option<PlayerRecord>;
    fn get(&self, id: i32) -> Option<PlayerRecord>;
    /// Stores a new record under a freshly allocated id and returns that id.
    fn insert(&self, record: PlayerRecord) -> Result<i32, StoreError>;
    fn update(&self, record: PlayerRecord) -> Result<(), StoreError>;
    fn all(&self) -> Vec<PlayerRecord>;

    fn ban(&self, ban: BanRecord) -> Result<(), StoreError>;
    /// The ban currently in force for a player, if any.
    fn active_ban(&self, player_id: i32) -> Option<BanRecord>;

    fn flush(&self) -> Result<(), StoreError> {
        Ok(())
    }

    fn find_by_name(&self, name: &str) -> Option<PlayerRecord> {
        self.find(&|record| record.name.eq_ignore_ascii_case(name))
    }
}

#[derive(Debug, Default, Archive, Serialize, Deserialize)]
struct Snapshot {
    players: Vec<PlayerRecord>,
    bans: Vec<BanRecord>,
}

#[derive(Debug, Default)]
struct Tables {
    players: BTreeMap<i32, PlayerRecord>,
    bans: HashMap<i32, BanRecord>,
    next_id: i32,
}

/// In-memory record store, optionally backed by an archive file that is
/// written on `flush`.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
    path: Option<PathBuf>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens the archive at `path`, starting empty if it does not exist yet.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        let mut tables = Tables::default();
        match fs::read(&path) {
            Ok(data) => {
                let mut aligned = AlignedVec::<16>::with_capacity(data.len());
                aligned.extend_from_slice(&data);
                let snapshot = rkyv::from_bytes::<Snapshot, rancor::Error>(&aligned)
                    .map_err(StoreError::Archive)?;
                for record in snapshot.players {
                    tables.next_id = tables.next_id.max(record.id);
                    tables.players.insert(record.id, record);
                }
                for ban in snapshot.bans {
                    tables.bans.insert(ban.player_id, ban);
                }
                log::info!(
                    "Loaded {} player records from {}",
                    tables.players.len(),
                    path.display()
                );
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        Ok(Self {
            tables: RwLock::new(tables),
            path: Some(path),
        })
    }

    pub fn len(&self) -> usize {
        self.read().players.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn read(&self) -> RwLockReadGuard<'_, Tables> {
        self.tables.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Tables> {
        self.tables.write().unwrap_or_else(|e| e.into_inner())
    }
}

impl RecordStore for MemoryStore {
    fn find(&self, predicate: &dyn Fn(&PlayerRecord) -> bool) -> Option<PlayerRecord> {
        self.read()
            .players
            .values()
            .find(|record| predicate(record))
            .cloned()
    }

    fn get(&self, id: i32) -> Option<PlayerRecord> {
        self.read().players.get(&id).cloned()
    }

    fn insert(&self, mut record: PlayerRecord) -> Result<i32, StoreError> {
        let mut tables = self.write();
        tables.next_id += 1;
        record.id = tables.next_id;
        tables.players.insert(record.id, record);
        Ok(tables.next_id)
    }

    fn update(&self, record: PlayerRecord) -> Result<(), StoreError> {
        let mut tables = self.write();
        match tables.players.get_mut(&record.id) {
            Some(slot) => {
                *slot = record;
                Ok(())
            }
            None => Err(StoreError::NotFound(record.id)),
        }
    }

    fn all(&self) -> Vec<PlayerRecord> {
        self.read().players.values().cloned().collect()
    }

    fn ban(&self, ban: BanRecord) -> Result<(), StoreError> {
        let mut tables = self.write();
        if !tables.players.contains_key(&ban.player_id) {
            return Err(StoreError::NotFound(ban.player_id));
        }
        tables.bans.insert(ban.player_id, ban);
        Ok(())
    }

    fn active_ban(&self, player_id: i32) -> Option<BanRecord> {
        let now = unix_now();
        self.read()
            .bans
            .get(&player_id)
            .filter(|ban| ban.is_active(now))
            .cloned()
    }

    fn flush(&self) -> Result<(), StoreError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let snapshot = {
            let tables = self.read();
            Snapshot {
                players: tables.players.values().cloned().collect(),
                bans: tables.bans.values().cloned().collect(),
            }
        };
        let bytes = rkyv::to_bytes::<rancor::Error>(&snapshot).map_err(StoreError::Archive)?;
        let staging = path.with_extension("tmp");
        fs::write(&staging, &bytes[..])?;
        fs::rename(&staging, path)?;
        log::debug!(
            "Saved {} player records to {}",
            snapshot.players.len(),
            path.display()
        );
        Ok(())
    }
}

pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_allocates_ids() {
        let store = MemoryStore::new();
        let ash = store.insert(PlayerRecord::new("Ash")).unwrap();
        let misty = store.insert(PlayerRecord::new("Misty")).unwrap();
        assert_eq!((ash, misty), (1, 2));
        assert_eq!(store.get(misty).unwrap().name, "Misty");
        assert_eq!(store.find_by_name("ash").map(|r| r.id), Some(ash));
        assert!(store.find_by_name("Brock").is_none());
    }

    #[test]
    fn test_update_missing_record() {
        let store = MemoryStore::new();
        let mut record = PlayerRecord::new("Ghost");
        record.id = 9;
        assert!(matches!(store.update(record), Err(StoreError::NotFound(9))));
    }

    #[test]
    fn test_ban_expiry() {
        let store = MemoryStore::new();
        let id = store.insert(PlayerRecord::new("Gary")).unwrap();
        store
            .ban(BanRecord {
                player_id: id,
                reason: "spam".into(),
                until: Some(1),
            })
            .unwrap();
        assert!(store.active_ban(id).is_none());

        store
            .ban(BanRecord {
                player_id: id,
                reason: "spam".into(),
                until: None,
            })
            .unwrap();
        assert_eq!(store.active_ban(id).unwrap().reason, "spam");
    }

    #[test]
    fn test_snapshot_survives_reopen() {
        let path = std::env::temp_dir().join(format!("relay-store-{}.bin", std::process::id()));
        let _ = fs::remove_file(&path);

        let store = MemoryStore::open(&path).unwrap();
        let id = store.insert(PlayerRecord::new("Brock")).unwrap();
        let mut record = store.get(id).unwrap();
        record.level = Some("pewter.dat".into());
        record.position = [1.0, 0.0, -3.5];
        store.update(record.clone()).unwrap();
        store.flush().unwrap();

        let reopened = MemoryStore::open(&path).unwrap();
        assert_eq!(reopened.get(id), Some(record));
        assert_eq!(reopened.insert(PlayerRecord::new("Next")).unwrap(), id + 1);
        let _ = fs::remove_file(&path);
    }
}
