use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::protocol::Protocol;
use crate::session::Session;

struct Entries<P: Protocol> {
    by_id: HashMap<i32, Arc<Session<P>>>,
    by_name: HashMap<String, i32>,
    by_account: HashMap<i64, i32>,
}

/// Joined sessions of one module, indexed by id, by lowercase name and by
/// verified account.
/// Iteration always goes through a snapshot so no lock is held while
/// callers touch sessions.
pub struct Registry<P: Protocol> {
    entries: RwLock<Entries<P>>,
}

impl<P: Protocol> Registry<P> {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(Entries {
                by_id: HashMap::new(),
                by_name: HashMap::new(),
                by_account: HashMap::new(),
            }),
        }
    }

    /// Registers a session under its current id, name and account. Fails
    /// without side effects if any of them is taken.
    pub fn insert(&self, session: Arc<Session<P>>) -> bool {
        let id = session.id();
        let profile = session.profile();
        let name = profile.name.to_lowercase();
        let mut entries = self.write();
        if entries.by_id.contains_key(&id)
            || entries.by_name.contains_key(&name)
            || profile
                .account_id
                .is_some_and(|account| entries.by_account.contains_key(&account))
        {
            return false;
        }
        entries.by_name.insert(name, id);
        if let Some(account) = profile.account_id {
            entries.by_account.insert(account, id);
        }
        entries.by_id.insert(id, session);
        true
    }

    /// Removes `session` if it is the one registered under its id.
    pub fn remove(&self, session: &Session<P>) -> Option<Arc<Session<P>>> {
        let mut entries = self.write();
        let id = session.id();
        match entries.by_id.get(&id) {
            Some(existing) if existing.key() == session.key() => {}
            _ => return None,
        }
        let removed = entries.by_id.remove(&id)?;
        entries.by_name.retain(|_, mapped| *mapped != id);
        entries.by_account.retain(|_, mapped| *mapped != id);
        Some(removed)
    }

    pub fn get(&self, id: i32) -> Option<Arc<Session<P>>> {
        self.read().by_id.get(&id).cloned()
    }

    pub fn by_name(&self, name: &str) -> Option<Arc<Session<P>>> {
        let entries = self.read();
        let id = entries.by_name.get(&name.to_lowercase())?;
        entries.by_id.get(id).cloned()
    }

    pub fn contains(&self, id: i32) -> bool {
        self.read().by_id.contains_key(&id)
    }

    pub fn contains_name(&self, name: &str) -> bool {
        self.read().by_name.contains_key(&name.to_lowercase())
    }

    pub fn snapshot(&self) -> Vec<Arc<Session<P>>> {
        let mut sessions: Vec<_> = self.read().by_id.values().cloned().collect();
        sessions.sort_by_key(|session| session.id());
        sessions
    }

    pub fn len(&self) -> usize {
        self.read().by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn read(&self) -> RwLockReadGuard<'_, Entries<P>> {
        self.entries.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Entries<P>> {
        self.entries.write().unwrap_or_else(|e| e.into_inner())
    }
}

impl<P: Protocol> Default for Registry<P> {
    fn default() -> Self {
        Self::new()
    }
}
