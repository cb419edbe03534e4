use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::net::Packet;
use crate::protocol::Protocol;

use super::registry::Registry;

pub type GroupMap = HashMap<String, Arc<[i32]>>;

/// Sessions grouped by level key. The whole map is rebuilt by discovery and
/// swapped in one step, so readers see either the old or the new grouping.
#[derive(Debug, Default)]
pub struct ProximityGroups {
    current: RwLock<Arc<GroupMap>>,
}

impl ProximityGroups {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> Arc<GroupMap> {
        Arc::clone(&self.current.read().unwrap_or_else(|e| e.into_inner()))
    }

    pub fn group_of(&self, level: &str) -> Option<Arc<[i32]>> {
        self.current().get(level).cloned()
    }

    /// Regroups every joined session with a level; returns the group count.
    pub fn discover<P: Protocol>(&self, registry: &Registry<P>) -> usize {
        let mut grouped: HashMap<String, Vec<i32>> = HashMap::new();
        for session in registry.snapshot() {
            if !session.is_joined() {
                continue;
            }
            if let Some(level) = session.profile().level {
                grouped.entry(level).or_default().push(session.id());
            }
        }
        let groups: GroupMap = grouped
            .into_iter()
            .map(|(level, mut ids)| {
                ids.sort_unstable();
                (level, Arc::from(ids))
            })
            .collect();
        let count = groups.len();
        *self.current.write().unwrap_or_else(|e| e.into_inner()) = Arc::new(groups);
        count
    }

    /// Sends each moving member's state to the rest of its group; returns
    /// the number of packets queued.
    pub fn relay<P: Protocol>(&self, registry: &Registry<P>) -> usize {
        let groups = self.current();
        let mut sent = 0;
        for members in groups.values() {
            if members.len() < 2 {
                continue;
            }
            for &source_id in members.iter() {
                let Some(source) = registry.get(source_id) else {
                    continue;
                };
                let profile = source.profile();
                if !profile.moving {
                    continue;
                }
                let Some(state) = P::player_state(&profile) else {
                    continue;
                };
                let packet = Packet::new(source_id, state);
                for &target_id in members.iter().filter(|id| **id != source_id) {
                    if let Some(target) = registry.get(target_id) {
                        target.send(packet.clone());
                        sent += 1;
                    }
                }
            }
        }
        sent
    }
}
