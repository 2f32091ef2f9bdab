//! In-memory local state store

use crate::{LineageGuard, LocalStateStore};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tictac_core::{LineageId, ParticipantId, Result, StateRecord, TictacError, ValidationError};
use tokio::sync::{Mutex, RwLock};
use tracing::debug;

#[derive(Default)]
struct StoreState {
    records: HashMap<LineageId, StateRecord>,
    by_participant: HashMap<ParticipantId, LineageId>,
    retired: HashSet<LineageId>,
}

/// In-memory store with a participant index.
///
/// Records and the index live under one lock so they are always updated in
/// the same critical section.
#[derive(Clone, Default)]
pub struct MemoryStateStore {
    state: Arc<RwLock<StoreState>>,
    locks: Arc<parking_lot::Mutex<HashMap<LineageId, Arc<Mutex<()>>>>>,
}

impl MemoryStateStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live lineages
    pub async fn len(&self) -> usize {
        self.state.read().await.records.len()
    }

    /// Whether no lineage is live
    pub async fn is_empty(&self) -> bool {
        self.state.read().await.records.is_empty()
    }

    // A lock only the table references has no holder and no waiter.
    fn prune_idle_locks(locks: &mut HashMap<LineageId, Arc<Mutex<()>>>) {
        locks.retain(|_, lock| Arc::strong_count(lock) > 1);
    }
}

#[async_trait]
impl LocalStateStore for MemoryStateStore {
    async fn upsert(&self, lineage: LineageId, record: StateRecord) -> Result<()> {
        if record.id != lineage {
            return Err(TictacError::storage(format!(
                "record for {} written under {lineage}",
                record.id
            )));
        }

        let mut state = self.state.write().await;
        if state.retired.contains(&lineage) {
            return Err(TictacError::storage(format!("{lineage} is retired")));
        }

        if let Some(current) = state.records.get(&lineage) {
            if record.sequence < current.sequence {
                return Err(TictacError::storage(format!(
                    "{lineage} would move back from sequence {} to {}",
                    current.sequence, record.sequence
                )));
            }
            if record.sequence == current.sequence && record != *current {
                return Err(TictacError::storage(format!(
                    "{lineage} has two different records at sequence {}",
                    record.sequence
                )));
            }
        }

        for party in record.participants() {
            let Some(&indexed) = state.by_participant.get(&party) else {
                continue;
            };
            if indexed == lineage {
                continue;
            }
            let busy = state
                .records
                .get(&indexed)
                .is_some_and(StateRecord::is_in_progress);
            if busy {
                return Err(ValidationError::AlreadyInGame {
                    participant: party,
                    lineage: indexed,
                }
                .into());
            }
        }

        for party in record.participants() {
            state.by_participant.insert(party, lineage);
        }
        debug!(
            lineage = %lineage,
            sequence = record.sequence,
            status = ?record.status,
            "Stored record"
        );
        state.records.insert(lineage, record);
        Ok(())
    }

    async fn retire(&self, lineage: LineageId) -> Result<Option<StateRecord>> {
        let mut state = self.state.write().await;
        let removed = state.records.remove(&lineage);
        state.by_participant.retain(|_, indexed| *indexed != lineage);
        state.retired.insert(lineage);
        Self::prune_idle_locks(&mut self.locks.lock());
        debug!(lineage = %lineage, had_record = removed.is_some(), "Retired lineage");
        Ok(removed)
    }

    async fn current_of(&self, lineage: LineageId) -> Result<Option<StateRecord>> {
        Ok(self.state.read().await.records.get(&lineage).cloned())
    }

    async fn current_by_participant(&self, party: ParticipantId) -> Result<Option<StateRecord>> {
        let state = self.state.read().await;
        Ok(state
            .by_participant
            .get(&party)
            .and_then(|lineage| state.records.get(lineage))
            .cloned())
    }

    async fn lineages(&self) -> Result<Vec<LineageId>> {
        let mut lineages: Vec<_> = self.state.read().await.records.keys().copied().collect();
        lineages.sort();
        Ok(lineages)
    }

    async fn is_retired(&self, lineage: LineageId) -> Result<bool> {
        Ok(self.state.read().await.retired.contains(&lineage))
    }

    async fn lock_lineage(&self, lineage: LineageId) -> LineageGuard {
        let lock = {
            let mut locks = self.locks.lock();
            Self::prune_idle_locks(&mut locks);
            locks.entry(lineage).or_default().clone()
        };
        lock.lock_owned().await
    }
}
