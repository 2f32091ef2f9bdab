//! Tictac Store - each participant's view of the games it takes part in
//!
//! A store holds exactly one current record per live lineage plus an index
//! from participant to the lineage it is playing. Records only enter a store
//! after the uniqueness authority has committed them, so the store never
//! decides legality; it only refuses writes that would corrupt its own view.

#![forbid(unsafe_code)]

mod memory;

pub use memory::MemoryStateStore;

use async_trait::async_trait;
use tictac_core::{LineageId, ParticipantId, Result, StateRecord};

/// Guard serializing read-modify-write on one lineage within a node.
pub type LineageGuard = tokio::sync::OwnedMutexGuard<()>;

/// Local State Store contract
#[async_trait]
pub trait LocalStateStore: Send + Sync {
    /// Install `record` as the current version of `lineage`.
    ///
    /// Fails with `AlreadyInGame` when an owner is already indexed to a
    /// different in-progress lineage, and with a storage error when the
    /// record does not belong to `lineage` or would move it backwards.
    async fn upsert(&self, lineage: LineageId, record: StateRecord) -> Result<()>;

    /// Remove `lineage` and its participant index entries.
    ///
    /// Returns the record that was current, `None` if nothing was stored.
    async fn retire(&self, lineage: LineageId) -> Result<Option<StateRecord>>;

    /// Current version of `lineage`
    async fn current_of(&self, lineage: LineageId) -> Result<Option<StateRecord>>;

    /// Current record of the game `party` is indexed to
    async fn current_by_participant(&self, party: ParticipantId) -> Result<Option<StateRecord>>;

    /// Every live lineage
    async fn lineages(&self) -> Result<Vec<LineageId>>;

    /// Whether `lineage` has been retired here
    async fn is_retired(&self, lineage: LineageId) -> Result<bool>;

    /// Acquire the per-lineage lock.
    async fn lock_lineage(&self, lineage: LineageId) -> LineageGuard;
}
