//! Reconciliation of stale participants against the authority

use crate::authority::{LineageHead, UniquenessAuthority};
use tictac_core::{LineageId, Result, StateRecord, TictacError};
use tictac_store::LocalStateStore;
use tracing::{debug, info};

/// What a resync changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    /// Local copy already matched the record of truth
    AlreadyCurrent(StateRecord),
    /// Local copy was replaced by the record of truth
    Updated(StateRecord),
    /// Lineage is retired at the authority and now locally too
    Retired,
}

/// Bring `store`'s copy of `lineage` in line with the authority.
pub async fn reconcile_lineage(
    authority: &dyn UniquenessAuthority,
    store: &dyn LocalStateStore,
    lineage: LineageId,
) -> Result<SyncOutcome> {
    let head = authority
        .record_of_truth(lineage)
        .await?
        .ok_or_else(|| TictacError::not_found(format!("{lineage} was never committed")))?;

    let _guard = store.lock_lineage(lineage).await;
    match head {
        LineageHead::Retired => {
            if !store.is_retired(lineage).await? {
                store.retire(lineage).await?;
                info!(lineage = %lineage, "Reconciled retirement");
            }
            Ok(SyncOutcome::Retired)
        }
        LineageHead::Current(truth) => {
            let local = store.current_of(lineage).await?;
            if local.as_ref() == Some(&truth) {
                debug!(lineage = %lineage, sequence = truth.sequence, "Already current");
                return Ok(SyncOutcome::AlreadyCurrent(truth));
            }
            store.upsert(lineage, truth.clone()).await?;
            info!(
                lineage = %lineage,
                from = ?local.map(|r| r.sequence),
                to = truth.sequence,
                "Reconciled lineage"
            );
            Ok(SyncOutcome::Updated(truth))
        }
    }
}
