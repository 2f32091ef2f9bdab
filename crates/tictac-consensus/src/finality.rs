//! Finality broadcast
//!
//! After the authority commits, the initiator installs the new version in its
//! own store and pushes `FINALIZE` to every other participant. A participant
//! that cannot be reached stays stale until it reconciles against the
//! authority's record of truth.

use crate::authority::CommitReceipt;
use crate::messages::{FinalityAck, FinalityNotice, SignedTransition};
use crate::session::SessionRouter;
use futures::future::join_all;
use std::time::Duration;
use tictac_core::{ParticipantId, Result, TictacError, TransitionKind};
use tictac_store::LocalStateStore;
use tracing::{debug, warn};

/// Install a committed artifact in `store`.
///
/// The caller must hold the lineage lock. Applying a version the store has
/// already reached is a no-op.
pub async fn apply_committed(
    store: &dyn LocalStateStore,
    artifact: &SignedTransition,
) -> Result<FinalityAck> {
    let proposal = &artifact.proposal;
    let lineage = proposal.lineage;
    if store.is_retired(lineage).await? {
        return Ok(FinalityAck::AlreadyCurrent);
    }

    match (proposal.kind, &proposal.candidate) {
        (TransitionKind::Open | TransitionKind::Move, Some(candidate)) => {
            if let Some(current) = store.current_of(lineage).await? {
                if current.sequence >= candidate.sequence {
                    return Ok(FinalityAck::AlreadyCurrent);
                }
            }
            store.upsert(lineage, candidate.clone()).await?;
            Ok(FinalityAck::Applied)
        }
        (TransitionKind::Close, None) => {
            store.retire(lineage).await?;
            Ok(FinalityAck::Applied)
        }
        (kind, _) => Err(TictacError::internal(format!(
            "{kind:?} artifact has the wrong candidate shape"
        ))),
    }
}

/// Outcome of one broadcast.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FinalityReport {
    /// Participants whose store holds the committed version
    pub delivered: Vec<ParticipantId>,
    /// Participants that must reconcile
    pub stale: Vec<ParticipantId>,
}

impl FinalityReport {
    /// Every participant holds the committed version
    pub fn is_complete(&self) -> bool {
        self.stale.is_empty()
    }
}

/// Pushes committed transitions to participant stores.
#[derive(Clone)]
pub struct FinalityBroadcaster {
    router: SessionRouter,
    timeout: Duration,
}

impl FinalityBroadcaster {
    /// Broadcaster bounding each delivery by `timeout`
    pub fn new(router: SessionRouter, timeout: Duration) -> Self {
        Self { router, timeout }
    }

    /// Apply locally, then deliver to every other participant in parallel.
    ///
    /// Never fails: the transition is already committed, so delivery
    /// failures only mark participants stale.
    pub async fn broadcast(
        &self,
        local: ParticipantId,
        local_store: &dyn LocalStateStore,
        artifact: &SignedTransition,
        receipt: &CommitReceipt,
    ) -> FinalityReport {
        let mut report = FinalityReport::default();
        match apply_committed(local_store, artifact).await {
            Ok(_) => report.delivered.push(local),
            Err(e) => {
                warn!(participant = %local, lineage = %receipt.lineage, error = %e, "Local apply failed");
                report.stale.push(local);
            }
        }

        let notice = FinalityNotice {
            artifact: artifact.clone(),
            receipt: receipt.clone(),
        };
        let deliveries = artifact
            .proposal
            .participants
            .iter()
            .copied()
            .filter(|party| *party != local)
            .map(|party| {
                let notice = notice.clone();
                async move { (party, self.deliver(local, party, notice).await) }
            });

        for (party, outcome) in join_all(deliveries).await {
            match outcome {
                Ok(FinalityAck::Applied | FinalityAck::AlreadyCurrent) => {
                    report.delivered.push(party);
                }
                Ok(FinalityAck::Failed { reason }) => {
                    warn!(participant = %party, lineage = %receipt.lineage, reason = %reason, "Participant is stale");
                    report.stale.push(party);
                }
                Err(e) => {
                    warn!(participant = %party, lineage = %receipt.lineage, error = %e, "Participant is stale");
                    report.stale.push(party);
                }
            }
        }

        debug!(
            lineage = %receipt.lineage,
            delivered = report.delivered.len(),
            stale = report.stale.len(),
            "Finality broadcast complete"
        );
        report
    }

    async fn deliver(
        &self,
        from: ParticipantId,
        to: ParticipantId,
        notice: FinalityNotice,
    ) -> Result<FinalityAck> {
        let session = self.router.open_session(from, to)?;
        session.finalize(notice, self.timeout).await
    }
}
