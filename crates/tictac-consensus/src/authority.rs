//! Uniqueness authority
//!
//! The single linearization point of the protocol: a compare-and-swap keyed by
//! the version a transition consumes. Once a version key is consumed, every
//! other artifact consuming it gets [`CommitOutcome::Conflict`], including the
//! identical artifact submitted again.
//!
//! The same critical section enforces one live game per participant, so two
//! opens racing for a shared participant cannot both commit.

use crate::messages::SignedTransition;
use crate::signing::KeyDirectory;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use tictac_core::{
    LineageId, ParticipantId, ProposalId, Result, StateRecord, TictacError, TransitionKind,
    ValidationError, VersionKey,
};
use tracing::{debug, warn};

/// Proof that an artifact was committed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitReceipt {
    /// Committed proposal
    pub proposal_id: ProposalId,
    /// Lineage advanced
    pub lineage: LineageId,
    /// Version consumed
    pub consumed: VersionKey,
    /// Version now current, `None` once retired
    pub produced: Option<VersionKey>,
    /// Position in the authority's audit log
    pub position: u64,
}

/// Result of a compare-and-swap.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitOutcome {
    /// The version was unconsumed and now belongs to this artifact
    Committed(CommitReceipt),
    /// Another artifact already consumed the version
    Conflict {
        /// Contended version
        version_key: VersionKey,
        /// Proposal that consumed it
        consumed_by: ProposalId,
    },
}

/// Authority's view of a lineage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LineageHead {
    /// Latest committed record
    Current(StateRecord),
    /// Closed; no further transitions
    Retired,
}

/// Compare-and-swap contract consumed by the core.
#[async_trait]
pub trait UniquenessAuthority: Send + Sync {
    /// Atomically consume `version_key` for `artifact` if nobody has yet.
    async fn commit_if_unconsumed(
        &self,
        version_key: VersionKey,
        artifact: &SignedTransition,
    ) -> Result<CommitOutcome>;

    /// Committed head of `lineage`, used to reconcile stale participants.
    async fn record_of_truth(&self, lineage: LineageId) -> Result<Option<LineageHead>>;

    /// Proposal that consumed `version_key`, if any.
    ///
    /// Participants confirm a `FINALIZE` against this before applying it.
    async fn consumed_by(&self, version_key: VersionKey) -> Result<Option<ProposalId>>;
}

#[derive(Default)]
struct AuthorityState {
    consumed: HashMap<VersionKey, ProposalId>,
    heads: HashMap<LineageId, LineageHead>,
    // Lineage each participant is playing, while it is in progress.
    live: HashMap<ParticipantId, LineageId>,
    log: Vec<CommitReceipt>,
}

/// Centralized in-process sequencer.
///
/// Checks the artifact's quorum before the swap and keeps an append-only log
/// of every receipt it issued.
pub struct InMemoryAuthority {
    directory: KeyDirectory,
    state: Mutex<AuthorityState>,
    available: AtomicBool,
}

impl InMemoryAuthority {
    /// Authority verifying endorsements against `directory`
    pub fn new(directory: KeyDirectory) -> Self {
        Self {
            directory,
            state: Mutex::new(AuthorityState::default()),
            available: AtomicBool::new(true),
        }
    }

    /// Simulate an outage; while unavailable every call fails
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Every receipt issued, oldest first
    pub fn audit_log(&self) -> Vec<CommitReceipt> {
        self.state.lock().log.clone()
    }

    /// Lineage `participant` is currently playing
    pub fn live_lineage_of(&self, participant: ParticipantId) -> Option<LineageId> {
        self.state.lock().live.get(&participant).copied()
    }

    fn ensure_available(&self) -> Result<()> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(TictacError::authority_unavailable(
                "uniqueness authority is offline",
            ))
        }
    }
}

fn check_shape(artifact: &SignedTransition) -> Result<()> {
    let proposal = &artifact.proposal;
    match (proposal.kind, &proposal.candidate) {
        (TransitionKind::Open | TransitionKind::Move, Some(candidate)) => {
            if candidate.id != proposal.lineage {
                return Err(TictacError::internal(format!(
                    "candidate for {} submitted under {}",
                    candidate.id, proposal.lineage
                )));
            }
            Ok(())
        }
        (TransitionKind::Close, None) => Ok(()),
        (kind, _) => Err(TictacError::internal(format!(
            "{kind:?} artifact has the wrong candidate shape"
        ))),
    }
}

#[async_trait]
impl UniquenessAuthority for InMemoryAuthority {
    async fn commit_if_unconsumed(
        &self,
        version_key: VersionKey,
        artifact: &SignedTransition,
    ) -> Result<CommitOutcome> {
        self.ensure_available()?;

        let proposal = &artifact.proposal;
        if proposal.prior_version != version_key {
            return Err(TictacError::internal(format!(
                "artifact consumes {} but was submitted for {version_key}",
                proposal.prior_version
            )));
        }
        check_shape(artifact)?;
        let proposal_id = artifact.verify(&self.directory)?;

        let mut state = self.state.lock();
        if let Some(&consumed_by) = state.consumed.get(&version_key) {
            warn!(
                version = %version_key,
                proposal = %proposal_id,
                consumed_by = %consumed_by,
                "Version already consumed"
            );
            return Ok(CommitOutcome::Conflict {
                version_key,
                consumed_by,
            });
        }

        // Only the current head (or genesis for a fresh lineage) may be consumed.
        let expected = match state.heads.get(&proposal.lineage) {
            None => VersionKey::genesis(proposal.lineage),
            Some(LineageHead::Current(record)) => record.version_key(),
            Some(LineageHead::Retired) => {
                return Err(TictacError::not_found(format!(
                    "{} is retired",
                    proposal.lineage
                )))
            }
        };
        if expected != version_key {
            return Err(TictacError::not_found(format!(
                "{version_key} is not the head of {}",
                proposal.lineage
            )));
        }
        if proposal.kind == TransitionKind::Open {
            for participant in &proposal.participants {
                let Some(&active) = state.live.get(participant) else {
                    continue;
                };
                if active != proposal.lineage {
                    warn!(
                        participant = %participant,
                        active = %active,
                        lineage = %proposal.lineage,
                        "Open refused, participant already in a game"
                    );
                    return Err(TictacError::Validation(ValidationError::AlreadyInGame {
                        participant: *participant,
                        lineage: active,
                    }));
                }
            }
        }

        let head = match &proposal.candidate {
            Some(candidate) => LineageHead::Current(candidate.clone()),
            None => LineageHead::Retired,
        };
        let receipt = CommitReceipt {
            proposal_id,
            lineage: proposal.lineage,
            consumed: version_key,
            produced: proposal.produced_version(),
            position: state.log.len() as u64,
        };
        state.consumed.insert(version_key, proposal_id);
        state.heads.insert(proposal.lineage, head);
        state.log.push(receipt.clone());
        match &proposal.candidate {
            Some(candidate) if candidate.is_in_progress() => {
                for participant in candidate.participants() {
                    state.live.insert(participant, proposal.lineage);
                }
            }
            _ => state.live.retain(|_, lineage| *lineage != proposal.lineage),
        }

        debug!(
            lineage = %proposal.lineage,
            version = %version_key,
            proposal = %proposal_id,
            position = receipt.position,
            "Committed transition"
        );
        Ok(CommitOutcome::Committed(receipt))
    }

    async fn record_of_truth(&self, lineage: LineageId) -> Result<Option<LineageHead>> {
        self.ensure_available()?;
        Ok(self.state.lock().heads.get(&lineage).cloned())
    }

    async fn consumed_by(&self, version_key: VersionKey) -> Result<Option<ProposalId>> {
        self.ensure_available()?;
        Ok(self.state.lock().consumed.get(&version_key).copied())
    }
}
