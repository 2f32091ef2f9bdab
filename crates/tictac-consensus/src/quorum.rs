//! Signature quorum collection
//!
//! Required signers are the participants of the transition, all of them. The
//! initiator's endorsement travels with the proposal; every counter-party is
//! asked in parallel and the first refusal aborts the rest.

use crate::messages::{RejectReason, SessionReply, SignedProposal, SignedTransition};
use crate::session::SessionRouter;
use crate::signing::KeyDirectory;
use std::time::Duration;
use tictac_core::{ParticipantId, Result, TictacError};
use tokio::task::JoinSet;
use tracing::{debug, warn};

/// Fans a proposal out to counter-parties and gathers their endorsements.
#[derive(Clone)]
pub struct QuorumCollector {
    router: SessionRouter,
    directory: KeyDirectory,
    timeout: Duration,
}

impl QuorumCollector {
    /// Collector bounding each session by `timeout`
    pub fn new(router: SessionRouter, directory: KeyDirectory, timeout: Duration) -> Self {
        Self {
            router,
            directory,
            timeout,
        }
    }

    /// Collect one endorsement per participant.
    pub async fn collect(&self, signed: &SignedProposal) -> Result<SignedTransition> {
        let proposal_id = signed.verify(&self.directory)?;
        let initiator = signed.proposal.initiator;

        let mut sessions = JoinSet::new();
        for party in signed
            .proposal
            .participants
            .iter()
            .copied()
            .filter(|party| *party != initiator)
        {
            // Establishment failures surface before anything is sent.
            let session = self.router.open_session(initiator, party)?;
            let proposal = signed.clone();
            let timeout = self.timeout;
            sessions.spawn(async move { (party, session.propose(proposal, timeout).await) });
        }

        let mut endorsements = vec![signed.initiator_endorsement];
        while let Some(joined) = sessions.join_next().await {
            let (party, reply) =
                joined.map_err(|e| TictacError::internal(format!("session task failed: {e}")))?;
            let outcome = match reply {
                Ok(SessionReply::Accept(endorsement)) if endorsement.signer == party => {
                    self.directory.verify(proposal_id, &endorsement)?;
                    endorsements.push(endorsement);
                    Ok(())
                }
                Ok(SessionReply::Accept(endorsement)) => Err(TictacError::crypto(format!(
                    "{party} answered with an endorsement from {}",
                    endorsement.signer
                ))),
                Ok(SessionReply::Reject(reason)) => Err(rejection(party, reason)),
                Err(e) => Err(e),
            };
            if let Err(e) = outcome {
                warn!(
                    proposal = %proposal_id,
                    counterparty = %party,
                    error = %e,
                    "Quorum aborted"
                );
                sessions.abort_all();
                return Err(e);
            }
        }

        endorsements.sort_by_key(|e| e.signer);
        let artifact = SignedTransition {
            proposal: signed.proposal.clone(),
            endorsements,
        };
        let missing = artifact.missing_signers();
        if !missing.is_empty() {
            return Err(TictacError::QuorumIncomplete { missing });
        }
        debug!(
            proposal = %proposal_id,
            signers = artifact.endorsements.len(),
            "Quorum complete"
        );
        Ok(artifact)
    }
}

/// Rule violations found on the counter-party's copy are surfaced verbatim.
fn rejection(party: ParticipantId, reason: RejectReason) -> TictacError {
    match reason {
        RejectReason::Validation(err) => TictacError::Validation(err),
        other => TictacError::SessionRejected {
            participant: party,
            reason: other.to_string(),
        },
    }
}
