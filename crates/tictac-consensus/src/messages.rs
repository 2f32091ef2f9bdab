//! Session protocol messages
//!
//! `PROPOSE` carries a [`SignedProposal`] and is answered with a
//! [`SessionReply`]. After the uniqueness authority commits, `FINALIZE`
//! carries a [`FinalityNotice`] and is answered with a [`FinalityAck`].

use crate::authority::CommitReceipt;
use crate::signing::{Endorsement, KeyDirectory, ParticipantKeys};
use serde::{Deserialize, Serialize};
use tictac_core::{
    hash, LineageId, ParticipantId, ProposalId, Result, StateRecord, TictacError, Transition,
    TransitionKind, ValidationError, VersionKey,
};
use tokio::sync::oneshot;

/// A transition offered for endorsement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Proposal {
    /// Shape of the transition
    pub kind: TransitionKind,
    /// Lineage being advanced
    pub lineage: LineageId,
    /// Version consumed at the authority (genesis key for opens)
    pub prior_version: VersionKey,
    /// Successor record, absent for closes
    pub candidate: Option<StateRecord>,
    /// Required signers
    pub participants: Vec<ParticipantId>,
    /// Acting party
    pub initiator: ParticipantId,
    /// Distinguishes retries of the same intent
    pub nonce: u64,
}

impl Proposal {
    /// Build the proposal for `transition` initiated by `initiator`.
    pub fn from_transition(
        transition: &Transition,
        initiator: ParticipantId,
        nonce: u64,
    ) -> Self {
        Self {
            kind: transition.kind(),
            lineage: transition.lineage(),
            prior_version: transition.consumed_version(),
            candidate: transition.proposed().cloned(),
            participants: transition.participants(),
            initiator,
            nonce,
        }
    }

    /// Content address of this proposal
    pub fn id(&self) -> Result<ProposalId> {
        let bytes = bincode::serialize(self)?;
        Ok(ProposalId(hash::hash(b"TICTAC_PROPOSAL", &bytes)))
    }

    /// Version the authority will hold as current after commit
    pub fn produced_version(&self) -> Option<VersionKey> {
        self.candidate.as_ref().map(StateRecord::version_key)
    }
}

/// A proposal with the initiator's endorsement attached.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedProposal {
    /// The proposal
    pub proposal: Proposal,
    /// Initiator's endorsement over the proposal id
    pub initiator_endorsement: Endorsement,
}

impl SignedProposal {
    /// Sign `proposal` with the initiator's keys
    pub fn sign(proposal: Proposal, keys: &ParticipantKeys) -> Result<Self> {
        if proposal.initiator != keys.id() {
            return Err(TictacError::crypto(format!(
                "{} cannot sign a proposal initiated by {}",
                keys.id(),
                proposal.initiator
            )));
        }
        let initiator_endorsement = keys.endorse(proposal.id()?);
        Ok(Self {
            proposal,
            initiator_endorsement,
        })
    }

    /// Proposal id
    pub fn id(&self) -> Result<ProposalId> {
        self.proposal.id()
    }

    /// Check the initiator's endorsement
    pub fn verify(&self, directory: &KeyDirectory) -> Result<ProposalId> {
        if self.initiator_endorsement.signer != self.proposal.initiator {
            return Err(TictacError::crypto(
                "proposal is not endorsed by its initiator",
            ));
        }
        let id = self.proposal.id()?;
        directory.verify(id, &self.initiator_endorsement)?;
        Ok(id)
    }
}

/// Why a counter-party refused to endorse.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
pub enum RejectReason {
    /// The rule engine rejected the transition on the counter-party's copy
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// The proposal does not consume the counter-party's current version
    #[error("Stale prior version: proposal consumes {proposed}, local head is {local:?}")]
    StaleVersion {
        /// Version the proposal consumes
        proposed: VersionKey,
        /// Counter-party's current version
        local: Option<VersionKey>,
    },

    /// This exact proposal was already decided
    #[error("Duplicate proposal {0}")]
    Duplicate(ProposalId),

    /// A different successor of this version was already endorsed
    #[error("Version {version} already endorsed for proposal {endorsed}")]
    AlreadyEndorsed {
        /// Version both proposals consume
        version: VersionKey,
        /// Proposal endorsed first
        endorsed: ProposalId,
    },

    /// The counter-party has no record of the lineage
    #[error("Unknown lineage {0}")]
    UnknownLineage(LineageId),

    /// Signature or sender did not check out
    #[error("Unauthenticated proposal: {0}")]
    Unauthenticated(String),

    /// Counter-party could not read its own store
    #[error("Counter-party storage failure: {0}")]
    Storage(String),
}

/// Answer to a `PROPOSE`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionReply {
    /// Counter-party endorses the proposal
    Accept(Endorsement),
    /// Counter-party refuses
    Reject(RejectReason),
}

/// Fully endorsed transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedTransition {
    /// The endorsed proposal
    pub proposal: Proposal,
    /// One endorsement per required signer, ordered by signer
    pub endorsements: Vec<Endorsement>,
}

impl SignedTransition {
    /// Proposal id
    pub fn id(&self) -> Result<ProposalId> {
        self.proposal.id()
    }

    /// Required signers without a valid endorsement
    pub fn missing_signers(&self) -> Vec<ParticipantId> {
        self.proposal
            .participants
            .iter()
            .filter(|party| !self.endorsements.iter().any(|e| e.signer == **party))
            .copied()
            .collect()
    }

    /// Check that every required signer endorsed this exact proposal.
    pub fn verify(&self, directory: &KeyDirectory) -> Result<ProposalId> {
        let missing = self.missing_signers();
        if !missing.is_empty() {
            return Err(TictacError::QuorumIncomplete { missing });
        }
        let id = self.proposal.id()?;
        for endorsement in &self.endorsements {
            directory.verify(id, endorsement)?;
        }
        Ok(id)
    }
}

/// Pushed to every participant after commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinalityNotice {
    /// Committed artifact
    pub artifact: SignedTransition,
    /// Authority's receipt for it
    pub receipt: CommitReceipt,
}

/// Answer to a `FINALIZE`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FinalityAck {
    /// Store now holds the committed version
    Applied,
    /// Store already held it (or something newer)
    AlreadyCurrent,
    /// Store could not apply it; the participant is stale
    Failed {
        /// Failure detail
        reason: String,
    },
}

/// Inbound message on a participant's endpoint.
#[derive(Debug)]
pub enum Envelope {
    /// Request for endorsement
    Propose {
        /// Sending participant
        from: ParticipantId,
        /// Signed proposal
        proposal: SignedProposal,
        /// Where to answer
        reply: oneshot::Sender<SessionReply>,
    },
    /// Committed transition to apply
    Finalize {
        /// Sending participant
        from: ParticipantId,
        /// Artifact and receipt
        notice: FinalityNotice,
        /// Where to acknowledge
        ack: oneshot::Sender<FinalityAck>,
    },
}

impl Envelope {
    /// Sender of this envelope
    pub fn sender(&self) -> ParticipantId {
        match self {
            Envelope::Propose { from, .. } | Envelope::Finalize { from, .. } => *from,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn opened() -> (ParticipantKeys, ParticipantKeys, StateRecord) {
        let alice = ParticipantKeys::from_seed(ParticipantId::from_name("alice"), [1u8; 32]);
        let bob = ParticipantKeys::from_seed(ParticipantId::from_name("bob"), [2u8; 32]);
        let record = StateRecord::open(LineageId::new(), alice.id(), bob.id());
        (alice, bob, record)
    }

    #[test]
    fn test_proposal_id_covers_nonce() {
        let (alice, _, record) = opened();
        let transition = Transition::Open { proposed: record };
        let first = Proposal::from_transition(&transition, alice.id(), 1);
        let second = Proposal::from_transition(&transition, alice.id(), 2);
        assert_eq!(first.id().unwrap(), first.clone().id().unwrap());
        assert_ne!(first.id().unwrap(), second.id().unwrap());
    }

    #[test]
    fn test_open_proposal_consumes_genesis() {
        let (alice, bob, record) = opened();
        let transition = Transition::Open {
            proposed: record.clone(),
        };
        let proposal = Proposal::from_transition(&transition, alice.id(), 0);
        assert_eq!(proposal.prior_version, VersionKey::genesis(record.id));
        assert_eq!(proposal.participants, vec![alice.id(), bob.id()]);
        assert_eq!(proposal.produced_version(), Some(record.version_key()));
    }

    #[test]
    fn test_signed_transition_reports_missing_signers() {
        let (alice, bob, record) = opened();
        let directory = KeyDirectory::new();
        directory.register(alice.id(), alice.verifying_key());
        directory.register(bob.id(), bob.verifying_key());

        let transition = Transition::Open { proposed: record };
        let signed =
            SignedProposal::sign(Proposal::from_transition(&transition, alice.id(), 0), &alice)
                .unwrap();
        let id = signed.verify(&directory).unwrap();

        let partial = SignedTransition {
            proposal: signed.proposal.clone(),
            endorsements: vec![signed.initiator_endorsement],
        };
        assert!(matches!(
            partial.verify(&directory),
            Err(TictacError::QuorumIncomplete { missing }) if missing == vec![bob.id()]
        ));

        let complete = SignedTransition {
            proposal: signed.proposal,
            endorsements: vec![signed.initiator_endorsement, bob.endorse(id)],
        };
        assert_eq!(complete.verify(&directory).unwrap(), id);
    }

    #[test]
    fn test_cannot_sign_for_someone_else() {
        let (alice, bob, record) = opened();
        let transition = Transition::Open { proposed: record };
        let proposal = Proposal::from_transition(&transition, alice.id(), 0);
        assert!(SignedProposal::sign(proposal, &bob).is_err());
    }
}
