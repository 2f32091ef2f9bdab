//! Session protocol over an in-process router
//!
//! Each participant owns one inbound endpoint. A [`Session`] is a logical
//! channel from an initiator to one counter-party; every round trip is bounded
//! by the caller's timeout and cancelled when its future is dropped.

use crate::authority::{CommitReceipt, UniquenessAuthority};
use crate::finality::apply_committed;
use crate::messages::{
    Envelope, FinalityAck, FinalityNotice, Proposal, RejectReason, SessionReply, SignedProposal,
};
use crate::signing::{KeyDirectory, ParticipantKeys};
use parking_lot::{Mutex, RwLock};
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tictac_core::{
    validate, LineageId, ParticipantId, ProposalId, Result, StateRecord, TictacError,
    TransitionKind, ValidationError, VersionKey,
};
use tictac_store::LocalStateStore;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Maps participants to their inbound endpoints.
///
/// Cloning shares the same routing table.
#[derive(Clone, Default)]
pub struct SessionRouter {
    endpoints: Arc<RwLock<HashMap<ParticipantId, mpsc::Sender<Envelope>>>>,
}

impl SessionRouter {
    /// Empty router
    pub fn new() -> Self {
        Self::default()
    }

    /// Bring `participant` online; returns its inbound queue.
    ///
    /// Replaces any previous endpoint, which closes the old queue.
    pub fn register(&self, participant: ParticipantId, depth: usize) -> mpsc::Receiver<Envelope> {
        let (sender, receiver) = mpsc::channel(depth.max(1));
        self.endpoints.write().insert(participant, sender);
        debug!(participant = %participant, "Endpoint registered");
        receiver
    }

    /// Take `participant` offline
    pub fn unregister(&self, participant: ParticipantId) -> bool {
        let removed = self.endpoints.write().remove(&participant).is_some();
        debug!(participant = %participant, removed, "Endpoint unregistered");
        removed
    }

    /// Whether `participant` currently has a live endpoint
    pub fn is_online(&self, participant: ParticipantId) -> bool {
        self.endpoints
            .read()
            .get(&participant)
            .is_some_and(|sender| !sender.is_closed())
    }

    /// Establish a logical session from `from` to `to`.
    pub fn open_session(&self, from: ParticipantId, to: ParticipantId) -> Result<Session> {
        let sender = self
            .endpoints
            .read()
            .get(&to)
            .cloned()
            .ok_or_else(|| TictacError::session_unavailable(to, "no endpoint registered"))?;
        if sender.is_closed() {
            return Err(TictacError::session_unavailable(to, "endpoint closed"));
        }
        Ok(Session { from, to, sender })
    }
}

/// One initiator's channel to one counter-party.
#[derive(Debug, Clone)]
pub struct Session {
    from: ParticipantId,
    to: ParticipantId,
    sender: mpsc::Sender<Envelope>,
}

impl Session {
    /// Counter-party of this session
    pub fn counterparty(&self) -> ParticipantId {
        self.to
    }

    /// `PROPOSE` round trip.
    pub async fn propose(
        &self,
        proposal: SignedProposal,
        timeout: Duration,
    ) -> Result<SessionReply> {
        let (reply, response) = oneshot::channel();
        let envelope = Envelope::Propose {
            from: self.from,
            proposal,
            reply,
        };
        self.round_trip(envelope, response, timeout).await
    }

    /// `FINALIZE` round trip.
    pub async fn finalize(
        &self,
        notice: FinalityNotice,
        timeout: Duration,
    ) -> Result<FinalityAck> {
        let (ack, response) = oneshot::channel();
        let envelope = Envelope::Finalize {
            from: self.from,
            notice,
            ack,
        };
        self.round_trip(envelope, response, timeout).await
    }

    async fn round_trip<T>(
        &self,
        envelope: Envelope,
        response: oneshot::Receiver<T>,
        timeout: Duration,
    ) -> Result<T> {
        let exchange = async {
            self.sender
                .send(envelope)
                .await
                .map_err(|_| TictacError::session_unavailable(self.to, "endpoint closed"))?;
            response
                .await
                .map_err(|_| TictacError::session_unavailable(self.to, "session torn down"))
        };
        match tokio::time::timeout(timeout, exchange).await {
            Ok(result) => result,
            Err(_) => {
                let timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
                warn!(counterparty = %self.to, timeout_ms, "Counterparty unresponsive");
                Err(TictacError::CounterpartyUnresponsive {
                    participant: self.to,
                    timeout_ms,
                })
            }
        }
    }
}

// Proposals endorsed on one version. Every one of them produces `candidate`.
struct EndorsedVersion {
    candidate: Option<StateRecord>,
    proposals: Vec<ProposalId>,
}

/// Answers inbound envelopes on behalf of one participant.
///
/// Every envelope is handled on its own task so a slow `FINALIZE` waiting
/// for a lineage lock never blocks endorsements of other proposals.
///
/// A version is endorsed for one successor only. Retries that produce the
/// same successor are endorsed again; a different successor is refused with
/// [`RejectReason::AlreadyEndorsed`]. `FINALIZE` is applied only once the
/// authority confirms the artifact consumed its version.
#[derive(Clone)]
pub struct SessionResponder {
    keys: Arc<ParticipantKeys>,
    directory: KeyDirectory,
    store: Arc<dyn LocalStateStore>,
    authority: Arc<dyn UniquenessAuthority>,
    endorsed: Arc<Mutex<HashMap<LineageId, HashMap<VersionKey, EndorsedVersion>>>>,
}

impl SessionResponder {
    /// Responder signing with `keys`, validating against `store` and
    /// confirming finality with `authority`
    pub fn new(
        keys: Arc<ParticipantKeys>,
        directory: KeyDirectory,
        store: Arc<dyn LocalStateStore>,
        authority: Arc<dyn UniquenessAuthority>,
    ) -> Self {
        Self {
            keys,
            directory,
            store,
            authority,
            endorsed: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Serve `inbox` until every sender is gone.
    pub fn spawn(self, mut inbox: mpsc::Receiver<Envelope>) -> JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(envelope) = inbox.recv().await {
                let responder = self.clone();
                tokio::spawn(async move { responder.dispatch(envelope).await });
            }
            debug!(participant = %self.keys.id(), "Responder stopped");
        })
    }

    async fn dispatch(&self, envelope: Envelope) {
        match envelope {
            Envelope::Propose {
                from,
                proposal,
                reply,
            } => {
                let answer = self.handle_propose(from, proposal).await;
                // Initiator may have given up; nothing to do then.
                let _ = reply.send(answer);
            }
            Envelope::Finalize { from, notice, ack } => {
                let answer = self.handle_finalize(from, notice).await;
                let _ = ack.send(answer);
            }
        }
    }

    /// Decide whether to endorse `signed`.
    pub async fn handle_propose(&self, from: ParticipantId, signed: SignedProposal) -> SessionReply {
        let me = self.keys.id();
        let proposal = &signed.proposal;
        if from != proposal.initiator {
            return SessionReply::Reject(RejectReason::Unauthenticated(format!(
                "{from} relayed a proposal initiated by {}",
                proposal.initiator
            )));
        }
        let proposal_id = match signed.verify(&self.directory) {
            Ok(id) => id,
            Err(e) => return SessionReply::Reject(RejectReason::Unauthenticated(e.to_string())),
        };
        if !proposal.participants.contains(&me) {
            return SessionReply::Reject(ValidationError::NotParticipant { participant: me }.into());
        }
        if self.already_seen(proposal, proposal_id) {
            debug!(participant = %me, proposal = %proposal_id, "Duplicate proposal");
            return SessionReply::Reject(RejectReason::Duplicate(proposal_id));
        }

        let decision = match self.check_against_store(&signed).await {
            Ok(()) => self.record_endorsement(proposal, proposal_id),
            Err(reason) => Err(reason),
        };
        match decision {
            Ok(()) => {
                debug!(
                    participant = %me,
                    lineage = %proposal.lineage,
                    proposal = %proposal_id,
                    kind = ?proposal.kind,
                    "Endorsing proposal"
                );
                SessionReply::Accept(self.keys.endorse(proposal_id))
            }
            Err(reason) => {
                warn!(
                    participant = %me,
                    lineage = %proposal.lineage,
                    proposal = %proposal_id,
                    reason = %reason,
                    "Rejecting proposal"
                );
                SessionReply::Reject(reason)
            }
        }
    }

    fn already_seen(&self, proposal: &Proposal, proposal_id: ProposalId) -> bool {
        self.endorsed
            .lock()
            .get(&proposal.lineage)
            .and_then(|versions| versions.get(&proposal.prior_version))
            .is_some_and(|slot| slot.proposals.contains(&proposal_id))
    }

    fn record_endorsement(
        &self,
        proposal: &Proposal,
        proposal_id: ProposalId,
    ) -> std::result::Result<(), RejectReason> {
        let mut endorsed = self.endorsed.lock();
        if proposal.kind == TransitionKind::Open {
            // Only one open per participant can commit; drop the other pending ones.
            endorsed.retain(|lineage, versions| {
                *lineage == proposal.lineage
                    || versions
                        .keys()
                        .any(|version| *version != VersionKey::genesis(*lineage))
            });
        }

        let versions = endorsed.entry(proposal.lineage).or_default();
        // The store check passed, so every other version of the lineage is consumed.
        versions.retain(|version, _| *version == proposal.prior_version);
        match versions.entry(proposal.prior_version) {
            Entry::Occupied(mut slot) => {
                let slot = slot.get_mut();
                if slot.proposals.contains(&proposal_id) {
                    return Err(RejectReason::Duplicate(proposal_id));
                }
                if slot.candidate != proposal.candidate {
                    return Err(RejectReason::AlreadyEndorsed {
                        version: proposal.prior_version,
                        endorsed: slot.proposals[0],
                    });
                }
                slot.proposals.push(proposal_id);
            }
            Entry::Vacant(slot) => {
                slot.insert(EndorsedVersion {
                    candidate: proposal.candidate.clone(),
                    proposals: vec![proposal_id],
                });
            }
        }
        Ok(())
    }

    // Endorsements on consumed versions can never be needed again.
    fn forget_consumed(&self, receipt: &CommitReceipt) {
        let mut endorsed = self.endorsed.lock();
        match receipt.produced {
            Some(produced) => {
                if let Some(versions) = endorsed.get_mut(&receipt.lineage) {
                    versions.retain(|version, _| *version == produced);
                }
            }
            None => {
                endorsed.remove(&receipt.lineage);
            }
        }
    }

    async fn check_against_store(&self, signed: &SignedProposal) -> std::result::Result<(), RejectReason> {
        let proposal = &signed.proposal;
        let me = self.keys.id();
        let lineage = proposal.lineage;
        let storage = |e: TictacError| RejectReason::Storage(e.to_string());

        let current = self.store.current_of(lineage).await.map_err(storage)?;
        let prior = match proposal.kind {
            TransitionKind::Open => {
                if current.is_some() || self.store.is_retired(lineage).await.map_err(storage)? {
                    return Err(RejectReason::StaleVersion {
                        proposed: proposal.prior_version,
                        local: current.as_ref().map(StateRecord::version_key),
                    });
                }
                if proposal.prior_version != VersionKey::genesis(lineage) {
                    return Err(ValidationError::malformed("open must consume the genesis key").into());
                }
                if let Some(active) = self.store.current_by_participant(me).await.map_err(storage)? {
                    if active.is_in_progress() {
                        return Err(ValidationError::AlreadyInGame {
                            participant: me,
                            lineage: active.id,
                        }
                        .into());
                    }
                }
                None
            }
            TransitionKind::Move | TransitionKind::Close => {
                let current = current.ok_or(RejectReason::UnknownLineage(lineage))?;
                let local = current.version_key();
                if local != proposal.prior_version {
                    return Err(RejectReason::StaleVersion {
                        proposed: proposal.prior_version,
                        local: Some(local),
                    });
                }
                if current.participants() != proposal.participants {
                    return Err(ValidationError::malformed("participant set differs").into());
                }
                Some(current)
            }
        };

        let kind = validate(prior.as_ref(), proposal.candidate.as_ref(), proposal.initiator)?;
        if kind != proposal.kind {
            return Err(ValidationError::malformed(format!(
                "declared {:?} but shaped like {kind:?}",
                proposal.kind
            ))
            .into());
        }
        if let Some(candidate) = &proposal.candidate {
            if candidate.participants() != proposal.participants {
                return Err(ValidationError::malformed("participant set differs").into());
            }
        }
        Ok(())
    }

    /// Apply a committed transition pushed by `from`.
    pub async fn handle_finalize(&self, from: ParticipantId, notice: FinalityNotice) -> FinalityAck {
        let me = self.keys.id();
        match self.apply_notice(&notice).await {
            Ok(ack) => {
                debug!(
                    participant = %me,
                    from = %from,
                    lineage = %notice.receipt.lineage,
                    ack = ?ack,
                    "Finality applied"
                );
                ack
            }
            Err(e) => {
                warn!(
                    participant = %me,
                    lineage = %notice.receipt.lineage,
                    error = %e,
                    "Finality not applied"
                );
                FinalityAck::Failed {
                    reason: e.to_string(),
                }
            }
        }
    }

    async fn apply_notice(&self, notice: &FinalityNotice) -> Result<FinalityAck> {
        let artifact = &notice.artifact;
        let proposal_id = artifact.verify(&self.directory)?;
        let receipt = &notice.receipt;
        if receipt.proposal_id != proposal_id
            || receipt.consumed != artifact.proposal.prior_version
            || receipt.lineage != artifact.proposal.lineage
        {
            return Err(TictacError::crypto("receipt does not match the artifact"));
        }
        if !artifact.proposal.participants.contains(&self.keys.id()) {
            return Err(ValidationError::NotParticipant {
                participant: self.keys.id(),
            }
            .into());
        }
        if self.authority.consumed_by(receipt.consumed).await? != Some(proposal_id) {
            return Err(TictacError::crypto(format!(
                "{proposal_id} was not committed by the authority"
            )));
        }

        let ack = {
            let _guard = self.store.lock_lineage(receipt.lineage).await;
            apply_committed(self.store.as_ref(), artifact).await?
        };
        self.forget_consumed(receipt);
        Ok(ack)
    }
}
