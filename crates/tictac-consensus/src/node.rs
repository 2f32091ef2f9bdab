//! Participant node
//!
//! Drives transitions initiated by one participant through
//! validate → endorse → commit → finalize, and answers transitions initiated
//! by others through its [`SessionResponder`].

use crate::authority::{CommitOutcome, CommitReceipt, LineageHead, UniquenessAuthority};
use crate::finality::{FinalityBroadcaster, FinalityReport};
use crate::messages::{Proposal, SignedProposal, SignedTransition};
use crate::quorum::QuorumCollector;
use crate::session::{SessionResponder, SessionRouter};
use crate::signing::{KeyDirectory, ParticipantKeys};
use crate::sync::{reconcile_lineage, SyncOutcome};
use parking_lot::Mutex;
use std::sync::Arc;
use tictac_core::{
    validate, LineageId, ParticipantId, ProtocolConfig, Result, StateRecord, TictacError,
    Transition, TransitionKind, ValidationError,
};
use tictac_store::LocalStateStore;
use tokio::task::JoinHandle;
use tracing::{info, instrument, warn};

/// A transition that went through the authority.
#[derive(Debug, Clone)]
pub struct CommittedTransition {
    /// Shape of the transition
    pub kind: TransitionKind,
    /// Fully endorsed artifact
    pub artifact: SignedTransition,
    /// Authority's receipt
    pub receipt: CommitReceipt,
    /// Who received the new version
    pub report: FinalityReport,
}

impl CommittedTransition {
    /// Record produced, `None` for closes
    pub fn record(&self) -> Option<&StateRecord> {
        self.artifact.proposal.candidate.as_ref()
    }

    /// Lineage advanced
    pub fn lineage(&self) -> LineageId {
        self.artifact.proposal.lineage
    }
}

/// One participant's protocol endpoint.
pub struct ParticipantNode {
    keys: Arc<ParticipantKeys>,
    store: Arc<dyn LocalStateStore>,
    directory: KeyDirectory,
    router: SessionRouter,
    authority: Arc<dyn UniquenessAuthority>,
    config: ProtocolConfig,
    collector: QuorumCollector,
    broadcaster: FinalityBroadcaster,
    // Shared across reconnects so endorsements survive going offline.
    responder: SessionResponder,
    serving: Mutex<Option<JoinHandle<()>>>,
}

impl ParticipantNode {
    /// Publish the node's key and bring it online.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(
        keys: ParticipantKeys,
        store: Arc<dyn LocalStateStore>,
        router: SessionRouter,
        directory: KeyDirectory,
        authority: Arc<dyn UniquenessAuthority>,
        config: ProtocolConfig,
    ) -> Self {
        directory.register(keys.id(), keys.verifying_key());
        let collector =
            QuorumCollector::new(router.clone(), directory.clone(), config.session_timeout());
        let broadcaster = FinalityBroadcaster::new(router.clone(), config.finality_timeout());
        let keys = Arc::new(keys);
        let responder = SessionResponder::new(
            keys.clone(),
            directory.clone(),
            store.clone(),
            authority.clone(),
        );
        let node = Self {
            keys,
            store,
            directory,
            router,
            authority,
            config,
            collector,
            broadcaster,
            responder,
            serving: Mutex::new(None),
        };
        node.go_online();
        node
    }

    /// Participant this node acts for
    pub fn id(&self) -> ParticipantId {
        self.keys.id()
    }

    /// Local state store
    pub fn store(&self) -> &Arc<dyn LocalStateStore> {
        &self.store
    }

    /// Register with the router and (re)start the responder.
    pub fn go_online(&self) {
        let inbox = self
            .router
            .register(self.id(), self.config.responder_queue_depth);
        let previous = self
            .serving
            .lock()
            .replace(self.responder.clone().spawn(inbox));
        if let Some(handle) = previous {
            handle.abort();
        }
    }

    /// Leave the router; sessions to this participant become unavailable.
    pub fn go_offline(&self) {
        self.router.unregister(self.id());
        if let Some(handle) = self.serving.lock().take() {
            handle.abort();
        }
    }

    /// Whether counter-parties can reach this node
    pub fn is_online(&self) -> bool {
        self.router.is_online(self.id())
    }

    /// Open a new game against `opponent`, this node moving first.
    #[instrument(skip(self), fields(participant = %self.id()))]
    pub async fn open_game(&self, opponent: ParticipantId) -> Result<CommittedTransition> {
        if let Some(active) = self.store.current_by_participant(self.id()).await? {
            if active.is_in_progress() {
                return Err(ValidationError::AlreadyInGame {
                    participant: self.id(),
                    lineage: active.id,
                }
                .into());
            }
        }

        let lineage = LineageId::new();
        let _guard = self.store.lock_lineage(lineage).await;
        let record = StateRecord::open(lineage, self.id(), opponent);
        self.commit(None, Some(record)).await
    }

    /// Mark `(x, y)` in `lineage`.
    #[instrument(skip(self), fields(participant = %self.id()))]
    pub async fn submit_move(
        &self,
        lineage: LineageId,
        x: usize,
        y: usize,
    ) -> Result<CommittedTransition> {
        let _guard = self.store.lock_lineage(lineage).await;
        let prior = self.load_prior(lineage).await?;
        let candidate = prior.propose_move(self.id(), x, y)?;
        self.commit(Some(prior), Some(candidate)).await
    }

    /// Retire a finished game.
    #[instrument(skip(self), fields(participant = %self.id()))]
    pub async fn close_game(&self, lineage: LineageId) -> Result<CommittedTransition> {
        let _guard = self.store.lock_lineage(lineage).await;
        let prior = self.load_prior(lineage).await?;
        self.commit(Some(prior), None).await
    }

    /// The game this participant is indexed to
    pub async fn current_game(&self) -> Result<StateRecord> {
        self.store
            .current_by_participant(self.id())
            .await?
            .ok_or_else(|| TictacError::not_found(format!("{} has no game", self.id())))
    }

    /// Resync `lineage` from the authority's record of truth.
    #[instrument(skip(self), fields(participant = %self.id()))]
    pub async fn sync(&self, lineage: LineageId) -> Result<SyncOutcome> {
        reconcile_lineage(self.authority.as_ref(), self.store.as_ref(), lineage).await
    }

    async fn load_prior(&self, lineage: LineageId) -> Result<StateRecord> {
        if let Some(current) = self.store.current_of(lineage).await? {
            return Ok(current);
        }
        // Outsiders have no local copy; the rule engine still decides for them.
        match self.authority.record_of_truth(lineage).await? {
            Some(LineageHead::Current(truth)) if !truth.is_participant(self.id()) => Ok(truth),
            Some(LineageHead::Current(_)) => Err(TictacError::not_found(format!(
                "{lineage} is missing from the local store of {}; sync required",
                self.id()
            ))),
            Some(LineageHead::Retired) => {
                Err(TictacError::not_found(format!("{lineage} is retired")))
            }
            None => Err(TictacError::not_found(format!("{lineage} does not exist"))),
        }
    }

    async fn commit(
        &self,
        prior: Option<StateRecord>,
        candidate: Option<StateRecord>,
    ) -> Result<CommittedTransition> {
        let acting = self.id();
        let kind = validate(prior.as_ref(), candidate.as_ref(), acting)?;
        let transition = Transition::from_parts(prior, candidate)?;

        let proposal = Proposal::from_transition(&transition, acting, rand::random());
        let signed = SignedProposal::sign(proposal, &self.keys)?;
        let artifact = self.collector.collect(&signed).await?;

        let version_key = artifact.proposal.prior_version;
        let receipt = match self
            .authority
            .commit_if_unconsumed(version_key, &artifact)
            .await?
        {
            CommitOutcome::Committed(receipt) => receipt,
            CommitOutcome::Conflict {
                version_key,
                consumed_by,
            } => {
                warn!(lineage = %transition.lineage(), version = %version_key, "Lost the commit race");
                return Err(TictacError::Conflict {
                    version_key,
                    consumed_by,
                });
            }
        };

        let report = self
            .broadcaster
            .broadcast(acting, self.store.as_ref(), &artifact, &receipt)
            .await;
        info!(
            lineage = %receipt.lineage,
            kind = ?kind,
            proposal = %receipt.proposal_id,
            stale = report.stale.len(),
            "Transition committed"
        );
        Ok(CommittedTransition {
            kind,
            artifact,
            receipt,
            report,
        })
    }
}

impl Drop for ParticipantNode {
    fn drop(&mut self) {
        if let Some(handle) = self.serving.lock().take() {
            handle.abort();
        }
    }
}
