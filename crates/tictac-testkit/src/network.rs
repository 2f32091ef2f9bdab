//! Endpoints and authorities that misbehave on purpose

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use tictac_consensus::{
    CommitOutcome, Envelope, GameService, InMemoryAuthority, KeyDirectory, LineageHead,
    ParticipantKeys, SessionRouter, SignedTransition, UniquenessAuthority,
};
use tictac_core::{LineageId, ParticipantId, ProposalId, Result, VersionKey};
use tokio::sync::mpsc;

/// A registered participant that never answers.
///
/// Envelopes are buffered and their reply channels kept alive, so initiators
/// wait out their timeout instead of seeing a torn-down session.
pub struct SilentParticipant {
    id: ParticipantId,
    inbox: mpsc::Receiver<Envelope>,
}

impl SilentParticipant {
    /// Join `service`'s network as `id` with a published key.
    pub fn join(service: &GameService, id: ParticipantId, seed: u8) -> Self {
        let keys = ParticipantKeys::from_seed(id, [seed; 32]);
        service.directory().register(id, keys.verifying_key());
        let inbox = service
            .router()
            .register(id, service.config().responder_queue_depth);
        Self { id, inbox }
    }

    /// Identity on the network
    pub fn id(&self) -> ParticipantId {
        self.id
    }

    /// Whether anything has been delivered yet
    pub fn has_pending(&self) -> bool {
        !self.inbox.is_empty()
    }
}

/// Authority that takes participants off the network right after it commits.
///
/// Models a counter-party that endorsed but dropped off before finality.
pub struct PartitionOnCommit {
    inner: InMemoryAuthority,
    router: SessionRouter,
    armed: Mutex<HashSet<ParticipantId>>,
}

impl PartitionOnCommit {
    /// Wrap an [`InMemoryAuthority`] over `directory`
    pub fn new(directory: KeyDirectory, router: SessionRouter) -> Arc<Self> {
        Arc::new(Self {
            inner: InMemoryAuthority::new(directory),
            router,
            armed: Mutex::new(HashSet::new()),
        })
    }

    /// Disconnect `party` after the next successful commit
    pub fn sever_after_next_commit(&self, party: ParticipantId) {
        self.armed.lock().insert(party);
    }

    /// Wrapped authority
    pub fn inner(&self) -> &InMemoryAuthority {
        &self.inner
    }
}

#[async_trait]
impl UniquenessAuthority for PartitionOnCommit {
    async fn commit_if_unconsumed(
        &self,
        version_key: VersionKey,
        artifact: &SignedTransition,
    ) -> Result<CommitOutcome> {
        let outcome = self.inner.commit_if_unconsumed(version_key, artifact).await?;
        if matches!(outcome, CommitOutcome::Committed(_)) {
            let severed: Vec<_> = self.armed.lock().drain().collect();
            for party in severed {
                self.router.unregister(party);
            }
        }
        Ok(outcome)
    }

    async fn record_of_truth(&self, lineage: LineageId) -> Result<Option<LineageHead>> {
        self.inner.record_of_truth(lineage).await
    }

    async fn consumed_by(&self, version_key: VersionKey) -> Result<Option<ProposalId>> {
        self.inner.consumed_by(version_key).await
    }
}
