//! Game service façade
//!
//! Hosts one [`ParticipantNode`] per participant behind a shared router, key
//! directory and uniqueness authority, and exposes the operations adapters
//! call: open, move, close, plus retrieval and resync.

use crate::authority::{CommitReceipt, InMemoryAuthority, LineageHead, UniquenessAuthority};
use crate::node::ParticipantNode;
use crate::session::SessionRouter;
use crate::signing::{KeyDirectory, ParticipantKeys};
use crate::sync::SyncOutcome;
use std::collections::HashMap;
use std::sync::Arc;
use tictac_core::{
    position_to_coords, LineageId, ParticipantId, ProtocolConfig, Result, StateRecord,
    TictacError, VersionKey,
};
use tictac_store::{LocalStateStore, MemoryStateStore};
use tracing::info;

/// Acknowledgement of a retired game.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseAck {
    /// Retired lineage
    pub lineage: LineageId,
    /// Terminal version consumed by the close
    pub closed_version: VersionKey,
    /// Winner of the closed game, `None` on a draw
    pub winner: Option<ParticipantId>,
    /// Authority's receipt for the close
    pub receipt: CommitReceipt,
}

/// In-process game service.
pub struct GameService {
    nodes: HashMap<ParticipantId, Arc<ParticipantNode>>,
    router: SessionRouter,
    directory: KeyDirectory,
    authority: Arc<dyn UniquenessAuthority>,
    config: ProtocolConfig,
}

impl GameService {
    /// Start building a service
    pub fn builder() -> GameServiceBuilder {
        GameServiceBuilder::default()
    }

    /// Node hosted for `party`
    pub fn node(&self, party: ParticipantId) -> Result<&Arc<ParticipantNode>> {
        self.nodes
            .get(&party)
            .ok_or_else(|| TictacError::not_found(format!("{party} is not hosted here")))
    }

    /// Hosted participants, sorted
    pub fn participants(&self) -> Vec<ParticipantId> {
        let mut parties: Vec<_> = self.nodes.keys().copied().collect();
        parties.sort();
        parties
    }

    /// Shared transport
    pub fn router(&self) -> &SessionRouter {
        &self.router
    }

    /// Shared key directory
    pub fn directory(&self) -> &KeyDirectory {
        &self.directory
    }

    /// Shared uniqueness authority
    pub fn authority(&self) -> &Arc<dyn UniquenessAuthority> {
        &self.authority
    }

    /// Protocol settings every node runs with
    pub fn config(&self) -> &ProtocolConfig {
        &self.config
    }

    /// Open a game between `party_a` (moves first) and `party_b`.
    pub async fn open_game(
        &self,
        party_a: ParticipantId,
        party_b: ParticipantId,
    ) -> Result<LineageId> {
        let committed = self.node(party_a)?.open_game(party_b).await?;
        Ok(committed.lineage())
    }

    /// Mark `(x, y)` on behalf of `acting_party`.
    pub async fn submit_move(
        &self,
        lineage: LineageId,
        acting_party: ParticipantId,
        x: usize,
        y: usize,
    ) -> Result<StateRecord> {
        let committed = self.node(acting_party)?.submit_move(lineage, x, y).await?;
        committed
            .record()
            .cloned()
            .ok_or_else(|| TictacError::internal("move committed without a record"))
    }

    /// Mark the flat row-major `position` (0 through 8).
    pub async fn submit_move_at(
        &self,
        lineage: LineageId,
        acting_party: ParticipantId,
        position: usize,
    ) -> Result<StateRecord> {
        let (x, y) = position_to_coords(position)?;
        self.submit_move(lineage, acting_party, x, y).await
    }

    /// Open a game and play `party_a`'s first mark at `position`.
    ///
    /// The position is checked before anything is committed.
    pub async fn start_game_with_first_move(
        &self,
        party_a: ParticipantId,
        party_b: ParticipantId,
        position: usize,
    ) -> Result<StateRecord> {
        let (x, y) = position_to_coords(position)?;
        let lineage = self.open_game(party_a, party_b).await?;
        self.submit_move(lineage, party_a, x, y).await
    }

    /// Retire a finished game.
    ///
    /// Either owner may close; the first owner hosted here acts.
    pub async fn close_game(&self, lineage: LineageId) -> Result<CloseAck> {
        let head = match self.authority.record_of_truth(lineage).await? {
            Some(LineageHead::Current(record)) => record,
            Some(LineageHead::Retired) => {
                return Err(TictacError::not_found(format!("{lineage} is already retired")))
            }
            None => return Err(TictacError::not_found(format!("{lineage} does not exist"))),
        };
        let acting = [head.owner_a, head.owner_b]
            .into_iter()
            .find(|owner| self.nodes.contains_key(owner))
            .ok_or_else(|| {
                TictacError::not_found(format!("no owner of {lineage} is hosted here"))
            })?;

        let committed = self.node(acting)?.close_game(lineage).await?;
        let ack = CloseAck {
            lineage,
            closed_version: committed.receipt.consumed,
            winner: head.winner(),
            receipt: committed.receipt,
        };
        info!(lineage = %lineage, winner = ?ack.winner, "Game closed");
        Ok(ack)
    }

    /// Game `party`'s store is indexed to.
    pub async fn current_game(&self, party: ParticipantId) -> Result<StateRecord> {
        self.node(party)?.current_game().await
    }

    /// Bring `party`'s copy of `lineage` in line with the authority.
    pub async fn sync_game(&self, lineage: LineageId, party: ParticipantId) -> Result<SyncOutcome> {
        self.node(party)?.sync(lineage).await
    }

    /// Rendered board of `party`'s current game.
    pub async fn board_view(&self, party: ParticipantId) -> Result<String> {
        let record = self.current_game(party).await?;
        Ok(record.board.to_string())
    }

    /// Take `party` off the network.
    pub fn disconnect(&self, party: ParticipantId) -> Result<()> {
        self.node(party)?.go_offline();
        Ok(())
    }

    /// Put `party` back on the network.
    pub fn reconnect(&self, party: ParticipantId) -> Result<()> {
        self.node(party)?.go_online();
        Ok(())
    }
}

/// Builder wiring nodes to a shared transport and authority.
#[derive(Default)]
pub struct GameServiceBuilder {
    config: Option<ProtocolConfig>,
    router: Option<SessionRouter>,
    directory: Option<KeyDirectory>,
    authority: Option<Arc<dyn UniquenessAuthority>>,
    participants: Vec<ParticipantKeys>,
}

impl GameServiceBuilder {
    /// Protocol settings, defaults otherwise
    pub fn with_config(mut self, config: ProtocolConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Share an existing router
    pub fn with_router(mut self, router: SessionRouter) -> Self {
        self.router = Some(router);
        self
    }

    /// Share an existing key directory
    pub fn with_directory(mut self, directory: KeyDirectory) -> Self {
        self.directory = Some(directory);
        self
    }

    /// Use a custom authority.
    ///
    /// It must verify against the same directory passed to
    /// [`with_directory`](Self::with_directory).
    pub fn with_authority(mut self, authority: Arc<dyn UniquenessAuthority>) -> Self {
        self.authority = Some(authority);
        self
    }

    /// Host a participant with a fresh key
    pub fn with_participant(mut self, id: ParticipantId) -> Self {
        self.participants.push(ParticipantKeys::generate(id));
        self
    }

    /// Host a participant with the given key
    pub fn with_keys(mut self, keys: ParticipantKeys) -> Self {
        self.participants.push(keys);
        self
    }

    /// Host several participants with fresh keys
    pub fn participants(self, ids: impl IntoIterator<Item = ParticipantId>) -> Self {
        ids.into_iter()
            .fold(self, |builder, id| builder.with_participant(id))
    }

    /// Start every node.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn build(self) -> Result<GameService> {
        let config = self.config.unwrap_or_default();
        config.validate()?;
        let router = self.router.unwrap_or_default();
        let directory = self.directory.unwrap_or_default();
        let authority = self
            .authority
            .unwrap_or_else(|| Arc::new(InMemoryAuthority::new(directory.clone())));

        let mut nodes = HashMap::new();
        for keys in self.participants {
            let id = keys.id();
            if nodes.contains_key(&id) {
                return Err(TictacError::config(format!("{id} is hosted twice")));
            }
            let store: Arc<dyn LocalStateStore> = Arc::new(MemoryStateStore::new());
            let node = ParticipantNode::start(
                keys,
                store,
                router.clone(),
                directory.clone(),
                authority.clone(),
                config.clone(),
            );
            nodes.insert(id, Arc::new(node));
        }

        Ok(GameService {
            nodes,
            router,
            directory,
            authority,
            config,
        })
    }
}
