//! Participants, services and game helpers

use std::time::Duration;
use tictac_consensus::{GameService, ParticipantKeys};
use tictac_core::{LineageId, ParticipantId, ProtocolConfig, StateRecord};
use tictac_store::LocalStateStore;

/// First test participant
pub fn alice() -> ParticipantId {
    ParticipantId::from_name("alice")
}

/// Second test participant
pub fn bob() -> ParticipantId {
    ParticipantId::from_name("bob")
}

/// Third test participant
pub fn carol() -> ParticipantId {
    ParticipantId::from_name("carol")
}

/// Deterministic keys for `id`
pub fn keys_for(id: ParticipantId, seed: u8) -> ParticipantKeys {
    ParticipantKeys::from_seed(id, [seed; 32])
}

/// Timeouts short enough for tests that wait them out
pub fn fast_config() -> ProtocolConfig {
    ProtocolConfig::with_timeout(Duration::from_millis(200))
}

/// Service hosting `parties` with default settings.
///
/// Must be called from within a Tokio runtime.
pub fn service_for(parties: &[ParticipantId]) -> GameService {
    GameService::builder()
        .participants(parties.iter().copied())
        .build()
        .expect("default service builds")
}

/// Service hosting `parties` with [`fast_config`].
pub fn fast_service_for(parties: &[ParticipantId]) -> GameService {
    GameService::builder()
        .with_config(fast_config())
        .participants(parties.iter().copied())
        .build()
        .expect("fast service builds")
}

/// Moves of the column-0 win for the opener: `(x, y)` alternating from the
/// opener.
pub const COLUMN_WIN: [(usize, usize); 5] = [(0, 0), (1, 0), (0, 1), (2, 1), (0, 2)];

/// Moves filling the board without a line.
pub const DRAW: [(usize, usize); 9] = [
    (0, 0),
    (1, 0),
    (2, 0),
    (1, 1),
    (0, 1),
    (2, 1),
    (1, 2),
    (0, 2),
    (2, 2),
];

/// Play `moves` alternating from `first`, returning the last record.
pub async fn play(
    service: &GameService,
    lineage: LineageId,
    first: ParticipantId,
    second: ParticipantId,
    moves: &[(usize, usize)],
) -> StateRecord {
    let mut last = None;
    for (turn, (x, y)) in moves.iter().copied().enumerate() {
        let actor = if turn % 2 == 0 { first } else { second };
        let record = service
            .submit_move(lineage, actor, x, y)
            .await
            .unwrap_or_else(|e| panic!("move {turn} ({x}, {y}) by {actor} failed: {e}"));
        last = Some(record);
    }
    last.expect("at least one move")
}

/// Assert every listed participant's store holds `expected` for its lineage.
pub async fn assert_stores_hold(
    service: &GameService,
    parties: &[ParticipantId],
    expected: &StateRecord,
) {
    for party in parties {
        let node = service.node(*party).expect("participant hosted");
        let local = node
            .store()
            .current_of(expected.id)
            .await
            .expect("store readable");
        assert_eq!(local.as_ref(), Some(expected), "{party} holds a different record");
    }
}
