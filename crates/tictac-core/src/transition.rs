//! Transition rule engine
//!
//! Pure, side-effect-free validation of a `(prior, proposed, acting party)`
//! triple. Every participant runs the same function on its own copy of the
//! prior record before endorsing, so nothing here may depend on local state.
//!
//! The status of a proposed record is always recomputed from its board and
//! compared; a proposal's own claim is never trusted.

use crate::errors::ValidationError;
use crate::identifiers::{LineageId, ParticipantId, VersionKey};
use crate::record::{GameStatus, StateRecord, Turn};
use serde::{Deserialize, Serialize};

/// Shape of a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransitionKind {
    /// Creates a lineage; consumes nothing but the lineage's genesis key
    Open,
    /// Consumes one version and produces its successor
    Move,
    /// Consumes the terminal version and produces nothing
    Close,
}

/// A transition between two points of a lineage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Transition {
    /// `∅ → proposed`
    Open {
        /// Initial record
        proposed: StateRecord,
    },
    /// `prior → proposed`
    Move {
        /// Version being consumed
        prior: StateRecord,
        /// Successor
        proposed: StateRecord,
    },
    /// `prior → retired`
    Close {
        /// Terminal version being consumed
        prior: StateRecord,
    },
}

impl Transition {
    /// Assemble from optional endpoints.
    pub fn from_parts(
        prior: Option<StateRecord>,
        proposed: Option<StateRecord>,
    ) -> Result<Self, ValidationError> {
        match (prior, proposed) {
            (None, Some(proposed)) => Ok(Transition::Open { proposed }),
            (Some(prior), Some(proposed)) => Ok(Transition::Move { prior, proposed }),
            (Some(prior), None) => Ok(Transition::Close { prior }),
            (None, None) => Err(ValidationError::malformed(
                "transition has neither a prior nor a proposed record",
            )),
        }
    }

    /// Shape of this transition
    pub fn kind(&self) -> TransitionKind {
        match self {
            Transition::Open { .. } => TransitionKind::Open,
            Transition::Move { .. } => TransitionKind::Move,
            Transition::Close { .. } => TransitionKind::Close,
        }
    }

    /// Lineage this transition belongs to
    pub fn lineage(&self) -> LineageId {
        match self {
            Transition::Open { proposed } => proposed.id,
            Transition::Move { prior, .. } | Transition::Close { prior } => prior.id,
        }
    }

    /// Key consumed at the uniqueness authority
    pub fn consumed_version(&self) -> VersionKey {
        match self {
            Transition::Open { proposed } => VersionKey::genesis(proposed.id),
            Transition::Move { prior, .. } | Transition::Close { prior } => prior.version_key(),
        }
    }

    /// Version consumed, absent for opens
    pub fn prior(&self) -> Option<&StateRecord> {
        match self {
            Transition::Open { .. } => None,
            Transition::Move { prior, .. } | Transition::Close { prior } => Some(prior),
        }
    }

    /// Version produced, absent for closes
    pub fn proposed(&self) -> Option<&StateRecord> {
        match self {
            Transition::Open { proposed } | Transition::Move { proposed, .. } => Some(proposed),
            Transition::Close { .. } => None,
        }
    }

    /// Parties whose endorsement is required
    pub fn participants(&self) -> Vec<ParticipantId> {
        match self {
            Transition::Open { proposed } => proposed.participants(),
            Transition::Move { prior, .. } | Transition::Close { prior } => prior.participants(),
        }
    }

    /// Run the rule engine on this transition
    pub fn validate(&self, acting: ParticipantId) -> Result<(), ValidationError> {
        validate(self.prior(), self.proposed(), acting).map(|_| ())
    }
}

/// Decide whether `acting` may move the lineage from `prior` to `proposed`.
pub fn validate(
    prior: Option<&StateRecord>,
    proposed: Option<&StateRecord>,
    acting: ParticipantId,
) -> Result<TransitionKind, ValidationError> {
    match (prior, proposed) {
        (None, Some(proposed)) => validate_open(proposed, acting).map(|_| TransitionKind::Open),
        (Some(prior), Some(proposed)) => {
            validate_move(prior, proposed, acting).map(|_| TransitionKind::Move)
        }
        (Some(prior), None) => validate_close(prior, acting).map(|_| TransitionKind::Close),
        (None, None) => Err(ValidationError::malformed(
            "transition has neither a prior nor a proposed record",
        )),
    }
}

fn validate_open(proposed: &StateRecord, acting: ParticipantId) -> Result<(), ValidationError> {
    if !proposed.is_participant(acting) {
        return Err(ValidationError::NotParticipant { participant: acting });
    }
    if proposed.owner_a == proposed.owner_b {
        return Err(ValidationError::malformed("a game needs two distinct owners"));
    }
    if proposed.active_turn != Turn::OwnerA {
        return Err(ValidationError::malformed("owner A moves first"));
    }
    if !proposed.board.is_empty() {
        return Err(ValidationError::malformed("a new game starts on an empty board"));
    }
    if proposed.status != GameStatus::InProgress {
        return Err(ValidationError::StatusMismatch {
            proposed: proposed.status,
            derived: GameStatus::InProgress,
        });
    }
    if proposed.sequence != 0 {
        return Err(ValidationError::malformed("a new game starts at sequence 0"));
    }
    Ok(())
}

fn validate_move(
    prior: &StateRecord,
    proposed: &StateRecord,
    acting: ParticipantId,
) -> Result<(), ValidationError> {
    if !prior.is_in_progress() {
        return Err(ValidationError::GameAlreadyOver);
    }
    let expected = prior.active_party();
    if acting != expected {
        return Err(ValidationError::NotYourTurn {
            participant: acting,
            expected,
        });
    }

    if proposed.id != prior.id {
        return Err(ValidationError::malformed("lineage id changed"));
    }
    if proposed.owner_a != prior.owner_a || proposed.owner_b != prior.owner_b {
        return Err(ValidationError::malformed("owners changed"));
    }
    if proposed.sequence != prior.sequence + 1 {
        return Err(ValidationError::malformed(format!(
            "sequence must advance from {} to {}, got {}",
            prior.sequence,
            prior.sequence + 1,
            proposed.sequence
        )));
    }

    let changed = prior.board.changed_cells(&proposed.board);
    let (x, y) = match changed.as_slice() {
        [single] => *single,
        _ => {
            return Err(ValidationError::malformed(format!(
                "exactly one cell must change, {} changed",
                changed.len()
            )))
        }
    };
    if !prior.board.get(x, y)?.is_empty() {
        return Err(ValidationError::CellOccupied { x, y });
    }
    let written = proposed.board.get(x, y)?;
    if written != crate::board::Cell::Marked(prior.active_turn.mark()) {
        return Err(ValidationError::WrongMark { x, y });
    }

    if proposed.active_turn != prior.active_turn.flip() {
        return Err(ValidationError::malformed("turn must pass to the other owner"));
    }

    let derived = proposed.board.derive_status();
    if proposed.status != derived {
        return Err(ValidationError::StatusMismatch {
            proposed: proposed.status,
            derived,
        });
    }
    Ok(())
}

fn validate_close(prior: &StateRecord, acting: ParticipantId) -> Result<(), ValidationError> {
    if prior.is_in_progress() {
        return Err(ValidationError::GameNotOver);
    }
    if !prior.is_participant(acting) {
        return Err(ValidationError::NotParticipant { participant: acting });
    }
    Ok(())
}

/// Replay a sequence of moves from the open transition, validating each.
///
/// Returns every record produced, starting with the open version.
pub fn replay(
    id: LineageId,
    owner_a: ParticipantId,
    owner_b: ParticipantId,
    moves: &[(usize, usize)],
) -> Result<Vec<StateRecord>, ValidationError> {
    let open = StateRecord::open(id, owner_a, owner_b);
    validate(None, Some(&open), owner_a)?;

    let mut history = vec![open];
    for &(x, y) in moves {
        let prior = history
            .last()
            .ok_or_else(|| ValidationError::malformed("empty history"))?;
        let actor = prior.active_party();
        let next = prior.propose_move(actor, x, y)?;
        validate(Some(prior), Some(&next), actor)?;
        history.push(next);
    }
    Ok(history)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::board::{Board, Cell, Mark};
    use assert_matches::assert_matches;

    fn players() -> (ParticipantId, ParticipantId) {
        (
            ParticipantId::new_from_entropy([1u8; 32]),
            ParticipantId::new_from_entropy([2u8; 32]),
        )
    }

    fn opened() -> StateRecord {
        let (a, b) = players();
        StateRecord::open(LineageId::new(), a, b)
    }

    #[test]
    fn test_open_accepted() {
        let record = opened();
        assert_eq!(
            validate(None, Some(&record), record.owner_a),
            Ok(TransitionKind::Open)
        );
    }

    #[test]
    fn test_open_requires_owner_a_first() {
        let mut record = opened();
        record.active_turn = Turn::OwnerB;
        assert_matches!(
            validate(None, Some(&record), record.owner_a),
            Err(ValidationError::MalformedTransition { .. })
        );
    }

    #[test]
    fn test_open_requires_empty_board() {
        let mut record = opened();
        record.board = Board::empty().with_mark(0, 0, Mark::A).unwrap();
        assert_matches!(
            validate(None, Some(&record), record.owner_a),
            Err(ValidationError::MalformedTransition { .. })
        );
    }

    #[test]
    fn test_open_rejects_terminal_status() {
        let mut record = opened();
        record.status = GameStatus::Terminal;
        assert_matches!(
            validate(None, Some(&record), record.owner_a),
            Err(ValidationError::StatusMismatch { .. })
        );
    }

    #[test]
    fn test_move_accepted() {
        let prior = opened();
        let next = prior.propose_move(prior.owner_a, 0, 0).unwrap();
        assert_eq!(
            validate(Some(&prior), Some(&next), prior.owner_a),
            Ok(TransitionKind::Move)
        );
    }

    #[test]
    fn test_move_by_wrong_party() {
        let prior = opened();
        let next = prior.propose_move(prior.owner_a, 0, 0).unwrap();
        assert_matches!(
            validate(Some(&prior), Some(&next), prior.owner_b),
            Err(ValidationError::NotYourTurn { .. })
        );
    }

    #[test]
    fn test_move_on_finished_game() {
        let (a, b) = players();
        let history = replay(
            LineageId::new(),
            a,
            b,
            &[(0, 0), (1, 0), (0, 1), (2, 1), (0, 2)],
        )
        .unwrap();
        let last = history.last().unwrap();
        assert_eq!(last.status, GameStatus::Terminal);

        let mut forged = last.clone();
        forged.sequence += 1;
        assert_matches!(
            validate(Some(last), Some(&forged), last.active_party()),
            Err(ValidationError::GameAlreadyOver)
        );
    }

    #[test]
    fn test_move_wrong_mark() {
        let prior = opened();
        let mut next = prior.propose_move(prior.owner_a, 2, 2).unwrap();
        next.board = Board::empty().with_mark(2, 2, Mark::B).unwrap();
        assert_matches!(
            validate(Some(&prior), Some(&next), prior.owner_a),
            Err(ValidationError::WrongMark { x: 2, y: 2 })
        );
    }

    #[test]
    fn test_move_overwriting_a_cell() {
        let prior = opened().propose_move(opened().owner_a, 0, 0).unwrap();
        let mut rows = *prior.board.rows();
        rows[0][0] = Cell::Marked(Mark::B);
        let mut next = prior.clone();
        next.sequence += 1;
        next.active_turn = prior.active_turn.flip();
        next.board = Board::from_rows(rows);
        assert_matches!(
            validate(Some(&prior), Some(&next), prior.owner_b),
            Err(ValidationError::CellOccupied { x: 0, y: 0 })
        );
    }

    #[test]
    fn test_move_changing_two_cells() {
        let prior = opened();
        let mut next = prior.propose_move(prior.owner_a, 0, 0).unwrap();
        next.board = next.board.with_mark(1, 1, Mark::A).unwrap();
        assert_matches!(
            validate(Some(&prior), Some(&next), prior.owner_a),
            Err(ValidationError::MalformedTransition { .. })
        );
    }

    #[test]
    fn test_move_keeping_turn() {
        let prior = opened();
        let mut next = prior.propose_move(prior.owner_a, 0, 0).unwrap();
        next.active_turn = prior.active_turn;
        assert_matches!(
            validate(Some(&prior), Some(&next), prior.owner_a),
            Err(ValidationError::MalformedTransition { .. })
        );
    }

    #[test]
    fn test_move_status_is_recomputed() {
        let prior = opened();
        let mut next = prior.propose_move(prior.owner_a, 0, 0).unwrap();
        next.status = GameStatus::Terminal;
        assert_matches!(
            validate(Some(&prior), Some(&next), prior.owner_a),
            Err(ValidationError::StatusMismatch {
                proposed: GameStatus::Terminal,
                derived: GameStatus::InProgress,
            })
        );
    }

    #[test]
    fn test_close_requires_terminal() {
        let prior = opened();
        assert_matches!(
            validate(Some(&prior), None, prior.owner_a),
            Err(ValidationError::GameNotOver)
        );
    }

    #[test]
    fn test_close_accepted_when_terminal() {
        let (a, b) = players();
        let history = replay(
            LineageId::new(),
            a,
            b,
            &[(0, 0), (1, 0), (0, 1), (2, 1), (0, 2)],
        )
        .unwrap();
        let last = history.last().unwrap();
        assert_eq!(validate(Some(last), None, b), Ok(TransitionKind::Close));
        assert_matches!(
            validate(
                Some(last),
                None,
                ParticipantId::new_from_entropy([5u8; 32])
            ),
            Err(ValidationError::NotParticipant { .. })
        );
    }

    #[test]
    fn test_transition_consumed_versions() {
        let record = opened();
        let open = Transition::from_parts(None, Some(record.clone())).unwrap();
        assert_eq!(open.consumed_version(), VersionKey::genesis(record.id));
        assert_eq!(open.kind(), TransitionKind::Open);

        let close = Transition::from_parts(Some(record.clone()), None).unwrap();
        assert_eq!(close.consumed_version(), record.version_key());
        assert!(Transition::from_parts(None, None).is_err());
    }

    #[test]
    fn test_scenario_a_column_win() {
        let (a, b) = players();
        let history = replay(
            LineageId::new(),
            a,
            b,
            &[(0, 0), (1, 0), (0, 1), (2, 1), (0, 2)],
        )
        .unwrap();
        let last = history.last().unwrap();
        assert_eq!(last.status, GameStatus::Terminal);
        assert_eq!(last.winner(), Some(a));
        assert_eq!(
            last.board.winning_line(),
            Some((Mark::A, crate::board::Line::Column(0)))
        );
    }
}
