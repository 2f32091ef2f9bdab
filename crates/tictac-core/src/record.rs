//! State records: immutable snapshots of one game
//!
//! A lineage is the chain of records sharing one [`LineageId`]. Each record
//! is addressed by its [`VersionKey`], which the uniqueness authority
//! consumes exactly once when the record is superseded.

use crate::board::{Board, Cell, Mark};
use crate::errors::ValidationError;
use crate::hash;
use crate::identifiers::{LineageId, ParticipantId, VersionKey};
use serde::{Deserialize, Serialize};

/// Which owner may propose the next transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Turn {
    /// The first owner (moves first)
    OwnerA,
    /// The second owner
    OwnerB,
}

impl Turn {
    /// The other owner's turn
    pub fn flip(self) -> Self {
        match self {
            Turn::OwnerA => Turn::OwnerB,
            Turn::OwnerB => Turn::OwnerA,
        }
    }

    /// Mark written by the owner holding this turn
    pub fn mark(self) -> Mark {
        match self {
            Turn::OwnerA => Mark::A,
            Turn::OwnerB => Mark::B,
        }
    }
}

/// Lifecycle status; monotonic from `InProgress` to `Terminal`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GameStatus {
    /// Moves are still accepted
    InProgress,
    /// Won or drawn; eligible for retirement
    Terminal,
}

/// Immutable snapshot of a game.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateRecord {
    /// Lineage identity, stable across versions
    pub id: LineageId,
    /// Number of moves applied since the open transition
    pub sequence: u64,
    /// First owner, plays [`Mark::A`]
    pub owner_a: ParticipantId,
    /// Second owner, plays [`Mark::B`]
    pub owner_b: ParticipantId,
    /// Grid payload
    pub board: Board,
    /// Whose move is next
    pub active_turn: Turn,
    /// Derived from `board`
    pub status: GameStatus,
}

impl StateRecord {
    /// The only legal initial record for a lineage.
    pub fn open(id: LineageId, owner_a: ParticipantId, owner_b: ParticipantId) -> Self {
        Self {
            id,
            sequence: 0,
            owner_a,
            owner_b,
            board: Board::empty(),
            active_turn: Turn::OwnerA,
            status: GameStatus::InProgress,
        }
    }

    /// Reference to this exact snapshot.
    pub fn version_key(&self) -> VersionKey {
        VersionKey(hash::hash(b"TICTAC_RECORD", &self.canonical_bytes()))
    }

    /// Fixed-layout encoding used for content addressing.
    pub fn canonical_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(16 * 3 + 8 + 9 + 2);
        bytes.extend_from_slice(self.id.0.as_bytes());
        bytes.extend_from_slice(&self.sequence.to_le_bytes());
        bytes.extend_from_slice(self.owner_a.0.as_bytes());
        bytes.extend_from_slice(self.owner_b.0.as_bytes());
        for cell in self.board.rows().iter().flatten() {
            bytes.push(match cell {
                Cell::Empty => 0,
                Cell::Marked(Mark::A) => 1,
                Cell::Marked(Mark::B) => 2,
            });
        }
        bytes.push(match self.active_turn {
            Turn::OwnerA => 0,
            Turn::OwnerB => 1,
        });
        bytes.push(match self.status {
            GameStatus::InProgress => 0,
            GameStatus::Terminal => 1,
        });
        bytes
    }

    /// Both owners
    pub fn participants(&self) -> Vec<ParticipantId> {
        vec![self.owner_a, self.owner_b]
    }

    /// Whether `party` owns this record
    pub fn is_participant(&self, party: ParticipantId) -> bool {
        party == self.owner_a || party == self.owner_b
    }

    /// Owner holding `turn`
    pub fn owner_for(&self, turn: Turn) -> ParticipantId {
        match turn {
            Turn::OwnerA => self.owner_a,
            Turn::OwnerB => self.owner_b,
        }
    }

    /// Owner whose move is next
    pub fn active_party(&self) -> ParticipantId {
        self.owner_for(self.active_turn)
    }

    /// The other owner, if `party` is one
    pub fn opponent_of(&self, party: ParticipantId) -> Option<ParticipantId> {
        if party == self.owner_a {
            Some(self.owner_b)
        } else if party == self.owner_b {
            Some(self.owner_a)
        } else {
            None
        }
    }

    /// Mark played by `party`
    pub fn mark_of(&self, party: ParticipantId) -> Option<Mark> {
        if party == self.owner_a {
            Some(Mark::A)
        } else if party == self.owner_b {
            Some(Mark::B)
        } else {
            None
        }
    }

    /// Whether moves are still accepted
    pub fn is_in_progress(&self) -> bool {
        self.status == GameStatus::InProgress
    }

    /// Owner of the completed line, `None` while in progress or on a draw
    pub fn winner(&self) -> Option<ParticipantId> {
        self.board.winning_line().map(|(mark, _)| match mark {
            Mark::A => self.owner_a,
            Mark::B => self.owner_b,
        })
    }

    /// Build the successor produced by `actor` marking `(x, y)`.
    ///
    /// Only the proposal is built here; the rule engine still has to accept
    /// the `(self, successor, actor)` triple.
    pub fn propose_move(
        &self,
        actor: ParticipantId,
        x: usize,
        y: usize,
    ) -> Result<StateRecord, ValidationError> {
        if !self.is_in_progress() {
            return Err(ValidationError::GameAlreadyOver);
        }
        let expected = self.active_party();
        if actor != expected {
            return Err(ValidationError::NotYourTurn {
                participant: actor,
                expected,
            });
        }

        let board = self.board.with_mark(x, y, self.active_turn.mark())?;
        Ok(StateRecord {
            id: self.id,
            sequence: self.sequence + 1,
            owner_a: self.owner_a,
            owner_b: self.owner_b,
            board,
            active_turn: self.active_turn.flip(),
            status: board.derive_status(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn players() -> (ParticipantId, ParticipantId) {
        (
            ParticipantId::new_from_entropy([1u8; 32]),
            ParticipantId::new_from_entropy([2u8; 32]),
        )
    }

    #[test]
    fn test_open_record_shape() {
        let (a, b) = players();
        let record = StateRecord::open(LineageId::new(), a, b);
        assert_eq!(record.active_party(), a);
        assert!(record.board.is_empty());
        assert!(record.is_in_progress());
        assert_eq!(record.sequence, 0);
    }

    #[test]
    fn test_version_key_tracks_content() {
        let (a, b) = players();
        let record = StateRecord::open(LineageId::new(), a, b);
        let next = record.propose_move(a, 0, 0).unwrap();
        assert_eq!(record.version_key(), record.clone().version_key());
        assert_ne!(record.version_key(), next.version_key());
    }

    #[test]
    fn test_propose_move_flips_turn() {
        let (a, b) = players();
        let record = StateRecord::open(LineageId::new(), a, b);
        let next = record.propose_move(a, 1, 1).unwrap();
        assert_eq!(next.active_party(), b);
        assert_eq!(next.sequence, 1);
        assert_eq!(next.board.get(1, 1).unwrap(), Cell::Marked(Mark::A));
    }

    #[test]
    fn test_propose_move_checks_turn_first() {
        let (a, b) = players();
        let record = StateRecord::open(LineageId::new(), a, b);
        assert_matches!(
            record.propose_move(b, 0, 0),
            Err(ValidationError::NotYourTurn { participant, expected }) if participant == b && expected == a
        );
    }

    #[test]
    fn test_outsider_cannot_move() {
        let (a, b) = players();
        let outsider = ParticipantId::new_from_entropy([9u8; 32]);
        let record = StateRecord::open(LineageId::new(), a, b);
        assert_matches!(
            record.propose_move(outsider, 0, 0),
            Err(ValidationError::NotYourTurn { .. })
        );
    }

    #[test]
    fn test_roles() {
        let (a, b) = players();
        let record = StateRecord::open(LineageId::new(), a, b);
        assert_eq!(record.opponent_of(a), Some(b));
        assert_eq!(record.mark_of(b), Some(Mark::B));
        assert_eq!(record.winner(), None);
    }
}
