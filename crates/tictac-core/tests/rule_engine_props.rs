//! Property tests for the transition rule engine.

#![allow(clippy::expect_used, clippy::unwrap_used, missing_docs)]

use proptest::prelude::*;
use tictac_core::{
    replay, validate, Board, Cell, GameStatus, LineageId, ParticipantId, StateRecord,
    TransitionKind, ValidationError,
};

fn owners() -> (ParticipantId, ParticipantId) {
    (
        ParticipantId::from_name("alice"),
        ParticipantId::from_name("bob"),
    )
}

/// Turn a list of arbitrary picks into a legal move list: each pick selects
/// one of the cells still empty, and play stops at the first terminal board.
fn legal_moves(picks: &[usize]) -> Vec<(usize, usize)> {
    let mut board = Board::empty();
    let mut mark = tictac_core::Mark::A;
    let mut moves = Vec::new();
    for pick in picks {
        if board.is_terminal() {
            break;
        }
        let empty: Vec<(usize, usize)> = (0..9)
            .map(|p| (p % 3, p / 3))
            .filter(|&(x, y)| board.get(x, y).unwrap().is_empty())
            .collect();
        let (x, y) = empty[pick % empty.len()];
        board = board.with_mark(x, y, mark).unwrap();
        mark = mark.opponent();
        moves.push((x, y));
    }
    moves
}

proptest! {
    #[test]
    fn status_is_always_derivable_from_board(picks in proptest::collection::vec(0usize..9, 0..12)) {
        let (a, b) = owners();
        let history = replay(LineageId::new(), a, b, &legal_moves(&picks)).unwrap();
        for record in &history {
            prop_assert_eq!(record.status, record.board.derive_status());
        }
    }

    #[test]
    fn both_owners_reach_the_same_verdict(picks in proptest::collection::vec(0usize..9, 1..12)) {
        let (a, b) = owners();
        let history = replay(LineageId::new(), a, b, &legal_moves(&picks)).unwrap();
        for pair in history.windows(2) {
            let (prior, next) = (&pair[0], &pair[1]);
            let acting = prior.active_party();
            // Each owner runs the engine on its own copy of the prior.
            let copy_a = prior.clone();
            let copy_b = prior.clone();
            let verdict_a = validate(Some(&copy_a), Some(next), acting);
            let verdict_b = validate(Some(&copy_b), Some(next), acting);
            prop_assert_eq!(verdict_a.clone(), verdict_b);
            prop_assert_eq!(verdict_a, Ok(TransitionKind::Move));
        }
    }

    #[test]
    fn replay_reproduces_the_head(picks in proptest::collection::vec(0usize..9, 0..12)) {
        let (a, b) = owners();
        let lineage = LineageId::new();
        let moves = legal_moves(&picks);

        let history = replay(lineage, a, b, &moves).unwrap();
        let again = replay(lineage, a, b, &moves).unwrap();
        prop_assert_eq!(history.last(), again.last());

        let head = history.last().unwrap();
        prop_assert_eq!(head.sequence as usize, moves.len());
        prop_assert_eq!(head.board.marks_placed(), moves.len());
    }

    #[test]
    fn off_turn_party_is_always_rejected(picks in proptest::collection::vec(0usize..9, 0..8)) {
        let (a, b) = owners();
        let history = replay(LineageId::new(), a, b, &legal_moves(&picks)).unwrap();
        let head = history.last().unwrap();
        prop_assume!(head.status == GameStatus::InProgress);

        let active = head.active_party();
        let idle = head.opponent_of(active).unwrap();
        let (x, y) = (0..9)
            .map(|p| (p % 3, p / 3))
            .find(|&(x, y)| head.board.get(x, y).unwrap().is_empty())
            .unwrap();
        let next = head.propose_move(active, x, y).unwrap();

        let is_not_your_turn = matches!(
            validate(Some(head), Some(&next), idle),
            Err(ValidationError::NotYourTurn { .. })
        );
        prop_assert!(is_not_your_turn);
    }

    #[test]
    fn overwriting_any_marked_cell_is_rejected(picks in proptest::collection::vec(0usize..9, 1..8)) {
        let (a, b) = owners();
        let history = replay(LineageId::new(), a, b, &legal_moves(&picks)).unwrap();
        let head = history.last().unwrap();
        prop_assume!(head.status == GameStatus::InProgress);

        let (x, y) = (0..9)
            .map(|p| (p % 3, p / 3))
            .find(|&(x, y)| !head.board.get(x, y).unwrap().is_empty())
            .unwrap();
        let mut rows = *head.board.rows();
        rows[y][x] = Cell::Marked(head.active_turn.mark());
        let mut forged: StateRecord = head.clone();
        forged.board = Board::from_rows(rows);
        forged.sequence += 1;
        forged.active_turn = head.active_turn.flip();
        forged.status = forged.board.derive_status();

        let verdict = validate(Some(head), Some(&forged), head.active_party());
        // Rewriting a cell with the mark it already holds changes nothing.
        let rejected = matches!(
            verdict,
            Err(ValidationError::CellOccupied { .. }) | Err(ValidationError::MalformedTransition { .. })
        );
        prop_assert!(rejected);
    }
}
