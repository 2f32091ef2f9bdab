//! Tictac Core - game records and the transition rule engine
//!
//! Pure types shared by every party to a game. Nothing in this crate performs
//! I/O beyond loading configuration; the distributed commit path lives in
//! `tictac-consensus`.
//!
//! # Model
//!
//! - `StateRecord`: immutable snapshot of one game, addressed by `VersionKey`
//! - Lineage: the chain of records sharing one `LineageId`
//! - `validate`: the deterministic rule engine every party runs before
//!   endorsing a transition
//!
//! # Lineage lifecycle
//!
//! `∅ → InProgress → (InProgress)* → Terminal → retired`

#![forbid(unsafe_code)]

/// 3x3 board payload and win detection
pub mod board;

/// Runtime configuration
pub mod config;

/// Unified error handling
pub mod errors;

/// Domain-separated content hashing
pub mod hash;

/// Participant, lineage and version identifiers
pub mod identifiers;

/// State record model
pub mod record;

/// Transition rule engine
pub mod transition;

pub use board::{position_to_coords, Board, Cell, Line, Mark, BOARD_SIZE};
pub use config::ProtocolConfig;
pub use errors::{ErrorClass, Result, TictacError, ValidationError};
pub use hash::Hash32;
pub use identifiers::{LineageId, ParticipantId, ProposalId, VersionKey};
pub use record::{GameStatus, StateRecord, Turn};
pub use transition::{replay, validate, Transition, TransitionKind};
