//! Error taxonomy for the game protocol
//!
//! Two layers: [`ValidationError`] is what the pure rule engine returns and
//! is always surfaced verbatim; [`TictacError`] wraps it together with the
//! protocol, conflict and fatal failures of the distributed commit path.

use crate::identifiers::{LineageId, ParticipantId, ProposalId, VersionKey};
use crate::record::GameStatus;
use serde::{Deserialize, Serialize};

/// Rule violations found by the transition rule engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
pub enum ValidationError {
    /// The acting party is not the owner whose turn it is
    #[error("Not your turn: {participant} acted while {expected} is due")]
    NotYourTurn {
        /// Party that tried to act
        participant: ParticipantId,
        /// Party whose turn it is
        expected: ParticipantId,
    },

    /// Target cell already holds a mark
    #[error("Cell ({x}, {y}) is already occupied")]
    CellOccupied {
        /// Column
        x: usize,
        /// Row
        y: usize,
    },

    /// Coordinates outside the 3x3 grid
    #[error("Invalid board index ({x}, {y})")]
    InvalidIndex {
        /// Column
        x: usize,
        /// Row
        y: usize,
    },

    /// Changed cell does not carry the acting party's mark
    #[error("Cell ({x}, {y}) was not written with the acting party's mark")]
    WrongMark {
        /// Column
        x: usize,
        /// Row
        y: usize,
    },

    /// Move attempted on a finished game
    #[error("Game is already over")]
    GameAlreadyOver,

    /// Close attempted on a game still in progress
    #[error("Game is not over")]
    GameNotOver,

    /// Participant already holds an in-progress game
    #[error("{participant} is already in game {lineage}")]
    AlreadyInGame {
        /// Busy participant
        participant: ParticipantId,
        /// Their active game
        lineage: LineageId,
    },

    /// Acting party is not an owner of the record
    #[error("{participant} is not a participant of this game")]
    NotParticipant {
        /// Outsider
        participant: ParticipantId,
    },

    /// Proposed status disagrees with the status derived from the board
    #[error("Status mismatch: proposed {proposed:?}, board implies {derived:?}")]
    StatusMismatch {
        /// Status carried by the proposal
        proposed: GameStatus,
        /// Status recomputed from the payload
        derived: GameStatus,
    },

    /// Proposal shape is not a legal transition
    #[error("Malformed transition: {reason}")]
    MalformedTransition {
        /// What is wrong with it
        reason: String,
    },
}

impl ValidationError {
    /// Create a malformed-transition error
    pub fn malformed(reason: impl Into<String>) -> Self {
        Self::MalformedTransition {
            reason: reason.into(),
        }
    }

    /// Stable machine-readable code
    pub fn code(&self) -> &'static str {
        match self {
            ValidationError::NotYourTurn { .. } => "not_your_turn",
            ValidationError::CellOccupied { .. } => "cell_occupied",
            ValidationError::InvalidIndex { .. } => "invalid_index",
            ValidationError::WrongMark { .. } => "wrong_mark",
            ValidationError::GameAlreadyOver => "game_already_over",
            ValidationError::GameNotOver => "game_not_over",
            ValidationError::AlreadyInGame { .. } => "already_in_game",
            ValidationError::NotParticipant { .. } => "not_participant",
            ValidationError::StatusMismatch { .. } => "status_mismatch",
            ValidationError::MalformedTransition { .. } => "malformed_transition",
        }
    }
}

/// How a caller is expected to react to an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorClass {
    /// Rule violation; surface as-is, never retry
    Validation,
    /// Session failure; retry the whole proposal after a fresh read
    Protocol,
    /// Prior version already consumed; re-read and recompute before retrying
    Conflict,
    /// Abort; nothing was persisted
    Fatal,
}

/// Unified error type for protocol operations
#[derive(Debug, Clone, Serialize, Deserialize, thiserror::Error)]
pub enum TictacError {
    /// The rule engine rejected the transition
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Counter-party did not answer within the caller's timeout
    #[error("Counterparty {participant} unresponsive after {timeout_ms}ms")]
    CounterpartyUnresponsive {
        /// Silent party
        participant: ParticipantId,
        /// Timeout that elapsed
        timeout_ms: u64,
    },

    /// Counter-party refused to endorse
    #[error("Session rejected by {participant}: {reason}")]
    SessionRejected {
        /// Rejecting party
        participant: ParticipantId,
        /// Reason reported by the counter-party
        reason: String,
    },

    /// Session could not be established or was torn down
    #[error("Session with {participant} unavailable: {reason}")]
    SessionUnavailable {
        /// Unreachable party
        participant: ParticipantId,
        /// Transport-level detail
        reason: String,
    },

    /// Endorsements missing from the artifact
    #[error("Quorum incomplete, missing signatures from {missing:?}")]
    QuorumIncomplete {
        /// Required signers without a valid endorsement
        missing: Vec<ParticipantId>,
    },

    /// The prior version was consumed by another transition
    #[error("Conflict: {version_key} already consumed by {consumed_by}")]
    Conflict {
        /// Contended version
        version_key: VersionKey,
        /// Proposal that won the compare-and-swap
        consumed_by: ProposalId,
    },

    /// Lookup failed
    #[error("Not found: {message}")]
    NotFound {
        /// What was not found
        message: String,
    },

    /// Local store failure or corruption
    #[error("Storage error: {message}")]
    Storage {
        /// Error message describing the storage failure
        message: String,
    },

    /// The uniqueness authority could not be reached
    #[error("Authority unavailable: {message}")]
    AuthorityUnavailable {
        /// Error message describing the failure
        message: String,
    },

    /// Signature creation or verification failed
    #[error("Crypto error: {message}")]
    Crypto {
        /// Error message describing the cryptographic failure
        message: String,
    },

    /// Encoding failure
    #[error("Serialization error: {message}")]
    Serialization {
        /// Error message describing the serialization failure
        message: String,
    },

    /// Invalid configuration
    #[error("Config error: {message}")]
    Config {
        /// Error message describing the bad setting
        message: String,
    },

    /// Internal system error
    #[error("Internal error: {message}")]
    Internal {
        /// Error message describing the internal error
        message: String,
    },
}

impl TictacError {
    /// Create a not found error
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound {
            message: message.into(),
        }
    }

    /// Create a storage error
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }

    /// Create an authority-unavailable error
    pub fn authority_unavailable(message: impl Into<String>) -> Self {
        Self::AuthorityUnavailable {
            message: message.into(),
        }
    }

    /// Create a crypto error
    pub fn crypto(message: impl Into<String>) -> Self {
        Self::Crypto {
            message: message.into(),
        }
    }

    /// Create a serialization error
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization {
            message: message.into(),
        }
    }

    /// Create a config error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Create a session-unavailable error
    pub fn session_unavailable(participant: ParticipantId, reason: impl Into<String>) -> Self {
        Self::SessionUnavailable {
            participant,
            reason: reason.into(),
        }
    }

    /// Classify for caller reaction
    pub fn class(&self) -> ErrorClass {
        match self {
            TictacError::Validation(_) | TictacError::NotFound { .. } => ErrorClass::Validation,
            TictacError::CounterpartyUnresponsive { .. }
            | TictacError::SessionRejected { .. }
            | TictacError::SessionUnavailable { .. }
            | TictacError::QuorumIncomplete { .. } => ErrorClass::Protocol,
            TictacError::Conflict { .. } => ErrorClass::Conflict,
            TictacError::Storage { .. }
            | TictacError::AuthorityUnavailable { .. }
            | TictacError::Crypto { .. }
            | TictacError::Serialization { .. }
            | TictacError::Config { .. }
            | TictacError::Internal { .. } => ErrorClass::Fatal,
        }
    }

    /// Whether the caller may resubmit the same intent after a fresh read.
    ///
    /// Conflicts are excluded: the proposal must be recomputed, not resent.
    pub fn is_retryable(&self) -> bool {
        self.class() == ErrorClass::Protocol
    }

    /// The rule violation, if this is one
    pub fn as_validation(&self) -> Option<&ValidationError> {
        match self {
            TictacError::Validation(err) => Some(err),
            _ => None,
        }
    }

    /// Stable machine-readable code
    pub fn code(&self) -> &'static str {
        match self {
            TictacError::Validation(err) => err.code(),
            TictacError::CounterpartyUnresponsive { .. } => "counterparty_unresponsive",
            TictacError::SessionRejected { .. } => "session_rejected",
            TictacError::SessionUnavailable { .. } => "session_unavailable",
            TictacError::QuorumIncomplete { .. } => "quorum_incomplete",
            TictacError::Conflict { .. } => "conflict",
            TictacError::NotFound { .. } => "not_found",
            TictacError::Storage { .. } => "storage",
            TictacError::AuthorityUnavailable { .. } => "authority_unavailable",
            TictacError::Crypto { .. } => "crypto",
            TictacError::Serialization { .. } => "serialization",
            TictacError::Config { .. } => "config",
            TictacError::Internal { .. } => "internal",
        }
    }
}

impl From<bincode::Error> for TictacError {
    fn from(err: bincode::Error) -> Self {
        Self::serialization(err.to_string())
    }
}

/// Standard Result type for protocol operations
pub type Result<T> = std::result::Result<T, TictacError>;
