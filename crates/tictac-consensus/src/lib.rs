//! # Tictac Consensus - agreement on game transitions
//!
//! Every transition of a game record is agreed by all of its owners and
//! sequenced by a uniqueness authority before any participant stores it.
//!
//! ## Architecture
//!
//! - **signing**: participant keys, endorsements and the key directory
//! - **messages**: proposals, replies, signed transitions, finality notices
//! - **session**: in-process router, point-to-point sessions, responder loop
//! - **quorum**: parallel collection of every owner's endorsement
//! - **authority**: compare-and-swap on consumed version keys
//! - **finality**: delivery of committed transitions to participant stores
//! - **sync**: reconciliation of stale stores against the authority
//! - **node**: one participant's initiator pipeline
//! - **service**: façade hosting nodes behind a shared network
//!
//! ## Commit path
//!
//! 1. The initiator validates locally and signs a `Proposal`
//! 2. Each counter-party re-validates against its own store and endorses
//! 3. The authority consumes the prior version key exactly once
//! 4. The initiator broadcasts the committed artifact; unreachable parties
//!    stay stale until they resync

#![forbid(unsafe_code)]

pub mod authority;
pub mod finality;
pub mod messages;
pub mod node;
pub mod quorum;
pub mod service;
pub mod session;
pub mod signing;
pub mod sync;

pub use authority::{
    CommitOutcome, CommitReceipt, InMemoryAuthority, LineageHead, UniquenessAuthority,
};
pub use finality::{apply_committed, FinalityBroadcaster, FinalityReport};
pub use messages::{
    Envelope, FinalityAck, FinalityNotice, Proposal, RejectReason, SessionReply, SignedProposal,
    SignedTransition,
};
pub use node::{CommittedTransition, ParticipantNode};
pub use quorum::QuorumCollector;
pub use service::{CloseAck, GameService, GameServiceBuilder};
pub use session::{Session, SessionResponder, SessionRouter};
pub use signing::{Endorsement, KeyDirectory, ParticipantKeys};
pub use sync::{reconcile_lineage, SyncOutcome};
