//! Tictac Testing Infrastructure
//!
//! Common fixtures for protocol tests: named participants, services wired to
//! a shared in-process network, and endpoints that misbehave on purpose.
//!
//! # Usage
//!
//! ```rust,ignore
//! use tictac_testkit::*;
//!
//! #[tokio::test]
//! async fn my_test() {
//!     init_tracing();
//!     let service = service_for(&[alice(), bob()]);
//!     let lineage = service.open_game(alice(), bob()).await.unwrap();
//! }
//! ```

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]

pub mod fixtures;
pub mod network;

pub use fixtures::*;
pub use network::{PartitionOnCommit, SilentParticipant};

use once_cell::sync::Lazy;
use tracing_subscriber::EnvFilter;

static TRACING: Lazy<()> = Lazy::new(|| {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
});

/// Install the test subscriber once per process; `RUST_LOG` overrides the
/// default `warn` filter.
pub fn init_tracing() {
    Lazy::force(&TRACING);
}
