//! Ed25519 endorsements and the participant key directory

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use parking_lot::RwLock;
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tictac_core::{hash, ParticipantId, ProposalId, Result, TictacError};

const ENDORSEMENT_DOMAIN: &[u8] = b"TICTAC_ENDORSEMENT";

/// One participant's signature over a proposal id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endorsement {
    /// Signing participant
    pub signer: ParticipantId,
    /// Ed25519 signature over the endorsement message
    pub signature: Signature,
}

fn endorsement_message(proposal_id: ProposalId) -> [u8; 32] {
    hash::hash(ENDORSEMENT_DOMAIN, proposal_id.0.as_bytes()).0
}

/// Signing identity of a participant.
pub struct ParticipantKeys {
    id: ParticipantId,
    signing_key: SigningKey,
}

impl ParticipantKeys {
    /// Fresh keypair from the OS RNG
    pub fn generate(id: ParticipantId) -> Self {
        Self {
            id,
            signing_key: SigningKey::generate(&mut OsRng),
        }
    }

    /// Deterministic keypair from a 32-byte seed
    pub fn from_seed(id: ParticipantId, seed: [u8; 32]) -> Self {
        Self {
            id,
            signing_key: SigningKey::from_bytes(&seed),
        }
    }

    /// Participant these keys belong to
    pub fn id(&self) -> ParticipantId {
        self.id
    }

    /// Public half
    pub fn verifying_key(&self) -> VerifyingKey {
        self.signing_key.verifying_key()
    }

    /// Endorse `proposal_id`
    pub fn endorse(&self, proposal_id: ProposalId) -> Endorsement {
        Endorsement {
            signer: self.id,
            signature: self.signing_key.sign(&endorsement_message(proposal_id)),
        }
    }
}

impl fmt::Debug for ParticipantKeys {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ParticipantKeys")
            .field("id", &self.id)
            .field("verifying_key", &self.verifying_key())
            .finish_non_exhaustive()
    }
}

/// Public keys of every known participant.
///
/// Shared by all nodes and the authority; cloning shares the same table.
#[derive(Clone, Default)]
pub struct KeyDirectory {
    keys: Arc<RwLock<HashMap<ParticipantId, VerifyingKey>>>,
}

impl KeyDirectory {
    /// Empty directory
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish the public key of `participant`
    pub fn register(&self, participant: ParticipantId, key: VerifyingKey) {
        self.keys.write().insert(participant, key);
    }

    /// Look up a public key
    pub fn get(&self, participant: ParticipantId) -> Option<VerifyingKey> {
        self.keys.read().get(&participant).copied()
    }

    /// Whether `participant` has published a key
    pub fn contains(&self, participant: ParticipantId) -> bool {
        self.keys.read().contains_key(&participant)
    }

    /// Check that `endorsement` is a valid signature over `proposal_id`.
    pub fn verify(&self, proposal_id: ProposalId, endorsement: &Endorsement) -> Result<()> {
        let key = self.get(endorsement.signer).ok_or_else(|| {
            TictacError::crypto(format!("No public key for {}", endorsement.signer))
        })?;
        key.verify(&endorsement_message(proposal_id), &endorsement.signature)
            .map_err(|e| {
                TictacError::crypto(format!(
                    "Invalid endorsement from {}: {e}",
                    endorsement.signer
                ))
            })
    }
}

impl fmt::Debug for KeyDirectory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyDirectory")
            .field("participants", &self.keys.read().len())
            .finish()
    }
}
