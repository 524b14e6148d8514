//! The external note-algorithms collaborator (spec.md §4.7 "NoteAlgorithms").
//!
//! Computing a claim note's commitment and the nullifier that will later spend it is circuit
//! logic shared with the prover, not something the synchronizer should hardcode; the spec keeps
//! it behind this trait for the same reason the teacher keeps signature verification and ABCI
//! app hashing behind thin collaborator traits rather than inlining cryptography into the
//! orchestration code.

use async_trait::async_trait;

use crate::types::{
    sha256,
    Hash,
};

/// The fields of a still-pending defi claim that determine its note commitment (spec.md §4.5.6).
#[derive(Debug, Clone, Copy)]
pub struct ClaimNoteInput {
    pub bridge_id: u32,
    pub deposit_value: u128,
    pub partial_state: Hash,
    pub partial_state_secret_eph_pub_key: Hash,
    pub input_nullifier: Hash,
    pub interaction_nonce: u64,
    pub fee: u64,
}

#[async_trait]
pub trait NoteAlgorithms: Send + Sync {
    /// Commitment inserted into the DATA tree once a claim's defi interaction settles with a
    /// non-zero result (spec.md §4.5.6).
    fn compute_claim_note_commitment(&self, input: &ClaimNoteInput) -> Hash;

    /// Nullifier that will later be inserted into the NULL tree when the claim note above is
    /// spent by a `DEFI_CLAIM` proof (spec.md §4.5.5, §4.5.6).
    fn compute_claim_nullifier(&self, commitment: Hash) -> Hash;
}

/// Deterministic stand-in for the real circuit's note algorithms: commits via a domain-separated
/// hash of the claim's fields, and derives the nullifier as a further domain-separated hash of
/// the commitment. Good enough to exercise the synchronizer's defi-claim bookkeeping; a real
/// deployment would call into the same arithmetic circuit the prover uses.
#[derive(Debug, Default)]
pub struct HashNoteAlgorithms;

impl HashNoteAlgorithms {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

const CLAIM_NOTE_DOMAIN: &[u8] = b"claim-note-commitment";
const CLAIM_NULLIFIER_DOMAIN: &[u8] = b"claim-note-nullifier";

#[async_trait]
impl NoteAlgorithms for HashNoteAlgorithms {
    fn compute_claim_note_commitment(&self, input: &ClaimNoteInput) -> Hash {
        let mut buf = Vec::new();
        buf.extend_from_slice(CLAIM_NOTE_DOMAIN);
        buf.extend_from_slice(&input.bridge_id.to_be_bytes());
        buf.extend_from_slice(&input.deposit_value.to_be_bytes());
        buf.extend_from_slice(&input.partial_state);
        buf.extend_from_slice(&input.partial_state_secret_eph_pub_key);
        buf.extend_from_slice(&input.input_nullifier);
        buf.extend_from_slice(&input.interaction_nonce.to_be_bytes());
        buf.extend_from_slice(&input.fee.to_be_bytes());
        sha256(&buf)
    }

    fn compute_claim_nullifier(&self, commitment: Hash) -> Hash {
        let mut buf = Vec::with_capacity(CLAIM_NULLIFIER_DOMAIN.len() + 32);
        buf.extend_from_slice(CLAIM_NULLIFIER_DOMAIN);
        buf.extend_from_slice(&commitment);
        sha256(&buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input() -> ClaimNoteInput {
        ClaimNoteInput {
            bridge_id: 3,
            deposit_value: 1000,
            partial_state: [1; 32],
            partial_state_secret_eph_pub_key: [2; 32],
            input_nullifier: [3; 32],
            interaction_nonce: 9,
            fee: 12,
        }
    }

    #[test]
    fn commitment_is_deterministic() {
        let algo = HashNoteAlgorithms::new();
        assert_eq!(
            algo.compute_claim_note_commitment(&input()),
            algo.compute_claim_note_commitment(&input())
        );
    }

    #[test]
    fn nullifier_differs_from_commitment() {
        let algo = HashNoteAlgorithms::new();
        let commitment = algo.compute_claim_note_commitment(&input());
        let nullifier = algo.compute_claim_nullifier(commitment);
        assert_ne!(commitment, nullifier);
    }

    #[test]
    fn distinct_claims_commit_differently() {
        let algo = HashNoteAlgorithms::new();
        let mut other = input();
        other.deposit_value += 1;
        assert_ne!(
            algo.compute_claim_note_commitment(&input()),
            algo.compute_claim_note_commitment(&other)
        );
    }
}
