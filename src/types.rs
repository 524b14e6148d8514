//! The wire-level data model shared between the chain source, the synchronizer, and the
//! relational store.
//!
//! Decoding here must stay bit-exact with whatever encoder produced the bytes on-chain; see
//! spec.md §6. The byte layout fixed here is big-endian, fixed-width fields, mirroring the
//! teacher's `sequencer_client` wire types in shape (plain structs, no derive magic) even though
//! the actual bytes are specific to this rollup's proof format rather than cometbft's.

use std::fmt;

use bytes::{
    Buf,
    Bytes,
};
use sha2::{
    Digest as _,
    Sha256,
};

/// `txFee - (txFee >> 1)`, i.e. the portion of the fee retained by the defi claim.
/// See spec.md §4.5.6 and §8 property 7.
#[must_use]
pub fn defi_claim_fee(tx_fee: u64) -> u64 {
    tx_fee - (tx_fee >> 1)
}

/// Asset id used to mark "no asset in this slot"; must be excluded from asset-metrics
/// accumulation (spec.md §4.5.8).
pub const UNUSED_ASSET_ID: u32 = 1 << 30;

/// A 32-byte tree root or leaf hash.
pub type Hash = [u8; 32];

pub const ZERO_HASH: Hash = [0u8; 32];

/// One of the four independent append-only trees (spec.md §3, "Tree tag").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TreeTag {
    Data,
    Null,
    Root,
    Defi,
}

impl TreeTag {
    pub const ALL: [TreeTag; 4] = [TreeTag::Data, TreeTag::Null, TreeTag::Root, TreeTag::Defi];
}

impl fmt::Display for TreeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TreeTag::Data => "data",
            TreeTag::Null => "null",
            TreeTag::Root => "root",
            TreeTag::Defi => "defi",
        };
        f.write_str(s)
    }
}

/// One user-tx proof kind. `Padding` proofs carry zero nullifiers and are skipped everywhere
/// (spec.md §3 glossary).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProofId {
    Deposit,
    Withdraw,
    Send,
    Account,
    DefiDeposit,
    DefiClaim,
    Padding,
}

/// Derived from `InnerProof::proof_id` when a `TxDao` is rebuilt from on-chain inner proofs
/// (spec.md §4.5.7, SPEC_FULL.md §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxType {
    Deposit,
    Withdraw,
    Transfer,
    Account,
    DefiDeposit,
    DefiClaim,
}

impl TxType {
    #[must_use]
    pub fn from_proof_id(id: ProofId) -> Option<Self> {
        match id {
            ProofId::Deposit => Some(Self::Deposit),
            ProofId::Withdraw => Some(Self::Withdraw),
            ProofId::Send => Some(Self::Transfer),
            ProofId::Account => Some(Self::Account),
            ProofId::DefiDeposit => Some(Self::DefiDeposit),
            ProofId::DefiClaim => Some(Self::DefiClaim),
            ProofId::Padding => None,
        }
    }
}

/// One user-tx proof embedded in a rollup (spec.md §3 "InnerProof").
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InnerProof {
    pub proof_id: ProofId,
    pub tx_id: Hash,
    pub note_commitment_1: Hash,
    pub note_commitment_2: Hash,
    pub nullifier_1: Hash,
    pub nullifier_2: Hash,
}

impl InnerProof {
    #[must_use]
    pub fn is_padding(&self) -> bool {
        matches!(self.proof_id, ProofId::Padding)
    }
}

/// A single cross-protocol bridge call result, fixed byte width on the wire (spec.md §3
/// "DefiInteractionNote").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DefiInteractionNote {
    pub bridge_id: u32,
    pub nonce: u64,
    pub total_input_value: u128,
    pub total_output_value_a: u128,
    pub total_output_value_b: u128,
    pub result: bool,
}

impl DefiInteractionNote {
    pub const ENCODED_LEN: usize = 4 + 8 + 16 + 16 + 16 + 1;

    #[must_use]
    pub fn is_zero(&self) -> bool {
        self.bridge_id == 0
            && self.nonce == 0
            && self.total_input_value == 0
            && self.total_output_value_a == 0
            && self.total_output_value_b == 0
            && !self.result
    }

    #[must_use]
    pub fn zero() -> Self {
        Self {
            bridge_id: 0,
            nonce: 0,
            total_input_value: 0,
            total_output_value_a: 0,
            total_output_value_b: 0,
            result: false,
        }
    }

    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(Self::ENCODED_LEN);
        buf.extend_from_slice(&self.bridge_id.to_be_bytes());
        buf.extend_from_slice(&self.nonce.to_be_bytes());
        buf.extend_from_slice(&self.total_input_value.to_be_bytes());
        buf.extend_from_slice(&self.total_output_value_a.to_be_bytes());
        buf.extend_from_slice(&self.total_output_value_b.to_be_bytes());
        buf.push(u8::from(self.result));
        buf
    }
}

/// Decoded `rollupProofData` (spec.md §3). `bridge_ids`, `asset_ids`, and
/// `defi_interaction_notes` all have length `K` (`NUM_BRIDGE_CALLS_PER_BLOCK`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RollupProofData {
    pub rollup_id: u64,
    pub rollup_hash: Hash,
    pub data_start_index: u64,
    pub new_data_root: Hash,
    pub new_null_root: Hash,
    pub new_data_roots_root: Hash,
    pub new_defi_root: Hash,
    pub bridge_ids: Vec<u32>,
    pub asset_ids: Vec<u32>,
    pub defi_interaction_notes: Vec<DefiInteractionNote>,
    pub inner_proofs: Vec<InnerProof>,
}

impl RollupProofData {
    /// Non-padding proofs in on-chain order, the same order `offchain_tx_data` is indexed by
    /// (spec.md §4.5.6, §6 "off-chain tx data"; §8 property 8).
    pub fn non_padding_proofs(&self) -> impl Iterator<Item = (usize, &InnerProof)> {
        self.inner_proofs
            .iter()
            .enumerate()
            .filter(|(_, p)| !p.is_padding())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("buffer too short: needed at least {needed} bytes, had {had}")]
    TooShort { needed: usize, had: usize },
    #[error("bridge_ids/asset_ids/defi_interaction_notes length {actual} did not match K={k}")]
    BadBridgeCallCount { actual: usize, k: usize },
}

fn need(buf: &Bytes, n: usize) -> Result<(), DecodeError> {
    if buf.len() < n {
        Err(DecodeError::TooShort {
            needed: n,
            had: buf.len(),
        })
    } else {
        Ok(())
    }
}

fn take_hash(buf: &mut Bytes) -> Result<Hash, DecodeError> {
    need(buf, 32)?;
    let mut out = [0u8; 32];
    buf.copy_to_slice(&mut out);
    Ok(out)
}

/// Decodes a `RollupProofData` from its big-endian fixed-width wire layout (spec.md §6). `k` is
/// the configured `NUM_BRIDGE_CALLS_PER_BLOCK`.
pub fn decode_rollup_proof_data(mut buf: Bytes, k: usize) -> Result<RollupProofData, DecodeError> {
    need(&buf, 8 + 32 + 8 + 32 * 4)?;
    let rollup_id = buf.get_u64();
    let rollup_hash = take_hash(&mut buf)?;
    let data_start_index = buf.get_u64();
    let new_data_root = take_hash(&mut buf)?;
    let new_null_root = take_hash(&mut buf)?;
    let new_data_roots_root = take_hash(&mut buf)?;
    let new_defi_root = take_hash(&mut buf)?;

    need(&buf, 4 * k)?;
    let bridge_ids: Vec<u32> = (0..k).map(|_| buf.get_u32()).collect();

    need(&buf, 4 * k)?;
    let asset_ids: Vec<u32> = (0..k).map(|_| buf.get_u32()).collect();

    need(&buf, DefiInteractionNote::ENCODED_LEN * k)?;
    let mut defi_interaction_notes = Vec::with_capacity(k);
    for _ in 0..k {
        let bridge_id = buf.get_u32();
        let nonce = buf.get_u64();
        let total_input_value = buf.get_u128();
        let total_output_value_a = buf.get_u128();
        let total_output_value_b = buf.get_u128();
        let result = buf.get_u8() != 0;
        defi_interaction_notes.push(DefiInteractionNote {
            bridge_id,
            nonce,
            total_input_value,
            total_output_value_a,
            total_output_value_b,
            result,
        });
    }
    if bridge_ids.len() != k || asset_ids.len() != k || defi_interaction_notes.len() != k {
        return Err(DecodeError::BadBridgeCallCount {
            actual: bridge_ids.len(),
            k,
        });
    }

    need(&buf, 4)?;
    let num_proofs = buf.get_u32() as usize;
    let mut inner_proofs = Vec::with_capacity(num_proofs);
    for _ in 0..num_proofs {
        need(&buf, 1)?;
        let proof_id = match buf.get_u8() {
            0 => ProofId::Padding,
            1 => ProofId::Deposit,
            2 => ProofId::Withdraw,
            3 => ProofId::Send,
            4 => ProofId::Account,
            5 => ProofId::DefiDeposit,
            6 => ProofId::DefiClaim,
            _ => ProofId::Padding,
        };
        let tx_id = take_hash(&mut buf)?;
        let note_commitment_1 = take_hash(&mut buf)?;
        let note_commitment_2 = take_hash(&mut buf)?;
        let nullifier_1 = take_hash(&mut buf)?;
        let nullifier_2 = take_hash(&mut buf)?;
        inner_proofs.push(InnerProof {
            proof_id,
            tx_id,
            note_commitment_1,
            note_commitment_2,
            nullifier_1,
            nullifier_2,
        });
    }

    Ok(RollupProofData {
        rollup_id,
        rollup_hash,
        data_start_index,
        new_data_root,
        new_null_root,
        new_data_roots_root,
        new_defi_root,
        bridge_ids,
        asset_ids,
        defi_interaction_notes,
        inner_proofs,
    })
}

/// A block observed from the external chain source (spec.md §3 "Block").
#[derive(Debug, Clone)]
pub struct Block {
    pub rollup_id: u64,
    pub created: chrono::DateTime<chrono::Utc>,
    pub eth_tx_hash: Hash,
    pub rollup_size: u32,
    pub rollup_proof_data: Bytes,
    /// One blob per non-padding inner proof, indexed by `offchain_index` (spec.md §6).
    pub offchain_tx_data: Vec<Bytes>,
    pub interaction_result: Vec<DefiInteractionNote>,
    pub gas_used: u64,
    pub gas_price: u64,
}

/// Encodes a 256-bit big-endian nullifier as a NULL-tree leaf index (spec.md §4.5.5).
///
/// The NULL tree's leaf index space is only `u64`-wide (spec.md §4.1 `put(tag, index, ...)`), far
/// narrower than a 256-bit nullifier, so some derivation from the full value to a 64-bit index is
/// unavoidable. Taking the low 8 bytes directly would let two nullifiers that merely share their
/// low 64 bits collide in the same slot, defeating the double-spend check the tree exists for;
/// hashing the full nullifier first and taking 8 bytes of the digest makes a collision as hard as
/// finding a SHA-256 collision on the whole value, not just matching its tail.
#[must_use]
pub fn nullifier_to_index(nullifier: &Hash) -> u64 {
    let digest = Sha256::digest(nullifier);
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&digest[0..8]);
    u64::from_be_bytes(buf)
}

#[must_use]
pub fn is_zero_hash(h: &Hash) -> bool {
    *h == ZERO_HASH
}

/// A single canonical "spent" marker written into the NULL tree leaf (spec.md §4.5.5:
/// `encode_one(32)`).
#[must_use]
pub fn encode_one(width: usize) -> Vec<u8> {
    let mut v = vec![0u8; width];
    if width > 0 {
        v[width - 1] = 1;
    }
    v
}

#[must_use]
pub fn sha256(data: &[u8]) -> Hash {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}
