/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Definitions for the 'block' type and its associated methods.

use borsh::{BorshDeserialize, BorshSerialize};
use sha2::Digest;
pub use sha2::Sha256 as CryptoHasher;

use crate::types::basic::{BlockHeight, Body, Seal};

/// Lifecycle state of a [Block].
///
/// A block is `Created` by a proposer, becomes `Staged` while it is the subject of an active
/// consensus round, and becomes `Committed` once the round finalizes and the block is durably
/// persisted. There are no other states: the block type is a closed struct, so every entry in the
/// block pool and the committed ledger is known to be this concrete variant by construction.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, BorshSerialize, BorshDeserialize)]
pub enum BlockState {
    Created,
    Staged,
    Committed,
}

/// A block of the ledger. Identity is the seal; total order among committed blocks is the height.
#[derive(Clone, PartialEq, Eq, Debug, BorshSerialize, BorshDeserialize)]
pub struct Block {
    pub height: BlockHeight,
    pub seal: Seal,
    pub prev_seal: Seal,
    pub body: Body,
    pub state: BlockState,
}

impl Block {
    /// Create a block in the `Created` state, sealing it over its height, parent seal, and body.
    pub fn new(height: BlockHeight, prev_seal: Seal, body: Body) -> Block {
        let seal = Block::compute_seal(height, &prev_seal, &body);
        Block {
            height,
            seal,
            prev_seal,
            body,
            state: BlockState::Created,
        }
    }

    /// The genesis block: height 0, empty parent seal.
    pub fn genesis(body: Body) -> Block {
        Block::new(BlockHeight::new(0), Seal::new(Vec::new()), body)
    }

    /// Create the direct successor of `parent`, carrying `body`.
    pub fn child_of(parent: &Block, body: Body) -> Block {
        Block::new(parent.height + 1, parent.seal.clone(), body)
    }

    pub fn compute_seal(height: BlockHeight, prev_seal: &Seal, body: &Body) -> Seal {
        let mut hasher = CryptoHasher::new();
        hasher.update(height.to_le_bytes());
        hasher.update(prev_seal.bytes());
        hasher.update(body.bytes());
        Seal::new(hasher.finalize().to_vec())
    }

    /// Checks if the stored seal is consistent with the block's contents.
    pub fn is_structurally_valid(&self) -> bool {
        self.seal == Block::compute_seal(self.height, &self.prev_seal, &self.body)
    }

    /// Checks if this block chains directly onto `parent`.
    pub fn extends(&self, parent: &Block) -> bool {
        self.prev_seal == parent.seal && self.height == parent.height + 1
    }

    /// The thin projection of this block that a consensus round operates on.
    pub fn proposed(&self) -> ProposedBlock {
        ProposedBlock {
            seal: self.seal.clone(),
            body: self.body.clone(),
        }
    }
}

/// The subject of a consensus round: a block's seal and its opaque payload. Immutable once
/// constructed. Carried inside pre-prepare messages; the full [Block] entity with the same seal and
/// body lives in the block pool until the round finalizes.
#[derive(Clone, PartialEq, Eq, Debug, BorshSerialize, BorshDeserialize)]
pub struct ProposedBlock {
    pub seal: Seal,
    pub body: Body,
}

impl ProposedBlock {
    pub fn new(seal: Seal, body: Body) -> ProposedBlock {
        ProposedBlock { seal, body }
    }
}
