/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The in-memory staging area for blocks that are not yet durably committed.
//!
//! The pool holds blocks in the `Created` and `Staged` states. It is not durable: on process
//! restart it is rebuilt from in-flight round state, not from disk. Mutations take the pool's
//! exclusive lock, but no read-then-write atomicity is guaranteed *across* calls; a caller that
//! reads a block and then removes it must re-check state in between.

use std::fmt::{self, Display, Formatter};
use std::sync::Mutex;

use crate::types::{
    basic::{BlockHeight, Seal},
    block::{Block, BlockState},
};

/// Error from the [BlockPool].
#[derive(Debug, PartialEq, Eq)]
pub enum PoolError {
    /// The block's state is neither `Created` nor `Staged`.
    InvalidStateBlock { state: BlockState },
    /// No pooled block matches the queried height or seal.
    NoStagedBlock,
    /// No pooled block carries the seal given for removal.
    FailRemoveBlock,
}

impl Display for PoolError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            PoolError::InvalidStateBlock { state } => {
                write!(f, "block in state {:?} cannot enter the pool", state)
            }
            PoolError::NoStagedBlock => write!(f, "no matching block in the pool"),
            PoolError::FailRemoveBlock => write!(f, "no block with the given seal to remove"),
        }
    }
}

/// In-memory staging list of `Created` and `Staged` blocks, safe for access from concurrent
/// message handlers.
pub struct BlockPool {
    blocks: Mutex<Vec<Block>>,
}

impl BlockPool {
    pub fn new() -> BlockPool {
        BlockPool {
            blocks: Mutex::new(Vec::new()),
        }
    }

    /// Adds `block` to the pool. Only `Created` and `Staged` blocks are accepted; a `Committed`
    /// block belongs to the ledger, not the pool.
    pub fn add_created_block(&self, block: Block) -> Result<(), PoolError> {
        match block.state {
            BlockState::Created | BlockState::Staged => {
                self.blocks.lock().unwrap().push(block);
                Ok(())
            }
            state => Err(PoolError::InvalidStateBlock { state }),
        }
    }

    pub fn get_staged_block_by_height(&self, height: BlockHeight) -> Result<Block, PoolError> {
        self.blocks
            .lock()
            .unwrap()
            .iter()
            .find(|block| block.state == BlockState::Staged && block.height == height)
            .cloned()
            .ok_or(PoolError::NoStagedBlock)
    }

    pub fn get_staged_block_by_seal(&self, seal: &Seal) -> Result<Block, PoolError> {
        self.blocks
            .lock()
            .unwrap()
            .iter()
            .find(|block| block.state == BlockState::Staged && &block.seal == seal)
            .cloned()
            .ok_or(PoolError::NoStagedBlock)
    }

    /// Returns the pooled block in any state carrying `seal`. Used when deciding whether an
    /// inbound proposal refers to a block this node already holds.
    pub fn get_block_by_seal(&self, seal: &Seal) -> Result<Block, PoolError> {
        self.blocks
            .lock()
            .unwrap()
            .iter()
            .find(|block| &block.seal == seal)
            .cloned()
            .ok_or(PoolError::NoStagedBlock)
    }

    /// Returns the `Staged` block with the smallest height currently pooled. Equal heights should
    /// not occur under correct height assignment; if they do, the lexicographically smallest seal
    /// wins, so the choice is deterministic rather than an artifact of insertion order.
    pub fn get_first_staged_block(&self) -> Result<Block, PoolError> {
        self.blocks
            .lock()
            .unwrap()
            .iter()
            .filter(|block| block.state == BlockState::Staged)
            .min_by(|a, b| {
                a.height
                    .cmp(&b.height)
                    .then_with(|| a.seal.cmp(&b.seal))
            })
            .cloned()
            .ok_or(PoolError::NoStagedBlock)
    }

    /// Removes the pooled block carrying `seal`. Exactly one entry is removed; seals are unique in
    /// a correctly operated pool.
    pub fn remove_by_seal(&self, seal: &Seal) -> Result<(), PoolError> {
        let mut blocks = self.blocks.lock().unwrap();
        match blocks.iter().position(|block| &block.seal == seal) {
            Some(pos) => {
                blocks.remove(pos);
                Ok(())
            }
            None => Err(PoolError::FailRemoveBlock),
        }
    }

    /// Flips the pooled block carrying `seal` to `Staged`, binding it to an active round.
    pub fn mark_staged(&self, seal: &Seal) -> Result<(), PoolError> {
        self.set_state(seal, BlockState::Staged)
    }

    /// Flips the pooled block carrying `seal` back to `Created`. Used when the round that staged
    /// it is invalidated, e.g. by a leader change.
    pub fn revert_to_created(&self, seal: &Seal) -> Result<(), PoolError> {
        self.set_state(seal, BlockState::Created)
    }

    fn set_state(&self, seal: &Seal, state: BlockState) -> Result<(), PoolError> {
        let mut blocks = self.blocks.lock().unwrap();
        match blocks.iter_mut().find(|block| &block.seal == seal) {
            Some(block) => {
                block.state = state;
                Ok(())
            }
            None => Err(PoolError::NoStagedBlock),
        }
    }
}

impl Default for BlockPool {
    fn default() -> Self {
        BlockPool::new()
    }
}
