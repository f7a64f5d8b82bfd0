/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The durable, append-only ledger of finalized blocks.
//!
//! The repository owns a handle to a user-provided [KVStore] and exposes only the narrow
//! commit/query contract; it does not re-export the engine's interface. Every operation, reads
//! included, takes the repository's one exclusive lock, so no reader can ever observe a
//! partially-applied commit.
//!
//! ## Append policy
//!
//! A block is only accepted if its height is exactly one above the current last height (or 0 for an
//! empty ledger) and its seal has not been committed before. Re-issuing a commit for an
//! already-committed seal is rejected with [LedgerError::DuplicateBlock], which keeps the height
//! sequence free of duplicates. A failed append is surfaced to the caller, not retried here;
//! whether to halt the node or retry with backoff is an operational decision above this crate.

use borsh::{BorshDeserialize, BorshSerialize};
use std::fmt::{self, Display, Formatter};
use std::sync::Mutex;

use crate::types::{
    basic::{BlockHeight, Seal},
    block::{Block, BlockState},
};

use super::kv_store::{KVGet, KVStore, WriteBatch};
use super::paths;

/// Append-only repository of committed blocks, keyed by height with secondary lookup by seal.
pub struct CommittedBlockRepository<S: KVStore> {
    store: Mutex<S>,
}

impl<S: KVStore> CommittedBlockRepository<S> {
    pub fn new(store: S) -> CommittedBlockRepository<S> {
        CommittedBlockRepository {
            store: Mutex::new(store),
        }
    }

    /// Appends `block` to the ledger with state forced to `Committed`. The block must extend the
    /// current last height by exactly one (height 0 for an empty ledger) and carry a seal the
    /// ledger has not seen.
    pub fn save(&self, block: &Block) -> Result<(), LedgerError> {
        let mut store = self.store.lock().unwrap();

        let seal_key = paths::combine(&paths::BLOCK_BY_SEAL, block.seal.bytes());
        if store.get(&seal_key).is_some() {
            return Err(LedgerError::DuplicateBlock {
                seal: block.seal.clone(),
            });
        }

        let expected = match last_height(&*store)? {
            Some(last) => last + 1,
            None => BlockHeight::new(0),
        };
        if block.height != expected {
            return Err(LedgerError::NonSequentialHeight {
                expected,
                got: block.height,
            });
        }

        let mut committed = block.clone();
        committed.state = BlockState::Committed;
        let block_bytes = committed
            .try_to_vec()
            .map_err(|source| LedgerError::AddCommittedBlock { source })?;
        let height_bytes = committed
            .height
            .try_to_vec()
            .map_err(|source| LedgerError::AddCommittedBlock { source })?;

        let mut wb = S::WriteBatch::new();
        wb.set(
            &paths::combine(&paths::BLOCK_AT_HEIGHT, &committed.height.to_le_bytes()),
            &block_bytes,
        );
        wb.set(&seal_key, &height_bytes);
        wb.set(&paths::LAST_HEIGHT, &height_bytes);
        store.write(wb);

        Ok(())
    }

    /// Returns the highest-height committed block. Fails if the ledger is empty.
    pub fn get_last_block(&self) -> Result<Block, LedgerError> {
        let store = self.store.lock().unwrap();
        match last_height(&*store)? {
            Some(height) => block_at_height(&*store, height),
            None => Err(LedgerError::GetCommittedBlock {
                key: Key::LastHeight,
            }),
        }
    }

    pub fn get_block_by_height(&self, height: BlockHeight) -> Result<Block, LedgerError> {
        let store = self.store.lock().unwrap();
        block_at_height(&*store, height)
    }

    pub fn get_block_by_seal(&self, seal: &Seal) -> Result<Block, LedgerError> {
        let store = self.store.lock().unwrap();
        let seal_key = paths::combine(&paths::BLOCK_BY_SEAL, seal.bytes());
        let height_bytes = store.get(&seal_key).ok_or(LedgerError::GetCommittedBlock {
            key: Key::BlockBySeal { seal: seal.clone() },
        })?;
        let height = BlockHeight::deserialize(&mut &*height_bytes).map_err(|source| {
            LedgerError::DeserializeValue {
                key: Key::BlockBySeal { seal: seal.clone() },
                source,
            }
        })?;
        block_at_height(&*store, height)
    }

    /// The height of the highest committed block, if any. Exposed for callers computing the
    /// expected height of the next proposal.
    pub fn last_height(&self) -> Result<Option<BlockHeight>, LedgerError> {
        let store = self.store.lock().unwrap();
        last_height(&*store)
    }
}

fn last_height<G: KVGet>(store: &G) -> Result<Option<BlockHeight>, LedgerError> {
    if let Some(bytes) = store.get(&paths::LAST_HEIGHT) {
        let height = BlockHeight::deserialize(&mut &*bytes).map_err(|source| {
            LedgerError::DeserializeValue {
                key: Key::LastHeight,
                source,
            }
        })?;
        Ok(Some(height))
    } else {
        Ok(None)
    }
}

fn block_at_height<G: KVGet>(store: &G, height: BlockHeight) -> Result<Block, LedgerError> {
    let key = paths::combine(&paths::BLOCK_AT_HEIGHT, &height.to_le_bytes());
    let bytes = store.get(&key).ok_or(LedgerError::GetCommittedBlock {
        key: Key::BlockAtHeight { height },
    })?;
    Block::deserialize(&mut &*bytes).map_err(|source| LedgerError::DeserializeValue {
        key: Key::BlockAtHeight { height },
        source,
    })
}

/// Error when reading from or appending to the committed ledger. The error may arise in the
/// following circumstances:
/// 1. A block with an already-committed seal, or a height that does not extend the ledger, was
///    offered for commitment,
/// 2. A block could not be encoded for storage,
/// 3. The value corresponding to a given key cannot be found or cannot be deserialized into its
///    expected type.
#[derive(Debug)]
pub enum LedgerError {
    DuplicateBlock { seal: Seal },
    NonSequentialHeight { expected: BlockHeight, got: BlockHeight },
    AddCommittedBlock { source: std::io::Error },
    GetCommittedBlock { key: Key },
    DeserializeValue { key: Key, source: std::io::Error },
}

impl Display for LedgerError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            LedgerError::DuplicateBlock { seal } => {
                write!(f, "block with seal {} is already committed", seal)
            }
            LedgerError::NonSequentialHeight { expected, got } => {
                write!(f, "expected block at height {}, got {}", expected, got)
            }
            LedgerError::AddCommittedBlock { source } => {
                write!(f, "failed to encode block for commitment: {}", source)
            }
            LedgerError::GetCommittedBlock { key } => write!(f, "value not found for {}", key),
            LedgerError::DeserializeValue { key, source } => {
                write!(f, "failed to deserialize value for {}: {}", key, source)
            }
        }
    }
}

#[derive(Debug)]
pub enum Key {
    LastHeight,
    BlockAtHeight { height: BlockHeight },
    BlockBySeal { seal: Seal },
}

impl Display for Key {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Key::LastHeight => write!(f, "Last Height"),
            Key::BlockAtHeight { height } => write!(f, "Block at height {}", height),
            Key::BlockBySeal { seal } => write!(f, "Block with seal {}", seal),
        }
    }
}
