/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Defines the [KVStore] trait, which specifies the required interface for the key-value store
//! provided by the user.
//!
//! The committed block repository treats the store as an opaque ordered byte-store: it reads single
//! keys through [KVGet] and applies atomic sets of writes through [WriteBatch]. It never depends on
//! any other capability of the underlying engine, so any store with atomic batched writes can back
//! the ledger.

pub trait KVStore: KVGet + Clone + Send + 'static {
    type WriteBatch: WriteBatch;

    /// Atomically applies `wb` to the store. A batch must be applied in full or not at all;
    /// the ledger's crash consistency depends on it.
    fn write(&mut self, wb: Self::WriteBatch);
}

pub trait KVGet {
    fn get(&self, key: &[u8]) -> Option<Vec<u8>>;
}

/// An ordered set of insertions to be applied atomically by [KVStore::write].
pub trait WriteBatch {
    fn new() -> Self;
    fn set(&mut self, key: &[u8], value: &[u8]);
    fn delete(&mut self, key: &[u8]);
}
