/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Key-space prefixes used by the [committed block repository][super::committed_blocks] inside the
//! user-provided [KVStore][super::kv_store::KVStore].
//!
//! Height is the primary ordering key (`BLOCK_AT_HEIGHT ++ height_le` maps to the borsh-encoded
//! block); the seal is a secondary lookup key (`BLOCK_BY_SEAL ++ seal` maps to the little-endian
//! height); `LAST_HEIGHT` holds the height of the highest committed block.

pub(crate) const BLOCK_AT_HEIGHT: [u8; 1] = [0];
pub(crate) const BLOCK_BY_SEAL: [u8; 1] = [1];
pub(crate) const LAST_HEIGHT: [u8; 1] = [2];

/// Takes references to two byteslices and returns a vector containing the bytes of the first
/// byteslice, and then the bytes of the second byteslice.
pub(crate) fn combine(a: &[u8], b: &[u8]) -> Vec<u8> {
    let mut combination = Vec::with_capacity(a.len() + b.len());
    combination.extend_from_slice(a);
    combination.extend_from_slice(b);
    combination
}
