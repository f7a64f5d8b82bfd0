/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Durable storage for committed blocks: the pluggable [KVStore][kv_store::KVStore] traits and the
//! [CommittedBlockRepository][committed_blocks::CommittedBlockRepository] built on top of them.

pub mod committed_blocks;

pub mod kv_store;

pub(crate) mod paths;
