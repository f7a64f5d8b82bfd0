/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The consensus and block-commitment core of a permissioned blockchain engine.
//!
//! A cluster of representatives agrees, in rounds, on the next block to append to a shared ledger.
//! One round drives one proposed block through PBFT-style pre-prepare, prepare, and commit phases,
//! tolerating non-responding members up to a strict-majority quorum. This crate implements the
//! round state machine ([consensus]), the single-slot persistence of the active round
//! ([consensus::state_repository]), and the block lifecycle stores that take a block from creation
//! ([pool]) to durable commitment ([state::committed_blocks]). The [engine] ties them together and
//! is the intended entry point.
//!
//! Transport, leader election, and cryptographic signatures are collaborators, not part of this
//! crate: the engine consumes their message payloads ([consensus::messages]) and produces messages
//! for them to broadcast.

pub mod consensus;

pub mod engine;

pub mod events;

pub(crate) mod event_bus;

pub mod logging;

pub mod pool;

pub mod state;

pub mod types;
