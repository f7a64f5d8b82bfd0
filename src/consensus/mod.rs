/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The PBFT-style round protocol: message payloads, the round state machine, and the single-slot
//! repository that persists the active round.
//!
//! Orchestration of these parts against the block pool and the committed ledger lives in
//! [`crate::engine`].

pub mod messages;

pub mod round;

pub mod state_repository;
