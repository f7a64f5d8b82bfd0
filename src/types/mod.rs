/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Types common across the crate: newtypes for heights, seals, and identifiers, the block entity,
//! and the representative set.
//!
//! Types specific to the consensus round state machine live in [`crate::consensus`].

pub mod basic;

pub mod block;

pub mod representatives;
