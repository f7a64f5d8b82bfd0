/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Payload shapes consumed from collaborators: the pre-prepare message that starts a round on a
//! non-leader, the phase votes that drive it forward, and the leader-change notification that
//! invalidates it.
//!
//! The wire framing, signatures, and dispatch of these messages belong to the transport layer and
//! are not defined here; this crate only parses and produces their contents.

use borsh::{BorshDeserialize, BorshSerialize};

use crate::types::{
    basic::{ConsensusId, MemberId, Seal},
    block::ProposedBlock,
    representatives::RepresentativeSet,
};

/// Broadcast by the leader of a round to every other representative. Carries everything a
/// non-leader needs to construct its copy of the round: the round id, the representative set, and
/// the proposed block.
#[derive(Clone, PartialEq, Eq, Debug, BorshSerialize, BorshDeserialize)]
pub struct PrePrepareMsg {
    pub consensus_id: ConsensusId,
    pub sender_id: MemberId,
    pub representatives: RepresentativeSet,
    pub proposed_block: ProposedBlock,
}

/// The phase a [VoteMsg] is cast in.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, BorshSerialize, BorshDeserialize)]
pub enum VotePhase {
    Prepare,
    Commit,
}

/// A phase vote from a representative. Votes whose `consensus_id` or `block_seal` do not match the
/// active round are ignored without mutating the round.
#[derive(Clone, PartialEq, Eq, Debug, BorshSerialize, BorshDeserialize)]
pub struct VoteMsg {
    pub consensus_id: ConsensusId,
    pub sender_id: MemberId,
    pub block_seal: Seal,
    pub phase: VotePhase,
}

/// Notification from the leader-election collaborator that `node_id` is the new leader. The
/// election algorithm itself is out of scope; the core only reacts by discarding any in-flight
/// round whose representative set is now stale.
#[derive(Clone, PartialEq, Eq, Debug, BorshSerialize, BorshDeserialize)]
pub struct LeaderChangeEvent {
    pub node_id: MemberId,
}
