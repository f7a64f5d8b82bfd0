/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The round state machine: a [Consensus] value drives one proposed block through the
//! pre-prepare, prepare, and commit phases under a fixed representative set.
//!
//! ## Phases
//!
//! [Phase] only ever moves forward along `Idle → PrePrepare → Prepare → Commit → Finalized`, or to
//! `Failed` from any non-terminal phase. There are no backward transitions. `Finalized` and
//! `Failed` are terminal.
//!
//! ## Vote folding
//!
//! Prepare and commit votes are folded into per-phase [VoteSet]s. A phase is satisfied once votes
//! from a strict majority of representatives (⌊n/2⌋ + 1 distinct members) have been folded. The
//! leader's vote is implicit: it is pre-counted at construction, so a round over n representatives
//! needs `quorum - 1` explicit votes from other members. Duplicate votes are idempotent, and votes
//! that do not match the round's id, block seal, current phase, or representative set are ignored
//! without mutating the round.

use borsh::{BorshDeserialize, BorshSerialize};
use std::fmt::{self, Display, Formatter};

use crate::types::{
    basic::{ConsensusId, MemberId, Seal},
    block::ProposedBlock,
    representatives::RepresentativeSet,
};

use super::messages::{PrePrepareMsg, VoteMsg, VotePhase};

/// The phase a [Consensus] round is currently in.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, BorshSerialize, BorshDeserialize)]
pub enum Phase {
    Idle,
    PrePrepare,
    Prepare,
    Commit,
    Finalized,
    Failed,
}

impl Phase {
    pub fn is_terminal(self) -> bool {
        matches!(self, Phase::Finalized | Phase::Failed)
    }
}

impl Display for Phase {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Idle => "Idle",
            Phase::PrePrepare => "PrePrepare",
            Phase::Prepare => "Prepare",
            Phase::Commit => "Commit",
            Phase::Finalized => "Finalized",
            Phase::Failed => "Failed",
        };
        write!(f, "{}", name)
    }
}

/// The distinct members that have voted in one phase. Insertion is idempotent, so a member can
/// never be double-counted towards a quorum.
#[derive(Clone, PartialEq, Eq, Debug, Default, BorshSerialize, BorshDeserialize)]
pub struct VoteSet(Vec<MemberId>);

impl VoteSet {
    pub fn new() -> VoteSet {
        VoteSet(Vec::new())
    }

    pub fn contains(&self, member: &MemberId) -> bool {
        self.0.contains(member)
    }

    /// Records a vote from `member`. Returns false if the member had already voted.
    pub(crate) fn insert(&mut self, member: MemberId) -> bool {
        if self.contains(&member) {
            false
        } else {
            self.0.push(member);
            true
        }
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// What folding a vote into a round did.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum VoteOutcome {
    /// The vote did not belong to this round or phase, or the sender is not a representative, or
    /// the sender had already voted. The round was not mutated.
    Ignored,
    /// The vote was counted, but the phase's quorum is not yet satisfied.
    Counted,
    /// The vote was counted and completed the phase's quorum; the round advanced a phase.
    QuorumReached,
}

/// One consensus round over one proposed block. See the [module docs](self) for the lifecycle.
#[derive(Clone, PartialEq, Eq, Debug, BorshSerialize, BorshDeserialize)]
pub struct Consensus {
    consensus_id: ConsensusId,
    representatives: RepresentativeSet,
    block: ProposedBlock,
    phase: Phase,
    prepare_votes: VoteSet,
    commit_votes: VoteSet,
}

impl Consensus {
    /// Create a round as the leader, minting a fresh [ConsensusId]. Fails if fewer than 2
    /// representatives are supplied.
    pub fn new(
        representatives: RepresentativeSet,
        block: ProposedBlock,
    ) -> Result<Consensus, ConsensusError> {
        Consensus::with_id(ConsensusId::random(), representatives, block)
    }

    /// Create a round as a non-leader from an inbound pre-prepare message, binding the message's
    /// round id verbatim so that all participants agree on the round's identity.
    pub fn from_pre_prepare(msg: PrePrepareMsg) -> Result<Consensus, ConsensusError> {
        Consensus::with_id(msg.consensus_id, msg.representatives, msg.proposed_block)
    }

    fn with_id(
        consensus_id: ConsensusId,
        representatives: RepresentativeSet,
        block: ProposedBlock,
    ) -> Result<Consensus, ConsensusError> {
        if representatives.len() < 2 {
            return Err(ConsensusError::EmptyRepresentativeSet {
                supplied: representatives.len(),
            });
        }

        // The leader's vote is implicit in both phases.
        let mut prepare_votes = VoteSet::new();
        let mut commit_votes = VoteSet::new();
        prepare_votes.insert(representatives.leader().id().clone());
        commit_votes.insert(representatives.leader().id().clone());

        Ok(Consensus {
            consensus_id,
            representatives,
            block,
            phase: Phase::Idle,
            prepare_votes,
            commit_votes,
        })
    }

    pub fn consensus_id(&self) -> &ConsensusId {
        &self.consensus_id
    }

    pub fn representatives(&self) -> &RepresentativeSet {
        &self.representatives
    }

    pub fn block(&self) -> &ProposedBlock {
        &self.block
    }

    pub fn block_seal(&self) -> &Seal {
        &self.block.seal
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn prepare_votes(&self) -> &VoteSet {
        &self.prepare_votes
    }

    pub fn commit_votes(&self) -> &VoteSet {
        &self.commit_votes
    }

    /// `Idle → PrePrepare`: the round has been announced (the leader broadcast, or the non-leader
    /// accepted, a pre-prepare message).
    pub fn start(&mut self) -> Result<(), ConsensusError> {
        match self.phase {
            Phase::Idle => {
                self.phase = Phase::PrePrepare;
                Ok(())
            }
            current => Err(ConsensusError::WrongPhase { current }),
        }
    }

    /// `PrePrepare → Prepare`: the local node accepted the proposed block. Structural validity and
    /// the expected-height check are the caller's responsibility; see
    /// [`ConsensusEngine`](crate::engine::ConsensusEngine).
    pub fn accept_proposal(&mut self) -> Result<(), ConsensusError> {
        match self.phase {
            Phase::PrePrepare => {
                self.phase = Phase::Prepare;
                Ok(())
            }
            current => Err(ConsensusError::WrongPhase { current }),
        }
    }

    /// Folds a phase vote into the round, advancing the phase if the vote completes a quorum.
    ///
    /// Folding and the threshold check happen in one call on `&mut self`; the caller serializes
    /// concurrent intake by holding the lock that guards the round's persisted state for the
    /// duration of the call.
    pub fn fold_vote(&mut self, vote: &VoteMsg) -> VoteOutcome {
        if vote.consensus_id != self.consensus_id || vote.block_seal != self.block.seal {
            return VoteOutcome::Ignored;
        }
        if !self.representatives.contains(&vote.sender_id) {
            return VoteOutcome::Ignored;
        }

        let quorum = self.representatives.quorum();
        let (votes, next_phase) = match (self.phase, vote.phase) {
            (Phase::Prepare, VotePhase::Prepare) => (&mut self.prepare_votes, Phase::Commit),
            (Phase::Commit, VotePhase::Commit) => (&mut self.commit_votes, Phase::Finalized),
            _ => return VoteOutcome::Ignored,
        };

        if !votes.insert(vote.sender_id.clone()) {
            return VoteOutcome::Ignored;
        }

        if votes.len() >= quorum {
            self.phase = next_phase;
            VoteOutcome::QuorumReached
        } else {
            VoteOutcome::Counted
        }
    }

    /// Drives the round to `Failed` from any non-terminal phase. Used on quorum timeout, validator
    /// rejection, and leader change.
    pub fn fail(&mut self) -> Result<(), ConsensusError> {
        if self.phase.is_terminal() {
            return Err(ConsensusError::WrongPhase {
                current: self.phase,
            });
        }
        self.phase = Phase::Failed;
        Ok(())
    }
}

/// Error constructing or driving a [Consensus] round.
#[derive(Debug, PartialEq, Eq)]
pub enum ConsensusError {
    /// Fewer than 2 representatives were supplied at construction.
    EmptyRepresentativeSet { supplied: usize },
    /// The requested transition is not allowed from the round's current phase.
    WrongPhase { current: Phase },
}

impl Display for ConsensusError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            ConsensusError::EmptyRepresentativeSet { supplied } => write!(
                f,
                "a consensus round needs at least 2 representatives, got {}",
                supplied
            ),
            ConsensusError::WrongPhase { current } => {
                write!(f, "transition not allowed from phase {}", current)
            }
        }
    }
}
