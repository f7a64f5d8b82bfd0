//! Definitions of pbft-rs events for event handling and logging.
//! Note: an event for a given action indicates that the action has been completed.
//!
//! Events are published in the order the engine performed the actions, so the subscriber's channel
//! doubles as an append-only log of what happened to the active round. Leader changes are handled
//! this way: the engine appends a [LeaderChangeEvent](crate::consensus::messages::LeaderChangeEvent)
//! to the log and then synchronously projects its effect (invalidating the in-flight round).

use crate::consensus::messages::{PrePrepareMsg, VoteMsg};
use crate::consensus::round::{Phase, VoteOutcome};
use crate::types::basic::{BlockHeight, ConsensusId, MemberId, Seal};
use std::sync::mpsc::Sender;
use std::time::SystemTime;

pub enum Event {
    // Events that drive a round forward.
    StartRound(StartRoundEvent),
    ReceivePrePrepare(ReceivePrePrepareEvent),
    ReceiveVote(ReceiveVoteEvent),
    AdvancePhase(AdvancePhaseEvent),
    // Events that change block lifecycle state.
    StageBlock(StageBlockEvent),
    CommitBlock(CommitBlockEvent),
    // Events that resolve a round.
    FinalizeRound(FinalizeRoundEvent),
    FailRound(FailRoundEvent),
    // Leader coordination events.
    LeaderChange(LeaderChangeNoticeEvent),
}

impl Event {
    pub(crate) fn publish(event_publisher: &Option<Sender<Event>>, event: Event) {
        if let Some(event_publisher) = event_publisher {
            event_publisher.send(event).unwrap()
        }
    }
}

pub struct StartRoundEvent {
    pub timestamp: SystemTime,
    pub consensus_id: ConsensusId,
    pub block_seal: Seal,
}

pub struct ReceivePrePrepareEvent {
    pub timestamp: SystemTime,
    pub origin: MemberId,
    pub pre_prepare: PrePrepareMsg,
}

pub struct ReceiveVoteEvent {
    pub timestamp: SystemTime,
    pub origin: MemberId,
    pub vote: VoteMsg,
    pub outcome: VoteOutcome,
}

pub struct AdvancePhaseEvent {
    pub timestamp: SystemTime,
    pub consensus_id: ConsensusId,
    pub phase: Phase,
}

pub struct StageBlockEvent {
    pub timestamp: SystemTime,
    pub block_seal: Seal,
    pub height: BlockHeight,
}

pub struct CommitBlockEvent {
    pub timestamp: SystemTime,
    pub block_seal: Seal,
    pub height: BlockHeight,
}

pub struct FinalizeRoundEvent {
    pub timestamp: SystemTime,
    pub consensus_id: ConsensusId,
    pub block_seal: Seal,
}

pub struct FailRoundEvent {
    pub timestamp: SystemTime,
    pub consensus_id: ConsensusId,
}

pub struct LeaderChangeNoticeEvent {
    pub timestamp: SystemTime,
    pub new_leader: MemberId,
}
