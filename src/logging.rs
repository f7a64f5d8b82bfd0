/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Functions that log out events.
//!
//! pbft-rs logs using the [log](https://docs.rs/log/latest/log/) crate. To get these messages
//! printed onto a terminal or to a file, set up a
//! [logging implementation](https://docs.rs/log/latest/log/#available-logging-implementations).
//!
//! ## Log message format
//!
//! Log messages are CSVs (Comma Separated Values) with at least two values. The first two values
//! are always:
//! 1. The name of the [event](crate::events) in PascalCase (defined in this module as constants).
//! 2. The time the event was emitted (as number of seconds since the Unix Epoch).
//!
//! The rest of the values differ depending on the kind of event. Seals are rendered as the first
//! seven characters of their Base64 encoding.

use crate::events::*;
use std::time::SystemTime;

// Names of each event in PascalCase for printing:
pub const START_ROUND: &str = "StartRound";
pub const RECEIVE_PRE_PREPARE: &str = "ReceivePrePrepare";
pub const RECEIVE_VOTE: &str = "ReceiveVote";
pub const ADVANCE_PHASE: &str = "AdvancePhase";

pub const STAGE_BLOCK: &str = "StageBlock";
pub const COMMIT_BLOCK: &str = "CommitBlock";

pub const FINALIZE_ROUND: &str = "FinalizeRound";
pub const FAIL_ROUND: &str = "FailRound";

pub const LEADER_CHANGE: &str = "LeaderChange";

/// Implemented by event types. Used to get a closure that logs the event.
pub(crate) trait Logger {
    /// Returns a pointer to the default logging handler for a given event type.
    fn get_logger() -> Box<dyn Fn(&Self) + Send>;
}

impl Logger for StartRoundEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |start_round_event: &StartRoundEvent| {
            log::info!(
                "{}, {}, {}, {}",
                START_ROUND,
                secs_since_unix_epoch(start_round_event.timestamp),
                start_round_event.consensus_id,
                start_round_event.block_seal
            )
        };
        Box::new(logger)
    }
}

impl Logger for ReceivePrePrepareEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |receive_pre_prepare_event: &ReceivePrePrepareEvent| {
            log::info!(
                "{}, {}, {}, {}, {}",
                RECEIVE_PRE_PREPARE,
                secs_since_unix_epoch(receive_pre_prepare_event.timestamp),
                receive_pre_prepare_event.origin,
                receive_pre_prepare_event.pre_prepare.consensus_id,
                receive_pre_prepare_event.pre_prepare.proposed_block.seal
            )
        };
        Box::new(logger)
    }
}

impl Logger for ReceiveVoteEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |receive_vote_event: &ReceiveVoteEvent| {
            log::info!(
                "{}, {}, {}, {}, {:?}, {:?}",
                RECEIVE_VOTE,
                secs_since_unix_epoch(receive_vote_event.timestamp),
                receive_vote_event.origin,
                receive_vote_event.vote.consensus_id,
                receive_vote_event.vote.phase,
                receive_vote_event.outcome
            )
        };
        Box::new(logger)
    }
}

impl Logger for AdvancePhaseEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |advance_phase_event: &AdvancePhaseEvent| {
            log::info!(
                "{}, {}, {}, {}",
                ADVANCE_PHASE,
                secs_since_unix_epoch(advance_phase_event.timestamp),
                advance_phase_event.consensus_id,
                advance_phase_event.phase
            )
        };
        Box::new(logger)
    }
}

impl Logger for StageBlockEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |stage_block_event: &StageBlockEvent| {
            log::info!(
                "{}, {}, {}, {}",
                STAGE_BLOCK,
                secs_since_unix_epoch(stage_block_event.timestamp),
                stage_block_event.block_seal,
                stage_block_event.height
            )
        };
        Box::new(logger)
    }
}

impl Logger for CommitBlockEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |commit_block_event: &CommitBlockEvent| {
            log::info!(
                "{}, {}, {}, {}",
                COMMIT_BLOCK,
                secs_since_unix_epoch(commit_block_event.timestamp),
                commit_block_event.block_seal,
                commit_block_event.height
            )
        };
        Box::new(logger)
    }
}

impl Logger for FinalizeRoundEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |finalize_round_event: &FinalizeRoundEvent| {
            log::info!(
                "{}, {}, {}, {}",
                FINALIZE_ROUND,
                secs_since_unix_epoch(finalize_round_event.timestamp),
                finalize_round_event.consensus_id,
                finalize_round_event.block_seal
            )
        };
        Box::new(logger)
    }
}

impl Logger for FailRoundEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |fail_round_event: &FailRoundEvent| {
            log::info!(
                "{}, {}, {}",
                FAIL_ROUND,
                secs_since_unix_epoch(fail_round_event.timestamp),
                fail_round_event.consensus_id
            )
        };
        Box::new(logger)
    }
}

impl Logger for LeaderChangeNoticeEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |leader_change_event: &LeaderChangeNoticeEvent| {
            log::info!(
                "{}, {}, {}",
                LEADER_CHANGE,
                secs_since_unix_epoch(leader_change_event.timestamp),
                leader_change_event.new_leader
            )
        };
        Box::new(logger)
    }
}

pub(crate) fn secs_since_unix_epoch(timestamp: SystemTime) -> u64 {
    timestamp
        .duration_since(SystemTime::UNIX_EPOCH)
        .expect("Event occured before the Unix Epoch.")
        .as_secs()
}
