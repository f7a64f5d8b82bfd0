//! Tests for the round state machine: construction, quorum arithmetic, round isolation, and the
//! full two-node lifecycle from proposal to durable commitment.

use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use log::LevelFilter;

use pbft_rs::consensus::messages::{LeaderChangeEvent, PrePrepareMsg, VoteMsg, VotePhase};
use pbft_rs::consensus::round::{Consensus, ConsensusError, Phase, VoteOutcome};
use pbft_rs::engine::{ConsensusEngine, EngineError, EngineSpec};
use pbft_rs::events::CommitBlockEvent;
use pbft_rs::state::committed_blocks::{CommittedBlockRepository, LedgerError};
use pbft_rs::types::basic::{BlockHeight, Body, ConsensusId, MemberId, Seal};
use pbft_rs::types::block::{Block, BlockState, ProposedBlock};
use pbft_rs::types::representatives::{Representative, RepresentativeSet};

mod common;

use crate::common::{logging::setup_logger, mem_db::MemDB};

fn representatives(ids: &[&str]) -> RepresentativeSet {
    RepresentativeSet::new(ids.iter().map(|id| Representative::new(*id)).collect())
}

fn proposed_block() -> ProposedBlock {
    Block::genesis(Body::new(b"payload".to_vec())).proposed()
}

fn vote(consensus: &Consensus, sender: &str, phase: VotePhase) -> VoteMsg {
    VoteMsg {
        consensus_id: consensus.consensus_id().clone(),
        sender_id: MemberId::new(sender),
        block_seal: consensus.block_seal().clone(),
        phase,
    }
}

fn vote_for(pre_prepare: &PrePrepareMsg, sender: &str, phase: VotePhase) -> VoteMsg {
    VoteMsg {
        consensus_id: pre_prepare.consensus_id.clone(),
        sender_id: MemberId::new(sender),
        block_seal: pre_prepare.proposed_block.seal.clone(),
        phase,
    }
}

#[test]
fn construct_rejects_small_representative_sets() {
    let err = Consensus::new(representatives(&[]), proposed_block()).unwrap_err();
    assert_eq!(err, ConsensusError::EmptyRepresentativeSet { supplied: 0 });

    let err = Consensus::new(representatives(&["leader"]), proposed_block()).unwrap_err();
    assert_eq!(err, ConsensusError::EmptyRepresentativeSet { supplied: 1 });

    let consensus = Consensus::new(representatives(&["leader", "member"]), proposed_block()).unwrap();
    assert_eq!(consensus.representatives().len(), 2);
    assert_eq!(consensus.phase(), Phase::Idle);
}

#[test]
fn construct_from_pre_prepare_binds_the_message_round_id() {
    let msg = PrePrepareMsg {
        consensus_id: ConsensusId::new("round-1"),
        sender_id: MemberId::new("leader"),
        representatives: representatives(&["leader", "member"]),
        proposed_block: proposed_block(),
    };

    let consensus = Consensus::from_pre_prepare(msg.clone()).unwrap();
    assert_eq!(consensus.consensus_id(), &ConsensusId::new("round-1"));
    assert_eq!(consensus.representatives(), &msg.representatives);
    assert_eq!(consensus.phase(), Phase::Idle);

    let empty_msg = PrePrepareMsg {
        representatives: representatives(&[]),
        ..msg
    };
    assert!(Consensus::from_pre_prepare(empty_msg).is_err());
}

#[test]
fn phases_only_move_forward() {
    let mut consensus =
        Consensus::new(representatives(&["leader", "member"]), proposed_block()).unwrap();

    consensus.start().unwrap();
    assert_eq!(consensus.phase(), Phase::PrePrepare);
    assert_eq!(
        consensus.start().unwrap_err(),
        ConsensusError::WrongPhase {
            current: Phase::PrePrepare
        }
    );

    consensus.accept_proposal().unwrap();
    assert_eq!(consensus.phase(), Phase::Prepare);
    assert!(consensus.accept_proposal().is_err());

    consensus.fail().unwrap();
    assert_eq!(consensus.phase(), Phase::Failed);
    // Failed is terminal.
    assert!(consensus.fail().is_err());
    assert!(consensus.start().is_err());
}

#[test]
fn prepare_quorum_completes_on_the_third_distinct_member() {
    let reps = representatives(&["leader", "m1", "m2", "m3"]);
    assert_eq!(reps.quorum(), 3);

    let mut consensus = Consensus::new(reps, proposed_block()).unwrap();
    consensus.start().unwrap();
    consensus.accept_proposal().unwrap();

    // The leader's vote is implicit, so it counts as the first distinct member.
    let leader_vote = vote(&consensus, "leader", VotePhase::Prepare);
    assert_eq!(consensus.fold_vote(&leader_vote), VoteOutcome::Ignored);

    let m1_vote = vote(&consensus, "m1", VotePhase::Prepare);
    assert_eq!(consensus.fold_vote(&m1_vote), VoteOutcome::Counted);
    // A duplicate from an already-counted member changes nothing.
    assert_eq!(consensus.fold_vote(&m1_vote), VoteOutcome::Ignored);
    assert_eq!(consensus.phase(), Phase::Prepare);

    // The third distinct member (leader, m1, m2) completes the quorum.
    let m2_vote = vote(&consensus, "m2", VotePhase::Prepare);
    assert_eq!(consensus.fold_vote(&m2_vote), VoteOutcome::QuorumReached);
    assert_eq!(consensus.phase(), Phase::Commit);

    // A late prepare vote no longer matches the current phase.
    let m3_vote = vote(&consensus, "m3", VotePhase::Prepare);
    assert_eq!(consensus.fold_vote(&m3_vote), VoteOutcome::Ignored);
}

#[test]
fn votes_for_other_rounds_never_alter_the_active_round() {
    let mut consensus =
        Consensus::new(representatives(&["leader", "m1", "m2", "m3"]), proposed_block()).unwrap();
    consensus.start().unwrap();
    consensus.accept_proposal().unwrap();

    let mut stray = vote(&consensus, "m1", VotePhase::Prepare);
    stray.consensus_id = ConsensusId::new("some-other-round");
    assert_eq!(consensus.fold_vote(&stray), VoteOutcome::Ignored);
    assert_eq!(consensus.prepare_votes().len(), 1);

    let mut wrong_seal = vote(&consensus, "m1", VotePhase::Prepare);
    wrong_seal.block_seal = Block::genesis(Body::new(b"different".to_vec())).seal;
    assert_eq!(consensus.fold_vote(&wrong_seal), VoteOutcome::Ignored);

    let outsider = vote(&consensus, "not-a-representative", VotePhase::Prepare);
    assert_eq!(consensus.fold_vote(&outsider), VoteOutcome::Ignored);
    assert_eq!(consensus.prepare_votes().len(), 1);
}

fn start_engine(me: &str, kv_store: MemDB) -> ConsensusEngine<MemDB> {
    EngineSpec::builder()
        .me(MemberId::new(me))
        .kv_store(kv_store)
        .log_events(true)
        .build()
        .start()
}

#[test]
fn two_nodes_drive_a_block_to_commitment() {
    setup_logger(LevelFilter::Trace);

    let leader = start_engine("leader", MemDB::new());
    let member = start_engine("member", MemDB::new());
    let reps = representatives(&["leader", "member"]);

    let block = Block::genesis(Body::new(b"tx batch".to_vec()));

    // The leader proposes; the resulting pre-prepare message is broadcast by the transport.
    let pre_prepare = leader.start_round(reps, block.clone()).unwrap();
    assert_eq!(leader.active_round().unwrap().phase(), Phase::Prepare);
    assert_eq!(
        leader.get_staged_block_by_seal(&block.seal).unwrap().state,
        BlockState::Staged
    );

    // The member holds the block entity (delivered by block propagation) and accepts the proposal.
    member.add_created_block(block.clone()).unwrap();
    member.handle_pre_prepare(pre_prepare).unwrap();

    // The member's prepare vote completes the 2-of-2 quorum on both nodes.
    let (prepare_vote, outcome) = member.cast_vote(VotePhase::Prepare).unwrap();
    assert_eq!(outcome, VoteOutcome::QuorumReached);
    assert_eq!(
        leader.handle_vote(&prepare_vote).unwrap(),
        VoteOutcome::QuorumReached
    );
    assert_eq!(leader.active_round().unwrap().phase(), Phase::Commit);

    // The member's commit vote finalizes the round on both nodes.
    let (commit_vote, outcome) = member.cast_vote(VotePhase::Commit).unwrap();
    assert_eq!(outcome, VoteOutcome::QuorumReached);
    assert_eq!(
        leader.handle_vote(&commit_vote).unwrap(),
        VoteOutcome::QuorumReached
    );

    for engine in [&leader, &member] {
        let committed = engine.get_last_committed_block().unwrap();
        assert_eq!(committed.seal, block.seal);
        assert_eq!(committed.height, BlockHeight::new(0));
        assert_eq!(committed.state, BlockState::Committed);
        // The round is resolved and the block has left the pool.
        assert!(engine.active_round().is_err());
        assert!(engine.get_staged_block_by_seal(&block.seal).is_err());
    }
}

#[test]
fn a_second_round_cannot_start_while_one_is_active() {
    let leader = start_engine("leader", MemDB::new());
    let reps = representatives(&["leader", "member"]);

    let block = Block::genesis(Body::new(b"first".to_vec()));
    leader.start_round(reps.clone(), block).unwrap();

    let contender = Block::genesis(Body::new(b"second".to_vec()));
    let err = leader.start_round(reps, contender).unwrap_err();
    assert!(matches!(err, EngineError::RoundInProgress));
}

#[test]
fn stale_votes_are_ignored_after_a_round_is_removed() {
    let leader = start_engine("leader", MemDB::new());
    let reps = representatives(&["leader", "member"]);
    let block = Block::genesis(Body::new(b"doomed".to_vec()));

    let pre_prepare = leader.start_round(reps, block).unwrap();
    leader.fail_round().unwrap();
    assert!(leader.active_round().is_err());

    // In-flight votes for the cancelled round no longer match any active state.
    let stale_vote = VoteMsg {
        consensus_id: pre_prepare.consensus_id,
        sender_id: MemberId::new("member"),
        block_seal: pre_prepare.proposed_block.seal,
        phase: VotePhase::Prepare,
    };
    assert_eq!(
        leader.handle_vote(&stale_vote).unwrap(),
        VoteOutcome::Ignored
    );
}

#[test]
fn leader_change_discards_the_in_flight_round() {
    let leader = start_engine("leader", MemDB::new());
    let reps = representatives(&["leader", "member"]);
    let block = Block::genesis(Body::new(b"in flight".to_vec()));

    leader.start_round(reps.clone(), block.clone()).unwrap();
    leader
        .handle_leader_change(LeaderChangeEvent {
            node_id: MemberId::new("member"),
        })
        .unwrap();

    assert!(leader.active_round().is_err());
    // The block returned to Created, so a round over the new representative set can reuse it.
    let new_reps = representatives(&["member", "leader"]);
    leader.start_round(new_reps, block).unwrap();

    // A leader change with no round in flight is a no-op.
    leader.fail_round().unwrap();
    leader
        .handle_leader_change(LeaderChangeEvent {
            node_id: MemberId::new("leader"),
        })
        .unwrap();
}

#[test]
fn fail_round_without_an_active_round_is_an_error() {
    let engine = start_engine("leader", MemDB::new());
    assert!(matches!(
        engine.fail_round().unwrap_err(),
        EngineError::NoActiveRound
    ));
}

#[test]
fn proposals_that_do_not_extend_the_ledger_are_rejected() {
    let leader = start_engine("leader", MemDB::new());
    let reps = representatives(&["leader", "member"]);

    // Height 3 does not extend an empty ledger.
    let orphan = Block::new(
        BlockHeight::new(3),
        Block::genesis(Body::new(Vec::new())).seal,
        Body::new(b"orphan".to_vec()),
    );
    let err = leader.start_round(reps.clone(), orphan).unwrap_err();
    assert!(matches!(err, EngineError::InvalidProposedBlock { .. }));

    // A tampered body no longer matches the seal.
    let mut tampered = Block::genesis(Body::new(b"original".to_vec()));
    tampered.body = Body::new(b"tampered".to_vec());
    let err = leader.start_round(reps, tampered).unwrap_err();
    assert!(matches!(err, EngineError::InvalidProposedBlock { .. }));
}

#[test]
fn proposals_must_chain_onto_the_last_committed_block() {
    let leader = start_engine("leader", MemDB::new());
    let reps = representatives(&["leader", "member"]);

    let genesis = Block::genesis(Body::new(b"genesis".to_vec()));
    let pre_prepare = leader.start_round(reps.clone(), genesis.clone()).unwrap();
    for phase in [VotePhase::Prepare, VotePhase::Commit] {
        leader
            .handle_vote(&vote_for(&pre_prepare, "member", phase))
            .unwrap();
    }
    assert_eq!(leader.get_last_committed_block().unwrap().seal, genesis.seal);

    // Correct height, but a prev_seal that is not the committed parent's seal.
    let orphan = Block::new(
        BlockHeight::new(1),
        Seal::new(b"not the parent".to_vec()),
        Body::new(b"orphan".to_vec()),
    );
    let err = leader.start_round(reps.clone(), orphan).unwrap_err();
    assert!(matches!(err, EngineError::InvalidProposedBlock { .. }));
    assert!(leader.active_round().is_err());

    // The true child is accepted.
    let child = Block::child_of(&genesis, Body::new(b"child".to_vec()));
    leader.start_round(reps, child).unwrap();
}

#[test]
fn a_failed_commit_abandons_the_round_instead_of_wedging_the_engine() {
    let db = MemDB::new();
    let leader = start_engine("leader", db.clone());
    let reps = representatives(&["leader", "member"]);
    let block = Block::genesis(Body::new(b"contested".to_vec()));

    let pre_prepare = leader.start_round(reps.clone(), block.clone()).unwrap();

    // Another writer claims height 0 in the shared store while the round is in flight, so the
    // round's own append will be rejected at commit time.
    let rival_writer = CommittedBlockRepository::new(db);
    let rival = Block::genesis(Body::new(b"rival".to_vec()));
    rival_writer.save(&rival).unwrap();

    let prepare = vote_for(&pre_prepare, "member", VotePhase::Prepare);
    assert_eq!(
        leader.handle_vote(&prepare).unwrap(),
        VoteOutcome::QuorumReached
    );

    let commit = vote_for(&pre_prepare, "member", VotePhase::Commit);
    let err = leader.handle_vote(&commit).unwrap_err();
    assert!(matches!(
        err,
        EngineError::Ledger(LedgerError::NonSequentialHeight { .. })
    ));

    // The failed append must not leave a terminal round stuck in the slot: the slot is free,
    // the block is back to Created, and a round over a block extending the rival can start.
    assert!(leader.active_round().is_err());
    assert!(matches!(
        leader.fail_round().unwrap_err(),
        EngineError::NoActiveRound
    ));
    let child = Block::child_of(&rival, Body::new(b"child".to_vec()));
    leader.start_round(reps, child).unwrap();
}

#[test]
fn registered_handlers_observe_committed_blocks() {
    let committed: Arc<Mutex<Vec<(Seal, BlockHeight)>>> = Arc::new(Mutex::new(Vec::new()));
    let observed = Arc::clone(&committed);

    let leader = EngineSpec::builder()
        .me(MemberId::new("leader"))
        .kv_store(MemDB::new())
        .log_events(false)
        .on_commit_block(move |event: &CommitBlockEvent| {
            observed
                .lock()
                .unwrap()
                .push((event.block_seal.clone(), event.height));
        })
        .build()
        .start();

    let reps = representatives(&["leader", "member"]);
    let block = Block::genesis(Body::new(b"observed".to_vec()));
    let pre_prepare = leader.start_round(reps, block.clone()).unwrap();
    for phase in [VotePhase::Prepare, VotePhase::Commit] {
        leader
            .handle_vote(&vote_for(&pre_prepare, "member", phase))
            .unwrap();
    }

    // The bus dispatches on a background thread; poll until the handler has seen the commit.
    let mut waited_ms = 0;
    loop {
        if let Some((seal, height)) = committed.lock().unwrap().first().cloned() {
            assert_eq!(seal, block.seal);
            assert_eq!(height, BlockHeight::new(0));
            break;
        }
        assert!(waited_ms < 5000, "commit handler was never invoked");
        thread::sleep(Duration::from_millis(10));
        waited_ms += 10;
    }
}
