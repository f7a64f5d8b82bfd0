/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Methods to build and run a consensus engine: the component that drives proposed blocks through
//! rounds and into the committed ledger.
//!
//! The engine owns the three repositories ([StateRepository], [BlockPool],
//! [CommittedBlockRepository]) and folds inbound messages into them. It does not own a transport:
//! inbound pre-prepare messages, phase votes, and leader-change notifications are handed to it by
//! the caller, and outbound messages ([PrePrepareMsg] from [start_round](ConsensusEngine::start_round),
//! [VoteMsg] from [cast_vote](ConsensusEngine::cast_vote)) are returned to the caller for
//! broadcast. Quorum waits are bounded externally: on timeout the caller invokes
//! [fail_round](ConsensusEngine::fail_round).
//!
//! ## Building an engine
//!
//! ```ignore
//! let engine =
//!     EngineSpec::builder()
//!     .me(MemberId::new("replica-0"))
//!     .kv_store(kv_store)
//!     .log_events(true)
//!     .on_commit_block(commit_handler)
//!     .build()
//!     .start();
//! ```

use std::sync::mpsc::{self, Sender};
use std::thread::JoinHandle;
use std::time::SystemTime;

use typed_builder::TypedBuilder;

use crate::consensus::messages::{LeaderChangeEvent, PrePrepareMsg, VoteMsg, VotePhase};
use crate::consensus::round::{Consensus, ConsensusError, Phase, VoteOutcome};
use crate::consensus::state_repository::{StateError, StateRepository};
use crate::event_bus::{start_event_bus, EventHandlers, HandlerPtr};
use crate::events::*;
use crate::pool::{BlockPool, PoolError};
use crate::state::committed_blocks::{CommittedBlockRepository, LedgerError};
use crate::state::kv_store::KVStore;
use crate::types::basic::{BlockHeight, ConsensusId, MemberId, Seal};
use crate::types::block::Block;
use crate::types::representatives::RepresentativeSet;

/// Stores all necessary parameters and trait implementations required to run a [ConsensusEngine].
#[derive(TypedBuilder)]
#[builder(builder_method(doc = "
    Create a builder for building an [EngineSpec]. On the builder call the following methods to construct a valid [EngineSpec].

    Required:
    - `.me(...)`
    - `.kv_store(...)`
    - `.log_events(...)`

    Optional:
    - `.on_start_round(...)`
    - `.on_receive_pre_prepare(...)`
    - `.on_receive_vote(...)`
    - `.on_advance_phase(...)`
    - `.on_stage_block(...)`
    - `.on_commit_block(...)`
    - `.on_finalize_round(...)`
    - `.on_fail_round(...)`
    - `.on_leader_change(...)`
"))]
pub struct EngineSpec<S: KVStore> {
    // Required parameters
    #[builder(setter(doc = "Set the local node's member id. Required."))]
    me: MemberId,
    #[builder(setter(doc = "Set the implementation of the committed ledger's Key-Value store. The argument must implement the [KVStore](crate::state::kv_store::KVStore) trait. Required."))]
    kv_store: S,
    #[builder(setter(doc = "Enable logging? Required."))]
    log_events: bool,
    // Optional parameters
    #[builder(default, setter(transform = |handler: impl Fn(&StartRoundEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<StartRoundEvent>),
    doc = "Register a handler closure to be invoked after the engine starts a round as leader. Optional."))]
    on_start_round: Option<HandlerPtr<StartRoundEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&ReceivePrePrepareEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<ReceivePrePrepareEvent>),
    doc = "Register a handler closure to be invoked after the engine receives a pre-prepare message. Optional."))]
    on_receive_pre_prepare: Option<HandlerPtr<ReceivePrePrepareEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&ReceiveVoteEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<ReceiveVoteEvent>),
    doc = "Register a handler closure to be invoked after the engine receives a phase vote. Optional."))]
    on_receive_vote: Option<HandlerPtr<ReceiveVoteEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&AdvancePhaseEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<AdvancePhaseEvent>),
    doc = "Register a handler closure to be invoked after the active round advances a phase. Optional."))]
    on_advance_phase: Option<HandlerPtr<AdvancePhaseEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&StageBlockEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<StageBlockEvent>),
    doc = "Register a handler closure to be invoked after a pooled block is staged for an active round. Optional."))]
    on_stage_block: Option<HandlerPtr<StageBlockEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&CommitBlockEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<CommitBlockEvent>),
    doc = "Register a handler closure to be invoked after a block is durably committed. Optional."))]
    on_commit_block: Option<HandlerPtr<CommitBlockEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&FinalizeRoundEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<FinalizeRoundEvent>),
    doc = "Register a handler closure to be invoked after the active round finalizes. Optional."))]
    on_finalize_round: Option<HandlerPtr<FinalizeRoundEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&FailRoundEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<FailRoundEvent>),
    doc = "Register a handler closure to be invoked after the active round is driven to Failed. Optional."))]
    on_fail_round: Option<HandlerPtr<FailRoundEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&LeaderChangeNoticeEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<LeaderChangeNoticeEvent>),
    doc = "Register a handler closure to be invoked after a leader-change notification is applied. Optional."))]
    on_leader_change: Option<HandlerPtr<LeaderChangeNoticeEvent>>,
}

impl<S: KVStore> EngineSpec<S> {
    /// Builds the repositories, starts the event bus if any handlers are registered, and returns
    /// the running engine.
    pub fn start(self) -> ConsensusEngine<S> {
        let event_handlers = EventHandlers::new(
            self.log_events,
            self.on_start_round,
            self.on_receive_pre_prepare,
            self.on_receive_vote,
            self.on_advance_phase,
            self.on_stage_block,
            self.on_commit_block,
            self.on_finalize_round,
            self.on_fail_round,
            self.on_leader_change,
        );

        let (event_publisher, event_bus, event_bus_shutdown) = if !event_handlers.is_empty() {
            let (event_publisher, event_subscriber) = mpsc::channel();
            let (shutdown, shutdown_receiver) = mpsc::channel();
            let event_bus = start_event_bus(event_handlers, event_subscriber, shutdown_receiver);
            (Some(event_publisher), Some(event_bus), Some(shutdown))
        } else {
            (None, None, None)
        };

        ConsensusEngine {
            me: self.me,
            state_repository: StateRepository::new(),
            block_pool: BlockPool::new(),
            committed_blocks: CommittedBlockRepository::new(self.kv_store),
            event_publisher,
            event_bus,
            event_bus_shutdown,
        }
    }
}

/// The consensus and block-lifecycle core of one node. See the [module docs](self) for the
/// division of labor between the engine and its caller. When this value is dropped, the event bus
/// thread (if any) is gracefully shut down.
pub struct ConsensusEngine<S: KVStore> {
    me: MemberId,
    state_repository: StateRepository,
    block_pool: BlockPool,
    committed_blocks: CommittedBlockRepository<S>,
    event_publisher: Option<Sender<Event>>,
    event_bus: Option<JoinHandle<()>>,
    event_bus_shutdown: Option<Sender<()>>,
}

impl<S: KVStore> ConsensusEngine<S> {
    pub fn me(&self) -> &MemberId {
        &self.me
    }

    /// Adds a freshly created block to the pool, where it waits to become the subject of a round.
    pub fn add_created_block(&self, block: Block) -> Result<(), EngineError> {
        self.block_pool.add_created_block(block)?;
        Ok(())
    }

    /// Starts a round as the leader over `block`, which must extend the committed ledger. Claims
    /// the active-round slot, stages the block, and returns the [PrePrepareMsg] the caller must
    /// broadcast to the other representatives.
    ///
    /// Fails with [EngineError::RoundInProgress] if another round is active; the caller should
    /// queue the proposal and retry after that round resolves.
    pub fn start_round(
        &self,
        representatives: RepresentativeSet,
        block: Block,
    ) -> Result<PrePrepareMsg, EngineError> {
        self.validate_proposal(&block)?;

        if self.block_pool.get_block_by_seal(&block.seal).is_err() {
            self.block_pool.add_created_block(block.clone())?;
        }

        let mut round = Consensus::new(representatives, block.proposed())?;
        round.start()?;
        // The leader accepts its own proposal immediately.
        round.accept_proposal()?;

        let consensus_id = round.consensus_id().clone();
        let msg = PrePrepareMsg {
            consensus_id: consensus_id.clone(),
            sender_id: self.me.clone(),
            representatives: round.representatives().clone(),
            proposed_block: round.block().clone(),
        };

        self.state_repository.save(round).map_err(|err| match err {
            StateError::InvalidSave => EngineError::RoundInProgress,
            other => EngineError::State(other),
        })?;
        self.block_pool.mark_staged(&block.seal)?;

        self.publish(Event::StartRound(StartRoundEvent {
            timestamp: SystemTime::now(),
            consensus_id: consensus_id.clone(),
            block_seal: block.seal.clone(),
        }));
        self.publish(Event::StageBlock(StageBlockEvent {
            timestamp: SystemTime::now(),
            block_seal: block.seal.clone(),
            height: block.height,
        }));
        self.publish(Event::AdvancePhase(AdvancePhaseEvent {
            timestamp: SystemTime::now(),
            consensus_id,
            phase: Phase::Prepare,
        }));

        Ok(msg)
    }

    /// Constructs the local copy of a round announced by a leader's [PrePrepareMsg]. The full block
    /// entity for the message's seal must already be in the pool; the engine validates it
    /// structurally and against the expected ledger height before accepting.
    pub fn handle_pre_prepare(&self, msg: PrePrepareMsg) -> Result<ConsensusId, EngineError> {
        self.publish(Event::ReceivePrePrepare(ReceivePrePrepareEvent {
            timestamp: SystemTime::now(),
            origin: msg.sender_id.clone(),
            pre_prepare: msg.clone(),
        }));

        let block = self
            .block_pool
            .get_block_by_seal(&msg.proposed_block.seal)
            .map_err(|_| EngineError::InvalidProposedBlock {
                seal: msg.proposed_block.seal.clone(),
            })?;
        self.validate_proposal(&block)?;

        let mut round = Consensus::from_pre_prepare(msg)?;
        round.start()?;
        round.accept_proposal()?;

        let consensus_id = round.consensus_id().clone();
        self.state_repository.save(round).map_err(|err| match err {
            StateError::InvalidSave => EngineError::RoundInProgress,
            other => EngineError::State(other),
        })?;
        self.block_pool.mark_staged(&block.seal)?;

        self.publish(Event::StageBlock(StageBlockEvent {
            timestamp: SystemTime::now(),
            block_seal: block.seal.clone(),
            height: block.height,
        }));
        self.publish(Event::AdvancePhase(AdvancePhaseEvent {
            timestamp: SystemTime::now(),
            consensus_id: consensus_id.clone(),
            phase: Phase::Prepare,
        }));

        Ok(consensus_id)
    }

    /// Folds an inbound phase vote into the active round. Folding, the quorum threshold check, and
    /// any phase advance happen in one critical section under the state repository's lock.
    ///
    /// A vote that does not match the active round's id, block seal, phase, or representative set
    /// leaves all state unchanged and reports [VoteOutcome::Ignored]; so does a vote when no round
    /// is active. Reaching the commit quorum finalizes the round: the staged block is committed to
    /// the ledger, removed from the pool, and the round is removed from the state repository.
    pub fn handle_vote(&self, vote: &VoteMsg) -> Result<VoteOutcome, EngineError> {
        let folded = self.state_repository.update(|round| {
            let outcome = round.fold_vote(vote);
            (
                outcome,
                round.phase(),
                round.consensus_id().clone(),
                round.block_seal().clone(),
            )
        });

        let (outcome, phase, consensus_id, block_seal) = match folded {
            Ok(folded) => folded,
            Err(StateError::EmptyRepo) => {
                self.publish(Event::ReceiveVote(ReceiveVoteEvent {
                    timestamp: SystemTime::now(),
                    origin: vote.sender_id.clone(),
                    vote: vote.clone(),
                    outcome: VoteOutcome::Ignored,
                }));
                return Ok(VoteOutcome::Ignored);
            }
            Err(other) => return Err(EngineError::State(other)),
        };

        self.publish(Event::ReceiveVote(ReceiveVoteEvent {
            timestamp: SystemTime::now(),
            origin: vote.sender_id.clone(),
            vote: vote.clone(),
            outcome,
        }));

        if outcome == VoteOutcome::QuorumReached {
            self.publish(Event::AdvancePhase(AdvancePhaseEvent {
                timestamp: SystemTime::now(),
                consensus_id: consensus_id.clone(),
                phase,
            }));

            if phase == Phase::Finalized {
                self.finalize(consensus_id, block_seal)?;
            }
        }

        Ok(outcome)
    }

    /// Builds the local node's vote for the active round's current phase, folds it locally, and
    /// returns it for broadcast.
    pub fn cast_vote(&self, phase: VotePhase) -> Result<(VoteMsg, VoteOutcome), EngineError> {
        let round = self.state_repository.load().map_err(|err| match err {
            StateError::EmptyRepo => EngineError::NoActiveRound,
            other => EngineError::State(other),
        })?;

        let vote = VoteMsg {
            consensus_id: round.consensus_id().clone(),
            sender_id: self.me.clone(),
            block_seal: round.block_seal().clone(),
            phase,
        };
        let outcome = self.handle_vote(&vote)?;
        Ok((vote, outcome))
    }

    /// Drives the active round to `Failed` and removes it. Called by the owner of the round's
    /// timeout when a quorum does not arrive in time, and by the leader-change projector.
    pub fn fail_round(&self) -> Result<(), EngineError> {
        let failed = self.state_repository.update(|round| {
            round
                .fail()
                .map(|()| (round.consensus_id().clone(), round.block_seal().clone()))
        });

        let (consensus_id, block_seal) = match failed {
            Ok(Ok(ids)) => ids,
            Ok(Err(err)) => return Err(EngineError::Consensus(err)),
            Err(StateError::EmptyRepo) => return Err(EngineError::NoActiveRound),
            Err(other) => return Err(EngineError::State(other)),
        };

        self.state_repository.remove();
        // The staged block returns to the pool as Created, awaiting a new round. The pool may not
        // hold it if the caller already pruned it.
        let _ = self.block_pool.revert_to_created(&block_seal);

        self.publish(Event::FailRound(FailRoundEvent {
            timestamp: SystemTime::now(),
            consensus_id,
        }));

        Ok(())
    }

    /// Applies a leader-change notification: appends it to the event log, then discards the
    /// in-flight round (if any), whose representative set is now stale. A new round must be
    /// constructed over the new representative set by the caller.
    pub fn handle_leader_change(&self, event: LeaderChangeEvent) -> Result<(), EngineError> {
        self.publish(Event::LeaderChange(LeaderChangeNoticeEvent {
            timestamp: SystemTime::now(),
            new_leader: event.node_id,
        }));

        match self.fail_round() {
            Ok(()) | Err(EngineError::NoActiveRound) => Ok(()),
            Err(other) => Err(other),
        }
    }

    /// A snapshot of the active round, if one exists.
    pub fn active_round(&self) -> Result<Consensus, StateError> {
        self.state_repository.load()
    }

    /* ↓↓↓ Read-only query surface over the committed ledger and the pool ↓↓↓ */

    pub fn get_last_committed_block(&self) -> Result<Block, LedgerError> {
        self.committed_blocks.get_last_block()
    }

    pub fn get_committed_block_by_height(&self, height: BlockHeight) -> Result<Block, LedgerError> {
        self.committed_blocks.get_block_by_height(height)
    }

    pub fn get_committed_block_by_seal(&self, seal: &Seal) -> Result<Block, LedgerError> {
        self.committed_blocks.get_block_by_seal(seal)
    }

    pub fn get_staged_block_by_height(&self, height: BlockHeight) -> Result<Block, PoolError> {
        self.block_pool.get_staged_block_by_height(height)
    }

    pub fn get_staged_block_by_seal(&self, seal: &Seal) -> Result<Block, PoolError> {
        self.block_pool.get_staged_block_by_seal(seal)
    }

    pub fn get_first_staged_block(&self) -> Result<Block, PoolError> {
        self.block_pool.get_first_staged_block()
    }

    fn finalize(&self, consensus_id: ConsensusId, block_seal: Seal) -> Result<(), EngineError> {
        let staged = self.block_pool.get_staged_block_by_seal(&block_seal)?;
        // A failed append abandons the round: the slot is freed and the block returns to
        // Created, so the caller can run a fresh round over it once the fault is addressed. The
        // round itself cannot stay in the slot, since Finalized is terminal and no vote or
        // fail_round call could ever remove it.
        if let Err(err) = self.committed_blocks.save(&staged) {
            self.state_repository.remove();
            let _ = self.block_pool.revert_to_created(&block_seal);
            return Err(EngineError::Ledger(err));
        }
        self.block_pool.remove_by_seal(&block_seal)?;
        self.state_repository.remove();

        self.publish(Event::CommitBlock(CommitBlockEvent {
            timestamp: SystemTime::now(),
            block_seal: block_seal.clone(),
            height: staged.height,
        }));
        self.publish(Event::FinalizeRound(FinalizeRoundEvent {
            timestamp: SystemTime::now(),
            consensus_id,
            block_seal,
        }));

        Ok(())
    }

    /// Structural validity plus the chaining check against the committed ledger: a proposal must
    /// be the direct child of the last committed block, or a height-0 block on an empty ledger.
    fn validate_proposal(&self, block: &Block) -> Result<(), EngineError> {
        if !block.is_structurally_valid() {
            return Err(EngineError::InvalidProposedBlock {
                seal: block.seal.clone(),
            });
        }
        let chains = match self.committed_blocks.last_height()? {
            Some(_) => {
                let last = self.committed_blocks.get_last_block()?;
                block.extends(&last)
            }
            None => block.height == BlockHeight::new(0),
        };
        if !chains {
            return Err(EngineError::InvalidProposedBlock {
                seal: block.seal.clone(),
            });
        }
        Ok(())
    }

    fn publish(&self, event: Event) {
        Event::publish(&self.event_publisher, event)
    }
}

impl<S: KVStore> Drop for ConsensusEngine<S> {
    fn drop(&mut self) {
        if let Some(shutdown) = self.event_bus_shutdown.take() {
            shutdown.send(()).unwrap();
        }
        if let Some(event_bus) = self.event_bus.take() {
            event_bus.join().unwrap();
        }
    }
}

/// Error from the [ConsensusEngine]. Wraps the repository and round errors, and adds the
/// engine-level conditions that arise from orchestrating them.
#[derive(Debug)]
pub enum EngineError {
    /// A different round is already active; the new round was not constructed. Expected under
    /// races, not a fault: retry or queue after the active round resolves.
    RoundInProgress,
    /// No round is active.
    NoActiveRound,
    /// The proposed block failed structural validation or does not extend the committed ledger.
    InvalidProposedBlock { seal: Seal },
    Consensus(ConsensusError),
    State(StateError),
    Pool(PoolError),
    Ledger(LedgerError),
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::RoundInProgress => write!(f, "another consensus round is in progress"),
            EngineError::NoActiveRound => write!(f, "no consensus round is active"),
            EngineError::InvalidProposedBlock { seal } => {
                write!(f, "proposed block {} was rejected by validation", seal)
            }
            EngineError::Consensus(err) => write!(f, "{}", err),
            EngineError::State(err) => write!(f, "{}", err),
            EngineError::Pool(err) => write!(f, "{}", err),
            EngineError::Ledger(err) => write!(f, "{}", err),
        }
    }
}

impl From<ConsensusError> for EngineError {
    fn from(err: ConsensusError) -> EngineError {
        EngineError::Consensus(err)
    }
}

impl From<PoolError> for EngineError {
    fn from(err: PoolError) -> EngineError {
        EngineError::Pool(err)
    }
}

impl From<LedgerError> for EngineError {
    fn from(err: LedgerError) -> EngineError {
        EngineError::Ledger(err)
    }
}
