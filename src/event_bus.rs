use crate::events::*;
use crate::logging::Logger;
use std::sync::mpsc::Receiver;
use std::sync::mpsc::TryRecvError;
use std::thread;
use std::thread::JoinHandle;

pub(crate) type HandlerPtr<T> = Box<dyn Fn(&T) + Send>;

pub(crate) struct EventHandlers {
    pub(crate) start_round_handlers: Vec<HandlerPtr<StartRoundEvent>>,
    pub(crate) receive_pre_prepare_handlers: Vec<HandlerPtr<ReceivePrePrepareEvent>>,
    pub(crate) receive_vote_handlers: Vec<HandlerPtr<ReceiveVoteEvent>>,
    pub(crate) advance_phase_handlers: Vec<HandlerPtr<AdvancePhaseEvent>>,
    pub(crate) stage_block_handlers: Vec<HandlerPtr<StageBlockEvent>>,
    pub(crate) commit_block_handlers: Vec<HandlerPtr<CommitBlockEvent>>,
    pub(crate) finalize_round_handlers: Vec<HandlerPtr<FinalizeRoundEvent>>,
    pub(crate) fail_round_handlers: Vec<HandlerPtr<FailRoundEvent>>,
    pub(crate) leader_change_handlers: Vec<HandlerPtr<LeaderChangeNoticeEvent>>,
}

impl EventHandlers {
    /// Collect the user-registered handlers into one dispatch table, prepending the default
    /// logging handlers if `log_events` is set.
    pub(crate) fn new(
        log_events: bool,
        on_start_round: Option<HandlerPtr<StartRoundEvent>>,
        on_receive_pre_prepare: Option<HandlerPtr<ReceivePrePrepareEvent>>,
        on_receive_vote: Option<HandlerPtr<ReceiveVoteEvent>>,
        on_advance_phase: Option<HandlerPtr<AdvancePhaseEvent>>,
        on_stage_block: Option<HandlerPtr<StageBlockEvent>>,
        on_commit_block: Option<HandlerPtr<CommitBlockEvent>>,
        on_finalize_round: Option<HandlerPtr<FinalizeRoundEvent>>,
        on_fail_round: Option<HandlerPtr<FailRoundEvent>>,
        on_leader_change: Option<HandlerPtr<LeaderChangeNoticeEvent>>,
    ) -> EventHandlers {
        fn collect<T: Logger>(log_events: bool, custom: Option<HandlerPtr<T>>) -> Vec<HandlerPtr<T>> {
            let mut handlers = Vec::new();
            if log_events {
                handlers.push(T::get_logger());
            }
            if let Some(handler) = custom {
                handlers.push(handler);
            }
            handlers
        }

        EventHandlers {
            start_round_handlers: collect(log_events, on_start_round),
            receive_pre_prepare_handlers: collect(log_events, on_receive_pre_prepare),
            receive_vote_handlers: collect(log_events, on_receive_vote),
            advance_phase_handlers: collect(log_events, on_advance_phase),
            stage_block_handlers: collect(log_events, on_stage_block),
            commit_block_handlers: collect(log_events, on_commit_block),
            finalize_round_handlers: collect(log_events, on_finalize_round),
            fail_round_handlers: collect(log_events, on_fail_round),
            leader_change_handlers: collect(log_events, on_leader_change),
        }
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.start_round_handlers.is_empty()
            && self.receive_pre_prepare_handlers.is_empty()
            && self.receive_vote_handlers.is_empty()
            && self.advance_phase_handlers.is_empty()
            && self.stage_block_handlers.is_empty()
            && self.commit_block_handlers.is_empty()
            && self.finalize_round_handlers.is_empty()
            && self.fail_round_handlers.is_empty()
            && self.leader_change_handlers.is_empty()
    }

    pub(crate) fn fire_handlers(&self, event: Event) {
        match event {
            Event::StartRound(start_round_event) => self
                .start_round_handlers
                .iter()
                .for_each(|handler| handler(&start_round_event)),

            Event::ReceivePrePrepare(receive_pre_prepare_event) => self
                .receive_pre_prepare_handlers
                .iter()
                .for_each(|handler| handler(&receive_pre_prepare_event)),

            Event::ReceiveVote(receive_vote_event) => self
                .receive_vote_handlers
                .iter()
                .for_each(|handler| handler(&receive_vote_event)),

            Event::AdvancePhase(advance_phase_event) => self
                .advance_phase_handlers
                .iter()
                .for_each(|handler| handler(&advance_phase_event)),

            Event::StageBlock(stage_block_event) => self
                .stage_block_handlers
                .iter()
                .for_each(|handler| handler(&stage_block_event)),

            Event::CommitBlock(commit_block_event) => self
                .commit_block_handlers
                .iter()
                .for_each(|handler| handler(&commit_block_event)),

            Event::FinalizeRound(finalize_round_event) => self
                .finalize_round_handlers
                .iter()
                .for_each(|handler| handler(&finalize_round_event)),

            Event::FailRound(fail_round_event) => self
                .fail_round_handlers
                .iter()
                .for_each(|handler| handler(&fail_round_event)),

            Event::LeaderChange(leader_change_event) => self
                .leader_change_handlers
                .iter()
                .for_each(|handler| handler(&leader_change_event)),
        }
    }
}

pub(crate) fn start_event_bus(
    event_handlers: EventHandlers,
    event_subscriber: Receiver<Event>,
    shutdown_signal: Receiver<()>,
) -> JoinHandle<()> {
    thread::spawn(move || loop {
        match shutdown_signal.try_recv() {
            Ok(()) => return,
            Err(TryRecvError::Empty) => (),
            Err(TryRecvError::Disconnected) => {
                panic!("event_bus thread disconnected from main thread")
            }
        }

        match event_subscriber.try_recv() {
            Ok(event) => event_handlers.fire_handlers(event),
            Err(TryRecvError::Empty) => thread::yield_now(),
            Err(TryRecvError::Disconnected) => {
                panic!("the engine (event publisher) was disconnected from the channel")
            }
        }
    })
}
