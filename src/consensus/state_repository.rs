/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The single-slot store for the currently active round's state.
//!
//! The repository holds at most one [Consensus] snapshot at a time, and [save](StateRepository::save)
//! only succeeds for the round that owns the slot. This makes "exactly one round is active" a
//! structural guarantee enforced at the storage boundary rather than a convention: an attempt to
//! start a second round while one is in flight fails with [StateError::InvalidSave], which callers
//! must treat as "round already in progress" rather than a fault.

use std::fmt::{self, Display, Formatter};
use std::sync::RwLock;

use super::round::Consensus;

/// Error from the [StateRepository].
#[derive(Debug, PartialEq, Eq)]
pub enum StateError {
    /// A state for a round other than the active one was offered to [StateRepository::save].
    /// Expected under races; the caller should retry, queue, or reject.
    InvalidSave,
    /// [StateRepository::load] was called before any round existed.
    EmptyRepo,
}

impl Display for StateError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            StateError::InvalidSave => write!(f, "a different consensus round is already active"),
            StateError::EmptyRepo => write!(f, "no consensus round is active"),
        }
    }
}

/// Single-slot store for the active round, safe for access from concurrent message handlers.
pub struct StateRepository {
    state: RwLock<Option<Consensus>>,
}

impl StateRepository {
    pub fn new() -> StateRepository {
        StateRepository {
            state: RwLock::new(None),
        }
    }

    /// Stores `state` as the active round's snapshot. Succeeds only if no round is active, or if
    /// the incoming state's id matches the stored round's id.
    pub fn save(&self, state: Consensus) -> Result<(), StateError> {
        let mut stored = self.state.write().unwrap();
        match &*stored {
            Some(current) if current.consensus_id() != state.consensus_id() => {
                Err(StateError::InvalidSave)
            }
            _ => {
                *stored = Some(state);
                Ok(())
            }
        }
    }

    /// Returns a snapshot of the active round's state.
    pub fn load(&self) -> Result<Consensus, StateError> {
        self.state
            .read()
            .unwrap()
            .clone()
            .ok_or(StateError::EmptyRepo)
    }

    /// Mutates the active round under the repository's write lock, returning the closure's result.
    /// Vote folding and its threshold check go through here so that "fold + check + persist" is a
    /// single critical section.
    pub fn update<T>(&self, f: impl FnOnce(&mut Consensus) -> T) -> Result<T, StateError> {
        let mut stored = self.state.write().unwrap();
        match stored.as_mut() {
            Some(state) => Ok(f(state)),
            None => Err(StateError::EmptyRepo),
        }
    }

    /// Resets the slot to unset. Called on finalization and on failure of the active round.
    pub fn remove(&self) {
        *self.state.write().unwrap() = None;
    }
}

impl Default for StateRepository {
    fn default() -> Self {
        StateRepository::new()
    }
}
