/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Definitions for the representative set of a consensus round, and the quorum arithmetic over it.

use borsh::{BorshDeserialize, BorshSerialize};

use crate::types::basic::MemberId;

/// A voting participant in a consensus round. Equality is by id.
#[derive(Clone, PartialEq, Eq, Hash, Debug, BorshSerialize, BorshDeserialize)]
pub struct Representative {
    id: MemberId,
}

impl Representative {
    pub fn new<S: Into<String>>(id: S) -> Representative {
        Representative {
            id: MemberId::new(id),
        }
    }

    pub fn id(&self) -> &MemberId {
        &self.id
    }
}

/// The ordered set of representatives participating in one consensus round. The leader is the
/// representative at index 0, by convention.
///
/// The set is fixed for the lifetime of a round: a view change does not mutate it, but instead
/// invalidates the round so that a new one can be constructed over the new set.
#[derive(Clone, PartialEq, Eq, Debug, BorshSerialize, BorshDeserialize)]
pub struct RepresentativeSet(Vec<Representative>);

impl RepresentativeSet {
    pub fn new(representatives: Vec<Representative>) -> RepresentativeSet {
        RepresentativeSet(representatives)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The leader of the round. Must not be called on an empty set; round constructors reject sets
    /// with fewer than 2 members before this can be reached.
    pub fn leader(&self) -> &Representative {
        &self.0[0]
    }

    pub fn contains(&self, member: &MemberId) -> bool {
        self.0.iter().any(|rep| rep.id() == member)
    }

    /// Number of distinct member votes required to satisfy a phase: a strict majority,
    /// ⌊n/2⌋ + 1.
    pub fn quorum(&self) -> usize {
        self.0.len() / 2 + 1
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Representative> {
        self.0.iter()
    }
}
