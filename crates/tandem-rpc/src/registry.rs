//! Deferred registry and batch accounting.
//!
//! Each outgoing call parks a oneshot sender here under its invocation id.
//! The sender is removed and fired in one step when the reply arrives, so an
//! id can only ever be settled once; a second reply finds nothing and is
//! reported as a protocol violation.
//!
//! A batch is the span during which at least one call is outstanding. Ids
//! start over only when nothing is outstanding and no abandoned call is still
//! owed a reply by the peer, so a late reply can never match a newer call.

use crate::error::{ProtocolViolation, Result};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use tokio::sync::oneshot;

/// Settlement cell of one outstanding call.
pub(crate) type Deferred = oneshot::Sender<Result<Value>>;

/// Result of registering a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Registration {
    pub id: u64,
    /// This call opened a new batch (0 -> 1 outstanding).
    pub batch_started: bool,
}

/// Result of settling or abandoning a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Completion {
    /// Calls completed so far in the current batch, including this one.
    pub completed: u64,
    /// This completion drained the batch (N -> 0 outstanding).
    pub batch_ended: bool,
}

/// Invocation counter and per-batch completion counter.
#[derive(Debug, Default)]
pub(crate) struct BatchAccounting {
    last_id: u64,
    completed: u64,
}

impl BatchAccounting {
    fn next_id(&mut self) -> u64 {
        self.last_id += 1;
        self.last_id
    }

    fn complete(&mut self, drained: bool) -> Completion {
        self.completed += 1;
        let completion = Completion {
            completed: self.completed,
            batch_ended: drained,
        };
        if drained {
            self.completed = 0;
        }
        completion
    }

    fn restart_ids(&mut self) {
        self.last_id = 0;
    }

    #[cfg(test)]
    pub fn last_id(&self) -> u64 {
        self.last_id
    }

    #[cfg(test)]
    pub fn completed(&self) -> u64 {
        self.completed
    }
}

#[derive(Debug, Default)]
pub(crate) struct DeferredRegistry {
    pending: HashMap<u64, Deferred>,
    /// Ids given up on locally whose reply may still arrive.
    abandoned: HashSet<u64>,
    batch: BatchAccounting,
}

impl DeferredRegistry {
    /// Allocate the next id and park the deferred under it.
    pub fn register(&mut self, deferred: Deferred) -> Registration {
        let batch_started = self.pending.is_empty();
        let id = self.batch.next_id();
        debug_assert!(!self.pending.contains_key(&id) && !self.abandoned.contains(&id));
        self.pending.insert(id, deferred);
        Registration { id, batch_started }
    }

    /// Remove and fire the deferred for `id`.
    ///
    /// A caller that stopped waiting is not an error: the settlement still
    /// counts toward the batch. A reply for an abandoned id releases the id
    /// and is reported.
    pub fn settle(
        &mut self,
        id: u64,
        outcome: Result<Value>,
    ) -> std::result::Result<Completion, ProtocolViolation> {
        let Some(deferred) = self.pending.remove(&id) else {
            if self.abandoned.remove(&id) {
                self.restart_ids_if_idle();
                return Err(ProtocolViolation::LateReply { id });
            }
            return Err(ProtocolViolation::UnknownInvocation { id });
        };
        let _ = deferred.send(outcome);
        let completion = self.batch.complete(self.pending.is_empty());
        self.restart_ids_if_idle();
        Ok(completion)
    }

    /// Give up on `id` without a reply (timeout). Counts as a completion, but
    /// the id stays reserved until the peer answers it.
    pub fn abandon(&mut self, id: u64) -> Option<Completion> {
        self.pending.remove(&id)?;
        self.abandoned.insert(id);
        Some(self.batch.complete(self.pending.is_empty()))
    }

    pub fn outstanding(&self) -> usize {
        self.pending.len()
    }

    fn restart_ids_if_idle(&mut self) {
        if self.pending.is_empty() && self.abandoned.is_empty() {
            self.batch.restart_ids();
        }
    }

    #[cfg(test)]
    pub fn batch(&self) -> &BatchAccounting {
        &self.batch
    }
}
