//! Exactly-once bookkeeping for transaction ids.
//!
//! # Problem
//!
//! The backend redelivers any transaction it has not seen acknowledged, and
//! callers may also acknowledge transactions themselves through
//! `finish_transaction`. Without a record of what was already done, a
//! redelivered transaction would fire a second callback and the queue would
//! see a second acknowledgment for the same id.
//!
//! # Solution
//!
//! `TransactionLedger` keeps two sets keyed by [`TransactionId`]:
//!
//! ```text
//! claimed       ids some stage has consumed (callback already scheduled)
//! acknowledged  ids the queue has been told to finish
//! ```
//!
//! 1. A claimed id is never routed again. Redeliveries are dropped before
//!    any stage sees them.
//! 2. [`TransactionLedger::acknowledge`] returns `true` only the first time
//!    for a given id. The orchestrator forwards to the queue only on `true`.
//!
//! # Thread-safety
//! Not `Sync` on its own; the orchestrator keeps it behind its state mutex.

use std::collections::HashSet;

use crate::types::TransactionId;

/// Claimed and acknowledged transaction ids.
#[derive(Clone, Debug, Default)]
pub struct TransactionLedger {
    claimed: HashSet<TransactionId>,
    acknowledged: HashSet<TransactionId>,
}

impl TransactionLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// `true` once any stage has consumed `id`.
    pub fn is_claimed(&self, id: &TransactionId) -> bool {
        self.claimed.contains(id)
    }

    /// Record a claim. Returns `false` if `id` was already claimed.
    pub fn record_claim(&mut self, id: &TransactionId) -> bool {
        self.claimed.insert(id.clone())
    }

    /// Mark `id` acknowledged. Returns `true` only on the first call, which
    /// is the one that must reach the queue.
    pub fn acknowledge(&mut self, id: &TransactionId) -> bool {
        self.acknowledged.insert(id.clone())
    }

    pub fn is_acknowledged(&self, id: &TransactionId) -> bool {
        self.acknowledged.contains(id)
    }

    pub fn claimed_count(&self) -> usize {
        self.claimed.len()
    }

    pub fn acknowledged_count(&self) -> usize {
        self.acknowledged.len()
    }
}
