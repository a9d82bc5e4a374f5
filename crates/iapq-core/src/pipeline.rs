//! Shared plumbing for the matcher stages.
//!
//! Stages never talk to the queue and never invoke callbacks themselves.
//! They record what they claimed in [`BatchEffects`]; the orchestrator then
//! applies acknowledgments through the ledger and fires [`Dispatch`]es after
//! the state lock is released. That keeps every stage pure and lets callbacks
//! re-enter the engine.

use std::fmt;
use std::sync::Arc;

use crate::types::{Purchase, PurchaseOutcome, RestoreOutcome, TransactionId};

pub type PaymentCallback = Box<dyn FnOnce(PurchaseOutcome) + Send + 'static>;
pub type RestoreCallback = Box<dyn FnOnce(Vec<RestoreOutcome>) + Send + 'static>;
pub type CompletionCallback = Arc<dyn Fn(Vec<Purchase>) + Send + Sync + 'static>;

/// Which consumer claimed a transaction.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Stage {
    DirectPurchase,
    Restore,
    Completion,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Stage::DirectPurchase => "direct_purchase",
            Stage::Restore => "restore",
            Stage::Completion => "completion",
        };
        f.write_str(s)
    }
}

/// One claimed transaction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Claim {
    pub transaction_id: TransactionId,
    pub stage: Stage,
    /// `false` when acknowledgment is deferred to the caller.
    pub acknowledge: bool,
}

/// A callback invocation waiting for the state lock to be released.
pub enum Dispatch {
    Payment {
        callback: PaymentCallback,
        outcome: PurchaseOutcome,
    },
    Restore {
        callback: RestoreCallback,
        outcomes: Vec<RestoreOutcome>,
    },
    Completions {
        callback: CompletionCallback,
        purchases: Vec<Purchase>,
    },
}

impl Dispatch {
    pub fn fire(self) {
        match self {
            Dispatch::Payment { callback, outcome } => callback(outcome),
            Dispatch::Restore { callback, outcomes } => callback(outcomes),
            Dispatch::Completions {
                callback,
                purchases,
            } => callback(purchases),
        }
    }
}

impl fmt::Debug for Dispatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dispatch::Payment { outcome, .. } => f
                .debug_struct("Payment")
                .field("outcome", outcome)
                .finish_non_exhaustive(),
            Dispatch::Restore { outcomes, .. } => f
                .debug_struct("Restore")
                .field("outcomes", &outcomes.len())
                .finish_non_exhaustive(),
            Dispatch::Completions { purchases, .. } => f
                .debug_struct("Completions")
                .field("purchases", &purchases.len())
                .finish_non_exhaustive(),
        }
    }
}

/// Everything a pass (or a restore terminal signal) decided.
#[derive(Debug, Default)]
pub struct BatchEffects {
    claims: Vec<Claim>,
    dispatches: Vec<Dispatch>,
}

impl BatchEffects {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn claim(&mut self, transaction_id: &TransactionId, stage: Stage, acknowledge: bool) {
        self.claims.push(Claim {
            transaction_id: transaction_id.clone(),
            stage,
            acknowledge,
        });
    }

    pub fn dispatch(&mut self, d: Dispatch) {
        self.dispatches.push(d);
    }

    #[cfg(test)]
    pub(crate) fn claims(&self) -> &[Claim] {
        &self.claims
    }

    #[cfg(test)]
    pub(crate) fn dispatch_count(&self) -> usize {
        self.dispatches.len()
    }

    /// Ids this pass asked to acknowledge, in claim order.
    #[cfg(test)]
    pub(crate) fn acknowledgments(&self) -> impl Iterator<Item = &TransactionId> {
        self.claims
            .iter()
            .filter(|c| c.acknowledge)
            .map(|c| &c.transaction_id)
    }

    pub fn into_parts(self) -> (Vec<Claim>, Vec<Dispatch>) {
        (self.claims, self.dispatches)
    }

    /// Fire all dispatches in order. The orchestrator goes through
    /// `into_parts` instead so it can release its lock first.
    #[cfg(test)]
    pub(crate) fn fire_all(self) {
        for d in self.dispatches {
            d.fire();
        }
    }
}
