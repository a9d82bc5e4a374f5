use std::collections::BTreeMap;

use iapq_core::{
    EngineSnapshot, PaymentRequest, Purchase, PurchaseOutcome, TransactionState,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Compact view of a [`Purchase`] for reports.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseSummary {
    pub transaction_id: String,
    pub catalog_item_id: String,
    pub state: TransactionState,
    pub quantity: i64,
    pub needs_finish_transaction: bool,
}

impl From<&Purchase> for PurchaseSummary {
    fn from(p: &Purchase) -> Self {
        Self {
            transaction_id: p.transaction_id().to_string(),
            catalog_item_id: p.catalog_item_id.to_string(),
            state: p.transaction.state,
            quantity: p.quantity,
            needs_finish_transaction: p.needs_finish_transaction,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentResultKind {
    Success,
    Failed,
    Cancelled,
}

impl From<&PurchaseOutcome> for PaymentResultKind {
    fn from(o: &PurchaseOutcome) -> Self {
        if o.is_success() {
            Self::Success
        } else if o.is_cancelled() {
            Self::Cancelled
        } else {
            Self::Failed
        }
    }
}

/// Everything observable the caller side saw, in order. `step` is the index
/// of the scenario step during which it happened.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ScenarioEvent {
    PaymentRejected {
        step: usize,
        catalog_item_id: String,
        error: String,
    },
    PaymentResult {
        step: usize,
        result: PaymentResultKind,
        purchase: PurchaseSummary,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    RestoreAdmission {
        step: usize,
        accepted: bool,
    },
    RestoreResult {
        step: usize,
        restored: Vec<PurchaseSummary>,
        failed: Vec<String>,
    },
    SubscribeAdmission {
        step: usize,
        accepted: bool,
    },
    Completions {
        step: usize,
        purchases: Vec<PurchaseSummary>,
    },
    Finished {
        step: usize,
        transaction_id: String,
        sent: bool,
    },
    StorePaymentDecision {
        step: usize,
        catalog_item_id: String,
        allowed: bool,
    },
    Relaunched {
        step: usize,
        redelivered: usize,
    },
}

/// Result of replaying one scenario.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ScenarioReport {
    /// Derived from the scenario name and effective settings, so replays of
    /// the same inputs share an id.
    pub run_id: Uuid,
    pub name: String,
    pub steps: usize,
    pub events: Vec<ScenarioEvent>,
    /// Acknowledgment count per transaction id, as seen by the queue.
    pub acknowledgments: BTreeMap<String, u32>,
    pub enqueued: Vec<PaymentRequest>,
    pub restore_requests: Vec<Option<String>>,
    /// Delivered but never acknowledged.
    pub outstanding: Vec<String>,
    pub engine: EngineSnapshot,
}

impl ScenarioReport {
    /// Ids acknowledged more than once. Always empty for a correct engine.
    pub fn double_acks(&self) -> Vec<&str> {
        self.acknowledgments
            .iter()
            .filter(|(_, n)| **n > 1)
            .map(|(id, _)| id.as_str())
            .collect()
    }

    pub fn ack_count(&self, id: &str) -> u32 {
        self.acknowledgments.get(id).copied().unwrap_or(0)
    }

    /// All `Completions` batches flattened, in delivery order.
    pub fn completions(&self) -> Vec<&PurchaseSummary> {
        self.events
            .iter()
            .filter_map(|e| match e {
                ScenarioEvent::Completions { purchases, .. } => Some(purchases.iter()),
                _ => None,
            })
            .flatten()
            .collect()
    }

    pub fn payment_results(&self) -> Vec<(PaymentResultKind, &PurchaseSummary)> {
        self.events
            .iter()
            .filter_map(|e| match e {
                ScenarioEvent::PaymentResult {
                    result, purchase, ..
                } => Some((*result, purchase)),
                _ => None,
            })
            .collect()
    }
}
