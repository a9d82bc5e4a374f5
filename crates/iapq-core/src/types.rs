use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{StoreError, TransactionError};

// ---------------------------------------------------------------------------
// Identifiers
// ---------------------------------------------------------------------------

/// Catalog item identifier as known to the store backend.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CatalogItemId(pub String);

impl CatalogItemId {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CatalogItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CatalogItemId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Backend-assigned transaction identifier. Acknowledgment is keyed on it.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransactionId(pub String);

impl TransactionId {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TransactionId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

// ---------------------------------------------------------------------------
// TransactionState
// ---------------------------------------------------------------------------

/// Every state a transaction notification can carry.
///
/// `Purchasing` is transient: it is never acknowledged and never routed.
/// `Deferred` is claimable but not final on the backend side; the same
/// transaction may later reappear with another state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionState {
    Purchasing,
    Purchased,
    Failed,
    Restored,
    Deferred,
}

impl TransactionState {
    /// `true` for the only state the engine holds back from every stage.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Purchasing)
    }
}

impl fmt::Display for TransactionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Purchasing => "PURCHASING",
            Self::Purchased => "PURCHASED",
            Self::Failed => "FAILED",
            Self::Restored => "RESTORED",
            Self::Deferred => "DEFERRED",
        };
        f.write_str(s)
    }
}

// ---------------------------------------------------------------------------
// Transaction
// ---------------------------------------------------------------------------

/// One delivered transaction notification. Immutable per delivery.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub transaction_id: TransactionId,
    pub catalog_item_id: CatalogItemId,
    pub state: TransactionState,
    #[serde(default = "default_quantity")]
    pub quantity: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_transaction_id: Option<TransactionId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<StoreError>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transaction_date: Option<DateTime<Utc>>,
}

fn default_quantity() -> i64 {
    1
}

impl Transaction {
    pub fn new(
        transaction_id: impl Into<String>,
        catalog_item_id: impl Into<String>,
        state: TransactionState,
    ) -> Self {
        Self {
            transaction_id: TransactionId::new(transaction_id),
            catalog_item_id: CatalogItemId::new(catalog_item_id),
            state,
            quantity: 1,
            original_transaction_id: None,
            error: None,
            transaction_date: None,
        }
    }

    pub fn with_quantity(mut self, quantity: i64) -> Self {
        self.quantity = quantity;
        self
    }

    pub fn with_original(mut self, original: impl Into<String>) -> Self {
        self.original_transaction_id = Some(TransactionId::new(original));
        self
    }

    pub fn with_error(mut self, error: StoreError) -> Self {
        self.error = Some(error);
        self
    }

    pub fn with_date(mut self, at: DateTime<Utc>) -> Self {
        self.transaction_date = Some(at);
        self
    }
}

// ---------------------------------------------------------------------------
// Catalog snapshot
// ---------------------------------------------------------------------------

/// Opaque snapshot of the catalog entry a purchase was started from.
/// Prices are carried as integer micros and never formatted here.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub catalog_item_id: CatalogItemId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price_micros: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub currency_code: Option<String>,
}

impl CatalogEntry {
    pub fn new(catalog_item_id: impl Into<String>) -> Self {
        Self {
            catalog_item_id: CatalogItemId::new(catalog_item_id),
            display_name: None,
            price_micros: None,
            currency_code: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Purchase (output record)
// ---------------------------------------------------------------------------

/// Output record handed to callers.
///
/// `needs_finish_transaction == true` means the engine withheld the
/// acknowledgment and the caller must pass `transaction` to
/// `finish_transaction` once content has been delivered.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Purchase {
    pub catalog_item_id: CatalogItemId,
    pub quantity: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub catalog_entry: Option<CatalogEntry>,
    pub transaction: Transaction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_transaction: Option<TransactionId>,
    pub needs_finish_transaction: bool,
}

impl Purchase {
    pub fn from_transaction(
        transaction: &Transaction,
        catalog_entry: Option<CatalogEntry>,
        needs_finish_transaction: bool,
    ) -> Self {
        Self {
            catalog_item_id: transaction.catalog_item_id.clone(),
            quantity: transaction.quantity,
            catalog_entry,
            transaction: transaction.clone(),
            original_transaction: transaction.original_transaction_id.clone(),
            needs_finish_transaction,
        }
    }

    pub fn transaction_id(&self) -> &TransactionId {
        &self.transaction.transaction_id
    }
}

// ---------------------------------------------------------------------------
// Outcomes
// ---------------------------------------------------------------------------

/// Result delivered to a direct-purchase callback.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PurchaseOutcome {
    /// `Purchased`, `Restored` or `Deferred`; inspect `purchase.transaction.state`.
    Success(Purchase),
    Failure {
        purchase: Purchase,
        error: TransactionError,
    },
}

impl PurchaseOutcome {
    pub fn purchase(&self) -> &Purchase {
        match self {
            Self::Success(p) => p,
            Self::Failure { purchase, .. } => purchase,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    /// `true` when the user cancelled, as opposed to a store failure.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Failure { error, .. } if error.is_cancelled())
    }
}

/// One entry accumulated by a restore session.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RestoreOutcome {
    Restored(Purchase),
    Failed(TransactionError),
}

/// Caller-friendly split of a restore session's outcomes.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RestoreResults {
    pub restored: Vec<Purchase>,
    /// The backend reports a restore failure for the whole sweep, not per
    /// item.
    pub failed: Vec<TransactionError>,
}

impl RestoreResults {
    pub fn from_outcomes(outcomes: Vec<RestoreOutcome>) -> Self {
        let mut results = Self::default();
        for outcome in outcomes {
            match outcome {
                RestoreOutcome::Restored(purchase) => results.restored.push(purchase),
                RestoreOutcome::Failed(error) => results.failed.push(error),
            }
        }
        results
    }

    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Queue boundary payloads
// ---------------------------------------------------------------------------

/// Purchase intent submitted to the store queue.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentRequest {
    pub catalog_item_id: CatalogItemId,
    pub quantity: i64,
}

/// A purchase the store itself proposes (promoted or started outside the app).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorePaymentRequest {
    pub catalog_item_id: CatalogItemId,
    #[serde(default = "default_quantity")]
    pub quantity: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub catalog_entry: Option<CatalogEntry>,
}
