//! iapq-core
//!
//! Transaction reconciliation engine for a store purchase queue.
//!
//! The store backend delivers batches of transaction notifications out of
//! band, possibly redundantly and interleaved across unrelated requests, and
//! redelivers anything not explicitly acknowledged. The engine pairs each
//! notification with the request that caused it, routes it to exactly one
//! consumer and makes sure every claimed transaction is acknowledged at most
//! once.
//!
//! Stage order is fixed:
//! 1. `payments`: direct purchases started through `start_payment`.
//! 2. `restore`: the single active restore session.
//! 3. `completion`: the catch-all completion subscriber.
//!
//! Pure logic, no IO. The only boundary is the [`StoreQueue`] trait.

mod completion;
mod error;
mod ledger;
mod orchestrator;
mod payments;
mod pipeline;
mod queue;
mod restore;
mod types;

pub use completion::{CompletionSubscriber, CompletionSubscription};
pub use error::{
    Admission, Rejection, ResidueReason, StoreError, StoreErrorCode, TransactionError,
    ValidationError, STORE_ERROR_DOMAIN,
};
pub use ledger::TransactionLedger;
pub use orchestrator::{
    EngineSnapshot, Orchestrator, ReconcilerSettings, ResidueEntry, StorePaymentPredicate,
};
pub use payments::{PaymentRegistry, PendingPayment};
pub use pipeline::{
    BatchEffects, Claim, CompletionCallback, Dispatch, PaymentCallback, RestoreCallback, Stage,
};
pub use queue::{StoreQueue, TransactionObserver};
pub use restore::{RestoreManager, RestoreSession};
pub use types::{
    CatalogEntry, CatalogItemId, PaymentRequest, Purchase, PurchaseOutcome, RestoreOutcome,
    RestoreResults, StorePaymentRequest, Transaction, TransactionId, TransactionState,
};
