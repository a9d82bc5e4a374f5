//! Store queue boundary.
//!
//! [`StoreQueue`] is what the engine consumes: the backend connection that
//! accepts purchase intents and acknowledgments. [`TransactionObserver`] is
//! what the backend calls back into. Real connections, paper queues and test
//! mocks implement `StoreQueue`; the orchestrator is the only production
//! `TransactionObserver`.
//!
//! Observers are held as `Weak` so the queue never keeps the engine alive and
//! the engine can hold an `Arc` to the queue without a cycle.

use std::sync::Weak;

use crate::error::StoreError;
use crate::types::{PaymentRequest, StorePaymentRequest, Transaction, TransactionId};

/// External store connection consumed by the engine.
pub trait StoreQueue: Send + Sync {
    fn add_observer(&self, observer: Weak<dyn TransactionObserver>);

    /// Removes a previously added observer; unknown observers are ignored.
    fn remove_observer(&self, observer: &Weak<dyn TransactionObserver>);

    /// Submit a new purchase intent to the backend.
    fn enqueue(&self, request: PaymentRequest);

    /// Tell the backend a transaction is fully handled ("finish").
    fn acknowledge(&self, transaction_id: &TransactionId);

    /// Start a restoration sweep. Completion arrives through
    /// [`TransactionObserver::on_restore_finished`] or
    /// [`TransactionObserver::on_restore_failed`].
    fn restore_completed(&self, app_user_name: Option<&str>);

    /// Whether the device/account may make payments at all.
    fn can_make_payments(&self) -> bool {
        true
    }
}

/// Notifications delivered by the backend. Batches arrive serially.
pub trait TransactionObserver: Send + Sync {
    fn on_batch(&self, transactions: Vec<Transaction>);

    fn on_restore_finished(&self);

    fn on_restore_failed(&self, error: StoreError);

    /// Store-initiated purchase: return `true` to let it start now.
    fn should_add_store_payment(&self, request: &StorePaymentRequest) -> bool;
}
