//! Pending payment registry and direct-purchase matcher.
//!
//! # Contract
//!
//! 1. [`PaymentRegistry::register`] appends a [`PendingPayment`] to the FIFO
//!    for its catalog item.
//! 2. [`PaymentRegistry::process_batch`] pairs each non-`Purchasing`
//!    transaction with the **earliest** payment still registered for the same
//!    catalog item. The payment is popped before anything else happens, so a
//!    callback can never be matched twice.
//! 3. Every match is acknowledged immediately (`needs_finish_transaction` is
//!    always `false` on this path) and produces exactly one callback dispatch.
//!
//! Unmatched transactions and all `Purchasing` transactions are returned
//! unchanged as residue. Matching is final: nothing a later stage does puts
//! a payment back.
//!
//! Payments have no timeout. They live until matched or until the process
//! exits.

use std::collections::{BTreeMap, VecDeque};
use std::fmt;

use tracing::{debug, info};

use crate::error::{TransactionError, ValidationError};
use crate::pipeline::{BatchEffects, Dispatch, PaymentCallback, Stage};
use crate::types::{
    CatalogEntry, CatalogItemId, PaymentRequest, Purchase, PurchaseOutcome, Transaction,
    TransactionState,
};

// ---------------------------------------------------------------------------
// PendingPayment
// ---------------------------------------------------------------------------

/// A purchase the caller started and is waiting on.
pub struct PendingPayment {
    pub catalog_item_id: CatalogItemId,
    pub quantity: i64,
    pub needs_content_download: bool,
    pub catalog_entry: Option<CatalogEntry>,
    on_result: PaymentCallback,
}

impl PendingPayment {
    pub fn new<F>(catalog_item_id: impl Into<String>, quantity: i64, on_result: F) -> Self
    where
        F: FnOnce(PurchaseOutcome) + Send + 'static,
    {
        Self {
            catalog_item_id: CatalogItemId::new(catalog_item_id),
            quantity,
            needs_content_download: false,
            catalog_entry: None,
            on_result: Box::new(on_result),
        }
    }

    pub fn with_content_download(mut self, needs_content_download: bool) -> Self {
        self.needs_content_download = needs_content_download;
        self
    }

    pub fn with_catalog_entry(mut self, entry: CatalogEntry) -> Self {
        self.catalog_entry = Some(entry);
        self
    }

    /// Checks applied before the payment may touch the registry or queue.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.catalog_item_id.as_str().trim().is_empty() {
            return Err(ValidationError::EmptyCatalogItemId);
        }
        if self.quantity <= 0 {
            return Err(ValidationError::NonPositiveQuantity {
                quantity: self.quantity,
            });
        }
        Ok(())
    }

    pub fn request(&self) -> PaymentRequest {
        PaymentRequest {
            catalog_item_id: self.catalog_item_id.clone(),
            quantity: self.quantity,
        }
    }
}

impl fmt::Debug for PendingPayment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingPayment")
            .field("catalog_item_id", &self.catalog_item_id)
            .field("quantity", &self.quantity)
            .field("needs_content_download", &self.needs_content_download)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// PaymentRegistry
// ---------------------------------------------------------------------------

/// Outstanding payments, FIFO per catalog item.
#[derive(Debug, Default)]
pub struct PaymentRegistry {
    pending: BTreeMap<CatalogItemId, VecDeque<PendingPayment>>,
}

impl PaymentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, payment: PendingPayment) {
        debug!(
            catalog_item_id = %payment.catalog_item_id,
            quantity = payment.quantity,
            needs_content_download = payment.needs_content_download,
            "payment registered"
        );
        self.pending
            .entry(payment.catalog_item_id.clone())
            .or_default()
            .push_back(payment);
    }

    /// Total number of payments still waiting.
    pub fn len(&self) -> usize {
        self.pending.values().map(VecDeque::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn pending_for(&self, catalog_item_id: &CatalogItemId) -> usize {
        self.pending.get(catalog_item_id).map_or(0, VecDeque::len)
    }

    // Pops the earliest payment for `id` and drops the emptied FIFO so the
    // map stays bounded by live payments.
    fn take_earliest(&mut self, id: &CatalogItemId) -> Option<PendingPayment> {
        let queue = self.pending.get_mut(id)?;
        let payment = queue.pop_front();
        if queue.is_empty() {
            self.pending.remove(id);
        }
        payment
    }

    /// Match a batch against registered payments. Returns the residue.
    pub fn process_batch(
        &mut self,
        transactions: Vec<Transaction>,
        effects: &mut BatchEffects,
    ) -> Vec<Transaction> {
        let mut residue = Vec::new();

        for txn in transactions {
            if txn.state.is_transient() {
                residue.push(txn);
                continue;
            }
            let Some(payment) = self.take_earliest(&txn.catalog_item_id) else {
                residue.push(txn);
                continue;
            };

            let purchase = Purchase::from_transaction(&txn, payment.catalog_entry, false);
            // Purchased, Restored and Deferred all resolve the payment.
            let outcome = if txn.state == TransactionState::Failed {
                PurchaseOutcome::Failure {
                    purchase,
                    error: TransactionError::from_failed(txn.error.as_ref()),
                }
            } else {
                PurchaseOutcome::Success(purchase)
            };

            info!(
                transaction_id = %txn.transaction_id,
                catalog_item_id = %txn.catalog_item_id,
                state = %txn.state,
                cancelled = outcome.is_cancelled(),
                "direct purchase matched"
            );

            effects.claim(&txn.transaction_id, Stage::DirectPurchase, true);
            effects.dispatch(Dispatch::Payment {
                callback: payment.on_result,
                outcome,
            });
        }

        residue
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;
    use std::sync::{Arc, Mutex};

    type Seen = Arc<Mutex<Vec<PurchaseOutcome>>>;

    fn recording(item: &str, seen: &Seen) -> PendingPayment {
        let seen = Arc::clone(seen);
        PendingPayment::new(item, 1, move |o| seen.lock().unwrap().push(o))
    }

    #[test]
    fn validation_rejects_zero_and_negative_quantity() {
        let zero = PendingPayment::new("item.A", 0, |_| {});
        assert_eq!(
            zero.validate(),
            Err(ValidationError::NonPositiveQuantity { quantity: 0 })
        );
        let neg = PendingPayment::new("item.A", -3, |_| {});
        assert!(neg.validate().is_err());
        let blank = PendingPayment::new("  ", 1, |_| {});
        assert_eq!(blank.validate(), Err(ValidationError::EmptyCatalogItemId));
    }

    #[test]
    fn purchased_matches_and_empties_registry() {
        let seen: Seen = Arc::default();
        let mut reg = PaymentRegistry::new();
        reg.register(recording("item.A", &seen));

        let mut fx = BatchEffects::new();
        let residue = reg.process_batch(
            vec![Transaction::new("t1", "item.A", TransactionState::Purchased)],
            &mut fx,
        );

        assert!(residue.is_empty());
        assert!(reg.is_empty(), "payment must be removed before dispatch");
        assert_eq!(fx.acknowledgments().count(), 1);
        fx.fire_all();

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert!(seen[0].is_success());
        assert!(!seen[0].purchase().needs_finish_transaction);
    }

    #[test]
    fn fifo_per_catalog_item() {
        let seen: Seen = Arc::default();
        let mut reg = PaymentRegistry::new();
        let first = Arc::clone(&seen);
        reg.register(PendingPayment::new("item.A", 1, move |o| {
            first.lock().unwrap().push(o)
        }));
        reg.register(PendingPayment::new("item.A", 2, |_| {
            panic!("second payment must not match a single transaction")
        }));

        let mut fx = BatchEffects::new();
        reg.process_batch(
            vec![Transaction::new("t1", "item.A", TransactionState::Purchased)],
            &mut fx,
        );
        fx.fire_all();

        assert_eq!(seen.lock().unwrap().len(), 1);
        assert_eq!(reg.pending_for(&CatalogItemId::from("item.A")), 1);
    }

    #[test]
    fn failed_cancellation_surfaces_distinct_signal() {
        let seen: Seen = Arc::default();
        let mut reg = PaymentRegistry::new();
        reg.register(recording("item.B", &seen));

        let mut fx = BatchEffects::new();
        reg.process_batch(
            vec![Transaction::new("t2", "item.B", TransactionState::Failed)
                .with_error(StoreError::cancelled())],
            &mut fx,
        );
        assert_eq!(fx.acknowledgments().count(), 1, "failures are finished too");
        fx.fire_all();

        let seen = seen.lock().unwrap();
        assert!(seen[0].is_cancelled());
    }

    #[test]
    fn purchasing_and_unmatched_pass_through() {
        let seen: Seen = Arc::default();
        let mut reg = PaymentRegistry::new();
        reg.register(recording("item.A", &seen));

        let mut fx = BatchEffects::new();
        let residue = reg.process_batch(
            vec![
                Transaction::new("t1", "item.A", TransactionState::Purchasing),
                Transaction::new("t2", "item.Z", TransactionState::Purchased),
            ],
            &mut fx,
        );

        assert_eq!(residue.len(), 2);
        assert!(fx.claims().is_empty());
        assert_eq!(reg.len(), 1, "purchasing must not consume the payment");
    }

    #[test]
    fn deferred_counts_as_success() {
        let seen: Seen = Arc::default();
        let mut reg = PaymentRegistry::new();
        reg.register(recording("item.D", &seen));

        let mut fx = BatchEffects::new();
        reg.process_batch(
            vec![Transaction::new("t3", "item.D", TransactionState::Deferred)],
            &mut fx,
        );
        fx.fire_all();

        let seen = seen.lock().unwrap();
        assert!(seen[0].is_success());
        assert_eq!(
            seen[0].purchase().transaction.state,
            TransactionState::Deferred
        );
    }
}
