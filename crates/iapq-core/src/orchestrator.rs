//! Reconciliation orchestrator.
//!
//! # Design
//!
//! The orchestrator is the only [`TransactionObserver`] registered with the
//! [`StoreQueue`]. It owns every piece of mutable engine state in one
//! `EngineState` behind a single mutex, and runs each delivered batch
//! through the fixed stage order:
//!
//! ```text
//! batch ─► dedupe / ledger filter ─► hold Purchasing
//!       ─► direct purchase ─► restore session ─► completion subscriber
//!       ─► unresolved residue (retained, reconsidered next batch)
//! ```
//!
//! Each pass produces a list of ids to acknowledge and a list of callback
//! dispatches. Both are applied only after the state lock is released, so a
//! callback may call straight back into the engine (start another payment,
//! re-issue a restore, finish a transaction) without deadlocking.
//!
//! # Exactly-once
//!
//! Every claimed id goes into the [`TransactionLedger`]. A redelivered id
//! that was already claimed is dropped before any stage sees it, and the
//! queue only ever receives the first acknowledgment of a given id, whether
//! it came from a stage or from [`Orchestrator::finish_transaction`].
//!
//! # Lifetime
//!
//! [`Orchestrator::new`] returns an `Arc`; the queue holds only a `Weak` to
//! it. Dropping the last `Arc` deregisters the observer.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, Weak};

use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::completion::{CompletionSubscriber, CompletionSubscription};
use crate::error::{Admission, Rejection, ResidueReason, StoreError, ValidationError};
use crate::ledger::TransactionLedger;
use crate::payments::{PaymentRegistry, PendingPayment};
use crate::pipeline::{BatchEffects, Dispatch};
use crate::queue::{StoreQueue, TransactionObserver};
use crate::restore::{RestoreManager, RestoreSession};
use crate::types::{
    CatalogItemId, PurchaseOutcome, RestoreResults, StorePaymentRequest, Transaction,
    TransactionId, TransactionState,
};

/// Decides whether a store-initiated payment may start.
pub type StorePaymentPredicate = Arc<dyn Fn(&StorePaymentRequest) -> bool + Send + Sync>;

// ---------------------------------------------------------------------------
// Settings
// ---------------------------------------------------------------------------

/// Construction-time engine settings.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ReconcilerSettings {
    /// Answer for store-initiated payments when no predicate is installed.
    pub allow_store_payments: bool,
}

// ---------------------------------------------------------------------------
// EngineState
// ---------------------------------------------------------------------------

/// All mutable engine state. Only ever touched under the orchestrator's
/// mutex.
#[derive(Debug, Default)]
struct EngineState {
    payments: PaymentRegistry,
    restore: RestoreManager,
    completions: CompletionSubscriber,
    ledger: TransactionLedger,
    held: BTreeMap<TransactionId, Transaction>,
    unresolved: Vec<Transaction>,
}

/// What one pass decided, applied after the lock is dropped.
struct Pass {
    acknowledge: Vec<TransactionId>,
    dispatches: Vec<Dispatch>,
}

impl EngineState {
    fn reconcile(&mut self, incoming: Vec<Transaction>) -> Pass {
        // Retained residue first, then the new delivery. A later delivery of
        // the same id replaces the earlier snapshot in place.
        let mut merged: Vec<Transaction> =
            Vec::with_capacity(self.unresolved.len() + incoming.len());
        let mut index: HashMap<TransactionId, usize> = HashMap::new();
        for txn in self.unresolved.drain(..).chain(incoming) {
            match index.get(&txn.transaction_id).copied() {
                Some(i) => merged[i] = txn,
                None => {
                    index.insert(txn.transaction_id.clone(), merged.len());
                    merged.push(txn);
                }
            }
        }

        let mut fresh = Vec::with_capacity(merged.len());
        for txn in merged {
            if self.ledger.is_claimed(&txn.transaction_id) {
                self.held.remove(&txn.transaction_id);
                warn!(
                    transaction_id = %txn.transaction_id,
                    state = %txn.state,
                    "redelivery of claimed transaction skipped"
                );
                continue;
            }
            if txn.state.is_transient() {
                debug!(
                    transaction_id = %txn.transaction_id,
                    catalog_item_id = %txn.catalog_item_id,
                    reason = %ResidueReason::InFlight,
                    "transaction held"
                );
                self.held.insert(txn.transaction_id.clone(), txn);
                continue;
            }
            self.held.remove(&txn.transaction_id);
            fresh.push(txn);
        }

        let mut effects = BatchEffects::new();
        let residue = self.payments.process_batch(fresh, &mut effects);
        let residue = self.restore.process_batch(residue, &mut effects);
        let residue = self.completions.process_batch(residue, &mut effects);

        for txn in &residue {
            warn!(
                transaction_id = %txn.transaction_id,
                catalog_item_id = %txn.catalog_item_id,
                state = %txn.state,
                reason = %ResidueReason::NoMatchingRequest,
                "unresolved transaction retained"
            );
        }
        self.unresolved = residue;

        let (claims, dispatches) = effects.into_parts();
        let mut acknowledge = Vec::new();
        for claim in claims {
            self.ledger.record_claim(&claim.transaction_id);
            if claim.acknowledge && self.ledger.acknowledge(&claim.transaction_id) {
                info!(
                    transaction_id = %claim.transaction_id,
                    stage = %claim.stage,
                    "transaction acknowledged"
                );
                acknowledge.push(claim.transaction_id);
            }
        }

        Pass {
            acknowledge,
            dispatches,
        }
    }
}

// ---------------------------------------------------------------------------
// Snapshot
// ---------------------------------------------------------------------------

/// One transaction still sitting in the engine.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResidueEntry {
    pub transaction_id: TransactionId,
    pub catalog_item_id: CatalogItemId,
    pub state: TransactionState,
    pub reason: ResidueReason,
}

impl ResidueEntry {
    fn new(txn: &Transaction, reason: ResidueReason) -> Self {
        Self {
            transaction_id: txn.transaction_id.clone(),
            catalog_item_id: txn.catalog_item_id.clone(),
            state: txn.state,
            reason,
        }
    }
}

/// Point-in-time view of the engine for logs and reports.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineSnapshot {
    pub pending_payments: usize,
    pub restore_active: bool,
    pub restore_accumulated: usize,
    pub subscribed: bool,
    pub claimed: usize,
    pub acknowledged: usize,
    pub held: Vec<ResidueEntry>,
    pub unresolved: Vec<ResidueEntry>,
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

pub struct Orchestrator<Q: StoreQueue + 'static> {
    queue: Arc<Q>,
    state: Mutex<EngineState>,
    store_payment_predicate: RwLock<Option<StorePaymentPredicate>>,
    settings: ReconcilerSettings,
    observer: Weak<dyn TransactionObserver>,
}

impl<Q: StoreQueue + 'static> Orchestrator<Q> {
    /// Build the engine and register it as the queue's observer.
    pub fn new(queue: Arc<Q>, settings: ReconcilerSettings) -> Arc<Self> {
        let engine = Arc::new_cyclic(|weak: &Weak<Self>| {
            let observer: Weak<dyn TransactionObserver> = weak.clone();
            Self {
                queue,
                state: Mutex::new(EngineState::default()),
                store_payment_predicate: RwLock::new(None),
                settings,
                observer,
            }
        });
        engine.queue.add_observer(engine.observer.clone());
        info!(
            allow_store_payments = settings.allow_store_payments,
            "reconciliation engine registered with store queue"
        );
        engine
    }

    pub fn queue(&self) -> &Arc<Q> {
        &self.queue
    }

    fn state(&self) -> MutexGuard<'_, EngineState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn apply(&self, pass: Pass) {
        for id in &pass.acknowledge {
            self.queue.acknowledge(id);
        }
        for d in pass.dispatches {
            d.fire();
        }
    }

    fn fire(dispatches: Vec<Dispatch>) {
        for d in dispatches {
            d.fire();
        }
    }

    // -- caller-facing ------------------------------------------------------

    /// Validate, register and enqueue a purchase. On a validation error
    /// neither the registry nor the queue is touched.
    pub fn start_payment(&self, payment: PendingPayment) -> Result<(), ValidationError> {
        if let Err(e) = payment.validate() {
            warn!(
                catalog_item_id = %payment.catalog_item_id,
                quantity = payment.quantity,
                error = %e,
                "payment rejected"
            );
            return Err(e);
        }
        let request = payment.request();
        self.state().payments.register(payment);
        info!(
            catalog_item_id = %request.catalog_item_id,
            quantity = request.quantity,
            "payment enqueued"
        );
        self.queue.enqueue(request);
        Ok(())
    }

    /// Begin a restore session. Rejected silently while one is active.
    pub fn restore(&self, session: RestoreSession) -> Admission {
        let app_user_name = session.app_user_name.clone();
        let admission = self.state().restore.begin(session);
        if admission.is_accepted() {
            self.queue.restore_completed(app_user_name.as_deref());
        }
        admission
    }

    /// Install the completion subscription. Set once.
    pub fn subscribe_completions(&self, subscription: CompletionSubscription) -> Admission {
        self.state().completions.subscribe(subscription)
    }

    /// Acknowledge a transaction the caller was handed with
    /// `needs_finish_transaction == true`. Returns `false` when nothing was
    /// sent to the queue: the id was already acknowledged, or the
    /// transaction is still `Purchasing`.
    pub fn finish_transaction(&self, transaction: &Transaction) -> bool {
        let id = &transaction.transaction_id;
        if transaction.state.is_transient() {
            warn!(transaction_id = %id, "refusing to finish a purchasing transaction");
            return false;
        }
        let first = {
            let mut state = self.state();
            state.ledger.record_claim(id);
            state.held.remove(id);
            state.unresolved.retain(|t| &t.transaction_id != id);
            state.ledger.acknowledge(id)
        };
        if !first {
            warn!(transaction_id = %id, "transaction already acknowledged; ignored");
            return false;
        }
        info!(transaction_id = %id, "transaction finished by caller");
        self.queue.acknowledge(id);
        true
    }

    /// Install the caller's store-initiated payment predicate, replacing any
    /// previous one.
    pub fn set_store_payment_predicate<F>(&self, predicate: F)
    where
        F: Fn(&StorePaymentRequest) -> bool + Send + Sync + 'static,
    {
        let mut slot = self
            .store_payment_predicate
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        *slot = Some(Arc::new(predicate));
    }

    pub fn can_make_payments(&self) -> bool {
        self.queue.can_make_payments()
    }

    pub fn can_restore_session(&self) -> bool {
        !self.state().restore.is_active()
    }

    pub fn can_subscribe(&self) -> bool {
        !self.state().completions.is_subscribed()
    }

    // -- channel adapters ---------------------------------------------------

    /// [`Orchestrator::start_payment`] with the outcome delivered on a
    /// oneshot channel instead of a callback.
    pub fn purchase(
        &self,
        catalog_item_id: impl Into<String>,
        quantity: i64,
        needs_content_download: bool,
    ) -> Result<oneshot::Receiver<PurchaseOutcome>, ValidationError> {
        let (tx, rx) = oneshot::channel();
        let payment = PendingPayment::new(catalog_item_id, quantity, move |outcome| {
            let _ = tx.send(outcome);
        })
        .with_content_download(needs_content_download);
        self.start_payment(payment)?;
        Ok(rx)
    }

    /// [`Orchestrator::restore`] with the summarised results delivered on a
    /// oneshot channel.
    pub fn restore_purchases(
        &self,
        atomically: bool,
        app_user_name: Option<String>,
    ) -> Result<oneshot::Receiver<RestoreResults>, Rejection> {
        let (tx, rx) = oneshot::channel();
        let mut session = RestoreSession::new(atomically, move |outcomes| {
            let _ = tx.send(RestoreResults::from_outcomes(outcomes));
        });
        if let Some(name) = app_user_name {
            session = session.with_app_user_name(name);
        }
        match self.restore(session) {
            Admission::Accepted => Ok(rx),
            Admission::Rejected(r) => Err(r),
        }
    }

    // -- diagnostics --------------------------------------------------------

    pub fn pending_payment_count(&self) -> usize {
        self.state().payments.len()
    }

    pub fn held_transactions(&self) -> Vec<Transaction> {
        self.state().held.values().cloned().collect()
    }

    pub fn unresolved_transactions(&self) -> Vec<Transaction> {
        self.state().unresolved.clone()
    }

    pub fn snapshot(&self) -> EngineSnapshot {
        let state = self.state();
        EngineSnapshot {
            pending_payments: state.payments.len(),
            restore_active: state.restore.is_active(),
            restore_accumulated: state
                .restore
                .session()
                .map_or(0, |s| s.accumulated().len()),
            subscribed: state.completions.is_subscribed(),
            claimed: state.ledger.claimed_count(),
            acknowledged: state.ledger.acknowledged_count(),
            held: state
                .held
                .values()
                .map(|t| ResidueEntry::new(t, ResidueReason::InFlight))
                .collect(),
            unresolved: state
                .unresolved
                .iter()
                .map(|t| ResidueEntry::new(t, ResidueReason::NoMatchingRequest))
                .collect(),
        }
    }
}

impl<Q: StoreQueue + 'static> TransactionObserver for Orchestrator<Q> {
    fn on_batch(&self, transactions: Vec<Transaction>) {
        debug!(count = transactions.len(), "batch received");
        let pass = self.state().reconcile(transactions);
        self.apply(pass);
    }

    fn on_restore_finished(&self) {
        let mut effects = BatchEffects::new();
        self.state().restore.finish(&mut effects);
        Self::fire(effects.into_parts().1);
    }

    fn on_restore_failed(&self, error: StoreError) {
        let mut effects = BatchEffects::new();
        self.state().restore.fail(error, &mut effects);
        Self::fire(effects.into_parts().1);
    }

    fn should_add_store_payment(&self, request: &StorePaymentRequest) -> bool {
        let predicate = self
            .store_payment_predicate
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        let allow = match predicate {
            Some(p) => p(request),
            None => self.settings.allow_store_payments,
        };
        info!(
            catalog_item_id = %request.catalog_item_id,
            allow,
            "store-initiated payment decided"
        );
        allow
    }
}

impl<Q: StoreQueue + 'static> Drop for Orchestrator<Q> {
    fn drop(&mut self) {
        self.queue.remove_observer(&self.observer);
        debug!("reconciliation engine deregistered from store queue");
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
