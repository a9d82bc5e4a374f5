//! Deterministic in-memory "paper" store queue.
//!
//! Design decisions (kept simple and deterministic):
//! - Nothing is delivered on its own. Tests and the scenario runner push
//!   batches explicitly with [`PaperStoreQueue::deliver`].
//! - Generated transaction ids are sequential: "paper:txn:000001", ...
//! - Every acknowledgment is counted per id, so double-acks are visible
//!   instead of being absorbed like the real backend does.
//! - Delivered transactions stay outstanding until acknowledged.
//!   [`PaperStoreQueue::relaunch`] redelivers all of them in id order, which
//!   is what the backend does on the next app launch.
//! - Observer callbacks run with no internal lock held.
//! - No randomness. No timestamps.

use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use iapq_core::{
    PaymentRequest, StoreError, StorePaymentRequest, StoreQueue, Transaction, TransactionId,
    TransactionObserver, TransactionState,
};
use tracing::{debug, info};

#[derive(Debug, Default)]
struct PaperState {
    next_seq: u64,
    enqueued: Vec<PaymentRequest>,
    unsettled: VecDeque<PaymentRequest>,
    acks: BTreeMap<TransactionId, u32>,
    restore_requests: Vec<Option<String>>,
    outstanding: BTreeMap<TransactionId, Transaction>,
}

pub struct PaperStoreQueue {
    state: Mutex<PaperState>,
    observers: Mutex<Vec<Weak<dyn TransactionObserver>>>,
    can_make_payments: AtomicBool,
}

impl Default for PaperStoreQueue {
    fn default() -> Self {
        Self {
            state: Mutex::new(PaperState::default()),
            observers: Mutex::new(Vec::new()),
            can_make_payments: AtomicBool::new(true),
        }
    }
}

impl PaperStoreQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, PaperState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Live observers, pruning dropped ones. The lock is released before
    /// the caller uses the returned handles.
    fn live_observers(&self) -> Vec<Arc<dyn TransactionObserver>> {
        let mut observers = self
            .observers
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        observers.retain(|o| o.strong_count() > 0);
        observers.iter().filter_map(Weak::upgrade).collect()
    }

    // -- driving the observer ----------------------------------------------

    /// Deliver one batch to every observer.
    pub fn deliver(&self, batch: Vec<Transaction>) {
        {
            let mut st = self.state();
            for txn in &batch {
                if !st.acks.contains_key(&txn.transaction_id) {
                    st.outstanding
                        .insert(txn.transaction_id.clone(), txn.clone());
                }
            }
        }
        debug!(count = batch.len(), "paper batch delivered");
        for obs in self.live_observers() {
            obs.on_batch(batch.clone());
        }
    }

    /// Settle the earliest enqueued payment that has not been settled yet by
    /// delivering a transaction for it in `state`. Returns the delivered
    /// transaction, or `None` if nothing is waiting.
    pub fn settle_next(
        &self,
        state: TransactionState,
        error: Option<StoreError>,
    ) -> Option<Transaction> {
        let txn = {
            let mut st = self.state();
            let request = st.unsettled.pop_front()?;
            st.next_seq += 1;
            let mut txn = Transaction::new(
                format!("paper:txn:{:06}", st.next_seq),
                request.catalog_item_id.as_str(),
                state,
            )
            .with_quantity(request.quantity);
            txn.error = error;
            txn
        };
        self.deliver(vec![txn.clone()]);
        Some(txn)
    }

    pub fn finish_restore(&self) {
        info!("paper restore finished");
        for obs in self.live_observers() {
            obs.on_restore_finished();
        }
    }

    pub fn fail_restore(&self, error: StoreError) {
        info!(error = %error, "paper restore failed");
        for obs in self.live_observers() {
            obs.on_restore_failed(error.clone());
        }
    }

    /// Ask the observers whether a store-initiated payment may start. The
    /// first observer's answer wins; with no observer the answer is `false`.
    /// An allowed payment is enqueued like any other.
    pub fn propose_store_payment(&self, request: StorePaymentRequest) -> bool {
        let allow = self
            .live_observers()
            .first()
            .is_some_and(|o| o.should_add_store_payment(&request));
        if allow {
            self.enqueue(PaymentRequest {
                catalog_item_id: request.catalog_item_id,
                quantity: request.quantity,
            });
        }
        allow
    }

    /// Redeliver every delivered-but-unacknowledged transaction as one batch.
    /// Returns how many were redelivered.
    pub fn relaunch(&self) -> usize {
        let batch: Vec<Transaction> = self.state().outstanding.values().cloned().collect();
        let n = batch.len();
        info!(redelivered = n, "paper queue relaunched");
        if n > 0 {
            for obs in self.live_observers() {
                obs.on_batch(batch.clone());
            }
        }
        n
    }

    pub fn set_can_make_payments(&self, allowed: bool) {
        self.can_make_payments.store(allowed, Ordering::SeqCst);
    }

    // -- inspection ---------------------------------------------------------

    pub fn enqueued(&self) -> Vec<PaymentRequest> {
        self.state().enqueued.clone()
    }

    /// Acknowledgment count per transaction id.
    pub fn acknowledgments(&self) -> BTreeMap<TransactionId, u32> {
        self.state().acks.clone()
    }

    pub fn ack_count(&self, id: &str) -> u32 {
        self.state()
            .acks
            .get(&TransactionId::from(id))
            .copied()
            .unwrap_or(0)
    }

    pub fn total_acks(&self) -> u32 {
        self.state().acks.values().sum()
    }

    pub fn restore_requests(&self) -> Vec<Option<String>> {
        self.state().restore_requests.clone()
    }

    /// Delivered and not yet acknowledged, in id order.
    pub fn outstanding(&self) -> Vec<Transaction> {
        self.state().outstanding.values().cloned().collect()
    }

    pub fn observer_count(&self) -> usize {
        self.live_observers().len()
    }
}

impl StoreQueue for PaperStoreQueue {
    fn add_observer(&self, observer: Weak<dyn TransactionObserver>) {
        self.observers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(observer);
    }

    fn remove_observer(&self, observer: &Weak<dyn TransactionObserver>) {
        self.observers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|o| !Weak::ptr_eq(o, observer));
    }

    fn enqueue(&self, request: PaymentRequest) {
        debug!(
            catalog_item_id = %request.catalog_item_id,
            quantity = request.quantity,
            "paper enqueue"
        );
        let mut st = self.state();
        st.enqueued.push(request.clone());
        st.unsettled.push_back(request);
    }

    fn acknowledge(&self, transaction_id: &TransactionId) {
        let mut st = self.state();
        st.outstanding.remove(transaction_id);
        *st.acks.entry(transaction_id.clone()).or_insert(0) += 1;
    }

    fn restore_completed(&self, app_user_name: Option<&str>) {
        self.state()
            .restore_requests
            .push(app_user_name.map(str::to_string));
    }

    fn can_make_payments(&self) -> bool {
        self.can_make_payments.load(Ordering::SeqCst)
    }
}

// ---------------------------------------------------------------------------
// Convenience constructors for tests and scenarios
// ---------------------------------------------------------------------------

pub fn purchasing(id: impl Into<String>, item: impl Into<String>) -> Transaction {
    Transaction::new(id, item, TransactionState::Purchasing)
}

pub fn purchased(id: impl Into<String>, item: impl Into<String>) -> Transaction {
    Transaction::new(id, item, TransactionState::Purchased)
}

pub fn failed(id: impl Into<String>, item: impl Into<String>, error: StoreError) -> Transaction {
    Transaction::new(id, item, TransactionState::Failed).with_error(error)
}

pub fn restored(
    id: impl Into<String>,
    item: impl Into<String>,
    original: impl Into<String>,
) -> Transaction {
    Transaction::new(id, item, TransactionState::Restored).with_original(original)
}

pub fn deferred(id: impl Into<String>, item: impl Into<String>) -> Transaction {
    Transaction::new(id, item, TransactionState::Deferred)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Counter {
        batches: Mutex<Vec<usize>>,
        finished: Mutex<u32>,
    }

    impl TransactionObserver for Counter {
        fn on_batch(&self, transactions: Vec<Transaction>) {
            self.batches.lock().unwrap().push(transactions.len());
        }
        fn on_restore_finished(&self) {
            *self.finished.lock().unwrap() += 1;
        }
        fn on_restore_failed(&self, _error: StoreError) {}
        fn should_add_store_payment(&self, request: &StorePaymentRequest) -> bool {
            request.catalog_item_id.as_str() == "promo"
        }
    }

    fn observed() -> (PaperStoreQueue, Arc<Counter>) {
        let q = PaperStoreQueue::new();
        let c = Arc::new(Counter::default());
        let obs: Arc<dyn TransactionObserver> = c.clone();
        q.add_observer(Arc::downgrade(&obs));
        (q, c)
    }

    #[test]
    fn acks_are_counted_per_id() {
        let q = PaperStoreQueue::new();
        let id = TransactionId::from("t1");
        q.acknowledge(&id);
        q.acknowledge(&id);
        assert_eq!(q.ack_count("t1"), 2);
        assert_eq!(q.total_acks(), 2);
    }

    #[test]
    fn relaunch_redelivers_only_unacknowledged() {
        let (q, c) = observed();
        q.deliver(vec![purchased("a", "item.A"), purchased("b", "item.B")]);
        q.acknowledge(&TransactionId::from("a"));

        assert_eq!(q.relaunch(), 1);
        assert_eq!(*c.batches.lock().unwrap(), vec![2, 1]);
        assert_eq!(q.outstanding()[0].transaction_id.as_str(), "b");
    }

    #[test]
    fn settle_next_uses_sequential_ids() {
        let (q, _c) = observed();
        q.enqueue(PaymentRequest {
            catalog_item_id: "item.A".into(),
            quantity: 2,
        });
        let txn = q
            .settle_next(TransactionState::Purchased, None)
            .expect("one enqueued payment");
        assert_eq!(txn.transaction_id.as_str(), "paper:txn:000001");
        assert_eq!(txn.quantity, 2);
        assert!(q.settle_next(TransactionState::Purchased, None).is_none());
    }

    #[test]
    fn store_payment_enqueued_only_when_allowed() {
        let (q, _c) = observed();
        let promo = StorePaymentRequest {
            catalog_item_id: "promo".into(),
            quantity: 1,
            catalog_entry: None,
        };
        let other = StorePaymentRequest {
            catalog_item_id: "other".into(),
            ..promo.clone()
        };
        assert!(q.propose_store_payment(promo));
        assert!(!q.propose_store_payment(other));
        assert_eq!(q.enqueued().len(), 1);
    }

    #[test]
    fn dropped_observer_is_pruned() {
        let (q, c) = observed();
        assert_eq!(q.observer_count(), 1);
        drop(c);
        q.finish_restore();
        assert_eq!(q.observer_count(), 0);
    }
}
