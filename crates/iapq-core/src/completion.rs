//! Generic completion subscriber.
//!
//! Catch-all sink for transactions that neither a pending payment nor the
//! restore session claimed. Typical sources are purchases started on a
//! previous launch, purchases made on another device and store-initiated
//! purchases.
//!
//! Without a subscription this stage claims nothing. With one, every
//! non-`Purchasing` transaction becomes a [`Purchase`], and the whole batch
//! is delivered through a single callback invocation.
//!
//! In the default non-atomic mode only `Failed` transactions are finished
//! right away; everything else is handed over with
//! `needs_finish_transaction == true` so the caller acknowledges after
//! delivering content. An atomic subscription finishes everything itself.

use std::fmt;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::error::{Admission, Rejection};
use crate::pipeline::{BatchEffects, CompletionCallback, Dispatch, Stage};
use crate::types::{Purchase, Transaction, TransactionState};

/// Long-lived subscription for unclaimed completions.
#[derive(Clone)]
pub struct CompletionSubscription {
    pub atomically: bool,
    callback: CompletionCallback,
}

impl CompletionSubscription {
    pub fn new<F>(callback: F) -> Self
    where
        F: Fn(Vec<Purchase>) + Send + Sync + 'static,
    {
        Self {
            atomically: false,
            callback: Arc::new(callback),
        }
    }

    pub fn atomically(mut self, atomically: bool) -> Self {
        self.atomically = atomically;
        self
    }

    fn needs_finish(&self, state: TransactionState) -> bool {
        !self.atomically && state != TransactionState::Failed
    }
}

impl fmt::Debug for CompletionSubscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompletionSubscription")
            .field("atomically", &self.atomically)
            .finish_non_exhaustive()
    }
}

/// Singleton slot for the completion subscription. Set once.
#[derive(Debug, Default)]
pub struct CompletionSubscriber {
    subscription: Option<CompletionSubscription>,
}

impl CompletionSubscriber {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_subscribed(&self) -> bool {
        self.subscription.is_some()
    }

    pub fn subscribe(&mut self, subscription: CompletionSubscription) -> Admission {
        if self.subscription.is_some() {
            warn!("completion subscription already set; ignored");
            return Admission::Rejected(Rejection::SubscriptionAlreadySet);
        }
        info!(
            atomically = subscription.atomically,
            "completion subscription set"
        );
        self.subscription = Some(subscription);
        Admission::Accepted
    }

    pub fn process_batch(
        &mut self,
        transactions: Vec<Transaction>,
        effects: &mut BatchEffects,
    ) -> Vec<Transaction> {
        let Some(sub) = self.subscription.as_ref() else {
            if !transactions.is_empty() {
                debug!(
                    count = transactions.len(),
                    "no completion subscription; passing through"
                );
            }
            return transactions;
        };

        let mut residue = Vec::new();
        let mut purchases = Vec::new();
        for txn in transactions {
            if txn.state.is_transient() {
                residue.push(txn);
                continue;
            }
            let needs_finish = sub.needs_finish(txn.state);
            debug!(
                transaction_id = %txn.transaction_id,
                state = %txn.state,
                needs_finish,
                "completion claimed"
            );
            effects.claim(&txn.transaction_id, Stage::Completion, !needs_finish);
            purchases.push(Purchase::from_transaction(&txn, None, needs_finish));
        }

        if !purchases.is_empty() {
            effects.dispatch(Dispatch::Completions {
                callback: Arc::clone(&sub.callback),
                purchases,
            });
        }
        residue
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    type Seen = Arc<Mutex<Vec<Vec<Purchase>>>>;

    fn subscription(seen: &Seen) -> CompletionSubscription {
        let seen = Arc::clone(seen);
        CompletionSubscription::new(move |p| seen.lock().unwrap().push(p))
    }

    fn mixed() -> Vec<Transaction> {
        vec![
            Transaction::new("x", "item.X", TransactionState::Purchased),
            Transaction::new("y", "item.Y", TransactionState::Failed),
            Transaction::new("w", "item.W", TransactionState::Deferred),
            Transaction::new("v", "item.V", TransactionState::Purchasing),
        ]
    }

    #[test]
    fn non_atomic_defers_everything_but_failures() {
        let seen: Seen = Arc::default();
        let mut sub = CompletionSubscriber::new();
        sub.subscribe(subscription(&seen));

        let mut fx = BatchEffects::new();
        let residue = sub.process_batch(mixed(), &mut fx);
        assert_eq!(residue.len(), 1, "purchasing is residue");

        let acks: Vec<_> = fx.acknowledgments().map(|id| id.as_str().to_string()).collect();
        assert_eq!(acks, vec!["y".to_string()]);
        assert_eq!(fx.dispatch_count(), 1, "one callback per batch");
        fx.fire_all();

        let seen = seen.lock().unwrap();
        let flags: Vec<_> = seen[0]
            .iter()
            .map(|p| (p.transaction_id().as_str(), p.needs_finish_transaction))
            .collect();
        assert_eq!(flags, vec![("x", true), ("y", false), ("w", true)]);
    }

    #[test]
    fn atomic_acks_everything() {
        let seen: Seen = Arc::default();
        let mut sub = CompletionSubscriber::new();
        sub.subscribe(subscription(&seen).atomically(true));

        let mut fx = BatchEffects::new();
        sub.process_batch(mixed(), &mut fx);
        assert_eq!(fx.acknowledgments().count(), 3);
        fx.fire_all();
        assert!(seen.lock().unwrap()[0]
            .iter()
            .all(|p| !p.needs_finish_transaction));
    }

    #[test]
    fn second_subscription_is_rejected() {
        let seen: Seen = Arc::default();
        let mut sub = CompletionSubscriber::new();
        assert!(sub.subscribe(subscription(&seen)).is_accepted());
        assert_eq!(
            sub.subscribe(CompletionSubscription::new(|_| {})),
            Admission::Rejected(Rejection::SubscriptionAlreadySet)
        );
    }

    #[test]
    fn no_callback_for_purchasing_only_batch() {
        let seen: Seen = Arc::default();
        let mut sub = CompletionSubscriber::new();
        sub.subscribe(subscription(&seen));

        let mut fx = BatchEffects::new();
        let residue = sub.process_batch(
            vec![Transaction::new("v", "item.V", TransactionState::Purchasing)],
            &mut fx,
        );
        assert_eq!(residue.len(), 1);
        assert_eq!(fx.dispatch_count(), 0);
    }
}
