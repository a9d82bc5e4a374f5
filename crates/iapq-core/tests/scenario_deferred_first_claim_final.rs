//! Deferred transactions: the first claim is final.
//!
//! GREEN when:
//! - A `Deferred` update matches a pending payment once; the later
//!   `Purchased` update for the same id fires no second callback and no
//!   second acknowledgment.
//! - The same holds for a non-atomic completion subscription: the caller
//!   is handed the deferred purchase once and the later update is skipped.

use std::sync::{Arc, Mutex};

use iapq_core::{
    CompletionSubscription, Orchestrator, PendingPayment, Purchase, PurchaseOutcome,
    ReconcilerSettings, TransactionState,
};
use iapq_store_paper::{deferred, purchased, PaperStoreQueue};

#[test]
fn deferred_payment_is_not_rematched() {
    let queue = Arc::new(PaperStoreQueue::new());
    let engine = Orchestrator::new(Arc::clone(&queue), ReconcilerSettings::default());
    let outcomes: Arc<Mutex<Vec<PurchaseOutcome>>> = Arc::default();
    let sink = Arc::clone(&outcomes);
    engine
        .start_payment(PendingPayment::new("item.D", 1, move |o| {
            sink.lock().unwrap().push(o)
        }))
        .unwrap();

    queue.deliver(vec![deferred("w", "item.D")]);
    queue.deliver(vec![purchased("w", "item.D")]);

    let got = outcomes.lock().unwrap();
    assert_eq!(got.len(), 1, "one callback for the first claim only");
    assert!(got[0].is_success());
    assert_eq!(
        got[0].purchase().transaction.state,
        TransactionState::Deferred
    );
    assert_eq!(queue.ack_count("w"), 1, "payment claims acknowledge at once");
    assert!(queue.outstanding().is_empty());
    assert!(engine.unresolved_transactions().is_empty());
}

#[test]
fn deferred_completion_is_handed_over_once() {
    let queue = Arc::new(PaperStoreQueue::new());
    let engine = Orchestrator::new(Arc::clone(&queue), ReconcilerSettings::default());
    let batches: Arc<Mutex<Vec<Vec<Purchase>>>> = Arc::default();
    let sink = Arc::clone(&batches);
    engine.subscribe_completions(CompletionSubscription::new(move |p| {
        sink.lock().unwrap().push(p)
    }));

    queue.deliver(vec![deferred("w", "item.D")]);
    queue.deliver(vec![purchased("w", "item.D")]);

    let got = batches.lock().unwrap();
    assert_eq!(got.len(), 1, "later update must not reach the subscriber");
    assert_eq!(got[0].len(), 1);
    assert!(got[0][0].needs_finish_transaction);
    assert_eq!(queue.ack_count("w"), 0, "left for the caller");

    assert!(engine.finish_transaction(&got[0][0].transaction));
    assert_eq!(queue.ack_count("w"), 1);
    assert!(engine.snapshot().held.is_empty());
}
