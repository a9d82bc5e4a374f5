//! Invalid payment requests never reach the registry or the queue.

use std::sync::Arc;

use iapq_core::{Orchestrator, PendingPayment, ReconcilerSettings, ValidationError};
use iapq_store_paper::PaperStoreQueue;

#[test]
fn invalid_requests_touch_nothing() {
    let queue = Arc::new(PaperStoreQueue::new());
    let engine = Orchestrator::new(Arc::clone(&queue), ReconcilerSettings::default());

    let zero = engine.start_payment(PendingPayment::new("item.A", 0, |_| {
        panic!("callback must not fire for a rejected payment")
    }));
    assert_eq!(
        zero,
        Err(ValidationError::NonPositiveQuantity { quantity: 0 })
    );

    let negative = engine.start_payment(PendingPayment::new("item.A", -3, |_| {}));
    assert!(matches!(
        negative,
        Err(ValidationError::NonPositiveQuantity { quantity: -3 })
    ));

    let blank = engine.start_payment(PendingPayment::new("  ", 1, |_| {}));
    assert_eq!(blank, Err(ValidationError::EmptyCatalogItemId));

    assert_eq!(engine.pending_payment_count(), 0);
    assert!(queue.enqueued().is_empty(), "queue must not be touched");
}
