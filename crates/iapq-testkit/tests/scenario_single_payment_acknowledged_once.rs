//! Single direct purchase, end to end through the paper queue.
//!
//! GREEN when:
//! - The payment callback fires once with success.
//! - The registry is empty afterwards.
//! - The generated transaction is acknowledged exactly once.

use std::path::PathBuf;

use iapq_config::EngineConfig;
use iapq_testkit::{load_scenario, run_scenario, PaymentResultKind};

fn scenario_path(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("scenarios")
        .join(name)
}

#[test]
fn single_payment_succeeds_with_one_ack() {
    let scenario = load_scenario(scenario_path("single_payment.yaml")).unwrap();
    let report = run_scenario(&EngineConfig::default(), &scenario).unwrap();

    let results = report.payment_results();
    assert_eq!(results.len(), 1, "callback must fire exactly once");
    let (kind, purchase) = results[0];
    assert_eq!(kind, PaymentResultKind::Success);
    assert_eq!(purchase.catalog_item_id, "item.A");
    assert!(!purchase.needs_finish_transaction);

    assert_eq!(report.engine.pending_payments, 0, "registry must be empty");
    assert_eq!(report.ack_count("paper:txn:000001"), 1);
    assert_eq!(report.acknowledgments.len(), 1);
    assert!(report.outstanding.is_empty());
}
