//! Inline scripts for edge cases that do not deserve a scenario file.

use iapq_config::EngineConfig;
use iapq_testkit::{run_scenario, PaymentResultKind, Scenario, ScenarioEvent};

fn run(raw: &str) -> iapq_testkit::ScenarioReport {
    let scenario = Scenario::parse(raw).unwrap();
    run_scenario(&EngineConfig::default(), &scenario).unwrap()
}

#[test]
fn zero_quantity_is_rejected_without_touching_the_queue() {
    let report = run(
        r#"
name: zero_qty
steps:
  - op: start_payment
    catalog_item_id: item.A
    quantity: 0
"#,
    );
    assert!(matches!(
        report.events.as_slice(),
        [ScenarioEvent::PaymentRejected { .. }]
    ));
    assert!(report.enqueued.is_empty());
    assert_eq!(report.engine.pending_payments, 0);
}

#[test]
fn cancelled_payment_is_reported_as_cancelled() {
    let report = run(
        r#"
name: cancel
steps:
  - op: start_payment
    catalog_item_id: item.B
  - op: settle
    state: failed
    error: { code: 2, message: "user cancelled" }
"#,
    );
    let results = report.payment_results();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].0, PaymentResultKind::Cancelled);
    assert_eq!(report.ack_count("paper:txn:000001"), 1);
}

#[test]
fn redelivery_does_not_refire_callbacks() {
    let report = run(
        r#"
name: redelivery
steps:
  - op: subscribe_completions
    auto_finish: true
  - op: deliver
    transactions:
      - { transaction_id: t-1, catalog_item_id: item.C, state: purchased }
  - op: deliver
    transactions:
      - { transaction_id: t-1, catalog_item_id: item.C, state: purchased }
"#,
    );
    assert_eq!(report.completions().len(), 1, "second delivery is skipped");
    assert_eq!(report.ack_count("t-1"), 1);
}

#[test]
fn second_restore_while_active_is_rejected() {
    let report = run(
        r#"
name: double_restore
steps:
  - op: restore
  - op: restore
    atomically: false
  - op: deliver
    transactions:
      - { transaction_id: r-1, catalog_item_id: item.R, state: restored }
  - op: restore_finished
  - op: restore_finished
"#,
    );
    let admissions: Vec<bool> = report
        .events
        .iter()
        .filter_map(|e| match e {
            ScenarioEvent::RestoreAdmission { accepted, .. } => Some(*accepted),
            _ => None,
        })
        .collect();
    assert_eq!(admissions, vec![true, false]);

    let results = report
        .events
        .iter()
        .filter(|e| matches!(e, ScenarioEvent::RestoreResult { .. }))
        .count();
    assert_eq!(results, 1, "only one terminal callback per session");
    assert_eq!(report.restore_requests.len(), 1);
    assert_eq!(report.ack_count("r-1"), 1, "first session was atomic");
}

#[test]
fn finish_of_unknown_transaction_is_an_error() {
    let scenario = Scenario::parse(
        "name: bad_finish\nsteps:\n  - op: finish\n    transaction_id: nope\n",
    )
    .unwrap();
    let err = run_scenario(&EngineConfig::default(), &scenario).unwrap_err();
    assert!(format!("{err:#}").contains("never handed"));
}
