//! Replays a [`Scenario`] against the engine and the paper queue.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};

use anyhow::{anyhow, Context, Result};
use iapq_config::EngineConfig;
use iapq_core::{
    CompletionSubscription, Orchestrator, PendingPayment, Purchase, PurchaseOutcome,
    ReconcilerSettings, RestoreOutcome, RestoreSession, StorePaymentRequest, Transaction,
    TransactionId,
};
use iapq_store_paper::PaperStoreQueue;
use tracing::{debug, info};
use uuid::Uuid;

use crate::report::{PaymentResultKind, PurchaseSummary, ScenarioEvent, ScenarioReport};
use crate::scenario::{Scenario, ScenarioStep};

type Engine = Orchestrator<PaperStoreQueue>;

/// Caller-side recorder shared with every callback.
#[derive(Clone, Default)]
struct Recorder {
    step: Arc<AtomicUsize>,
    events: Arc<Mutex<Vec<ScenarioEvent>>>,
    /// Transactions handed to the caller, so a later `finish` step can
    /// pass the exact snapshot back.
    handed: Arc<Mutex<BTreeMap<TransactionId, Transaction>>>,
}

impl Recorder {
    fn step(&self) -> usize {
        self.step.load(Ordering::SeqCst)
    }

    fn push(&self, event: ScenarioEvent) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event);
    }

    fn hand_over(&self, purchase: &Purchase) {
        self.handed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(purchase.transaction_id().clone(), purchase.transaction.clone());
    }

    fn handed(&self, id: &TransactionId) -> Option<Transaction> {
        self.handed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
    }
}

#[derive(Clone, Copy, Debug)]
struct SubscriptionPlan {
    atomically: bool,
    auto_finish: bool,
}

pub struct ScenarioRunner {
    cfg: EngineConfig,
    queue: Arc<PaperStoreQueue>,
    engine: Arc<Engine>,
    recorder: Recorder,
    subscription: Option<SubscriptionPlan>,
}

impl ScenarioRunner {
    pub fn new(cfg: EngineConfig) -> Self {
        let queue = Arc::new(PaperStoreQueue::new());
        let engine = Orchestrator::new(Arc::clone(&queue), settings(&cfg));
        Self {
            cfg,
            queue,
            engine,
            recorder: Recorder::default(),
            subscription: None,
        }
    }

    pub fn engine(&self) -> &Arc<Orchestrator<PaperStoreQueue>> {
        &self.engine
    }

    pub fn queue(&self) -> &Arc<PaperStoreQueue> {
        &self.queue
    }

    pub fn apply(&mut self, index: usize, step: &ScenarioStep) -> Result<()> {
        self.recorder.step.store(index, Ordering::SeqCst);
        debug!(step = index, op = step.op(), "scenario step");

        match step {
            ScenarioStep::StartPayment {
                catalog_item_id,
                quantity,
                needs_content_download,
            } => {
                let rec = self.recorder.clone();
                let payment = PendingPayment::new(catalog_item_id.as_str(), *quantity, move |o| {
                    let purchase = o.purchase();
                    let error = match &o {
                        PurchaseOutcome::Failure { error, .. } => Some(error.to_string()),
                        PurchaseOutcome::Success(_) => None,
                    };
                    rec.push(ScenarioEvent::PaymentResult {
                        step: rec.step(),
                        result: PaymentResultKind::from(&o),
                        purchase: PurchaseSummary::from(purchase),
                        error,
                    });
                })
                .with_content_download(*needs_content_download);
                if let Err(e) = self.engine.start_payment(payment) {
                    self.recorder.push(ScenarioEvent::PaymentRejected {
                        step: index,
                        catalog_item_id: catalog_item_id.clone(),
                        error: e.to_string(),
                    });
                }
            }

            ScenarioStep::Restore {
                atomically,
                app_user_name,
            } => {
                let atomically = atomically.unwrap_or(self.cfg.restore_atomically);
                let rec = self.recorder.clone();
                let mut session = RestoreSession::new(atomically, move |outcomes| {
                    let mut restored = Vec::new();
                    let mut failed = Vec::new();
                    for o in &outcomes {
                        match o {
                            RestoreOutcome::Restored(p) => {
                                if p.needs_finish_transaction {
                                    rec.hand_over(p);
                                }
                                restored.push(PurchaseSummary::from(p));
                            }
                            RestoreOutcome::Failed(e) => failed.push(e.to_string()),
                        }
                    }
                    rec.push(ScenarioEvent::RestoreResult {
                        step: rec.step(),
                        restored,
                        failed,
                    });
                });
                if let Some(name) = app_user_name
                    .clone()
                    .or_else(|| self.cfg.restore_app_user_name.clone())
                {
                    session = session.with_app_user_name(name);
                }
                let accepted = self.engine.restore(session).is_accepted();
                self.recorder.push(ScenarioEvent::RestoreAdmission {
                    step: index,
                    accepted,
                });
            }

            ScenarioStep::SubscribeCompletions {
                atomically,
                auto_finish,
            } => {
                let plan = SubscriptionPlan {
                    atomically: atomically.unwrap_or(self.cfg.completions_atomically),
                    auto_finish: *auto_finish,
                };
                let accepted = self.subscribe(plan);
                if accepted {
                    self.subscription = Some(plan);
                }
                self.recorder.push(ScenarioEvent::SubscribeAdmission {
                    step: index,
                    accepted,
                });
            }

            ScenarioStep::Deliver { transactions } => {
                self.queue.deliver(transactions.clone());
            }

            ScenarioStep::Settle { state, error } => {
                self.queue
                    .settle_next(*state, error.clone())
                    .ok_or_else(|| anyhow!("settle: no enqueued payment is waiting"))?;
            }

            ScenarioStep::RestoreFinished => self.queue.finish_restore(),

            ScenarioStep::RestoreFailed { error } => self.queue.fail_restore(error.clone()),

            ScenarioStep::Finish { transaction_id } => {
                let id = TransactionId::new(transaction_id.as_str());
                let txn = self.recorder.handed(&id).with_context(|| {
                    format!("finish: transaction {id} was never handed to the caller")
                })?;
                let sent = self.engine.finish_transaction(&txn);
                self.recorder.push(ScenarioEvent::Finished {
                    step: index,
                    transaction_id: transaction_id.clone(),
                    sent,
                });
            }

            ScenarioStep::ProposeStorePayment {
                catalog_item_id,
                quantity,
            } => {
                let allowed = self.queue.propose_store_payment(StorePaymentRequest {
                    catalog_item_id: catalog_item_id.as_str().into(),
                    quantity: *quantity,
                    catalog_entry: None,
                });
                self.recorder.push(ScenarioEvent::StorePaymentDecision {
                    step: index,
                    catalog_item_id: catalog_item_id.clone(),
                    allowed,
                });
            }

            ScenarioStep::SetCanMakePayments { allowed } => {
                self.queue.set_can_make_payments(*allowed);
            }

            ScenarioStep::Relaunch => {
                self.engine = Orchestrator::new(Arc::clone(&self.queue), settings(&self.cfg));
                if let Some(plan) = self.subscription {
                    self.subscribe(plan);
                }
                let redelivered = self.queue.relaunch();
                self.recorder.push(ScenarioEvent::Relaunched {
                    step: index,
                    redelivered,
                });
            }
        }
        Ok(())
    }

    fn subscribe(&self, plan: SubscriptionPlan) -> bool {
        let rec = self.recorder.clone();
        let engine: Weak<Engine> = Arc::downgrade(&self.engine);
        let sub = CompletionSubscription::new(move |purchases| {
            let step = rec.step();
            rec.push(ScenarioEvent::Completions {
                step,
                purchases: purchases.iter().map(PurchaseSummary::from).collect(),
            });
            for p in purchases.iter().filter(|p| p.needs_finish_transaction) {
                rec.hand_over(p);
                if !plan.auto_finish {
                    continue;
                }
                if let Some(engine) = engine.upgrade() {
                    let sent = engine.finish_transaction(&p.transaction);
                    rec.push(ScenarioEvent::Finished {
                        step,
                        transaction_id: p.transaction_id().to_string(),
                        sent,
                    });
                }
            }
        })
        .atomically(plan.atomically);
        self.engine.subscribe_completions(sub).is_accepted()
    }

    pub fn finish(self, scenario: &Scenario) -> ScenarioReport {
        let events = std::mem::take(
            &mut *self
                .recorder
                .events
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        );
        ScenarioReport {
            run_id: run_id(&scenario.name, &self.cfg),
            name: scenario.name.clone(),
            steps: scenario.steps.len(),
            events,
            acknowledgments: self
                .queue
                .acknowledgments()
                .into_iter()
                .map(|(id, n)| (id.to_string(), n))
                .collect(),
            enqueued: self.queue.enqueued(),
            restore_requests: self.queue.restore_requests(),
            outstanding: self
                .queue
                .outstanding()
                .into_iter()
                .map(|t| t.transaction_id.to_string())
                .collect(),
            engine: self.engine.snapshot(),
        }
    }
}

fn settings(cfg: &EngineConfig) -> ReconcilerSettings {
    ReconcilerSettings {
        allow_store_payments: cfg.allow_store_payments,
    }
}

fn run_id(name: &str, cfg: &EngineConfig) -> Uuid {
    let seed = format!(
        "{name}|{}",
        serde_json::to_string(cfg).unwrap_or_default()
    );
    Uuid::new_v5(&Uuid::NAMESPACE_OID, seed.as_bytes())
}

/// Replay `scenario` from a clean engine and return the report.
pub fn run_scenario(cfg: &EngineConfig, scenario: &Scenario) -> Result<ScenarioReport> {
    info!(name = %scenario.name, steps = scenario.steps.len(), "scenario replay started");
    let mut runner = ScenarioRunner::new(cfg.clone());
    for (i, step) in scenario.steps.iter().enumerate() {
        runner
            .apply(i, step)
            .with_context(|| format!("scenario {} step {i} ({})", scenario.name, step.op()))?;
    }
    let report = runner.finish(scenario);
    info!(
        name = %report.name,
        events = report.events.len(),
        acknowledged = report.acknowledgments.len(),
        "scenario replay finished"
    );
    Ok(report)
}
