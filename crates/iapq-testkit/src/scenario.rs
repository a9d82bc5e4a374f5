//! Scenario scripts.
//!
//! A scenario is a named list of steps replayed in order against a fresh
//! engine wired to a [`iapq_store_paper::PaperStoreQueue`]. Scripts are YAML
//! or JSON (YAML is a superset, so one parser reads both):
//!
//! ```yaml
//! name: single_payment
//! steps:
//!   - op: start_payment
//!     catalog_item_id: item.A
//!   - op: settle
//!     state: purchased
//! ```

use std::fs;
use std::path::Path;

use anyhow::{bail, Context, Result};
use iapq_core::{StoreError, Transaction, TransactionState};
use serde::{Deserialize, Serialize};

fn one() -> i64 {
    1
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum ScenarioStep {
    /// Caller starts a purchase.
    StartPayment {
        catalog_item_id: String,
        #[serde(default = "one")]
        quantity: i64,
        #[serde(default)]
        needs_content_download: bool,
    },
    /// Caller starts a restore. Unset fields fall back to configuration.
    Restore {
        #[serde(default)]
        atomically: Option<bool>,
        #[serde(default)]
        app_user_name: Option<String>,
    },
    /// Caller installs the completion subscription. With `auto_finish` the
    /// callback finishes every purchase it is handed, as an app does after
    /// delivering content.
    SubscribeCompletions {
        #[serde(default)]
        atomically: Option<bool>,
        #[serde(default)]
        auto_finish: bool,
    },
    /// Backend delivers a batch verbatim.
    Deliver { transactions: Vec<Transaction> },
    /// Backend settles the earliest enqueued payment with a generated id.
    Settle {
        state: TransactionState,
        #[serde(default)]
        error: Option<StoreError>,
    },
    RestoreFinished,
    RestoreFailed { error: StoreError },
    /// Caller finishes a transaction it was handed earlier.
    Finish { transaction_id: String },
    /// Backend proposes a store-initiated payment.
    ProposeStorePayment {
        catalog_item_id: String,
        #[serde(default = "one")]
        quantity: i64,
    },
    SetCanMakePayments { allowed: bool },
    /// App restarts: the engine is rebuilt (pending payments and restore
    /// session are lost, the completion subscription is re-installed) and
    /// the backend redelivers everything unacknowledged.
    Relaunch,
}

impl ScenarioStep {
    pub fn op(&self) -> &'static str {
        match self {
            Self::StartPayment { .. } => "start_payment",
            Self::Restore { .. } => "restore",
            Self::SubscribeCompletions { .. } => "subscribe_completions",
            Self::Deliver { .. } => "deliver",
            Self::Settle { .. } => "settle",
            Self::RestoreFinished => "restore_finished",
            Self::RestoreFailed { .. } => "restore_failed",
            Self::Finish { .. } => "finish",
            Self::ProposeStorePayment { .. } => "propose_store_payment",
            Self::SetCanMakePayments { .. } => "set_can_make_payments",
            Self::Relaunch => "relaunch",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Scenario {
    pub name: String,
    pub steps: Vec<ScenarioStep>,
}

impl Scenario {
    pub fn parse(raw: &str) -> Result<Self> {
        let scenario: Scenario = serde_yaml::from_str(raw).context("parse scenario")?;
        if scenario.name.trim().is_empty() {
            bail!("scenario name must not be empty");
        }
        Ok(scenario)
    }
}

pub fn load_scenario(path: impl AsRef<Path>) -> Result<Scenario> {
    let path = path.as_ref();
    let raw = fs::read_to_string(path)
        .with_context(|| format!("read scenario: {}", path.display()))?;
    Scenario::parse(&raw).with_context(|| format!("load scenario: {}", path.display()))
}
