//! Scenario replay harness.
//!
//! Scripts describe what the caller does and what the backend delivers;
//! [`run_scenario`] replays them against a real engine wired to the paper
//! queue and returns a serializable [`ScenarioReport`] with every callback,
//! every acknowledgment count and the final engine snapshot.

mod report;
mod runner;
mod scenario;

pub use report::{PaymentResultKind, PurchaseSummary, ScenarioEvent, ScenarioReport};
pub use runner::{run_scenario, ScenarioRunner};
pub use scenario::{load_scenario, Scenario, ScenarioStep};
