//! iapq-config
//!
//! Layered YAML configuration for the reconciliation engine.
//!
//! - `load_layered_yaml*`: merge, canonicalize, hash, reject secret literals.
//! - `report_unused_keys`: lint leaves nobody reads.
//! - `EngineConfig`: typed view of the keys that are read.

mod engine;
mod layered;
mod pointer;
mod unused;

pub use engine::EngineConfig;
pub use layered::{load_layered_yaml, load_layered_yaml_from_strings, LoadedConfig};
pub use unused::{report_unused_keys, UnusedKeyPolicy, UnusedKeyReport, CONSUMED_POINTERS};
