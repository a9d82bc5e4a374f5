//! Unused-key lint.
//!
//! Every pointer the engine actually reads is listed in
//! [`CONSUMED_POINTERS`]. Any leaf of the effective configuration that is not
//! under one of them is reported, so a typo such as `restore/atomicaly`
//! cannot silently fall back to the default.
//!
//! Keep the registry in step with `EngineConfig::from_config_json`.

use std::collections::BTreeSet;

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::pointer::{collect_leaf_pointers, is_prefix_pointer, normalize_pointer};

/// JSON-pointer prefixes read by `EngineConfig::from_config_json`.
pub const CONSUMED_POINTERS: &[&str] = &[
    "/engine/allow_store_payments",
    "/restore/atomically",
    "/restore/app_user_name",
    "/completions/atomically",
    "/logging/filter",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnusedKeyPolicy {
    Warn,
    Fail,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnusedKeyReport {
    /// Sorted, unique.
    pub consumed_prefixes: Vec<String>,
    /// Sorted.
    pub unused_leaf_pointers: Vec<String>,
}

impl UnusedKeyReport {
    pub fn is_clean(&self) -> bool {
        self.unused_leaf_pointers.is_empty()
    }
}

/// Report leaves not covered by [`CONSUMED_POINTERS`]. With
/// [`UnusedKeyPolicy::Fail`] a non-clean report becomes an error.
pub fn report_unused_keys(config_json: &Value, policy: UnusedKeyPolicy) -> Result<UnusedKeyReport> {
    let consumed: BTreeSet<String> = CONSUMED_POINTERS
        .iter()
        .map(|p| normalize_pointer(p))
        .collect();
    let consumed_prefixes: Vec<String> = consumed.into_iter().collect();

    let mut leaves = Vec::new();
    collect_leaf_pointers(config_json, "", &mut leaves);

    let mut unused: Vec<String> = leaves
        .into_iter()
        .filter(|leaf| !consumed_prefixes.iter().any(|cp| is_prefix_pointer(cp, leaf)))
        .collect();
    unused.sort();
    unused.dedup();

    let report = UnusedKeyReport {
        consumed_prefixes,
        unused_leaf_pointers: unused,
    };

    if policy == UnusedKeyPolicy::Fail && !report.is_clean() {
        bail!(
            "CONFIG_UNUSED_KEYS: {} unused config leaf key(s). \
            Remove them or read them in EngineConfig. First few: {:?}",
            report.unused_leaf_pointers.len(),
            report
                .unused_leaf_pointers
                .iter()
                .take(12)
                .collect::<Vec<_>>()
        );
    }

    Ok(report)
}
