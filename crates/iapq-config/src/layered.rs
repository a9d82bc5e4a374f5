//! Layered YAML loading, canonical hashing and the secret-literal guard.
//!
//! Documents merge in order: earlier ones are the base, later ones override
//! key by key (objects merge recursively; anything else is replaced). The
//! merged value is serialized to canonical JSON and hashed with SHA-256 so
//! two runs with the same effective configuration report the same
//! `config_hash`, whatever the key order in the source files.

use std::fs;

use anyhow::{bail, Context, Result};
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::pointer::collect_leaf_pointers;

/// Leaf string prefixes that look like credentials. Configuration may name
/// environment variables; it must never carry the secret itself.
const SECRET_PREFIXES: &[&str] = &[
    "sk-",
    "sk_live",
    "sk_test",
    "AKIA",
    "-----BEGIN",
    "ghp_",
    "gho_",
    "glpat-",
    "xoxb-",
    "xoxp-",
];

/// Effective configuration after merging.
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub config_hash: String,
    pub canonical_json: String,
    pub config_json: Value,
}

/// Read and merge YAML files in order.
pub fn load_layered_yaml<P: AsRef<str>>(paths: &[P]) -> Result<LoadedConfig> {
    let mut docs = Vec::with_capacity(paths.len());
    for p in paths {
        let p = p.as_ref();
        let raw = fs::read_to_string(p).with_context(|| format!("read config layer: {p}"))?;
        docs.push(raw);
    }
    let refs: Vec<&str> = docs.iter().map(String::as_str).collect();
    load_layered_yaml_from_strings(&refs)
}

/// Merge in-memory YAML documents in order.
pub fn load_layered_yaml_from_strings(yaml_docs: &[&str]) -> Result<LoadedConfig> {
    let mut merged = serde_json::json!({});
    for (layer, raw) in yaml_docs.iter().enumerate() {
        if raw.trim().is_empty() {
            continue;
        }
        let doc: serde_yaml::Value =
            serde_yaml::from_str(raw).with_context(|| format!("invalid yaml in layer {layer}"))?;
        // `~` or a comment-only document.
        if doc.is_null() {
            continue;
        }
        let doc = serde_json::to_value(doc).context("yaml to json conversion failed")?;
        merged = deep_merge(merged, doc);
    }

    reject_secret_literals(&merged)?;

    let canonical_json =
        serde_json::to_string(&merged).context("canonical json serialize failed")?;
    let config_hash = sha256_hex(canonical_json.as_bytes());
    Ok(LoadedConfig {
        config_hash,
        canonical_json,
        config_json: merged,
    })
}

fn deep_merge(base: Value, overlay: Value) -> Value {
    match (base, overlay) {
        (Value::Object(mut base), Value::Object(overlay)) => {
            for (k, v) in overlay {
                let prev = base.remove(&k).unwrap_or(Value::Null);
                base.insert(k, deep_merge(prev, v));
            }
            Value::Object(base)
        }
        (_, overlay) => overlay,
    }
}

fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

fn reject_secret_literals(v: &Value) -> Result<()> {
    let mut leaves = Vec::new();
    collect_leaf_pointers(v, "", &mut leaves);
    for ptr in leaves {
        let Some(s) = v.pointer(&ptr).and_then(Value::as_str) else {
            continue;
        };
        if looks_like_secret(s) {
            bail!("CONFIG_SECRET_DETECTED leaf={} value=REDACTED", ptr);
        }
    }
    Ok(())
}

fn looks_like_secret(s: &str) -> bool {
    let t = s.trim();
    t.len() >= 8 && SECRET_PREFIXES.iter().any(|p| t.starts_with(p))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overlay_replaces_scalars_and_keeps_siblings() {
        let base = "restore:\n  atomically: true\n  app_user_name: abc\n";
        let overlay = "restore:\n  atomically: false\n";
        let cfg = load_layered_yaml_from_strings(&[base, overlay]).unwrap();
        assert_eq!(
            cfg.config_json.pointer("/restore/atomically"),
            Some(&Value::Bool(false))
        );
        assert_eq!(
            cfg.config_json
                .pointer("/restore/app_user_name")
                .and_then(Value::as_str),
            Some("abc")
        );
    }

    #[test]
    fn empty_layer_is_ignored() {
        let a = load_layered_yaml_from_strings(&["engine:\n  allow_store_payments: true\n"])
            .unwrap();
        let b = load_layered_yaml_from_strings(&["engine:\n  allow_store_payments: true\n", ""])
            .unwrap();
        assert_eq!(a.config_hash, b.config_hash);
    }

    #[test]
    fn short_strings_are_never_secrets() {
        assert!(!looks_like_secret("sk-1"));
        assert!(looks_like_secret("sk-live-0123456789"));
    }
}
