//! EngineConfig from layered files on disk.
//!
//! GREEN when:
//! - Base + overlay files merge in argument order.
//! - Unset keys keep their defaults.
//! - A missing file is a load error naming the path.

use std::fs;

use iapq_config::{load_layered_yaml, EngineConfig};

#[test]
fn files_merge_in_order_into_engine_config() {
    let dir = tempfile::tempdir().unwrap();
    let base = dir.path().join("base.yaml");
    let overlay = dir.path().join("overlay.yaml");
    fs::write(
        &base,
        "restore:\n  atomically: true\n  app_user_name: \"acct-7\"\n",
    )
    .unwrap();
    fs::write(
        &overlay,
        "restore:\n  atomically: false\nengine:\n  allow_store_payments: true\n",
    )
    .unwrap();

    let paths = [
        base.to_string_lossy().to_string(),
        overlay.to_string_lossy().to_string(),
    ];
    let loaded = load_layered_yaml(&paths).unwrap();
    let cfg = EngineConfig::from_config_json(&loaded.config_json).unwrap();

    assert!(!cfg.restore_atomically, "overlay must win");
    assert!(cfg.allow_store_payments);
    assert_eq!(cfg.restore_app_user_name.as_deref(), Some("acct-7"));
    assert!(!cfg.completions_atomically, "default preserved");
    assert_eq!(cfg.log_filter, "info");
}

#[test]
fn missing_file_names_the_path() {
    let err = load_layered_yaml(&["/definitely/not/here.yaml"]).unwrap_err();
    assert!(format!("{err:#}").contains("/definitely/not/here.yaml"));
}
