//! `iapq`: operator tooling for the reconciliation engine.
//!
//! - `config-hash`: merge layered YAML, print the hash and canonical JSON.
//! - `config-check`: resolve the engine settings and lint unused keys.
//! - `replay`: run a scenario script against the paper queue and print the
//!   report as JSON.
//!
//! Logs go to stderr so stdout stays machine-readable.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use iapq_config::{
    load_layered_yaml, report_unused_keys, EngineConfig, LoadedConfig, UnusedKeyPolicy,
};
use iapq_testkit::{load_scenario, run_scenario};
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "iapq")]
#[command(about = "In-app purchase reconciliation tooling", long_about = None)]
struct Cli {
    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compute layered config hash + print canonical JSON
    ConfigHash {
        /// Paths in merge order (base -> env -> overrides...)
        #[arg(required = true)]
        paths: Vec<String>,
    },

    /// Resolve engine settings from layered config and report unused keys
    ConfigCheck {
        /// Layered config paths in merge order
        #[arg(long = "config", required = true)]
        config_paths: Vec<String>,

        /// Exit non-zero when any key is not read by the engine
        #[arg(long, default_value_t = false)]
        fail_on_unused: bool,
    },

    /// Replay a scenario script and print the report
    Replay {
        /// Layered config paths in merge order. Defaults apply when omitted.
        #[arg(long = "config")]
        config_paths: Vec<String>,

        /// Scenario file (YAML or JSON)
        #[arg(long)]
        scenario: String,

        /// Pretty-print the report
        #[arg(long, default_value_t = false)]
        pretty: bool,

        /// Exit non-zero if any transaction was acknowledged more than once
        #[arg(long, default_value_t = false)]
        strict: bool,
    },
}

fn main() -> Result<()> {
    // Silent if the file does not exist.
    let _ = dotenvy::from_filename(".env.local");

    let cli = Cli::parse();

    match cli.cmd {
        Commands::ConfigHash { paths } => {
            init_tracing(None);
            let loaded =
                load_layered_yaml(paths.as_slice()).context("load layered config failed")?;
            println!("config_hash={}", loaded.config_hash);
            println!("{}", loaded.canonical_json);
        }

        Commands::ConfigCheck {
            config_paths,
            fail_on_unused,
        } => {
            let (loaded, cfg) = load_engine_config(&config_paths)?;
            init_tracing(Some(&cfg.log_filter));

            let policy = if fail_on_unused {
                UnusedKeyPolicy::Fail
            } else {
                UnusedKeyPolicy::Warn
            };
            let report = report_unused_keys(&loaded.config_json, policy)?;
            for ptr in &report.unused_leaf_pointers {
                warn!(pointer = %ptr, "config key is not read by the engine");
            }

            println!("config_hash={}", loaded.config_hash);
            println!("unused_keys={}", report.unused_leaf_pointers.len());
            println!("{}", serde_json::to_string_pretty(&cfg)?);
        }

        Commands::Replay {
            config_paths,
            scenario,
            pretty,
            strict,
        } => {
            let cfg = if config_paths.is_empty() {
                EngineConfig::default()
            } else {
                load_engine_config(&config_paths)?.1
            };
            init_tracing(Some(&cfg.log_filter));

            let script = load_scenario(&scenario)?;
            let report = run_scenario(&cfg, &script)?;
            info!(run_id = %report.run_id, name = %report.name, "replay complete");

            let out = if pretty {
                serde_json::to_string_pretty(&report)?
            } else {
                serde_json::to_string(&report)?
            };
            println!("{out}");

            let doubles = report.double_acks();
            if strict && !doubles.is_empty() {
                bail!("DOUBLE_ACK ids={}", doubles.join(","));
            }
        }
    }

    Ok(())
}

fn load_engine_config(paths: &[String]) -> Result<(LoadedConfig, EngineConfig)> {
    let loaded = load_layered_yaml(paths).context("load layered config failed")?;
    let cfg = EngineConfig::from_config_json(&loaded.config_json)
        .context("resolve engine config failed")?;
    Ok((loaded, cfg))
}

/// `RUST_LOG` wins; otherwise the configured filter, otherwise `info`.
fn init_tracing(configured: Option<&str>) {
    let fallback = configured.unwrap_or("info").to_string();
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| fallback.into()),
        )
        .init();
}
