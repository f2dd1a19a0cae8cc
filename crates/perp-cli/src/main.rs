use std::fs;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, warn};

use perp_config::{report_unused_keys, UnusedKeyPolicy};
use perp_testkit::{run_script, Harness, HarnessConfig, Script};

#[derive(Parser)]
#[command(name = "perp")]
#[command(about = "Perpetual settlement engine CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compute layered config hash + print canonical JSON
    ConfigHash {
        /// Paths in merge order (base first, overlays after)
        #[arg(required = true)]
        paths: Vec<String>,
    },

    /// Replay a step script against a fresh protocol and vault; prints a
    /// JSON report with the vault state after every step
    Simulate {
        /// Layered config paths in merge order
        #[arg(long = "config", required = true, num_args = 1..)]
        config_paths: Vec<String>,

        /// YAML step script
        #[arg(long)]
        script: String,

        /// Fail instead of warning when the config has keys the engine
        /// never reads
        #[arg(long, default_value_t = false)]
        strict: bool,
    },
}

fn init_tracing() {
    // stdout carries the report; logs go to stderr.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    match cli.cmd {
        Commands::ConfigHash { paths } => {
            let path_refs: Vec<&str> = paths.iter().map(String::as_str).collect();
            let loaded = perp_config::load_layered_yaml(&path_refs)?;
            println!("config_hash={}", loaded.config_hash);
            println!("{}", loaded.canonical_json);
        }

        Commands::Simulate {
            config_paths,
            script,
            strict,
        } => {
            let path_refs: Vec<&str> = config_paths.iter().map(String::as_str).collect();
            let loaded = perp_config::load_layered_yaml(&path_refs)?;

            let policy = if strict {
                UnusedKeyPolicy::Fail
            } else {
                UnusedKeyPolicy::Warn
            };
            let unused = report_unused_keys(&loaded.config_json, policy)?;
            for pointer in &unused.unused_leaf_pointers {
                warn!(%pointer, "config key is never read");
            }

            let engine = loaded.engine()?;
            let raw = fs::read_to_string(&script)
                .with_context(|| format!("failed to read script: {script}"))?;
            let steps = Script::from_yaml(&raw)?;

            let mut harness = Harness::new(HarnessConfig::from_engine_config(&engine))?;
            info!(config_hash = %loaded.config_hash, steps = steps.steps.len(), "simulation started");
            let reports = run_script(&mut harness, &steps)?;

            let rejected = reports.iter().filter(|r| !r.ok).count();
            info!(steps = reports.len(), rejected, "simulation finished");

            let out = serde_json::json!({
                "config_hash": loaded.config_hash,
                "steps": reports,
            });
            println!(
                "{}",
                serde_json::to_string_pretty(&out).context("serialize report")?
            );
        }
    }

    Ok(())
}
