//! # EventGraph Configuration Validator
//!
//! Command-line tool for validating pipeline configuration across environments before
//! starting the pipeline.

use std::path::PathBuf;
use std::process;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use eventgraph_core::config::ConfigManager;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

const ENVIRONMENTS: [&str; 3] = ["development", "test", "production"];

#[derive(Parser)]
#[command(name = "config-validator")]
#[command(about = "Validate EventGraph pipeline configuration files")]
#[command(version = env!("CARGO_PKG_VERSION"))]
pub struct Cli {
    /// Environment to validate
    #[arg(short, long, default_value = "development", env = "EVENTGRAPH_ENV")]
    environment: String,

    /// Configuration directory path (default: config/eventgraph)
    #[arg(short, long)]
    config_dir: Option<PathBuf>,

    /// Verbose output level (use multiple times for more verbosity)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Validate the selected environment
    Validate,

    /// Validate every known environment
    All,

    /// Print the merged configuration with credentials masked
    Show,

    /// Show keys whose values differ between two environments
    Compare {
        #[arg(short, long, default_value = "development")]
        base: String,

        #[arg(short, long)]
        target: String,
    },
}

fn main() {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };
    let _subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .try_init();

    let result = match &cli.command {
        Some(Commands::Validate) | None => validate(&cli, &cli.environment).map(|_| ()),
        Some(Commands::All) => validate_all(&cli),
        Some(Commands::Show) => show(&cli),
        Some(Commands::Compare { base, target }) => compare(&cli, base, target),
    };

    match result {
        Ok(()) => {
            info!("Configuration validation completed successfully");
            process::exit(0);
        }
        Err(e) => {
            error!("Configuration validation failed: {e:#}");
            eprintln!("❌ {e:#}");
            process::exit(1);
        }
    }
}

fn load(cli: &Cli, environment: &str) -> Result<std::sync::Arc<ConfigManager>> {
    ConfigManager::load_from_directory_with_env(cli.config_dir.clone(), environment)
        .with_context(|| format!("failed to load '{environment}' configuration"))
}

fn validate(cli: &Cli, environment: &str) -> Result<std::sync::Arc<ConfigManager>> {
    let manager = load(cli, environment)?;
    let config = manager.config();
    println!("✅ {environment}: configuration loaded from {}", manager.config_directory().display());
    println!(
        "   store={:?} graph={:?} sources={}",
        config.store.backend,
        config.graph.backend,
        config
            .sources
            .iter()
            .map(|s| s.kind.as_str())
            .collect::<Vec<_>>()
            .join(",")
    );
    println!(
        "   documents: {} workers per tier, {} concurrent",
        config.documents.worker_threads, config.documents.concurrency_limit
    );
    Ok(manager)
}

fn validate_all(cli: &Cli) -> Result<()> {
    let mut failures = Vec::new();
    for environment in ENVIRONMENTS {
        if let Err(e) = validate(cli, environment) {
            println!("❌ {environment}: {e:#}");
            failures.push(environment);
        }
    }
    if failures.is_empty() {
        Ok(())
    } else {
        anyhow::bail!("invalid environments: {}", failures.join(", "))
    }
}

fn show(cli: &Cli) -> Result<()> {
    let manager = load(cli, &cli.environment)?;
    let rendered = serde_json::to_string_pretty(&manager.debug_config())?;
    println!("{rendered}");
    Ok(())
}

fn flatten(prefix: &str, value: &serde_json::Value, out: &mut Vec<(String, String)>) {
    match value {
        serde_json::Value::Object(map) => {
            for (key, child) in map {
                let path = if prefix.is_empty() {
                    key.clone()
                } else {
                    format!("{prefix}.{key}")
                };
                flatten(&path, child, out);
            }
        }
        other => out.push((prefix.to_string(), other.to_string())),
    }
}

fn compare(cli: &Cli, base: &str, target: &str) -> Result<()> {
    let mut left = Vec::new();
    let mut right = Vec::new();
    flatten("", &load(cli, base)?.debug_config(), &mut left);
    flatten("", &load(cli, target)?.debug_config(), &mut right);
    let right: std::collections::BTreeMap<_, _> = right.into_iter().collect();

    let mut differences = 0;
    for (key, value) in &left {
        if let Some(other) = right.get(key) {
            if other != value {
                println!("{key}: {base}={value} {target}={other}");
                differences += 1;
            }
        }
    }
    println!("{differences} differing keys");
    Ok(())
}
