//! # Engine Gateway Configuration Validator
//!
//! Command-line tool for validating gateway configuration files per environment.
//! Catches configuration issues before an engine is started on a field device.

use anyhow::{bail, Context};
use clap::{Parser, Subcommand, ValueEnum};
use engine_gateway::config::{ConfigManager, GatewayConfig};
use engine_gateway::constants::backends;
use std::process;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser)]
#[command(name = "config-validator")]
#[command(about = "Validate engine gateway configuration files")]
#[command(version = env!("CARGO_PKG_VERSION"))]
pub struct Cli {
    /// Base configuration file
    #[arg(short, long, default_value = "config/engine-gateway.yaml")]
    config: String,

    /// Environment whose override file is applied on top of the base file
    #[arg(short, long, env = "ENGINE_GATEWAY_ENV", default_value = "development")]
    environment: String,

    /// Verbose output level (use multiple times for more verbosity)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Output format for `show`
    #[arg(long, value_enum, default_value_t = OutputFormat::Yaml)]
    format: OutputFormat,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    Json,
    Yaml,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Validate every configuration section
    All,

    /// Validate one configuration section
    Component {
        /// Section name (engine, queue, hubs, workers, watchdog, telemetry)
        name: String,
    },

    /// Print the effective configuration with sensitive values masked
    Show,
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
        Some(Commands::All) | None => validate_all(&cli),
        Some(Commands::Component { name }) => validate_component(&cli, name),
        Some(Commands::Show) => show(&cli),
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

fn load(cli: &Cli) -> anyhow::Result<std::sync::Arc<ConfigManager>> {
    ConfigManager::load_from_file(&cli.config, &cli.environment)
        .with_context(|| format!("loading {} for {}", cli.config, cli.environment))
}

fn validate_all(cli: &Cli) -> anyhow::Result<()> {
    println!("🔧 Validating Engine Gateway Configuration");
    println!("Environment: {}", cli.environment);
    println!("Config File: {}", cli.config);
    println!();

    let manager = load(cli)?;
    println!("✅ Configuration loaded and validated");

    let config = manager.config();
    validate_engine(config)?;
    validate_queue(config)?;
    validate_hubs(config)?;
    validate_workers(config)?;
    validate_watchdog(config)?;
    validate_telemetry(config)?;

    println!("\n🎉 All configuration validation checks passed!");
    Ok(())
}

fn validate_component(cli: &Cli, name: &str) -> anyhow::Result<()> {
    println!("🔧 Validating Component: {name}");

    let manager = load(cli)?;
    let config = manager.config();

    match name.to_lowercase().as_str() {
        "engine" => validate_engine(config)?,
        "queue" => validate_queue(config)?,
        "hubs" => validate_hubs(config)?,
        "workers" => validate_workers(config)?,
        "watchdog" => validate_watchdog(config)?,
        "telemetry" => validate_telemetry(config)?,
        _ => bail!("Unknown component: {name}"),
    }

    println!("✅ Component '{name}' validation passed!");
    Ok(())
}

fn show(cli: &Cli) -> anyhow::Result<()> {
    let manager = load(cli)?;
    let sanitized = manager.sanitized();

    let rendered = match cli.format {
        OutputFormat::Json => serde_json::to_string_pretty(&sanitized)?,
        OutputFormat::Yaml => serde_yaml::to_string(&sanitized)?,
    };
    println!("{rendered}");
    Ok(())
}

fn validate_engine(config: &GatewayConfig) -> anyhow::Result<()> {
    println!("🏭 Validating Engine Configuration...");
    println!("   ✅ Name: {}", config.engine.name);
    match config.engine.engine_id {
        Some(id) => println!("   ✅ Engine id: {id}"),
        None => println!("   ℹ️  Engine id not configured (taken from the repository or generated)"),
    }
    Ok(())
}

fn validate_queue(config: &GatewayConfig) -> anyhow::Result<()> {
    println!("📬 Validating Queue Configuration...");
    println!("   ✅ Capacity per message kind: {}", config.queue.kind_capacity);
    Ok(())
}

fn validate_hubs(config: &GatewayConfig) -> anyhow::Result<()> {
    println!("📡 Validating Hub Configuration...");

    if config.hubs.urls.is_empty() {
        println!("   ℹ️  No hubs configured (hubs stored in the repository are still used)");
    }
    for url in &config.hubs.urls {
        println!("   ✅ Hub: {url}");
    }
    println!(
        "   ✅ Reconnect delay: {}ms, peer queue capacity: {}",
        config.hubs.reconnect_delay_ms, config.hubs.peer_queue_capacity
    );
    Ok(())
}

fn validate_workers(config: &GatewayConfig) -> anyhow::Result<()> {
    println!("👷 Validating Worker Configuration...");

    let backend = config.workers.default_backend.as_str();
    if !backends::ALL.contains(&backend) {
        bail!(
            "workers.default_backend '{backend}' is not a bundled backend ({})",
            backends::ALL.join(", ")
        );
    }
    println!("   ✅ Default backend: {backend}");
    println!(
        "   ✅ Transitions: {} attempts every {}ms",
        config.workers.transition_retry_attempts, config.workers.transition_retry_delay_ms
    );
    println!(
        "   ✅ Image staleness: {}ms",
        config.workers.image_staleness_ms
    );
    Ok(())
}

fn validate_watchdog(config: &GatewayConfig) -> anyhow::Result<()> {
    println!("🐕 Validating Watchdog Configuration...");

    let watchdog = &config.watchdog;
    if watchdog.default_grace_time_ms < watchdog.minimum_interval_ms
        || watchdog.default_check_interval_ms < watchdog.minimum_interval_ms
    {
        println!(
            "   ⚠️  Defaults below {}ms will be clamped",
            watchdog.minimum_interval_ms
        );
    }
    println!(
        "   ✅ Grace time: {}ms, check interval: {}ms",
        watchdog.default_grace_time_ms, watchdog.default_check_interval_ms
    );
    Ok(())
}

fn validate_telemetry(config: &GatewayConfig) -> anyhow::Result<()> {
    println!("📊 Validating Telemetry Configuration...");

    if config.telemetry.metrics_enabled {
        println!(
            "   ✅ Metrics every {}ms",
            config.telemetry.metrics_interval_ms
        );
    } else {
        println!("   ℹ️  Metrics disabled");
    }
    Ok(())
}
