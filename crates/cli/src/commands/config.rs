use clap::Subcommand;
use conduit_core::config::AppConfig;
use std::path::Path;

use super::utils::{print_error, print_info, print_success, CliError, CliResult};

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Validate a configuration file
    Validate {
        #[arg(short, long, default_value = "config/config.toml")]
        file: String,
    },

    /// Show the effective configuration (file plus environment overrides)
    Show {
        #[arg(short, long, default_value = "config/config.toml")]
        file: String,

        /// Print the full configuration as TOML
        #[arg(long)]
        raw: bool,
    },

    /// Generate a sample configuration file
    Generate {
        #[arg(short, long, default_value = "config/config.toml")]
        output: String,

        /// Overwrite existing file
        #[arg(long)]
        force: bool,
    },
}

/// Loads `file` if given, otherwise `CONDUIT_CONFIG` or `config/config.toml`.
pub fn load_config(file: Option<&str>) -> CliResult<AppConfig> {
    let config = match file {
        Some(path) => AppConfig::from_file(path),
        None => AppConfig::load(),
    };
    config.map_err(|e| CliError::Config(e.to_string()))
}

pub fn handle_config_command(command: ConfigCommands) -> CliResult<()> {
    match command {
        ConfigCommands::Validate { file } => validate_config(&file),
        ConfigCommands::Show { file, raw } => show_config(&file, raw),
        ConfigCommands::Generate { output, force } => generate_config(&output, force),
    }
}

fn validate_config(file: &str) -> CliResult<()> {
    if !Path::new(file).exists() {
        print_error(&format!("Configuration file not found: {file}"));
        return Err(CliError::Config(format!("File not found: {file}")));
    }

    print_info(&format!("Loading configuration from {file}..."));
    let config = load_config(Some(file))?;

    print_info("Validating configuration...");
    config.validate().map_err(CliError::Config)?;

    print_success("Configuration is valid!");

    println!("Configuration Summary:");
    println!("  Endpoints: {}", config.endpoints.len());
    println!("  Strategy: {:?}", config.load_balancer.strategy);
    println!(
        "  Batches: up to {} operations, {} concurrent",
        config.scheduler.batch_limit(),
        config.scheduler.max_concurrent_batches
    );
    println!(
        "  Health checks: {}",
        if config.health_check.enabled { "enabled" } else { "disabled" }
    );

    Ok(())
}

fn show_config(file: &str, raw: bool) -> CliResult<()> {
    let config = load_config(Some(file))?;

    if raw {
        let rendered =
            toml::to_string_pretty(&config).map_err(|e| CliError::Config(e.to_string()))?;
        println!("{rendered}");
        return Ok(());
    }

    println!("Configuration from {file}:");

    println!("\n[Endpoints] ({})", config.endpoints.len());
    for endpoint in config.endpoint_configs() {
        println!(
            "  {}: {} (max {} connections, breaker at {:.0}%)",
            endpoint.name,
            endpoint.url,
            endpoint.max_connections,
            endpoint.circuit_breaker_threshold * 100.0
        );
    }

    println!("\n[Retry]");
    println!("  Max Retries: {}", config.retry.max_retries);
    println!(
        "  Backoff: {}ms x{} (max {}ms)",
        config.retry.base_delay_ms, config.retry.backoff_multiplier, config.retry.max_delay_ms
    );
    println!("  Attempt Timeout: {}ms", config.retry.request_timeout_ms);

    println!("\n[Scheduler]");
    println!("  Interval: {}ms", config.scheduler.batch_interval_ms);
    println!(
        "  Batch Size: {}..={}",
        config.scheduler.min_batch_size,
        config.scheduler.batch_limit()
    );
    println!("  Concurrency Window: {}", config.scheduler.concurrency_window);
    println!("  Type Grouping: {}", config.scheduler.enable_type_grouping);
    println!("  Dependency Resolution: {}", config.scheduler.enable_dependency_resolution);

    println!("\n[Logging]");
    println!("  Level: {}", config.logging.level);
    println!("  Format: {}", config.logging.format);

    Ok(())
}

const SAMPLE_CONFIG: &str = r#"# Conduit configuration

[[endpoints]]
name = "primary"
url = "https://rpc.example.com"

[[endpoints]]
name = "backup"
url = "https://backup.example.com"
max_connections = 2

[pool]
max_connections_per_endpoint = 4
connection_timeout_ms = 5000

[circuit_breaker]
threshold = 0.5
timeout_seconds = 30

[load_balancer]
strategy = "round_robin"

[retry]
max_retries = 3
base_delay_ms = 100
backoff_multiplier = 2.0
max_delay_ms = 30000
request_timeout_ms = 30000

[scheduler]
batch_interval_ms = 100
min_batch_size = 1
max_batch_size = 50
max_concurrent_batches = 3
concurrency_window = 5
enable_type_grouping = true
enable_dependency_resolution = true

[health_check]
enabled = true
interval_seconds = 15
method = "eth_blockNumber"

[metrics]
enabled = true
failure_rate_warning = 0.25

[logging]
level = "info"
format = "pretty"
"#;

fn generate_config(output: &str, force: bool) -> CliResult<()> {
    let path = Path::new(output);
    if path.exists() && !force {
        return Err(CliError::Config(format!(
            "File {output} already exists. Use --force to overwrite."
        )));
    }

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, SAMPLE_CONFIG)?;

    print_success(&format!("Sample configuration generated: {output}"));
    print_info("Replace the example endpoint URLs before use.");

    Ok(())
}
