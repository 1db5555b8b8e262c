use clap::{Parser, Subcommand};
use conduit_core::config::AppConfig;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod commands;
use commands::{
    handle_call_command, handle_config_command, handle_probe_command, load_config, CallArgs,
    ConfigCommands,
};

#[derive(Parser)]
#[command(name = "conduit-cli")]
#[command(about = "Conduit CLI - configuration and endpoint tooling for the Conduit execution core")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file (defaults to $CONDUIT_CONFIG, then config/config.toml)
    #[arg(short, long, global = true)]
    config: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Configuration Management
    #[command(subcommand)]
    Config(ConfigCommands),

    /// Send one request through the resilient request path
    Call(CallArgs),

    /// Health-check every endpoint and print the metrics snapshot
    Probe,
}

fn init_logging(config: &AppConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "warn,conduit_core={level},conduit_cli={level}",
            level = config.logging.level
        ))
    });

    let registry = tracing_subscriber::registry().with(filter);
    if config.logging.format.as_str() == "json" {
        registry.with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr)).init();
    } else {
        let fmt_layer = tracing_subscriber::fmt::layer()
            .pretty()
            .with_file(true)
            .with_line_number(true)
            .with_target(false)
            .with_writer(std::io::stderr);
        registry.with(fmt_layer).init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Config(config_command) => {
            handle_config_command(config_command)?;
        }

        Commands::Call(args) => {
            let config = load_config(cli.config.as_deref())?;
            init_logging(&config);
            handle_call_command(cli.config.as_deref(), args).await?;
        }

        Commands::Probe => {
            let config = load_config(cli.config.as_deref())?;
            init_logging(&config);
            handle_probe_command(cli.config.as_deref()).await?;
        }
    }

    Ok(())
}
