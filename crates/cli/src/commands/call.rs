use clap::Args;
use conduit_core::{upstream::RequestOptions, Conduit};
use std::time::Duration;

use super::{
    config::load_config,
    utils::{CliError, CliResult},
};

#[derive(Args)]
pub struct CallArgs {
    /// Remote method name, e.g. eth_blockNumber
    pub method: String,

    /// JSON-encoded params, e.g. '["0xabc", "latest"]'
    pub params: Option<String>,

    /// Pin the call to one endpoint by name
    #[arg(short, long)]
    pub endpoint: Option<String>,

    /// Per-attempt timeout in milliseconds
    #[arg(long)]
    pub timeout_ms: Option<u64>,

    /// Retries after the first attempt
    #[arg(long)]
    pub retries: Option<u32>,
}

impl CallArgs {
    fn parsed_params(&self) -> CliResult<Option<serde_json::Value>> {
        self.params.as_deref().map(serde_json::from_str).transpose().map_err(CliError::from)
    }

    fn options(&self) -> RequestOptions {
        let mut options = RequestOptions::default();
        if let Some(endpoint) = &self.endpoint {
            options = options.with_endpoint(endpoint.clone());
        }
        if let Some(timeout_ms) = self.timeout_ms {
            options = options.with_timeout(Duration::from_millis(timeout_ms));
        }
        if let Some(retries) = self.retries {
            options = options.with_max_retries(retries);
        }
        options
    }
}

/// Sends one request on the direct path and prints the result as JSON.
pub async fn handle_call_command(config_file: Option<&str>, args: CallArgs) -> CliResult<()> {
    let params = args.parsed_params()?;
    let config = load_config(config_file)?;
    let conduit = Conduit::builder()
        .with_config(config)
        .disable_health_checker()
        .build()
        .map_err(|e| CliError::Config(e.to_string()))?;

    let result = conduit.request_with(&args.method, params, args.options()).await;
    conduit.shutdown().await;

    let value = result.map_err(|e| CliError::Request(e.to_string()))?;
    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(())
}
