use conduit_core::{upstream::HealthChecker, Conduit};
use std::{sync::Arc, time::Duration};

use super::{
    config::load_config,
    utils::{print_error, print_success, CliError, CliResult},
};

/// Health-checks every endpoint once and prints the probe results and the metrics
/// snapshot as JSON.
pub async fn handle_probe_command(config_file: Option<&str>) -> CliResult<()> {
    let config = load_config(config_file)?;
    let probe_timeout = Duration::from_millis(config.health_check.timeout_ms);
    let method = config.health_check.method.clone();
    let interval = config.health_check_interval();

    let conduit = Conduit::builder()
        .with_config(config)
        .disable_health_checker()
        .build()
        .map_err(|e| CliError::Config(e.to_string()))?;

    let components = conduit.components();
    let checker = HealthChecker::new(
        Arc::clone(components.balancer()),
        Arc::clone(components.pool()),
        method,
        probe_timeout,
        interval,
    );
    let probes = checker.probe_all().await;
    let snapshot = conduit.get_metrics();
    conduit.shutdown().await;

    let report = serde_json::json!({ "probes": probes, "metrics": snapshot });
    println!("{}", serde_json::to_string_pretty(&report)?);

    let unhealthy = probes.iter().filter(|p| !p.healthy).count();
    if unhealthy == 0 {
        print_success(&format!("All {} endpoints responded", probes.len()));
        Ok(())
    } else {
        print_error(&format!("{unhealthy} of {} endpoints failed the probe", probes.len()));
        Err(CliError::Request(format!("{unhealthy} endpoints unhealthy")))
    }
}
