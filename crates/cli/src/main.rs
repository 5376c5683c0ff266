use std::net::{AddrParseError, SocketAddr};
use std::str::FromStr;

use clap::Parser;
use tracing::{error, info, warn};

mod config;

use config::{PlanDeps, PluginConfig};

fn init_tracing(debug: bool) {
    let default = if debug { "debug" } else { "info" };
    let env = std::env::var("HOIST_LOG").unwrap_or_else(|_| default.to_string());
    let filter = tracing_subscriber::EnvFilter::from_str(&env).unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(debug).with_writer(std::io::stderr).init();
}

/// Listener address for the exporter; `None` when unset or blank.
fn metrics_addr(raw: Option<&str>) -> Option<Result<SocketAddr, AddrParseError>> {
    raw.map(str::trim).filter(|a| !a.is_empty()).map(str::parse)
}

fn init_metrics() {
    let raw = std::env::var("HOIST_METRICS_ADDR").ok();
    match metrics_addr(raw.as_deref()) {
        None => {}
        Some(Ok(sock)) => {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            match builder.with_http_listener(sock).install() {
                Ok(()) => info!(addr = %sock, "prometheus metrics exporter listening"),
                Err(e) => warn!(error = %e, "failed to install metrics exporter"),
            }
        }
        Some(Err(_)) => warn!(addr = ?raw, "invalid HOIST_METRICS_ADDR; expected host:port"),
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let cfg = PluginConfig::parse();
    init_tracing(cfg.debug);
    init_metrics();

    let deps = PlanDeps::live(&cfg);
    let plan = cfg.build_plan(&deps);
    info!(steps = plan.len(), release = %cfg.release, ns = %cfg.namespace, "plan built");

    if let Err(e) = plan.execute().await {
        error!(error = %e, "plan failed");
        eprintln!("{}", e);
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metrics_addr_is_optional() {
        assert!(metrics_addr(None).is_none());
        assert!(metrics_addr(Some("  ")).is_none());
    }

    #[test]
    fn metrics_addr_parses_host_port() {
        let sock = metrics_addr(Some("127.0.0.1:9464")).unwrap().unwrap();
        assert_eq!(sock.port(), 9464);
        assert!(metrics_addr(Some("localhost")).unwrap().is_err());
    }
}
