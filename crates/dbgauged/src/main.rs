//! dbgauged — the dbgauge exporter daemon.
//!
//! Loads the target file, then serves Prometheus metrics for every target
//! on each request to the telemetry path.
//!
//! # Usage
//!
//! ```text
//! dbgauged --configfile /etc/dbgauge/targets.toml --web.listen-address :9161
//! ```

mod probe_mode;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{ArgAction, Parser};
use tracing::info;

use dbgauge_connect::{PostgresDriver, ProbeMode};
use dbgauge_core::CollectOptions;
use dbgauge_registry::TargetRegistry;
use dbgauge_scrape::{ScrapeTimeout, Scraper};

#[derive(Parser, Debug)]
#[command(name = "dbgauged", version, about = "Database metrics exporter for Prometheus")]
struct Cli {
    /// Address to listen on; `:port` listens on every interface.
    #[arg(long = "web.listen-address", env = "DBGAUGE_LISTEN_ADDRESS", default_value = ":9161")]
    listen_address: String,

    /// Path under which metrics are exposed.
    #[arg(long = "web.telemetry-path", env = "DBGAUGE_TELEMETRY_PATH", default_value = "/metrics")]
    telemetry_path: String,

    /// Collect the default metric set.
    #[arg(long = "default-metrics", env = "DBGAUGE_DEFAULT_METRICS", default_value_t = true, action = ArgAction::Set)]
    default_metrics: bool,

    /// Always collect table row counts.
    #[arg(long, env = "DBGAUGE_TABLEROWS")]
    tablerows: bool,

    /// Always collect table sizes.
    #[arg(long, env = "DBGAUGE_TABLEBYTES")]
    tablebytes: bool,

    /// Always collect index sizes.
    #[arg(long, env = "DBGAUGE_INDEXBYTES")]
    indexbytes: bool,

    /// Always collect large object (TOAST) sizes.
    #[arg(long, env = "DBGAUGE_LOBBYTES")]
    lobbytes: bool,

    /// Always collect replication and recovery state.
    #[arg(long, env = "DBGAUGE_RECOVERY")]
    recovery: bool,

    /// Target file.
    #[arg(long, env = "DBGAUGE_CONFIG_FILE", default_value = "targets.toml")]
    configfile: PathBuf,

    /// Scrape budget in seconds (connect, probe and every query), 2 to 14.
    #[arg(
        long,
        env = "DBGAUGE_TIMEOUT",
        default_value_t = ScrapeTimeout::DEFAULT_SECS,
        value_parser = clap::value_parser!(u64).range(ScrapeTimeout::MIN_SECS..=ScrapeTimeout::MAX_SECS)
    )]
    timeout: u64,

    /// Run connectivity probes in a child process.
    #[arg(long = "probe-isolate", env = "DBGAUGE_PROBE_ISOLATE")]
    probe_isolate: bool,

    /// Emit logs as JSON lines.
    #[arg(long = "log.json", env = "DBGAUGE_LOG_JSON")]
    log_json: bool,

    /// Probe every target once, print the result lines on stderr and exit.
    #[arg(long, hide = true)]
    testconn: bool,
}

impl Cli {
    fn defaults(&self) -> CollectOptions {
        CollectOptions {
            default_metrics: self.default_metrics,
            recovery: self.recovery,
            tablerows: self.tablerows,
            tablebytes: self.tablebytes,
            indexbytes: self.indexbytes,
            lobbytes: self.lobbytes,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize tracing.
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,dbgauge=debug"));
    if cli.log_json {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    if cli.testconn {
        return probe_mode::run_testconn(&cli.configfile, cli.timeout).await;
    }
    serve(cli).await
}

async fn serve(cli: Cli) -> anyhow::Result<()> {
    info!(version = env!("CARGO_PKG_VERSION"), "dbgauge exporter starting");

    let addr = parse_listen_address(&cli.listen_address)?;
    if !cli.telemetry_path.starts_with('/') || cli.telemetry_path == "/" {
        anyhow::bail!("telemetry path must start with '/' and cannot be '/': {}", cli.telemetry_path);
    }

    // ── Targets ────────────────────────────────────────────────

    let registry = TargetRegistry::from_file(&cli.configfile)
        .with_context(|| format!("loading {}", cli.configfile.display()))?;
    info!(path = ?cli.configfile, targets = registry.current().len(), "config loaded");

    // ── Scraper ────────────────────────────────────────────────

    let probe = if cli.probe_isolate {
        let program = std::env::current_exe().context("locating own executable for probe isolation")?;
        ProbeMode::Subprocess {
            program,
            args: probe_mode::child_args(&cli.configfile),
        }
    } else {
        ProbeMode::InProcess(Arc::new(PostgresDriver::new()))
    };

    let scraper = Scraper::new(Arc::new(registry), Arc::new(PostgresDriver::new()))
        .with_timeout(cli.timeout)
        .with_defaults(cli.defaults())
        .with_probe_mode(probe);
    info!(?scraper, "scraper initialized");

    // ── Start API server ───────────────────────────────────────

    let router = dbgauge_api::build_router(Arc::new(scraper), &cli.telemetry_path);
    info!(%addr, path = %cli.telemetry_path, "listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;

    // Graceful shutdown on Ctrl-C.
    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c()
                .await
                .expect("failed to install CTRL+C handler");
            info!("shutdown signal received");
        })
        .await?;

    info!("dbgauge exporter stopped");
    Ok(())
}

/// Accept `host:port`, or `:port` for every interface.
fn parse_listen_address(raw: &str) -> anyhow::Result<SocketAddr> {
    let full = if raw.starts_with(':') {
        format!("0.0.0.0{raw}")
    } else {
        raw.to_string()
    };
    full.parse()
        .with_context(|| format!("invalid listen address '{raw}'"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn listen_address_forms() {
        assert_eq!(parse_listen_address(":9161").unwrap(), "0.0.0.0:9161".parse().unwrap());
        assert_eq!(parse_listen_address("127.0.0.1:80").unwrap(), "127.0.0.1:80".parse().unwrap());
        assert!(parse_listen_address("nowhere").is_err());
    }

    #[test]
    fn cli_defaults() {
        let cli = Cli::parse_from(["dbgauged"]);
        assert_eq!(cli.listen_address, ":9161");
        assert_eq!(cli.telemetry_path, "/metrics");
        assert_eq!(cli.timeout, 5);
        assert_eq!(cli.defaults(), CollectOptions::default());
        assert!(!cli.testconn);
    }

    #[test]
    fn timeout_outside_open_interval_is_rejected() {
        for bad in ["0", "1", "15", "3600"] {
            assert!(Cli::try_parse_from(["dbgauged", "--timeout", bad]).is_err(), "{bad}");
        }
        assert_eq!(Cli::parse_from(["dbgauged", "--timeout", "2"]).timeout, 2);
        assert_eq!(Cli::parse_from(["dbgauged", "--timeout", "14"]).timeout, 14);
    }

    #[test]
    fn cli_feature_flags() {
        let cli = Cli::parse_from(["dbgauged", "--default-metrics", "false", "--tablerows", "--recovery"]);
        let opts = cli.defaults();
        assert!(!opts.default_metrics);
        assert!(opts.tablerows);
        assert!(opts.recovery);
        assert!(!opts.lobbytes);
    }
}
