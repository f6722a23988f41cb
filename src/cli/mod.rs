//! Command-line entry point for the `cacheroute` proxy.
//!
//! Flags override the matching fields of the config file:
//!
//! ```text
//! cacheroute --config cacheroute.toml --listen 0.0.0.0:8080 --upstream http://127.0.0.1:3000
//! cacheroute --config cacheroute.toml --check
//! ```

pub mod logging;
pub mod serve;

use std::fmt::Write as _;
use std::path::PathBuf;

use clap::Parser;

use crate::config::{ConfigError, WorkerConfig};
use crate::router::RouteTable;

/// Caching reverse proxy with per-route strategies and versioned cache namespaces
#[derive(Debug, Parser)]
#[command(name = "cacheroute")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// TOML configuration file; defaults apply when omitted
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Address to listen on, e.g. 127.0.0.1:8080
    #[arg(long, value_name = "ADDR")]
    pub listen: Option<String>,

    /// Origin to front, e.g. http://127.0.0.1:3000
    #[arg(long, value_name = "URL")]
    pub upstream: Option<String>,

    /// Directory for the durable cache store
    #[arg(long, value_name = "DIR")]
    pub store_dir: Option<PathBuf>,

    /// Print the resolved route table and exit
    #[arg(long)]
    pub check: bool,
}

impl Cli {
    /// Loads the config file (if any), applies flag overrides, and validates
    /// the result.
    ///
    /// # Errors
    ///
    /// Any [`ConfigError`] from loading or validation.
    pub fn resolve_config(&self) -> Result<WorkerConfig, ConfigError> {
        let mut config = match &self.config {
            Some(path) => WorkerConfig::load(path)?,
            None => WorkerConfig::default(),
        };
        if let Some(listen) = &self.listen {
            config.server.listen.clone_from(listen);
        }
        if let Some(upstream) = &self.upstream {
            config.upstream.origin.clone_from(upstream);
        }
        if let Some(dir) = &self.store_dir {
            config.store.dir = Some(dir.clone());
        }
        config.validate()?;
        Ok(config)
    }
}

/// Runs the proxy, or prints the route table under `--check`.
///
/// # Errors
///
/// Configuration, storage, install, and bind failures.
pub async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = cli.resolve_config()?;
    if cli.check {
        print!("{}", describe(&config, &config.route_table()?));
        return Ok(());
    }
    serve::run(config).await
}

/// Human-readable summary of the namespaces and the route table.
pub fn describe(config: &WorkerConfig, table: &RouteTable) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "upstream:  {}", config.upstream.origin);
    let _ = writeln!(out, "static:    {}", config.static_namespace());
    let _ = writeln!(out, "dynamic:   {}", config.dynamic_namespace());
    let _ = writeln!(out, "routes:");
    for (i, rule) in table.rules().iter().enumerate() {
        let _ = writeln!(
            out,
            "  {:>2}. {:<10} {:<32} {}",
            i + 1,
            rule.pattern().kind(),
            rule.pattern().describe(),
            rule.strategy()
        );
    }
    let _ = writeln!(out, "  default: {}", table.default_strategy());
    out
}
