//! Fake library entry for the `autobridge_agent` crate.
//!
//! Exposes `inner_main` so a workspace-level shim binary can call into the agent logic.
//!
//! The agent accepts control sessions on a local TCP port, executes device commands and
//! arms property monitors whose notifications are posted to callbacks or queued for polling.
#![cfg_attr(
    test,
    expect(clippy::indexing_slicing, reason = "This is not problematic in tests",)
)]

extern crate alloc;
extern crate core;

pub mod config;
pub mod decoder;
pub mod error;
pub mod handler;
pub mod monitor;
pub mod notifier;
pub mod registry;
pub mod router;
pub mod runtime;
pub mod sampler;
pub mod server;
pub mod speech;

use std::{env, fs, sync::Once};

use clap::{Parser, Subcommand, ValueEnum};
use eyre::{Result, WrapErr as _};
use tracing::{Instrument as _, info};
use tracing_subscriber::{EnvFilter, fmt::time::ChronoLocal};

use server::ServiceOptions;

static INIT_TRACING: Once = Once::new();

/// Top-level CLI parser for the agent.
#[derive(Debug, Parser)]
#[command(name = env!("CARGO_PKG_NAME"))]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(author = env!("CARGO_PKG_AUTHORS"))]
#[command(about = env!("CARGO_PKG_DESCRIPTION"))]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

/// Subcommands available for agent execution.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Start the agent as a service.
    Service(ServiceOptions),
}

/// Output format of the log subscriber.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    #[default]
    Compact,
    Json,
    Pretty,
}

/// The agent's main function; can be called from a shim binary.
///
/// # Errors
///
/// Returns an error if the config cannot be found or loaded, or if the server fails to start.
pub async fn inner_main(invocation: Cli) -> Result<()> {
    match invocation.command {
        Command::Service(args) => {
            let config_path = fs::canonicalize(&args.config).wrap_err(format!(
                "Config file not found at: {}",
                args.config.display()
            ))?;

            INIT_TRACING.call_once(move || {
                let default_level = if env::var("AUTOBRIDGE_INTEGRATION_TEST").is_ok() {
                    "error"
                } else {
                    "info"
                };

                let builder = tracing_subscriber::fmt()
                    .with_env_filter(
                        EnvFilter::try_from_default_env()
                            .unwrap_or_else(|_| EnvFilter::new(default_level)),
                    )
                    .with_timer(ChronoLocal::rfc_3339());

                match args.log_format {
                    LogFormat::Compact => builder.compact().init(),
                    LogFormat::Json => builder.json().init(),
                    LogFormat::Pretty => builder.pretty().init(),
                }
            });

            let startup_span = tracing::info_span!(
                "agent.startup",
                ?config_path,
                pid = ?std::process::id(),
                version = env!("CARGO_PKG_VERSION")
            );

            async {
                info!("Starting agent");
                server::start(&config_path, args.port, args.bind.as_deref()).await
            }
            .instrument(startup_span)
            .await
        }
    }
}
