//! # SmartSite provisioner
//!
//! Operator entry point. Converges a SharePoint site to the list schema the
//! SmartSite builder expects:
//!
//! - `smartsite provision` creates missing lists and columns, then seeds empty
//!   lists with starter content
//! - `smartsite provision --dry-run` prints what would change
//! - `smartsite schema` prints the embedded schema
//! - `smartsite validate` checks schema, seed data and configuration
//!
//! The site comes from the `[site]` table of the config file or from
//! `SMARTSITE_SITE_URL` / `SMARTSITE_ACCESS_TOKEN`. Log verbosity follows
//! `RUST_LOG` and defaults to `info`.

#![forbid(unsafe_code)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

mod cli;
mod commands;
mod config;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use crate::cli::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let cli = Cli::parse();
    commands::execute_command(cli.config, cli.command).await
}

/// Initialize tracing subscriber with environment filter.
fn init_tracing() {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}
