//! CLI command definitions using clap.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// SmartSite provisioning tool
#[derive(Parser, Debug)]
#[command(name = "smartsite")]
#[command(version)]
#[command(about = "Converge a SharePoint site to the SmartSite list schema")]
#[command(
    long_about = "Creates the lists and columns the SmartSite builder reads from, seeds empty lists with starter content, and never deletes or alters anything it did not create."
)]
pub struct Cli {
    /// Configuration file (TOML or JSON)
    #[arg(short, long, global = true, env = "SMARTSITE_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Bring the site's lists and columns in line with the schema
    Provision {
        /// Show what would change without changing anything
        #[arg(short, long, default_value_t = false)]
        dry_run: bool,

        /// Print the report as JSON
        #[arg(long, default_value_t = false)]
        json: bool,
    },

    /// Print the embedded schema
    Schema {
        /// Print as JSON
        #[arg(long, default_value_t = false)]
        json: bool,
    },

    /// Check the schema, seed data and configuration
    Validate,
}
