//! CLI command handlers.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use smartsite_provisioner::{
    ConvergenceReport, MemoryStore, Orchestrator, ProvisionAction, ProvisionGuard, SchemaRegistry,
    SeedCatalog, SiteStore,
};
use smartsite_sprest::SpRestStore;
use tracing::{info, warn};

use crate::cli::Commands;
use crate::config::AppConfig;

/// Execute a CLI command.
///
/// This is the main command dispatcher that routes to the appropriate handler.
pub async fn execute_command(config: Option<PathBuf>, command: Commands) -> Result<()> {
    match command {
        Commands::Provision { dry_run, json } => cmd_provision(config, dry_run, json).await,
        Commands::Schema { json } => cmd_schema(json),
        Commands::Validate => cmd_validate(config),
    }
}

/// Converge the configured site, or print the plan for it.
async fn cmd_provision(path: Option<PathBuf>, dry_run: bool, json: bool) -> Result<()> {
    let config = AppConfig::load(path.as_deref())?;

    let store: Arc<dyn SiteStore> = if dry_run && config.site.is_none() {
        warn!("No site configured, planning against an empty site");
        MemoryStore::new_arc()
    } else {
        Arc::new(SpRestStore::new(config.site()?.clone())?)
    };

    let orchestrator = Orchestrator::standard(store, config.provisioner.clone())?;

    if dry_run {
        let plan = orchestrator.plan().await.context("Failed to read site state")?;
        return print_plan(&plan, json);
    }

    info!("Provisioning site");
    let guard = ProvisionGuard::new(Arc::new(orchestrator));
    let report = guard.ensure_provisioned().await?;
    print_report(&report, json)?;

    if !report.converged() {
        bail!(
            "{} provisioning actions failed; rerun to retry them",
            report.actions_failed.len()
        );
    }
    Ok(())
}

fn print_plan(plan: &[ProvisionAction], json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(plan)?);
        return Ok(());
    }

    if plan.is_empty() {
        println!("Site is up to date");
        return Ok(());
    }

    println!("Would perform {} actions:", plan.len());
    for action in plan {
        println!("  {}", action.description());
    }
    Ok(())
}

fn print_report(report: &ConvergenceReport, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
        return Ok(());
    }

    println!(
        "Lists: {}/{} present",
        report.materialized_lists, report.desired_lists
    );

    if report.is_noop() {
        println!("Nothing to do, site is up to date");
        return Ok(());
    }

    for action in &report.actions_taken {
        println!("  ok      {}", action.description());
    }
    for (action, reason) in &report.actions_failed {
        println!("  FAILED  {}: {reason}", action.description());
    }
    Ok(())
}

/// Print the embedded schema.
fn cmd_schema(json: bool) -> Result<()> {
    let registry = SchemaRegistry::standard();

    if json {
        println!("{}", serde_json::to_string_pretty(registry)?);
        return Ok(());
    }

    for list in registry.lists() {
        println!("{} ({})", list.title, list.template);
        for column in &list.columns {
            let lookup = column
                .lookup_target()
                .map(|target| format!(" -> {target}"))
                .unwrap_or_default();
            let indexed = if column.indexed { " [indexed]" } else { "" };
            println!(
                "  {:<24} {:<16}{lookup}{indexed}",
                column.internal_name,
                column.kind.name()
            );
        }
    }
    println!(
        "{} lists, {} columns",
        registry.len(),
        registry.column_count()
    );
    Ok(())
}

/// Check the embedded schema and seeds, and the configuration if any.
fn cmd_validate(path: Option<PathBuf>) -> Result<()> {
    let mut problems = Vec::new();

    let registry = SchemaRegistry::standard();
    problems.extend(registry.validate().iter().map(ToString::to_string));

    match SeedCatalog::standard() {
        Ok(catalog) => problems.extend(
            catalog
                .datasets
                .iter()
                .filter(|dataset| registry.get(&dataset.list).is_none())
                .map(|dataset| format!("seed data targets unknown list '{}'", dataset.list)),
        ),
        Err(e) => problems.push(e.to_string()),
    }

    match AppConfig::load(path.as_deref()) {
        Ok(config) => {
            if let Err(e) = config.provisioner.validate() {
                problems.push(e.to_string());
            }
            match &config.site {
                Some(site) => {
                    if let Err(e) = site.validate() {
                        problems.push(e.to_string());
                    }
                }
                None => warn!("No site configured; only the provisioner settings were checked"),
            }
        }
        Err(e) => problems.push(format!("{e:#}")),
    }

    if problems.is_empty() {
        println!(
            "OK: {} lists, {} columns",
            registry.len(),
            registry.column_count()
        );
        return Ok(());
    }

    for problem in &problems {
        println!("  {problem}");
    }
    bail!("{} problems found", problems.len())
}
