//! One-shot harvest command.

use console::style;

use crate::config::Config;
use crate::service::RunStatus;

use super::super::helpers::{build_service, print_proxy_stats};

/// Run every source (or just `only`) once and print the report.
pub async fn cmd_scrape(config: &Config, only: Option<&str>, json: bool) -> anyhow::Result<()> {
    let mut config = config.clone();
    if let Some(name) = only {
        config.sources.retain(|s| s.name == name);
        if config.sources.is_empty() {
            anyhow::bail!("Source '{}' is not configured", name);
        }
    }
    if config.sources.is_empty() {
        println!("{} No sources configured", style("!").yellow());
        return Ok(());
    }

    let service = build_service(&config).await?;
    if config.proxy.check_on_start {
        service.check_proxies_on_start().await;
    }

    if !json {
        println!(
            "{} Harvesting {} source(s)",
            style("→").cyan(),
            config.sources.len()
        );
    }

    let cancel = tokio_util::sync::CancellationToken::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            ctrl_c.cancel();
        }
    });

    let report = service.run_scrape(&cancel).await;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    for outcome in &report.sources {
        match outcome.error {
            None => println!(
                "  {} {}: {} found, {} new, {} updated, {} geocoded",
                style("✓").green(),
                outcome.source,
                outcome.extracted,
                outcome.inserted,
                outcome.updated,
                outcome.geocoded
            ),
            Some(ref e) => println!("  {} {}: {}", style("✗").red(), outcome.source, e),
        }
    }

    match report.status {
        RunStatus::Success => println!(
            "{} {} companies harvested",
            style("✓").green(),
            report.companies_scraped
        ),
        RunStatus::Cancelled => println!(
            "{} Cancelled after {} companies",
            style("!").yellow(),
            report.companies_scraped
        ),
        RunStatus::AlreadyRunning => println!("{} A harvest is already running", style("!").yellow()),
    }

    if !report.proxy_stats.is_empty() {
        println!();
        print_proxy_stats(&report.proxy_stats);
    }
    Ok(())
}
