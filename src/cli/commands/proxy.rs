//! Proxy pool commands.

use console::style;

use crate::config::Config;

use super::super::helpers::{build_service, print_proxy_stats};

pub async fn cmd_proxy_stats(config: &Config) -> anyhow::Result<()> {
    let service = build_service(config).await?;
    if !service.proxies().is_enabled() {
        println!("{} Proxy rotation is disabled", style("!").yellow());
    }
    print_proxy_stats(&service.get_proxy_stats().await);
    Ok(())
}

/// Probe each configured proxy against the check URL.
pub async fn cmd_proxy_test(config: &Config) -> anyhow::Result<()> {
    let service = build_service(config).await?;
    let proxies = service.proxies().proxies().await;
    if proxies.is_empty() {
        println!("{} No proxies configured", style("!").yellow());
        return Ok(());
    }

    println!(
        "{} Testing {} proxies against {}",
        style("→").cyan(),
        proxies.len(),
        config.proxy.check_url
    );

    let probes = service.test_proxies().await;
    for probe in &probes {
        if probe.working {
            println!(
                "  {} {}:{} ({} ms)",
                style("✓").green(),
                probe.host,
                probe.port,
                probe.response_time_ms
            );
        } else {
            println!(
                "  {} {}:{} {}",
                style("✗").red(),
                probe.host,
                probe.port,
                probe.error.as_deref().unwrap_or("failed")
            );
        }
    }

    let working = probes.iter().filter(|p| p.working).count();
    println!("{}/{} working", working, probes.len());
    Ok(())
}
