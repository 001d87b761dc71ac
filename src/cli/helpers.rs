//! Shared helper functions for CLI commands.

use std::sync::Arc;

use console::style;

use crate::config::Config;
use crate::proxy_pool::{ProxyStats, ProxyStatus};
use crate::service::HarvestService;

/// Assemble the service from configuration.
pub async fn build_service(config: &Config) -> anyhow::Result<Arc<HarvestService>> {
    let service = HarvestService::from_config(config).await?;
    Ok(Arc::new(service))
}

/// Truncate to `max` characters, marking the cut with an ellipsis.
pub fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let cut: String = s.chars().take(max.saturating_sub(1)).collect();
    format!("{}…", cut)
}

fn styled_status(status: ProxyStatus) -> String {
    match status {
        ProxyStatus::Available => style("available").green().to_string(),
        ProxyStatus::Limited => style("limited").yellow().to_string(),
        ProxyStatus::Blocked => style("blocked").red().to_string(),
    }
}

/// Print a proxy stats table.
pub fn print_proxy_stats(stats: &[ProxyStats]) {
    if stats.is_empty() {
        println!("{} No proxies configured", style("!").yellow());
        return;
    }

    println!("{:<28} {:>8} {:>8} {:>9}  Status", "Proxy", "Minute", "Today", "Failures");
    println!("{}", "-".repeat(68));
    for s in stats {
        println!(
            "{:<28} {:>8} {:>8} {:>9}  {}",
            truncate(&format!("{}:{}", s.host, s.port), 28),
            s.requests_this_minute,
            s.requests_today,
            s.consecutive_failures,
            styled_status(s.status)
        );
    }
}
