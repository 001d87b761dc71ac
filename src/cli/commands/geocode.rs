//! Geocoding commands.

use console::style;

use crate::config::Config;

use super::super::helpers::build_service;

pub async fn cmd_geocode(config: &Config, address: Option<&str>, stats: bool) -> anyhow::Result<()> {
    let service = build_service(config).await?;

    if let Some(address) = address {
        match service.geocoder().resolve(address).await? {
            Some(c) => println!("{} {:.6}, {:.6}", style("✓").green(), c.lat, c.lng),
            None => println!("{} No match for '{}'", style("✗").red(), address),
        }
    }

    if stats {
        let stats = service.geocoding_stats().await?;
        let last = stats
            .last_request_at
            .map(|dt| dt.format("%Y-%m-%d %H:%M:%S UTC").to_string())
            .unwrap_or_else(|| "Never".to_string());
        println!("\n{}", style("Geocoding quota").bold());
        println!("  Requests today:  {}", stats.daily_requests);
        println!("  Remaining:       {}", stats.remaining_requests);
        println!("  Last request:    {}", last);
    }
    Ok(())
}
