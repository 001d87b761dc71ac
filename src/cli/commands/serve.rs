//! Long-running scheduler command.

use std::sync::Arc;

use console::style;

use crate::config::Config;
use crate::pipeline::{ScheduledJob, Scheduler};

use super::super::helpers::build_service;

/// Start maintenance and the scheduler, then wait for Ctrl+C.
pub async fn cmd_run(config: &Config, now: bool) -> anyhow::Result<()> {
    let service = build_service(config).await?;

    if config.proxy.check_on_start {
        println!("{} Checking proxies...", style("→").cyan());
        let probes = service.check_proxies_on_start().await;
        if !probes.is_empty() {
            let working = probes.iter().filter(|p| p.working).count();
            println!("  {} {}/{} proxies working", style("✓").green(), working, probes.len());
        }
    }

    let maintenance = service.spawn_maintenance(Some(tokio::time::Duration::from_secs(
        config.proxy.maintenance_secs.max(1),
    )));

    let mut schedule = config.schedule.schedule_config();
    if now {
        schedule.initial_delay = tokio::time::Duration::ZERO;
    }
    let job: Arc<dyn ScheduledJob> = service.clone();
    let scheduler = Scheduler::new(job, schedule);
    scheduler.start();

    println!(
        "{} Scheduler running: {} source(s), first run in {:?}, every {:?}",
        style("→").cyan(),
        service.sources().len(),
        schedule.initial_delay,
        schedule.interval
    );
    println!("  Press Ctrl+C to stop");

    tokio::signal::ctrl_c().await?;
    println!("{} Shutting down...", style("→").cyan());

    service.shutdown();
    scheduler.stop().await;
    if let Err(e) = maintenance.await {
        tracing::warn!("Maintenance task ended abnormally: {}", e);
    }

    println!("  {} Stopped", style("✓").green());
    Ok(())
}
