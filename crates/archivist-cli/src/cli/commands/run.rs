//! Worker command.

use std::time::Duration;

use console::style;
use tokio::sync::watch;

use archivist::config::Settings;
use archivist::{Archivist, RunReport};

pub async fn cmd_run(settings: Settings, once: bool, deadline_secs: u64) -> anyhow::Result<()> {
    let archivist = Archivist::open(settings).await?;
    let orchestrator = archivist.orchestrator();

    let report = if once {
        orchestrator
            .run_until_idle(Duration::from_secs(deadline_secs))
            .await?
    } else {
        let (tx, rx) = watch::channel(false);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                eprintln!("{} Stopping after in-flight work...", style("!").yellow());
                let _ = tx.send(true);
            }
        });
        println!(
            "{} Workers running ({} extractors); Ctrl-C to stop",
            style("→").cyan(),
            archivist.registry().len()
        );
        orchestrator.run(rx).await?
    };

    print_report(&report);
    Ok(())
}

fn print_report(report: &RunReport) {
    println!(
        "{} {} job tick(s) ({} failed, {} over budget), {} link tick(s)",
        style("✓").green(),
        report.jobs.claimed,
        report.jobs.errored,
        report.jobs.timed_out,
        report.links.claimed
    );
    if !report.settled() {
        println!(
            "  {} link(s) and {} job(s) still pending",
            report.pending_links, report.pending_jobs
        );
    }
}
