//! Link commands.

use console::style;

use archivist::config::Settings;
use archivist::models::{ArchiveOptions, HistoryStatus, JobStatus, LinkStatus};
use archivist::{Archivist, LinkEdit};

use super::parse_link_id;

pub async fn cmd_add(
    settings: Settings,
    url: &str,
    tags: Vec<String>,
    only: Vec<String>,
    overwrite: bool,
) -> anyhow::Result<()> {
    let archivist = Archivist::open(settings).await?;
    for name in &only {
        if archivist.registry().get(name).is_none() {
            anyhow::bail!(
                "unknown or disabled extractor '{}' (enabled: {})",
                name,
                archivist.registry().names().join(", ")
            );
        }
    }

    let id = archivist
        .submit(url, tags, ArchiveOptions { overwrite, only })
        .await?;
    println!("{} Queued {}", style("✓").green(), id);
    println!("  Run `archivist run --once` to archive it now");
    Ok(())
}

fn job_marker(status: JobStatus) -> console::StyledObject<&'static str> {
    match status {
        JobStatus::Succeeded => style("✓").green(),
        JobStatus::Failed => style("✗").red(),
        JobStatus::Backoff => style("↻").yellow(),
        JobStatus::Started => style("→").cyan(),
        JobStatus::Queued => style("·").dim(),
    }
}

pub async fn cmd_status(settings: Settings, id: &str, json: bool) -> anyhow::Result<()> {
    let id = parse_link_id(id)?;
    let archivist = Archivist::open(settings).await?;
    let snapshot = archivist.get_status(&id).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&snapshot)?);
        return Ok(());
    }

    let link = &snapshot.link;
    println!("{} {}", style(link.id.as_str()).bold(), link.url);
    if let Some(ref title) = link.title {
        println!("  Title:   {}", title);
    }
    if !link.tags.is_empty() {
        println!("  Tags:    {}", link.tags.join(", "));
    }
    println!("  Status:  {}", link.status);
    println!(
        "  Created: {}",
        link.created_at.format("%Y-%m-%d %H:%M:%S UTC")
    );
    println!(
        "  Output:  {}",
        archivist.layout().link_dir(&link.id).display()
    );

    println!();
    for job in &snapshot.jobs {
        let detail = match job.status {
            JobStatus::Succeeded => job.output.clone().unwrap_or_else(|| "skipped".to_string()),
            JobStatus::Backoff => format!(
                "retry {} at {}",
                job.retries + 1,
                job.retry_at
                    .map(|t| t.format("%H:%M:%S").to_string())
                    .unwrap_or_default()
            ),
            _ => job
                .error
                .as_deref()
                .and_then(|e| e.lines().next())
                .unwrap_or("")
                .to_string(),
        };
        println!(
            "  {} {:<12} {:<10} {}",
            job_marker(job.status),
            job.extractor,
            job.status.as_str(),
            detail
        );
    }

    let skipped = snapshot
        .history
        .iter()
        .filter(|r| r.entry.status == HistoryStatus::Skipped)
        .count();
    println!();
    println!(
        "  {} attempt(s) recorded, {} skipped",
        snapshot.history.len() - skipped,
        skipped
    );
    Ok(())
}

pub async fn cmd_list(settings: Settings, status: Option<&str>, limit: usize) -> anyhow::Result<()> {
    let status = match status {
        Some(s) => Some(
            LinkStatus::from_str(s)
                .ok_or_else(|| anyhow::anyhow!("unknown status '{}'", s))?,
        ),
        None => None,
    };
    let archivist = Archivist::open(settings).await?;
    let links = archivist.list_links(status, limit).await?;
    if links.is_empty() {
        println!("{} No links", style("!").yellow());
        return Ok(());
    }
    for link in links {
        println!(
            "{}  {:<8} {}",
            link.id,
            link.status.as_str(),
            link.title.as_deref().unwrap_or(&link.url)
        );
    }
    Ok(())
}

pub async fn cmd_edit(settings: Settings, id: &str, edit: LinkEdit) -> anyhow::Result<()> {
    let id = parse_link_id(id)?;
    let archivist = Archivist::open(settings).await?;
    let link = archivist.edit_link(&id, edit).await?;
    println!("{} Updated {}", style("✓").green(), link.id);
    if let Some(ref title) = link.title {
        println!("  Title: {}", title);
    }
    println!("  Tags:  {}", link.tags.join(", "));
    Ok(())
}

pub async fn cmd_rearchive(settings: Settings, id: &str, overwrite: bool) -> anyhow::Result<()> {
    let id = parse_link_id(id)?;
    let archivist = Archivist::open(settings).await?;
    archivist.rearchive(&id, overwrite).await?;
    println!("{} Re-queued {}", style("✓").green(), id);
    Ok(())
}
