//! Initialize command.

use console::style;

use archivist::config::Settings;
use archivist::Archivist;

/// Create directories, run migrations and fix the identifier salt.
pub async fn cmd_init(settings: Settings) -> anyhow::Result<()> {
    println!("{} Running migrations...", style("→").cyan());
    let archivist = Archivist::open(settings).await?;

    let names = archivist.registry().names();
    if names.is_empty() {
        println!("{} No extractors enabled", style("!").yellow());
    } else {
        println!("  Extractors: {}", names.join(", "));
    }

    println!(
        "{} Initialized archivist in {}",
        style("✓").green(),
        archivist.settings().data_dir.display()
    );
    Ok(())
}
