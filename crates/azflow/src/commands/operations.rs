use azflow_cloud::{FileOperationStore, OperationStore};
use azflow_config::Settings;
use colored::Colorize;

pub async fn handle(settings: &Settings, json: bool) -> anyhow::Result<()> {
    let store = FileOperationStore::new(&settings.state_dir);
    let records = store.list().await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&records)?);
        return Ok(());
    }

    if records.is_empty() {
        println!("{}", "No operations in flight".dimmed());
        return Ok(());
    }

    println!(
        "{:<48} {:<8} {:<20} {}",
        "RESOURCE".bold(),
        "KIND".bold(),
        "STARTED".bold(),
        "TOKEN".bold()
    );
    for record in &records {
        println!(
            "{:<48} {:<8} {:<20} {}",
            record.id.cyan(),
            record.kind,
            record.started_at.format("%Y-%m-%d %H:%M:%S"),
            record.token
        );
    }
    Ok(())
}
