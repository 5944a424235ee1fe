use crate::service;
use azflow_cloud::CallContext;
use azflow_config::Settings;
use colored::Colorize;

pub async fn handle(settings: &Settings) -> anyhow::Result<()> {
    let service = service::build(settings)?;
    service.delete(&CallContext::background()).await?;

    println!("{}", "✓ nothing to delete".green().bold());
    println!("  role assignments are removed together with their VM or scale set");
    Ok(())
}
