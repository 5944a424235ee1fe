use crate::{service, specs};
use azflow_cloud::{CallContext, PassReport, RetryConfig, SpecPhase};
use azflow_config::Settings;
use colored::Colorize;
use std::path::Path;
use std::time::Duration;

pub async fn handle(
    settings: &Settings,
    specs_path: &Path,
    wait: bool,
    timeout: Option<u64>,
    max_attempts: u32,
) -> anyhow::Result<()> {
    let specs = specs::load(specs_path)?;
    println!(
        "{} {} ({} specs)",
        "Reconciling".blue(),
        specs_path.display().to_string().cyan(),
        specs.len()
    );

    let service = service::build(settings)?;

    let (ctx, canceller) = CallContext::with_cancel();
    let ctx = match timeout {
        Some(secs) => ctx.with_timeout(Duration::from_secs(secs)),
        None => ctx,
    };
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupted, cancelling in-flight calls");
            canceller.cancel();
        }
    });

    let retry = RetryConfig {
        max_attempts: if wait { max_attempts.max(1) } else { 1 },
        ..RetryConfig::default()
    };

    let mut attempt = 1;
    loop {
        match service.reconcile(&ctx, &specs).await {
            Ok(report) => {
                print_report(&report);
                return Ok(());
            }
            Err(e) if e.is_retryable() => match retry.delay_for(attempt) {
                Some(delay) => {
                    println!(
                        "{} pass {} not converged: {} (retrying in {:?})",
                        "…".yellow(),
                        attempt,
                        e,
                        delay
                    );
                    ctx.run(async {
                        tokio::time::sleep(delay).await;
                        Ok(())
                    })
                    .await?;
                    attempt += 1;
                }
                None => {
                    eprintln!("{}", "✗ not converged".yellow().bold());
                    if !wait {
                        eprintln!("  run again or pass --wait to retry automatically");
                    }
                    return Err(e.into());
                }
            },
            Err(e) => {
                eprintln!("{}", "✗ reconcile failed".red().bold());
                return Err(e.into());
            }
        }
    }
}

fn print_report(report: &PassReport) {
    println!("{}", "✓ reconcile pass complete".green().bold());
    for status in &report.specs {
        let marker = match status.phase {
            SpecPhase::Done => "✓".green(),
            SpecPhase::Failed => "✗".red(),
            _ => "·".dimmed(),
        };
        println!(
            "  {} {} {} ({})",
            marker,
            status.resource_type,
            status.name.cyan(),
            status.phase
        );
    }
    let untouched = report.untouched().count();
    if untouched > 0 {
        println!(
            "  {}",
            format!("{} spec(s) left for a later pass", untouched).dimmed()
        );
    }
}
