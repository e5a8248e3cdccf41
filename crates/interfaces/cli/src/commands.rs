use std::path::Path;
use std::time::Duration;

use anyhow::{Result, bail};
use tokio::sync::watch;
use tracing::{info, warn};

use digest_config::AppConfig;
use digest_llm::{LlmSettings, build_generator};
use digest_pipeline::{
    CycleOutcome, DigestComposer, PipelineState, RetryPolicy, Scheduler, load_analyses,
    write_digest,
};
use digest_store::AggregateStore;

fn retry_policy(config: &AppConfig) -> RetryPolicy {
    RetryPolicy::new(
        Duration::from_secs(config.llm.rate_limit_backoff_secs),
        config.llm.max_attempts,
    )
}

pub(crate) async fn run_loop(config: &AppConfig, settings: LlmSettings) -> Result<()> {
    info!(
        source = %config.source.csv_path,
        reports = %config.store.reports_dir,
        provider = ?settings.provider,
        model = %settings.model,
        "starting digest pipeline"
    );
    let generator = build_generator(settings)?;
    let state = PipelineState::from_config(config, generator).await?;
    let scheduler = Scheduler::new(
        state,
        Duration::from_secs(config.schedule.poll_interval_secs),
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("shutdown requested"),
            Err(err) => warn!(?err, "failed to listen for ctrl-c, stopping"),
        }
        let _ = shutdown_tx.send(true);
    });

    scheduler.run(shutdown_rx).await;
    Ok(())
}

pub(crate) async fn run_once(config: &AppConfig, settings: LlmSettings) -> Result<()> {
    let generator = build_generator(settings)?;
    let mut state = PipelineState::from_config(config, generator).await?;

    match state.run_cycle().await? {
        CycleOutcome::NotReady => {
            println!("source file {} not found", config.source.csv_path);
        }
        CycleOutcome::Unchanged => println!("source file unchanged"),
        CycleOutcome::Processed(report) => {
            println!("── cycle ────────────────────────────────────────────");
            println!("  rows:         {}", report.rows);
            println!("  duplicates:   {}", report.duplicates);
            println!("  unrecognized: {}", report.unrecognized);
            println!("  malformed:    {}", report.malformed + report.unreadable);
            println!("  empty bodies: {}", report.empty);
            println!("  updated:      {}", list_or_dash(&report.updated));
            println!("  no new text:  {}", list_or_dash(&report.unchanged));
            println!("  failed:       {}", list_or_dash(&report.failed));
            if !report.failed.is_empty() {
                bail!("{} categories failed to update", report.failed.len());
            }
        }
    }
    Ok(())
}

pub(crate) async fn run_status(config: &AppConfig) -> Result<()> {
    let store = AggregateStore::new(&config.store.reports_dir);
    let aggregates = store.list().await?;
    if aggregates.is_empty() {
        println!("no aggregates in {}", store.dir().display());
        return Ok(());
    }

    println!("── aggregates ({}) ──────────────────────────────────", store.dir().display());
    for aggregate in aggregates {
        let updated = aggregate
            .last_updated
            .map(|ts| ts.format("%Y-%m-%d %H:%M:%S UTC").to_string())
            .unwrap_or_else(|| "never".to_string());
        println!(
            "  {:<14} {:>4} entries  updated {updated}",
            aggregate.category,
            aggregate.entries.len()
        );
        if !aggregate.keywords.is_empty() {
            println!("  {:<14} {}", "", aggregate.keywords.join(", "));
        }
    }
    Ok(())
}

pub(crate) async fn run_compose(
    config: &AppConfig,
    settings: LlmSettings,
    output: &Path,
) -> Result<()> {
    let store = AggregateStore::new(&config.store.reports_dir);
    let sections = load_analyses(&store, &config.compose.categories).await?;
    if sections.is_empty() {
        bail!(
            "no analyses found in {} for {}",
            store.dir().display(),
            config.compose.categories.join(", ")
        );
    }

    let composer = DigestComposer::new(
        build_generator(settings)?,
        retry_policy(config),
        config.compose.iterations,
        config.compose.section_words,
    );
    let digest = composer.compose(&sections).await?;
    write_digest(output, &digest).await?;
    println!(
        "digest written to {} (score {:.1}, {} refinement rounds)",
        output.display(),
        digest.score,
        digest.rounds
    );
    Ok(())
}

fn list_or_dash(items: &[String]) -> String {
    if items.is_empty() {
        "-".to_string()
    } else {
        items.join(", ")
    }
}
