//! One detect → group → merge → synthesize → persist pass.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use tracing::{debug, error, info, warn};

use digest_config::AppConfig;
use digest_llm::Generator;
use digest_store::{AggregateStore, IdJournal};

use crate::detector::{ChangeDetector, ScanDecision};
use crate::grouper::{CategoryAllowList, CategoryBatch, group_records};
use crate::ledger::DeduplicationLedger;
use crate::records::parse_records;
use crate::retry::RetryPolicy;
use crate::synth::SynthesisInvoker;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    /// The source file does not exist yet.
    NotReady,
    /// The source file has not changed since the last processed scan.
    Unchanged,
    Processed(CycleReport),
}

/// Per-cycle counters and the categories each update ended in.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub rows: usize,
    pub unreadable: usize,
    pub malformed: usize,
    pub unrecognized: usize,
    pub duplicates: usize,
    pub empty: usize,
    /// Categories whose aggregate was re-synthesized and persisted.
    pub updated: Vec<String>,
    /// Categories whose new rows carried only content already present.
    pub unchanged: Vec<String>,
    pub failed: Vec<String>,
}

enum CategoryUpdate {
    Updated { appended: usize, total: usize },
    NothingNew,
}

/// Everything a cycle reads and mutates.  Owned by the scheduler behind a
/// single mutex so no two cycles interleave.
pub struct PipelineState {
    source_path: PathBuf,
    detector: ChangeDetector,
    ledger: DeduplicationLedger,
    allow: CategoryAllowList,
    store: AggregateStore,
    synthesizer: SynthesisInvoker,
    throttle: Duration,
}

impl PipelineState {
    pub fn new(
        source_path: impl Into<PathBuf>,
        allow: CategoryAllowList,
        store: AggregateStore,
        ledger: DeduplicationLedger,
        synthesizer: SynthesisInvoker,
    ) -> Self {
        Self {
            source_path: source_path.into(),
            detector: ChangeDetector::new(),
            ledger,
            allow,
            store,
            synthesizer,
            throttle: Duration::ZERO,
        }
    }

    /// Pause between consecutive category updates within one cycle.
    pub fn with_throttle(mut self, throttle: Duration) -> Self {
        self.throttle = throttle;
        self
    }

    /// Build the state from configuration: creates the reports directory and
    /// replays the ledger journal when persistence is enabled.
    pub async fn from_config(config: &AppConfig, generator: Arc<dyn Generator>) -> Result<Self> {
        let store = AggregateStore::new(&config.store.reports_dir);
        store
            .ensure_dir()
            .await
            .context("failed to create the reports directory")?;

        let ledger = if config.store.persist_ledger {
            DeduplicationLedger::with_journal(IdJournal::new(&config.store.ledger_path))
                .await
                .context("failed to replay the ledger journal")?
        } else {
            info!("ledger journal disabled, processed ids are kept in memory only");
            DeduplicationLedger::in_memory()
        };

        let retry = RetryPolicy::new(
            Duration::from_secs(config.llm.rate_limit_backoff_secs),
            config.llm.max_attempts,
        );

        Ok(Self::new(
            &config.source.csv_path,
            CategoryAllowList::new(config.categories.allow.iter().cloned()),
            store,
            ledger,
            SynthesisInvoker::new(generator, retry),
        )
        .with_throttle(Duration::from_secs(config.schedule.inter_category_delay_secs)))
    }

    pub fn source_path(&self) -> &Path {
        &self.source_path
    }

    pub fn store(&self) -> &AggregateStore {
        &self.store
    }

    pub fn ledger(&self) -> &DeduplicationLedger {
        &self.ledger
    }

    /// Run one full cycle.  Per-category failures are logged and reported;
    /// only a failure to read or parse the source file is returned as an
    /// error.
    pub async fn run_cycle(&mut self) -> Result<CycleOutcome> {
        let decision = self
            .detector
            .scan(&self.source_path)
            .await
            .with_context(|| format!("failed to read {}", self.source_path.display()))?;
        let raw = match decision {
            ScanDecision::NotReady => {
                info!(path = %self.source_path.display(), "source file not found, waiting");
                return Ok(CycleOutcome::NotReady);
            }
            ScanDecision::Unchanged => {
                debug!("source file unchanged");
                return Ok(CycleOutcome::Unchanged);
            }
            ScanDecision::Changed(raw) => raw,
        };

        let mut report = CycleReport::default();
        if raw.trim().is_empty() {
            info!("source file is empty");
            return Ok(CycleOutcome::Processed(report));
        }

        let parsed = parse_records(&raw)?;
        report.rows = parsed.records.len();
        report.unreadable = parsed.unreadable;

        let grouping = group_records(parsed.records, &self.allow, &mut self.ledger);
        report.malformed = grouping.malformed;
        report.unrecognized = grouping.unrecognized;
        report.duplicates = grouping.duplicates;
        report.empty = grouping.empty_ids.len();
        info!(
            rows = report.rows,
            accepted = grouping.accepted(),
            categories = grouping.batches.len(),
            malformed = report.malformed,
            unrecognized = report.unrecognized,
            duplicates = report.duplicates,
            empty = report.empty,
            unreadable = report.unreadable,
            "source scanned"
        );

        if let Err(err) = self.ledger.commit(&grouping.empty_ids).await {
            warn!(?err, ids = grouping.empty_ids.len(), "failed to journal empty-body ids");
        }

        for (idx, batch) in grouping.batches.iter().enumerate() {
            if idx > 0 && !self.throttle.is_zero() {
                tokio::time::sleep(self.throttle).await;
            }

            match self.update_category(batch).await {
                Ok(CategoryUpdate::Updated { appended, total }) => {
                    info!(category = %batch.category, appended, total, "category updated");
                    report.updated.push(batch.category.clone());
                }
                Ok(CategoryUpdate::NothingNew) => {
                    info!(category = %batch.category, "no new content, analysis kept");
                    report.unchanged.push(batch.category.clone());
                }
                Err(err) => {
                    error!(
                        category = %batch.category,
                        error = %format!("{err:#}"),
                        "category update failed"
                    );
                    report.failed.push(batch.category.clone());
                }
            }
        }

        info!(
            updated = report.updated.len(),
            unchanged = report.unchanged.len(),
            failed = report.failed.len(),
            "cycle complete"
        );
        Ok(CycleOutcome::Processed(report))
    }

    async fn update_category(&self, batch: &CategoryBatch) -> Result<CategoryUpdate> {
        let category = batch.category.as_str();
        let mut aggregate = self.store.load(category).await?;
        let appended = aggregate.merge_bodies(batch.bodies(), Utc::now());
        debug!(
            category,
            messages = batch.messages.len(),
            appended,
            "merged new content"
        );

        if appended == 0 && (!aggregate.analysis.is_empty() || aggregate.entries.is_empty()) {
            self.commit_ids(batch).await;
            return Ok(CategoryUpdate::NothingNew);
        }

        let synthesis = self
            .synthesizer
            .synthesize(category, &aggregate.full_content())
            .await
            .with_context(|| format!("synthesis failed for {category}"))?;
        aggregate.analysis = synthesis.analysis;
        aggregate.keywords = synthesis.keywords;

        let path = self.store.persist(&mut aggregate, Utc::now()).await?;
        debug!(category, path = %path.display(), "aggregate written");
        self.commit_ids(batch).await;

        Ok(CategoryUpdate::Updated {
            appended,
            total: aggregate.entries.len(),
        })
    }

    async fn commit_ids(&self, batch: &CategoryBatch) {
        // The aggregate is already on disk at this point; a journal failure
        // only means these ids may be offered again after a restart.
        if let Err(err) = self.ledger.commit(&batch.message_ids()).await {
            warn!(category = %batch.category, ?err, "failed to journal processed ids");
        }
    }
}
