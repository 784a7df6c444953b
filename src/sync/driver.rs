use crate::catalog::{
    AttachmentStore, CatalogStore, RecordId,
    lookup::{create_skeleton, find_by_reference},
};
use crate::feed::{FeedEntry, FeedSource, parse_feed};
use crate::models::{EntryFailure, RunOutcome, RunReport, StageReport, SweepSummary};
use crate::sync::{mapper::map_entry, media::MediaSync, sweeper};
use chrono::Utc;
use serde_json::{Value, json};
use std::{collections::BTreeSet, future::Future, sync::Arc, time::Instant};
use thiserror::Error;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Runs feed reconciliations against one catalog. Runs must not overlap;
/// the job queue guarantees that.
#[derive(Clone)]
pub struct Reconciler {
    source: Arc<dyn FeedSource>,
    catalog: Arc<dyn CatalogStore>,
    attachments: Arc<dyn AttachmentStore>,
    brand: String,
}

#[derive(Debug, Error)]
#[error("stage `{stage}` failed: {message}")]
pub struct SyncError {
    stage: &'static str,
    message: String,
    kind: SyncErrorKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncErrorKind {
    Transport,
    Parse,
    Internal,
}

impl SyncError {
    pub fn transport(stage: &'static str, message: impl Into<String>) -> Self {
        Self {
            stage,
            message: message.into(),
            kind: SyncErrorKind::Transport,
        }
    }

    pub fn parse(stage: &'static str, message: impl Into<String>) -> Self {
        Self {
            stage,
            message: message.into(),
            kind: SyncErrorKind::Parse,
        }
    }

    pub fn internal(stage: &'static str, message: impl Into<String>) -> Self {
        Self {
            stage,
            message: message.into(),
            kind: SyncErrorKind::Internal,
        }
    }

    pub fn stage(&self) -> &'static str {
        self.stage
    }

    pub fn kind(&self) -> SyncErrorKind {
        self.kind
    }

    pub fn detail(&self) -> &str {
        &self.message
    }
}

#[derive(Debug)]
struct StageOutcome<T> {
    value: T,
    output: Value,
}

impl<T> StageOutcome<T> {
    fn new(value: T, output: Value) -> Self {
        Self { value, output }
    }
}

#[derive(Debug, Default)]
struct Tally {
    seen: usize,
    succeeded: usize,
    created: usize,
    updated: usize,
    touched: BTreeSet<RecordId>,
    failures: Vec<EntryFailure>,
}

impl Tally {
    fn is_complete(&self) -> bool {
        self.succeeded == self.seen
    }

    fn record(&mut self, reference: &str, record: Option<RecordId>, reasons: Vec<String>) {
        self.seen += 1;
        let succeeded = reasons.is_empty();
        crate::metrics::entry_outcome(reference, succeeded);
        if succeeded {
            self.succeeded += 1;
            if let Some(id) = record {
                self.touched.insert(id);
            }
        } else {
            warn!(
                target = "propfeed.sync",
                reference,
                record = ?record.map(|id| id.0),
                reasons = ?reasons,
                "entry_failed"
            );
            self.failures.push(EntryFailure {
                reference: reference.to_string(),
                record,
                reasons,
            });
        }
    }
}

impl Reconciler {
    pub fn new(
        source: Arc<dyn FeedSource>,
        catalog: Arc<dyn CatalogStore>,
        attachments: Arc<dyn AttachmentStore>,
        brand: impl Into<String>,
    ) -> Self {
        Self {
            source,
            catalog,
            attachments,
            brand: brand.into(),
        }
    }

    pub async fn run(&self) -> Result<RunReport, SyncError> {
        let run_id = Uuid::new_v4();
        let source = self.source.describe();
        info!(target = "propfeed.sync", run_id = %run_id, source, "run_started");

        let result = self.execute(run_id, &source).await;
        match &result {
            Ok(report) => {
                crate::metrics::run_finished(
                    report.entries_seen,
                    report.entries_succeeded,
                    report.sweep.was_performed(),
                );
                info!(
                    target = "propfeed.sync",
                    run_id = %run_id,
                    seen = report.entries_seen,
                    succeeded = report.entries_succeeded,
                    complete = report.is_complete(),
                    created = report.created,
                    updated = report.updated,
                    sweep = ?report.sweep,
                    "run_finished"
                );
            }
            Err(err) => error!(
                target = "propfeed.sync",
                run_id = %run_id,
                stage = err.stage(),
                error = %err,
                "run_failed"
            ),
        }
        result
    }

    async fn execute(&self, run_id: Uuid, source: &str) -> Result<RunReport, SyncError> {
        let started_at = Utc::now();
        let mut stages = Vec::new();

        let bytes = capture_stage("fetch_feed", &mut stages, async {
            let bytes = self
                .source
                .fetch()
                .await
                .map_err(|err| SyncError::transport("fetch_feed", err.to_string()))?;
            let output = json!({ "bytes": bytes.len() });
            Ok::<_, SyncError>(StageOutcome::new(bytes, output))
        })
        .await?;

        let entries = capture_stage("parse_feed", &mut stages, async {
            let entries =
                parse_feed(&bytes).map_err(|err| SyncError::parse("parse_feed", err.to_string()))?;
            let output = json!({ "entries": entries.len() });
            Ok::<_, SyncError>(StageOutcome::new(entries, output))
        })
        .await?;

        let report = |outcome, stages, tally: Tally, sweep| RunReport {
            run_id,
            source: source.to_string(),
            started_at,
            finished_at: Utc::now(),
            outcome,
            stages,
            entries_seen: tally.seen,
            entries_succeeded: tally.succeeded,
            created: tally.created,
            updated: tally.updated,
            touched: tally.touched,
            failures: tally.failures,
            sweep,
        };

        if entries.is_empty() {
            info!(target = "propfeed.sync", run_id = %run_id, "feed_empty");
            return Ok(report(
                RunOutcome::Empty,
                stages,
                Tally::default(),
                SweepSummary::skipped("empty_feed"),
            ));
        }

        let tally = capture_stage("reconcile_entries", &mut stages, async {
            let mut tally = Tally::default();
            for entry in &entries {
                self.reconcile_entry(entry, &mut tally).await;
            }
            let output = json!({
                "seen": tally.seen,
                "succeeded": tally.succeeded,
                "created": tally.created,
                "updated": tally.updated,
            });
            Ok::<_, SyncError>(StageOutcome::new(tally, output))
        })
        .await?;

        let sweep = if tally.is_complete() {
            capture_stage("sweep", &mut stages, async {
                let summary = match sweeper::sweep(
                    self.catalog.as_ref(),
                    self.attachments.as_ref(),
                    &tally.touched,
                )
                .await
                {
                    Ok(summary) => summary,
                    Err(err) => {
                        error!(target = "propfeed.sweep", error = %err, "stale_query_failed");
                        SweepSummary::skipped(format!("stale_query_failed: {err}"))
                    }
                };
                let output = serde_json::to_value(&summary).unwrap_or(Value::Null);
                Ok::<_, SyncError>(StageOutcome::new(summary, output))
            })
            .await?
        } else {
            info!(
                target = "propfeed.sync",
                run_id = %run_id,
                failed = tally.seen - tally.succeeded,
                "sweep_skipped_incomplete_run"
            );
            SweepSummary::skipped("incomplete_run")
        };

        Ok(report(RunOutcome::Completed, stages, tally, sweep))
    }

    /// Lookup, create if absent, persist mapped fields, then media. Every
    /// failure is collected; nothing short-circuits except a missing record.
    async fn reconcile_entry(&self, entry: &FeedEntry, tally: &mut Tally) {
        let reference = entry.reference.as_str();
        if reference.trim().is_empty() {
            tally.record(reference, None, vec!["blank_reference".to_string()]);
            return;
        }

        let record = match find_by_reference(self.catalog.as_ref(), reference).await {
            Ok(Some(id)) => {
                tally.updated += 1;
                id
            }
            Ok(None) => match create_skeleton(self.catalog.as_ref(), reference).await {
                Ok(Some(id)) => {
                    tally.created += 1;
                    id
                }
                Ok(None) => {
                    tally.record(reference, None, vec!["blank_reference".to_string()]);
                    return;
                }
                Err(err) => {
                    tally.record(reference, None, vec![format!("create: {err}")]);
                    return;
                }
            },
            Err(err) => {
                tally.record(reference, None, vec![format!("lookup: {err}")]);
                return;
            }
        };

        let mut reasons = Vec::new();
        let mapped = map_entry(entry, &self.brand);
        if let Err(err) = self.catalog.update_fields(record, &mapped.fields).await {
            reasons.push(format!("fields: {err}"));
        }
        if let Err(err) = self.catalog.update_title(record, &mapped.title_update()).await {
            reasons.push(format!("title: {err}"));
        }

        let media = MediaSync::new(self.catalog.as_ref(), self.attachments.as_ref());
        reasons.extend(
            media
                .sync_entry(record, entry)
                .await
                .into_iter()
                .map(|failure| failure.to_string()),
        );

        debug!(
            target = "propfeed.sync",
            reference,
            record = %record,
            permalink = %mapped.permalink,
            ok = reasons.is_empty(),
            "entry_reconciled"
        );
        tally.record(reference, Some(record), reasons);
    }
}

async fn capture_stage<T, Fut>(
    name: &'static str,
    stages: &mut Vec<StageReport>,
    fut: Fut,
) -> Result<T, SyncError>
where
    Fut: Future<Output = Result<StageOutcome<T>, SyncError>>,
{
    let started = Instant::now();
    let outcome = fut.await?;
    let elapsed_ms = started.elapsed().as_millis();
    crate::metrics::stage_elapsed(name, elapsed_ms);
    stages.push(StageReport::new(name, elapsed_ms, outcome.output));
    Ok(outcome.value)
}
