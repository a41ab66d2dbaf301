//! Batch driver: runs whole tables through projection and upsert
//!
//! Tables run concurrently on tokio tasks, bounded by a semaphore, highest
//! priority first. Each table task owns its entity lookup session; the dump
//! lookup cache is shared by all of them. Per-record faults are counted and
//! logged, never fatal.

use anyhow::{Context, Result};
use serde::Serialize;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use tokio::sync::Semaphore;

use super::cache::{EntitySource, LookupCache, LookupSession};
use super::project::{Projector, ProjectorOptions};
use super::rules::Evaluator;
use super::script::ScriptRegistry;
use super::store::{EntityStore, PreparedWrite, WriteMode};
use super::{FieldMapping, KeySpec};

/// External id shown on previewed rows
pub const PREVIEW_EXTERNAL_ID: &str = "(preview)";

/// Progress of one table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Progress<'a> {
    pub table: &'a str,
    pub completed: usize,
    pub total: usize,
}

/// Progress callback; errors and panics are logged and ignored
pub type ProgressFn = Arc<dyn Fn(Progress<'_>) -> Result<()> + Send + Sync>;

/// Everything needed to load one source table
#[derive(Debug, Clone)]
pub struct TableJob {
    pub table: String,
    pub spec: KeySpec,
    pub priority: i64,
    pub mappings: Vec<FieldMapping>,
    /// Lua source of the post-projection script
    pub script: Option<String>,
}

impl TableJob {
    pub fn new(table: impl Into<String>, spec: KeySpec, mappings: Vec<FieldMapping>) -> Self {
        TableJob {
            table: table.into(),
            spec,
            priority: 0,
            mappings,
            script: None,
        }
    }
}

/// Counters for one table run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TableReport {
    pub table: String,
    pub total: usize,
    pub written: usize,
    /// Records the write mode left alone
    pub unchanged: usize,
    pub failed: usize,
    pub parse_skipped: usize,
    /// Set when the table could not run at all
    pub error: Option<String>,
}

impl TableReport {
    fn aborted(table: &str, error: String) -> Self {
        TableReport {
            table: table.to_string(),
            error: Some(error),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct BatchOptions {
    pub workers: usize,
    pub write_mode: WriteMode,
    pub progress_every: usize,
    pub projector: ProjectorOptions,
}

impl Default for BatchOptions {
    fn default() -> Self {
        BatchOptions {
            workers: 4,
            write_mode: WriteMode::Upsert,
            progress_every: 200,
            projector: ProjectorOptions::default(),
        }
    }
}

/// Drives tables through the pipeline against one store
pub struct BatchRunner<S> {
    store: Arc<S>,
    cache: Arc<LookupCache>,
    scripts: ScriptRegistry,
    options: BatchOptions,
    progress: Option<ProgressFn>,
}

impl<S> BatchRunner<S>
where
    S: EntityStore + EntitySource + 'static,
{
    pub fn new(store: Arc<S>, cache: Arc<LookupCache>, options: BatchOptions) -> Self {
        BatchRunner {
            store,
            cache,
            scripts: ScriptRegistry::new(),
            options,
            progress: None,
        }
    }

    pub fn with_scripts(mut self, scripts: ScriptRegistry) -> Self {
        self.scripts = scripts;
        self
    }

    pub fn with_progress(mut self, progress: ProgressFn) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn cache(&self) -> &Arc<LookupCache> {
        &self.cache
    }

    fn projector(&self, job: &TableJob) -> Projector {
        let script = self
            .scripts
            .resolve(&job.table, &job.spec.entity_type, job.script.as_deref());
        Projector::new(&job.table, job.spec.clone(), &job.mappings, self.options.projector).with_script(script)
    }

    fn report_progress(&self, table: &str, completed: usize, total: usize) {
        let Some(progress) = &self.progress else { return };
        let update = Progress {
            table,
            completed,
            total,
        };
        match catch_unwind(AssertUnwindSafe(|| progress(update))) {
            Ok(Ok(())) => {}
            Ok(Err(e)) => log::warn!("Progress callback failed: {:#}", e),
            Err(_) => log::warn!("Progress callback panicked"),
        }
    }

    /// Project and upsert every record of one table
    pub async fn run_table(&self, job: &TableJob) -> Result<TableReport> {
        let rows = self
            .cache
            .table(&job.table)
            .with_context(|| format!("Failed to load dump for {}", job.table))?;
        let projector = self.projector(job);
        let session = LookupSession::new();
        let entities: &dyn EntitySource = self.store.as_ref();
        let evaluator = Evaluator::new(&self.cache, &session, Some(entities));

        let total = rows.records.len();
        let mut report = TableReport {
            table: job.table.clone(),
            total,
            parse_skipped: rows.skipped,
            ..Default::default()
        };
        if rows.skipped > 0 {
            log::info!("{}: skipped {} malformed statements", job.table, rows.skipped);
        }
        log::info!(
            "{}: loading {} records as {} ({} mappings, {})",
            job.table,
            total,
            job.spec,
            projector.mapping_count(),
            self.options.write_mode
        );

        let every = self.options.progress_every.max(1);
        for (i, record) in rows.records.iter().enumerate() {
            let result = projector.project(record, &evaluator).await;
            match self.store.upsert(&job.spec, &result, self.options.write_mode).await {
                Ok(outcome) if outcome.rows_written() > 0 => report.written += 1,
                Ok(_) => report.unchanged += 1,
                Err(e) => {
                    log::warn!("{}: record {} not written: {:#}", job.table, i + 1, e);
                    report.failed += 1;
                }
            }
            if (i + 1) % every == 0 && i + 1 < total {
                self.report_progress(&job.table, i + 1, total);
            }
        }
        self.report_progress(&job.table, total, total);

        log::info!(
            "{}: {} written, {} unchanged, {} failed",
            job.table,
            report.written,
            report.unchanged,
            report.failed
        );
        Ok(report)
    }

    /// Run tables by priority, up to `workers` at a time
    ///
    /// A table that cannot run yields a report carrying the error; the other
    /// tables still run.
    pub async fn run_tables(self: &Arc<Self>, mut jobs: Vec<TableJob>) -> Vec<TableReport> {
        jobs.sort_by(|a, b| b.priority.cmp(&a.priority).then_with(|| a.table.cmp(&b.table)));

        let semaphore = Arc::new(Semaphore::new(self.options.workers.max(1)));
        let mut handles = Vec::with_capacity(jobs.len());
        for job in jobs {
            let permit = match semaphore.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(e) => {
                    handles.push((job.table.clone(), None, Some(e.to_string())));
                    continue;
                }
            };
            let runner = self.clone();
            let table = job.table.clone();
            let handle = tokio::spawn(async move {
                let _permit = permit;
                runner.run_table(&job).await
            });
            handles.push((table, Some(handle), None));
        }

        let mut reports = Vec::with_capacity(handles.len());
        for (table, handle, error) in handles {
            let report = match (handle, error) {
                (Some(handle), _) => match handle.await {
                    Ok(Ok(report)) => report,
                    Ok(Err(e)) => {
                        log::error!("{}: {:#}", table, e);
                        TableReport::aborted(&table, format!("{:#}", e))
                    }
                    Err(e) => {
                        log::error!("{}: worker failed: {}", table, e);
                        TableReport::aborted(&table, e.to_string())
                    }
                },
                (None, error) => TableReport::aborted(&table, error.unwrap_or_default()),
            };
            reports.push(report);
        }
        reports
    }

    /// Project the `index`-th record of a table without writing it
    ///
    /// Returns the entity row that would be inserted, or `None` past the end
    /// of the dump.
    pub async fn preview(&self, job: &TableJob, index: usize) -> Result<Option<serde_json::Value>> {
        let rows = self
            .cache
            .table(&job.table)
            .with_context(|| format!("Failed to load dump for {}", job.table))?;
        let Some(record) = rows.records.get(index) else {
            return Ok(None);
        };

        let projector = self.projector(job);
        let session = LookupSession::new();
        let entities: &dyn EntitySource = self.store.as_ref();
        let evaluator = Evaluator::new(&self.cache, &session, Some(entities));
        let result = projector.project(record, &evaluator).await;

        let prepared = PreparedWrite::new(&job.spec, &result, chrono::Utc::now().timestamp());
        let row = prepared.to_row(PREVIEW_EXTERNAL_ID, self.store.namespace());
        Ok(Some(serde_json::to_value(&row).context("Failed to serialize preview")?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::dump::dump_path;
    use crate::pipeline::store::SqlEntityStore;
    use std::path::Path;
    use std::sync::Mutex;

    fn write_dumps(dir: &Path) {
        std::fs::write(
            dump_path(dir, "ct_firm"),
            "insert into public.ct_firm (code, name) values ('B', 'Big Firm');\n\
             insert into public.ct_firm (code, name) values ('S', 'Small Firm');\n",
        )
        .unwrap();
        std::fs::write(
            dump_path(dir, "ct_fund"),
            "insert into public.ct_fund (id, title, firm_code) values (1, 'Alpha', 'B');\n\
             insert into public.ct_fund (id, title, firm_code) values (2, 'short');\n\
             insert into public.ct_fund (id, title, firm_code) values (3, 'Gamma', 'S');\n",
        )
        .unwrap();
    }

    fn jobs() -> Vec<TableJob> {
        let mut firm = TableJob::new(
            "ct_firm",
            KeySpec::parse("firm(code)").unwrap(),
            vec![
                FieldMapping::new("code", "data.code"),
                FieldMapping::new("name", "name"),
            ],
        );
        firm.priority = 10;

        let mut fund = TableJob::new(
            "ct_fund",
            KeySpec::simple("fund"),
            vec![
                FieldMapping::new("id", "data.id"),
                FieldMapping::new("title", "name"),
                FieldMapping::new("firm_code", "data.firm_uuid").with_rule("rel(firm, by=code, src=firm_code)"),
            ],
        );
        fund.script = Some("record.label = lib.upper(record.id .. '')".to_string());
        vec![fund, firm]
    }

    async fn runner(dir: &Path, workers: usize) -> Arc<BatchRunner<SqlEntityStore>> {
        let store = Arc::new(SqlEntityStore::connect("sqlite::memory:", "ns").await.unwrap());
        let options = BatchOptions {
            workers,
            progress_every: 1,
            ..Default::default()
        };
        Arc::new(BatchRunner::new(store, Arc::new(LookupCache::new(dir)), options))
    }

    #[tokio::test]
    async fn test_run_tables_priority_and_cross_entity_lookup() {
        let dir = tempfile::tempdir().unwrap();
        write_dumps(dir.path());
        let runner = runner(dir.path(), 1).await;

        let reports = runner.run_tables(jobs()).await;
        assert_eq!(reports.len(), 2);
        assert_eq!(reports[0].table, "ct_firm");
        assert_eq!(reports[0].written, 2);
        assert_eq!(reports[1].parse_skipped, 1);
        assert_eq!(reports[1].written, 2);
        assert_eq!(reports[1].failed, 0);

        let firm = runner.store.find("firm", "code", "B").await.unwrap().unwrap();
        let fund = runner.store.find("fund", "id", "1").await.unwrap().unwrap();
        assert_eq!(fund.document["firm_uuid"], firm.external_id.as_str());
        assert_eq!(fund.document["label"], "1");
        assert_eq!(fund.name, "Alpha");
    }

    #[tokio::test]
    async fn test_rerun_with_create_only_is_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        write_dumps(dir.path());
        let runner = runner(dir.path(), 2).await;
        runner.run_tables(jobs()).await;

        let store = runner.store.clone();
        let options = BatchOptions {
            write_mode: WriteMode::CreateOnly,
            ..Default::default()
        };
        let again = BatchRunner::new(store, runner.cache().clone(), options);
        let report = again.run_table(&jobs()[1]).await.unwrap();
        assert_eq!(report.table, "ct_firm");
        assert_eq!(report.written, 0);
        assert_eq!(report.unchanged, 2);
    }

    #[tokio::test]
    async fn test_progress_callback_errors_and_panics_swallowed() {
        let dir = tempfile::tempdir().unwrap();
        write_dumps(dir.path());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();

        let store = Arc::new(SqlEntityStore::connect("sqlite::memory:", "ns").await.unwrap());
        let options = BatchOptions {
            progress_every: 1,
            ..Default::default()
        };
        let runner = BatchRunner::new(store, Arc::new(LookupCache::new(dir.path())), options).with_progress(
            Arc::new(move |p: Progress<'_>| {
                sink.lock().unwrap().push((p.completed, p.total));
                match p.completed {
                    1 => anyhow::bail!("ui went away"),
                    2 => panic!("callback bug"),
                    _ => Ok(()),
                }
            }),
        );

        let report = runner.run_table(&jobs()[0]).await.unwrap();
        assert_eq!(report.written, 2);
        assert_eq!(*seen.lock().unwrap(), vec![(1, 2), (2, 2)]);
    }

    #[tokio::test]
    async fn test_progress_fires_every_n_records_and_at_end() {
        let dir = tempfile::tempdir().unwrap();
        let dump: String = (1..=5)
            .map(|i| format!("insert into public.ct_firm (code, name) values ('F{i}', 'Firm {i}');\n"))
            .collect();
        std::fs::write(dump_path(dir.path(), "ct_firm"), dump).unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();

        let store = Arc::new(SqlEntityStore::connect("sqlite::memory:", "ns").await.unwrap());
        let options = BatchOptions {
            progress_every: 2,
            ..Default::default()
        };
        let runner = BatchRunner::new(store, Arc::new(LookupCache::new(dir.path())), options).with_progress(
            Arc::new(move |p: Progress<'_>| {
                sink.lock().unwrap().push(p.completed);
                Ok(())
            }),
        );

        let report = runner.run_table(&jobs()[0]).await.unwrap();
        assert_eq!(report.total, 5);
        assert_eq!(*seen.lock().unwrap(), vec![2, 4, 5]);
    }

    #[tokio::test]
    async fn test_missing_dump_is_empty_and_preview() {
        let dir = tempfile::tempdir().unwrap();
        write_dumps(dir.path());
        let runner = runner(dir.path(), 4).await;

        let empty = TableJob::new("ct_none", KeySpec::simple("none"), vec![]);
        let report = runner.run_table(&empty).await.unwrap();
        assert_eq!(report.total, 0);

        let fund = &jobs()[0];
        let row = runner.preview(fund, 1).await.unwrap().unwrap();
        assert_eq!(row["externalId"], PREVIEW_EXTERNAL_ID);
        assert_eq!(row["namespace"], "ns");
        assert_eq!(row["type"], "fund");
        assert_eq!(row["name"], "Gamma");
        assert_eq!(row["document"]["label"], "3");
        assert!(runner.preview(fund, 5).await.unwrap().is_none());
        assert_eq!(runner.store.count("fund").await.unwrap(), 0);
    }
}
