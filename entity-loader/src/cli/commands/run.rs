//! `run`, `preview` and `warm`

use anyhow::{Context, Result};
use colored::*;
use std::sync::Arc;
use std::time::Instant;

use super::{connect_store, lookup_cache, open_config_db};
use crate::config::{AppConfig, repository};
use crate::pipeline::batch::{BatchRunner, Progress};
use crate::pipeline::{TableReport, WriteMode};

pub async fn handle_run(
    config: &AppConfig,
    tables: &[String],
    mode: Option<WriteMode>,
    workers: Option<usize>,
) -> Result<()> {
    let pool = open_config_db(config).await?;
    let jobs = repository::load_jobs(&pool, tables).await?;
    if jobs.is_empty() {
        println!("{}", "No tables to run".yellow());
        return Ok(());
    }

    let store = connect_store(config).await?;
    let mut options = config.batch_options();
    if let Some(mode) = mode {
        options.write_mode = mode;
    }
    if let Some(workers) = workers {
        options.workers = workers.max(1);
    }

    println!(
        "Loading {} tables ({}, {} workers)",
        jobs.len().to_string().bright_green(),
        options.write_mode.to_string().cyan(),
        options.workers
    );

    let runner = Arc::new(
        BatchRunner::new(store, lookup_cache(config), options).with_progress(Arc::new(|p: Progress<'_>| {
            log::info!("{}: {}/{}", p.table, p.completed, p.total);
            Ok(())
        })),
    );

    let started = Instant::now();
    let reports = runner.run_tables(jobs).await;
    print_reports(&reports);
    println!("Finished in {:.1}s", started.elapsed().as_secs_f64());

    let aborted = reports.iter().filter(|r| r.error.is_some()).count();
    if aborted > 0 {
        anyhow::bail!("{} tables could not run", aborted);
    }
    Ok(())
}

fn print_reports(reports: &[TableReport]) {
    println!();
    println!(
        "{:<32} {:>8} {:>8} {:>10} {:>8} {:>8}",
        "table".bold(),
        "total".bold(),
        "written".bold(),
        "unchanged".bold(),
        "failed".bold(),
        "skipped".bold()
    );
    for r in reports {
        if let Some(error) = &r.error {
            println!("{:<32} {}", r.table, error.red());
            continue;
        }
        let failed = if r.failed > 0 {
            r.failed.to_string().red()
        } else {
            r.failed.to_string().normal()
        };
        println!(
            "{:<32} {:>8} {:>8} {:>10} {:>8} {:>8}",
            r.table,
            r.total,
            r.written.to_string().green(),
            r.unchanged,
            failed,
            r.parse_skipped
        );
    }
}

pub async fn handle_preview(config: &AppConfig, table: &str, index: usize) -> Result<()> {
    let pool = open_config_db(config).await?;
    let jobs = repository::load_jobs(&pool, &[table.to_string()]).await?;
    let job = jobs
        .into_iter()
        .next()
        .with_context(|| format!("Table {} is not registered", table))?;

    let store = connect_store(config).await?;
    let runner = BatchRunner::new(store, lookup_cache(config), config.batch_options());
    match runner.preview(&job, index).await? {
        Some(row) => println!(
            "{}",
            serde_json::to_string_pretty(&row).context("Failed to format preview")?
        ),
        None => println!("{}", format!("{} has no record at index {}", table, index).yellow()),
    }
    Ok(())
}

pub async fn handle_warm(config: &AppConfig, tables: &[String]) -> Result<()> {
    let pool = open_config_db(config).await?;
    let jobs = repository::load_jobs(&pool, tables).await?;
    let cache = lookup_cache(config);

    let started = Instant::now();
    for job in &jobs {
        let rows = cache.table(&job.table)?;
        println!(
            "{:<32} {:>8} records {:>6} skipped",
            job.table,
            rows.records.len().to_string().bright_green(),
            rows.skipped
        );
    }
    println!(
        "Parsed {} dumps in {:.1}s",
        cache.cached_tables().len(),
        started.elapsed().as_secs_f64()
    );
    Ok(())
}
