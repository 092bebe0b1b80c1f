//! Operator utilities that read and mutate the store directly.

use anyhow::{Context, Result};
use chrono::{TimeZone, Utc};
use nutriparse_ids::JobId;
use nutriparse_protocol::{AppConfig, JobFilter, JobState};
use nutriparse_store::CancelOutcome;

use super::build_components;

fn format_time(ms: i64) -> String {
    Utc.timestamp_millis_opt(ms)
        .single()
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| ms.to_string())
}

pub fn run(config: &AppConfig, state: Option<String>, limit: u64, json: bool) -> Result<()> {
    let (store, _, _) = build_components(config)?;
    let state = state
        .map(|raw| raw.parse::<JobState>().map_err(anyhow::Error::msg))
        .transpose()?;
    let filter = JobFilter {
        state,
        page_size: limit,
        ..JobFilter::default()
    };
    let (jobs, total) = store.list(&filter)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&jobs)?);
        return Ok(());
    }

    println!(
        "{:<36}  {:<10}  {:<9}  {:>3}%  {:<15}  {}",
        "ID", "STATE", "TYPE", "", "FILE", "CREATED"
    );
    for job in &jobs {
        println!(
            "{:<36}  {:<10}  {:<9}  {:>3}%  {:<15}  {}",
            job.id,
            job.state,
            job.parsing_type,
            job.progress,
            truncate(&job.filename, 15),
            format_time(job.created_at),
        );
    }
    println!("{} of {} job(s)", jobs.len(), total);
    Ok(())
}

pub fn show(config: &AppConfig, raw_id: &str, json: bool) -> Result<()> {
    let (store, _, _) = build_components(config)?;
    let id = JobId::parse(raw_id).context("invalid job id")?;
    let job = store
        .get(&id)?
        .with_context(|| format!("no such job: {raw_id}"))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&job)?);
        return Ok(());
    }

    println!("id:            {}", job.id);
    println!("state:         {}", job.state);
    println!("progress:      {}%", job.progress);
    if let Some(stage) = &job.stage {
        println!("stage:         {}", stage);
    }
    println!("type:          {}", job.parsing_type);
    println!("priority:      {}", job.priority);
    println!("attempts:      {}", job.attempts);
    println!("file:          {} ({} bytes)", job.filename, job.size_bytes);
    println!("created:       {}", format_time(job.created_at));
    if let Some(duration) = job.duration_ms() {
        println!("duration:      {} ms", duration);
    }
    if let Some(error) = &job.error {
        println!("error:         {}", error);
    }
    if let Some(result) = &job.result {
        println!("result kind:   {}", result.kind_str());
        println!("quality score: {:.2}", result.quality_score());
    }
    Ok(())
}

pub fn cancel(config: &AppConfig, raw_id: &str) -> Result<()> {
    let (store, _, _) = build_components(config)?;
    let id = JobId::parse(raw_id).context("invalid job id")?;
    match store.cancel(&id)? {
        CancelOutcome::Cancelled => println!("cancelled"),
        CancelOutcome::Requested => println!("cancellation requested (job is running)"),
        CancelOutcome::AlreadyTerminal => println!("job already finished"),
    }
    Ok(())
}

pub async fn cleanup(config: &AppConfig, days: Option<u32>) -> Result<()> {
    let (store, blob, _) = build_components(config)?;
    let days = i64::from(days.unwrap_or(config.cleanup.retention_days).max(1));
    let cutoff = Utc::now().timestamp_millis() - days * 86_400_000;

    let handles = store.cleanup(
        cutoff,
        &[JobState::Completed, JobState::Failed, JobState::Cancelled],
    )?;
    let deleted = handles.len();
    for handle in handles {
        if let Err(err) = blob.delete(&handle).await {
            tracing::warn!(handle = %handle, error = %err, "blob delete failed, blob orphaned on disk");
        }
    }
    println!("deleted {deleted} job(s) older than {days} day(s)");
    Ok(())
}

fn truncate(value: &str, max: usize) -> String {
    if value.chars().count() <= max {
        value.to_string()
    } else {
        let cut: String = value.chars().take(max.saturating_sub(1)).collect();
        format!("{cut}…")
    }
}
