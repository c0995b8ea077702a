//! Command implementations. Each returns the text to print.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};

use jobtrack_jobs::{
    EventBus, FnHandler, JobContext, JobExecutor, JobFilter, JobOutcome, JobRecord,
    JobRecordStore, JobSpec, JobState, JobStats, JobTracker, NoOpHandler,
};

const ID_WIDTH: usize = 36;
const DESCRIPTION_WIDTH: usize = 28;
const OWNER_WIDTH: usize = 12;
const TIME_WIDTH: usize = 19;
const STATUS_WIDTH: usize = 22;

/// Arguments of `jobs list`.
#[derive(Debug, Clone, Default)]
pub struct ListArgs {
    pub owner: Option<String>,
    pub states: Vec<JobState>,
    pub description: Option<String>,
    pub offset: usize,
    pub limit: usize,
}

fn fit(value: &str, width: usize) -> String {
    if value.chars().count() <= width {
        return format!("{value:<width$}");
    }
    let truncated: String = value.chars().take(width.saturating_sub(1)).collect();
    format!("{truncated}~")
}

fn format_time(time: Option<DateTime<Utc>>) -> String {
    time.map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| "-".to_string())
}

fn status(record: &JobRecord) -> String {
    let mut status = record.state.to_string();
    if !record.is_done() {
        status.push_str(&format!(" {}%", record.completion_level));
    }
    if record.deleted {
        status.push_str(" (del)");
    }
    status
}

/// Render records as a fixed-width table.
pub fn render_jobs_table(records: &[JobRecord]) -> String {
    let mut out = format!(
        "{} {} {} {} {} {}\n",
        fit("ID", ID_WIDTH),
        fit("DESCRIPTION", DESCRIPTION_WIDTH),
        fit("OWNER", OWNER_WIDTH),
        fit("SCHEDULED", TIME_WIDTH),
        fit("STARTED", TIME_WIDTH),
        fit("STATUS", STATUS_WIDTH),
    );
    for record in records {
        out.push_str(&format!(
            "{} {} {} {} {} {}\n",
            fit(&record.id, ID_WIDTH),
            fit(&record.description, DESCRIPTION_WIDTH),
            fit(&record.owner, OWNER_WIDTH),
            fit(&format_time(Some(record.schedule_time)), TIME_WIDTH),
            fit(&format_time(record.start_time), TIME_WIDTH),
            fit(&status(record), STATUS_WIDTH),
        ));
    }
    // Trailing padding is noise in a terminal.
    out.lines()
        .map(str::trim_end)
        .collect::<Vec<_>>()
        .join("\n")
        + "\n"
}

pub async fn list(tracker: &JobTracker, args: ListArgs) -> Result<String> {
    let mut filter = JobFilter::all();
    if let Some(owner) = args.owner {
        filter = filter.with_owner(owner);
    }
    if !args.states.is_empty() {
        filter = filter.with_states(args.states);
    }
    if let Some(term) = args.description {
        filter = filter.with_description(term);
    }

    let page = tracker.search(&filter, args.offset, args.limit).await?;
    let mut out = render_jobs_table(&page.items);
    out.push_str(&format!(
        "{} of {} job(s) shown\n",
        page.items.len(),
        page.total
    ));
    Ok(out)
}

pub async fn get(tracker: &JobTracker, id: &str) -> Result<String> {
    let record = tracker.get(id).await?;
    let mut out = render_jobs_table(std::slice::from_ref(&record));
    out.push_str(&format!("finished:   {}\n", format_time(record.finish_time)));
    out.push_str(&format!(
        "result:     {}\n",
        record.result.as_deref().unwrap_or("-")
    ));
    Ok(out)
}

/// Fetch the job, request its cancellation and report what happened.
pub async fn cancel(tracker: &JobTracker, id: &str) -> Result<String> {
    let before = tracker
        .get(id)
        .await
        .with_context(|| format!("cannot cancel job {id}"))?;
    if tracker.request_cancel(id).await? {
        Ok(format!(
            "Cancellation requested for job {id} ({})\n",
            before.description
        ))
    } else {
        Ok(format!(
            "Job {id} is {}; nothing to cancel\n",
            before.state
        ))
    }
}

pub async fn delete(tracker: &JobTracker, ids: Vec<String>) -> Result<String> {
    if ids.is_empty() {
        bail!("no job ids given");
    }
    let report = tracker.request_deletes(ids).await?;
    Ok(format!(
        "{} job(s) deleted, {} job(s) will be deleted when they stop\n",
        report.removed.len(),
        report.marked.len()
    ))
}

pub async fn delete_finished(tracker: &JobTracker, owner: Option<&str>) -> Result<String> {
    let report = tracker.request_delete_finished(owner).await?;
    Ok(format!("{} finished job(s) deleted\n", report.removed.len()))
}

pub fn render_stats(stats: &JobStats) -> String {
    [
        ("SCHEDULED", stats.scheduled),
        ("RUNNING", stats.running),
        ("CANCEL_REQUESTED", stats.cancel_requested),
        ("FINISHED", stats.finished),
        ("FAILED", stats.failed),
        ("CANCELED", stats.canceled),
        ("TOTAL", stats.total()),
    ]
    .iter()
    .map(|(label, count)| format!("{label:<17}{count}\n"))
    .collect()
}

pub async fn stats(tracker: &JobTracker) -> Result<String> {
    Ok(render_stats(&tracker.stats().await?))
}

/// Run a handful of sample jobs against `store` and report their outcome.
///
/// One job is cancelled while running and one is deleted while running.
pub async fn demo(
    store: Arc<dyn JobRecordStore>,
    executor: JobExecutor,
    jobs: usize,
    step: Duration,
) -> Result<String> {
    let bus = EventBus::default();
    let tracker = JobTracker::attach(store, Arc::new(bus), &executor).await;

    let mut ids = Vec::with_capacity(jobs);
    for n in 0..jobs.max(1) {
        let spec = JobSpec::new(format!("sample import #{n}"), "demo")
            .with_parameters(format!(r#"{{"batches":{}}}"#, 10 + n));
        let id = executor
            .submit(
                spec,
                FnHandler::new(move |ctx: JobContext| async move {
                    let batches = 10 + n as u64;
                    ctx.progress().begin_task("import", batches);
                    for _ in 0..batches {
                        if ctx.is_canceled() {
                            return JobOutcome::Canceled(Some("stopped by request".to_string()));
                        }
                        tokio::time::sleep(step).await;
                        ctx.progress().worked(1);
                    }
                    JobOutcome::Success(Some(format!("{batches} batches imported")))
                }),
            )
            .await?;
        ids.push(id);
    }
    executor
        .submit(JobSpec::new("quick check", "demo"), NoOpHandler)
        .await?;

    if let Some(first) = ids.first() {
        tracker.request_cancel(first).await?;
    }
    if let Some(second) = ids.get(1) {
        tracker.request_deletes([second.clone()]).await?;
    }

    // Done listeners run inside each task, so every record is final here.
    executor.drain().await;

    let page = tracker
        .search(&JobFilter::all().with_owner("demo"), 0, ids.len() + 1)
        .await?;
    let mut out = render_jobs_table(&page.items);
    out.push('\n');
    out.push_str(&render_stats(&tracker.stats().await?));

    tracker.detach().await;
    Ok(out)
}
