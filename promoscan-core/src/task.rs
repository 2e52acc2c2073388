//! Independent, restartable units of work.
//!
//! A task declares the artifact it produces and knows how to write it. The
//! runner decides whether a task needs to run at all, and makes sure the
//! artifact only ever appears complete: the task writes to a temporary file
//! next to the destination, which is renamed into place once the task
//! succeeds.
use anyhow::{Context, Result};
use indicatif::{ParallelProgressIterator, ProgressStyle};
use log::{debug, error, info};
use rayon::prelude::*;
use rayon::ThreadPoolBuilder;
use serde::{Deserialize, Serialize};
use std::path::Path;

pub trait Task: Send + Sync {
    /// A short name used in logs and reports.
    fn key(&self) -> String;

    /// Where the finished artifact lives.
    fn output(&self) -> &Path;

    /// Write the artifact to `dest`.
    fn run(&self, dest: &Path) -> Result<()>;
}

/// What to do when a task's artifact already exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoPolicy {
    #[default]
    SkipExisting,
    Recompute,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    Skipped,
    Completed,
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskReport {
    pub key: String,
    pub outcome: TaskOutcome,
}

impl TaskReport {
    pub fn is_failed(&self) -> bool {
        matches!(self.outcome, TaskOutcome::Failed(_))
    }
}

#[derive(Debug, Clone, Default)]
pub struct TaskRunner {
    policy: MemoPolicy,
    threads: Option<usize>,
    progress: bool,
}

impl TaskRunner {
    pub fn new(policy: MemoPolicy) -> Self {
        Self { policy, threads: None, progress: false }
    }

    pub fn with_threads(mut self, threads: Option<usize>) -> Self {
        self.threads = threads;
        self
    }

    pub fn with_progress(mut self, progress: bool) -> Self {
        self.progress = progress;
        self
    }

    pub fn policy(&self) -> MemoPolicy {
        self.policy
    }

    /// Run a single task in the calling thread.
    pub fn run_one<T: Task + ?Sized>(&self, task: &T) -> Result<TaskOutcome> {
        if self.policy == MemoPolicy::SkipExisting && task.output().exists() {
            info!("Skipping {}: {} exists", task.key(), task.output().display());
            return Ok(TaskOutcome::Skipped);
        }
        persist_atomically(task)?;
        Ok(TaskOutcome::Completed)
    }

    /// Run independent tasks in parallel. A failing task is reported and does
    /// not stop the others.
    pub fn run_all<T: Task>(&self, tasks: &[T]) -> Result<Vec<TaskReport>> {
        let mut builder = ThreadPoolBuilder::new();
        if let Some(n) = self.threads {
            builder = builder.num_threads(n);
        }
        let pool = builder.build().context("failed to build the thread pool")?;

        let style = ProgressStyle::with_template(
            "[{elapsed}] {bar:40.cyan/blue} {pos:>7}/{len:7} (eta: {eta})"
        )?;
        let reports: Vec<TaskReport> = pool.install(|| {
            let iter = tasks.par_iter();
            let run = |task: &T| {
                let outcome = self.run_one(task).unwrap_or_else(|e| {
                    error!("Task {} failed: {:#}", task.key(), e);
                    TaskOutcome::Failed(format!("{:#}", e))
                });
                TaskReport { key: task.key(), outcome }
            };
            if self.progress {
                iter.progress_with_style(style).map(run).collect()
            } else {
                iter.map(run).collect()
            }
        });

        let n_failed = reports.iter().filter(|x| x.is_failed()).count();
        let n_skipped = reports.iter().filter(|x| x.outcome == TaskOutcome::Skipped).count();
        info!(
            "{} tasks: {} completed, {} skipped, {} failed",
            reports.len(), reports.len() - n_failed - n_skipped, n_skipped, n_failed,
        );
        Ok(reports)
    }
}

fn persist_atomically<T: Task + ?Sized>(task: &T) -> Result<()> {
    let output = task.output();
    let dir = match output.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir)
        .with_context(|| format!("cannot create directory: {}", dir.display()))?;
    let tmp = tempfile::Builder::new()
        .prefix(".promoscan")
        .tempfile_in(dir)?;
    debug!("Running {} into {}", task.key(), tmp.path().display());
    task.run(tmp.path()).with_context(|| format!("task {} failed", task.key()))?;
    tmp.persist(output)
        .with_context(|| format!("cannot move result to {}", output.display()))?;
    Ok(())
}
