//! Bounded-concurrency job queue: the core of the batch engine.
//!
//! A fixed number of logical workers drain a shared FIFO work list, each
//! executing jobs one at a time through a caller-supplied async executor.
//! Transient failures retry with exponential backoff, cancellation is
//! cooperative, and aggregate progress is reported after every counter
//! transition. One queue instance runs one batch at a time; instances are
//! independent, so concurrent queues can coexist.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio::task::JoinSet;

use crate::models::job::{ErrorClass, JobDescriptor, JobOutcome, JobResult};
use crate::models::progress::{BatchReport, BatchStats, ProgressSnapshot};
use crate::services::providers::{ProviderClient, ProviderError};
use crate::services::retry::RetryPolicy;

/// Progress callback, invoked after every counter transition.
pub type ProgressFn = dyn Fn(ProgressSnapshot) + Send + Sync;
/// Per-job callback, invoked exactly once per job with its result.
pub type JobCompleteFn = dyn Fn(&JobResult, ProgressSnapshot) + Send + Sync;
/// Batch callback, invoked exactly once after all workers have joined.
pub type BatchCompleteFn = dyn Fn(&[JobResult], ProgressSnapshot) + Send + Sync;

/// Tuning knobs for one batch run.
#[derive(Debug, Clone, Copy)]
pub struct QueueOptions {
    /// Cap on concurrently in-flight jobs.
    pub max_workers: usize,
    pub retry: RetryPolicy,
}

impl Default for QueueOptions {
    fn default() -> Self {
        Self {
            max_workers: 6,
            retry: RetryPolicy::default(),
        }
    }
}

/// Observer hooks for a batch run. All optional.
#[derive(Clone, Default)]
pub struct QueueCallbacks {
    pub on_progress: Option<Arc<ProgressFn>>,
    pub on_job_complete: Option<Arc<JobCompleteFn>>,
    pub on_complete: Option<Arc<BatchCompleteFn>>,
}

/// An explicit queue instance holding the submitted jobs, configuration and
/// run flags for one batch.
pub struct JobQueue {
    jobs: Vec<JobDescriptor>,
    options: QueueOptions,
    callbacks: QueueCallbacks,
    running: AtomicBool,
    cancelled: Arc<AtomicBool>,
}

impl JobQueue {
    pub fn new(jobs: Vec<JobDescriptor>, options: QueueOptions) -> Self {
        Self {
            jobs,
            options,
            callbacks: QueueCallbacks::default(),
            running: AtomicBool::new(false),
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn on_progress(mut self, f: impl Fn(ProgressSnapshot) + Send + Sync + 'static) -> Self {
        self.callbacks.on_progress = Some(Arc::new(f));
        self
    }

    pub fn on_job_complete(
        mut self,
        f: impl Fn(&JobResult, ProgressSnapshot) + Send + Sync + 'static,
    ) -> Self {
        self.callbacks.on_job_complete = Some(Arc::new(f));
        self
    }

    pub fn on_complete(
        mut self,
        f: impl Fn(&[JobResult], ProgressSnapshot) + Send + Sync + 'static,
    ) -> Self {
        self.callbacks.on_complete = Some(Arc::new(f));
        self
    }

    pub fn total_jobs(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Request cooperative cancellation: no new jobs are claimed and no new
    /// attempts start, but in-flight attempts run to completion.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Run the batch to completion through `execute`, which turns one job
    /// descriptor into raw image bytes or a typed failure.
    ///
    /// Starting an already-running queue logs a warning and returns an empty
    /// report without side effects.
    pub async fn start<F, Fut>(&self, execute: F) -> BatchReport
    where
        F: Fn(Arc<JobDescriptor>) -> Fut + Clone + Send + Sync + 'static,
        Fut: Future<Output = Result<Vec<u8>, ProviderError>> + Send + 'static,
    {
        if self.running.swap(true, Ordering::SeqCst) {
            tracing::warn!("job queue is already running, ignoring start request");
            return BatchReport::empty();
        }
        self.cancelled.store(false, Ordering::SeqCst);

        let total = self.jobs.len();
        tracing::info!(
            total,
            max_workers = self.options.max_workers,
            max_attempts = self.options.retry.max_attempts,
            "starting batch"
        );

        let work: Arc<Mutex<VecDeque<JobDescriptor>>> =
            Arc::new(Mutex::new(self.jobs.iter().cloned().collect()));
        let stats = Arc::new(Mutex::new(BatchStats::new(total)));
        let results: Arc<Mutex<Vec<JobResult>>> = Arc::new(Mutex::new(Vec::with_capacity(total)));

        emit_progress(&self.callbacks, snapshot_of(&stats));

        let worker_count = self.options.max_workers.min(total);
        let mut workers = JoinSet::new();
        for _ in 0..worker_count {
            workers.spawn(run_worker(
                Arc::clone(&work),
                Arc::clone(&stats),
                Arc::clone(&results),
                Arc::clone(&self.cancelled),
                self.callbacks.clone(),
                self.options.retry,
                execute.clone(),
            ));
        }

        // Join point: the batch resolves when every worker has exited.
        while let Some(joined) = workers.join_next().await {
            if let Err(err) = joined {
                tracing::error!(error = %err, "worker task failed");
            }
        }

        // Jobs never claimed before cancellation still resolve, as Cancelled
        // results, so every submitted job has exactly one result.
        let unclaimed: Vec<JobDescriptor> = {
            let mut queue = work.lock().expect("work list lock poisoned");
            queue.drain(..).collect()
        };
        for job in unclaimed {
            let result = JobResult {
                id: job.id,
                display_name: job.display_name,
                outcome: JobOutcome::Cancelled,
            };
            let snap = {
                let mut s = stats.lock().expect("stats lock poisoned");
                s.pending -= 1;
                s.completed += 1;
                s.error += 1;
                s.snapshot()
            };
            if let Some(cb) = &self.callbacks.on_job_complete {
                cb(&result, snap);
            }
            results.lock().expect("results lock poisoned").push(result);
            emit_progress(&self.callbacks, snap);
        }

        let final_stats = snapshot_of(&stats);
        let results = std::mem::take(&mut *results.lock().expect("results lock poisoned"));

        self.running.store(false, Ordering::SeqCst);

        tracing::info!(
            completed = final_stats.completed,
            success = final_stats.success,
            error = final_stats.error,
            cancelled = self.cancelled.load(Ordering::SeqCst),
            "batch finished"
        );

        if let Some(cb) = &self.callbacks.on_complete {
            cb(&results, final_stats);
        }

        BatchReport {
            results,
            stats: final_stats,
        }
    }

    /// Convenience wrapper: run the batch against a provider client.
    pub async fn start_with_provider(&self, client: Arc<ProviderClient>) -> BatchReport {
        self.start(move |job: Arc<JobDescriptor>| {
            let client = Arc::clone(&client);
            async move { client.generate(&job).await }
        })
        .await
    }
}

fn snapshot_of(stats: &Arc<Mutex<BatchStats>>) -> ProgressSnapshot {
    stats.lock().expect("stats lock poisoned").snapshot()
}

fn emit_progress(callbacks: &QueueCallbacks, snap: ProgressSnapshot) {
    if let Some(cb) = &callbacks.on_progress {
        cb(snap);
    }
}

/// One logical worker: claim the next job, run it to a terminal result,
/// repeat until the list is empty or cancellation is observed.
async fn run_worker<F, Fut>(
    work: Arc<Mutex<VecDeque<JobDescriptor>>>,
    stats: Arc<Mutex<BatchStats>>,
    results: Arc<Mutex<Vec<JobResult>>>,
    cancelled: Arc<AtomicBool>,
    callbacks: QueueCallbacks,
    retry: RetryPolicy,
    execute: F,
) where
    F: Fn(Arc<JobDescriptor>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Vec<u8>, ProviderError>> + Send + 'static,
{
    loop {
        if cancelled.load(Ordering::SeqCst) {
            break;
        }

        // Claiming a job is exclusive under the lock: no two workers can
        // pop the same descriptor.
        let job = {
            let mut queue = work.lock().expect("work list lock poisoned");
            queue.pop_front()
        };
        let Some(job) = job else {
            break;
        };
        let job = Arc::new(job);

        let snap = {
            let mut s = stats.lock().expect("stats lock poisoned");
            s.pending -= 1;
            s.active += 1;
            s.snapshot()
        };
        emit_progress(&callbacks, snap);

        let result = execute_job(Arc::clone(&job), retry, &cancelled, &execute).await;

        // `active` still counts this job while its completion callback runs.
        let snap = {
            let mut s = stats.lock().expect("stats lock poisoned");
            s.completed += 1;
            if result.outcome.is_success() {
                s.success += 1;
            } else {
                s.error += 1;
            }
            s.snapshot()
        };
        if let Some(cb) = &callbacks.on_job_complete {
            cb(&result, snap);
        }
        results.lock().expect("results lock poisoned").push(result);

        let snap = {
            let mut s = stats.lock().expect("stats lock poisoned");
            s.active -= 1;
            s.snapshot()
        };
        emit_progress(&callbacks, snap);
    }
}

/// Run one job to a terminal result, retrying transient failures.
///
/// The cancellation flag is checked before every attempt, so cancellation is
/// observed promptly between retries, not just at batch start. A failure in
/// here never escapes: the worst case is a `Failed` outcome.
async fn execute_job<F, Fut>(
    job: Arc<JobDescriptor>,
    retry: RetryPolicy,
    cancelled: &AtomicBool,
    execute: &F,
) -> JobResult
where
    F: Fn(Arc<JobDescriptor>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Vec<u8>, ProviderError>> + Send + 'static,
{
    let mut last_error: Option<ProviderError> = None;

    for attempt in 1..=retry.max_attempts {
        if cancelled.load(Ordering::SeqCst) {
            return JobResult {
                id: job.id,
                display_name: job.display_name.clone(),
                outcome: JobOutcome::Cancelled,
            };
        }

        // The attempt runs in its own task so a panic inside the provider
        // call is contained to this job.
        let attempt_result = match tokio::spawn(execute(Arc::clone(&job))).await {
            Ok(result) => result,
            Err(join_error) => Err(ProviderError::Internal(join_error.to_string())),
        };

        match attempt_result {
            Ok(image) => {
                tracing::debug!(job_id = %job.id, attempt, "job succeeded");
                return JobResult {
                    id: job.id,
                    display_name: job.display_name.clone(),
                    outcome: JobOutcome::Image(image),
                };
            }
            Err(error) => {
                let class = error.class();
                tracing::debug!(
                    job_id = %job.id,
                    attempt,
                    class = ?class,
                    error = %error,
                    "attempt failed"
                );
                let retryable = class.is_retryable();
                last_error = Some(error);

                if !retryable || attempt == retry.max_attempts {
                    break;
                }
                tokio::time::sleep(retry.backoff_delay(attempt, class)).await;
            }
        }
    }

    let (message, class) = match last_error {
        Some(error) => {
            let class = error.class();
            (error.to_string(), class)
        }
        None => ("Unknown error".to_string(), ErrorClass::Unknown),
    };
    tracing::warn!(job_id = %job.id, error = %message, "job failed");
    JobResult {
        id: job.id,
        display_name: job.display_name.clone(),
        outcome: JobOutcome::Failed { message, class },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::job::GenerationMode;
    use uuid::Uuid;

    fn job(name: &str) -> JobDescriptor {
        JobDescriptor {
            id: Uuid::new_v4(),
            display_name: name.to_string(),
            prompt: "a test prompt".to_string(),
            model: "gemini-2.0-flash-image-preview".to_string(),
            quality: "standard".to_string(),
            size: None,
            mode: GenerationMode::Create,
            input_image: None,
            ref_image: None,
        }
    }

    #[tokio::test]
    async fn test_empty_batch_resolves_immediately() {
        let fired = Arc::new(AtomicBool::new(false));
        let fired_in_cb = Arc::clone(&fired);
        let queue = JobQueue::new(Vec::new(), QueueOptions::default()).on_complete(
            move |results, stats| {
                assert!(results.is_empty());
                assert_eq!(stats.total, 0);
                assert_eq!(stats.percentage, 0.0);
                fired_in_cb.store(true, Ordering::SeqCst);
            },
        );

        let report = queue.start(|_| async { Ok(Vec::new()) }).await;
        assert!(report.results.is_empty());
        assert!(fired.load(Ordering::SeqCst));
        assert!(!queue.is_running());
    }

    #[tokio::test]
    async fn test_panicking_executor_is_contained_to_its_job() {
        let jobs = vec![job("boom"), job("fine")];
        let queue = JobQueue::new(jobs, QueueOptions::default());

        let report = queue
            .start(|job: Arc<JobDescriptor>| async move {
                if job.display_name == "boom" {
                    panic!("executor exploded");
                }
                Ok(vec![1u8])
            })
            .await;

        assert_eq!(report.results.len(), 2);
        assert_eq!(report.stats.success, 1);
        assert_eq!(report.stats.error, 1);
        let failed = report
            .results
            .iter()
            .find(|r| r.display_name == "boom")
            .unwrap();
        assert!(matches!(failed.outcome, JobOutcome::Failed { .. }));
    }
}
