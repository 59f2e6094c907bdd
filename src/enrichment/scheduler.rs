//! Queue and worker pool for enrichment tasks.
//!
//! Tasks are accepted without blocking, run on a bounded pool, retried on
//! transient text-service failures and finally routed to the deterministic
//! fallback. Tasks sharing an `(article_id, kind)` key run one after another in
//! submission order, so a stale task never overwrites a fresher one.

use std::collections::{HashMap, VecDeque};
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::FutureExt;
use tokio::sync::{broadcast, mpsc, Notify, Semaphore};
use tokio::task::{JoinHandle, JoinSet};

use crate::ai::TextGenerator;
use crate::config::Config;
use crate::db::ArticleStore;
use crate::models::{EnrichmentKind, EnrichmentTask, FailureKind, TaskReport, TaskState};

use super::task::{AttemptOutcome, TaskExecutor};

const REPORT_CAPACITY: usize = 256;

type TaskKey = (i64, EnrichmentKind);

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub worker_count: usize,
    pub max_attempts: u32,
    /// Base delay before a retry; the n-th retry waits n times this.
    pub retry_delay: Duration,
}

impl From<&Config> for SchedulerConfig {
    fn from(config: &Config) -> Self {
        Self {
            worker_count: config.worker_count.max(1),
            max_attempts: config.max_attempts.max(1),
            retry_delay: config.retry_delay(),
        }
    }
}

/// Count of enqueued tasks that have not reached a terminal state.
#[derive(Default)]
struct Pending {
    count: AtomicUsize,
    idle: Notify,
}

impl Pending {
    fn begin(&self) {
        self.count.fetch_add(1, Ordering::SeqCst);
    }

    fn finish(&self) {
        if self.count.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.idle.notify_waiters();
        }
    }

    async fn wait_idle(&self) {
        loop {
            let notified = self.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.count.load(Ordering::SeqCst) == 0 {
                return;
            }
            notified.await;
        }
    }
}

/// Cheap, cloneable handle for submitting tasks.
#[derive(Clone)]
pub struct EnrichmentQueue {
    tx: mpsc::UnboundedSender<EnrichmentTask>,
    pending: Arc<Pending>,
}

impl EnrichmentQueue {
    /// Fire-and-forget submission. Returns `false` if the scheduler has stopped.
    pub fn enqueue(&self, task: EnrichmentTask) -> bool {
        let article_id = task.article_id;
        let kind = task.kind;
        self.pending.begin();
        match self.tx.send(task) {
            Ok(()) => {
                tracing::debug!(article_id, %kind, "Enrichment task queued");
                true
            }
            Err(_) => {
                self.pending.finish();
                tracing::warn!(article_id, %kind, "Enrichment scheduler stopped, task dropped");
                false
            }
        }
    }

    pub fn pending(&self) -> usize {
        self.pending.count.load(Ordering::SeqCst)
    }
}

pub struct EnrichmentScheduler {
    queue: EnrichmentQueue,
    reports: broadcast::Sender<TaskReport>,
    dispatcher: JoinHandle<()>,
}

impl EnrichmentScheduler {
    /// Spawns the dispatcher on the current tokio runtime.
    pub fn start(
        config: SchedulerConfig,
        generator: Arc<dyn TextGenerator>,
        store: Arc<dyn ArticleStore>,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let (reports, _) = broadcast::channel(REPORT_CAPACITY);
        let pending = Arc::new(Pending::default());

        let worker = Arc::new(Worker {
            executor: TaskExecutor::new(generator, store),
            permits: Semaphore::new(config.worker_count.max(1)),
            max_attempts: config.max_attempts.max(1),
            retry_delay: config.retry_delay,
            reports: reports.clone(),
            pending: pending.clone(),
        });

        tracing::info!(
            workers = config.worker_count,
            max_attempts = config.max_attempts,
            "Enrichment scheduler started"
        );

        Self {
            queue: EnrichmentQueue { tx, pending },
            reports,
            dispatcher: tokio::spawn(dispatch(rx, worker)),
        }
    }

    pub fn queue(&self) -> EnrichmentQueue {
        self.queue.clone()
    }

    /// Reports for every task that reaches a terminal state from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<TaskReport> {
        self.reports.subscribe()
    }

    /// Waits until every task enqueued so far reached a terminal state.
    pub async fn drain(&self) {
        self.queue.pending.wait_idle().await;
    }

    /// Drains outstanding work, then stops accepting tasks.
    pub async fn shutdown(self) {
        self.drain().await;
        self.dispatcher.abort();
        let _ = self.dispatcher.await;
        tracing::info!("Enrichment scheduler stopped");
    }
}

/// Owns submission order: at most one task per key is running, later tasks
/// for the same key wait in `waiting` until it completes.
async fn dispatch(mut rx: mpsc::UnboundedReceiver<EnrichmentTask>, worker: Arc<Worker>) {
    let (done_tx, mut done_rx) = mpsc::unbounded_channel::<TaskKey>();
    let mut waiting: HashMap<TaskKey, VecDeque<EnrichmentTask>> = HashMap::new();
    let mut running = JoinSet::new();

    loop {
        tokio::select! {
            received = rx.recv() => match received {
                Some(task) => match waiting.get_mut(&task.key()) {
                    Some(queued) => queued.push_back(task),
                    None => {
                        waiting.insert(task.key(), VecDeque::new());
                        spawn_task(&mut running, &worker, &done_tx, task);
                    }
                },
                None => break,
            },
            Some(key) = done_rx.recv() => {
                start_next(&mut waiting, key, &mut running, &worker, &done_tx);
            }
        }

        while let Some(joined) = running.try_join_next() {
            log_join_error(joined);
        }
    }

    // Queue closed: let every key run its backlog dry
    while !waiting.is_empty() {
        let Some(key) = done_rx.recv().await else {
            break;
        };
        start_next(&mut waiting, key, &mut running, &worker, &done_tx);
    }
    while let Some(joined) = running.join_next().await {
        log_join_error(joined);
    }
}

fn spawn_task(
    running: &mut JoinSet<()>,
    worker: &Arc<Worker>,
    done: &mpsc::UnboundedSender<TaskKey>,
    task: EnrichmentTask,
) {
    let worker = worker.clone();
    let done = done.clone();
    running.spawn(async move {
        let key = task.key();
        worker.run(task).await;
        let _ = done.send(key);
    });
}

fn start_next(
    waiting: &mut HashMap<TaskKey, VecDeque<EnrichmentTask>>,
    key: TaskKey,
    running: &mut JoinSet<()>,
    worker: &Arc<Worker>,
    done: &mpsc::UnboundedSender<TaskKey>,
) {
    match waiting.get_mut(&key).and_then(VecDeque::pop_front) {
        Some(next) => spawn_task(running, worker, done, next),
        None => {
            waiting.remove(&key);
        }
    }
}

fn log_join_error(joined: std::result::Result<(), tokio::task::JoinError>) {
    if let Err(e) = joined {
        tracing::error!(error = %e, "Enrichment task aborted");
    }
}

struct Worker {
    executor: TaskExecutor,
    permits: Semaphore,
    max_attempts: u32,
    retry_delay: Duration,
    reports: broadcast::Sender<TaskReport>,
    pending: Arc<Pending>,
}

impl Worker {
    async fn run(&self, mut task: EnrichmentTask) {
        let (state, value) = self.drive(&mut task).await;
        task.state = state;
        debug_assert!(task.state.is_terminal());

        tracing::debug!(
            article_id = task.article_id,
            kind = %task.kind,
            state = ?task.state,
            elapsed_ms = (Utc::now() - task.created_at).num_milliseconds(),
            "Enrichment task finished"
        );
        let _ = self.reports.send(TaskReport {
            article_id: task.article_id,
            kind: task.kind,
            state: task.state,
            attempts: task.attempt,
            value,
        });
        self.pending.finish();
    }

    /// Attempts the AI path until it succeeds or gives up, then falls back.
    async fn drive(&self, task: &mut EnrichmentTask) -> (TaskState, Option<String>) {
        loop {
            task.attempt += 1;
            task.state = TaskState::Running;
            let outcome = self.attempt(task).await;

            let failure = match outcome {
                AttemptOutcome::Written(value) => {
                    tracing::info!(
                        article_id = task.article_id,
                        kind = %task.kind,
                        attempt = task.attempt,
                        value = %value,
                        "Enrichment succeeded"
                    );
                    return (TaskState::Succeeded, Some(value));
                }
                AttemptOutcome::Missing => {
                    tracing::warn!(
                        article_id = task.article_id,
                        kind = %task.kind,
                        "Article not found, enrichment discarded"
                    );
                    return (TaskState::Discarded, None);
                }
                AttemptOutcome::Failed(failure) => failure,
            };

            if !failure.is_retryable() || task.attempt >= self.max_attempts {
                return self.fall_back(task, failure).await;
            }

            tracing::info!(
                article_id = task.article_id,
                kind = %task.kind,
                attempt = task.attempt,
                %failure,
                "Enrichment attempt failed, retrying"
            );
            task.state = TaskState::Retrying;
            tokio::time::sleep(self.retry_delay * task.attempt).await;
        }
    }

    /// One attempt under a worker permit. Errors and panics count as service errors.
    async fn attempt(&self, task: &EnrichmentTask) -> AttemptOutcome {
        let Ok(_permit) = self.permits.acquire().await else {
            return AttemptOutcome::Failed(FailureKind::ServiceError);
        };

        match AssertUnwindSafe(self.executor.attempt(task)).catch_unwind().await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(e)) => {
                tracing::error!(
                    article_id = task.article_id,
                    kind = %task.kind,
                    error = %e,
                    "Enrichment attempt errored"
                );
                AttemptOutcome::Failed(FailureKind::ServiceError)
            }
            Err(_) => {
                tracing::error!(
                    article_id = task.article_id,
                    kind = %task.kind,
                    "Enrichment attempt panicked"
                );
                AttemptOutcome::Failed(FailureKind::ServiceError)
            }
        }
    }

    async fn fall_back(
        &self,
        task: &EnrichmentTask,
        failure: FailureKind,
    ) -> (TaskState, Option<String>) {
        let Ok(_permit) = self.permits.acquire().await else {
            return (TaskState::Failed, None);
        };

        let result = AssertUnwindSafe(self.executor.fallback(task))
            .catch_unwind()
            .await;
        match result {
            Ok(Ok(Some(value))) => {
                tracing::info!(
                    article_id = task.article_id,
                    kind = %task.kind,
                    attempts = task.attempt,
                    %failure,
                    value = %value,
                    "Fallback value written"
                );
                (TaskState::FallenBack, Some(value))
            }
            Ok(Ok(None)) => {
                tracing::warn!(
                    article_id = task.article_id,
                    kind = %task.kind,
                    "Article not found, fallback discarded"
                );
                (TaskState::Discarded, None)
            }
            Ok(Err(e)) => {
                tracing::error!(
                    article_id = task.article_id,
                    kind = %task.kind,
                    error = %e,
                    "Fallback write failed"
                );
                (TaskState::Failed, None)
            }
            Err(_) => {
                tracing::error!(
                    article_id = task.article_id,
                    kind = %task.kind,
                    "Fallback write panicked"
                );
                (TaskState::Failed, None)
            }
        }
    }
}
