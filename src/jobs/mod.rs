//! Job manager: priority queue, concurrency gate, lifecycle, webhooks
//!
//! Owns every job from submission to deletion. Jobs wait in a strict
//! priority queue; up to `max_concurrent` run at once, dispatched through a
//! [`JobDispatcher`] the engine implements. Terminal transitions fan out to
//! webhooks on a detached task so delivery never holds a worker slot.
//!
//! Locking: one manager-wide lock guards enqueue/dequeue and the running
//! count; each job has its own short-lived lock for state transitions.

pub mod job;
pub mod queue;
pub mod webhook;

use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::{Mutex, RwLock};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::dag::ProgressFn;
use crate::error::{EngineError, ResourceKind};
use crate::jobs::job::{Job, JobPriority, JobStatus, WebhookConfig, WorkflowRef};
use crate::jobs::queue::JobQueue;
use crate::jobs::webhook::{WebhookDispatcher, WebhookPayload};

/// Job manager configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobManagerConfig {
    /// Worker slots: jobs running at once
    pub max_concurrent: usize,

    /// Effective timeout for jobs whose workflow does not configure one
    #[serde(with = "humantime_serde")]
    pub default_timeout: Duration,

    /// Queue admission limit; `None` accepts submissions without bound
    #[serde(default)]
    pub max_queue_length: Option<usize>,

    /// Delays before each webhook retry
    #[serde(default = "default_webhook_retry_schedule")]
    pub webhook_retry_schedule: Vec<Duration>,
}

fn default_webhook_retry_schedule() -> Vec<Duration> {
    vec![
        Duration::from_secs(10),
        Duration::from_secs(30),
        Duration::from_secs(60),
    ]
}

impl Default for JobManagerConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 4,
            default_timeout: Duration::from_secs(600),
            max_queue_length: None,
            webhook_retry_schedule: default_webhook_retry_schedule(),
        }
    }
}

impl JobManagerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_concurrent(mut self, max: usize) -> Self {
        self.max_concurrent = max.max(1);
        self
    }

    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    pub fn with_max_queue_length(mut self, limit: usize) -> Self {
        self.max_queue_length = Some(limit);
        self
    }

    pub fn with_webhook_retry_schedule(mut self, schedule: Vec<Duration>) -> Self {
        self.webhook_retry_schedule = schedule;
        self
    }
}

/// Outcome of one dispatched execution.
#[derive(Debug, Clone)]
pub enum JobOutcome {
    Completed(Value),
    /// A graph job paused at a human node
    Paused {
        checkpoint_id: String,
        /// Prompt to show the human
        prompt: String,
        /// State at the pause point
        state: Map<String, Value>,
    },
}

/// Runs the workload a job references.
///
/// Implemented by the engine; the manager stays free of workflow and graph
/// knowledge.
#[async_trait]
pub trait JobDispatcher: Send + Sync {
    /// Execute the referenced workflow or graph. `thread_id` keys any
    /// checkpoint a pausing graph saves.
    async fn run(
        &self,
        workflow_ref: &WorkflowRef,
        inputs: &Map<String, Value>,
        thread_id: &str,
        progress: ProgressFn,
        cancel: CancellationToken,
    ) -> Result<JobOutcome, EngineError>;

    /// Resume a paused graph job from its checkpoint.
    async fn resume(
        &self,
        workflow_ref: &WorkflowRef,
        checkpoint_id: &str,
        human_input: &Map<String, Value>,
        cancel: CancellationToken,
    ) -> Result<JobOutcome, EngineError>;

    /// The workload's configured timeout, if its definition sets one.
    async fn configured_timeout(&self, workflow_ref: &WorkflowRef) -> Option<Duration>;
}

/// Submission request.
pub struct SubmitRequest {
    pub workflow_ref: WorkflowRef,
    pub workflow_type: String,
    pub inputs: Map<String, Value>,
    pub priority: JobPriority,
    pub webhook: Option<WebhookConfig>,
}

/// Filters for [`JobManager::list`].
#[derive(Debug, Clone, Default)]
pub struct JobFilter {
    pub status: Option<JobStatus>,
    pub workflow_id: Option<String>,
    pub workflow_type: Option<String>,
    pub limit: Option<usize>,
}

/// Queue-level statistics.
#[derive(Debug, Clone, Serialize)]
pub struct QueueStats {
    pub length: usize,
    pub running: usize,
    pub max_concurrent: usize,
}

/// Aggregate job statistics.
#[derive(Debug, Clone, Serialize)]
pub struct JobStats {
    pub total: usize,
    pub by_status: BTreeMap<String, usize>,
    pub queue: QueueStats,
    pub by_workflow_type: BTreeMap<String, usize>,
}

struct Scheduler {
    queue: JobQueue,
    running: usize,
}

struct ManagerInner {
    config: JobManagerConfig,
    dispatcher: Arc<dyn JobDispatcher>,
    webhooks: WebhookDispatcher,
    jobs: RwLock<HashMap<String, Arc<StdMutex<Job>>>>,
    scheduler: Mutex<Scheduler>,
    cancel_tokens: Mutex<HashMap<String, CancellationToken>>,
}

/// The scheduling and lifecycle owner for asynchronous execution.
#[derive(Clone)]
pub struct JobManager {
    inner: Arc<ManagerInner>,
}

impl JobManager {
    pub fn new(dispatcher: Arc<dyn JobDispatcher>, config: JobManagerConfig) -> Self {
        let webhooks = WebhookDispatcher::new(config.webhook_retry_schedule.clone());
        Self {
            inner: Arc::new(ManagerInner {
                config,
                dispatcher,
                webhooks,
                jobs: RwLock::new(HashMap::new()),
                scheduler: Mutex::new(Scheduler {
                    queue: JobQueue::new(),
                    running: 0,
                }),
                cancel_tokens: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Submit a job. Returns its id immediately; execution is scheduled.
    pub async fn submit(&self, request: SubmitRequest) -> Result<String, EngineError> {
        let job = Job::new(
            request.workflow_ref,
            request.workflow_type,
            request.inputs,
            request.priority,
            request.webhook,
        );
        let job_id = job.id.clone();
        let priority = job.priority;

        {
            let mut scheduler = self.inner.scheduler.lock().await;
            if let Some(limit) = self.inner.config.max_queue_length {
                if scheduler.queue.len() >= limit {
                    return Err(EngineError::QueueFull(limit));
                }
            }
            let mut jobs = self.inner.jobs.write().await;
            jobs.insert(job_id.clone(), Arc::new(StdMutex::new(job)));
            scheduler.queue.push(job_id.clone(), priority);
        }

        info!(job_id = %job_id, priority = ?priority, "job submitted");
        ManagerInner::pump(self.inner.clone()).await;
        Ok(job_id)
    }

    /// Snapshot a job by id.
    pub async fn get(&self, job_id: &str) -> Option<Job> {
        let jobs = self.inner.jobs.read().await;
        jobs.get(job_id).map(|j| lock_job(j).clone())
    }

    /// List jobs, newest first.
    pub async fn list(&self, filter: JobFilter) -> Vec<Job> {
        let jobs = self.inner.jobs.read().await;
        let mut snapshot: Vec<Job> = jobs
            .values()
            .map(|j| lock_job(j).clone())
            .filter(|job| {
                filter.status.map(|s| job.status == s).unwrap_or(true)
                    && filter
                        .workflow_id
                        .as_deref()
                        .map(|id| job.workflow_id == id)
                        .unwrap_or(true)
                    && filter
                        .workflow_type
                        .as_deref()
                        .map(|t| job.workflow_type == t)
                        .unwrap_or(true)
            })
            .collect();
        snapshot.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        if let Some(limit) = filter.limit {
            snapshot.truncate(limit);
        }
        snapshot
    }

    /// Cancel a job. Idempotent: terminal jobs are a no-op success.
    ///
    /// Pending jobs leave the queue and become CANCELLED immediately.
    /// Running jobs have their cancellation token signalled and transition
    /// when the executor observes it. Returns the status as of this call.
    pub async fn cancel(&self, job_id: &str) -> Result<JobStatus, EngineError> {
        let job_arc = self
            .job_arc(job_id)
            .await
            .ok_or_else(|| EngineError::not_found(ResourceKind::Job, job_id))?;

        let action = {
            let job = lock_job(&job_arc);
            match job.status {
                s if s.is_terminal() => CancelAction::AlreadyTerminal(s),
                JobStatus::Pending => CancelAction::Dequeue,
                JobStatus::Paused => CancelAction::CancelPaused,
                JobStatus::Running => CancelAction::Signal,
                _ => unreachable!("all terminal statuses are handled by the guard above"),
            }
        };

        match action {
            CancelAction::AlreadyTerminal(status) => Ok(status),
            CancelAction::Dequeue => {
                {
                    let mut scheduler = self.inner.scheduler.lock().await;
                    scheduler.queue.remove(job_id);
                }
                let webhook = {
                    let mut job = lock_job(&job_arc);
                    // A pump may have already picked it up; only cancel if
                    // the transition is still legal
                    if job.status == JobStatus::Pending {
                        job.transition(JobStatus::Cancelled);
                        job.error = Some("cancelled before start".into());
                        terminal_webhook(&job)
                    } else {
                        None
                    }
                };
                if let Some((config, payload)) = webhook {
                    self.spawn_webhook(config, payload);
                }
                info!(job_id, "pending job cancelled");
                Ok(JobStatus::Cancelled)
            }
            CancelAction::CancelPaused => {
                let webhook = {
                    let mut job = lock_job(&job_arc);
                    if job.status == JobStatus::Paused {
                        job.transition(JobStatus::Cancelled);
                        terminal_webhook(&job)
                    } else {
                        None
                    }
                };
                if let Some((config, payload)) = webhook {
                    self.spawn_webhook(config, payload);
                }
                info!(job_id, "paused job cancelled");
                Ok(JobStatus::Cancelled)
            }
            CancelAction::Signal => {
                let tokens = self.inner.cancel_tokens.lock().await;
                if let Some(token) = tokens.get(job_id) {
                    token.cancel();
                    info!(job_id, "cancellation signalled to running job");
                }
                Ok(JobStatus::Running)
            }
        }
    }

    /// Delete a job record. Running jobs cannot be deleted.
    pub async fn delete(&self, job_id: &str) -> Result<(), EngineError> {
        let mut jobs = self.inner.jobs.write().await;
        let job_arc = jobs
            .get(job_id)
            .ok_or_else(|| EngineError::not_found(ResourceKind::Job, job_id))?;

        let status = lock_job(job_arc).status;
        if status == JobStatus::Running {
            return Err(EngineError::validation("cannot delete a running job"));
        }
        jobs.remove(job_id);
        drop(jobs);

        if status == JobStatus::Pending {
            let mut scheduler = self.inner.scheduler.lock().await;
            scheduler.queue.remove(job_id);
        }
        info!(job_id, "job deleted");
        Ok(())
    }

    /// Aggregate statistics.
    pub async fn stats(&self) -> JobStats {
        let jobs = self.inner.jobs.read().await;
        let mut by_status: BTreeMap<String, usize> = BTreeMap::new();
        let mut by_workflow_type: BTreeMap<String, usize> = BTreeMap::new();
        for job_arc in jobs.values() {
            let job = lock_job(job_arc);
            *by_status.entry(job.status.as_str().to_string()).or_insert(0) += 1;
            *by_workflow_type.entry(job.workflow_type.clone()).or_insert(0) += 1;
        }
        let total = jobs.len();
        drop(jobs);

        let scheduler = self.inner.scheduler.lock().await;
        JobStats {
            total,
            by_status,
            queue: QueueStats {
                length: scheduler.queue.len(),
                running: scheduler.running,
                max_concurrent: self.inner.config.max_concurrent,
            },
            by_workflow_type,
        }
    }

    /// Resume the paused job owning `checkpoint_id` and run it to the next
    /// settle point. Returns the job snapshot afterwards.
    pub async fn resume_by_checkpoint(
        &self,
        checkpoint_id: &str,
        human_input: &Map<String, Value>,
    ) -> Result<Job, EngineError> {
        let (job_id, job_arc) = self
            .find_paused(checkpoint_id)
            .await
            .ok_or_else(|| {
                EngineError::resume(format!("no paused job for checkpoint: {}", checkpoint_id))
            })?;

        let workflow_ref = {
            let mut job = lock_job(&job_arc);
            if job.status != JobStatus::Paused {
                return Err(EngineError::resume(format!(
                    "job {} is {}, not PAUSED",
                    job_id, job.status
                )));
            }
            job.transition(JobStatus::Running);
            // Pause bookkeeping is stale once the job is running again; a
            // later pause rewrites it
            job.checkpoint_id = None;
            job.human_prompt = None;
            job.paused_state = None;
            job.workflow_ref.clone()
        };

        {
            let mut scheduler = self.inner.scheduler.lock().await;
            scheduler.running += 1;
        }

        let cancel = CancellationToken::new();
        {
            let mut tokens = self.inner.cancel_tokens.lock().await;
            tokens.insert(job_id.clone(), cancel.clone());
        }

        let effective = self
            .inner
            .dispatcher
            .configured_timeout(&workflow_ref)
            .await
            .unwrap_or(self.inner.config.default_timeout);

        let input = human_input.clone();
        let outcome = timeout(
            effective,
            self.inner
                .dispatcher
                .resume(&workflow_ref, checkpoint_id, &input, cancel.clone()),
        )
        .await;

        ManagerInner::settle(&self.inner, &job_id, &job_arc, outcome, effective, &cancel).await;
        ManagerInner::pump(self.inner.clone()).await;

        let result = lock_job(&job_arc).clone();
        Ok(result)
    }

    /// Whether any paused job owns this checkpoint.
    pub async fn has_paused_checkpoint(&self, checkpoint_id: &str) -> bool {
        self.find_paused(checkpoint_id).await.is_some()
    }

    async fn find_paused(&self, checkpoint_id: &str) -> Option<(String, Arc<StdMutex<Job>>)> {
        let jobs = self.inner.jobs.read().await;
        for (id, job_arc) in jobs.iter() {
            let job = lock_job(job_arc);
            if job.status == JobStatus::Paused
                && job.checkpoint_id.as_deref() == Some(checkpoint_id)
            {
                return Some((id.clone(), job_arc.clone()));
            }
        }
        None
    }

    async fn job_arc(&self, job_id: &str) -> Option<Arc<StdMutex<Job>>> {
        let jobs = self.inner.jobs.read().await;
        jobs.get(job_id).cloned()
    }

    fn spawn_webhook(&self, config: WebhookConfig, payload: WebhookPayload) {
        let inner = self.inner.clone();
        tokio::spawn(async move {
            if let Err(e) = inner.webhooks.deliver(&config, &payload).await {
                warn!(job_id = %payload.job_id, error = %e, "webhook delivery abandoned");
            }
        });
    }
}

enum CancelAction {
    AlreadyTerminal(JobStatus),
    Dequeue,
    CancelPaused,
    Signal,
}

impl ManagerInner {
    /// Fill open worker slots from the queue.
    fn pump(inner: Arc<ManagerInner>) -> Pin<Box<dyn Future<Output = ()> + Send>> {
        Box::pin(async move {
            loop {
                let job_id = {
                    let mut scheduler = inner.scheduler.lock().await;
                    if scheduler.running >= inner.config.max_concurrent {
                        return;
                    }
                    match scheduler.queue.pop() {
                        Some(id) => {
                            scheduler.running += 1;
                            id
                        }
                        None => return,
                    }
                };

                let task_inner = inner.clone();
                tokio::spawn(async move {
                    ManagerInner::run_job(task_inner, job_id).await;
                });
            }
        })
    }

    fn run_job(inner: Arc<ManagerInner>, job_id: String) -> Pin<Box<dyn Future<Output = ()> + Send>> {
        Box::pin(async move {
        let job_arc = {
            let jobs = inner.jobs.read().await;
            jobs.get(&job_id).cloned()
        };
        let Some(job_arc) = job_arc else {
            Self::release_slot(&inner).await;
            return;
        };

        // The job may have been cancelled between dequeue and here
        let dispatch = {
            let mut job = lock_job(&job_arc);
            if job.status != JobStatus::Pending {
                None
            } else {
                job.transition(JobStatus::Running);
                Some((job.workflow_ref.clone(), job.inputs.clone()))
            }
        };
        let Some((workflow_ref, inputs)) = dispatch else {
            Self::release_slot(&inner).await;
            Self::pump(inner).await;
            return;
        };

        let cancel = CancellationToken::new();
        {
            let mut tokens = inner.cancel_tokens.lock().await;
            tokens.insert(job_id.clone(), cancel.clone());
        }

        let progress: ProgressFn = {
            let job_arc = job_arc.clone();
            Arc::new(move |p| {
                if let Ok(mut job) = job_arc.lock() {
                    job.progress = p;
                }
            })
        };

        let effective = inner
            .dispatcher
            .configured_timeout(&workflow_ref)
            .await
            .unwrap_or(inner.config.default_timeout);

        info!(job_id = %job_id, timeout = ?effective, "job started");
        let outcome = timeout(
            effective,
            inner
                .dispatcher
                .run(&workflow_ref, &inputs, &job_id, progress, cancel.clone()),
        )
        .await;

        Self::settle(&inner, &job_id, &job_arc, outcome, effective, &cancel).await;
        Self::pump(inner).await;
        })
    }

    /// Record the outcome on the job, free the slot, and fire the webhook.
    async fn settle(
        inner: &Arc<ManagerInner>,
        job_id: &str,
        job_arc: &Arc<StdMutex<Job>>,
        outcome: Result<Result<JobOutcome, EngineError>, tokio::time::error::Elapsed>,
        effective: Duration,
        cancel: &CancellationToken,
    ) {
        let webhook = {
            let mut job = lock_job(job_arc);
            match outcome {
                Err(_elapsed) => {
                    // Stop the executor; it observes the token at its next
                    // suspension point
                    cancel.cancel();
                    job.transition(JobStatus::Timeout);
                    job.error = Some(format!("timed out after {:?}", effective));
                }
                Ok(Ok(JobOutcome::Completed(result))) => {
                    job.transition(JobStatus::Completed);
                    job.result = Some(result);
                }
                Ok(Ok(JobOutcome::Paused {
                    checkpoint_id,
                    prompt,
                    state,
                })) => {
                    job.transition(JobStatus::Paused);
                    job.checkpoint_id = Some(checkpoint_id);
                    job.human_prompt = Some(prompt);
                    job.paused_state = Some(Value::Object(state));
                }
                Ok(Err(e)) if e.is_cancelled() => {
                    job.transition(JobStatus::Cancelled);
                    job.error = Some(match e {
                        EngineError::Cancelled {
                            partial: Some(partial),
                        } => format!(
                            "cancelled; partial results: {}",
                            serde_json::to_string(&partial).unwrap_or_default()
                        ),
                        _ => "cancelled".to_string(),
                    });
                }
                Ok(Err(e)) if e.is_timeout() => {
                    job.transition(JobStatus::Timeout);
                    job.error = Some(e.to_string());
                }
                Ok(Err(e)) => {
                    job.transition(JobStatus::Failed);
                    job.error = Some(e.to_string());
                }
            }
            info!(job_id, status = %job.status, "job settled");
            terminal_webhook(&job)
        };

        {
            let mut tokens = inner.cancel_tokens.lock().await;
            tokens.remove(job_id);
        }
        Self::release_slot(inner).await;

        if let Some((config, payload)) = webhook {
            let webhook_inner = inner.clone();
            tokio::spawn(async move {
                if let Err(e) = webhook_inner.webhooks.deliver(&config, &payload).await {
                    warn!(job_id = %payload.job_id, error = %e, "webhook delivery abandoned");
                }
            });
        }
    }

    async fn release_slot(inner: &Arc<ManagerInner>) {
        let mut scheduler = inner.scheduler.lock().await;
        scheduler.running = scheduler.running.saturating_sub(1);
    }
}

/// Webhook config and payload for a job that just hit a terminal state.
fn terminal_webhook(job: &Job) -> Option<(WebhookConfig, WebhookPayload)> {
    if !job.status.is_terminal() {
        return None;
    }
    job.webhook
        .as_ref()
        .map(|config| (config.clone(), WebhookPayload::from_job(job)))
}

/// Lock a job, recovering from a poisoned lock.
///
/// A panic while holding a job lock is a bug, but the record itself stays
/// usable for status queries.
fn lock_job(job: &Arc<StdMutex<Job>>) -> std::sync::MutexGuard<'_, Job> {
    match job.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Dispatcher stub with scripted behavior per workflow id.
    struct StubDispatcher {
        started: StdMutex<Vec<String>>,
        running_now: AtomicUsize,
        max_observed: AtomicUsize,
    }

    impl StubDispatcher {
        fn new() -> Self {
            Self {
                started: StdMutex::new(Vec::new()),
                running_now: AtomicUsize::new(0),
                max_observed: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl JobDispatcher for StubDispatcher {
        async fn run(
            &self,
            workflow_ref: &WorkflowRef,
            inputs: &Map<String, Value>,
            thread_id: &str,
            progress: ProgressFn,
            cancel: CancellationToken,
        ) -> Result<JobOutcome, EngineError> {
            let id = workflow_ref.display_id();
            self.started.lock().unwrap().push(id.clone());

            let now = self.running_now.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_observed.fetch_max(now, Ordering::SeqCst);

            let result = match id.as_str() {
                "ok" => {
                    progress(crate::dag::Progress::new(1, 1, None));
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    Ok(JobOutcome::Completed(json!({"ok": true})))
                }
                "fail" => Err(EngineError::task("t1", "boom")),
                "slow" => {
                    tokio::time::sleep(Duration::from_millis(500)).await;
                    Ok(JobOutcome::Completed(json!({"ok": true})))
                }
                "wait-for-cancel" => {
                    cancel.cancelled().await;
                    Err(EngineError::Cancelled {
                        partial: Some(json!({"t1": {"done": true}})),
                    })
                }
                "pause" => {
                    let mut state = Map::new();
                    state.insert("human_prompt".into(), json!("Approve?"));
                    Ok(JobOutcome::Paused {
                        checkpoint_id: thread_id.to_string(),
                        prompt: "Approve?".into(),
                        state,
                    })
                }
                other => {
                    let _ = inputs;
                    Err(EngineError::execution(format!("unknown stub: {}", other)))
                }
            };
            self.running_now.fetch_sub(1, Ordering::SeqCst);
            result
        }

        async fn resume(
            &self,
            _workflow_ref: &WorkflowRef,
            _checkpoint_id: &str,
            human_input: &Map<String, Value>,
            _cancel: CancellationToken,
        ) -> Result<JobOutcome, EngineError> {
            Ok(JobOutcome::Completed(Value::Object(human_input.clone())))
        }

        async fn configured_timeout(&self, _workflow_ref: &WorkflowRef) -> Option<Duration> {
            None
        }
    }

    fn manager(config: JobManagerConfig) -> (JobManager, Arc<StubDispatcher>) {
        let dispatcher = Arc::new(StubDispatcher::new());
        (JobManager::new(dispatcher.clone(), config), dispatcher)
    }

    fn request(workflow_id: &str, priority: JobPriority) -> SubmitRequest {
        SubmitRequest {
            workflow_ref: WorkflowRef::Workflow(workflow_id.into()),
            workflow_type: "custom".into(),
            inputs: Map::new(),
            priority,
            webhook: None,
        }
    }

    async fn wait_terminal(manager: &JobManager, job_id: &str) -> Job {
        for _ in 0..200 {
            if let Some(job) = manager.get(job_id).await {
                if job.status.is_terminal() || job.status == JobStatus::Paused {
                    return job;
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("job {} did not settle", job_id);
    }

    #[tokio::test]
    async fn test_submit_and_complete() {
        let (manager, _) = manager(JobManagerConfig::default());
        let job_id = manager
            .submit(request("ok", JobPriority::Normal))
            .await
            .unwrap();

        let job = wait_terminal(&manager, &job_id).await;
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.result, Some(json!({"ok": true})));
        assert!(job.started_at.is_some());
        assert!(job.execution_time_ms.is_some());
        assert_eq!(job.progress.current, 1);
    }

    #[tokio::test]
    async fn test_failed_job_records_error() {
        let (manager, _) = manager(JobManagerConfig::default());
        let job_id = manager
            .submit(request("fail", JobPriority::Normal))
            .await
            .unwrap();

        let job = wait_terminal(&manager, &job_id).await;
        assert_eq!(job.status, JobStatus::Failed);
        assert!(job.result.is_none());
        assert!(job.error.unwrap().contains("boom"));
    }

    #[tokio::test]
    async fn test_priority_order_single_worker() {
        let config = JobManagerConfig::default().with_max_concurrent(1);
        let (manager, dispatcher) = manager(config);

        // First job occupies the only slot while the rest queue up
        let j1 = manager.submit(request("slow", JobPriority::Low)).await.unwrap();
        let j2 = manager.submit(request("ok", JobPriority::High)).await.unwrap();
        let j3 = manager.submit(request("ok", JobPriority::Normal)).await.unwrap();

        for id in [&j1, &j2, &j3] {
            wait_terminal(&manager, id).await;
        }

        let started = dispatcher.started.lock().unwrap().clone();
        assert_eq!(started, vec!["slow", "ok", "ok"]);
        assert_eq!(dispatcher.max_observed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_three_high_jobs_run_one_at_a_time() {
        let config = JobManagerConfig::default().with_max_concurrent(1);
        let (manager, dispatcher) = manager(config);

        let mut ids = Vec::new();
        for _ in 0..3 {
            ids.push(manager.submit(request("ok", JobPriority::High)).await.unwrap());
        }
        for id in &ids {
            wait_terminal(&manager, id).await;
        }
        assert_eq!(dispatcher.max_observed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cancel_pending_job() {
        let config = JobManagerConfig::default().with_max_concurrent(1);
        let (manager, _) = manager(config);

        let blocker = manager.submit(request("slow", JobPriority::High)).await.unwrap();
        let queued = manager.submit(request("ok", JobPriority::Low)).await.unwrap();

        let status = manager.cancel(&queued).await.unwrap();
        assert_eq!(status, JobStatus::Cancelled);

        let job = manager.get(&queued).await.unwrap();
        assert_eq!(job.status, JobStatus::Cancelled);
        assert!(job.started_at.is_none());

        wait_terminal(&manager, &blocker).await;
    }

    #[tokio::test]
    async fn test_cancel_running_job() {
        let (manager, _) = manager(JobManagerConfig::default());
        let job_id = manager
            .submit(request("wait-for-cancel", JobPriority::Normal))
            .await
            .unwrap();

        // Let it start
        tokio::time::sleep(Duration::from_millis(30)).await;
        manager.cancel(&job_id).await.unwrap();

        let job = wait_terminal(&manager, &job_id).await;
        assert_eq!(job.status, JobStatus::Cancelled);
        assert!(job.result.is_none());
        // Partial results surface in the error detail
        assert!(job.error.unwrap().contains("partial results"));
    }

    #[tokio::test]
    async fn test_cancel_is_idempotent() {
        let (manager, _) = manager(JobManagerConfig::default());
        let job_id = manager.submit(request("ok", JobPriority::Normal)).await.unwrap();
        wait_terminal(&manager, &job_id).await;

        let first = manager.cancel(&job_id).await.unwrap();
        let second = manager.cancel(&job_id).await.unwrap();
        assert_eq!(first, JobStatus::Completed);
        assert_eq!(second, JobStatus::Completed);
    }

    #[tokio::test]
    async fn test_cancel_unknown_job() {
        let (manager, _) = manager(JobManagerConfig::default());
        let err = manager.cancel("ghost").await.unwrap_err();
        assert!(matches!(err, EngineError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_timeout_marks_job() {
        let config = JobManagerConfig::default().with_default_timeout(Duration::from_millis(50));
        let (manager, _) = manager(config);

        let job_id = manager.submit(request("slow", JobPriority::Normal)).await.unwrap();
        let job = wait_terminal(&manager, &job_id).await;
        assert_eq!(job.status, JobStatus::Timeout);
        assert!(job.error.unwrap().contains("timed out"));
    }

    #[tokio::test]
    async fn test_queue_full() {
        let config = JobManagerConfig::default()
            .with_max_concurrent(1)
            .with_max_queue_length(1);
        let (manager, _) = manager(config);

        let _running = manager.submit(request("slow", JobPriority::Normal)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        let _queued = manager.submit(request("ok", JobPriority::Normal)).await.unwrap();

        let err = manager
            .submit(request("ok", JobPriority::Normal))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::QueueFull(1)));
    }

    #[tokio::test]
    async fn test_delete_rules() {
        let (manager, _) = manager(JobManagerConfig::default());

        let running = manager
            .submit(request("slow", JobPriority::Normal))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        let err = manager.delete(&running).await.unwrap_err();
        assert!(err.is_validation());

        let done = manager.submit(request("ok", JobPriority::Normal)).await.unwrap();
        wait_terminal(&manager, &done).await;
        manager.delete(&done).await.unwrap();
        assert!(manager.get(&done).await.is_none());

        wait_terminal(&manager, &running).await;
    }

    #[tokio::test]
    async fn test_stats_invariants() {
        let (manager, _) = manager(JobManagerConfig::default().with_max_concurrent(2));

        let mut ids = Vec::new();
        for _ in 0..4 {
            ids.push(manager.submit(request("ok", JobPriority::Normal)).await.unwrap());
        }

        let stats = manager.stats().await;
        assert!(stats.queue.running <= stats.queue.max_concurrent);
        assert_eq!(stats.total, 4);
        assert_eq!(stats.by_status.values().sum::<usize>(), stats.total);

        for id in &ids {
            wait_terminal(&manager, id).await;
        }
        let stats = manager.stats().await;
        assert_eq!(stats.by_status.get("COMPLETED"), Some(&4));
        assert_eq!(stats.by_workflow_type.get("custom"), Some(&4));
    }

    #[tokio::test]
    async fn test_pause_and_resume() {
        let (manager, _) = manager(JobManagerConfig::default());
        let job_id = manager
            .submit(request("pause", JobPriority::Normal))
            .await
            .unwrap();

        let job = wait_terminal(&manager, &job_id).await;
        assert_eq!(job.status, JobStatus::Paused);
        let checkpoint_id = job.checkpoint_id.clone().unwrap();
        // Checkpoint id is the job's thread id
        assert_eq!(checkpoint_id, job_id);
        assert!(manager.has_paused_checkpoint(&checkpoint_id).await);
        // The pause carries its prompt and state onto the job record
        assert_eq!(job.human_prompt.as_deref(), Some("Approve?"));
        assert_eq!(
            job.paused_state.as_ref().unwrap()["human_prompt"],
            json!("Approve?")
        );

        let mut input = Map::new();
        input.insert("approved".into(), json!(true));
        let job = manager
            .resume_by_checkpoint(&checkpoint_id, &input)
            .await
            .unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.result, Some(json!({"approved": true})));
        // Pause bookkeeping is cleared once the job settles past it
        assert!(job.checkpoint_id.is_none());
        assert!(job.human_prompt.is_none());
        assert!(job.paused_state.is_none());
    }

    #[test]
    fn test_config_serde_roundtrip() {
        let config = JobManagerConfig::default().with_max_queue_length(100);
        let json = serde_json::to_value(&config).unwrap();
        // Durations serialize human-readable
        assert_eq!(json["default_timeout"], json!("10m"));

        let back: JobManagerConfig = serde_json::from_value(json).unwrap();
        assert_eq!(back.max_concurrent, 4);
        assert_eq!(back.default_timeout, Duration::from_secs(600));
        assert_eq!(back.max_queue_length, Some(100));
        assert_eq!(back.webhook_retry_schedule.len(), 3);
    }

    #[tokio::test]
    async fn test_resume_unknown_checkpoint() {
        let (manager, _) = manager(JobManagerConfig::default());
        let err = manager
            .resume_by_checkpoint("ghost", &Map::new())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Resume(_)));
    }
}
