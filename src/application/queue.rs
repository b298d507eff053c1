//! In-process job queue with a fixed pool of workers.
//!
//! Jobs are keyed by [`DedupKey`]. Submitting a key that is already pending or
//! running attaches to the existing job instead of creating a second one.
//! An additive job whose slot is already filled completes immediately, as
//! does an optimize whose last result is still what the registry holds.
//! Follow-up jobs returned by an executor are admitted before the parent
//! turns terminal, so [`JobQueue::await_drain`] never observes a gap between
//! a parent and its children.

use crate::domain::jobs::{DedupKey, JobId, JobKind, JobSpec};
use crate::domain::rendition::Fingerprint;
use crate::domain::video::VideoId;
use crate::error::{JobError, TranscodeError};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobOutcome {
    pub fingerprint: Fingerprint,
    pub follow_ups: Vec<JobKind>,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait JobExecutor: Send + Sync {
    async fn execute(&self, job: &JobSpec) -> Result<JobOutcome, JobError>;

    /// Fingerprint currently stored in the slot the job would write, if any.
    fn current_fingerprint(&self, key: &DedupKey) -> Option<Fingerprint>;
}

#[derive(Debug, Clone)]
pub enum JobStatus {
    Pending,
    Running,
    Done(Fingerprint),
    Failed(Arc<JobError>),
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Done(_) | JobStatus::Failed(_))
    }
}

struct JobEntry {
    spec: JobSpec,
    status: watch::Sender<JobStatus>,
}

/// A caller's view of an admitted job. Every caller attached to the same job
/// observes the same terminal status.
#[derive(Debug, Clone)]
pub struct JobHandle {
    id: JobId,
    key: DedupKey,
    attached: bool,
    rx: watch::Receiver<JobStatus>,
}

impl JobHandle {
    fn for_entry(entry: &JobEntry, attached: bool) -> Self {
        Self {
            id: entry.spec.id,
            key: entry.spec.key(),
            attached,
            rx: entry.status.subscribe(),
        }
    }

    fn completed(key: DedupKey, fingerprint: Fingerprint) -> Self {
        let (_, rx) = watch::channel(JobStatus::Done(fingerprint));
        Self {
            id: JobId::generate(),
            key,
            attached: true,
            rx,
        }
    }

    pub fn id(&self) -> JobId {
        self.id
    }

    pub fn key(&self) -> &DedupKey {
        &self.key
    }

    /// Whether this submission reused an existing job rather than creating one.
    pub fn attached(&self) -> bool {
        self.attached
    }

    pub fn status(&self) -> JobStatus {
        self.rx.borrow().clone()
    }

    pub async fn wait(&self) -> JobStatus {
        let mut rx = self.rx.clone();
        loop {
            let status = rx.borrow_and_update().clone();
            if status.is_terminal() {
                return status;
            }
            if rx.changed().await.is_err() {
                let status = rx.borrow().clone();
                if status.is_terminal() {
                    return status;
                }
                return JobStatus::Failed(Arc::new(JobError::Abandoned));
            }
        }
    }
}

#[derive(Default)]
struct QueueState {
    pending: VecDeque<Arc<JobEntry>>,
    live: HashMap<DedupKey, Arc<JobEntry>>,
    /// Last optimize result per video.
    completed: HashMap<DedupKey, Fingerprint>,
}

struct QueueInner {
    executor: Arc<dyn JobExecutor>,
    workers: usize,
    started: AtomicBool,
    state: Mutex<QueueState>,
    work: Notify,
    outstanding: watch::Sender<usize>,
}

#[derive(Clone)]
pub struct JobQueue {
    inner: Arc<QueueInner>,
}

impl JobQueue {
    pub fn new(executor: Arc<dyn JobExecutor>, workers: usize) -> Self {
        let (outstanding, _) = watch::channel(0usize);
        Self {
            inner: Arc::new(QueueInner {
                executor,
                workers: workers.max(1),
                started: AtomicBool::new(false),
                state: Mutex::new(QueueState::default()),
                work: Notify::new(),
                outstanding,
            }),
        }
    }

    /// Spawn the worker pool. Calling it again is a no-op.
    pub fn start(&self) -> Vec<JoinHandle<()>> {
        if self.inner.started.swap(true, Ordering::SeqCst) {
            return Vec::new();
        }
        (0..self.inner.workers)
            .map(|worker_id| {
                let queue = self.clone();
                tokio::spawn(async move { queue.run_worker_loop(worker_id).await })
            })
            .collect()
    }

    pub fn submit(&self, video: VideoId, kind: JobKind) -> JobHandle {
        let key = DedupKey { video, kind };
        let entry = {
            let mut state = self.inner.state.lock();

            if let Some(entry) = state.live.get(&key) {
                debug!(video = %key.video, kind = %key.kind, job = %entry.spec.id, "attached to live job");
                return JobHandle::for_entry(entry, true);
            }

            if let Some(current) = self.inner.executor.current_fingerprint(&key) {
                let satisfied =
                    key.kind.is_additive() || state.completed.get(&key) == Some(&current);
                if satisfied {
                    debug!(video = %key.video, kind = %key.kind, "result already registered");
                    return JobHandle::completed(key, current);
                }
            }

            let (status, _) = watch::channel(JobStatus::Pending);
            let entry = Arc::new(JobEntry {
                spec: JobSpec::new(key.video.clone(), key.kind),
                status,
            });
            state.live.insert(key, entry.clone());
            state.pending.push_back(entry.clone());
            self.inner.outstanding.send_modify(|n| *n += 1);
            entry
        };

        info!(video = %entry.spec.video, kind = %entry.spec.kind, job = %entry.spec.id, "job admitted");
        self.inner.work.notify_one();
        JobHandle::for_entry(&entry, false)
    }

    pub fn is_idle(&self) -> bool {
        *self.inner.outstanding.borrow() == 0
    }

    /// Resolves once no job is pending or running.
    pub async fn await_drain(&self) {
        let mut rx = self.inner.outstanding.subscribe();
        loop {
            if *rx.borrow_and_update() == 0 {
                return;
            }
            if rx.changed().await.is_err() {
                return;
            }
        }
    }

    async fn run_worker_loop(&self, worker_id: usize) {
        debug!(worker = worker_id, "worker started");
        loop {
            let next = self.inner.state.lock().pending.pop_front();
            match next {
                Some(entry) => self.process_job(&entry, worker_id).await,
                None => self.inner.work.notified().await,
            }
        }
    }

    async fn process_job(&self, entry: &Arc<JobEntry>, worker_id: usize) {
        let spec = entry.spec.clone();
        entry.status.send_replace(JobStatus::Running);
        info!(worker = worker_id, video = %spec.video, kind = %spec.kind, job = %spec.id, "job started");

        let executor = self.inner.executor.clone();
        let task_spec = spec.clone();
        let result = match tokio::spawn(async move { executor.execute(&task_spec).await }).await {
            Ok(result) => result,
            Err(join_error) => Err(JobError::Transcode(TranscodeError::EngineFault(format!(
                "job task aborted: {}",
                join_error
            )))),
        };

        match result {
            Ok(outcome) => {
                for kind in &outcome.follow_ups {
                    self.submit(spec.video.clone(), *kind);
                }
                let mut state = self.inner.state.lock();
                state.live.remove(&spec.key());
                // Additive keys are answered from the registry alone.
                if !spec.kind.is_additive() {
                    state
                        .completed
                        .insert(spec.key(), outcome.fingerprint.clone());
                }
                info!(
                    video = %spec.video,
                    kind = %spec.kind,
                    job = %spec.id,
                    fingerprint = %outcome.fingerprint.short(),
                    follow_ups = outcome.follow_ups.len(),
                    "job done"
                );
                entry.status.send_replace(JobStatus::Done(outcome.fingerprint));
            }
            Err(e) => {
                error!(video = %spec.video, kind = %spec.kind, job = %spec.id, error = %e, "job failed");
                let mut state = self.inner.state.lock();
                state.live.remove(&spec.key());
                entry.status.send_replace(JobStatus::Failed(Arc::new(e)));
            }
        }

        self.inner
            .outstanding
            .send_modify(|n| *n = n.saturating_sub(1));
    }
}
