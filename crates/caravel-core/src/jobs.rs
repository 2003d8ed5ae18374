//! The per-instance job queue.
//!
//! Releases and policy updates are serialized per instance: one worker
//! thread drains a FIFO channel, so at most one job is RUNNING and jobs
//! reach terminal state in submission order. Status transitions are
//! monotonic and validated; terminal state is immutable.

use crate::CoreError;
use caravel_schema::{derive_job_id, Cause, InstanceId, Job, JobId, JobSpec, JobStatus};
use caravel_schema::{ReleaseResult, Revision};
use chrono::Utc;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use tracing::{debug, info, warn};

pub fn validate_transition(from: JobStatus, to: JobStatus) -> Result<(), CoreError> {
    let valid = matches!(
        (from, to),
        (JobStatus::Queued, JobStatus::Running)
            | (JobStatus::Running, JobStatus::Succeeded | JobStatus::Failed)
            | (JobStatus::Queued, JobStatus::Failed)
    );

    if valid {
        Ok(())
    } else {
        Err(CoreError::InvalidTransition {
            from: from.to_string(),
            to: to.to_string(),
        })
    }
}

/// What a job run produced. `error = None` means the job succeeded.
#[derive(Debug, Default)]
pub struct JobOutcome {
    pub result: Option<ReleaseResult>,
    pub revision: Option<Revision>,
    pub error: Option<String>,
}

/// Persistence hook: called after every recorded transition so the server
/// can mirror jobs into the instance database.
pub trait JobSink: Send + Sync {
    fn record(&self, job: &Job);
}

type Runner = dyn Fn(&Job) -> JobOutcome + Send + Sync;

struct QueueInner {
    instance: InstanceId,
    jobs: Mutex<BTreeMap<JobId, Job>>,
    sink: Option<Arc<dyn JobSink>>,
}

impl QueueInner {
    fn record(&self, job: &Job) {
        if let Some(sink) = &self.sink {
            sink.record(job);
        }
    }

    /// Move a job to RUNNING and return a snapshot of it. `None` when the
    /// transition is no longer valid (the job was failed while queued).
    fn start(&self, id: &JobId) -> Option<Job> {
        let mut jobs = self.jobs.lock().expect("job map poisoned");
        let job = jobs.get_mut(id)?;
        if validate_transition(job.status, JobStatus::Running).is_err() {
            debug!("job {id} not startable from {}", job.status);
            return None;
        }
        job.status = JobStatus::Running;
        let snapshot = job.clone();
        drop(jobs);
        self.record(&snapshot);
        Some(snapshot)
    }

    /// Record a terminal outcome. A job already in terminal state keeps it:
    /// the first terminal transition wins.
    fn complete(&self, id: &JobId, outcome: JobOutcome) {
        let mut jobs = self.jobs.lock().expect("job map poisoned");
        let Some(job) = jobs.get_mut(id) else { return };
        if job.status.is_terminal() {
            debug!("job {id} already terminal ({}), outcome dropped", job.status);
            return;
        }
        job.status = if outcome.error.is_none() {
            JobStatus::Succeeded
        } else {
            JobStatus::Failed
        };
        job.result = outcome.result;
        job.revision = outcome.revision;
        job.error = outcome.error;
        let snapshot = job.clone();
        drop(jobs);
        info!("job {id} -> {}", snapshot.status);
        self.record(&snapshot);
    }

    /// Fail every non-terminal job with `error`. Used when the instance
    /// loses its daemon connection.
    fn fail_all(&self, error: &str) {
        let mut failed = Vec::new();
        {
            let mut jobs = self.jobs.lock().expect("job map poisoned");
            for job in jobs.values_mut() {
                if !job.status.is_terminal() {
                    job.status = JobStatus::Failed;
                    job.error = Some(error.to_owned());
                    failed.push(job.clone());
                }
            }
        }
        for job in &failed {
            warn!("job {} failed: {error}", job.id);
            self.record(job);
        }
    }
}

/// FIFO of release and policy-update jobs for one instance.
pub struct JobQueue {
    inner: Arc<QueueInner>,
    tx: Option<mpsc::Sender<JobId>>,
    counter: AtomicU64,
    worker: Option<JoinHandle<()>>,
}

impl JobQueue {
    /// Start the queue's worker thread. `runner` executes one job at a
    /// time and must not panic; `sink` (if any) sees every transition.
    pub fn new(
        instance: InstanceId,
        runner: impl Fn(&Job) -> JobOutcome + Send + Sync + 'static,
        sink: Option<Arc<dyn JobSink>>,
    ) -> Self {
        let inner = Arc::new(QueueInner {
            instance,
            jobs: Mutex::new(BTreeMap::new()),
            sink,
        });

        let (tx, rx) = mpsc::channel::<JobId>();
        let worker_inner = Arc::clone(&inner);
        let runner: Box<Runner> = Box::new(runner);
        let worker = std::thread::spawn(move || {
            for job_id in rx {
                let Some(job) = worker_inner.start(&job_id) else {
                    continue;
                };
                let outcome = runner(&job);
                worker_inner.complete(&job_id, outcome);
            }
        });

        Self {
            inner,
            tx: Some(tx),
            counter: AtomicU64::new(0),
            worker: Some(worker),
        }
    }

    /// Enqueue a job and return its record immediately (status QUEUED).
    pub fn submit(&self, spec: JobSpec, cause: Cause) -> Job {
        let counter = self.counter.fetch_add(1, Ordering::SeqCst);
        let submitted_at = Utc::now();
        let id = derive_job_id(
            &self.inner.instance,
            counter,
            &submitted_at.to_rfc3339(),
        );

        let job = Job {
            id: id.clone(),
            instance: self.inner.instance.clone(),
            submitted_at,
            cause,
            spec,
            status: JobStatus::Queued,
            result: None,
            revision: None,
            error: None,
        };
        self.inner
            .jobs
            .lock()
            .expect("job map poisoned")
            .insert(id.clone(), job.clone());
        self.inner.record(&job);

        let send = self.tx.as_ref().map(|tx| tx.send(id.clone()));
        if !matches!(send, Some(Ok(()))) {
            self.inner.fail_all("job queue shut down");
            return self.status(&id).unwrap_or(job);
        }
        debug!("job {id} queued");
        job
    }

    pub fn status(&self, id: &JobId) -> Option<Job> {
        self.inner
            .jobs
            .lock()
            .expect("job map poisoned")
            .get(id)
            .cloned()
    }

    /// Fail every queued or running job: the daemon connection is gone.
    pub fn daemon_disconnected(&self) {
        self.inner.fail_all("daemon disconnected");
    }
}

impl Drop for JobQueue {
    fn drop(&mut self) {
        // Close the channel first so the worker drains and exits.
        self.tx.take();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}
