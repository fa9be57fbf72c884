use std::collections::HashMap;
use std::io;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use super::models::{DvrJob, JobStatus};
use super::recorder::Recorder;
use super::registry::StopReason;
use super::store::SqliteDvrStore;
use super::DvrResult;

pub const WINDOW_ELAPSED: &str = "recording window elapsed before start";
pub const INTERRUPTED_BY_RESTART: &str = "interrupted by restart";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Start (or immediate launch) and stop triggers are in place.
    Armed,
    /// `end_time` had already passed; the job was failed instead.
    Expired,
    /// The job is not `scheduled`; nothing was armed.
    Ignored(JobStatus),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileReport {
    pub interrupted: Vec<i64>,
    pub rearmed: Vec<i64>,
    pub expired: Vec<i64>,
}

struct JobTimers {
    generation: u64,
    start: Option<JoinHandle<()>>,
    stop: Option<JoinHandle<()>>,
}

impl JobTimers {
    fn abort(self) -> bool {
        let mut armed = false;
        for handle in [self.start, self.stop].into_iter().flatten() {
            handle.abort();
            armed = true;
        }
        armed
    }

    fn is_empty(&self) -> bool {
        self.start.is_none() && self.stop.is_none()
    }
}

#[derive(Clone, Copy)]
enum Trigger {
    Start,
    Stop,
}

struct Inner {
    store: SqliteDvrStore,
    recorder: Arc<Recorder>,
    timers: Mutex<HashMap<i64, JobTimers>>,
    generation: Mutex<u64>,
}

/// Owns the start/stop triggers of every `scheduled` job. Cheap to clone;
/// clones share the same timer set.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<Inner>,
}

impl Scheduler {
    pub fn new(store: SqliteDvrStore, recorder: Arc<Recorder>) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                recorder,
                timers: Mutex::new(HashMap::new()),
                generation: Mutex::new(0),
            }),
        }
    }

    pub fn recorder(&self) -> &Arc<Recorder> {
        &self.inner.recorder
    }

    /// Arms the triggers for `job`, replacing any it already had.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn schedule(&self, job: &DvrJob) -> DvrResult<Disposition> {
        self.cancel(job.id);
        if job.status != JobStatus::Scheduled {
            debug!(job_id = job.id, status = %job.status, "not arming non-scheduled job");
            return Ok(Disposition::Ignored(job.status));
        }

        let now = Utc::now();
        if job.end_time <= now {
            if self.inner.store.mark_error(job.id, WINDOW_ELAPSED)? {
                warn!(job_id = job.id, end_time = %job.end_time, "recording window elapsed; job failed");
            }
            return Ok(Disposition::Expired);
        }

        let generation = self.inner.next_generation();
        // Held while spawning so a zero-delay trigger cannot claim its slot
        // before the slot exists.
        let mut timers = self.inner.timers();
        let armed = JobTimers {
            generation,
            start: Some(self.spawn_trigger(job.clone(), Trigger::Start, generation, now)),
            stop: Some(self.spawn_trigger(job.clone(), Trigger::Stop, generation, now)),
        };
        if let Some(previous) = timers.insert(job.id, armed) {
            previous.abort();
        }
        drop(timers);
        debug!(
            job_id = job.id,
            start_time = %job.start_time,
            end_time = %job.end_time,
            immediate = job.start_time <= now,
            "recording triggers armed"
        );
        Ok(Disposition::Armed)
    }

    /// Disarms both triggers. Returns whether any were still pending. A
    /// start trigger that already fired keeps running; the store's
    /// conditional transitions settle that race.
    pub fn cancel(&self, job_id: i64) -> bool {
        let removed = self.inner.timers().remove(&job_id);
        let armed = removed.map(JobTimers::abort).unwrap_or(false);
        if armed {
            debug!(job_id, "recording triggers disarmed");
        }
        armed
    }

    /// Fails rows left `recording` by a previous process, then re-arms every
    /// `scheduled` row. Must run before any other scheduling activity.
    pub fn reconcile_on_startup(&self) -> DvrResult<ReconcileReport> {
        let mut report = ReconcileReport::default();
        for (job_id, file_path) in self.inner.store.fail_interrupted(INTERRUPTED_BY_RESTART)? {
            self.cancel(job_id);
            warn!(job_id, "recording interrupted by restart; job failed");
            if let Some(path) = file_path {
                remove_interrupted_output(job_id, Path::new(&path));
            }
            report.interrupted.push(job_id);
        }

        for job in self.inner.store.list_jobs_by_status(JobStatus::Scheduled)? {
            match self.schedule(&job)? {
                Disposition::Armed => report.rearmed.push(job.id),
                Disposition::Expired => report.expired.push(job.id),
                Disposition::Ignored(_) => {}
            }
        }
        info!(
            interrupted = report.interrupted.len(),
            rearmed = report.rearmed.len(),
            expired = report.expired.len(),
            "dvr reconciliation finished"
        );
        Ok(report)
    }

    pub fn is_armed(&self, job_id: i64) -> bool {
        self.inner.timers().contains_key(&job_id)
    }

    pub fn armed_jobs(&self) -> Vec<i64> {
        let mut ids: Vec<i64> = self.inner.timers().keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Disarms everything. Running recordings are left to their supervisors.
    pub fn shutdown(&self) -> usize {
        let drained: Vec<JobTimers> = self.inner.timers().drain().map(|(_, t)| t).collect();
        let count = drained.len();
        for timers in drained {
            timers.abort();
        }
        info!(disarmed = count, "scheduler stopped");
        count
    }

    fn spawn_trigger(
        &self,
        job: DvrJob,
        trigger: Trigger,
        generation: u64,
        now: DateTime<Utc>,
    ) -> JoinHandle<()> {
        let deadline = match trigger {
            Trigger::Start => job.start_time,
            Trigger::Stop => job.end_time,
        };
        let delay = (deadline - now).to_std().unwrap_or(Duration::ZERO);
        let scheduler = self.clone();
        tokio::spawn(async move {
            sleep(delay).await;
            if !scheduler.inner.claim(job.id, trigger, generation) {
                return;
            }
            match trigger {
                Trigger::Start => {
                    let outcome = scheduler.inner.recorder.start_recording(&job).await;
                    debug!(job_id = job.id, ?outcome, "start trigger finished");
                }
                Trigger::Stop => {
                    let outcome = scheduler
                        .inner
                        .recorder
                        .stop_recording(job.id, StopReason::Schedule);
                    debug!(job_id = job.id, ?outcome, "stop trigger fired");
                }
            }
        })
    }
}

fn remove_interrupted_output(job_id: i64, path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => info!(job_id, path = %path.display(), "removed output of interrupted recording"),
        Err(err) if err.kind() == io::ErrorKind::NotFound => {}
        Err(err) => warn!(job_id, path = %path.display(), error = %err, "failed to remove interrupted output"),
    }
}

impl Inner {
    fn timers(&self) -> MutexGuard<'_, HashMap<i64, JobTimers>> {
        self.timers.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn next_generation(&self) -> u64 {
        let mut generation = self.generation.lock().unwrap_or_else(|e| e.into_inner());
        *generation += 1;
        *generation
    }

    /// Removes a fired trigger from the set. `false` means it was disarmed
    /// (or superseded by a re-schedule) while sleeping.
    fn claim(&self, job_id: i64, trigger: Trigger, generation: u64) -> bool {
        let mut timers = self.timers();
        let Some(entry) = timers.get_mut(&job_id) else {
            return false;
        };
        if entry.generation != generation {
            return false;
        }
        let slot = match trigger {
            Trigger::Start => entry.start.take(),
            Trigger::Stop => entry.stop.take(),
        };
        if entry.is_empty() {
            timers.remove(&job_id);
        }
        slot.is_some()
    }
}
