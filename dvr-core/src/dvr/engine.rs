use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use tracing::{error, info, warn};

use super::models::{CompletedRecording, DvrJob, JobStatus, ScheduleRequest};
use super::recorder::{Recorder, CANCELLED_BY_USER};
use super::registry::{ProcessRegistry, StopReason};
use super::scheduler::{ReconcileReport, Scheduler};
use super::store::SqliteDvrStore;
use super::{DvrError, DvrResult};
use crate::guide::ChannelLookup;
use crate::settings::SettingsProvider;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineStatus {
    pub jobs_by_status: HashMap<String, usize>,
    pub active_recordings: Vec<i64>,
    pub armed_jobs: Vec<i64>,
}

/// Wires the store, scheduler, recorder and registry together and exposes
/// the owner-scoped operations the HTTP layer calls.
pub struct DvrEngine {
    store: SqliteDvrStore,
    settings: Arc<dyn SettingsProvider>,
    registry: Arc<ProcessRegistry>,
    scheduler: Scheduler,
}

impl DvrEngine {
    pub fn new(
        store: SqliteDvrStore,
        channels: Arc<dyn ChannelLookup>,
        settings: Arc<dyn SettingsProvider>,
        recordings_dir: impl Into<PathBuf>,
    ) -> Self {
        let registry = Arc::new(ProcessRegistry::new());
        let recorder = Arc::new(Recorder::new(
            store.clone(),
            channels,
            Arc::clone(&settings),
            Arc::clone(&registry),
            recordings_dir,
        ));
        let scheduler = Scheduler::new(store.clone(), recorder);
        Self {
            store,
            settings,
            registry,
            scheduler,
        }
    }

    pub fn store(&self) -> &SqliteDvrStore {
        &self.store
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn registry(&self) -> &Arc<ProcessRegistry> {
        &self.registry
    }

    pub fn recordings_dir(&self) -> &Path {
        self.scheduler.recorder().recordings_dir()
    }

    pub fn reconcile_on_startup(&self) -> DvrResult<ReconcileReport> {
        self.scheduler.reconcile_on_startup()
    }

    /// Persists a `scheduled` job using the buffers, default profile and
    /// default user agent in effect right now, and arms it. The returned job
    /// reflects the row after arming, so a window that has already elapsed
    /// comes back as `error`.
    pub fn schedule_request(&self, user_id: i64, request: ScheduleRequest) -> DvrResult<DvrJob> {
        let mut new_job = request.into_job(user_id, self.settings.buffers())?;
        if new_job.profile_id.is_none() {
            new_job.profile_id = self.settings.recording_profile(None).map(|profile| profile.id);
        }
        if new_job.user_agent_id.is_none() {
            new_job.user_agent_id = self.settings.user_agent(None).map(|(id, _)| id);
        }
        let job = self.store.insert_job(&new_job)?;
        info!(
            job_id = job.id,
            user_id,
            channel = %job.channel_id,
            start_time = %job.start_time,
            end_time = %job.end_time,
            "dvr job scheduled"
        );
        if let Err(err) = self.scheduler.schedule(&job) {
            error!(job_id = job.id, error = %err, "failed to arm dvr job");
            let reason = format!("failed to arm recording: {err}");
            if let Err(mark_err) = self.store.mark_error(job.id, &reason) {
                error!(job_id = job.id, error = %mark_err, "failed to record arming failure");
            }
            return Err(err);
        }
        Ok(self.store.fetch_job(job.id)?.unwrap_or(job))
    }

    pub fn jobs(&self, user_id: i64) -> DvrResult<Vec<DvrJob>> {
        self.store.list_jobs_for_user(user_id)
    }

    pub fn job(&self, user_id: i64, job_id: i64) -> DvrResult<DvrJob> {
        self.store
            .fetch_job_for_user(user_id, job_id)?
            .ok_or(DvrError::JobNotFound { job_id })
    }

    pub fn recordings(&self, user_id: i64) -> DvrResult<Vec<CompletedRecording>> {
        self.store.list_recordings_for_user(user_id)
    }

    /// Pending jobs become `cancelled`. A running job is signalled and its
    /// supervisor lands it in `error`. Terminal jobs are returned unchanged.
    pub fn cancel_job(&self, user_id: i64, job_id: i64) -> DvrResult<DvrJob> {
        let job = self.job(user_id, job_id)?;
        self.scheduler.cancel(job_id);
        match job.status {
            JobStatus::Scheduled => {
                if self.store.cancel_scheduled(job_id)? {
                    info!(job_id, user_id, "dvr job cancelled before start");
                } else {
                    // The start trigger won; the job is recording or already failed.
                    self.stop_running(job_id)?;
                }
            }
            JobStatus::Recording => self.stop_running(job_id)?,
            _ => {}
        }
        self.job(user_id, job_id)
    }

    /// Removes the recording row and unlinks its file. A file that is
    /// already gone is not an error.
    pub fn delete_recording(&self, user_id: i64, recording_id: i64) -> DvrResult<CompletedRecording> {
        let recording = self
            .store
            .fetch_recording_for_user(user_id, recording_id)?
            .ok_or(DvrError::RecordingNotFound { recording_id })?;
        match std::fs::remove_file(&recording.file_path) {
            Ok(()) => {}
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                warn!(recording_id, path = %recording.file_path, "recording file already missing");
            }
            Err(err) => return Err(err.into()),
        }
        self.store.delete_recording(recording_id)?;
        info!(recording_id, user_id, path = %recording.file_path, "recording deleted");
        Ok(recording)
    }

    pub fn status(&self) -> DvrResult<EngineStatus> {
        Ok(EngineStatus {
            jobs_by_status: self.store.count_by_status()?,
            active_recordings: self.registry.job_ids(),
            armed_jobs: self.scheduler.armed_jobs(),
        })
    }

    pub fn shutdown(&self) -> usize {
        self.scheduler.shutdown()
    }

    fn stop_running(&self, job_id: i64) -> DvrResult<()> {
        self.store.note_reason(job_id, CANCELLED_BY_USER)?;
        let outcome = self
            .scheduler
            .recorder()
            .stop_recording(job_id, StopReason::User);
        info!(job_id, ?outcome, "running recording cancelled");
        Ok(())
    }
}
