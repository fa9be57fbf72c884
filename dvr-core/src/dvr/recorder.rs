use std::io;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use thiserror::Error;
use tokio::fs;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStderr, Command};
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use super::command::{build_command, output_file_name, TemplateError, TemplateValues};
use super::models::{DvrJob, JobStatus, NewCompletedRecording};
use super::registry::{ProcessRegistry, ProcessSignal, SignalOutcome, StopReason};
use super::store::SqliteDvrStore;
use super::DvrError;
use crate::guide::ChannelLookup;
use crate::settings::SettingsProvider;

pub const CANCELLED_BY_USER: &str = "cancelled by user";

/// Why a recording ended in `error`. The `Display` text is what lands in
/// the job's `error_reason` column.
#[derive(Debug, Error)]
pub enum RecorderFailure {
    #[error("channel {0} not found in guide")]
    ChannelNotFound(String),
    #[error("recording profile {0} not configured")]
    ProfileNotFound(String),
    #[error("user agent {0} not configured")]
    UserAgentNotFound(String),
    #[error("invalid command template: {0}")]
    Template(#[from] TemplateError),
    #[error("failed to prepare recordings directory {path}: {source}")]
    OutputDir { path: PathBuf, source: io::Error },
    #[error("failed to spawn {program}: {source}")]
    Spawn { program: String, source: io::Error },
    #[error("transcoder exited unsuccessfully ({0})")]
    Exit(String),
    #[error("transcoder produced no output")]
    EmptyOutput,
    #[error("cancelled by user")]
    Cancelled,
    #[error("store error: {0}")]
    Store(#[from] DvrError),
}

#[derive(Debug)]
pub enum StartOutcome {
    Launched { pid: u32, file_path: PathBuf },
    Failed(RecorderFailure),
    /// The job left `scheduled` before the transcoder could be attached.
    Skipped(Option<JobStatus>),
}

struct Launch {
    program: String,
    args: Vec<String>,
    output: PathBuf,
}

pub struct Recorder {
    store: SqliteDvrStore,
    channels: Arc<dyn ChannelLookup>,
    settings: Arc<dyn SettingsProvider>,
    registry: Arc<ProcessRegistry>,
    recordings_dir: PathBuf,
}

impl Recorder {
    pub fn new(
        store: SqliteDvrStore,
        channels: Arc<dyn ChannelLookup>,
        settings: Arc<dyn SettingsProvider>,
        registry: Arc<ProcessRegistry>,
        recordings_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            store,
            channels,
            settings,
            registry,
            recordings_dir: recordings_dir.into(),
        }
    }

    pub fn recordings_dir(&self) -> &Path {
        &self.recordings_dir
    }

    pub fn registry(&self) -> &Arc<ProcessRegistry> {
        &self.registry
    }

    /// Launches the transcoder for `job` and hands it to a supervisor task.
    /// Failures never escape: they are written to the job row instead.
    pub async fn start_recording(self: &Arc<Self>, job: &DvrJob) -> StartOutcome {
        match self.store.fetch_job(job.id) {
            Ok(Some(current)) if current.status == JobStatus::Scheduled => {}
            Ok(current) => {
                let status = current.map(|job| job.status);
                debug!(job_id = job.id, ?status, "job no longer scheduled; not recording");
                return StartOutcome::Skipped(status);
            }
            Err(err) => return self.fail(job.id, err.into(), None).await,
        }

        let launch = match self.prepare(job).await {
            Ok(launch) => launch,
            Err(failure) => return self.fail(job.id, failure, None).await,
        };

        let mut command = Command::new(&launch.program);
        command
            .args(&launch.args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped());
        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(source) => {
                let failure = RecorderFailure::Spawn {
                    program: launch.program,
                    source,
                };
                return self.fail(job.id, failure, None).await;
            }
        };
        let Some(pid) = child.id() else {
            let failure = RecorderFailure::Exit("exited before it could be tracked".into());
            return self.fail(job.id, failure, Some(&launch.output)).await;
        };

        // Registered before the status flip so a cancel that observes
        // `recording` always finds the process to signal.
        self.registry.register(job.id, pid);
        let file_path = launch.output.to_string_lossy().to_string();
        match self.store.begin_recording(job.id, pid, &file_path) {
            Ok(true) => {}
            Ok(false) => {
                self.registry.unregister(job.id);
                warn!(job_id = job.id, pid, "job changed state during launch; discarding transcoder");
                discard(&mut child, &launch.output).await;
                let status = self.store.fetch_job(job.id).ok().flatten().map(|job| job.status);
                return StartOutcome::Skipped(status);
            }
            Err(err) => {
                self.registry.unregister(job.id);
                discard(&mut child, &launch.output).await;
                return self.fail(job.id, err.into(), None).await;
            }
        }
        info!(
            job_id = job.id,
            pid,
            channel = %job.channel_id,
            output = %launch.output.display(),
            "recording started"
        );

        let recorder = Arc::clone(self);
        let supervised = job.clone();
        let output = launch.output.clone();
        tokio::spawn(async move {
            recorder.supervise(supervised, child, output).await;
        });

        // A slow launch can outlast the window; the stop trigger then found
        // nothing registered and will not fire again.
        if Utc::now() >= job.end_time {
            warn!(job_id = job.id, pid, end_time = %job.end_time, "launch finished after end time; stopping");
            self.stop_recording(job.id, StopReason::Schedule);
        }

        StartOutcome::Launched {
            pid,
            file_path: launch.output,
        }
    }

    /// Sends SIGTERM to the job's transcoder. With `stop_grace_seconds`
    /// configured, a process still registered after the grace period gets
    /// SIGKILL.
    pub fn stop_recording(&self, job_id: i64, reason: StopReason) -> SignalOutcome {
        let pid = self.registry.pid(job_id);
        let outcome = self.registry.stop(job_id, reason);
        let grace = self.settings.stop_grace_seconds().filter(|secs| *secs > 0);
        if let (SignalOutcome::Delivered, Some(pid), Some(grace)) = (outcome, pid, grace) {
            let registry = Arc::clone(&self.registry);
            tokio::spawn(async move {
                sleep(Duration::from_secs(grace)).await;
                if registry.pid(job_id) == Some(pid) {
                    warn!(job_id, pid, grace, "transcoder ignored SIGTERM; killing");
                    registry.signal(job_id, ProcessSignal::Kill);
                }
            });
        }
        outcome
    }

    async fn prepare(&self, job: &DvrJob) -> Result<Launch, RecorderFailure> {
        let channel = self
            .channels
            .resolve(&job.channel_id)
            .await
            .ok_or_else(|| RecorderFailure::ChannelNotFound(job.channel_id.clone()))?;
        let profile = self
            .settings
            .recording_profile(job.profile_id.as_deref())
            .ok_or_else(|| {
                RecorderFailure::ProfileNotFound(
                    job.profile_id.clone().unwrap_or_else(|| "default".into()),
                )
            })?;
        let (_, user_agent) = self
            .settings
            .user_agent(job.user_agent_id.as_deref())
            .ok_or_else(|| {
                RecorderFailure::UserAgentNotFound(
                    job.user_agent_id.clone().unwrap_or_else(|| "default".into()),
                )
            })?;

        fs::create_dir_all(&self.recordings_dir)
            .await
            .map_err(|source| RecorderFailure::OutputDir {
                path: self.recordings_dir.clone(),
                source,
            })?;
        let output = self.recordings_dir.join(output_file_name(
            job.id,
            &job.program_title,
            &profile.extension,
        ));
        let output_str = output.to_string_lossy();
        let command = build_command(
            &profile.command,
            TemplateValues {
                input: &channel.url,
                user_agent: &user_agent,
                output: &output_str,
            },
        )?;
        debug!(job_id = job.id, profile = %profile.id, command = %command.display(), "transcoder command built");
        Ok(Launch {
            program: command.program,
            args: command.args,
            output,
        })
    }

    async fn supervise(&self, job: DvrJob, mut child: Child, output: PathBuf) {
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(forward_stderr(job.id, stderr));
        }
        let exit = child.wait().await;
        let stop = self.registry.unregister(job.id).and_then(|entry| entry.stop);
        self.finalize(&job, exit, stop, &output).await;
    }

    async fn finalize(
        &self,
        job: &DvrJob,
        exit: io::Result<ExitStatus>,
        stop: Option<StopReason>,
        output: &Path,
    ) {
        let size = match fs::metadata(output).await {
            Ok(meta) if meta.is_file() => meta.len(),
            _ => 0,
        };
        let verdict = match (&exit, stop) {
            (_, Some(StopReason::User)) => Err(RecorderFailure::Cancelled),
            (Err(err), _) => Err(RecorderFailure::Exit(err.to_string())),
            (Ok(status), stop) if !exit_is_clean(status, stop) => {
                Err(RecorderFailure::Exit(status.to_string()))
            }
            _ if size == 0 => Err(RecorderFailure::EmptyOutput),
            _ => Ok(()),
        };

        if let Err(failure) = verdict {
            self.fail(job.id, failure, Some(output)).await;
            return;
        }

        let recording = NewCompletedRecording {
            user_id: job.user_id,
            job_id: Some(job.id),
            channel_name: job.channel_name.clone(),
            program_title: job.program_title.clone(),
            start_time: job.start_time,
            duration_seconds: job.duration_seconds(),
            file_size_bytes: i64::try_from(size).unwrap_or(i64::MAX),
            file_path: output.to_string_lossy().to_string(),
        };
        if let Err(err) = self.store.insert_recording(&recording) {
            self.fail(job.id, err.into(), Some(output)).await;
            return;
        }
        match self.store.complete_recording(job.id) {
            Ok(true) => info!(job_id = job.id, bytes = size, "recording completed"),
            Ok(false) => warn!(job_id = job.id, "recording saved but job was no longer recording"),
            Err(err) => error!(job_id = job.id, error = %err, "failed to mark job completed"),
        }
    }

    async fn fail(
        &self,
        job_id: i64,
        failure: RecorderFailure,
        output: Option<&Path>,
    ) -> StartOutcome {
        let reason = failure.to_string();
        match self.store.mark_error(job_id, &reason) {
            Ok(true) => warn!(job_id, %reason, "recording failed"),
            Ok(false) => debug!(job_id, %reason, "job already terminal; failure not recorded"),
            Err(err) => error!(job_id, %reason, error = %err, "failed to record job failure"),
        }
        if let Some(path) = output {
            remove_partial(job_id, path).await;
        }
        StartOutcome::Failed(failure)
    }
}

/// A stop we asked for at end time counts as clean: ffmpeg flushes its
/// trailer on SIGTERM and exits 255.
fn exit_is_clean(status: &ExitStatus, stop: Option<StopReason>) -> bool {
    if status.success() {
        return true;
    }
    if stop != Some(StopReason::Schedule) {
        return false;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if status.signal() == Some(libc::SIGTERM) {
            return true;
        }
    }
    status.code() == Some(255)
}

async fn forward_stderr(job_id: i64, stderr: ChildStderr) {
    let mut lines = BufReader::new(stderr).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => debug!(target: "dvr::transcoder", job_id, "{line}"),
            Ok(None) => break,
            Err(err) => {
                debug!(job_id, error = %err, "transcoder stderr closed");
                break;
            }
        }
    }
}

async fn discard(child: &mut Child, output: &Path) {
    if let Err(err) = child.kill().await {
        warn!(error = %err, "failed to kill discarded transcoder");
    }
    if let Err(err) = fs::remove_file(output).await {
        if err.kind() != io::ErrorKind::NotFound {
            warn!(path = %output.display(), error = %err, "failed to remove discarded output");
        }
    }
}

async fn remove_partial(job_id: i64, path: &Path) {
    match fs::remove_file(path).await {
        Ok(()) => debug!(job_id, path = %path.display(), "removed partial output"),
        Err(err) if err.kind() == io::ErrorKind::NotFound => {}
        Err(err) => warn!(job_id, path = %path.display(), error = %err, "failed to remove partial output"),
    }
}
