use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Args, Parser, Subcommand, ValueEnum};
use dvr_core::dvr::command::tokenize;
use dvr_core::{
    load_dvr_config, ChannelDirectory, CompletedRecording, ConfigError, DvrConfig, DvrEngine,
    DvrError, DvrJob, JobStatus, SettingsProvider, SharedSettings, SqliteDvrStore,
};
use rusqlite::{Connection, OpenFlags};
use serde::Serialize;
use thiserror::Error;
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

pub mod api;
mod signal;

pub type Result<T> = std::result::Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
    #[error("dvr error: {0}")]
    Dvr(#[from] DvrError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("required resource missing: {0}")]
    MissingResource(String),
    #[error("{0} health check(s) failed")]
    HealthCheck(usize),
}

#[derive(Parser, Debug)]
#[command(author, version, about = "DVR recording engine server and control interface", long_about = None)]
pub struct Cli {
    /// Path to dvr.toml
    #[arg(long, default_value = "configs/dvr.toml")]
    pub config: PathBuf,
    /// Alternative path to the jobs database (defaults to <data_dir>/dvr.sqlite)
    #[arg(long)]
    pub db: Option<PathBuf>,
    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Runs the recording engine and its HTTP API
    Serve(ServeArgs),
    /// Lists DVR jobs across all users
    Jobs(JobsArgs),
    /// Lists completed recordings across all users
    Recordings(RecordingsArgs),
    /// Shows job counts and configuration summary
    Status,
    /// Runs configuration and storage checks
    Health,
}

#[derive(Args, Debug)]
pub struct ServeArgs {
    /// Overrides http.listen
    #[arg(long)]
    pub listen: Option<SocketAddr>,
}

#[derive(Args, Debug)]
pub struct JobsArgs {
    /// Filter by status (scheduled, recording, completed, error, cancelled)
    #[arg(long)]
    pub status: Option<String>,
    #[arg(long, default_value_t = 20)]
    pub limit: usize,
}

#[derive(Args, Debug)]
pub struct RecordingsArgs {
    #[arg(long, default_value_t = 20)]
    pub limit: usize,
}

pub async fn run(cli: Cli) -> Result<()> {
    let context = AppContext::new(&cli)?;

    match &cli.command {
        Commands::Serve(args) => context.serve(args).await?,
        Commands::Jobs(args) => {
            let jobs = context.jobs(args)?;
            render(&jobs, cli.format)?;
        }
        Commands::Recordings(args) => {
            let recordings = context.recordings(args)?;
            render(&recordings, cli.format)?;
        }
        Commands::Status => {
            let status = context.gather_status()?;
            render(&status, cli.format)?;
        }
        Commands::Health => {
            let report = context.health_check();
            render(&report, cli.format)?;
            let failed = report
                .iter()
                .filter(|entry| matches!(entry.status, CheckStatus::Error))
                .count();
            if failed > 0 {
                return Err(AppError::HealthCheck(failed));
            }
        }
    }

    Ok(())
}

/// `RUST_LOG` wins over the configured level.
pub fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .compact()
        .with_target(true)
        .try_init();
}

fn render<T>(value: &T, format: OutputFormat) -> Result<()>
where
    T: Serialize + DisplayFallback,
{
    match format {
        OutputFormat::Text => {
            println!("{}", value.display());
            Ok(())
        }
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(value)?;
            println!("{}", json);
            Ok(())
        }
    }
}

trait DisplayFallback {
    fn display(&self) -> String;
}

#[derive(Debug)]
struct AppContext {
    config: DvrConfig,
    config_path: PathBuf,
    db_path: PathBuf,
}

impl AppContext {
    fn new(cli: &Cli) -> Result<Self> {
        let config_path = cli.config.clone();
        let config = load_dvr_config(&config_path)?;
        let db_path = cli.db.clone().unwrap_or_else(|| config.jobs_db());
        Ok(Self {
            config,
            config_path,
            db_path,
        })
    }

    async fn serve(&self, args: &ServeArgs) -> Result<()> {
        init_logging(&self.config.log.level);

        let store = SqliteDvrStore::builder()
            .path(&self.db_path)
            .create_if_missing(true)
            .build()?;
        store.initialize()?;

        let channels = Arc::new(match self.config.channels_file() {
            Some(path) if path.exists() => ChannelDirectory::from_file(&path)?,
            Some(path) => {
                warn!(path = %path.display(), "channels file missing; every recording will fail until it is loaded");
                ChannelDirectory::default()
            }
            None => ChannelDirectory::default(),
        });
        let settings = Arc::new(SharedSettings::new(self.config.recording.clone()));
        let engine = Arc::new(DvrEngine::new(
            store,
            channels.clone(),
            settings.clone(),
            self.config.recordings_dir(),
        ));

        let report = engine.reconcile_on_startup()?;
        info!(
            interrupted = ?report.interrupted,
            rearmed = report.rearmed.len(),
            expired = ?report.expired,
            "startup reconciliation complete"
        );

        #[cfg(unix)]
        self.spawn_reload(channels, settings)?;

        let listen = args.listen.unwrap_or(self.config.http.listen);
        let listener = TcpListener::bind(listen).await?;
        api::server_up(
            engine,
            self.config.http.tokens.clone(),
            listener,
            shutdown_signal(),
        )
        .await;
        Ok(())
    }

    /// Re-reads the config file and channel list on SIGHUP. Only the
    /// `[recording]` section and channels take effect without a restart.
    #[cfg(unix)]
    fn spawn_reload(
        &self,
        channels: Arc<ChannelDirectory>,
        settings: Arc<SharedSettings>,
    ) -> Result<()> {
        let mut hangup = signal::hangup()?;
        let config_path = self.config_path.clone();
        tokio::spawn(async move {
            while hangup.recv().await.is_some() {
                let config = match load_dvr_config(&config_path) {
                    Ok(config) => config,
                    Err(err) => {
                        warn!(error = %err, "config reload failed; keeping current settings");
                        continue;
                    }
                };
                settings.update(config.recording.clone());
                if let Some(path) = config.channels_file() {
                    if let Err(err) = channels.reload(&path) {
                        warn!(error = %err, "channel reload failed; keeping current channels");
                    }
                }
                info!(path = %config_path.display(), "configuration reloaded");
            }
        });
        Ok(())
    }

    fn store(&self) -> Result<SqliteDvrStore> {
        if !self.db_path.exists() {
            return Err(AppError::MissingResource(format!(
                "database missing: {}",
                self.db_path.display()
            )));
        }
        Ok(SqliteDvrStore::builder()
            .path(&self.db_path)
            .create_if_missing(false)
            .build()?)
    }

    fn jobs(&self, args: &JobsArgs) -> Result<JobList> {
        let status = args
            .status
            .as_deref()
            .map(str::parse::<JobStatus>)
            .transpose()?;
        let rows = self.store()?.list_jobs(status, args.limit)?;
        Ok(JobList { rows })
    }

    fn recordings(&self, args: &RecordingsArgs) -> Result<RecordingList> {
        let rows = self.store()?.list_recordings(args.limit)?;
        Ok(RecordingList { rows })
    }

    fn gather_status(&self) -> Result<StatusReport> {
        let store = self.store()?;
        Ok(StatusReport {
            database: self.db_path.display().to_string(),
            recordings_dir: self.config.recordings_dir().display().to_string(),
            listen: self.config.http.listen.to_string(),
            jobs_by_status: store.count_by_status()?.into_iter().collect(),
            recordings: store.count_recordings()?,
            profiles: self
                .config
                .recording
                .profiles
                .iter()
                .map(|profile| profile.id.clone())
                .collect(),
        })
    }

    fn health_check(&self) -> Vec<HealthEntry> {
        let mut results = vec![
            self.check_path("dvr.toml", &self.config_path),
            self.check_database("dvr.sqlite", &self.db_path),
            self.check_channels(),
            self.check_directory("recordings", &self.config.recordings_dir()),
        ];
        results.extend(self.check_profiles());
        results.push(self.check_user_agent());
        if self.config.http.tokens.is_empty() {
            results.push(HealthEntry::warn(
                "http.tokens",
                "no tokens configured; the API rejects every request".to_string(),
            ));
        } else {
            results.push(HealthEntry::ok(
                "http.tokens",
                format!("{} token(s)", self.config.http.tokens.len()),
            ));
        }
        results
    }

    fn check_path(&self, name: &str, path: &Path) -> HealthEntry {
        if path.exists() {
            HealthEntry::ok(name, format!("{}", path.display()))
        } else {
            HealthEntry::error(name, format!("{path} missing", path = path.display()))
        }
    }

    fn check_directory(&self, name: &str, path: &Path) -> HealthEntry {
        match fs::metadata(path) {
            Ok(meta) if meta.is_dir() => HealthEntry::ok(name, format!("{}", path.display())),
            Ok(_) => HealthEntry::error(
                name,
                format!("{path} is not a directory", path = path.display()),
            ),
            Err(_) => HealthEntry::warn(
                name,
                format!("{path} not found (created on first recording)", path = path.display()),
            ),
        }
    }

    fn check_database(&self, name: &str, path: &Path) -> HealthEntry {
        if !path.exists() {
            return HealthEntry::warn(
                name,
                format!("{path} not found (created by serve)", path = path.display()),
            );
        }
        match Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_ONLY) {
            Ok(conn) => {
                let pragma: rusqlite::Result<String> =
                    conn.query_row("PRAGMA integrity_check;", [], |row| row.get(0));
                match pragma {
                    Ok(result) if result.eq_ignore_ascii_case("ok") => {
                        HealthEntry::ok(name, "integrity ok".to_string())
                    }
                    Ok(result) => HealthEntry::warn(name, format!("integrity_check: {result}")),
                    Err(err) => HealthEntry::warn(name, format!("error: {err}")),
                }
            }
            Err(err) => HealthEntry::error(name, format!("failed to open: {err}")),
        }
    }

    fn check_channels(&self) -> HealthEntry {
        let Some(path) = self.config.channels_file() else {
            return HealthEntry::warn("channels", "paths.channels_file not set".to_string());
        };
        match ChannelDirectory::from_file(&path) {
            Ok(directory) if directory.is_empty() => {
                HealthEntry::warn("channels", format!("{} lists no channels", path.display()))
            }
            Ok(directory) => HealthEntry::ok(
                "channels",
                format!("{} channel(s) in {}", directory.len(), path.display()),
            ),
            Err(err) => HealthEntry::error("channels", err.to_string()),
        }
    }

    fn check_profiles(&self) -> Vec<HealthEntry> {
        let settings = SharedSettings::new(self.config.recording.clone());
        let mut results = Vec::new();
        if settings.recording_profile(None).is_none() {
            results.push(HealthEntry::error(
                "recording.default_profile",
                format!("{} is not a configured profile", self.config.recording.default_profile),
            ));
        }
        for profile in &self.config.recording.profiles {
            let name = format!("profile {}", profile.id);
            match tokenize(&profile.command) {
                Ok(tokens) if tokens.is_empty() => {
                    results.push(HealthEntry::error(&name, "empty command".to_string()))
                }
                Ok(tokens) => results.push(HealthEntry::ok(
                    &name,
                    format!("{} (.{})", tokens[0], profile.extension),
                )),
                Err(err) => results.push(HealthEntry::error(&name, err.to_string())),
            }
        }
        results
    }

    fn check_user_agent(&self) -> HealthEntry {
        let settings = SharedSettings::new(self.config.recording.clone());
        match settings.user_agent(None) {
            Some((id, _)) => HealthEntry::ok("recording.default_user_agent", id),
            None => HealthEntry::warn(
                "recording.default_user_agent",
                "unset or unknown; jobs without a user agent will fail".to_string(),
            ),
        }
    }
}

async fn shutdown_signal() {
    match signal::wait_for_stop_signal().await {
        Ok(name) => warn!("received {name}; shutting down"),
        Err(err) => {
            error!(error = %err, "failed to install signal handlers");
            std::future::pending::<()>().await;
        }
    }
}

#[derive(Debug, Serialize)]
pub struct JobList {
    pub rows: Vec<DvrJob>,
}

impl DisplayFallback for JobList {
    fn display(&self) -> String {
        if self.rows.is_empty() {
            return "No jobs found".to_string();
        }
        let mut lines = Vec::new();
        for job in &self.rows {
            let mut line = format!(
                "#{id} [{status}] user={user} {channel} | {title} | {start} -> {end}",
                id = job.id,
                status = job.status,
                user = job.user_id,
                channel = job.channel_name,
                title = job.program_title,
                start = job.start_time.format("%Y-%m-%d %H:%M"),
                end = job.end_time.format("%H:%M"),
            );
            if let Some(reason) = &job.error_reason {
                line.push_str(&format!(" ({reason})"));
            }
            lines.push(line);
        }
        lines.join("\n")
    }
}

#[derive(Debug, Serialize)]
pub struct RecordingList {
    pub rows: Vec<CompletedRecording>,
}

impl DisplayFallback for RecordingList {
    fn display(&self) -> String {
        if self.rows.is_empty() {
            return "No recordings found".to_string();
        }
        self.rows
            .iter()
            .map(|recording| {
                format!(
                    "#{id} user={user} {file} | {title} | {minutes} min | {mib:.1} MiB",
                    id = recording.id,
                    user = recording.user_id,
                    file = recording.file_name,
                    title = recording.program_title,
                    minutes = recording.duration_seconds / 60,
                    mib = recording.file_size_bytes as f64 / (1024.0 * 1024.0),
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[derive(Debug, Serialize)]
pub struct StatusReport {
    pub database: String,
    pub recordings_dir: String,
    pub listen: String,
    pub jobs_by_status: BTreeMap<String, usize>,
    pub recordings: usize,
    pub profiles: Vec<String>,
}

impl DisplayFallback for StatusReport {
    fn display(&self) -> String {
        let mut lines = vec![
            format!("Database: {}", self.database),
            format!("Recordings dir: {}", self.recordings_dir),
            format!("Listen: {}", self.listen),
        ];
        if self.jobs_by_status.is_empty() {
            lines.push("Jobs: none".to_string());
        } else {
            lines.push("Jobs:".to_string());
            for (status, count) in &self.jobs_by_status {
                lines.push(format!("  - {status}: {count}"));
            }
        }
        lines.push(format!("Recordings: {}", self.recordings));
        lines.push(format!("Profiles: {}", self.profiles.join(", ")));
        lines.join("\n")
    }
}

#[derive(Debug, Serialize)]
pub struct HealthEntry {
    pub name: String,
    pub status: CheckStatus,
    pub detail: String,
}

impl HealthEntry {
    fn ok(name: &str, detail: String) -> Self {
        Self {
            name: name.to_string(),
            status: CheckStatus::Ok,
            detail,
        }
    }

    fn warn(name: &str, detail: String) -> Self {
        Self {
            name: name.to_string(),
            status: CheckStatus::Warn,
            detail,
        }
    }

    fn error(name: &str, detail: String) -> Self {
        Self {
            name: name.to_string(),
            status: CheckStatus::Error,
            detail,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CheckStatus {
    Ok,
    Warn,
    Error,
}

impl fmt::Display for CheckStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CheckStatus::Ok => write!(f, "OK"),
            CheckStatus::Warn => write!(f, "WARN"),
            CheckStatus::Error => write!(f, "ERROR"),
        }
    }
}

impl DisplayFallback for Vec<HealthEntry> {
    fn display(&self) -> String {
        self.iter()
            .map(|entry| {
                format!(
                    "[{status}] {name}: {detail}",
                    status = entry.status,
                    name = entry.name,
                    detail = entry.detail
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use dvr_core::dvr::NewCompletedRecording;
    use dvr_core::ScheduleRequest;
    use dvr_core::settings::BufferMinutes;
    use tempfile::TempDir;

    fn prepare_test_context() -> (TempDir, AppContext) {
        let temp = TempDir::new().unwrap();
        let root = temp.path();
        let config_path = root.join("dvr.toml");
        let template = fs::read_to_string("../configs/dvr.toml").unwrap();
        let config = template.replace(
            "base_dir = \"/var/lib/dvr\"",
            &format!("base_dir = {:?}", root.display().to_string()),
        );
        fs::write(&config_path, config).unwrap();
        fs::copy("../configs/channels.json", root.join("channels.json")).unwrap();

        let cli = Cli {
            config: config_path,
            db: None,
            format: OutputFormat::Json,
            command: Commands::Status,
        };
        let context = AppContext::new(&cli).unwrap();

        let store = SqliteDvrStore::new(&context.db_path).unwrap();
        store.initialize().unwrap();
        let now = Utc::now();
        for (title, hours) in [("Morning", 1), ("Evening", 10)] {
            let request = ScheduleRequest {
                channel_id: "news-1".into(),
                channel_name: "News One".into(),
                program_title: title.into(),
                start: now + Duration::hours(hours),
                stop: now + Duration::hours(hours + 1),
                profile_id: None,
                user_agent_id: None,
            };
            let job = request.into_job(1, BufferMinutes { pre: 2, post: 5 }).unwrap();
            store.insert_job(&job).unwrap();
        }
        store
            .insert_recording(&NewCompletedRecording {
                user_id: 1,
                job_id: None,
                channel_name: "News One".into(),
                program_title: "Yesterday".into(),
                start_time: now - Duration::days(1),
                duration_seconds: 3600,
                file_size_bytes: 2 * 1024 * 1024,
                file_path: root.join("recordings/9_Yesterday.ts").display().to_string(),
            })
            .unwrap();
        (temp, context)
    }

    #[test]
    fn test_jobs_listing_filters_by_status() {
        let (_temp, context) = prepare_test_context();
        let all = context
            .jobs(&JobsArgs {
                status: None,
                limit: 10,
            })
            .unwrap();
        assert_eq!(all.rows.len(), 2);
        assert_eq!(all.rows[0].program_title, "Evening");
        assert!(all.display().contains("[scheduled]"));

        let none = context
            .jobs(&JobsArgs {
                status: Some("completed".into()),
                limit: 10,
            })
            .unwrap();
        assert!(none.rows.is_empty());
        assert_eq!(none.display(), "No jobs found");

        let invalid = context.jobs(&JobsArgs {
            status: Some("finished".into()),
            limit: 10,
        });
        assert!(matches!(
            invalid,
            Err(AppError::Dvr(DvrError::InvalidStatus(_)))
        ));
    }

    #[test]
    fn test_status_report_counts() {
        let (_temp, context) = prepare_test_context();
        let report = context.gather_status().unwrap();
        assert_eq!(report.jobs_by_status.get("scheduled"), Some(&2));
        assert_eq!(report.recordings, 1);
        assert_eq!(report.profiles, vec!["copy", "h264"]);
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["recordings"], 1);
        assert!(report.display().contains("  - scheduled: 2"));
    }

    #[test]
    fn test_recordings_listing() {
        let (_temp, context) = prepare_test_context();
        let list = context.recordings(&RecordingsArgs { limit: 5 }).unwrap();
        assert_eq!(list.rows.len(), 1);
        assert!(list.display().contains("9_Yesterday.ts"));
        assert!(list.display().contains("60 min"));
    }

    #[test]
    fn test_health_check_reports_missing_channels() {
        let (temp, context) = prepare_test_context();
        let report = context.health_check();
        assert!(report
            .iter()
            .all(|entry| !matches!(entry.status, CheckStatus::Error)));
        let database = report.iter().find(|entry| entry.name == "dvr.sqlite").unwrap();
        assert_eq!(database.status, CheckStatus::Ok);

        fs::remove_file(temp.path().join("channels.json")).unwrap();
        let report = context.health_check();
        let channels = report.iter().find(|entry| entry.name == "channels").unwrap();
        assert_eq!(channels.status, CheckStatus::Error);
    }

    #[test]
    fn test_missing_database_is_reported() {
        let (temp, mut context) = prepare_test_context();
        context.db_path = temp.path().join("absent.sqlite");
        assert!(matches!(
            context.gather_status(),
            Err(AppError::MissingResource(_))
        ));
    }
}
