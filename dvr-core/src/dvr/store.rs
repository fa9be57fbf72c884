use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration as StdDuration;

use rusqlite::backup::Backup;
use rusqlite::{params, Connection, OpenFlags, OptionalExtension};

use super::models::{CompletedRecording, DvrJob, JobStatus, NewCompletedRecording, NewDvrJob};
use super::{DvrError, DvrResult};
use crate::sqlite::configure_connection;

const DVR_SCHEMA: &str = include_str!("../../../sql/dvr.sql");

#[derive(Debug, Clone)]
pub struct SqliteDvrStoreBuilder {
    path: Option<PathBuf>,
    read_only: bool,
    create_if_missing: bool,
}

impl Default for SqliteDvrStoreBuilder {
    fn default() -> Self {
        Self {
            path: None,
            read_only: false,
            create_if_missing: true,
        }
    }
}

impl SqliteDvrStoreBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn path(mut self, path: impl AsRef<Path>) -> Self {
        self.path = Some(path.as_ref().to_path_buf());
        self
    }

    pub fn read_only(mut self, value: bool) -> Self {
        self.read_only = value;
        self
    }

    pub fn create_if_missing(mut self, value: bool) -> Self {
        self.create_if_missing = value;
        self
    }

    pub fn build(self) -> DvrResult<SqliteDvrStore> {
        let path = self.path.ok_or(DvrError::MissingStore)?;
        let mut flags = if self.read_only {
            OpenFlags::SQLITE_OPEN_READ_ONLY
        } else {
            OpenFlags::SQLITE_OPEN_READ_WRITE
        };

        if !self.read_only && self.create_if_missing {
            flags |= OpenFlags::SQLITE_OPEN_CREATE;
        }

        Ok(SqliteDvrStore { path, flags })
    }
}

/// Durable DVR state: one row per job plus the completed-recording table.
///
/// Every status change is a single conditional `UPDATE` keyed by id and the
/// expected prior status. The returned `bool` tells the caller whether its
/// transition won; a `false` means another path (cancel, restart
/// reconciliation, a finished recording) moved the row first.
#[derive(Debug, Clone)]
pub struct SqliteDvrStore {
    path: PathBuf,
    flags: OpenFlags,
}

impl SqliteDvrStore {
    pub fn builder() -> SqliteDvrStoreBuilder {
        SqliteDvrStoreBuilder::new()
    }

    pub fn new(path: impl AsRef<Path>) -> DvrResult<Self> {
        SqliteDvrStoreBuilder::new().path(path).build()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn open(&self) -> DvrResult<Connection> {
        let conn = Connection::open_with_flags(&self.path, self.flags).map_err(|source| {
            DvrError::OpenDatabase {
                path: self.path.clone(),
                source,
            }
        })?;
        configure_connection(&conn).map_err(|source| DvrError::OpenDatabase {
            path: self.path.clone(),
            source,
        })?;
        Ok(conn)
    }

    pub fn initialize(&self) -> DvrResult<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = self.open()?;
        conn.execute_batch(DVR_SCHEMA)?;
        Ok(())
    }

    pub fn insert_job(&self, job: &NewDvrJob) -> DvrResult<DvrJob> {
        let conn = self.open()?;
        conn.execute(
            "INSERT INTO dvr_jobs (
                user_id, channel_id, channel_name, program_title, program_start, program_end,
                start_time, end_time, profile_id, user_agent_id, pre_buffer_minutes,
                post_buffer_minutes, status
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, 'scheduled')",
            params![
                job.user_id,
                &job.channel_id,
                &job.channel_name,
                &job.program_title,
                job.program_start.naive_utc(),
                job.program_end.naive_utc(),
                job.start_time.naive_utc(),
                job.end_time.naive_utc(),
                &job.profile_id,
                &job.user_agent_id,
                job.pre_buffer_minutes,
                job.post_buffer_minutes,
            ],
        )?;
        let id = conn.last_insert_rowid();
        let job = conn.query_row("SELECT * FROM dvr_jobs WHERE id = ?1", [id], |row| {
            DvrJob::from_row(row)
        })?;
        Ok(job)
    }

    pub fn fetch_job(&self, job_id: i64) -> DvrResult<Option<DvrJob>> {
        let conn = self.open()?;
        let job = conn
            .query_row("SELECT * FROM dvr_jobs WHERE id = ?1", [job_id], |row| {
                DvrJob::from_row(row)
            })
            .optional()?;
        Ok(job)
    }

    pub fn fetch_job_for_user(&self, user_id: i64, job_id: i64) -> DvrResult<Option<DvrJob>> {
        let conn = self.open()?;
        let job = conn
            .query_row(
                "SELECT * FROM dvr_jobs WHERE id = ?1 AND user_id = ?2",
                params![job_id, user_id],
                |row| DvrJob::from_row(row),
            )
            .optional()?;
        Ok(job)
    }

    pub fn list_jobs_for_user(&self, user_id: i64) -> DvrResult<Vec<DvrJob>> {
        let conn = self.open()?;
        let mut stmt = conn.prepare(
            "SELECT * FROM dvr_jobs WHERE user_id = ?1 ORDER BY start_time DESC, id DESC",
        )?;
        let rows = stmt
            .query_map([user_id], |row| DvrJob::from_row(row))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn list_jobs_by_status(&self, status: JobStatus) -> DvrResult<Vec<DvrJob>> {
        let conn = self.open()?;
        let mut stmt =
            conn.prepare("SELECT * FROM dvr_jobs WHERE status = ?1 ORDER BY start_time ASC")?;
        let rows = stmt
            .query_map([status.as_str()], |row| DvrJob::from_row(row))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// All owners, newest first. Used by operator tooling.
    pub fn list_jobs(&self, status: Option<JobStatus>, limit: usize) -> DvrResult<Vec<DvrJob>> {
        let conn = self.open()?;
        let mut stmt = conn.prepare(
            "SELECT * FROM dvr_jobs \
             WHERE (?1 IS NULL OR status = ?1) \
             ORDER BY start_time DESC, id DESC \
             LIMIT ?2",
        )?;
        let rows = stmt
            .query_map(
                params![status.map(|status| status.as_str()), limit as i64],
                |row| DvrJob::from_row(row),
            )?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn count_by_status(&self) -> DvrResult<HashMap<String, usize>> {
        let conn = self.open()?;
        let mut stmt = conn.prepare("SELECT status, COUNT(*) FROM dvr_jobs GROUP BY status")?;
        let mut map = HashMap::new();
        for row in stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })? {
            let (status, count) = row?;
            map.insert(status, count as usize);
        }
        Ok(map)
    }

    pub fn begin_recording(&self, job_id: i64, pid: u32, file_path: &str) -> DvrResult<bool> {
        let conn = self.open()?;
        let affected = conn.execute(
            "UPDATE dvr_jobs
             SET status = 'recording', ffmpeg_pid = ?2, file_path = ?3, error_reason = NULL,
                 updated_at = CURRENT_TIMESTAMP
             WHERE id = ?1 AND status = 'scheduled'",
            params![job_id, pid, file_path],
        )?;
        Ok(affected == 1)
    }

    pub fn mark_error(&self, job_id: i64, reason: &str) -> DvrResult<bool> {
        let conn = self.open()?;
        let affected = conn.execute(
            "UPDATE dvr_jobs
             SET status = 'error', ffmpeg_pid = NULL, error_reason = ?2,
                 updated_at = CURRENT_TIMESTAMP
             WHERE id = ?1 AND status IN ('scheduled', 'recording')",
            params![job_id, reason],
        )?;
        Ok(affected == 1)
    }

    pub fn complete_recording(&self, job_id: i64) -> DvrResult<bool> {
        let conn = self.open()?;
        let affected = conn.execute(
            "UPDATE dvr_jobs
             SET status = 'completed', ffmpeg_pid = NULL, error_reason = NULL,
                 updated_at = CURRENT_TIMESTAMP
             WHERE id = ?1 AND status = 'recording'",
            [job_id],
        )?;
        Ok(affected == 1)
    }

    pub fn cancel_scheduled(&self, job_id: i64) -> DvrResult<bool> {
        let conn = self.open()?;
        let affected = conn.execute(
            "UPDATE dvr_jobs
             SET status = 'cancelled', updated_at = CURRENT_TIMESTAMP
             WHERE id = ?1 AND status = 'scheduled'",
            [job_id],
        )?;
        Ok(affected == 1)
    }

    /// Records why a still-running job is going down without changing its
    /// status; the exit handler owns the final transition.
    pub fn note_reason(&self, job_id: i64, reason: &str) -> DvrResult<()> {
        let conn = self.open()?;
        conn.execute(
            "UPDATE dvr_jobs SET error_reason = ?2, updated_at = CURRENT_TIMESTAMP
             WHERE id = ?1 AND status = 'recording'",
            params![job_id, reason],
        )?;
        Ok(())
    }

    /// Flips every `recording` row to `error`. Returns the affected ids with
    /// the output path each one was writing.
    pub fn fail_interrupted(&self, reason: &str) -> DvrResult<Vec<(i64, Option<String>)>> {
        let mut conn = self.open()?;
        let tx = conn.transaction()?;
        let interrupted = {
            let mut stmt = tx.prepare(
                "SELECT id, file_path FROM dvr_jobs WHERE status = 'recording' ORDER BY id",
            )?;
            let rows = stmt
                .query_map([], |row| Ok((row.get::<_, i64>(0)?, row.get::<_, Option<String>>(1)?)))?
                .collect::<Result<Vec<_>, _>>()?;
            rows
        };
        tx.execute(
            "UPDATE dvr_jobs
             SET status = 'error', ffmpeg_pid = NULL, error_reason = ?1,
                 updated_at = CURRENT_TIMESTAMP
             WHERE status = 'recording'",
            [reason],
        )?;
        tx.commit()?;
        Ok(interrupted)
    }

    pub fn insert_recording(&self, recording: &NewCompletedRecording) -> DvrResult<CompletedRecording> {
        let conn = self.open()?;
        conn.execute(
            "INSERT INTO dvr_recordings (
                user_id, job_id, channel_name, program_title, start_time, duration_seconds,
                file_size_bytes, file_path
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                recording.user_id,
                recording.job_id,
                &recording.channel_name,
                &recording.program_title,
                recording.start_time.naive_utc(),
                recording.duration_seconds,
                recording.file_size_bytes,
                &recording.file_path,
            ],
        )?;
        let id = conn.last_insert_rowid();
        let recording = conn.query_row(
            "SELECT * FROM dvr_recordings WHERE id = ?1",
            [id],
            |row| CompletedRecording::from_row(row),
        )?;
        Ok(recording)
    }

    pub fn list_recordings_for_user(&self, user_id: i64) -> DvrResult<Vec<CompletedRecording>> {
        let conn = self.open()?;
        let mut stmt = conn.prepare(
            "SELECT * FROM dvr_recordings WHERE user_id = ?1 ORDER BY start_time DESC, id DESC",
        )?;
        let rows = stmt
            .query_map([user_id], |row| CompletedRecording::from_row(row))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn list_recordings(&self, limit: usize) -> DvrResult<Vec<CompletedRecording>> {
        let conn = self.open()?;
        let mut stmt = conn.prepare(
            "SELECT * FROM dvr_recordings ORDER BY start_time DESC, id DESC LIMIT ?1",
        )?;
        let rows = stmt
            .query_map([limit as i64], |row| CompletedRecording::from_row(row))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn count_recordings(&self) -> DvrResult<usize> {
        let conn = self.open()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM dvr_recordings", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    pub fn fetch_recording_for_user(
        &self,
        user_id: i64,
        recording_id: i64,
    ) -> DvrResult<Option<CompletedRecording>> {
        let conn = self.open()?;
        let recording = conn
            .query_row(
                "SELECT * FROM dvr_recordings WHERE id = ?1 AND user_id = ?2",
                params![recording_id, user_id],
                |row| CompletedRecording::from_row(row),
            )
            .optional()?;
        Ok(recording)
    }

    pub fn delete_recording(&self, recording_id: i64) -> DvrResult<bool> {
        let conn = self.open()?;
        let affected = conn.execute("DELETE FROM dvr_recordings WHERE id = ?1", [recording_id])?;
        Ok(affected == 1)
    }

    pub fn backup_to(&self, destination: impl AsRef<Path>) -> DvrResult<()> {
        let destination_path = destination.as_ref();
        let source = self.open()?;
        let mut dest = Connection::open(destination_path)?;
        let backup = Backup::new(&source, &mut dest)?;
        backup.run_to_completion(10, StdDuration::from_millis(50), None)?;
        Ok(())
    }
}
