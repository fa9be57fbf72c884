use std::fmt;
use std::path::Path;
use std::str::FromStr;

use chrono::{DateTime, Duration, NaiveDateTime, TimeZone, Utc};
use rusqlite::Row;
use serde::{Deserialize, Serialize};

use super::DvrError;
use crate::settings::BufferMinutes;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Scheduled,
    Recording,
    Completed,
    Error,
    Cancelled,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Scheduled => "scheduled",
            JobStatus::Recording => "recording",
            JobStatus::Completed => "completed",
            JobStatus::Error => "error",
            JobStatus::Cancelled => "cancelled",
        }
    }

    pub fn terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Error | JobStatus::Cancelled
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = DvrError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "scheduled" => Ok(JobStatus::Scheduled),
            "recording" => Ok(JobStatus::Recording),
            "completed" => Ok(JobStatus::Completed),
            "error" => Ok(JobStatus::Error),
            "cancelled" => Ok(JobStatus::Cancelled),
            other => Err(DvrError::InvalidStatus(other.to_string())),
        }
    }
}

/// A recording request as it arrives from the guide UI. `start`/`stop` are
/// the broadcast window; buffers are applied by [`ScheduleRequest::into_job`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleRequest {
    pub channel_id: String,
    pub channel_name: String,
    pub program_title: String,
    pub start: DateTime<Utc>,
    pub stop: DateTime<Utc>,
    #[serde(default)]
    pub profile_id: Option<String>,
    #[serde(default)]
    pub user_agent_id: Option<String>,
}

impl ScheduleRequest {
    pub fn into_job(self, user_id: i64, buffers: BufferMinutes) -> Result<NewDvrJob, DvrError> {
        if self.stop <= self.start {
            return Err(DvrError::InvalidWindow {
                start: self.start.to_rfc3339(),
                end: self.stop.to_rfc3339(),
            });
        }
        Ok(NewDvrJob {
            user_id,
            channel_id: self.channel_id,
            channel_name: self.channel_name,
            program_title: self.program_title,
            program_start: self.start,
            program_end: self.stop,
            start_time: self.start - Duration::minutes(i64::from(buffers.pre)),
            end_time: self.stop + Duration::minutes(i64::from(buffers.post)),
            profile_id: self.profile_id,
            user_agent_id: self.user_agent_id,
            pre_buffer_minutes: buffers.pre,
            post_buffer_minutes: buffers.post,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewDvrJob {
    pub user_id: i64,
    pub channel_id: String,
    pub channel_name: String,
    pub program_title: String,
    pub program_start: DateTime<Utc>,
    pub program_end: DateTime<Utc>,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub profile_id: Option<String>,
    pub user_agent_id: Option<String>,
    pub pre_buffer_minutes: u32,
    pub post_buffer_minutes: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DvrJob {
    pub id: i64,
    pub user_id: i64,
    pub channel_id: String,
    pub channel_name: String,
    pub program_title: String,
    pub program_start: DateTime<Utc>,
    pub program_end: DateTime<Utc>,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub profile_id: Option<String>,
    pub user_agent_id: Option<String>,
    pub pre_buffer_minutes: u32,
    pub post_buffer_minutes: u32,
    pub status: JobStatus,
    pub ffmpeg_pid: Option<u32>,
    pub file_path: Option<String>,
    pub error_reason: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl DvrJob {
    pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        let status: String = row.get("status")?;
        let status = status.parse().map_err(|err: DvrError| {
            rusqlite::Error::FromSqlConversionFailure(
                0,
                rusqlite::types::Type::Text,
                Box::new(err),
            )
        })?;
        Ok(Self {
            id: row.get("id")?,
            user_id: row.get("user_id")?,
            channel_id: row.get("channel_id")?,
            channel_name: row.get("channel_name")?,
            program_title: row.get("program_title")?,
            program_start: utc(row.get("program_start")?),
            program_end: utc(row.get("program_end")?),
            start_time: utc(row.get("start_time")?),
            end_time: utc(row.get("end_time")?),
            profile_id: row.get("profile_id")?,
            user_agent_id: row.get("user_agent_id")?,
            pre_buffer_minutes: row.get("pre_buffer_minutes")?,
            post_buffer_minutes: row.get("post_buffer_minutes")?,
            status,
            ffmpeg_pid: row.get("ffmpeg_pid")?,
            file_path: row.get("file_path")?,
            error_reason: row.get("error_reason")?,
            created_at: row
                .get::<_, Option<NaiveDateTime>>("created_at")?
                .map(utc),
            updated_at: row
                .get::<_, Option<NaiveDateTime>>("updated_at")?
                .map(utc),
        })
    }

    /// Length of the useful window. Wall-clock capture time runs longer
    /// because of process start-up and the stop signal latency.
    pub fn duration_seconds(&self) -> i64 {
        (self.end_time - self.start_time).num_seconds().max(0)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewCompletedRecording {
    pub user_id: i64,
    pub job_id: Option<i64>,
    pub channel_name: String,
    pub program_title: String,
    pub start_time: DateTime<Utc>,
    pub duration_seconds: i64,
    pub file_size_bytes: i64,
    pub file_path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CompletedRecording {
    pub id: i64,
    pub user_id: i64,
    pub job_id: Option<i64>,
    pub channel_name: String,
    pub program_title: String,
    pub start_time: DateTime<Utc>,
    pub duration_seconds: i64,
    pub file_size_bytes: i64,
    pub file_path: String,
    pub file_name: String,
    pub created_at: Option<DateTime<Utc>>,
}

impl CompletedRecording {
    pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        let file_path: String = row.get("file_path")?;
        Ok(Self {
            id: row.get("id")?,
            user_id: row.get("user_id")?,
            job_id: row.get("job_id")?,
            channel_name: row.get("channel_name")?,
            program_title: row.get("program_title")?,
            start_time: utc(row.get("start_time")?),
            duration_seconds: row.get("duration_seconds")?,
            file_size_bytes: row.get("file_size_bytes")?,
            file_name: file_name_of(&file_path),
            file_path,
            created_at: row
                .get::<_, Option<NaiveDateTime>>("created_at")?
                .map(utc),
        })
    }
}

pub fn file_name_of(path: &str) -> String {
    Path::new(path)
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_else(|| path.to_string())
}

fn utc(value: NaiveDateTime) -> DateTime<Utc> {
    Utc.from_utc_datetime(&value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schedule_request_applies_buffers() {
        let start = Utc.with_ymd_and_hms(2026, 3, 1, 20, 0, 0).unwrap();
        let request = ScheduleRequest {
            channel_id: "news-1".into(),
            channel_name: "News".into(),
            program_title: "Evening News".into(),
            start,
            stop: start + Duration::minutes(30),
            profile_id: None,
            user_agent_id: Some("vlc".into()),
        };
        let job = request
            .into_job(7, BufferMinutes { pre: 2, post: 5 })
            .unwrap();
        assert_eq!(job.start_time, start - Duration::minutes(2));
        assert_eq!(job.end_time, start + Duration::minutes(35));
        assert_eq!(job.program_start, start);
        assert_eq!(job.pre_buffer_minutes, 2);
        assert_eq!(job.post_buffer_minutes, 5);
        assert_eq!(job.user_id, 7);
    }

    #[test]
    fn schedule_request_rejects_inverted_window() {
        let start = Utc.with_ymd_and_hms(2026, 3, 1, 20, 0, 0).unwrap();
        let request = ScheduleRequest {
            channel_id: "news-1".into(),
            channel_name: "News".into(),
            program_title: "Evening News".into(),
            start,
            stop: start,
            profile_id: None,
            user_agent_id: None,
        };
        assert!(matches!(
            request.into_job(1, BufferMinutes::default()),
            Err(DvrError::InvalidWindow { .. })
        ));
    }

    #[test]
    fn status_round_trips_through_text() {
        for status in [
            JobStatus::Scheduled,
            JobStatus::Recording,
            JobStatus::Completed,
            JobStatus::Error,
            JobStatus::Cancelled,
        ] {
            assert_eq!(status.as_str().parse::<JobStatus>().unwrap(), status);
        }
        assert!("canceled".parse::<JobStatus>().is_err());
        assert!(!JobStatus::Recording.terminal());
        assert!(JobStatus::Cancelled.terminal());
    }

    #[test]
    fn file_name_is_last_component() {
        assert_eq!(file_name_of("/var/rec/12_News.ts"), "12_News.ts");
    }
}
