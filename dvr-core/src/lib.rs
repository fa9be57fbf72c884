pub mod config;
pub mod dvr;
pub mod error;
pub mod guide;
pub mod settings;
pub mod sqlite;

pub use config::{
    load_dvr_config, AccessToken, DvrConfig, HttpSection, LogSection, PathsSection,
    RecordingProfile, RecordingSection, UserAgentEntry,
};
pub use dvr::{
    CompletedRecording, DvrEngine, DvrError, DvrJob, DvrResult, EngineStatus, JobStatus,
    ProcessRegistry, ReconcileReport, Recorder, Scheduler, ScheduleRequest, SqliteDvrStore,
    SqliteDvrStoreBuilder,
};
pub use error::{ConfigError, Result};
pub use guide::{ChannelDirectory, ChannelLookup, ChannelSource};
pub use settings::{BufferMinutes, SettingsProvider, SharedSettings};
