pub mod command;
pub mod engine;
pub mod error;
pub mod models;
pub mod recorder;
pub mod registry;
pub mod scheduler;
pub mod store;

pub use command::{build_command, output_file_name, TemplateError, TemplateValues, TranscoderCommand};
pub use engine::{DvrEngine, EngineStatus};
pub use error::{DvrError, DvrResult};
pub use models::{
    CompletedRecording, DvrJob, JobStatus, NewCompletedRecording, NewDvrJob, ScheduleRequest,
};
pub use recorder::{Recorder, RecorderFailure, StartOutcome, CANCELLED_BY_USER};
pub use registry::{ProcessRegistry, ProcessSignal, RegisteredProcess, SignalOutcome, StopReason};
pub use scheduler::{Disposition, ReconcileReport, Scheduler, INTERRUPTED_BY_RESTART, WINDOW_ELAPSED};
pub use store::{SqliteDvrStore, SqliteDvrStoreBuilder};
