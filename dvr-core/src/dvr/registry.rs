use std::collections::HashMap;
use std::io;
use std::sync::Mutex;

use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessSignal {
    /// SIGTERM: ask the transcoder to flush and exit.
    Terminate,
    /// SIGKILL.
    Kill,
}

/// Why the engine asked a transcoder to stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The job's end time was reached.
    Schedule,
    /// The owner cancelled the job while it was recording.
    User,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalOutcome {
    Delivered,
    NotRegistered,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegisteredProcess {
    pub pid: u32,
    pub stop: Option<StopReason>,
}

/// Job id → OS pid of the supervising transcoder. Advisory only: the job
/// store's status and pid columns stay authoritative.
#[derive(Debug, Default)]
pub struct ProcessRegistry {
    processes: Mutex<HashMap<i64, RegisteredProcess>>,
}

impl ProcessRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, job_id: i64, pid: u32) {
        let previous = self
            .lock()
            .insert(job_id, RegisteredProcess { pid, stop: None });
        if let Some(previous) = previous {
            warn!(job_id, pid, previous = previous.pid, "replaced stale process registration");
        }
    }

    pub fn unregister(&self, job_id: i64) -> Option<RegisteredProcess> {
        self.lock().remove(&job_id)
    }

    pub fn pid(&self, job_id: i64) -> Option<u32> {
        self.lock().get(&job_id).map(|entry| entry.pid)
    }

    pub fn contains(&self, job_id: i64) -> bool {
        self.lock().contains_key(&job_id)
    }

    pub fn job_ids(&self) -> Vec<i64> {
        let mut ids: Vec<i64> = self.lock().keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Records the stop reason (the first one wins) and sends SIGTERM.
    pub fn stop(&self, job_id: i64, reason: StopReason) -> SignalOutcome {
        let pid = {
            let mut processes = self.lock();
            let Some(entry) = processes.get_mut(&job_id) else {
                debug!(job_id, ?reason, "no registered process to stop");
                return SignalOutcome::NotRegistered;
            };
            entry.stop.get_or_insert(reason);
            entry.pid
        };
        deliver(job_id, pid, ProcessSignal::Terminate)
    }

    pub fn signal(&self, job_id: i64, signal: ProcessSignal) -> SignalOutcome {
        let Some(pid) = self.pid(job_id) else {
            debug!(job_id, ?signal, "no registered process to signal");
            return SignalOutcome::NotRegistered;
        };
        deliver(job_id, pid, signal)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<i64, RegisteredProcess>> {
        self.processes.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn deliver(job_id: i64, pid: u32, signal: ProcessSignal) -> SignalOutcome {
    match send_signal(pid, signal) {
        Ok(()) => {
            debug!(job_id, pid, ?signal, "signal delivered");
            SignalOutcome::Delivered
        }
        Err(error) => {
            warn!(job_id, pid, ?signal, %error, "failed to signal transcoder");
            SignalOutcome::Failed
        }
    }
}

#[cfg(unix)]
fn send_signal(pid: u32, signal: ProcessSignal) -> io::Result<()> {
    let pid = libc::pid_t::try_from(pid)
        .ok()
        .filter(|pid| *pid > 0)
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "invalid pid"))?;
    let signal = match signal {
        ProcessSignal::Terminate => libc::SIGTERM,
        ProcessSignal::Kill => libc::SIGKILL,
    };
    // SAFETY: kill(2) has no memory-safety preconditions; pid is positive so
    // it never targets a process group.
    let result = unsafe { libc::kill(pid, signal) };
    if result == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

#[cfg(not(unix))]
fn send_signal(_pid: u32, _signal: ProcessSignal) -> io::Result<()> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "process signals require a unix host",
    ))
}
