use std::sync::RwLock;

use crate::config::{RecordingProfile, RecordingSection};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BufferMinutes {
    pub pre: u32,
    pub post: u32,
}

/// Read side of the recording settings. Every call observes the current
/// values; callers must not cache results across recordings.
pub trait SettingsProvider: Send + Sync {
    fn buffers(&self) -> BufferMinutes;

    /// `None` selects the active default profile.
    fn recording_profile(&self, id: Option<&str>) -> Option<RecordingProfile>;

    /// Returns `(id, value)`. `None` selects the active default user agent.
    fn user_agent(&self, id: Option<&str>) -> Option<(String, String)>;

    fn stop_grace_seconds(&self) -> Option<u64>;
}

#[derive(Debug)]
pub struct SharedSettings {
    section: RwLock<RecordingSection>,
}

impl SharedSettings {
    pub fn new(section: RecordingSection) -> Self {
        Self {
            section: RwLock::new(section),
        }
    }

    pub fn update(&self, section: RecordingSection) {
        *self.section.write().unwrap_or_else(|e| e.into_inner()) = section;
    }

    pub fn snapshot(&self) -> RecordingSection {
        self.section
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

impl SettingsProvider for SharedSettings {
    fn buffers(&self) -> BufferMinutes {
        let section = self.section.read().unwrap_or_else(|e| e.into_inner());
        BufferMinutes {
            pre: section.pre_buffer_minutes,
            post: section.post_buffer_minutes,
        }
    }

    fn recording_profile(&self, id: Option<&str>) -> Option<RecordingProfile> {
        let section = self.section.read().unwrap_or_else(|e| e.into_inner());
        let wanted = id.unwrap_or(section.default_profile.as_str());
        section
            .profiles
            .iter()
            .find(|profile| profile.id == wanted)
            .cloned()
    }

    fn user_agent(&self, id: Option<&str>) -> Option<(String, String)> {
        let section = self.section.read().unwrap_or_else(|e| e.into_inner());
        let wanted = id.or(section.default_user_agent.as_deref())?;
        section
            .user_agents
            .iter()
            .find(|agent| agent.id == wanted)
            .map(|agent| (agent.id.clone(), agent.value.clone()))
    }

    fn stop_grace_seconds(&self) -> Option<u64> {
        self.section
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .stop_grace_seconds
    }
}
