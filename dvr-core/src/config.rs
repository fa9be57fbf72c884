use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, Result};

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct DvrConfig {
    pub paths: PathsSection,
    pub recording: RecordingSection,
    pub http: HttpSection,
    #[serde(default)]
    pub log: LogSection,
}

impl DvrConfig {
    pub fn resolve_path<P: AsRef<Path>>(&self, candidate: P) -> PathBuf {
        let path = candidate.as_ref();
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            Path::new(&self.paths.base_dir).join(path)
        }
    }

    pub fn data_dir(&self) -> PathBuf {
        self.resolve_path(&self.paths.data_dir)
    }

    pub fn recordings_dir(&self) -> PathBuf {
        self.resolve_path(&self.paths.recordings_dir)
    }

    pub fn jobs_db(&self) -> PathBuf {
        self.data_dir().join("dvr.sqlite")
    }

    pub fn channels_file(&self) -> Option<PathBuf> {
        self.paths
            .channels_file
            .as_ref()
            .map(|path| self.resolve_path(path))
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PathsSection {
    pub base_dir: String,
    pub data_dir: String,
    pub recordings_dir: String,
    #[serde(default)]
    pub channels_file: Option<String>,
}

/// Recording defaults, transcoder profiles and user agents. This is the
/// part of the configuration that may change while the engine runs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RecordingSection {
    #[serde(default)]
    pub pre_buffer_minutes: u32,
    #[serde(default)]
    pub post_buffer_minutes: u32,
    pub default_profile: String,
    #[serde(default)]
    pub default_user_agent: Option<String>,
    /// Seconds to wait after a graceful stop before sending SIGKILL.
    /// Unset keeps stops graceful-only.
    #[serde(default)]
    pub stop_grace_seconds: Option<u64>,
    #[serde(default)]
    pub profiles: Vec<RecordingProfile>,
    #[serde(default)]
    pub user_agents: Vec<UserAgentEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RecordingProfile {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    pub command: String,
    #[serde(default = "default_extension")]
    pub extension: String,
}

fn default_extension() -> String {
    "mp4".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UserAgentEntry {
    pub id: String,
    pub value: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HttpSection {
    pub listen: SocketAddr,
    #[serde(default)]
    pub tokens: Vec<AccessToken>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AccessToken {
    pub token: String,
    pub user_id: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LogSection {
    pub level: String,
}

impl Default for LogSection {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

pub fn load_dvr_config<P: AsRef<Path>>(path: P) -> Result<DvrConfig> {
    load_toml(path)
}

fn load_toml<T, P>(path: P) -> Result<T>
where
    T: DeserializeOwned,
    P: AsRef<Path>,
{
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        source,
        path: path.to_path_buf(),
    })?;
    toml::from_str(&content).map_err(|source| ConfigError::Parse {
        source,
        path: path.to_path_buf(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_fixture_config() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("../configs/dvr.toml");
        let config = load_dvr_config(path).expect("config should parse");
        assert_eq!(config.recording.default_profile, "copy");
        assert_eq!(config.recording.pre_buffer_minutes, 2);
        assert_eq!(config.recording.post_buffer_minutes, 5);
        assert!(config.recording.profiles.len() >= 2);
        assert_eq!(config.recording.profiles[0].extension, "ts");
        assert_eq!(config.http.tokens[0].user_id, 1);
        assert_eq!(
            config.recordings_dir(),
            PathBuf::from("/var/lib/dvr/recordings")
        );
        assert_eq!(
            config.channels_file(),
            Some(PathBuf::from("/var/lib/dvr/channels.json"))
        );
    }

    #[test]
    fn profile_extension_defaults_to_mp4() {
        let section: RecordingSection = toml::from_str(
            r#"
            default_profile = "p"
            [[profiles]]
            id = "p"
            command = "ffmpeg -i {input} {output}"
            "#,
        )
        .unwrap();
        assert_eq!(section.profiles[0].extension, "mp4");
        assert_eq!(section.pre_buffer_minutes, 0);
        assert!(section.stop_grace_seconds.is_none());
    }
}
