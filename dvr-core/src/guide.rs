use std::collections::HashMap;
use std::path::Path;
use std::sync::RwLock;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{ConfigError, Result};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChannelSource {
    pub id: String,
    pub url: String,
}

/// Resolves a channel id to its current playable stream.
#[async_trait]
pub trait ChannelLookup: Send + Sync {
    async fn resolve(&self, channel_id: &str) -> Option<ChannelSource>;
}

/// Channel table fed by the guide merge. Contents are swapped wholesale on
/// every guide refresh.
#[derive(Debug, Default)]
pub struct ChannelDirectory {
    channels: RwLock<HashMap<String, ChannelSource>>,
}

impl ChannelDirectory {
    pub fn new(channels: impl IntoIterator<Item = ChannelSource>) -> Self {
        let directory = Self::default();
        directory.replace(channels);
        directory
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let directory = Self::default();
        directory.reload(path)?;
        Ok(directory)
    }

    pub fn reload(&self, path: impl AsRef<Path>) -> Result<usize> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            source,
            path: path.to_path_buf(),
        })?;
        let channels: Vec<ChannelSource> =
            serde_json::from_str(&content).map_err(|source| ConfigError::Channels {
                source,
                path: path.to_path_buf(),
            })?;
        let count = self.replace(channels);
        info!(path = %path.display(), channels = count, "channel directory loaded");
        Ok(count)
    }

    pub fn replace(&self, channels: impl IntoIterator<Item = ChannelSource>) -> usize {
        let map: HashMap<String, ChannelSource> = channels
            .into_iter()
            .map(|channel| (channel.id.clone(), channel))
            .collect();
        let count = map.len();
        *self.channels.write().unwrap_or_else(|e| e.into_inner()) = map;
        count
    }

    pub fn len(&self) -> usize {
        self.channels.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl ChannelLookup for ChannelDirectory {
    async fn resolve(&self, channel_id: &str) -> Option<ChannelSource> {
        self.channels
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(channel_id)
            .cloned()
    }
}
