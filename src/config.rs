use serde::{Deserialize, Serialize};

use crate::node::RetrieveMode;

pub const DEFAULT_CHUNK_SIZE: usize = 256 * 1024;

/// What to retrieve and how to read while scanning a volume.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanOptions {
    pub retrieve: RetrieveMode,
    /// Prefix of every full path, e.g. `C:`.
    pub volume_label: String,
    /// Bytes of $MFT data read at once.
    pub chunk_size: usize,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            retrieve: RetrieveMode::MINIMAL,
            volume_label: String::new(),
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

impl ScanOptions {
    pub fn new(retrieve: RetrieveMode) -> Self {
        Self {
            retrieve,
            ..Self::default()
        }
    }

    pub fn with_volume_label(mut self, label: impl Into<String>) -> Self {
        self.volume_label = label.into();
        self
    }

    pub fn with_chunk_size(mut self, bytes: usize) -> Self {
        self.chunk_size = bytes;
        self
    }
}
