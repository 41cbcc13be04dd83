// src/config.rs

use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};

use anyhow::Result;
use serde::{Deserialize, Serialize};

/// Size of one I/O block in bytes. Divisible by every frame size up to
/// eight channels of 32-bit samples, and by the 24-bit ones too.
pub const DEFAULT_BLOCK_BYTES: usize = 1_008_000;

/// Runtime tunables, persisted as JSON next to the user's settings.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct EditorConfig {
    /// Where spill files go. `None` means `wavedit` under the system temp directory.
    pub temp_dir: Option<PathBuf>,
    /// Unit of work for reading, mixing and envelope runs.
    pub io_block_bytes: usize,
    /// Fixed ring-buffer size. `None` sizes it from installed memory.
    pub ring_capacity: Option<usize>,
    /// Upper bound for the memory-derived ring size.
    pub max_ring_capacity: usize,
    /// Undo entries kept before the oldest is dropped.
    pub history_limit: usize,
}

impl Default for EditorConfig {
    fn default() -> Self {
        Self {
            temp_dir: None,
            io_block_bytes: DEFAULT_BLOCK_BYTES,
            ring_capacity: None,
            max_ring_capacity: 256 * 1024 * 1024,
            history_limit: 100,
        }
    }
}

impl EditorConfig {
    pub fn temp_dir(&self) -> PathBuf {
        self.temp_dir
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().join("wavedit"))
    }

    pub fn save_to_disk(&self, path: impl AsRef<Path>) -> Result<()> {
        let file = File::create(path)?;
        let writer = BufWriter::new(file);
        serde_json::to_writer_pretty(writer, self)?;
        Ok(())
    }

    pub fn load_from_disk(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::open(path)?;
        let reader = BufReader::new(file);
        let config = serde_json::from_reader(reader)?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_fields_fall_back_to_defaults() {
        let config: EditorConfig = serde_json::from_str(r#"{ "history_limit": 7 }"#).unwrap();
        assert_eq!(config.history_limit, 7);
        assert_eq!(config.io_block_bytes, DEFAULT_BLOCK_BYTES);
        assert_eq!(config.ring_capacity, None);
    }

    #[test]
    fn config_survives_disk_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("editor.json");
        let config = EditorConfig {
            temp_dir: Some(dir.path().to_path_buf()),
            ring_capacity: Some(4096),
            ..EditorConfig::default()
        };
        config.save_to_disk(&path).unwrap();
        assert_eq!(EditorConfig::load_from_disk(&path).unwrap(), config);
    }
}
