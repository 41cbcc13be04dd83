// src/lib.rs

#[cfg(feature = "device-output")]
pub mod audio;
pub mod chunk;
pub mod config;
pub mod datasource;
pub mod decoder;
pub mod error;
pub mod format;
pub mod player;
pub mod progress;
pub mod session;
pub mod tempfile;
pub mod waveform;

pub use chunk::{Chunk, ChunkHandle, DataPart};
pub use config::EditorConfig;
pub use datasource::{DataSource, UseClass};
pub use error::{EditError, EditResult};
pub use format::{SampleEncoding, SampleFormat};
pub use player::Player;
pub use session::Document;
pub use waveform::ViewCache; // convenience
