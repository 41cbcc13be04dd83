// src/tempfile/mod.rs

pub mod ringbuf;
pub mod wav;

use std::fs::{self, File, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use log::{debug, warn};

use crate::config::EditorConfig;
use crate::datasource::DataSource;
use crate::error::{EditError, EditResult};
use crate::format::SampleFormat;

use self::ringbuf::RingBuffer;

static TEMP_COUNTER: AtomicU32 = AtomicU32::new(0);

/// Factory for [`TempFile`]s: knows where spill files go and how much may
/// stay in memory.
#[derive(Debug, Clone)]
pub struct TempStore {
    dir: PathBuf,
    ring_capacity: usize,
    block_bytes: usize,
}

impl TempStore {
    pub fn new(dir: impl Into<PathBuf>, ring_capacity: usize, block_bytes: usize) -> Self {
        Self {
            dir: dir.into(),
            ring_capacity,
            block_bytes: block_bytes.max(1),
        }
    }

    pub fn from_config(config: &EditorConfig) -> Self {
        let ring_capacity = config.ring_capacity.unwrap_or_else(|| {
            ringbuf::system_capacity(config.io_block_bytes, config.max_ring_capacity)
        });
        debug!("ring buffer capacity {ring_capacity} bytes");
        Self::new(config.temp_dir(), ring_capacity, config.io_block_bytes)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn ring_capacity(&self) -> usize {
        self.ring_capacity
    }

    /// Preferred size of one read or write.
    pub fn block_bytes(&self) -> usize {
        self.block_bytes
    }

    /// Block size rounded down to whole frames of `frame_bytes`.
    pub fn block_frames(&self, frame_bytes: usize) -> usize {
        (self.block_bytes / frame_bytes.max(1)).max(1)
    }

    pub fn create(&self, format: SampleFormat) -> TempFile {
        TempFile {
            format,
            dir: self.dir.clone(),
            ring: Some(RingBuffer::new(self.ring_capacity)),
            file: None,
            path: None,
            bytes_written: 0,
            block_bytes: self.block_bytes,
        }
    }

    fn next_path(dir: &Path) -> PathBuf {
        let n = TEMP_COUNTER.fetch_add(1, Ordering::Relaxed) + 1;
        dir.join(format!("{}-{:04}.wav", std::process::id(), n))
    }
}

/// Accumulates written frames in memory and moves them to a WAV file only
/// once they no longer fit.
///
/// Dropping an unfinished temp file removes whatever reached disk.
pub struct TempFile {
    format: SampleFormat,
    dir: PathBuf,
    /// Retired for good on the first overflow.
    ring: Option<RingBuffer>,
    file: Option<File>,
    path: Option<PathBuf>,
    /// Data bytes that went to the file, header excluded.
    bytes_written: u64,
    block_bytes: usize,
}

impl TempFile {
    pub fn format(&self) -> &SampleFormat {
        &self.format
    }

    /// True once the data has spilled to disk.
    pub fn is_spilled(&self) -> bool {
        self.ring.is_none()
    }

    pub fn write(&mut self, data: &[u8]) -> EditResult<()> {
        let mut rest = data;

        if let Some(mut ring) = self.ring.take() {
            let taken = ring.enqueue(rest);
            if taken == rest.len() {
                self.ring = Some(ring);
                return Ok(());
            }
            rest = &rest[taken..];

            // Overflow: everything buffered goes to disk ahead of `rest`.
            debug!(
                "ring buffer full at {} bytes, spilling to disk",
                ring.available()
            );
            let mut block = vec![0u8; self.block_bytes.min(ring.available()).max(1)];
            loop {
                let n = ring.dequeue(&mut block);
                if n == 0 {
                    break;
                }
                self.write_file(&block[..n])?;
            }
        }

        self.write_file(rest)
    }

    /// Write f32 samples into a float-encoded temp file.
    pub fn write_float(&mut self, samples: &[f32]) -> EditResult<()> {
        debug_assert!(self.format.is_float());
        if cfg!(target_endian = "little") {
            self.write(bytemuck::cast_slice(samples))
        } else {
            let mut raw = vec![0u8; samples.len() * 4];
            self.format.from_float(samples, &mut raw);
            self.write(&raw)
        }
    }

    fn write_file(&mut self, data: &[u8]) -> EditResult<()> {
        if data.is_empty() {
            return Ok(());
        }

        if self.file.is_none() {
            fs::create_dir_all(&self.dir).map_err(|e| EditError::write(&self.dir, e))?;
            let path = TempStore::next_path(&self.dir);
            let mut file = OpenOptions::new()
                .read(true)
                .write(true)
                .create_new(true)
                .open(&path)
                .map_err(|e| EditError::write(&path, e))?;
            self.path = Some(path.clone());
            debug!("spilling to {}", path.display());

            let header = wav::header(&self.format, wav::PROVISIONAL_DATA_BYTES);
            file.write_all(&header).map_err(|e| EditError::write(&path, e))?;
            self.file = Some(file);
        }

        let path = self.path.clone().unwrap_or_default();
        if let Some(file) = self.file.as_mut() {
            file.write_all(data).map_err(|e| EditError::write(&path, e))?;
        }
        self.bytes_written += data.len() as u64;
        Ok(())
    }

    /// Turn what was written into a data source. Small outputs stay in
    /// memory; spilled ones become a window into the finished WAV file.
    pub fn finalize(mut self) -> EditResult<Arc<DataSource>> {
        let bpf = self.format.bytes_per_frame();

        if let Some(mut ring) = self.ring.take() {
            let mut bytes = vec![0u8; ring.available()];
            let n = ring.dequeue(&mut bytes);
            bytes.truncate(n - n % bpf);
            return Ok(DataSource::from_memory(self.format, bytes));
        }

        let (Some(mut file), Some(path)) = (self.file.take(), self.path.take()) else {
            // Spilled with nothing written cannot happen; treat as empty.
            return Ok(DataSource::from_memory(self.format, Vec::new()));
        };

        let data_bytes = self.bytes_written;
        let patched = file
            .seek(SeekFrom::Start(0))
            .and_then(|_| file.write_all(&wav::header(&self.format, data_bytes)))
            .and_then(|_| file.flush());
        if let Err(e) = patched {
            warn!(
                "could not patch header of {}, keeping provisional length: {e}",
                path.display()
            );
        }
        drop(file);

        let frames = data_bytes / bpf as u64;
        Ok(DataSource::temp_file(
            self.format,
            frames,
            path,
            wav::header_len(&self.format),
        ))
    }

    /// Throw away everything written so far.
    pub fn abort(mut self) {
        self.discard();
    }

    fn discard(&mut self) {
        self.ring = None;
        self.file = None;
        if let Some(path) = self.path.take() {
            debug!("discarding {}", path.display());
            if let Err(e) = fs::remove_file(&path) {
                warn!("could not remove {}: {e}", path.display());
            }
        }
    }
}

impl Drop for TempFile {
    fn drop(&mut self) {
        self.discard();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datasource::{SourceKind, UseClass};
    use crate::format::SampleEncoding;

    fn stereo16() -> SampleFormat {
        SampleFormat::new(2, 8_000, SampleEncoding::S16)
    }

    fn pattern(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i * 7 % 256) as u8).collect()
    }

    fn read_all(src: &Arc<DataSource>) -> Vec<u8> {
        let lease = src.open(UseClass::Data).unwrap();
        let bpf = src.format().bytes_per_frame();
        let mut out = vec![0u8; src.frames() as usize * bpf];
        let got = lease.read_raw(0, src.frames() as usize, &mut out).unwrap();
        assert_eq!(got as u64, src.frames());
        out
    }

    #[test]
    fn small_output_stays_in_memory() {
        let dir = tempfile::tempdir().unwrap();
        let store = TempStore::new(dir.path(), 4_000, 1_000);
        let mut tf = store.create(stereo16());
        let data = pattern(4_000);
        tf.write(&data[..1_500]).unwrap();
        tf.write(&data[1_500..]).unwrap();
        assert!(!tf.is_spilled());

        let src = tf.finalize().unwrap();
        assert_eq!(src.kind(), SourceKind::Memory);
        assert_eq!(src.frames(), 1_000);
        assert_eq!(read_all(&src), data);
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn overflow_spills_to_a_valid_wav() {
        let dir = tempfile::tempdir().unwrap();
        let store = TempStore::new(dir.path(), 4_000, 1_000);
        let mut tf = store.create(stereo16());
        let data = pattern(10_000);
        for block in data.chunks(1_200) {
            tf.write(block).unwrap();
        }
        assert!(tf.is_spilled());

        let src = tf.finalize().unwrap();
        assert_eq!(src.kind(), SourceKind::TempFile);
        assert_eq!(src.frames(), 2_500);
        assert_eq!(read_all(&src), data);

        let path = src.path().unwrap().to_path_buf();
        let name = path.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with(&format!("{}-", std::process::id())));
        assert!(name.ends_with(".wav"));

        let reader = hound::WavReader::open(&path).unwrap();
        assert_eq!(reader.spec().channels, 2);
        assert_eq!(reader.spec().bits_per_sample, 16);
        assert_eq!(reader.duration(), 2_500);
        drop(reader);

        drop(src);
        assert!(!path.exists());
    }

    #[test]
    fn float_spill_has_fact_header() {
        let dir = tempfile::tempdir().unwrap();
        let store = TempStore::new(dir.path(), 64, 64);
        let fmt = SampleFormat::new(1, 8_000, SampleEncoding::F32);
        let mut tf = store.create(fmt);
        let samples: Vec<f32> = (0..100).map(|i| i as f32 / 100.0).collect();
        tf.write_float(&samples).unwrap();

        let src = tf.finalize().unwrap();
        assert_eq!(src.kind(), SourceKind::TempFile);
        let mut reader = hound::WavReader::open(src.path().unwrap()).unwrap();
        let back: Vec<f32> = reader.samples::<f32>().map(|s| s.unwrap()).collect();
        assert_eq!(back, samples);
    }

    #[test]
    fn abort_and_drop_remove_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = TempStore::new(dir.path(), 16, 16);

        let mut tf = store.create(stereo16());
        tf.write(&pattern(64)).unwrap();
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);
        tf.abort();
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);

        let mut tf = store.create(stereo16());
        tf.write(&pattern(64)).unwrap();
        drop(tf);
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }
}
