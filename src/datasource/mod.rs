// src/datasource/mod.rs

mod backend;

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use log::{debug, warn};

use crate::decoder::{DecodeBackend, StreamInfo};
use crate::error::{EditError, EditResult};
use crate::format::SampleFormat;

use backend::{Backend, BackendHandle, Target};

static LIVE_SOURCES: AtomicUsize = AtomicUsize::new(0);

/// Independent access modes. Each keeps its own backend cursor so playback
/// can read a source while an edit reads it too.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum UseClass {
    Data,
    Playback,
}

impl UseClass {
    fn index(self) -> usize {
        match self {
            UseClass::Data => 0,
            UseClass::Playback => 1,
        }
    }
}

/// Backend variant, for inspection.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SourceKind {
    Memory,
    Silence,
    TempFile,
    Decoded,
}

#[derive(Default)]
struct Slot {
    count: usize,
    handle: Option<BackendHandle>,
}

/// One contiguous run of frames from a single backing store.
///
/// Shared between chunks through `Arc`; a source never changes after
/// construction. Reading requires a [`SourceLease`] for the use-class.
pub struct DataSource {
    format: SampleFormat,
    frames: u64,
    backend: Backend,
    slots: [Mutex<Slot>; 2],
}

impl DataSource {
    fn new(format: SampleFormat, frames: u64, backend: Backend) -> Arc<Self> {
        LIVE_SOURCES.fetch_add(1, Ordering::Relaxed);
        Arc::new(Self {
            format,
            frames,
            backend,
            slots: Default::default(),
        })
    }

    /// Frames stored in native encoding.
    pub fn from_memory(format: SampleFormat, bytes: Vec<u8>) -> Arc<Self> {
        let bpf = format.bytes_per_frame();
        debug_assert_eq!(bytes.len() % bpf, 0, "partial frame in memory source");
        let frames = (bytes.len() / bpf) as u64;
        Self::new(format, frames, Backend::Memory(bytes))
    }

    /// Interleaved float samples, stored in `format`'s encoding.
    pub fn from_float(format: SampleFormat, samples: &[f32]) -> Arc<Self> {
        let frames = samples.len() / format.channels as usize;
        let mut bytes = vec![0u8; frames * format.bytes_per_frame()];
        format.from_float(&samples[..frames * format.channels as usize], &mut bytes);
        Self::from_memory(format, bytes)
    }

    pub fn silence(format: SampleFormat, frames: u64) -> Arc<Self> {
        Self::new(format, frames, Backend::Silence)
    }

    /// The data region of a WAV file this process wrote. The file is
    /// deleted when the source goes away.
    pub fn temp_file(
        format: SampleFormat,
        frames: u64,
        path: impl Into<PathBuf>,
        data_offset: u64,
    ) -> Arc<Self> {
        let path = path.into();
        debug!("temp source {} ({frames} frames)", path.display());
        Self::new(format, frames, Backend::TempFile { path, data_offset })
    }

    /// A media file read through `decoder`. The file is left in place
    /// when the source goes away.
    pub fn decoded(
        decoder: Arc<dyn DecodeBackend>,
        path: impl Into<PathBuf>,
        info: StreamInfo,
    ) -> Arc<Self> {
        Self::new(
            info.format,
            info.frames,
            Backend::Decoded {
                path: path.into(),
                decoder,
            },
        )
    }

    /// Probe `path` and wrap it as a decoded source.
    pub fn probe(decoder: Arc<dyn DecodeBackend>, path: &Path) -> EditResult<Arc<Self>> {
        let info = decoder
            .probe(path)
            .map_err(|e| EditError::backend_open(path.display().to_string(), e))?;
        Ok(Self::decoded(decoder, path, info))
    }

    pub fn format(&self) -> &SampleFormat {
        &self.format
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }

    pub fn kind(&self) -> SourceKind {
        match self.backend {
            Backend::Memory(_) => SourceKind::Memory,
            Backend::Silence => SourceKind::Silence,
            Backend::TempFile { .. } => SourceKind::TempFile,
            Backend::Decoded { .. } => SourceKind::Decoded,
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.backend.path()
    }

    /// Current open count for `class`.
    pub fn open_count(&self, class: UseClass) -> usize {
        self.slot(class).count
    }

    /// Number of sources alive in the process.
    pub fn live_count() -> usize {
        LIVE_SOURCES.load(Ordering::Relaxed)
    }

    fn slot(&self, class: UseClass) -> MutexGuard<'_, Slot> {
        self.slots[class.index()]
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Open the source for `class`. The first open of a class acquires its
    /// backend handle; the lease releases it when the last one drops.
    pub fn open(self: &Arc<Self>, class: UseClass) -> EditResult<SourceLease> {
        let mut slot = self.slot(class);
        if slot.count == 0 {
            slot.handle = Some(self.backend.open()?);
        }
        slot.count += 1;
        drop(slot);

        Ok(SourceLease {
            source: Arc::clone(self),
            class,
        })
    }

    fn close(&self, class: UseClass) {
        let mut slot = self.slot(class);
        assert!(slot.count > 0, "closing a source that is not open");
        slot.count -= 1;
        if slot.count == 0 {
            slot.handle = None;
        }
    }

    fn read(&self, class: UseClass, start: u64, frames: usize, target: Target<'_>) -> EditResult<usize> {
        if start >= self.frames {
            return Ok(0);
        }
        let frames = frames.min((self.frames - start) as usize);
        if frames == 0 {
            return Ok(0);
        }

        let mut slot = self.slot(class);
        let Some(handle) = slot.handle.as_mut() else {
            return Err(EditError::backend_open(
                self.path().map(|p| p.display().to_string()).unwrap_or_default(),
                "source is not open",
            ));
        };
        self.backend.read(handle, &self.format, start, frames, target)
    }
}

impl Drop for DataSource {
    fn drop(&mut self) {
        LIVE_SOURCES.fetch_sub(1, Ordering::Relaxed);
        debug_assert!(
            self.slots
                .iter_mut()
                .all(|s| s.get_mut().map(|s| s.count == 0).unwrap_or(true)),
            "data source dropped while open"
        );

        if let Some(path) = self.backend.owned_file() {
            match std::fs::remove_file(path) {
                Ok(()) => debug!("removed {}", path.display()),
                Err(e) => warn!("could not remove {}: {e}", path.display()),
            }
        }
    }
}

impl fmt::Debug for DataSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataSource")
            .field("kind", &self.kind())
            .field("format", &self.format)
            .field("frames", &self.frames)
            .finish()
    }
}

/// An open reference to a [`DataSource`] for one use-class.
/// Dropping it closes the source.
#[derive(Debug)]
pub struct SourceLease {
    source: Arc<DataSource>,
    class: UseClass,
}

impl SourceLease {
    pub fn source(&self) -> &Arc<DataSource> {
        &self.source
    }

    pub fn class(&self) -> UseClass {
        self.class
    }

    /// Read native-encoded frames. Returns the frames delivered, which is
    /// less than asked only at the end of the source or a short file.
    pub fn read_raw(&self, start: u64, frames: usize, out: &mut [u8]) -> EditResult<usize> {
        self.source.read(self.class, start, frames, Target::Raw(out))
    }

    /// Read frames converted to interleaved f32.
    pub fn read_float(&self, start: u64, frames: usize, out: &mut [f32]) -> EditResult<usize> {
        self.source.read(self.class, start, frames, Target::Float(out))
    }
}

impl Drop for SourceLease {
    fn drop(&mut self) {
        self.source.close(self.class);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::SymphoniaBackend;
    use crate::format::SampleEncoding;
    use crate::tempfile::wav;
    use std::io::Write;

    fn mono16() -> SampleFormat {
        SampleFormat::new(1, 8_000, SampleEncoding::S16)
    }

    #[test]
    fn open_counts_are_tracked_per_class() {
        let src = DataSource::from_float(mono16(), &[0.5; 16]);
        let a = src.open(UseClass::Data).unwrap();
        let b = src.open(UseClass::Data).unwrap();
        let p = src.open(UseClass::Playback).unwrap();
        assert_eq!(src.open_count(UseClass::Data), 2);
        assert_eq!(src.open_count(UseClass::Playback), 1);

        drop(a);
        assert_eq!(src.open_count(UseClass::Data), 1);
        drop(b);
        drop(p);
        assert_eq!(src.open_count(UseClass::Data), 0);
        assert_eq!(src.open_count(UseClass::Playback), 0);
    }

    #[test]
    fn reads_clamp_at_the_end() {
        let samples: Vec<f32> = (0..10).map(|i| i as f32 / 16.0).collect();
        let src = DataSource::from_float(mono16(), &samples);
        let lease = src.open(UseClass::Data).unwrap();

        let mut out = vec![0.0f32; 8];
        assert_eq!(lease.read_float(6, 8, &mut out).unwrap(), 4);
        assert_eq!(&out[..4], &samples[6..10]);
        assert_eq!(lease.read_float(10, 8, &mut out).unwrap(), 0);
    }

    #[test]
    fn silence_reads_as_zero_in_every_encoding() {
        let fmt = SampleFormat::new(2, 8_000, SampleEncoding::U8);
        let src = DataSource::silence(fmt, 100);
        let lease = src.open(UseClass::Data).unwrap();

        let mut raw = vec![1u8; 20];
        assert_eq!(lease.read_raw(95, 10, &mut raw).unwrap(), 5);
        assert!(raw[..10].iter().all(|&b| b == 0x80));

        let mut floats = vec![1.0f32; 4];
        assert_eq!(lease.read_float(0, 2, &mut floats).unwrap(), 2);
        assert_eq!(floats, vec![0.0; 4]);
    }

    #[test]
    fn temp_file_source_reads_its_window_and_unlinks() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("window.wav");
        let fmt = mono16();

        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(&wav::header(&fmt, 200)).unwrap();
        let data: Vec<u8> = (0..100i16).flat_map(|v| v.to_le_bytes()).collect();
        file.write_all(&data).unwrap();
        drop(file);

        let src = DataSource::temp_file(fmt, 100, &path, wav::PCM_HEADER_BYTES);
        {
            let lease = src.open(UseClass::Data).unwrap();
            let mut raw = vec![0u8; 8];
            assert_eq!(lease.read_raw(50, 4, &mut raw).unwrap(), 4);
            assert_eq!(i16::from_le_bytes([raw[0], raw[1]]), 50);
            assert_eq!(i16::from_le_bytes([raw[6], raw[7]]), 53);

            // backwards seek
            assert_eq!(lease.read_raw(2, 1, &mut raw).unwrap(), 1);
            assert_eq!(i16::from_le_bytes([raw[0], raw[1]]), 2);
        }
        drop(src);
        assert!(!path.exists());
    }

    #[test]
    fn decoded_stream_pads_at_eof() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tone.wav");
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: 8_000,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut w = hound::WavWriter::create(&path, spec).unwrap();
        for i in 0..100i16 {
            w.write_sample(i * 100).unwrap();
        }
        w.finalize().unwrap();

        let decoder: Arc<dyn DecodeBackend> = Arc::new(SymphoniaBackend);
        let mut info = decoder.probe(&path).unwrap();
        assert_eq!(info.frames, 100);
        // the container claims more than the stream holds
        info.frames = 120;
        let src = DataSource::decoded(decoder, &path, info);
        assert_eq!(src.kind(), SourceKind::Decoded);

        {
            let lease = src.open(UseClass::Data).unwrap();
            let mut floats = vec![9.0f32; 30];
            assert_eq!(lease.read_float(90, 30, &mut floats).unwrap(), 30);
            assert_eq!((floats[0] * 32_768.0).round(), 9_000.0);
            assert_eq!((floats[9] * 32_768.0).round(), 9_900.0);
            assert!(floats[10..].iter().all(|&s| s == 0.0));

            // cursor is past the end now, so this seeks back
            let mut raw = vec![0xffu8; 50];
            assert_eq!(lease.read_raw(95, 25, &mut raw).unwrap(), 25);
            assert_eq!(i16::from_le_bytes([raw[0], raw[1]]), 9_500);
            assert_eq!(i16::from_le_bytes([raw[8], raw[9]]), 9_900);
            assert!(raw[10..].iter().all(|&b| b == 0));

            assert_eq!(lease.read_raw(10, 1, &mut raw).unwrap(), 1);
            assert_eq!(i16::from_le_bytes([raw[0], raw[1]]), 1_000);
        }
        drop(src);
        assert!(path.exists(), "decoded sources never delete their file");
    }

    #[test]
    fn missing_temp_file_fails_to_open() {
        let src = DataSource::temp_file(mono16(), 10, "/nonexistent/wavedit/x.wav", 44);
        let err = src.open(UseClass::Data).unwrap_err();
        assert!(matches!(err, EditError::BackendOpen { .. }));
        assert_eq!(src.open_count(UseClass::Data), 0);
    }
}
