// src/chunk/process.rs

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::{info, warn};

use super::Chunk;
use crate::datasource::{DataSource, UseClass};
use crate::decoder::{DecodeBackend, EncodeBackend};
use crate::error::{EditError, EditResult};
use crate::progress::Progress;
use crate::tempfile::{TempFile, TempStore};

/// Write processed float samples into `out` in its native encoding.
fn write_samples(out: &mut TempFile, samples: &[f32], scratch: &mut Vec<u8>) -> EditResult<()> {
    let format = *out.format();
    if format.is_float() {
        return out.write_float(samples);
    }
    scratch.resize(samples.len() * format.encoding.bytes_per_sample(), 0);
    format.from_float(samples, scratch);
    out.write(scratch)
}

/// Keep the begin/end pair balanced whatever way an operation exits.
struct ProgressScope<'a>(&'a Progress);

impl<'a> ProgressScope<'a> {
    fn begin(progress: &'a Progress, label: &str) -> Self {
        progress.begin(label);
        Self(progress)
    }
}

impl Drop for ProgressScope<'_> {
    fn drop(&mut self) {
        self.0.end();
    }
}

impl Chunk {
    /// Sample-wise sum of `self` and `other`, clamped to [-1, 1]. The tail
    /// of the longer input follows unchanged.
    pub fn mix(&self, other: &Chunk, store: &TempStore, progress: &Progress) -> EditResult<Chunk> {
        assert_eq!(
            self.format(),
            other.format(),
            "mixing a chunk of another sample format"
        );
        let format = *self.format();
        let mix_len = self.frames().min(other.frames());

        let a = self.open(UseClass::Data)?;
        let b = other.open(UseClass::Data)?;
        let mut out = store.create(format);
        let _scope = ProgressScope::begin(progress, "Mixing");

        let block = store.block_frames(format.float_frame_bytes());
        let ch = format.channels as usize;
        let mut buf_a = vec![0.0f32; block * ch];
        let mut buf_b = vec![0.0f32; block * ch];
        let mut scratch = Vec::new();

        let mut pos = 0u64;
        while pos < mix_len {
            let n = block.min((mix_len - pos) as usize);
            a.read_float(pos, n, &mut buf_a)?;
            b.read_float(pos, n, &mut buf_b)?;

            for (x, y) in buf_a[..n * ch].iter_mut().zip(&buf_b[..n * ch]) {
                *x = (*x + *y).clamp(-1.0, 1.0);
            }
            write_samples(&mut out, &buf_a[..n * ch], &mut scratch)?;

            pos += n as u64;
            progress.report(pos as f32 / mix_len as f32)?;
        }
        drop((a, b));

        let mixed = Chunk::from_source(out.finalize()?);
        let tail = if self.frames() > mix_len {
            self.get_part(mix_len, self.frames() - mix_len)
        } else {
            other.get_part(mix_len, other.frames() - mix_len)
        };
        Ok(mixed.append(&tail))
    }

    /// Linear gain ramp from `start_gain` on the first frame to `end_gain`
    /// on the last, applied to every channel.
    pub fn fade(
        &self,
        start_gain: f32,
        end_gain: f32,
        store: &TempStore,
        progress: &Progress,
    ) -> EditResult<Chunk> {
        let format = *self.format();
        let total = self.frames();
        if total == 0 {
            return Ok(self.clone());
        }

        let handle = self.open(UseClass::Data)?;
        let mut out = store.create(format);
        let _scope = ProgressScope::begin(progress, "Fading");

        let block = store.block_frames(format.float_frame_bytes());
        let ch = format.channels as usize;
        let mut buf = vec![0.0f32; block * ch];
        let mut scratch = Vec::new();
        let span = (total - 1).max(1) as f64;
        let delta = (end_gain - start_gain) as f64;

        let mut pos = 0u64;
        while pos < total {
            let n = block.min((total - pos) as usize);
            handle.read_float(pos, n, &mut buf)?;

            for (i, frame) in buf[..n * ch].chunks_exact_mut(ch).enumerate() {
                let t = (pos + i as u64) as f64 / span;
                let gain = (start_gain as f64 + delta * t) as f32;
                frame.iter_mut().for_each(|s| *s *= gain);
            }
            write_samples(&mut out, &buf[..n * ch], &mut scratch)?;

            pos += n as u64;
            progress.report(pos as f32 / total as f32)?;
        }
        drop(handle);

        Ok(Chunk::from_source(out.finalize()?))
    }

    /// Open a media file through `backend` as a single-part chunk.
    pub fn load(path: &Path, backend: Arc<dyn DecodeBackend>) -> EditResult<Chunk> {
        let source = DataSource::probe(backend, path)?;
        // Fail here rather than on the first redraw.
        drop(source.open(UseClass::Data)?);
        info!(
            "loaded {} ({}, {} frames)",
            path.display(),
            source.format(),
            source.frames()
        );
        Ok(Chunk::from_source(source))
    }

    /// Encode the chunk to `path`. The file is written beside the target
    /// and renamed over it only once complete, so a failed or cancelled
    /// save leaves any existing file alone.
    pub fn save(
        &self,
        path: &Path,
        encoder: &dyn EncodeBackend,
        block_bytes: usize,
        progress: &Progress,
    ) -> EditResult<()> {
        let partial = partial_path(path);
        let result = self.encode_to(&partial, encoder, block_bytes, progress);

        match result {
            Ok(()) => {
                fs::rename(&partial, path).map_err(|e| EditError::write(path, e))?;
                info!("saved {} ({} frames)", path.display(), self.frames());
                Ok(())
            }
            Err(e) => {
                if let Err(rm) = fs::remove_file(&partial) {
                    if rm.kind() != std::io::ErrorKind::NotFound {
                        warn!("could not remove {}: {rm}", partial.display());
                    }
                }
                Err(e)
            }
        }
    }

    fn encode_to(
        &self,
        path: &Path,
        encoder: &dyn EncodeBackend,
        block_bytes: usize,
        progress: &Progress,
    ) -> EditResult<()> {
        let format = *self.format();
        let handle = self.open(UseClass::Data)?;
        let mut sink = encoder
            .create(path, format)
            .map_err(|e| encode_error(path, e))?;
        let _scope = ProgressScope::begin(progress, "Saving");

        let bpf = format.bytes_per_frame();
        let block = (block_bytes / bpf).max(1);
        let mut buf = vec![0u8; block * bpf];
        let total = self.frames();

        let mut pos = 0u64;
        while pos < total {
            let n = block.min((total - pos) as usize);
            handle.read_raw(pos, n, &mut buf)?;
            sink.write(&buf[..n * bpf])
                .map_err(|e| encode_error(path, e))?;
            pos += n as u64;
            progress.report(pos as f32 / total as f32)?;
        }

        sink.finish().map_err(|e| encode_error(path, e))
    }
}

fn partial_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".part");
    path.with_file_name(name)
}

/// Encoders report through anyhow; keep an I/O cause typed so a full disk
/// is still recognised.
fn encode_error(path: &Path, err: anyhow::Error) -> EditError {
    match err.downcast::<std::io::Error>() {
        Ok(io) => EditError::write(path, io),
        Err(other) => EditError::write(path, std::io::Error::other(other.to_string())),
    }
}
