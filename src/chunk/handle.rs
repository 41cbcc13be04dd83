// src/chunk/handle.rs

use std::sync::atomic::Ordering;

use super::Chunk;
use crate::datasource::{SourceLease, UseClass};
use crate::error::{EditError, EditResult};

/// An opened chunk: every part's source holds an open reference for the
/// handle's use-class until the handle drops.
pub struct ChunkHandle {
    chunk: Chunk,
    class: UseClass,
    /// One lease per part, in part order.
    leases: Vec<SourceLease>,
}

impl Chunk {
    /// Open every part's source for `class`. If one fails, the sources
    /// opened so far are closed again before the error is returned.
    pub fn open(&self, class: UseClass) -> EditResult<ChunkHandle> {
        let leases = self
            .parts()
            .iter()
            .map(|part| part.source().open(class))
            .collect::<EditResult<Vec<_>>>()?;

        self.inner.open_count.fetch_add(1, Ordering::AcqRel);
        Ok(ChunkHandle {
            chunk: self.clone(),
            class,
            leases,
        })
    }
}

impl ChunkHandle {
    pub fn chunk(&self) -> &Chunk {
        &self.chunk
    }

    pub fn class(&self) -> UseClass {
        self.class
    }

    /// Read native frames starting at `start`. Delivers either the whole
    /// span (clamped to the chunk end) or nothing.
    pub fn read_raw(&self, start: u64, frames: usize, out: &mut [u8]) -> EditResult<usize> {
        let bpf = self.chunk.format().bytes_per_frame();
        self.read_with(start, frames, |lease, from, n, done| {
            lease.read_raw(from, n, &mut out[done * bpf..(done + n) * bpf])
        })
    }

    /// Like [`read_raw`](Self::read_raw) but converted to interleaved f32.
    pub fn read_float(&self, start: u64, frames: usize, out: &mut [f32]) -> EditResult<usize> {
        let ch = self.chunk.format().channels as usize;
        self.read_with(start, frames, |lease, from, n, done| {
            lease.read_float(from, n, &mut out[done * ch..(done + n) * ch])
        })
    }

    fn read_with<F>(&self, start: u64, frames: usize, mut read: F) -> EditResult<usize>
    where
        F: FnMut(&SourceLease, u64, usize, usize) -> EditResult<usize>,
    {
        let total = self.chunk.frames();
        if start >= total || frames == 0 {
            return Ok(0);
        }
        let frames = frames.min((total - start) as usize);

        let parts = self.chunk.parts();
        let offsets = &self.chunk.inner.offsets;
        let mut idx = self.chunk.part_index(start);
        let mut done = 0usize;

        while done < frames {
            let part = &parts[idx];
            let pos = start + done as u64;
            let within = pos - offsets[idx];
            let n = (frames - done).min((part.frames() - within) as usize);

            let got = read(&self.leases[idx], part.start() + within, n, done)?;
            if got != n {
                return Err(EditError::ReadShortfall {
                    start,
                    wanted: frames,
                    got: done + got,
                });
            }
            done += n;
            idx += 1;
        }

        Ok(frames)
    }
}

impl Drop for ChunkHandle {
    fn drop(&mut self) {
        let prev = self.chunk.inner.open_count.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(prev > 0, "chunk handle closed more often than opened");
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::chunk::tests::{patchwork, ramp, stereo16};
    use crate::datasource::DataSource;
    use crate::format::{SampleEncoding, SampleFormat};

    #[test]
    fn open_nests_and_closes_every_source() {
        let c = patchwork();
        let first = c.open(UseClass::Data).unwrap();
        let second = c.open(UseClass::Data).unwrap();
        let player = c.open(UseClass::Playback).unwrap();
        assert_eq!(c.open_count(), 3);

        let src = Arc::clone(c.parts()[0].source());
        assert_eq!(src.open_count(UseClass::Data), 2);
        assert_eq!(src.open_count(UseClass::Playback), 1);

        drop(first);
        drop(second);
        drop(player);
        assert_eq!(c.open_count(), 0);
        for part in c.parts() {
            assert_eq!(part.source().open_count(UseClass::Data), 0);
            assert_eq!(part.source().open_count(UseClass::Playback), 0);
        }
    }

    #[test]
    fn failed_open_rolls_back() {
        let good = ramp(10, 0);
        let missing = DataSource::temp_file(stereo16(), 10, "/nonexistent/wavedit/gone.wav", 44);
        let c = good.append(&Chunk::from_source(missing));

        assert!(matches!(
            c.open(UseClass::Data),
            Err(EditError::BackendOpen { .. })
        ));
        assert_eq!(c.open_count(), 0);
        assert_eq!(good.parts()[0].source().open_count(UseClass::Data), 0);
    }

    #[test]
    fn float_reads_span_parts() {
        let fmt = SampleFormat::new(1, 8_000, SampleEncoding::F32);
        let a = Chunk::from_source(DataSource::from_float(fmt, &[0.1, 0.2, 0.3]));
        let b = Chunk::from_source(DataSource::from_float(fmt, &[0.4, 0.5]));
        let c = a.append(&b).append(&Chunk::silence(fmt, 2));

        let h = c.open(UseClass::Data).unwrap();
        let mut out = vec![9.0f32; 6];
        assert_eq!(h.read_float(1, 10, &mut out).unwrap(), 6);
        assert_eq!(out, vec![0.2, 0.3, 0.4, 0.5, 0.0, 0.0]);
        assert_eq!(h.read_float(7, 1, &mut out).unwrap(), 0);
    }

    #[test]
    fn short_source_fails_the_whole_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("short.wav");
        // claims 100 frames but holds only the header and 10
        std::fs::write(&path, vec![0u8; 44 + 40]).unwrap();
        let short = DataSource::temp_file(stereo16(), 100, &path, 44);
        let c = ramp(5, 0).append(&Chunk::from_source(short));

        let h = c.open(UseClass::Data).unwrap();
        let mut out = vec![0u8; 105 * 4];
        assert!(h.read_raw(0, 5, &mut out).is_ok());
        let err = h.read_raw(0, 105, &mut out).unwrap_err();
        assert!(matches!(
            err,
            EditError::ReadShortfall {
                wanted: 105,
                got: 15,
                ..
            }
        ));
    }
}
