// src/chunk/mod.rs

mod handle;
mod process;

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::datasource::DataSource;
use crate::format::SampleFormat;

pub use handle::ChunkHandle;

/// A window `[start, start + frames)` into one data source.
#[derive(Clone)]
pub struct DataPart {
    source: Arc<DataSource>,
    start: u64,
    frames: u64,
}

impl DataPart {
    pub fn new(source: Arc<DataSource>, start: u64, frames: u64) -> Self {
        debug_assert!(start + frames <= source.frames());
        Self {
            source,
            start,
            frames,
        }
    }

    pub fn source(&self) -> &Arc<DataSource> {
        &self.source
    }

    pub fn start(&self) -> u64 {
        self.start
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }

    /// The sub-window `[offset, offset + frames)` of this part.
    fn slice(&self, offset: u64, frames: u64) -> Self {
        Self {
            source: Arc::clone(&self.source),
            start: self.start + offset,
            frames,
        }
    }
}

struct ChunkInner {
    format: SampleFormat,
    parts: Vec<DataPart>,
    /// First frame of each part within the chunk.
    offsets: Vec<u64>,
    frames: u64,
    open_count: AtomicUsize,
}

/// An immutable sequence of data parts.
///
/// Cloning is cheap and shares the part list. Every edit returns a new
/// chunk; two chunks are the same version exactly when [`Chunk::ptr_eq`].
#[derive(Clone)]
pub struct Chunk {
    inner: Arc<ChunkInner>,
}

impl Chunk {
    fn from_parts(format: SampleFormat, parts: Vec<DataPart>) -> Self {
        let parts: Vec<DataPart> = parts.into_iter().filter(|p| p.frames > 0).collect();
        let mut offsets = Vec::with_capacity(parts.len());
        let mut frames = 0;
        for part in &parts {
            debug_assert_eq!(part.source.format(), &format);
            offsets.push(frames);
            frames += part.frames;
        }

        Self {
            inner: Arc::new(ChunkInner {
                format,
                parts,
                offsets,
                frames,
                open_count: AtomicUsize::new(0),
            }),
        }
    }

    pub fn empty(format: SampleFormat) -> Self {
        Self::from_parts(format, Vec::new())
    }

    /// Single-part chunk covering all of `source`.
    pub fn from_source(source: Arc<DataSource>) -> Self {
        let format = *source.format();
        let frames = source.frames();
        Self::from_parts(format, vec![DataPart::new(source, 0, frames)])
    }

    pub fn silence(format: SampleFormat, frames: u64) -> Self {
        Self::from_source(DataSource::silence(format, frames))
    }

    pub fn format(&self) -> &SampleFormat {
        &self.inner.format
    }

    pub fn frames(&self) -> u64 {
        self.inner.frames
    }

    pub fn bytes(&self) -> u64 {
        self.inner.frames * self.inner.format.bytes_per_frame() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.inner.frames == 0
    }

    pub fn parts(&self) -> &[DataPart] {
        &self.inner.parts
    }

    /// Length in seconds.
    pub fn duration(&self) -> f64 {
        self.inner.frames as f64 / self.inner.format.rate.max(1) as f64
    }

    /// Handles currently open on this chunk.
    pub fn open_count(&self) -> usize {
        self.inner.open_count.load(Ordering::Acquire)
    }

    pub fn ptr_eq(a: &Chunk, b: &Chunk) -> bool {
        Arc::ptr_eq(&a.inner, &b.inner)
    }

    /// Index of the part holding `frame`, which must be inside the chunk.
    fn part_index(&self, frame: u64) -> usize {
        self.inner.offsets.partition_point(|&o| o <= frame) - 1
    }

    /// Frames `[start, start + len)` as a new chunk.
    pub fn get_part(&self, start: u64, len: u64) -> Chunk {
        assert!(
            start + len <= self.frames(),
            "range {start}+{len} outside chunk of {} frames",
            self.frames()
        );
        let end = start + len;
        let mut parts = Vec::new();

        for (part, &pos) in self.inner.parts.iter().zip(&self.inner.offsets) {
            let part_end = pos + part.frames;
            if part_end <= start {
                continue;
            }
            if pos >= end {
                break;
            }
            let from = start.max(pos);
            let to = end.min(part_end);
            parts.push(part.slice(from - pos, to - from));
        }

        Self::from_parts(self.inner.format, parts)
    }

    /// Everything except frames `[start, start + len)`.
    pub fn remove_part(&self, start: u64, len: u64) -> Chunk {
        assert!(
            start + len <= self.frames(),
            "range {start}+{len} outside chunk of {} frames",
            self.frames()
        );
        if len == 0 {
            return self.clone();
        }
        let end = start + len;
        let mut parts = Vec::with_capacity(self.inner.parts.len() + 1);

        for (part, &pos) in self.inner.parts.iter().zip(&self.inner.offsets) {
            let part_end = pos + part.frames;
            if part_end <= start || pos >= end {
                parts.push(part.clone());
                continue;
            }
            if pos < start {
                parts.push(part.slice(0, start - pos));
            }
            if part_end > end {
                parts.push(part.slice(end - pos, part_end - end));
            }
        }

        Self::from_parts(self.inner.format, parts)
    }

    /// `other` spliced in at frame `pos`.
    pub fn insert(&self, other: &Chunk, pos: u64) -> Chunk {
        assert_eq!(
            self.format(),
            other.format(),
            "inserting a chunk of another sample format"
        );
        assert!(pos <= self.frames(), "insert position {pos} past the end");

        if other.is_empty() {
            return self.clone();
        }
        if pos == 0 {
            return other.append(self);
        }
        if pos == self.frames() {
            return self.append(other);
        }

        let idx = self.part_index(pos);
        let part = &self.inner.parts[idx];
        let split = pos - self.inner.offsets[idx];

        let mut parts = Vec::with_capacity(self.inner.parts.len() + other.inner.parts.len() + 1);
        parts.extend_from_slice(&self.inner.parts[..idx]);
        if split > 0 {
            parts.push(part.slice(0, split));
        }
        parts.extend_from_slice(&other.inner.parts);
        parts.push(part.slice(split, part.frames - split));
        parts.extend_from_slice(&self.inner.parts[idx + 1..]);

        Self::from_parts(self.inner.format, parts)
    }

    /// `self` followed by `other`.
    pub fn append(&self, other: &Chunk) -> Chunk {
        assert_eq!(
            self.format(),
            other.format(),
            "appending a chunk of another sample format"
        );
        if other.is_empty() {
            return self.clone();
        }
        if self.is_empty() {
            return other.clone();
        }

        let mut parts = Vec::with_capacity(self.inner.parts.len() + other.inner.parts.len());
        parts.extend_from_slice(&self.inner.parts);
        parts.extend_from_slice(&other.inner.parts);
        Self::from_parts(self.inner.format, parts)
    }

    /// Frames `[start, start + len)` replaced by `replacement`.
    pub fn replace_part(&self, start: u64, len: u64, replacement: &Chunk) -> Chunk {
        assert_eq!(
            self.format(),
            replacement.format(),
            "replacing with a chunk of another sample format"
        );
        self.remove_part(start, len).insert(replacement, start)
    }
}

impl fmt::Debug for Chunk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Chunk")
            .field("format", &self.inner.format)
            .field("frames", &self.inner.frames)
            .field("parts", &self.inner.parts.len())
            .finish()
    }
}
