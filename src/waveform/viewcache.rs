// src/waveform/viewcache.rs

use std::ops::Range;

use log::warn;

use crate::chunk::{Chunk, ChunkHandle};
use crate::config::DEFAULT_BLOCK_BYTES;
use crate::datasource::UseClass;

/// Freshness of one pixel column.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ColumnState {
    /// Nothing known; not drawn.
    Unknown,
    /// Holds a usable approximation that will be recomputed.
    Dirty,
    /// Final for the current view.
    Done,
}

/// One vertical line of a drawn envelope, in pixel coordinates.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Segment {
    pub x: usize,
    pub top: i32,
    pub bottom: i32,
}

/// Per-pixel min/max envelope of a chunk over a visible frame range,
/// filled in a little at a time.
///
/// `update` is meant to be called on every redraw tick. Each call does at
/// most one backend read of about `block_bytes`, so scrolling and zooming
/// stay responsive on long recordings. Columns computed for an earlier
/// view are reused when the new view overlaps it.
pub struct ViewCache {
    chunk: Option<Chunk>,
    handle: Option<ChunkHandle>,
    chunk_error: bool,
    start: u64,
    end: u64,
    width: usize,
    /// `[min, max]` per channel per column.
    values: Vec<f32>,
    /// First frame of each column, plus the end of the last.
    offsets: Vec<u64>,
    states: Vec<ColumnState>,
    samples: Vec<f32>,
    block_bytes: usize,
    frames_fetched: u64,
}

impl Default for ViewCache {
    fn default() -> Self {
        Self::new(DEFAULT_BLOCK_BYTES)
    }
}

impl ViewCache {
    pub fn new(block_bytes: usize) -> Self {
        Self {
            chunk: None,
            handle: None,
            chunk_error: false,
            start: 0,
            end: 0,
            width: 0,
            values: Vec::new(),
            offsets: vec![0],
            states: Vec::new(),
            samples: Vec::new(),
            block_bytes: block_bytes.max(1),
            frames_fetched: 0,
        }
    }

    pub fn chunk(&self) -> Option<&Chunk> {
        self.chunk.as_ref()
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn range(&self) -> (u64, u64) {
        (self.start, self.end)
    }

    pub fn state(&self, col: usize) -> ColumnState {
        self.states[col]
    }

    /// `(min, max)` of channel `ch` in column `col`.
    pub fn envelope(&self, col: usize, ch: usize) -> (f32, f32) {
        let i = (col * self.channels() + ch) * 2;
        (self.values[i], self.values[i + 1])
    }

    /// Total frames read from the chunk so far.
    pub fn frames_fetched(&self) -> u64 {
        self.frames_fetched
    }

    /// True when no read handle is held, i.e. every column is final.
    pub fn is_fully_updated(&self) -> bool {
        self.handle.is_none()
    }

    fn channels(&self) -> usize {
        self.chunk
            .as_ref()
            .map(|c| c.format().channels as usize)
            .unwrap_or(1)
    }

    /// Forget every column so the next updates recompute the whole view.
    pub fn invalidate(&mut self) {
        self.states.fill(ColumnState::Unknown);
        self.chunk_error = false;
        if let Some(chunk) = self.chunk.clone() {
            if self.handle.is_none() && !self.open_handle(&chunk) {
                self.mark_failed();
            }
        }
    }

    fn open_handle(&mut self, chunk: &Chunk) -> bool {
        match chunk.open(UseClass::Data) {
            Ok(h) => {
                self.handle = Some(h);
                true
            }
            Err(e) => {
                warn!("waveform: {e}");
                false
            }
        }
    }

    /// Chunk cannot be read: show a flat line and stop trying.
    fn mark_failed(&mut self) {
        self.values.fill(0.0);
        self.states.fill(ColumnState::Done);
        self.chunk_error = true;
    }

    /// Bring the cache closer to showing `[start, end)` of `chunk` across
    /// `width` columns. Returns the columns whose contents changed.
    pub fn update(
        &mut self,
        chunk: &Chunk,
        start: u64,
        end: u64,
        width: usize,
    ) -> Option<Range<usize>> {
        if end <= start || width == 0 {
            if self.start == start && self.end == end && self.width == width {
                return None;
            }
            self.handle = None;
            self.reset_columns(start, end, width);
            return Some(0..width);
        }

        let chunk_changed = self
            .chunk
            .as_ref()
            .is_none_or(|c| !Chunk::ptr_eq(c, chunk));
        let range_changed =
            chunk_changed || self.start != start || self.end != end || self.width != width;

        if !range_changed && self.handle.is_none() {
            return None;
        }

        let fpp = (end - start) as f64 / width as f64;

        if chunk_changed {
            self.handle = None;
            self.chunk = Some(chunk.clone());
            self.chunk_error = false;
        }
        if self.chunk_error {
            return None;
        }

        if range_changed {
            self.relayout(chunk, start, end, width, chunk_changed, fpp);
            return Some(0..width);
        }

        if fpp < 1.0 {
            self.fetch_samples(chunk);
            return Some(0..width);
        }

        self.compute_run(fpp)
    }

    fn reset_columns(&mut self, start: u64, end: u64, width: usize) {
        let ch = self.channels();
        self.start = start;
        self.end = end;
        self.width = width;
        self.values = vec![0.0; width * ch * 2];
        self.offsets = vec![start; width + 1];
        self.states = vec![ColumnState::Unknown; width];
    }

    /// New column layout for a changed range, keeping what the old one
    /// already knows.
    fn relayout(
        &mut self,
        chunk: &Chunk,
        start: u64,
        end: u64,
        width: usize,
        chunk_changed: bool,
        fpp: f64,
    ) {
        if self.handle.is_none() {
            self.open_handle(chunk);
        }

        let ch = chunk.format().channels as usize;
        let limit = chunk.frames();
        let mut values = vec![0.0f32; width * ch * 2];
        let mut states = vec![ColumnState::Unknown; width];
        let mut offsets = vec![0u64; width + 1];
        offsets[0] = start;
        offsets[width] = end;
        let mut d = start as f64 + fpp;
        for o in offsets.iter_mut().take(width).skip(1) {
            *o = d as u64;
            d += fpp;
        }

        let old_w = self.width;
        let old_span = self.end - self.start;
        let stride = 2 * ch;

        if chunk_changed || old_w == 0 || end <= self.start || start >= self.end {
            // no overlap
        } else if width == old_w && end - start == old_span {
            // Scroll: shift the surviving columns and realign the new grid
            // onto the old one so they stay exact.
            let (pos_old, pos_new) = if self.offsets[0] < offsets[0] {
                (((offsets[0] - self.offsets[0]) as f64 / fpp) as usize, 0)
            } else {
                (0, ((self.offsets[0] - offsets[0]) as f64 / fpp) as usize)
            };
            let keep = width.saturating_sub(pos_new.max(pos_old));

            values[pos_new * stride..(pos_new + keep) * stride]
                .copy_from_slice(&self.values[pos_old * stride..(pos_old + keep) * stride]);

            let shift = self.offsets[pos_old] as i64 - offsets[pos_new] as i64;
            for o in offsets.iter_mut() {
                *o = (*o as i64 + shift).max(0) as u64;
            }

            if fpp >= 1.0 {
                states[pos_new..pos_new + keep]
                    .copy_from_slice(&self.states[pos_old..pos_old + keep]);
            } else {
                states[pos_new..pos_new + keep].fill(ColumnState::Dirty);
            }
        } else if end - start > old_span {
            // Zoom out: known old columns seed the new column they fall in.
            let (mut po, mut pn) = (0, 0);
            loop {
                while po < old_w
                    && (self.states[po] == ColumnState::Unknown
                        || self.offsets[po + 1] < offsets[pn])
                {
                    po += 1;
                }
                if po == old_w {
                    break;
                }
                while pn < width && self.offsets[po] > offsets[pn] {
                    pn += 1;
                }
                if pn == width {
                    break;
                }
                states[pn] = ColumnState::Dirty;
                values[pn * stride..(pn + 1) * stride]
                    .copy_from_slice(&self.values[po * stride..(po + 1) * stride]);
                pn += 1;
            }
        } else {
            // Zoom in: each known old column covers several new ones, which
            // all take its envelope and count as final. Finer extrema inside
            // the old column are not recovered until the next invalidate.
            let (mut po, mut pn) = (0, 0);
            loop {
                while po < old_w
                    && (self.states[po] == ColumnState::Unknown
                        || self.offsets[po + 1] < offsets[pn])
                {
                    po += 1;
                }
                if po == old_w {
                    break;
                }
                while pn < width && offsets[pn] < self.offsets[po] {
                    pn += 1;
                }
                if pn == width {
                    break;
                }
                let mut last = pn;
                while last + 1 < width && offsets[last + 1] < self.offsets[po + 1] {
                    last += 1;
                }
                for col in pn..=last {
                    states[col] = ColumnState::Done;
                    values[col * stride..(col + 1) * stride]
                        .copy_from_slice(&self.values[po * stride..(po + 1) * stride]);
                }
                pn = last + 1;
                po += 1;
            }
        }

        for o in offsets.iter_mut() {
            *o = (*o).min(limit);
        }

        self.start = start;
        self.end = end;
        self.width = width;
        self.values = values;
        self.offsets = offsets;
        self.states = states;

        if self.handle.is_none() {
            self.mark_failed();
        }
    }

    /// Fewer frames than pixels: show individual samples, all in one go.
    fn fetch_samples(&mut self, chunk: &Chunk) {
        let ch = chunk.format().channels as usize;
        let first = self.offsets[0];
        let frames = (self.offsets[self.width - 1] - first + 1) as usize;
        self.samples.clear();
        self.samples.resize(frames * ch, 0.0);

        if let Some(handle) = self.handle.as_ref() {
            match handle.read_float(first, frames, &mut self.samples) {
                Ok(got) => self.frames_fetched += got as u64,
                Err(e) => {
                    warn!("waveform: {e}");
                    self.samples.fill(0.0);
                }
            }
        }

        for col in 0..self.width {
            let at = (self.offsets[col] - first) as usize * ch;
            for c in 0..ch {
                let s = self.samples[at + c];
                let i = (col * ch + c) * 2;
                self.values[i] = s;
                self.values[i + 1] = s;
            }
        }
        self.states.fill(ColumnState::Done);
        self.handle = None;
    }

    /// Recompute one run of stale columns, at most one block's worth.
    fn compute_run(&mut self, fpp: f64) -> Option<Range<usize>> {
        let first = self
            .states
            .iter()
            .position(|s| *s == ColumnState::Unknown)
            .or_else(|| self.states.iter().position(|s| *s == ColumnState::Dirty));
        let Some(first) = first else {
            self.handle = None;
            return None;
        };

        let ch = self.channels();
        let block_frames = (self.block_bytes / (ch * 4)) as f64;
        let per_update = ((block_frames / fpp).round() as usize).max(1);
        let mut run_end = first + 1;
        while run_end < first + per_update
            && run_end < self.width
            && self.states[run_end] != ColumnState::Done
        {
            run_end += 1;
        }
        self.states[first..run_end].fill(ColumnState::Done);

        let from = self.offsets[first];
        let frames = (self.offsets[run_end] - from).max(1) as usize;
        self.samples.clear();
        self.samples.resize(frames * ch, 0.0);

        let got = match self.handle.as_ref().map(|h| h.read_float(from, frames, &mut self.samples)) {
            Some(Ok(got)) => got,
            Some(Err(e)) => {
                warn!("waveform: {e}");
                self.states.fill(ColumnState::Done);
                return Some(0..self.width);
            }
            None => return None,
        };
        self.frames_fetched += got as u64;

        for col in first..run_end {
            let lo = (self.offsets[col] - from) as usize;
            let hi = ((self.offsets[col + 1] - from) as usize).min(got);
            for c in 0..ch {
                let i = (col * ch + c) * 2;
                let (mut min, mut max) = (f32::INFINITY, f32::NEG_INFINITY);
                for f in lo..hi {
                    let s = self.samples[f * ch + c];
                    min = min.min(s);
                    max = max.max(s);
                }
                if lo >= hi {
                    (min, max) = (0.0, 0.0);
                }
                self.values[i] = min;
                self.values[i + 1] = max;
            }
        }

        Some(first..run_end)
    }

    /// Vertical line segments per channel for a drawing area `height`
    /// pixels tall, channels stacked top to bottom. Unknown columns are
    /// skipped; neighbouring lines are stretched so the trace stays joined.
    pub fn segments(&self, height: usize, scale: f32) -> Vec<Vec<Segment>> {
        let ch = self.channels();
        let lane = height as f32 / ch as f32;
        let half = (lane / 2.0 - 1.0).max(1.0);

        (0..ch)
            .map(|c| {
                let middle = lane * c as f32 + lane / 2.0;
                let mut out: Vec<Segment> = Vec::with_capacity(self.width);
                let mut last: Option<Segment> = None;

                for col in 0..self.width {
                    if self.states[col] == ColumnState::Unknown {
                        last = None;
                        continue;
                    }
                    let (min, max) = self.envelope(col, c);
                    let min = (min * scale).clamp(-1.0, 1.0);
                    let max = (max * scale).clamp(-1.0, 1.0);
                    let mut top = (middle - max * half).round() as i32;
                    let mut bottom = (middle - min * half).round() as i32;

                    if let Some(prev) = last {
                        if top > prev.bottom + 1 {
                            top = prev.bottom + 1;
                        } else if bottom < prev.top - 1 {
                            bottom = prev.top - 1;
                        }
                    }

                    let seg = Segment { x: col, top, bottom };
                    out.push(seg);
                    last = Some(seg);
                }
                out
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datasource::DataSource;
    use crate::format::{SampleEncoding, SampleFormat};

    fn mono_float(samples: &[f32]) -> Chunk {
        let fmt = SampleFormat::new(1, 8_000, SampleEncoding::F32);
        Chunk::from_source(DataSource::from_float(fmt, samples))
    }

    /// Frame i holds (i mod 1000) / 1000.
    fn sawtooth(frames: usize) -> Chunk {
        let s: Vec<f32> = (0..frames).map(|i| (i % 1_000) as f32 / 1_000.0).collect();
        mono_float(&s)
    }

    fn settle(cache: &mut ViewCache, chunk: &Chunk, start: u64, end: u64, width: usize) -> usize {
        let mut ticks = 0;
        cache.update(chunk, start, end, width);
        while !cache.is_fully_updated() {
            cache.update(chunk, start, end, width);
            ticks += 1;
            assert!(ticks < 10_000, "cache never settled");
        }
        ticks
    }

    #[test]
    fn envelope_matches_samples() {
        let chunk = sawtooth(10_000);
        let mut cache = ViewCache::new(4_000);
        settle(&mut cache, &chunk, 0, 10_000, 10);

        for col in 0..10 {
            assert_eq!(cache.state(col), ColumnState::Done);
            let (min, max) = cache.envelope(col, 0);
            assert_eq!(min, 0.0);
            assert!((max - 0.999).abs() < 1e-6);
        }
        assert_eq!(cache.frames_fetched(), 10_000);
    }

    #[test]
    fn work_per_tick_is_bounded() {
        let chunk = sawtooth(100_000);
        // 1000 frames per read at 100 frames per pixel
        let mut cache = ViewCache::new(4_000);
        cache.update(&chunk, 0, 100_000, 1_000);
        let updated = cache.update(&chunk, 0, 100_000, 1_000).unwrap();
        assert_eq!(updated, 0..10);
        assert_eq!(cache.frames_fetched(), 1_000);
        assert!(!cache.is_fully_updated());
    }

    #[test]
    fn settled_cache_is_a_no_op() {
        let chunk = sawtooth(5_000);
        let mut cache = ViewCache::new(1 << 20);
        settle(&mut cache, &chunk, 0, 5_000, 50);
        let fetched = cache.frames_fetched();
        assert_eq!(cache.update(&chunk, 0, 5_000, 50), None);
        assert_eq!(cache.frames_fetched(), fetched);
        assert_eq!(chunk.open_count(), 0);
    }

    #[test]
    fn scrolling_reuses_computed_columns() {
        let chunk = sawtooth(50_000);
        let mut cache = ViewCache::new(1 << 20);
        let (width, fpp) = (100usize, 100u64);
        settle(&mut cache, &chunk, 10_000, 10_000 + width as u64 * fpp, width);

        for d in [250u64, 1_000, 3_333] {
            let before = cache.frames_fetched();
            let (s, e) = cache.range();
            settle(&mut cache, &chunk, s + d, e + d, width);
            let recomputed = d.div_ceil(fpp);
            assert!(
                cache.frames_fetched() - before <= recomputed * fpp,
                "shift {d}: fetched {}",
                cache.frames_fetched() - before
            );
        }

        // scrolling back left reuses too
        let before = cache.frames_fetched();
        let (s, e) = cache.range();
        settle(&mut cache, &chunk, s - 500, e - 500, width);
        assert!(cache.frames_fetched() - before <= 5 * fpp);
    }

    #[test]
    fn scrolled_columns_stay_exact() {
        let s: Vec<f32> = (0..20_000).map(|i| ((i as f32) * 0.37).sin()).collect();
        let chunk = mono_float(&s);
        let mut cache = ViewCache::new(1 << 20);
        settle(&mut cache, &chunk, 0, 10_000, 100);
        settle(&mut cache, &chunk, 1_550, 11_550, 100);

        // the shifted grid realigns to the old one, so compare sample ranges
        for col in 0..100 {
            let (lo, hi) = (cache.offsets[col] as usize, cache.offsets[col + 1] as usize);
            let want_min = s[lo..hi].iter().cloned().fold(f32::INFINITY, f32::min);
            let want_max = s[lo..hi].iter().cloned().fold(f32::NEG_INFINITY, f32::max);
            assert_eq!(cache.envelope(col, 0), (want_min, want_max), "col {col}");
        }
    }

    #[test]
    fn zoom_out_seeds_dirty_columns() {
        let chunk = sawtooth(40_000);
        let mut cache = ViewCache::new(1 << 20);
        settle(&mut cache, &chunk, 10_000, 20_000, 100);
        cache.update(&chunk, 0, 40_000, 100);

        let dirty = (0..100)
            .filter(|&c| cache.state(c) == ColumnState::Dirty)
            .count();
        assert!(dirty > 0);
        assert!((0..100).all(|c| cache.state(c) != ColumnState::Done));

        settle(&mut cache, &chunk, 0, 40_000, 100);
        assert!((0..100).all(|c| cache.state(c) == ColumnState::Done));
    }

    #[test]
    fn zoom_in_broadcasts_parent_columns() {
        let chunk = sawtooth(40_000);
        let mut cache = ViewCache::new(1 << 20);
        settle(&mut cache, &chunk, 0, 40_000, 100);
        let fetched = cache.frames_fetched();

        cache.update(&chunk, 10_000, 12_000, 100);
        let done = (0..100)
            .filter(|&c| cache.state(c) == ColumnState::Done)
            .count();
        assert!(done >= 90, "only {done} columns inherited");
        // inherited columns carry the coarse parent envelope
        assert_eq!(cache.envelope(50, 0), (0.0, 0.999));

        settle(&mut cache, &chunk, 10_000, 12_000, 100);
        assert_eq!(cache.frames_fetched(), fetched);
    }

    #[test]
    fn sub_sample_zoom_reads_frames_directly() {
        let chunk = mono_float(&[0.0, 0.25, 0.5, 0.75, -1.0]);
        let mut cache = ViewCache::new(1 << 20);
        settle(&mut cache, &chunk, 0, 5, 20);
        assert_eq!(cache.envelope(0, 0), (0.0, 0.0));
        assert_eq!(cache.envelope(9, 0), (0.5, 0.5));
        assert_eq!(cache.envelope(19, 0), (-1.0, -1.0));
        assert!((0..20).all(|c| cache.state(c) == ColumnState::Done));
    }

    #[test]
    fn chunk_change_invalidates_everything() {
        let a = sawtooth(10_000);
        let b = mono_float(&vec![-0.5; 10_000]);
        let mut cache = ViewCache::new(1 << 20);
        settle(&mut cache, &a, 0, 10_000, 10);
        settle(&mut cache, &b, 0, 10_000, 10);
        for col in 0..10 {
            assert_eq!(cache.envelope(col, 0), (-0.5, -0.5));
        }
    }

    #[test]
    fn unreadable_chunk_draws_flat() {
        let fmt = SampleFormat::new(1, 8_000, SampleEncoding::S16);
        let gone = Chunk::from_source(DataSource::temp_file(
            fmt,
            1_000,
            "/nonexistent/wavedit/gone.wav",
            44,
        ));
        let mut cache = ViewCache::new(1 << 20);
        assert_eq!(cache.update(&gone, 0, 1_000, 10), Some(0..10));
        assert!(cache.is_fully_updated());
        assert!((0..10).all(|c| cache.state(c) == ColumnState::Done));
        assert_eq!(cache.envelope(3, 0), (0.0, 0.0));
        assert_eq!(cache.update(&gone, 0, 1_000, 10), None);
    }

    #[test]
    fn empty_range_resets_columns() {
        let chunk = sawtooth(1_000);
        let mut cache = ViewCache::new(1 << 20);
        assert_eq!(cache.update(&chunk, 0, 0, 30), Some(0..30));
        assert_eq!(cache.width(), 30);
        assert!((0..30).all(|c| cache.state(c) == ColumnState::Unknown));
        assert_eq!(cache.frames_fetched(), 0);

        // nothing to redraw until the empty view itself changes
        assert_eq!(cache.update(&chunk, 0, 0, 30), None);
        assert_eq!(cache.update(&chunk, 0, 0, 40), Some(0..40));
        assert!(cache.is_fully_updated());
    }

    #[test]
    fn invalidate_recomputes() {
        let chunk = sawtooth(10_000);
        let mut cache = ViewCache::new(1 << 20);
        settle(&mut cache, &chunk, 0, 10_000, 10);
        cache.invalidate();
        assert!(!cache.is_fully_updated());
        settle(&mut cache, &chunk, 0, 10_000, 10);
        assert_eq!(cache.frames_fetched(), 20_000);
    }

    #[test]
    fn segments_skip_unknown_and_stack_channels() {
        let chunk = sawtooth(10_000);
        let mut cache = ViewCache::new(4_000);
        cache.update(&chunk, 0, 10_000, 10);
        cache.update(&chunk, 0, 10_000, 10);

        let segs = cache.segments(100, 1.0);
        assert_eq!(segs.len(), 1);
        // 4000 bytes = 1000 frames = one column per tick
        assert_eq!(segs[0].len(), 1);
        let s = segs[0][0];
        assert_eq!(s.x, 0);
        assert!(s.top < s.bottom);
        assert_eq!(s.bottom, 50);
    }
}
