// src/player.rs

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use log::{debug, warn};

use crate::chunk::{Chunk, ChunkHandle};
use crate::datasource::UseClass;
use crate::error::EditResult;
use crate::format::SampleFormat;

/// Everything the streaming thread and the control calls share.
#[derive(Default)]
struct PlayState {
    handle: Option<ChunkHandle>,
    pos: u64,
    start: u64,
    end: u64,
}

/// Playback state machine. The output callback pulls frames with
/// [`supply`](Player::supply) while the editor moves the position,
/// changes the range or swaps in an edited chunk. One mutex guards the
/// state for the length of each of those calls.
pub struct Player {
    state: Mutex<PlayState>,
    playing: AtomicBool,
}

impl Default for Player {
    fn default() -> Self {
        Self::new()
    }
}

/// Where `pos` lands after `dist` frames were inserted (positive) or
/// removed (negative) at `move_start`.
pub(crate) fn shift(pos: u64, move_start: u64, move_dist: i64) -> i64 {
    if pos >= move_start {
        pos as i64 + move_dist
    } else {
        pos as i64
    }
}

impl Player {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(PlayState::default()),
            playing: AtomicBool::new(false),
        }
    }

    fn lock(&self) -> MutexGuard<'_, PlayState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Start playing `chunk` between `start` and `end`. An empty range is
    /// not an error, it just plays nothing and returns `false`.
    pub fn play(&self, chunk: &Chunk, start: u64, end: u64) -> EditResult<bool> {
        if start == end {
            return Ok(false);
        }
        self.stop();

        let handle = chunk.open(UseClass::Playback)?;
        let end = end.min(chunk.frames());
        {
            let mut state = self.lock();
            state.handle = Some(handle);
            state.start = start;
            state.end = end;
            state.pos = start;
        }
        self.playing.store(true, Ordering::Release);
        debug!("playing frames {start}..{end}");
        Ok(true)
    }

    /// Fill `out` with native frames from the play position. Returns the
    /// number of frames written; zero once the range is exhausted.
    pub fn supply(&self, out: &mut [u8]) -> usize {
        self.supply_with(|handle, pos, frames| {
            let bpf = handle.chunk().format().bytes_per_frame();
            let frames = frames.min(out.len() / bpf);
            handle.read_raw(pos, frames, &mut out[..frames * bpf])
        })
    }

    /// Like [`supply`](Self::supply) with interleaved f32 samples.
    pub fn supply_float(&self, out: &mut [f32]) -> usize {
        self.supply_with(|handle, pos, frames| {
            let ch = handle.chunk().format().channels as usize;
            let frames = frames.min(out.len() / ch);
            handle.read_float(pos, frames, &mut out[..frames * ch])
        })
    }

    fn supply_with<F>(&self, read: F) -> usize
    where
        F: FnOnce(&ChunkHandle, u64, usize) -> EditResult<usize>,
    {
        if !self.is_playing() {
            return 0;
        }
        let mut state = self.lock();
        let pos = state.pos;
        let left = state.end.saturating_sub(pos);
        let Some(handle) = state.handle.as_ref() else {
            return 0;
        };
        if left == 0 {
            return 0;
        }

        let want = usize::try_from(left).unwrap_or(usize::MAX);
        match read(handle, pos, want) {
            Ok(got) => {
                state.pos += got as u64;
                got
            }
            Err(e) => {
                warn!("playback read at frame {pos} failed: {e}");
                self.halt(&mut state);
                0
            }
        }
    }

    /// Periodic check from the control side: stops playback that ran off
    /// the end and otherwise reports the current position.
    pub fn poll(&self) -> Option<u64> {
        if !self.is_playing() {
            return None;
        }
        let (pos, finished) = {
            let state = self.lock();
            let frames = state.handle.as_ref().map_or(0, |h| h.chunk().frames());
            (state.pos, state.pos >= state.end || state.pos >= frames)
        };
        if finished {
            self.stop();
            return None;
        }
        Some(pos)
    }

    pub fn stop(&self) {
        if !self.is_playing() {
            return;
        }
        let mut state = self.lock();
        self.halt(&mut state);
    }

    /// Stop with the state lock already held.
    fn halt(&self, state: &mut PlayState) {
        if self.playing.swap(false, Ordering::AcqRel) {
            debug!("playback stopped at frame {}", state.pos);
        }
        state.handle = None;
    }

    pub fn set_position(&self, pos: u64) {
        self.lock().pos = pos;
    }

    pub fn change_range(&self, start: u64, end: u64) {
        let mut state = self.lock();
        state.start = start;
        state.end = end;
    }

    /// Carry on playing an edited version of the current chunk. Frames
    /// from `move_start` on moved by `move_dist`; if the play position was
    /// inside removed material or past the new end, playback stops.
    pub fn switch(&self, chunk: &Chunk, move_start: u64, move_dist: i64) {
        if !self.is_playing() {
            return;
        }
        let frames = chunk.frames() as i64;
        let clamp_bound = |pos: u64| -> u64 {
            let moved = shift(pos, move_start, move_dist);
            if pos < move_start {
                return pos;
            }
            moved.max(move_start as i64).min(frames) as u64
        };

        let mut state = self.lock();
        let new_pos = shift(state.pos, move_start, move_dist);
        if state.pos >= move_start && (new_pos < move_start as i64 || new_pos > frames) {
            self.halt(&mut state);
            return;
        }

        match chunk.open(UseClass::Playback) {
            Ok(handle) => state.handle = Some(handle),
            Err(e) => {
                warn!("could not switch playback to the edited chunk: {e}");
                return;
            }
        }
        state.pos = new_pos as u64;
        state.start = clamp_bound(state.start);
        state.end = clamp_bound(state.end);
    }

    pub fn position(&self) -> u64 {
        self.lock().pos
    }

    pub fn range(&self) -> (u64, u64) {
        let state = self.lock();
        (state.start, state.end)
    }

    pub fn is_playing(&self) -> bool {
        self.playing.load(Ordering::Acquire)
    }

    /// Format of the chunk being played, if any.
    pub fn format(&self) -> Option<SampleFormat> {
        self.lock().handle.as_ref().map(|h| *h.chunk().format())
    }

    /// True when the chunk being played is `chunk` itself.
    pub fn is_playing_chunk(&self, chunk: &Chunk) -> bool {
        self.is_playing()
            && self
                .lock()
                .handle
                .as_ref()
                .is_some_and(|h| Chunk::ptr_eq(h.chunk(), chunk))
    }
}
