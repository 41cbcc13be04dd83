// src/session/mod.rs

pub mod history;

use std::ops::Range;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::{debug, info};

use crate::chunk::Chunk;
use crate::config::EditorConfig;
use crate::decoder::{DecodeBackend, EncodeBackend, HoundEncoder};
use crate::error::{EditError, EditResult};
use crate::player::{Player, shift};
use crate::progress::Progress;
use crate::tempfile::TempStore;

pub use history::{EditHistory, Snapshot};

/// Position after a move of `move_dist` frames at `move_start`, never
/// landing before `move_start`.
fn moved(pos: u64, move_start: u64, move_dist: i64) -> u64 {
    if pos < move_start {
        return pos;
    }
    shift(pos, move_start, move_dist).max(move_start as i64) as u64
}

/// One open recording: its chunk, what the user is looking at and the
/// undo history of everything done to it.
pub struct Document {
    chunk: Chunk,
    path: Option<PathBuf>,
    view: Range<u64>,
    selection: Range<u64>,
    cursor: u64,
    follow: bool,
    history: EditHistory,
    store: TempStore,
    encoder: Arc<dyn EncodeBackend>,
    player: Option<Arc<Player>>,
    /// Set while this document owns the player's output.
    playing: bool,
}

impl Document {
    pub fn new(chunk: Chunk, config: &EditorConfig) -> Self {
        Self::with_store(
            chunk,
            TempStore::from_config(config),
            Arc::new(HoundEncoder),
            config.history_limit,
        )
    }

    pub fn with_store(
        chunk: Chunk,
        store: TempStore,
        encoder: Arc<dyn EncodeBackend>,
        history_limit: usize,
    ) -> Self {
        let frames = chunk.frames();
        Self {
            chunk,
            path: None,
            view: 0..frames,
            selection: 0..0,
            cursor: 0,
            follow: false,
            history: EditHistory::new(history_limit),
            store,
            encoder,
            player: None,
            playing: false,
        }
    }

    /// Load `path` through `decoder` into a fresh document.
    pub fn open(
        path: &Path,
        decoder: Arc<dyn DecodeBackend>,
        config: &EditorConfig,
    ) -> EditResult<Self> {
        let chunk = Chunk::load(path, decoder)?;
        let mut doc = Self::new(chunk, config);
        doc.path = Some(path.to_path_buf());
        Ok(doc)
    }

    pub fn chunk(&self) -> &Chunk {
        &self.chunk
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn view(&self) -> Range<u64> {
        self.view.clone()
    }

    pub fn selection(&self) -> Range<u64> {
        self.selection.clone()
    }

    pub fn cursor(&self) -> u64 {
        self.cursor
    }

    pub fn follow_mode(&self) -> bool {
        self.follow
    }

    pub fn set_follow_mode(&mut self, follow: bool) {
        self.follow = follow;
    }

    pub fn store(&self) -> &TempStore {
        &self.store
    }

    pub fn attach_player(&mut self, player: Arc<Player>) {
        self.player = Some(player);
    }

    fn is_playing(&self) -> bool {
        self.playing
            && self
                .player
                .as_ref()
                .is_some_and(|p| p.is_playing_chunk(&self.chunk))
    }

    fn snapshot(&self) -> Snapshot {
        Snapshot {
            chunk: self.chunk.clone(),
            view: self.view.clone(),
            selection: self.selection.clone(),
            cursor: self.cursor,
        }
    }

    // --- view, selection, cursor ---

    pub fn set_view(&mut self, start: u64, end: u64) {
        let (start, end) = if start > end { (end, start) } else { (start, end) };
        let frames = self.chunk.frames();
        let end = end.min(frames);
        self.view = start.min(end)..end;
    }

    pub fn scroll(&mut self, distance: i64) {
        let frames = self.chunk.frames() as i64;
        let (start, end) = (self.view.start as i64, self.view.end as i64);
        let distance = if start + distance < 0 {
            -start
        } else if end + distance > frames {
            frames - end
        } else {
            distance
        };
        self.set_view((start + distance) as u64, (end + distance) as u64);
    }

    /// Narrow (`factor` > 1) or widen the view around its centre, or
    /// around the cursor when `follow_cursor` is set and it is visible.
    pub fn zoom(&mut self, factor: f32, follow_cursor: bool) {
        let frames = self.chunk.frames() as i64;
        let dist = (self.view.end - self.view.start) as i64;
        let new_dist = (dist as f32 / factor) as i64;
        if new_dist >= frames {
            self.set_view(0, frames as u64);
            return;
        }
        let new_dist = new_dist.max(1);

        let cursor_visible = self.view.contains(&self.cursor) || self.cursor == self.view.end;
        let mut start = if follow_cursor && cursor_visible {
            self.cursor as i64 - new_dist / 2
        } else {
            self.view.start as i64 + (dist - new_dist) / 2
        };
        start = start.max(0);
        let mut end = start + new_dist;
        if end > frames {
            end = frames;
            start = end - new_dist;
        }
        self.set_view(start as u64, end as u64);
    }

    /// Select `start..end` in either order. An empty selection is stored
    /// as `0..0`.
    pub fn set_selection(&mut self, start: u64, end: u64) {
        let (start, end) = if start > end { (end, start) } else { (start, end) };
        let frames = self.chunk.frames();
        let (start, end) = (start.min(frames), end.min(frames));
        self.selection = if start == end { 0..0 } else { start..end };
    }

    /// Move the cursor. While this document is playing the request
    /// becomes a seek and the cursor catches up through
    /// [`follow_playback`](Self::follow_playback).
    pub fn set_cursor(&mut self, pos: u64) {
        let pos = pos.min(self.chunk.frames());
        if self.is_playing() {
            if let Some(player) = &self.player {
                player.set_position(pos);
            }
            return;
        }
        self.cursor = pos;
    }

    /// Pull the play position into the cursor. In follow mode the view
    /// pages along with it. Returns the position while still playing.
    pub fn follow_playback(&mut self) -> Option<u64> {
        if !self.playing {
            return None;
        }
        let pos = self.player.as_ref().and_then(|p| p.poll());
        match pos {
            Some(pos) => self.move_cursor_with_playback(pos),
            None => {
                self.playing = false;
                self.cursor = self.selection.start.min(self.chunk.frames());
            }
        }
        pos
    }

    fn move_cursor_with_playback(&mut self, pos: u64) {
        let pos = pos.min(self.chunk.frames());
        if pos == self.cursor {
            return;
        }
        if self.follow {
            let frames = self.chunk.frames() as i64;
            let (vs, ve) = (self.view.start as i64, self.view.end as i64);
            let dist = ve - vs;
            let (old, new) = (self.cursor as i64, pos as i64);

            let (mut start, mut end) = if old < ve && new > ve && new < ve + dist {
                (ve, ve + dist)
            } else if new >= vs && new < ve {
                (vs, ve)
            } else {
                (new - dist / 2, new - dist / 2 + dist)
            };
            if start < 0 {
                end -= start;
                start = 0;
            } else if end > frames {
                end = frames;
                start = end - dist;
            }
            self.set_view(start as u64, end as u64);
        }
        self.cursor = pos;
    }

    /// Play the selection, or from the cursor to the end when nothing is
    /// selected.
    pub fn play(&mut self) -> EditResult<bool> {
        let Some(player) = self.player.clone() else {
            return Ok(false);
        };
        let (start, end) = if self.selection.is_empty() {
            (self.cursor, self.chunk.frames())
        } else {
            (self.selection.start, self.selection.end)
        };
        let started = player.play(&self.chunk, start, end)?;
        self.playing = started;
        Ok(started)
    }

    pub fn stop(&mut self) {
        if let Some(player) = &self.player {
            if self.playing {
                player.stop();
            }
        }
    }

    // --- editing ---

    /// Install `chunk` as the new state. Material from `move_start` on
    /// shifted by `move_dist` frames; view, selection and cursor follow.
    pub fn update(&mut self, chunk: Chunk, move_start: u64, move_dist: i64) {
        self.history.checkpoint(&self.snapshot());
        self.history.discard_future();

        let playing = self.is_playing();
        let (old, new) = (self.chunk.format(), chunk.format());
        if playing && (old.channels != new.channels || old.rate != new.rate) {
            self.stop();
        }
        self.chunk = chunk;
        let frames = self.chunk.frames();

        if self.view.end - self.view.start >= frames {
            self.view = 0..frames;
        } else if self.view.end > frames {
            let over = self.view.end - frames;
            self.view = self.view.start - over..frames;
        }

        let mut sel = self.selection.clone();
        if sel.start >= move_start {
            sel.start = moved(sel.start, move_start, move_dist);
            sel.end = moved(sel.end, move_start, move_dist);
        }
        if sel.start >= frames || sel.is_empty() {
            sel = 0..0;
        } else if sel.end > frames {
            sel.end = frames;
        }
        self.selection = sel;

        if self.is_playing_after_edit(playing) {
            if let Some(player) = &self.player {
                player.switch(&self.chunk, move_start, move_dist);
                self.playing = player.is_playing();
            }
        } else {
            self.cursor = moved(self.cursor, move_start, move_dist);
        }
        self.cursor = self.cursor.min(frames);

        self.history.checkpoint(&self.snapshot());
        debug!("document now {} frames", frames);
    }

    fn is_playing_after_edit(&self, was_playing: bool) -> bool {
        was_playing && self.player.as_ref().is_some_and(|p| p.is_playing())
    }

    /// Run `op` over the selection, or the whole chunk when nothing or
    /// everything is selected, and splice the result back. On error the
    /// document is left as it was.
    pub fn apply_to_selection<F>(&mut self, op: F) -> EditResult<()>
    where
        F: FnOnce(&Chunk) -> EditResult<Chunk>,
    {
        let sel = self.selection.clone();
        if sel.is_empty() || (sel.start == 0 && sel.end >= self.chunk.frames()) {
            let chunk = op(&self.chunk)?;
            self.update(chunk, 0, 0);
            return Ok(());
        }

        let part = self.chunk.get_part(sel.start, sel.end - sel.start);
        let part_frames = part.frames();
        let applied = op(&part)?;
        let applied_frames = applied.frames();
        let chunk = self.chunk.replace_part(sel.start, part_frames, &applied);
        let dist = applied_frames as i64 - part_frames as i64;

        if applied_frames > part_frames {
            self.update(chunk, sel.start + part_frames, dist);
        } else {
            self.update(chunk, sel.start + applied_frames, dist);
        }
        Ok(())
    }

    /// The selected frames, if anything is selected.
    pub fn copy(&self) -> Option<Chunk> {
        let sel = &self.selection;
        (!sel.is_empty()).then(|| self.chunk.get_part(sel.start, sel.end - sel.start))
    }

    pub fn cut(&mut self) -> Option<Chunk> {
        let clip = self.copy()?;
        self.delete();
        Some(clip)
    }

    pub fn delete(&mut self) -> bool {
        let sel = self.selection.clone();
        if sel.is_empty() {
            return false;
        }
        let len = sel.end - sel.start;
        let chunk = self.chunk.remove_part(sel.start, len);
        self.update(chunk, sel.start, -(len as i64));
        true
    }

    /// Keep only the selection.
    pub fn crop(&mut self) -> bool {
        let sel = self.selection.clone();
        if sel.is_empty() {
            return false;
        }
        let chunk = self.chunk.get_part(sel.start, sel.end - sel.start);
        self.update(chunk, 0, -(sel.start as i64));
        true
    }

    fn check_format(&self, clip: &Chunk) -> EditResult<()> {
        if clip.format() != self.chunk.format() {
            return Err(EditError::Incompatible {
                expected: *self.chunk.format(),
                found: *clip.format(),
            });
        }
        Ok(())
    }

    /// Insert `clip` at the cursor and select it.
    pub fn paste(&mut self, clip: &Chunk) -> EditResult<()> {
        self.check_format(clip)?;
        let at = self.cursor;
        let chunk = self.chunk.insert(clip, at);
        self.update(chunk, at, clip.frames() as i64);
        self.set_selection(at, at + clip.frames());
        Ok(())
    }

    /// Overwrite from the cursor on with `clip`, extending the chunk if it
    /// runs past the end.
    pub fn paste_over(&mut self, clip: &Chunk) -> EditResult<()> {
        self.check_format(clip)?;
        let at = self.cursor;
        let covered = (self.chunk.frames() - at).min(clip.frames());
        let chunk = self.chunk.replace_part(at, covered, clip);
        self.update(chunk, 0, 0);
        self.set_selection(at, at + clip.frames());
        Ok(())
    }

    /// Mix `clip` into the material starting at the cursor.
    pub fn mix_paste(&mut self, clip: &Chunk, progress: &Progress) -> EditResult<()> {
        self.check_format(clip)?;
        let at = self.cursor;
        let covered = (self.chunk.frames() - at).min(clip.frames());
        let part = self.chunk.get_part(at, covered);
        let mixed = part.mix(clip, &self.store, progress)?;
        let chunk = self.chunk.replace_part(at, covered, &mixed);
        self.update(chunk, 0, 0);
        self.set_selection(at, at + clip.frames());
        Ok(())
    }

    pub fn fade_in(&mut self, progress: &Progress) -> EditResult<()> {
        let store = self.store.clone();
        self.apply_to_selection(|c| c.fade(0.0, 1.0, &store, progress))
    }

    pub fn fade_out(&mut self, progress: &Progress) -> EditResult<()> {
        let store = self.store.clone();
        self.apply_to_selection(|c| c.fade(1.0, 0.0, &store, progress))
    }

    // --- history ---

    pub fn can_undo(&self) -> bool {
        self.history.can_undo()
    }

    pub fn can_redo(&self) -> bool {
        self.history.can_redo()
    }

    pub fn undo(&mut self) -> bool {
        if !self.can_undo() {
            return false;
        }
        self.stop();
        let present = self.snapshot();
        match self.history.undo(&present) {
            Some(snapshot) => {
                self.restore(snapshot);
                true
            }
            None => false,
        }
    }

    pub fn redo(&mut self) -> bool {
        if !self.can_redo() {
            return false;
        }
        self.stop();
        let present = self.snapshot();
        match self.history.redo(&present) {
            Some(snapshot) => {
                self.restore(snapshot);
                true
            }
            None => false,
        }
    }

    fn restore(&mut self, snapshot: Snapshot) {
        let frames = snapshot.chunk.frames();
        self.chunk = snapshot.chunk;
        self.view = snapshot.view;
        self.selection = snapshot.selection;
        self.cursor = snapshot.cursor.min(frames);
    }

    // --- persistence ---

    /// Write the whole chunk to `path`. A successful save becomes the new
    /// baseline: the history is cleared.
    pub fn save(&mut self, path: &Path, progress: &Progress) -> EditResult<()> {
        self.chunk.save(
            path,
            self.encoder.as_ref(),
            self.store.block_bytes(),
            progress,
        )?;
        self.history.clear();
        self.path = Some(path.to_path_buf());
        info!("document saved as {}", path.display());
        Ok(())
    }

    /// Write only the selected frames to `path`.
    pub fn save_selection(&self, path: &Path, progress: &Progress) -> EditResult<bool> {
        let Some(part) = self.copy() else {
            return Ok(false);
        };
        part.save(
            path,
            self.encoder.as_ref(),
            self.store.block_bytes(),
            progress,
        )?;
        Ok(true)
    }
}
