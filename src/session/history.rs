// src/session/history.rs

use std::ops::Range;

use crate::chunk::Chunk;

/// Document state captured for undo: the chunk plus where the user was
/// looking and what they had selected.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub chunk: Chunk,
    pub view: Range<u64>,
    pub selection: Range<u64>,
    pub cursor: u64,
}

impl Snapshot {
    /// A new entry is needed when the chunk or the selection moved on.
    fn differs(&self, other: &Snapshot) -> bool {
        !Chunk::ptr_eq(&self.chunk, &other.chunk) || self.selection != other.selection
    }
}

/// Linear undo/redo over immutable chunk snapshots.
///
/// `current` points at the entry matching the present document state.
/// Entries before it are undo targets, entries after it redo targets.
pub struct EditHistory {
    entries: Vec<Snapshot>,
    current: Option<usize>,
    limit: usize,
}

impl EditHistory {
    pub fn new(limit: usize) -> Self {
        Self {
            entries: Vec::new(),
            current: None,
            // Undo needs the present state plus at least one step back.
            limit: limit.max(2),
        }
    }

    /// Record `present` unless the current entry already describes it.
    /// The new entry goes right after the current one, ahead of any
    /// redo branch.
    pub fn checkpoint(&mut self, present: &Snapshot) {
        let at = match self.current {
            Some(cur) if !self.entries[cur].differs(present) => return,
            Some(cur) => cur + 1,
            None => 0,
        };
        self.entries.insert(at, present.clone());
        self.current = Some(at);
        self.trim();
    }

    fn trim(&mut self) {
        let Some(mut cur) = self.current else {
            return;
        };
        while self.entries.len() > self.limit {
            if cur >= 2 {
                self.entries.remove(0);
                cur -= 1;
            } else {
                self.entries.pop();
            }
        }
        self.current = Some(cur);
    }

    /// Drop every redo target.
    pub fn discard_future(&mut self) {
        if let Some(cur) = self.current {
            self.entries.truncate(cur + 1);
        }
    }

    pub fn can_undo(&self) -> bool {
        self.current.is_some_and(|cur| cur > 0)
    }

    pub fn can_redo(&self) -> bool {
        self.current.is_some_and(|cur| cur + 1 < self.entries.len())
    }

    /// Step back. `present` is checkpointed first so the step can be
    /// redone. Returns the state to restore.
    pub fn undo(&mut self, present: &Snapshot) -> Option<Snapshot> {
        if !self.can_undo() {
            return None;
        }
        self.checkpoint(present);
        let cur = self.current?.checked_sub(1)?;
        self.current = Some(cur);
        Some(self.entries[cur].clone())
    }

    pub fn redo(&mut self, present: &Snapshot) -> Option<Snapshot> {
        if !self.can_redo() {
            return None;
        }
        self.checkpoint(present);
        let cur = self.current? + 1;
        let entry = self.entries.get(cur)?.clone();
        self.current = Some(cur);
        Some(entry)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.current = None;
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::tests::ramp;

    fn snap(chunk: &Chunk, sel: Range<u64>) -> Snapshot {
        Snapshot {
            chunk: chunk.clone(),
            view: 0..chunk.frames(),
            selection: sel,
            cursor: 0,
        }
    }

    #[test]
    fn undo_then_redo_walks_the_line() {
        let a = ramp(10, 0);
        let b = a.remove_part(0, 5);
        let c = b.remove_part(0, 2);
        let mut h = EditHistory::new(100);

        h.checkpoint(&snap(&a, 0..0));
        h.checkpoint(&snap(&b, 0..0));
        assert!(h.can_undo());
        assert!(!h.can_redo());

        let back = h.undo(&snap(&c, 0..0)).unwrap();
        assert!(Chunk::ptr_eq(&back.chunk, &b));
        let back = h.undo(&snap(&b, 0..0)).unwrap();
        assert!(Chunk::ptr_eq(&back.chunk, &a));
        assert!(!h.can_undo());

        let fwd = h.redo(&snap(&a, 0..0)).unwrap();
        assert!(Chunk::ptr_eq(&fwd.chunk, &b));
        let fwd = h.redo(&snap(&b, 0..0)).unwrap();
        assert!(Chunk::ptr_eq(&fwd.chunk, &c));
        assert!(!h.can_redo());
    }

    #[test]
    fn unchanged_state_is_not_recorded_twice() {
        let a = ramp(10, 0);
        let mut h = EditHistory::new(100);
        h.checkpoint(&snap(&a, 0..0));
        h.checkpoint(&snap(&a, 0..0));
        assert_eq!(h.len(), 1);
        h.checkpoint(&snap(&a, 2..4));
        assert_eq!(h.len(), 2);
    }

    #[test]
    fn new_edit_discards_redo_branch() {
        let a = ramp(10, 0);
        let b = a.remove_part(0, 1);
        let c = a.remove_part(0, 2);
        let mut h = EditHistory::new(100);
        h.checkpoint(&snap(&a, 0..0));
        h.checkpoint(&snap(&b, 0..0));
        h.undo(&snap(&b, 0..0)).unwrap();
        assert!(h.can_redo());

        h.discard_future();
        h.checkpoint(&snap(&c, 0..0));
        assert!(!h.can_redo());
        assert_eq!(h.len(), 2);
        let back = h.undo(&snap(&c, 0..0)).unwrap();
        assert!(Chunk::ptr_eq(&back.chunk, &a));
    }

    #[test]
    fn limit_drops_oldest_entries() {
        let mut chunk = ramp(50, 0);
        let first = chunk.clone();
        let mut h = EditHistory::new(3);
        for _ in 0..5 {
            h.checkpoint(&snap(&chunk, 0..0));
            chunk = chunk.remove_part(0, 1);
        }
        assert_eq!(h.len(), 3);
        assert!(h.can_undo());

        let mut present = snap(&chunk, 0..0);
        while let Some(restored) = h.undo(&present) {
            present = restored;
        }
        assert!(!Chunk::ptr_eq(&present.chunk, &first));
    }

    #[test]
    fn history_keeps_chunks_alive() {
        let a = ramp(10, 0);
        let mut h = EditHistory::new(10);
        h.checkpoint(&snap(&a, 0..0));
        let src = std::sync::Arc::clone(a.parts()[0].source());
        drop(a);
        assert_eq!(std::sync::Arc::strong_count(&src), 2);
        h.clear();
        assert_eq!(std::sync::Arc::strong_count(&src), 1);
        assert!(h.is_empty());
    }
}
