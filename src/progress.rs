// src/progress.rs

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};

use crate::error::{EditError, EditResult};

/// Messages a long-running operation posts while it works.
#[derive(Debug, Clone, PartialEq)]
pub enum ProgressEvent {
    Begin(String),
    /// Completed fraction in `[0, 1]`.
    Fraction(f32),
    End,
}

/// Reporter handed to mix, fade, save and load.
///
/// Cloning shares the cancel flag, so a UI thread can keep one clone and
/// stop the worker from outside.
#[derive(Clone)]
pub struct Progress {
    tx: Option<Sender<ProgressEvent>>,
    cancel: Arc<AtomicBool>,
}

impl Progress {
    pub fn new() -> (Self, Receiver<ProgressEvent>) {
        let (tx, rx) = mpsc::channel();
        let progress = Self {
            tx: Some(tx),
            cancel: Arc::new(AtomicBool::new(false)),
        };
        (progress, rx)
    }

    /// A reporter nobody listens to. It can still be cancelled.
    pub fn silent() -> Self {
        Self {
            tx: None,
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::Relaxed)
    }

    pub fn begin(&self, label: &str) {
        self.send(ProgressEvent::Begin(label.to_string()));
    }

    /// Post the completed fraction. Returns `Cancelled` once a stop was
    /// requested; the caller must unwind and discard partial output.
    pub fn report(&self, fraction: f32) -> EditResult<()> {
        self.send(ProgressEvent::Fraction(fraction.clamp(0.0, 1.0)));
        if self.is_cancelled() {
            return Err(EditError::Cancelled);
        }
        Ok(())
    }

    pub fn end(&self) {
        self.send(ProgressEvent::End);
    }

    fn send(&self, event: ProgressEvent) {
        if let Some(tx) = &self.tx {
            // A dropped receiver just means nobody is watching.
            let _ = tx.send(event);
        }
    }
}

impl Default for Progress {
    fn default() -> Self {
        Self::silent()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_arrive_in_order() {
        let (progress, rx) = Progress::new();
        progress.begin("Mixing");
        progress.report(0.5).unwrap();
        progress.report(1.5).unwrap();
        progress.end();

        let events: Vec<_> = rx.try_iter().collect();
        assert_eq!(
            events,
            vec![
                ProgressEvent::Begin("Mixing".into()),
                ProgressEvent::Fraction(0.5),
                ProgressEvent::Fraction(1.0),
                ProgressEvent::End,
            ]
        );
    }

    #[test]
    fn cancel_is_shared_between_clones() {
        let progress = Progress::silent();
        let remote = progress.clone();
        assert!(progress.report(0.1).is_ok());
        remote.cancel();
        assert!(matches!(progress.report(0.2), Err(EditError::Cancelled)));
    }
}
