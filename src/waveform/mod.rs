// src/waveform/mod.rs

pub mod terminal;
pub mod viewcache;

pub use viewcache::{ColumnState, Segment, ViewCache};
