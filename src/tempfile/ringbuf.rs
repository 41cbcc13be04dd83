// src/tempfile/ringbuf.rs

use ringbuf::HeapRb;
use ringbuf::traits::{Consumer, Observer, Producer};
use sysinfo::System;

/// Byte FIFO holding a temp file's head until it has to spill to disk.
/// Single writer, single reader, both on the thread that owns the temp file.
pub struct RingBuffer {
    rb: HeapRb<u8>,
}

impl RingBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            rb: HeapRb::<u8>::new(capacity.max(1)),
        }
    }

    /// Append as many bytes as fit. Returns how many were taken.
    pub fn enqueue(&mut self, data: &[u8]) -> usize {
        self.rb.push_slice(data)
    }

    /// Remove up to `out.len()` bytes in FIFO order.
    pub fn dequeue(&mut self, out: &mut [u8]) -> usize {
        self.rb.pop_slice(out)
    }

    /// Bytes currently stored.
    pub fn available(&self) -> usize {
        self.rb.occupied_len()
    }

    pub fn capacity(&self) -> usize {
        self.rb.capacity().get()
    }

    pub fn is_full(&self) -> bool {
        self.rb.is_full()
    }
}

/// Ring size derived from installed memory: half of it, rounded down to a
/// whole number of blocks, at least one block and at most `max`.
pub fn system_capacity(block: usize, max: usize) -> usize {
    let mut sys = System::new();
    sys.refresh_memory();
    let total = usize::try_from(sys.total_memory()).unwrap_or(usize::MAX);
    capacity_for(total, block, max)
}

fn capacity_for(total_memory: usize, block: usize, max: usize) -> usize {
    let block = block.max(1);
    let half = total_memory / 2;
    let rounded = (half / block) * block;
    let ceiling = ((max / block) * block).max(block);
    rounded.clamp(block, ceiling)
}
