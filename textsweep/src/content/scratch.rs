use std::ops::{Deref, DerefMut};
use std::sync::Mutex;

/// A pool of reusable byte buffers for short reads.
///
/// Owned by the engine and shared with its workers; buffers grown past
/// `max_capacity` are dropped instead of being returned.
#[derive(Debug)]
pub struct ScratchPool {
    buffers: Mutex<Vec<Vec<u8>>>,
    max_retained: usize,
    max_capacity: usize,
}

impl ScratchPool {
    pub fn new(max_retained: usize, max_capacity: usize) -> Self {
        Self {
            buffers: Mutex::new(Vec::with_capacity(max_retained)),
            max_retained,
            max_capacity,
        }
    }

    /// Takes a cleared buffer from the pool, allocating one if none is free
    pub fn take(&self) -> ScratchBuffer<'_> {
        let buffer = self
            .buffers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .pop()
            .unwrap_or_default();
        ScratchBuffer {
            pool: self,
            buffer,
        }
    }

    /// Number of idle buffers
    #[cfg(test)]
    pub(crate) fn idle(&self) -> usize {
        self.buffers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    fn give_back(&self, mut buffer: Vec<u8>) {
        if buffer.capacity() > self.max_capacity {
            return;
        }
        buffer.clear();
        let mut buffers = self
            .buffers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if buffers.len() < self.max_retained {
            buffers.push(buffer);
        }
    }
}

/// A buffer on loan from a [`ScratchPool`], returned on drop
pub struct ScratchBuffer<'a> {
    pool: &'a ScratchPool,
    buffer: Vec<u8>,
}

impl Deref for ScratchBuffer<'_> {
    type Target = Vec<u8>;

    fn deref(&self) -> &Vec<u8> {
        &self.buffer
    }
}

impl DerefMut for ScratchBuffer<'_> {
    fn deref_mut(&mut self) -> &mut Vec<u8> {
        &mut self.buffer
    }
}

impl Drop for ScratchBuffer<'_> {
    fn drop(&mut self) {
        self.pool.give_back(std::mem::take(&mut self.buffer));
    }
}
