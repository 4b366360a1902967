//! Output channel pool
//!
//! The capture engine exposes a small fixed set of output channels. Sessions
//! borrow slots from a [`ChannelAllocator`] for as long as they hold sources
//! bound to them.

use crate::error::AllocationError;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, warn};

/// Number of output channels the engine exposes
pub const MAX_CHANNELS: usize = 64;

/// Largest number of slots one request may take (video + two audio)
pub const MAX_PER_REQUEST: usize = 3;

/// Fixed-size arena of channel slots.
///
/// All bookkeeping happens under one lock, so an acquisition either takes
/// every requested slot or none of them.
#[derive(Debug)]
pub struct ChannelAllocator {
    slots: Mutex<Vec<bool>>,
}

impl ChannelAllocator {
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: Mutex::new(vec![false; capacity]),
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.lock().len()
    }

    /// Take `count` distinct free slots, lowest index first.
    pub fn acquire(&self, count: usize) -> Result<Vec<usize>, AllocationError> {
        if count == 0 || count > MAX_PER_REQUEST {
            return Err(AllocationError::InvalidCount(count));
        }

        let mut slots = self.slots.lock();
        let free: Vec<usize> = slots
            .iter()
            .enumerate()
            .filter(|(_, used)| !**used)
            .map(|(index, _)| index)
            .take(count)
            .collect();

        if free.len() < count {
            let available = slots.iter().filter(|used| !**used).count();
            warn!(
                "Channel pool exhausted (requested {}, {} free)",
                count, available
            );
            return Err(AllocationError::Exhausted {
                requested: count,
                available,
            });
        }

        for &index in &free {
            slots[index] = true;
        }
        debug!("Acquired channels {:?}", free);
        Ok(free)
    }

    /// Return slots to the pool. Already-free or out-of-range indices are ignored.
    pub fn release(&self, indices: &[usize]) {
        let mut slots = self.slots.lock();
        for &index in indices {
            match slots.get_mut(index) {
                Some(used) => *used = false,
                None => warn!("Ignoring release of out-of-range channel {}", index),
            }
        }
        debug!("Released channels {:?}", indices);
    }

    /// Acquire slots wrapped in a guard that releases them on drop.
    pub fn lease(self: &Arc<Self>, count: usize) -> Result<ChannelLease, AllocationError> {
        let indices = self.acquire(count)?;
        Ok(ChannelLease {
            allocator: Arc::clone(self),
            indices,
        })
    }

    /// Indices currently handed out, ascending
    pub fn in_use(&self) -> Vec<usize> {
        self.slots
            .lock()
            .iter()
            .enumerate()
            .filter(|(_, used)| **used)
            .map(|(index, _)| index)
            .collect()
    }

    pub fn available(&self) -> usize {
        self.slots.lock().iter().filter(|used| !**used).count()
    }
}

impl Default for ChannelAllocator {
    fn default() -> Self {
        Self::new(MAX_CHANNELS)
    }
}

/// Slots held on behalf of one owner.
#[derive(Debug)]
pub struct ChannelLease {
    allocator: Arc<ChannelAllocator>,
    indices: Vec<usize>,
}

impl ChannelLease {
    pub fn indices(&self) -> &[usize] {
        &self.indices
    }

    /// First (and for single-slot leases, only) index
    pub fn index(&self) -> usize {
        self.indices[0]
    }
}

impl Drop for ChannelLease {
    fn drop(&mut self) {
        self.allocator.release(&self.indices);
    }
}
