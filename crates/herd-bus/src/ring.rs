use std::collections::VecDeque;

use herd_core::OverflowPolicy;

/// Outcome of pushing a line into a ring buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Pushed {
    /// The line was stored (possibly after evicting the oldest one).
    Stored,
    /// The incoming line was discarded under `DropNewest`.
    Dropped,
    /// The buffer is full under `Block`; nothing was mutated.
    Full,
}

/// Fixed-capacity FIFO of owned text lines with a pluggable overflow policy.
///
/// Peek and pop are separate operations so a caller can attempt a write to
/// a child and only pop once the line has fully drained, retrying partial
/// or would-block writes against the same front line.
#[derive(Debug)]
pub struct RingBuffer {
    items: VecDeque<String>,
    capacity: usize,
    policy: OverflowPolicy,
    dropped: u64,
    delivered: u64,
}

impl RingBuffer {
    /// Capacity of zero is rounded up to one; a ring that can hold nothing
    /// is never useful.
    pub fn new(capacity: usize, policy: OverflowPolicy) -> Self {
        let capacity = capacity.max(1);
        Self {
            items: VecDeque::with_capacity(capacity),
            capacity,
            policy,
            dropped: 0,
            delivered: 0,
        }
    }

    pub fn push(&mut self, line: String) -> Pushed {
        if self.items.len() < self.capacity {
            self.items.push_back(line);
            return Pushed::Stored;
        }
        match self.policy {
            OverflowPolicy::DropOldest => {
                self.items.pop_front();
                self.dropped += 1;
                self.items.push_back(line);
                Pushed::Stored
            }
            OverflowPolicy::DropNewest => {
                self.dropped += 1;
                Pushed::Dropped
            }
            OverflowPolicy::Block => Pushed::Full,
        }
    }

    pub fn peek_front(&self) -> Option<&str> {
        self.items.front().map(String::as_str)
    }

    pub fn pop_front(&mut self) -> Option<String> {
        let line = self.items.pop_front();
        if line.is_some() {
            self.delivered += 1;
        }
        line
    }

    /// Account a line the caller could not store and will not retry.
    ///
    /// A `Full` push leaves the buffer untouched so a synchronous caller
    /// can apply backpressure and try again; a caller with nowhere to hold
    /// the line (fan-out) records the loss here instead, keeping
    /// `delivered + dropped` equal to everything ever offered.
    pub fn record_drop(&mut self) {
        self.dropped += 1;
    }

    /// Discard all queued lines, counting them as dropped so the lifetime
    /// ledger `delivered + dropped` still accounts for every stored line.
    pub fn clear(&mut self) {
        self.dropped += self.items.len() as u64;
        self.items.clear();
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn policy(&self) -> OverflowPolicy {
        self.policy
    }

    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    pub fn delivered(&self) -> u64 {
        self.delivered
    }
}
