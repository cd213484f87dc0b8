//! Bounded three-lane outbound queue.
//!
//! Messages wait here while no connection is live. Each [`Priority`] is a
//! FIFO lane; [`PriorityQueue::dequeue`] always serves the highest non-empty
//! lane. When the queue is full the oldest low-priority message is evicted
//! to make room. The evicted sender is not told: queued traffic is
//! best-effort state sync.

use std::collections::VecDeque;

use switchboard_proto::{Message, Priority};
use tracing::debug;

/// Bounded priority queue of outbound messages.
#[derive(Debug, Clone)]
pub struct PriorityQueue {
    high: VecDeque<Message>,
    normal: VecDeque<Message>,
    low: VecDeque<Message>,
    capacity: usize,
    evicted: u64,
}

impl PriorityQueue {
    /// Create an empty queue holding at most `capacity` messages.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            high: VecDeque::new(),
            normal: VecDeque::new(),
            low: VecDeque::new(),
            capacity,
            evicted: 0,
        }
    }

    /// Maximum number of messages.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of queued messages.
    #[must_use]
    pub fn len(&self) -> usize {
        self.high.len() + self.normal.len() + self.low.len()
    }

    /// Whether the queue is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total messages evicted since creation.
    #[must_use]
    pub const fn evicted(&self) -> u64 {
        self.evicted
    }

    /// Number of queued messages in one lane.
    #[must_use]
    pub fn len_of(&self, priority: Priority) -> usize {
        self.lane(priority).len()
    }

    /// Add a message to the back of its lane.
    ///
    /// Returns `false` only when the queue is full and there is no
    /// low-priority message to evict.
    pub fn enqueue(&mut self, message: Message) -> bool {
        if self.len() >= self.capacity {
            match self.low.pop_front() {
                Some(victim) => {
                    self.evicted += 1;
                    debug!(
                        id = %victim.id,
                        kind = %victim.kind,
                        "evicted low-priority message from full queue"
                    );
                }
                None => return false,
            }
        }
        self.lane_mut(message.priority).push_back(message);
        true
    }

    /// Remove and return the oldest message of the highest non-empty lane.
    pub fn dequeue(&mut self) -> Option<Message> {
        self.high
            .pop_front()
            .or_else(|| self.normal.pop_front())
            .or_else(|| self.low.pop_front())
    }

    /// Put a message back at the front of its lane.
    ///
    /// Used to restore the unsent remainder of a failed flush, so it never
    /// holds more than was drained.
    pub(crate) fn requeue_front(&mut self, message: Message) {
        self.lane_mut(message.priority).push_front(message);
    }

    /// All queued messages in drain order, without removing them.
    #[must_use]
    pub fn get_all(&self) -> Vec<&Message> {
        self.high
            .iter()
            .chain(self.normal.iter())
            .chain(self.low.iter())
            .collect()
    }

    /// Remove all messages in drain order.
    pub fn drain(&mut self) -> Vec<Message> {
        let mut all = Vec::with_capacity(self.len());
        all.extend(self.high.drain(..));
        all.extend(self.normal.drain(..));
        all.extend(self.low.drain(..));
        all
    }

    /// Remove a specific queued message. Returns whether it was found.
    pub fn remove(&mut self, id: &str) -> bool {
        for priority in Priority::ALL {
            let lane = self.lane_mut(priority);
            if let Some(pos) = lane.iter().position(|m| m.id == id) {
                lane.remove(pos);
                return true;
            }
        }
        false
    }

    /// Empty every lane.
    pub fn clear(&mut self) {
        self.high.clear();
        self.normal.clear();
        self.low.clear();
    }

    fn lane(&self, priority: Priority) -> &VecDeque<Message> {
        match priority {
            Priority::High => &self.high,
            Priority::Normal => &self.normal,
            Priority::Low => &self.low,
        }
    }

    fn lane_mut(&mut self, priority: Priority) -> &mut VecDeque<Message> {
        match priority {
            Priority::High => &mut self.high,
            Priority::Normal => &mut self.normal,
            Priority::Low => &mut self.low,
        }
    }
}
