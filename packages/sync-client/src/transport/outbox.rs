//! Bounded queue of messages held while disconnected

use std::collections::VecDeque;

use crate::protocol::ClientMessage;

/// FIFO of pending outbound messages with drop-oldest overflow
#[derive(Debug, Clone)]
pub struct Outbox {
    messages: VecDeque<ClientMessage>,
    capacity: usize,
}

impl Outbox {
    pub fn new(capacity: usize) -> Self {
        Self {
            messages: VecDeque::new(),
            capacity,
        }
    }

    /// Append a message, evicting the oldest when full
    ///
    /// Returns the evicted message, if any. The queue never exceeds its
    /// capacity; with a capacity of zero the message itself is returned.
    pub fn push(&mut self, message: ClientMessage) -> Option<ClientMessage> {
        if self.capacity == 0 {
            return Some(message);
        }

        let evicted = if self.messages.len() >= self.capacity {
            self.messages.pop_front()
        } else {
            None
        };
        self.messages.push_back(message);
        evicted
    }

    pub fn pop_front(&mut self) -> Option<ClientMessage> {
        self.messages.pop_front()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn clear(&mut self) {
        self.messages.clear();
    }
}
