use dashmap::DashMap;
use std::collections::VecDeque;
use std::sync::Arc;

use crate::dispatch::{DisplaySink, ReceivedMessage};

/// Messages kept per origin unless configured otherwise.
pub const DEFAULT_INBOX_LIMIT: usize = 1000;

/// In-memory inbox of received text messages, bounded per origin.
///
/// Once an origin reaches the limit its oldest message is dropped for each
/// new one.
#[derive(Clone)]
pub struct MessageInbox {
    messages: Arc<DashMap<String, VecDeque<ReceivedMessage>>>,
    limit: usize,
}

impl Default for MessageInbox {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageInbox {
    pub fn new() -> Self {
        Self::with_limit(DEFAULT_INBOX_LIMIT)
    }

    /// A limit of zero is treated as one.
    pub fn with_limit(limit: usize) -> Self {
        Self {
            messages: Arc::new(DashMap::new()),
            limit: limit.max(1),
        }
    }

    pub fn add(&self, message: ReceivedMessage) {
        let mut queue = self.messages.entry(message.origin.clone()).or_default();
        while queue.len() >= self.limit {
            queue.pop_front();
        }
        queue.push_back(message);
    }

    /// Messages from `origin`, oldest first.
    pub fn get(&self, origin: &str) -> Vec<ReceivedMessage> {
        self.messages
            .get(origin)
            .map(|queue| queue.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn count(&self, origin: &str) -> usize {
        self.messages.get(origin).map(|queue| queue.len()).unwrap_or(0)
    }

    pub fn clear(&self) {
        self.messages.clear();
    }
}

impl DisplaySink for MessageInbox {
    fn display(&self, message: &ReceivedMessage) {
        self.add(message.clone());
    }
}
