use std::collections::VecDeque;

pub const DEFAULT_CAPACITY: usize = 11;

/// Most recent distinct status messages, oldest first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusLog {
    entries: VecDeque<String>,
    capacity: usize,
}

impl StatusLog {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Appends `message` unless it is already present. Returns whether the log
    /// changed.
    pub fn append(&mut self, message: impl Into<String>) -> bool {
        let message = message.into();
        if self.entries.iter().any(|m| *m == message) {
            return false;
        }
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(message);
        true
    }

    pub fn entries(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(String::as_str)
    }

    pub fn latest(&self) -> Option<&str> {
        self.entries.back().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn to_vec(&self) -> Vec<String> {
        self.entries.iter().cloned().collect()
    }
}

impl Default for StatusLog {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}
