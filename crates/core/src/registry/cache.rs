//! Least-recently-used bookkeeping for open sinks.

use std::collections::VecDeque;

/// Tracks which repositories have a running sink, in order of last use.
#[derive(Debug, Clone)]
pub struct SinkCache {
    capacity: usize,
    order: VecDeque<String>,
}

impl SinkCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            order: VecDeque::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.order.iter().any(|n| n == name)
    }

    /// Mark `name` as the most recently used. Returns the repositories that
    /// fell out of the cache and must close their sinks.
    pub fn touch(&mut self, name: &str) -> Vec<String> {
        if let Some(pos) = self.order.iter().position(|n| n == name) {
            if let Some(entry) = self.order.remove(pos) {
                self.order.push_back(entry);
            }
            return Vec::new();
        }

        let mut evicted = Vec::new();
        while self.order.len() >= self.capacity {
            match self.order.pop_front() {
                Some(oldest) => evicted.push(oldest),
                None => break,
            }
        }
        self.order.push_back(name.to_string());
        evicted
    }

    pub fn remove(&mut self, name: &str) {
        self.order.retain(|n| n != name);
    }

    /// Names in order from least to most recently used.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(String::as_str)
    }
}
