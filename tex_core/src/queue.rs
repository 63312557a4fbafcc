//! Job Queue
//!
//! A bag of pending texture paths shared by every worker of one run. It is
//! filled once before the workers start and only drained afterwards: there is
//! no `put` once the queue is shared.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::Mutex;

/// Result of a non-blocking pull.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Take {
    Job(PathBuf),
    /// Nothing left; the caller must stop pulling.
    Empty,
}

#[derive(Debug, Default)]
pub struct JobQueue {
    items: Mutex<VecDeque<PathBuf>>,
    total: usize,
}

impl JobQueue {
    /// Bulk-loads the queue. This is the only way items get in.
    pub fn fill<I>(paths: I) -> Self
    where
        I: IntoIterator<Item = PathBuf>,
    {
        let items: VecDeque<PathBuf> = paths.into_iter().collect();
        let total = items.len();
        Self {
            items: Mutex::new(items),
            total,
        }
    }

    /// Pops one path without blocking. Each filled item is handed out once.
    pub fn take(&self) -> Take {
        // pop_front is the only mutation, so a poisoned deque is still whole.
        let mut items = match self.items.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        match items.pop_front() {
            Some(path) => Take::Job(path),
            None => Take::Empty,
        }
    }

    /// Number of items the queue was filled with.
    pub fn total(&self) -> usize {
        self.total
    }

    /// Items not yet taken.
    pub fn remaining(&self) -> usize {
        match self.items.lock() {
            Ok(guard) => guard.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }
}
