//! # Version Log
//!
//! Bounded, append-only history of accepted steps for one document.
//!
//! Entries are contiguous: the entry at position `i` produced version
//! `base_version + i + 1`. Once the cap is exceeded the oldest entries are
//! dropped and `base_version` advances with them, so a client whose version is
//! below `base_version` can no longer be caught up incrementally.

use std::collections::VecDeque;

use serde::Serialize;

use super::document::UserId;
use super::errors::{SyncError, SyncResult};

/// One accepted step
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LogEntry<S> {
    /// Version produced by applying this step
    pub version: u64,
    pub step: S,
    /// Editor session that submitted the step
    pub client_id: String,
    pub user_id: UserId,
}

/// Ring buffer of the most recent steps
#[derive(Debug, Clone)]
pub struct VersionLog<S> {
    /// Version immediately before the oldest retained entry
    base_version: u64,
    entries: VecDeque<LogEntry<S>>,
    max_len: usize,
}

impl<S: Clone> VersionLog<S> {
    /// Create an empty log for a document loaded at `start_version`
    pub fn new(start_version: u64, max_len: usize) -> Self {
        let max_len = max_len.max(1);
        Self {
            base_version: start_version,
            entries: VecDeque::with_capacity(max_len.min(1024)),
            max_len,
        }
    }

    /// Version after the newest entry
    pub fn head_version(&self) -> u64 {
        self.base_version + self.entries.len() as u64
    }

    /// Smallest version a client may still catch up from
    pub fn oldest_available(&self) -> u64 {
        self.base_version
    }

    /// Append a batch, returning the new entries
    pub fn append(&mut self, steps: &[S], client_id: &str, user_id: UserId) -> Vec<LogEntry<S>> {
        let mut appended = Vec::with_capacity(steps.len());
        for step in steps {
            let entry = LogEntry {
                version: self.head_version() + 1,
                step: step.clone(),
                client_id: client_id.to_string(),
                user_id,
            };
            appended.push(entry.clone());
            self.entries.push_back(entry);
        }
        self.trim();
        appended
    }

    fn trim(&mut self) {
        while self.entries.len() > self.max_len {
            self.entries.pop_front();
            self.base_version += 1;
        }
    }

    /// Entries with `version > since_version`
    pub fn since(&self, since_version: u64) -> SyncResult<Vec<LogEntry<S>>> {
        if since_version < self.base_version {
            return Err(SyncError::HistoryUnavailable {
                requested: since_version,
                oldest: self.base_version,
            });
        }
        let head = self.head_version();
        if since_version > head {
            return Err(SyncError::VersionOutOfRange {
                requested: since_version,
                current: head,
            });
        }
        let skip = (since_version - self.base_version) as usize;
        Ok(self.entries.iter().skip(skip).cloned().collect())
    }

    /// Count of retained entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
