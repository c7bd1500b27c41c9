//! Queue recall tracking
//!
//! Remembers callers that abandoned a queue and recognizes them when they call back within
//! the recall window. Entries live in one of two states: pending (waiting for the caller
//! to call again) or matched (the call back arrived, waiting for a consumer to look it up).
//! Expired entries are swept lazily on every operation.

use crate::state::RecallMatch;
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, trace};

#[derive(Debug, Clone, PartialEq, Eq)]
enum RecallEntry {
    Pending {
        abandoned_at: Instant,
        expires_at: Instant,
    },
    Matched {
        matched_at: Instant,
        uniqueid: String,
        after_secs: u64,
    },
}

/// What the tracker knows about a (queue, number) pair
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecallStatus {
    /// Nothing tracked
    Idle,
    /// Abandoned, still waiting for a call back
    Pending { expires_in: Duration },
    /// Called back; not yet consumed by a lookup
    Matched { uniqueid: String },
}

/// Tracker of abandoned queue calls, keyed by (queue, caller number)
#[derive(Debug)]
pub struct QueueRecallManager {
    window: Duration,
    entries: HashMap<(String, String), RecallEntry>,
}

impl QueueRecallManager {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            entries: HashMap::new(),
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub fn len(&self) -> usize {
        self.entries
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries
            .is_empty()
    }

    /// Start (or restart) the recall window for a caller that left `queue` unanswered.
    pub fn record_abandon(&mut self, queue: &str, number: &str, now: Instant) {
        if number.is_empty() {
            trace!("[RECALL] abandon without caller number in queue {}", queue);
            return;
        }
        self.sweep(now);
        debug!("[RECALL] tracking {} abandoned in queue {}", number, queue);
        self.entries
            .insert(
                (queue.to_string(), number.to_string()),
                RecallEntry::Pending {
                    abandoned_at: now,
                    expires_at: now + self.window,
                },
            );
    }

    /// A new inbound call arrived; promote every pending entry for `number`.
    pub fn on_inbound_call(&mut self, number: &str, uniqueid: &str, now: Instant) -> Vec<RecallMatch> {
        self.sweep(now);
        let mut matches = Vec::new();
        for ((queue, entry_number), entry) in self
            .entries
            .iter_mut()
        {
            if entry_number != number {
                continue;
            }
            if let RecallEntry::Pending { abandoned_at, .. } = *entry {
                let after_secs = now
                    .saturating_duration_since(abandoned_at)
                    .as_secs();
                *entry = RecallEntry::Matched {
                    matched_at: now,
                    uniqueid: uniqueid.to_string(),
                    after_secs,
                };
                matches.push(RecallMatch {
                    queue: queue.clone(),
                    number: number.to_string(),
                    uniqueid: uniqueid.to_string(),
                    after_secs,
                });
            }
        }
        matches.sort_by(|a, b| {
            a.queue
                .cmp(&b.queue)
        });
        for m in &matches {
            debug!(
                "[RECALL] {} called back queue {} after {}s",
                m.number, m.queue, m.after_secs
            );
        }
        matches
    }

    /// Consume a matched entry. Pending entries stay in place and yield nothing.
    pub fn lookup(&mut self, queue: &str, number: &str, now: Instant) -> Option<RecallMatch> {
        self.sweep(now);
        let key = (queue.to_string(), number.to_string());
        match self
            .entries
            .get(&key)
        {
            Some(RecallEntry::Matched { .. }) => {}
            _ => return None,
        }
        match self
            .entries
            .remove(&key)
        {
            Some(RecallEntry::Matched {
                uniqueid,
                after_secs,
                ..
            }) => Some(RecallMatch {
                queue: key.0,
                number: key.1,
                uniqueid,
                after_secs,
            }),
            _ => None,
        }
    }

    pub fn status(&mut self, queue: &str, number: &str, now: Instant) -> RecallStatus {
        self.sweep(now);
        match self
            .entries
            .get(&(queue.to_string(), number.to_string()))
        {
            None => RecallStatus::Idle,
            Some(RecallEntry::Pending { expires_at, .. }) => RecallStatus::Pending {
                expires_in: expires_at.saturating_duration_since(now),
            },
            Some(RecallEntry::Matched { uniqueid, .. }) => RecallStatus::Matched {
                uniqueid: uniqueid.clone(),
            },
        }
    }

    /// Drop everything, e.g. when the structure is reloaded
    pub fn clear(&mut self) {
        self.entries
            .clear();
    }

    fn sweep(&mut self, now: Instant) {
        let window = self.window;
        let before = self
            .entries
            .len();
        self.entries
            .retain(|_, entry| match entry {
                RecallEntry::Pending { expires_at, .. } => now < *expires_at,
                RecallEntry::Matched { matched_at, .. } => now < *matched_at + window,
            });
        let dropped = before
            - self
                .entries
                .len();
        if dropped > 0 {
            trace!("[RECALL] swept {} expired entries", dropped);
        }
    }
}
