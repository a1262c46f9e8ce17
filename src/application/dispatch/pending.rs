//! Outstanding requests, keyed by channel and request id.

use std::time::{Duration, Instant};

use dashmap::DashMap;
use tokio::task::AbortHandle;

#[derive(Debug)]
pub struct PendingRequest {
    pub action: String,
    pub sent_at: Instant,
    timer: Option<AbortHandle>,
}

impl PendingRequest {
    pub fn new(action: impl Into<String>, timer: Option<AbortHandle>) -> Self {
        Self {
            action: action.into(),
            sent_at: Instant::now(),
            timer,
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.sent_at.elapsed()
    }

    fn cancel_timer(&self) {
        if let Some(timer) = &self.timer {
            timer.abort();
        }
    }
}

#[derive(Default)]
pub struct PendingTable {
    entries: DashMap<(String, String), PendingRequest>,
}

impl PendingTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, channel: &str, request_id: &str, request: PendingRequest) {
        self.entries
            .insert((channel.to_string(), request_id.to_string()), request);
    }

    /// Remove an entry and cancel its timer.
    pub fn remove(&self, channel: &str, request_id: &str) -> Option<PendingRequest> {
        let (_, request) = self
            .entries
            .remove(&(channel.to_string(), request_id.to_string()))?;
        request.cancel_timer();
        Some(request)
    }

    /// Attach the timeout task of a request written after it was recorded.
    /// The task is aborted when the request is already gone.
    pub fn attach_timer(&self, channel: &str, request_id: &str, timer: AbortHandle) -> bool {
        match self
            .entries
            .get_mut(&(channel.to_string(), request_id.to_string()))
        {
            Some(mut entry) => {
                entry.timer = Some(timer);
                true
            }
            None => {
                timer.abort();
                false
            }
        }
    }

    pub fn contains(&self, channel: &str, request_id: &str) -> bool {
        self.entries
            .contains_key(&(channel.to_string(), request_id.to_string()))
    }

    pub fn action_of(&self, channel: &str, request_id: &str) -> Option<String> {
        self.entries
            .get(&(channel.to_string(), request_id.to_string()))
            .map(|entry| entry.action.clone())
    }

    /// Remove every entry of a channel, cancelling their timers.
    pub fn remove_channel(&self, channel: &str) -> Vec<(String, PendingRequest)> {
        let ids: Vec<String> = self
            .entries
            .iter()
            .filter(|entry| entry.key().0 == channel)
            .map(|entry| entry.key().1.clone())
            .collect();

        ids.into_iter()
            .filter_map(|id| self.remove(channel, &id).map(|request| (id, request)))
            .collect()
    }

    /// Remove every entry, cancelling their timers.
    pub fn clear(&self) {
        for entry in self.entries.iter() {
            entry.value().cancel_timer();
        }
        self.entries.clear();
    }

    pub fn count_for(&self, channel: &str) -> usize {
        self.entries.iter().filter(|e| e.key().0 == channel).count()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
