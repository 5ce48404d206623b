//! Sliding-window rate limiter.
//!
//! Each (client, bucket) pair keeps a queue of admission timestamps. A
//! request is admitted when fewer than `limit` admissions remain inside the
//! trailing window; admissions older than the window are evicted first.
//! Unlike a token bucket there is no burst refill curve: exactly `limit`
//! events fit in any window-sized interval, which keeps the observable
//! behavior easy to reason about under test.

use crate::config::{LimitsConfig, Quota};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Quota buckets. Each names an independent window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Bucket {
    Login,
    Connect,
    MessageSend,
    Reaction,
    Typing,
    DeleteMessage,
    CallOffer,
    CallAnswer,
    CallIce,
    CallHangup,
}

impl Bucket {
    /// Stable name, used as the metric / log label.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Login => "login",
            Self::Connect => "connect",
            Self::MessageSend => "message_send",
            Self::Reaction => "reaction",
            Self::Typing => "typing",
            Self::DeleteMessage => "delete_message",
            Self::CallOffer => "call_offer",
            Self::CallAnswer => "call_answer",
            Self::CallIce => "call_ice",
            Self::CallHangup => "call_hangup",
        }
    }
}

/// Per-client sliding-window limiter over all quota buckets.
pub struct RateLimiter {
    limits: LimitsConfig,
    windows: DashMap<(String, Bucket), Mutex<VecDeque<Instant>>>,
}

impl RateLimiter {
    /// Create a limiter from the configured quotas.
    pub fn new(limits: LimitsConfig) -> Self {
        Self {
            limits,
            windows: DashMap::new(),
        }
    }

    fn quota(&self, bucket: Bucket) -> Quota {
        match bucket {
            Bucket::Login => self.limits.login,
            Bucket::Connect => self.limits.connect,
            Bucket::MessageSend => self.limits.message_send,
            Bucket::Reaction => self.limits.reaction,
            Bucket::Typing => self.limits.typing,
            Bucket::DeleteMessage => self.limits.delete_message,
            Bucket::CallOffer => self.limits.call_offer,
            Bucket::CallAnswer => self.limits.call_answer,
            Bucket::CallIce => self.limits.call_ice,
            Bucket::CallHangup => self.limits.call_hangup,
        }
    }

    /// Try to admit one event for `client` in `bucket` now.
    pub fn admit(&self, client: &str, bucket: Bucket) -> bool {
        self.admit_at(client, bucket, Instant::now())
    }

    /// Admission check at an explicit instant. `now` must not move
    /// backwards between calls for the same (client, bucket).
    pub fn admit_at(&self, client: &str, bucket: Bucket, now: Instant) -> bool {
        let quota = self.quota(bucket);
        let window = Duration::from_secs(quota.window_secs);

        let entry = self
            .windows
            .entry((client.to_owned(), bucket))
            .or_insert_with(|| Mutex::new(VecDeque::new()));
        let mut queue = entry.lock();

        while let Some(front) = queue.front() {
            if now.duration_since(*front) >= window {
                queue.pop_front();
            } else {
                break;
            }
        }

        if queue.len() >= quota.limit as usize {
            return false;
        }
        queue.push_back(now);
        true
    }

    /// Drop windows whose entries have all aged out. Run periodically so
    /// one-shot clients do not accumulate forever.
    pub fn cleanup(&self) {
        let now = Instant::now();
        self.windows.retain(|(_, bucket), queue| {
            let window = Duration::from_secs(self.quota(*bucket).window_secs);
            let queue = queue.lock();
            queue
                .back()
                .is_some_and(|last| now.duration_since(*last) < window)
        });
    }

    /// Number of live (client, bucket) windows. For tests and gauges.
    pub fn window_count(&self) -> usize {
        self.windows.len()
    }
}
