use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};

/// Short-TTL memory of event keys already taken in.
#[derive(Debug)]
pub struct DedupeCache {
    ttl: Duration,
    expires: HashMap<String, DateTime<Utc>>,
}

impl DedupeCache {
    pub fn new(ttl_ms: u64) -> Self {
        Self {
            ttl: Duration::milliseconds(ttl_ms as i64),
            expires: HashMap::new(),
        }
    }

    /// Returns true when `key` was registered and has not expired yet.
    /// Otherwise registers it and returns false.
    pub fn seen(&mut self, key: &str, now: DateTime<Utc>) -> bool {
        self.expires.retain(|_, expires_at| *expires_at > now);
        if self.expires.contains_key(key) {
            return true;
        }
        self.expires.insert(key.to_string(), now + self.ttl);
        false
    }

    pub fn len(&self) -> usize {
        self.expires.len()
    }

    pub fn is_empty(&self) -> bool {
        self.expires.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateDecision {
    Admit,
    Deny { reason_code: &'static str },
}

/// Minimum spacing between accepted events per throttle key.
#[derive(Debug)]
pub struct RateGate {
    min_interval: Duration,
    idle_eviction: Duration,
    last_accepted: HashMap<String, DateTime<Utc>>,
}

impl RateGate {
    pub fn new(min_interval_ms: u64) -> Self {
        let eviction_ms = min_interval_ms.max(1_000).saturating_mul(60);
        Self {
            min_interval: Duration::milliseconds(min_interval_ms as i64),
            idle_eviction: Duration::milliseconds(eviction_ms as i64),
            last_accepted: HashMap::new(),
        }
    }

    pub fn admit(&mut self, key: &str, now: DateTime<Utc>) -> bool {
        matches!(self.evaluate(key, now), GateDecision::Admit)
    }

    pub fn evaluate(&mut self, key: &str, now: DateTime<Utc>) -> GateDecision {
        let idle_eviction = self.idle_eviction;
        self.last_accepted
            .retain(|_, last| now.signed_duration_since(*last) < idle_eviction);

        if let Some(last) = self.last_accepted.get(key) {
            if now.signed_duration_since(*last) < self.min_interval {
                return GateDecision::Deny {
                    reason_code: "rate_gate_min_interval",
                };
            }
        }
        self.last_accepted.insert(key.to_string(), now);
        GateDecision::Admit
    }
}

pub fn throttle_key(chat_id: &str, sender_user_id: Option<&str>) -> String {
    format!("{chat_id}:{}", sender_user_id.unwrap_or("u"))
}
