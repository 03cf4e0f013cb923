use std::collections::HashMap;
use std::env;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// The four action classes, each a `(points, refill_seconds, block_seconds)` token
/// bucket keyed by `(remote address, class)` in one `Mutex<HashMap<...>>` per-key
/// store, with a distinct cool-off once a bucket is depleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RateLimitClass {
    Message,
    RoomCreate,
    Command,
    Connection,
}

impl RateLimitClass {
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "message" => Some(RateLimitClass::Message),
            "room-create" => Some(RateLimitClass::RoomCreate),
            "command" => Some(RateLimitClass::Command),
            "connection" => Some(RateLimitClass::Connection),
            _ => None,
        }
    }
}

/// Per-class overrides, read from the environment with sane defaults for each class.
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub message_points: f64,
    pub message_refill_secs: u64,
    pub message_block_secs: u64,
    pub room_create_points: f64,
    pub room_create_refill_secs: u64,
    pub room_create_block_secs: u64,
    pub command_points: f64,
    pub command_refill_secs: u64,
    pub command_block_secs: u64,
    pub connection_points: f64,
    pub connection_refill_secs: u64,
    pub connection_block_secs: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            message_points: 10.0,
            message_refill_secs: 1,
            message_block_secs: 60,
            room_create_points: 5.0,
            room_create_refill_secs: 3600,
            room_create_block_secs: 3600,
            command_points: 10.0,
            command_refill_secs: 60,
            command_block_secs: 60,
            connection_points: 10.0,
            connection_refill_secs: 60,
            connection_block_secs: 300,
        }
    }
}

impl RateLimitConfig {
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(val) = env::var("RATE_LIMIT_MESSAGE_POINTS")
            && let Ok(n) = val.parse::<f64>()
        {
            config.message_points = n;
        }
        if let Ok(val) = env::var("RATE_LIMIT_ROOM_CREATE_POINTS")
            && let Ok(n) = val.parse::<f64>()
        {
            config.room_create_points = n;
        }
        if let Ok(val) = env::var("RATE_LIMIT_COMMAND_POINTS")
            && let Ok(n) = val.parse::<f64>()
        {
            config.command_points = n;
        }
        if let Ok(val) = env::var("RATE_LIMIT_CONNECTION_POINTS")
            && let Ok(n) = val.parse::<f64>()
        {
            config.connection_points = n;
        }

        config
    }

    fn for_class(&self, class: RateLimitClass) -> (f64, u64, u64) {
        match class {
            RateLimitClass::Message => {
                (self.message_points, self.message_refill_secs, self.message_block_secs)
            }
            RateLimitClass::RoomCreate => (
                self.room_create_points,
                self.room_create_refill_secs,
                self.room_create_block_secs,
            ),
            RateLimitClass::Command => {
                (self.command_points, self.command_refill_secs, self.command_block_secs)
            }
            RateLimitClass::Connection => (
                self.connection_points,
                self.connection_refill_secs,
                self.connection_block_secs,
            ),
        }
    }
}

#[derive(Debug, Clone)]
struct Bucket {
    tokens: f64,
    last_refill: Instant,
    blocked_until: Option<Instant>,
}

#[derive(Debug, Clone, Copy)]
pub struct RateLimitInfo {
    pub allowed: bool,
    pub remaining: u64,
    pub retry_after_secs: u64,
}

pub struct RateLimiter {
    config: RateLimitConfig,
    buckets: Mutex<HashMap<(String, RateLimitClass), Bucket>>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self { config, buckets: Mutex::new(HashMap::new()) }
    }

    /// Atomically consumes one point from `id`'s bucket for `class`. Callers only ever
    /// reach this with a known `RateLimitClass`, so this is always a real check.
    pub fn check(&self, id: &str, class: RateLimitClass) -> RateLimitInfo {
        let (points, refill_secs, block_secs) = self.config.for_class(class);
        let now = Instant::now();
        let mut buckets = self.buckets.lock().unwrap_or_else(|e| e.into_inner());
        let bucket = buckets.entry((id.to_string(), class)).or_insert_with(|| Bucket {
            tokens: points,
            last_refill: now,
            blocked_until: None,
        });

        if let Some(until) = bucket.blocked_until {
            if now < until {
                let retry_after = (until - now).as_secs().max(1);
                return RateLimitInfo { allowed: false, remaining: 0, retry_after_secs: retry_after };
            }
            bucket.blocked_until = None;
            bucket.tokens = points;
            bucket.last_refill = now;
        }

        let elapsed = now.duration_since(bucket.last_refill).as_secs_f64();
        if refill_secs > 0 {
            let refill_rate = points / refill_secs as f64;
            bucket.tokens = (bucket.tokens + elapsed * refill_rate).min(points);
        }
        bucket.last_refill = now;

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            RateLimitInfo {
                allowed: true,
                remaining: bucket.tokens.floor() as u64,
                retry_after_secs: 0,
            }
        } else {
            bucket.blocked_until = Some(now + Duration::from_secs(block_secs));
            RateLimitInfo { allowed: false, remaining: 0, retry_after_secs: block_secs.max(1) }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allows_up_to_budget_then_blocks() {
        let limiter = RateLimiter::new(RateLimitConfig::default());
        let mut last = RateLimitInfo { allowed: true, remaining: 0, retry_after_secs: 0 };
        for _ in 0..10 {
            last = limiter.check("1.2.3.4", RateLimitClass::Message);
            assert!(last.allowed);
        }
        let eleventh = limiter.check("1.2.3.4", RateLimitClass::Message);
        assert!(!eleventh.allowed);
        assert!(eleventh.retry_after_secs >= 1);
        let _ = last;
    }

    #[test]
    fn classes_are_independent() {
        let limiter = RateLimiter::new(RateLimitConfig::default());
        for _ in 0..10 {
            assert!(limiter.check("addr", RateLimitClass::Message).allowed);
        }
        assert!(!limiter.check("addr", RateLimitClass::Message).allowed);
        assert!(limiter.check("addr", RateLimitClass::Command).allowed);
    }

    #[test]
    fn class_from_str() {
        assert_eq!(RateLimitClass::from_str("message"), Some(RateLimitClass::Message));
        assert_eq!(RateLimitClass::from_str("bogus"), None);
    }
}
