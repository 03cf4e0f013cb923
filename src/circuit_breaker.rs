use std::sync::Mutex;
use std::time::{Duration, Instant};

const FAILURE_THRESHOLD: u32 = 3;
const SUCCESS_THRESHOLD: u32 = 3;
const COOL_OFF: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum State {
    Closed,
    Open,
    HalfOpen,
}

struct Inner {
    state: State,
    consecutive_failures: u32,
    consecutive_successes: u32,
    opened_at: Option<Instant>,
    total_successes: u64,
    total_failures: u64,
}

/// Wraps calls to the durable store and bus (C5, C6). Trips to `Open` after 3
/// consecutive failures, probes again after a 30 s cool-off, and needs 3 consecutive
/// probe successes to fully close.
pub struct CircuitBreaker {
    inner: Mutex<Inner>,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct BreakerReport {
    pub state: State,
    pub failure_count: u32,
    pub success_count: u32,
    pub total_successes: u64,
    pub total_failures: u64,
    pub health_ratio: f64,
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new()
    }
}

impl CircuitBreaker {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                state: State::Closed,
                consecutive_failures: 0,
                consecutive_successes: 0,
                opened_at: None,
                total_successes: 0,
                total_failures: 0,
            }),
        }
    }

    fn may_pass(&self) -> bool {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        match inner.state {
            State::Closed | State::HalfOpen => true,
            State::Open => {
                let ready = inner.opened_at.map(|t| t.elapsed() >= COOL_OFF).unwrap_or(true);
                if ready {
                    inner.state = State::HalfOpen;
                    inner.consecutive_successes = 0;
                    true
                } else {
                    false
                }
            }
        }
    }

    fn record_success(&self) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.total_successes += 1;
        inner.consecutive_failures = 0;
        match inner.state {
            State::Closed => {}
            State::HalfOpen => {
                inner.consecutive_successes += 1;
                if inner.consecutive_successes >= SUCCESS_THRESHOLD {
                    inner.state = State::Closed;
                    inner.consecutive_successes = 0;
                }
            }
            State::Open => {}
        }
    }

    fn record_failure(&self) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.total_failures += 1;
        match inner.state {
            State::Closed => {
                inner.consecutive_failures += 1;
                if inner.consecutive_failures >= FAILURE_THRESHOLD {
                    inner.state = State::Open;
                    inner.opened_at = Some(Instant::now());
                }
            }
            State::HalfOpen => {
                inner.state = State::Open;
                inner.opened_at = Some(Instant::now());
                inner.consecutive_successes = 0;
            }
            State::Open => {}
        }
    }

    /// Runs `op` when the circuit allows it, otherwise (or on `op` failure) runs
    /// `fallback`. `op` returning `Err` counts as a breaker failure; `fallback` itself
    /// is never counted.
    pub async fn execute_async<T, F, Fut, G, Fut2>(&self, op: F, fallback: G) -> T
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<T, ()>>,
        G: FnOnce() -> Fut2,
        Fut2: std::future::Future<Output = T>,
    {
        if !self.may_pass() {
            return fallback().await;
        }
        match op().await {
            Ok(v) => {
                self.record_success();
                v
            }
            Err(()) => {
                self.record_failure();
                fallback().await
            }
        }
    }

    pub fn state(&self) -> State {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).state
    }

    pub fn is_open(&self) -> bool {
        self.state() == State::Open
    }

    pub fn report(&self) -> BreakerReport {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let total = inner.total_successes + inner.total_failures;
        let health_ratio = if total == 0 { 1.0 } else { inner.total_successes as f64 / total as f64 };
        BreakerReport {
            state: inner.state,
            failure_count: inner.consecutive_failures,
            success_count: inner.consecutive_successes,
            total_successes: inner.total_successes,
            total_failures: inner.total_failures,
            health_ratio,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn trips_open_after_three_failures() {
        let breaker = CircuitBreaker::new();
        for _ in 0..3 {
            breaker
                .execute_async(|| async { Err::<(), ()>(()) }, || async {})
                .await;
        }
        assert_eq!(breaker.state(), State::Open);
    }

    #[tokio::test]
    async fn stays_closed_below_threshold() {
        let breaker = CircuitBreaker::new();
        for _ in 0..2 {
            breaker
                .execute_async(|| async { Err::<(), ()>(()) }, || async {})
                .await;
        }
        assert_eq!(breaker.state(), State::Closed);
    }

    #[tokio::test]
    async fn success_resets_failure_streak() {
        let breaker = CircuitBreaker::new();
        breaker.execute_async(|| async { Err::<(), ()>(()) }, || async {}).await;
        breaker.execute_async(|| async { Ok::<(), ()>(()) }, || async {}).await;
        breaker.execute_async(|| async { Err::<(), ()>(()) }, || async {}).await;
        breaker.execute_async(|| async { Err::<(), ()>(()) }, || async {}).await;
        assert_eq!(breaker.state(), State::Closed);
    }
}
