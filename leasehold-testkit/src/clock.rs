use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use leasehold::Clock;
use parking_lot::Mutex;

/// Simulated clock. Time moves only through [`ManualClock::advance`] or a
/// call to `sleep`, which advances by the requested duration and yields.
///
/// Clones share the same time, and every `sleep` moves it for all of them.
/// Drive one acquiring task at a time with this clock: a contended guard
/// races `sleep(timeout)` against the mutex, and that sleep jumps the shared
/// time past the whole wait at once. Use paused tokio time with
/// [`TokioClock`](leasehold::TokioClock) for concurrent scenarios.
#[derive(Clone, Debug)]
pub struct ManualClock {
    state: Arc<Mutex<ClockState>>,
}

#[derive(Debug)]
struct ClockState {
    now: DateTime<Utc>,
    sleeps: Vec<Duration>,
}

impl ManualClock {
    /// Start at 2024-01-01T00:00:00Z.
    pub fn new() -> Self {
        Self::starting_at(DateTime::from_timestamp(1_704_067_200, 0).unwrap_or_default())
    }

    pub fn starting_at(now: DateTime<Utc>) -> Self {
        Self {
            state: Arc::new(Mutex::new(ClockState {
                now,
                sleeps: Vec::new(),
            })),
        }
    }

    pub fn advance(&self, by: Duration) {
        self.state.lock().now += to_delta(by);
    }

    /// Durations passed to `sleep`, in call order.
    pub fn sleeps(&self) -> Vec<Duration> {
        self.state.lock().sleeps.clone()
    }

    /// Total simulated time slept.
    pub fn slept(&self) -> Duration {
        self.state.lock().sleeps.iter().sum()
    }

    pub fn assert_sleep_count_eq(&self, expected: usize) {
        let actual = self.state.lock().sleeps.len();
        assert_eq!(
            actual, expected,
            "Expected {} sleeps, got {}",
            expected, actual
        );
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        self.state.lock().now
    }

    async fn sleep(&self, duration: Duration) {
        {
            let mut state = self.state.lock();
            state.now += to_delta(duration);
            state.sleeps.push(duration);
        }
        tokio::task::yield_now().await;
    }
}

fn to_delta(duration: Duration) -> TimeDelta {
    TimeDelta::from_std(duration).expect("simulated duration out of range")
}
