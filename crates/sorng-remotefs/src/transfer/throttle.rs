use async_trait::async_trait;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Called by the copy loop once per chunk, before the write.
#[async_trait]
pub trait BandwidthThrottle: Send + Sync {
    async fn acquire(&self, bytes: usize);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct Unlimited;

#[async_trait]
impl BandwidthThrottle for Unlimited {
    async fn acquire(&self, _bytes: usize) {}
}

/// Token bucket holding at most one second of credit, so an idle limiter
/// shared between transfers cannot bank a burst.
#[derive(Debug)]
pub struct RateLimiter {
    bytes_per_sec: u64,
    bucket: Mutex<Bucket>,
}

#[derive(Debug)]
struct Bucket {
    /// Negative while callers are ahead of the rate.
    available: f64,
    refilled: Instant,
}

impl RateLimiter {
    pub fn new(bytes_per_sec: u64) -> Self {
        Self {
            bytes_per_sec,
            bucket: Mutex::new(Bucket {
                available: 0.0,
                refilled: Instant::now(),
            }),
        }
    }

    pub fn bytes_per_sec(&self) -> u64 {
        self.bytes_per_sec
    }

    fn delay_for(&self, bytes: usize) -> Duration {
        self.delay_at(bytes, Instant::now())
    }

    /// How long a caller consuming `bytes` more at `now` must wait.
    fn delay_at(&self, bytes: usize, now: Instant) -> Duration {
        if self.bytes_per_sec == 0 {
            return Duration::ZERO;
        }
        let rate = self.bytes_per_sec as f64;
        let mut bucket = self.bucket.lock().unwrap_or_else(|e| e.into_inner());
        let idle = now.saturating_duration_since(bucket.refilled).as_secs_f64();
        bucket.refilled = bucket.refilled.max(now);
        bucket.available = (bucket.available + idle * rate).min(rate);
        bucket.available -= bytes as f64;
        if bucket.available < 0.0 {
            Duration::from_secs_f64(-bucket.available / rate)
        } else {
            Duration::ZERO
        }
    }
}

#[async_trait]
impl BandwidthThrottle for RateLimiter {
    async fn acquire(&self, bytes: usize) {
        let delay = self.delay_for(bytes);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }
}
