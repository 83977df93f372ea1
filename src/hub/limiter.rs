use std::time::Instant;

use parking_lot::Mutex;

/// Token bucket: `qps` tokens per second, bursting up to one second's
/// worth. `allow` never blocks; an empty bucket just says no.
pub struct TokenBucket {
    rate: f64,
    capacity: f64,
    state: Mutex<BucketState>,
}

struct BucketState {
    tokens: f64,
    refilled: Instant,
}

impl TokenBucket {
    pub fn new(qps: u32) -> Self {
        let capacity = qps.max(1) as f64;
        TokenBucket {
            rate: capacity,
            capacity,
            state: Mutex::new(BucketState {
                tokens: capacity,
                refilled: Instant::now(),
            }),
        }
    }

    pub fn allow(&self) -> bool {
        let mut state = self.state.lock();
        let now = Instant::now();
        let elapsed = now.duration_since(state.refilled).as_secs_f64();
        state.tokens = (state.tokens + elapsed * self.rate).min(self.capacity);
        state.refilled = now;
        if state.tokens >= 1.0 {
            state.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}
