use dashmap::DashMap;

/// Fixed-window in-memory limiter: N requests per caller per minute.
/// A limit of 0 disables it entirely.
pub struct RateLimiter {
    per_minute: u32,
    windows: DashMap<String, (i64, u32)>,
}

impl RateLimiter {
    pub fn new(per_minute: u32) -> Self {
        Self {
            per_minute,
            windows: DashMap::new(),
        }
    }

    pub fn allow(&self, caller: &str) -> bool {
        if self.per_minute == 0 {
            return true;
        }
        let minute = chrono::Utc::now().timestamp() / 60;
        let mut entry = self.windows.entry(caller.to_string()).or_insert((minute, 0));
        let (window, count) = *entry;
        if window != minute {
            *entry = (minute, 1);
            return true;
        }
        if count >= self.per_minute {
            return false;
        }
        *entry = (window, count + 1);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_means_unlimited() {
        let limiter = RateLimiter::new(0);
        for _ in 0..1000 {
            assert!(limiter.allow("anyone"));
        }
    }

    #[test]
    fn limit_applies_per_caller() {
        let limiter = RateLimiter::new(2);
        assert!(limiter.allow("a"));
        assert!(limiter.allow("a"));
        assert!(!limiter.allow("a"));
        // a different caller has its own window
        assert!(limiter.allow("b"));
    }
}
