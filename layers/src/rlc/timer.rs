//! Millisecond timers driven by the RLC tick
//!
//! Every entity owns its timers and advances them from `tick()`, so expiry
//! handling runs on the same path as PDU and SDU processing.

/// One-shot timer counted in milliseconds
#[derive(Debug, Clone, Default)]
pub struct Timer {
    duration_ms: u32,
    elapsed_ms: u32,
    running: bool,
    expired: bool,
}

impl Timer {
    /// Create a stopped timer with the given duration
    pub fn new(duration_ms: u32) -> Self {
        Self {
            duration_ms,
            ..Default::default()
        }
    }

    /// Change the duration; takes effect on the next `run`
    pub fn set_duration(&mut self, duration_ms: u32) {
        self.duration_ms = duration_ms;
    }

    pub fn duration(&self) -> u32 {
        self.duration_ms
    }

    /// Start or restart the timer
    pub fn run(&mut self) {
        self.elapsed_ms = 0;
        self.running = true;
        self.expired = false;
    }

    pub fn stop(&mut self) {
        self.running = false;
        self.expired = false;
        self.elapsed_ms = 0;
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    /// True after expiry until the timer is restarted or stopped
    pub fn is_expired(&self) -> bool {
        self.expired
    }

    pub fn time_elapsed(&self) -> u32 {
        self.elapsed_ms
    }

    /// Advance by one millisecond. Returns true exactly once, on the tick the timer expires.
    pub fn step(&mut self) -> bool {
        if !self.running {
            return false;
        }
        self.elapsed_ms += 1;
        if self.elapsed_ms >= self.duration_ms {
            self.running = false;
            self.expired = true;
            return true;
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timer_expires_after_duration() {
        let mut timer = Timer::new(3);
        timer.run();
        assert!(!timer.step());
        assert!(!timer.step());
        assert!(timer.step());
        assert!(!timer.is_running());
        assert!(timer.is_expired());
        assert!(!timer.step());
    }

    #[test]
    fn test_stopped_timer_does_not_expire() {
        let mut timer = Timer::new(1);
        assert!(!timer.step());
        timer.run();
        timer.stop();
        assert!(!timer.step());
        assert!(!timer.is_expired());
    }

    #[test]
    fn test_restart_resets_elapsed() {
        let mut timer = Timer::new(2);
        timer.run();
        timer.step();
        timer.run();
        assert_eq!(timer.time_elapsed(), 0);
        assert!(!timer.step());
        assert!(timer.step());
    }
}
