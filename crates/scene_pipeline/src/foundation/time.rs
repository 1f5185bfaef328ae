//! Time management utilities

use std::time::{Duration, Instant};

/// Simple stopwatch for measuring stage timings
#[derive(Debug)]
pub struct Stopwatch {
    start_time: Option<Instant>,
    elapsed: Duration,
}

impl Default for Stopwatch {
    fn default() -> Self {
        Self::new()
    }
}

impl Stopwatch {
    /// Create a new stopped stopwatch
    pub fn new() -> Self {
        Self {
            start_time: None,
            elapsed: Duration::ZERO,
        }
    }

    /// Create a new stopwatch and start it immediately
    pub fn start_new() -> Self {
        let mut stopwatch = Self::new();
        stopwatch.start();
        stopwatch
    }

    /// Start the stopwatch
    pub fn start(&mut self) {
        self.start_time = Some(Instant::now());
    }

    /// Stop the stopwatch and accumulate elapsed time
    pub fn stop(&mut self) {
        if let Some(start) = self.start_time {
            self.elapsed += start.elapsed();
            self.start_time = None;
        }
    }

    /// Get the elapsed time
    pub fn elapsed(&self) -> Duration {
        let current_elapsed = self.start_time.map_or(Duration::ZERO, |start| start.elapsed());
        self.elapsed + current_elapsed
    }

    /// Check if the stopwatch is currently running
    pub fn is_running(&self) -> bool {
        self.start_time.is_some()
    }
}

/// Minimum-interval frame limiter
///
/// Enforces a floor on the spacing between two consecutive frames. An
/// interval of zero means uncapped.
#[derive(Debug)]
pub struct FrameLimiter {
    minimum_interval: Duration,
    last_frame: Option<Instant>,
}

impl FrameLimiter {
    /// Create a limiter with the given floor in milliseconds
    pub fn new(minimum_interval_ms: u32) -> Self {
        Self {
            minimum_interval: Duration::from_millis(u64::from(minimum_interval_ms)),
            last_frame: None,
        }
    }

    /// Change the floor; zero disables capping
    pub fn set_minimum_interval(&mut self, minimum_interval_ms: u32) {
        self.minimum_interval = Duration::from_millis(u64::from(minimum_interval_ms));
    }

    /// Current floor
    pub fn minimum_interval(&self) -> Duration {
        self.minimum_interval
    }

    /// Time still to wait before the next frame may start
    pub fn remaining(&self, now: Instant) -> Duration {
        match self.last_frame {
            Some(last) if !self.minimum_interval.is_zero() => {
                self.minimum_interval.saturating_sub(now.duration_since(last))
            }
            _ => Duration::ZERO,
        }
    }

    /// Block the calling thread until the next frame may start, then mark it
    pub fn wait_for_next_frame(&mut self) {
        let remaining = self.remaining(Instant::now());
        if !remaining.is_zero() {
            std::thread::sleep(remaining);
        }
        self.mark_frame();
    }

    /// Record the start of a frame without waiting
    pub fn mark_frame(&mut self) {
        self.last_frame = Some(Instant::now());
    }
}

impl Default for FrameLimiter {
    fn default() -> Self {
        Self::new(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uncapped_limiter_never_waits() {
        let mut limiter = FrameLimiter::new(0);
        limiter.mark_frame();
        assert_eq!(limiter.remaining(Instant::now()), Duration::ZERO);
    }

    #[test]
    fn test_capped_limiter_reports_remaining_time() {
        let mut limiter = FrameLimiter::new(50);
        assert_eq!(limiter.remaining(Instant::now()), Duration::ZERO);

        limiter.mark_frame();
        let remaining = limiter.remaining(Instant::now());
        assert!(remaining > Duration::ZERO);
        assert!(remaining <= Duration::from_millis(50));
    }

    #[test]
    fn test_stopwatch_accumulates() {
        let mut stopwatch = Stopwatch::start_new();
        assert!(stopwatch.is_running());
        stopwatch.stop();
        let first = stopwatch.elapsed();
        assert!(!stopwatch.is_running());
        assert_eq!(stopwatch.elapsed(), first);
    }
}
