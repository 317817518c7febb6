use std::{
    thread,
    time::{Duration, Instant},
};

use tracing::trace;

/// Millisecond clock anchored at construction.
#[derive(Debug, Clone, Copy)]
pub struct TickClock {
    anchor: Instant,
}

impl TickClock {
    pub fn start() -> Self {
        Self {
            anchor: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.anchor.elapsed()
    }

    /// Milliseconds since the anchor. The counter is 32 bits wide and wraps
    /// after roughly 49.7 days; values beyond that point are unspecified.
    pub fn elapsed_ms(&self) -> u32 {
        self.elapsed().as_millis() as u32
    }
}

impl Default for TickClock {
    fn default() -> Self {
        Self::start()
    }
}

/// Blocks the calling thread for `ms` milliseconds.
pub fn sleep_ms(ms: u32) {
    thread::sleep(Duration::from_millis(u64::from(ms)));
}

/// Spaces out the starts of successive frames by at least a fixed interval.
///
/// A late frame is never compensated for: the next interval is measured from
/// whenever the late frame actually started.
#[derive(Debug, Clone)]
pub struct FramePacer {
    frame_time: Duration,
    previous_frame: Instant,
}

impl FramePacer {
    pub fn new(frame_time: Duration) -> Self {
        Self {
            frame_time,
            previous_frame: Instant::now(),
        }
    }

    pub fn frame_time(&self) -> Duration {
        self.frame_time
    }

    /// Time since the last frame started.
    pub fn since_previous(&self) -> Duration {
        self.previous_frame.elapsed()
    }

    /// Sleeps out the remainder of the current interval. Returns how long the
    /// caller was blocked.
    pub fn wait_for_slot(&self) -> Duration {
        let elapsed = self.since_previous();
        match self.frame_time.checked_sub(elapsed) {
            Some(remaining) if !remaining.is_zero() => {
                trace!(?remaining, "pacing frame");
                thread::sleep(remaining);
                remaining
            }
            _ => Duration::ZERO,
        }
    }

    /// Stamps the start of a frame. Call right after the audio was handed to
    /// the output stream.
    pub fn mark_frame_start(&mut self) {
        self.previous_frame = Instant::now();
    }
}
