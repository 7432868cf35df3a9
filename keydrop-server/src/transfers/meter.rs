//! Progress metering
//!
//! Turns a running byte count into a bounded stream of progress ticks with a
//! sliding-window throughput estimate.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use keydrop_common::ProgressEvent;

use crate::constants::SPEED_WINDOW;

/// Upper bound on retained speed samples
const MAX_SPEED_SAMPLES: usize = 100;

struct SpeedSample {
    /// Running byte total at the time of the sample
    total: u64,
    at: Instant,
}

/// Sliding-window throughput over running byte totals
pub struct SpeedCalculator {
    samples: VecDeque<SpeedSample>,
    window: Duration,
}

impl SpeedCalculator {
    pub fn new(window: Duration) -> Self {
        Self {
            samples: VecDeque::new(),
            window,
        }
    }

    /// Record that `total` bytes have moved as of `at`
    pub fn add_sample(&mut self, total: u64, at: Instant) {
        self.samples.push_back(SpeedSample { total, at });

        // Keep one sample at or before the window start as the baseline
        while self.samples.len() > 2 {
            let second = &self.samples[1];
            if at.duration_since(second.at) >= self.window {
                self.samples.pop_front();
            } else {
                break;
            }
        }
        while self.samples.len() > MAX_SPEED_SAMPLES {
            self.samples.pop_front();
        }
    }

    /// Average bytes per second across the window; 0.0 until measurable
    pub fn bytes_per_second(&self) -> f64 {
        let (Some(first), Some(last)) = (self.samples.front(), self.samples.back()) else {
            return 0.0;
        };
        let elapsed = last.at.duration_since(first.at);
        if elapsed.is_zero() {
            return 0.0;
        }
        last.total.saturating_sub(first.total) as f64 / elapsed.as_secs_f64()
    }
}

/// Tick policy for one transfer
#[derive(Debug, Clone, Copy)]
pub struct MeterConfig {
    /// Minimum time between ticks
    pub interval: Duration,
    /// Bytes moved that force a tick
    pub bytes: u64,
}

/// Decides when a transfer publishes progress and what it says
pub struct ProgressMeter {
    total: u64,
    config: MeterConfig,
    estimated: bool,
    started: Instant,
    speed: SpeedCalculator,
    last_tick: Option<(Instant, u64)>,
    transferred: u64,
}

impl ProgressMeter {
    /// Meter a transfer of `total` bytes (0 if unknown)
    ///
    /// `estimated` marks ticks that count bytes handed to a transport
    /// rather than bytes confirmed by the peer.
    pub fn new(total: u64, config: MeterConfig, estimated: bool, now: Instant) -> Self {
        let mut speed = SpeedCalculator::new(SPEED_WINDOW);
        speed.add_sample(0, now);
        Self {
            total,
            config,
            estimated,
            started: now,
            speed,
            last_tick: None,
            transferred: 0,
        }
    }

    /// Record the running total; returns a tick when one is due
    ///
    /// A tick is due on the first chunk, on the final byte, and whenever the
    /// interval has elapsed or the byte threshold has been crossed since the
    /// previous tick.
    pub fn record(&mut self, transferred: u64, now: Instant) -> Option<ProgressEvent> {
        // Totals never go backwards, so neither does the percentage
        self.transferred = self.transferred.max(transferred);
        self.speed.add_sample(self.transferred, now);

        let due = match self.last_tick {
            None => true,
            Some((at, bytes)) => {
                self.is_done()
                    || now.duration_since(at) >= self.config.interval
                    || self.transferred.saturating_sub(bytes) >= self.config.bytes
            }
        };
        if !due || self.last_tick.is_some_and(|(_, bytes)| bytes == self.transferred) {
            return None;
        }

        self.last_tick = Some((now, self.transferred));
        Some(self.snapshot())
    }

    /// Final tick once the stream has ended, unless it was already sent
    ///
    /// An unknown total becomes the number of bytes actually moved.
    pub fn finish(&mut self, now: Instant) -> Option<ProgressEvent> {
        if self.total == 0 {
            self.total = self.transferred;
        }
        if self.last_tick.is_some_and(|(_, bytes)| bytes == self.transferred) {
            return None;
        }
        self.speed.add_sample(self.transferred, now);
        self.last_tick = Some((now, self.transferred));
        Some(self.snapshot())
    }

    /// Bytes recorded so far
    pub fn transferred(&self) -> u64 {
        self.transferred
    }

    /// Average throughput since the meter started
    pub fn average_bytes_per_second(&self, now: Instant) -> f64 {
        let elapsed = now.duration_since(self.started).as_secs_f64();
        if elapsed > 0.0 {
            self.transferred as f64 / elapsed
        } else {
            0.0
        }
    }

    fn is_done(&self) -> bool {
        self.total > 0 && self.transferred >= self.total
    }

    fn snapshot(&self) -> ProgressEvent {
        ProgressEvent::new(
            self.transferred,
            self.total,
            self.speed.bytes_per_second(),
            self.estimated,
        )
    }
}
