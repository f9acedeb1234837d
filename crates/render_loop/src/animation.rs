//! Animation clocks
//!
//! Two clocks exist per threaded setup: the control-thread [`AnimationDriver`]
//! advanced by the loop (from its timer, or once per polish/sync when a single
//! window is exposed), and one private driver per render thread that advances
//! render-thread animators under the window's [`AnimationController`] lock.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use parking_lot::{Mutex, MutexGuard};
use serde::{Deserialize, Serialize};

/// Interval used when the display does not report a usable refresh rate.
pub const FALLBACK_ANIMATION_INTERVAL: Duration = Duration::from_millis(16);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimingMode {
    /// Animation time follows the wall clock
    #[default]
    WallClock,
    /// Every advance moves time forward by exactly one interval
    Consistent,
}

/// Refresh period for `refresh_rate`, or 16 ms when it is unknown or below 1 Hz.
pub fn animation_interval(refresh_rate: Option<f64>) -> Duration {
    match refresh_rate {
        Some(rate) if rate.is_finite() && rate >= 1.0 => Duration::from_secs_f64(1.0 / rate),
        _ => FALLBACK_ANIMATION_INTERVAL,
    }
}

#[derive(Debug)]
pub struct AnimationDriver {
    mode: TimingMode,
    interval: Duration,
    running: bool,
    started_at: Option<Instant>,
    current_time: Duration,
    advance_count: u64,
}

impl AnimationDriver {
    pub fn new(mode: TimingMode, interval: Duration) -> Self {
        Self {
            mode,
            interval,
            running: false,
            started_at: None,
            current_time: Duration::ZERO,
            advance_count: 0,
        }
    }

    pub fn start(&mut self) {
        if self.running {
            return;
        }
        self.running = true;
        // Resume from where the clock stopped
        self.started_at = Some(Instant::now() - self.current_time);
    }

    pub fn stop(&mut self) {
        self.running = false;
        self.started_at = None;
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn mode(&self) -> TimingMode {
        self.mode
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn set_interval(&mut self, interval: Duration) {
        self.interval = interval;
    }

    /// Move the clock forward one step. Does nothing while stopped.
    pub fn advance(&mut self) -> Duration {
        if !self.running {
            return self.current_time;
        }

        self.current_time = match (self.mode, self.started_at) {
            (TimingMode::WallClock, Some(started_at)) => {
                started_at.elapsed().max(self.current_time)
            }
            _ => self.current_time + self.interval,
        };
        self.advance_count += 1;
        self.current_time
    }

    pub fn current_time(&self) -> Duration {
        self.current_time
    }

    pub fn advance_count(&self) -> u64 {
        self.advance_count
    }
}

/// State of the animators that run on a window's render thread
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct AnimatorState {
    pub ticks: u64,
    pub time: Duration,
}

/// Per-window lock that render-thread animators are advanced under.
///
/// The control thread takes the same lock while it mutates animator targets.
#[derive(Debug, Default)]
pub struct AnimationController {
    state: Mutex<AnimatorState>,
    running: AtomicUsize,
}

impl AnimationController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start_animator(&self) {
        self.running.fetch_add(1, Ordering::AcqRel);
    }

    pub fn stop_animator(&self) {
        let _ = self
            .running
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |count| count.checked_sub(1));
    }

    pub fn running_animators(&self) -> usize {
        self.running.load(Ordering::Acquire)
    }

    pub fn is_running(&self) -> bool {
        self.running_animators() > 0
    }

    pub fn lock(&self) -> MutexGuard<'_, AnimatorState> {
        self.state.lock()
    }

    pub fn ticks(&self) -> u64 {
        self.state.lock().ticks
    }
}
