//! Render loop configuration
//!
//! Sources, lowest priority first: built-in defaults, an optional TOML file,
//! then environment variables. The environment is read once per process by
//! [`RenderLoopConfig::global`].
//!
//! ```toml
//! loop_kind = "threaded"
//! consistent_timing = true
//! exhaust_delay_ms = 5
//! ```

use std::path::Path;
use std::time::Duration;

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

use crate::animation::{animation_interval, TimingMode};
use crate::error::{RenderLoopError, Result};

pub const ENV_LOOP_KIND: &str = "PULSAR_RENDER_LOOP";
pub const ENV_FORCE_BASIC: &str = "PULSAR_FORCE_BASIC_RENDER_LOOP";
pub const ENV_FORCE_THREADED: &str = "PULSAR_FORCE_THREADED_RENDERER";
pub const ENV_FIXED_ANIMATION_STEP: &str = "PULSAR_FIXED_ANIMATION_STEP";
pub const ENV_EXHAUST_DELAY: &str = "PULSAR_EXHAUST_DELAY";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderLoopConfig {
    /// Explicit loop name (`basic`, `threaded` or `windows`); overrides the force flags
    pub loop_kind: Option<String>,
    pub force_basic: bool,
    pub force_threaded: bool,
    /// Advance animations by a fixed step per frame instead of following the wall clock
    pub consistent_timing: bool,
    /// Coalescing delay for update requests
    pub exhaust_delay_ms: u64,
    /// Used for animation timing when the display reports no refresh rate
    pub fallback_refresh_rate: f64,
}

impl Default for RenderLoopConfig {
    fn default() -> Self {
        Self {
            loop_kind: None,
            force_basic: false,
            force_threaded: false,
            consistent_timing: false,
            exhaust_delay_ms: 5,
            fallback_refresh_rate: 60.0,
        }
    }
}

static GLOBAL_CONFIG: Lazy<RenderLoopConfig> = Lazy::new(RenderLoopConfig::from_env);

impl RenderLoopConfig {
    /// Defaults overridden by the process environment, cached for the process lifetime
    pub fn global() -> &'static RenderLoopConfig {
        &GLOBAL_CONFIG
    }

    pub fn from_env() -> Self {
        Self::default().with_overrides(|key| std::env::var(key).ok())
    }

    /// Apply environment-style overrides from `lookup`
    pub fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(kind) = lookup(ENV_LOOP_KIND).filter(|value| !value.trim().is_empty()) {
            self.loop_kind = Some(kind.trim().to_ascii_lowercase());
        }
        if let Some(value) = lookup(ENV_FORCE_BASIC) {
            self.force_basic = env_flag(&value);
        }
        if let Some(value) = lookup(ENV_FORCE_THREADED) {
            self.force_threaded = env_flag(&value);
        }
        if let Some(value) = lookup(ENV_FIXED_ANIMATION_STEP) {
            self.consistent_timing = env_flag(&value);
        }
        if let Some(value) = lookup(ENV_EXHAUST_DELAY) {
            match value.trim().parse::<u64>() {
                Ok(ms) => self.exhaust_delay_ms = ms,
                Err(_) => tracing::warn!(
                    "[RENDER-LOOP] Ignoring {}={:?}: not a number of milliseconds",
                    ENV_EXHAUST_DELAY,
                    value
                ),
            }
        }
        self
    }

    pub fn from_toml_str(source: &str) -> Result<Self> {
        toml::from_str(source).map_err(|e| RenderLoopError::Config(e.to_string()))
    }

    /// Load a TOML file, then apply the process environment on top
    pub fn load(path: &Path) -> Result<Self> {
        let source = std::fs::read_to_string(path)
            .map_err(|e| RenderLoopError::Config(format!("{}: {}", path.display(), e)))?;
        Ok(Self::from_toml_str(&source)?.with_overrides(|key| std::env::var(key).ok()))
    }

    pub fn exhaust_delay(&self) -> Duration {
        Duration::from_millis(self.exhaust_delay_ms)
    }

    pub fn timing_mode(&self) -> TimingMode {
        if self.consistent_timing {
            TimingMode::Consistent
        } else {
            TimingMode::WallClock
        }
    }

    /// Animation interval for a display reporting `refresh_rate`. Unknown or
    /// unusable rates (zero, negative, below 1 Hz) use `fallback_refresh_rate`.
    pub fn animation_interval(&self, refresh_rate: Option<f64>) -> Duration {
        let usable = refresh_rate.filter(|rate| rate.is_finite() && *rate >= 1.0);
        animation_interval(usable.or(Some(self.fallback_refresh_rate)))
    }
}

fn env_flag(value: &str) -> bool {
    let value = value.trim();
    !value.is_empty()
        && !matches!(
            value.to_ascii_lowercase().as_str(),
            "0" | "false" | "no" | "off"
        )
}
