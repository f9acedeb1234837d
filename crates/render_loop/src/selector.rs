//! Render loop selection and the process-wide instance
//!
//! Decision table, evaluated once per process:
//!
//! | platform                         | default    |
//! |----------------------------------|------------|
//! | prefers its own loop             | `windows`  |
//! | contexts usable across threads   | `threaded` |
//! | otherwise                        | `basic`    |
//!
//! `force_basic` then wins over `force_threaded`, and an explicit loop name
//! overrides both.

use std::fmt;
use std::ops::Deref;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::backend::{Platform, PlatformCapabilities};
use crate::config::RenderLoopConfig;
use crate::error::{RenderLoopError, Result};
use crate::gui_thread::GuiThreadRenderLoop;
use crate::render_loop::RenderLoop;
use crate::threaded::ThreadedRenderLoop;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RenderLoopKind {
    Basic,
    Threaded,
    Windows,
}

impl fmt::Display for RenderLoopKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RenderLoopKind::Basic => write!(f, "basic"),
            RenderLoopKind::Threaded => write!(f, "threaded"),
            RenderLoopKind::Windows => write!(f, "windows"),
        }
    }
}

impl FromStr for RenderLoopKind {
    type Err = RenderLoopError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "basic" => Ok(RenderLoopKind::Basic),
            "threaded" => Ok(RenderLoopKind::Threaded),
            "windows" => Ok(RenderLoopKind::Windows),
            other => Err(RenderLoopError::Config(format!(
                "unknown render loop '{}' (expected basic, threaded or windows)",
                other
            ))),
        }
    }
}

pub fn select_kind(capabilities: &PlatformCapabilities, config: &RenderLoopConfig) -> RenderLoopKind {
    let mut kind = if capabilities.prefers_platform_loop {
        RenderLoopKind::Windows
    } else if capabilities.threaded_context {
        RenderLoopKind::Threaded
    } else {
        RenderLoopKind::Basic
    };

    if config.force_basic {
        kind = RenderLoopKind::Basic;
    } else if config.force_threaded {
        kind = RenderLoopKind::Threaded;
    }

    if let Some(name) = config.loop_kind.as_deref() {
        match name.parse() {
            Ok(explicit) => kind = explicit,
            Err(e) => tracing::warn!("[RENDER-LOOP] {}, keeping {}", e, kind),
        }
    }

    kind
}

pub fn create_render_loop(
    kind: RenderLoopKind,
    platform: Arc<dyn Platform>,
    config: RenderLoopConfig,
) -> Box<dyn RenderLoop> {
    match kind {
        RenderLoopKind::Threaded => Box::new(ThreadedRenderLoop::new(platform, config)),
        RenderLoopKind::Basic | RenderLoopKind::Windows => {
            Box::new(GuiThreadRenderLoop::new(kind, platform, config))
        }
    }
}

static INSTALLED: AtomicBool = AtomicBool::new(false);

pub fn is_installed() -> bool {
    INSTALLED.load(Ordering::Acquire)
}

/// Select and create the process's render loop. Only one may exist at a time.
pub fn install(platform: Arc<dyn Platform>, config: RenderLoopConfig) -> Result<RenderLoopInstance> {
    if INSTALLED
        .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
        .is_err()
    {
        return Err(RenderLoopError::AlreadyInstalled);
    }

    let kind = select_kind(&platform.capabilities(), &config);
    tracing::info!("[RENDER-LOOP] ✅ using the {} render loop", kind);

    Ok(RenderLoopInstance {
        inner: create_render_loop(kind, platform, config),
    })
}

/// The installed render loop. Dropping it (or calling [`RenderLoopInstance::cleanup`])
/// destroys every window and allows a new install.
pub struct RenderLoopInstance {
    inner: Box<dyn RenderLoop>,
}

impl RenderLoopInstance {
    pub fn cleanup(self) {
        drop(self);
    }
}

impl Deref for RenderLoopInstance {
    type Target = dyn RenderLoop;

    fn deref(&self) -> &Self::Target {
        self.inner.as_ref()
    }
}

impl Drop for RenderLoopInstance {
    fn drop(&mut self) {
        self.inner.cleanup();
        INSTALLED.store(false, Ordering::Release);
        tracing::debug!("[RENDER-LOOP] render loop uninstalled");
    }
}
