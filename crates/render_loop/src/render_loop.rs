//! The contract every render loop implements.
//!
//! The windowing layer forwards its window events here. All calls are made on
//! the control thread; `maybe_update` and `update` are the only entry points a
//! render thread may use, and only for its own window while it is syncing.
//!
//! The trait carries no `Send`/`Sync` bound: the single-thread loop owns its
//! scene graphs directly and never leaves the control thread.

use std::time::Duration;

use image::RgbaImage;

use crate::backend::{SharedWindow, WindowId};
use crate::error::{ErrorHandler, FatalHandler, Result};
use crate::selector::RenderLoopKind;

pub trait RenderLoop {
    fn kind(&self) -> RenderLoopKind;

    fn show(&self, window: &SharedWindow);

    /// Obscure the window if it is being rendered, then release its resources.
    fn hide(&self, window: WindowId);

    fn resize(&self, window: WindowId);

    /// Tear the window down completely. Returns once no thread touches it anymore.
    fn window_destroyed(&self, window: WindowId);

    /// The window's exposure flag changed. Fails only when rendering resources
    /// could not be created for a newly exposed window.
    fn exposure_changed(&self, window: &SharedWindow) -> Result<()>;

    /// Schedule a coalesced polish + sync
    fn maybe_update(&self, window: WindowId) -> Result<()>;

    /// Like [`RenderLoop::maybe_update`], but the next pass renders even without scene changes
    fn update(&self, window: WindowId) -> Result<()>;

    /// Synchronously render the window and read the frame back
    fn grab(&self, window: WindowId) -> Result<Option<RgbaImage>>;

    fn release_resources(&self, window: WindowId);

    fn animation_started(&self);

    fn animation_stopped(&self);

    /// Dispatch due timers and events posted back to the control thread.
    /// Waits at most `max_wait` when nothing is ready. Returns the number of events handled.
    fn process_events(&self, max_wait: Duration) -> usize;

    fn set_error_handler(&self, handler: Option<ErrorHandler>);

    fn set_fatal_handler(&self, handler: FatalHandler);

    /// Destroy every window still managed by the loop
    fn cleanup(&self);
}
