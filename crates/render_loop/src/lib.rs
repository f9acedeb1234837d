//! # Pulsar Render Loop
//!
//! Drives scene graph windows through polish, sync, render and swap.
//!
//! Three loop variants sit behind the [`RenderLoop`] trait:
//!
//! - **threaded**: one render thread per exposed window, meeting the control
//!   thread at a blocking sync barrier once per frame
//! - **basic**: everything on the control thread with one shared context
//! - **windows**: like basic, but animations are advanced by the render passes
//!   themselves instead of a separate timer
//!
//! [`install`] picks the variant for the platform and configuration once per
//! process. The loops never draw themselves; windows, GPU contexts and scene
//! graphs are supplied through the traits in [`backend`]. The `headless`
//! feature provides a CPU implementation of all of them.

pub mod animation;
pub mod backend;
pub mod config;
pub mod control;
pub mod error;
pub mod event_queue;
pub mod gui_thread;
pub mod render_loop;
pub mod selector;
pub mod threaded;
pub mod update_mask;

#[cfg(feature = "headless")]
pub mod headless;

pub use animation::{AnimationController, AnimationDriver, TimingMode};
pub use backend::{
    GpuContext, GraphicsApi, OffscreenSurface, Platform, PlatformCapabilities, Rect,
    RenderWindow, SceneChangeNotifier, SceneGraph, ShareGroup, SharedWindow, Size, Surface,
    SurfaceFormat, WindowId,
};
pub use config::RenderLoopConfig;
pub use control::{ControlEvent, ControlQueue, TimerId};
pub use error::{default_fatal_handler, ErrorHandler, FatalHandler, RenderLoopError, Result};
pub use gui_thread::GuiThreadRenderLoop;
pub use render_loop::RenderLoop;
pub use selector::{
    create_render_loop, install, is_installed, select_kind, RenderLoopInstance, RenderLoopKind,
};
pub use threaded::{ThreadedRenderLoop, WindowStatus};
pub use update_mask::{PendingUpdates, UpdateRequest};
