//! Collaborator contracts
//!
//! The render loops coordinate threads; they do not draw. Everything that
//! touches a real window system or GPU sits behind the traits in this module:
//!
//! - [`RenderWindow`]: the window and its control-thread scene (polish, notifications)
//! - [`SceneGraph`]: the render-thread-owned graph and renderer (sync, render)
//! - [`GpuContext`]: a context that is moved into its render thread exactly once
//! - [`Platform`]: factory for contexts, offscreen surfaces and scene graphs
//!
//! A CPU implementation lives in [`crate::headless`].

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use image::RgbaImage;
use serde::{Deserialize, Serialize};

use crate::animation::AnimationController;

/// Window ID type (u64 so the core stays decoupled from any windowing crate)
pub type WindowId = u64;

/// Shared handle to a window, cloned freely between the control and render threads
pub type SharedWindow = Arc<dyn RenderWindow>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Size {
    pub width: i32,
    pub height: i32,
}

impl Size {
    pub const fn new(width: i32, height: i32) -> Self {
        Self { width, height }
    }

    /// A size with a non-positive dimension can never be handed a GPU context.
    pub fn is_empty(&self) -> bool {
        self.width <= 0 || self.height <= 0
    }
}

impl fmt::Display for Size {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl Rect {
    pub const fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self { x, y, width, height }
    }

    pub fn size(&self) -> Size {
        Size::new(self.width, self.height)
    }

    pub fn is_empty(&self) -> bool {
        self.size().is_empty()
    }

    pub fn intersects(&self, other: &Rect) -> bool {
        if self.is_empty() || other.is_empty() {
            return false;
        }
        self.x < other.x + other.width
            && other.x < self.x + self.width
            && self.y < other.y + other.height
            && other.y < self.y + self.height
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GraphicsApi {
    #[default]
    OpenGl,
    OpenGlEs,
}

impl fmt::Display for GraphicsApi {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GraphicsApi::OpenGl => write!(f, "OpenGL"),
            GraphicsApi::OpenGlEs => write!(f, "OpenGL ES"),
        }
    }
}

/// Context/surface configuration requested when a window is first exposed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct SurfaceFormat {
    pub api: GraphicsApi,
    pub alpha_buffer_size: u8,
    pub depth_buffer_size: u8,
    pub stencil_buffer_size: u8,
    pub samples: u8,
    pub swap_interval: u8,
}

impl Default for SurfaceFormat {
    fn default() -> Self {
        Self {
            api: GraphicsApi::OpenGl,
            alpha_buffer_size: 0,
            depth_buffer_size: 24,
            stencil_buffer_size: 8,
            samples: 0,
            swap_interval: 1,
        }
    }
}

impl SurfaceFormat {
    pub fn has_alpha(&self) -> bool {
        self.alpha_buffer_size > 0
    }
}

/// Handle to a share group that independent contexts can join
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ShareGroup(pub u64);

/// Offscreen surface used to make a context current after the platform window is gone
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OffscreenSurface {
    pub id: u64,
    pub format: SurfaceFormat,
}

/// Target a context can be made current on
#[derive(Clone, Copy)]
pub enum Surface<'a> {
    Window(&'a dyn RenderWindow),
    Offscreen(&'a OffscreenSurface),
}

impl Surface<'_> {
    pub fn window_id(&self) -> Option<WindowId> {
        match self {
            Surface::Window(window) => Some(window.id()),
            Surface::Offscreen(_) => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PlatformCapabilities {
    /// Contexts may be created on one thread and made current on another
    pub threaded_context: bool,
    /// The platform ships its own loop variant and should get it regardless
    pub prefers_platform_loop: bool,
}

/// Set by the renderer whenever the graph changed in a way that needs a new frame.
#[derive(Debug, Clone, Default)]
pub struct SceneChangeNotifier {
    changed: Arc<AtomicBool>,
}

impl SceneChangeNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn notify(&self) {
        self.changed.store(true, Ordering::Release);
    }

    pub fn take(&self) -> bool {
        self.changed.swap(false, Ordering::AcqRel)
    }
}

/// A window the loops render into.
///
/// Shared between the control thread and the window's render thread, so every
/// method takes `&self`. Steps documented as control-thread-only are only ever
/// invoked there by the loops.
pub trait RenderWindow: Send + Sync {
    fn id(&self) -> WindowId;

    fn size(&self) -> Size;

    fn geometry(&self) -> Rect {
        let size = self.size();
        Rect::new(0, 0, size.width, size.height)
    }

    /// Available geometry of the screen the window lives on, if known
    fn screen_geometry(&self) -> Option<Rect> {
        None
    }

    fn is_top_level(&self) -> bool {
        true
    }

    fn is_exposed(&self) -> bool;

    fn is_visible(&self) -> bool;

    fn is_renderable(&self) -> bool {
        self.is_exposed() && self.is_visible() && !self.size().is_empty()
    }

    fn requested_format(&self) -> SurfaceFormat {
        SurfaceFormat::default()
    }

    fn has_platform_handle(&self) -> bool;

    fn create_platform_handle(&self);

    /// Keep the scene graph alive across obscure/expose cycles
    fn persistent_scene_graph(&self) -> bool {
        true
    }

    /// Keep the GPU context alive across obscure/expose cycles
    fn persistent_context(&self) -> bool {
        true
    }

    fn refresh_rate(&self) -> Option<f64> {
        None
    }

    fn clear_color_alpha(&self) -> u8 {
        255
    }

    /// Lock that render-thread animators are advanced under
    fn animation_controller(&self) -> Option<Arc<AnimationController>> {
        None
    }

    /// Control thread: flush delivery-synchronous events (e.g. deferred input).
    /// Delivery may close the window.
    fn deliver_pending_events(&self) {}

    /// Control thread: commit pending item state before a frame is synced.
    fn polish_items(&self);

    fn about_to_animate(&self) {}

    fn context_created(&self, _format: &SurfaceFormat) {}

    fn frame_swapped(&self) {}

    fn about_to_stop(&self) {}
}

/// Render-thread-owned scene graph and renderer for one window.
pub trait SceneGraph {
    fn is_initialized(&self) -> bool;

    /// Called with the context current, before the first sync.
    fn initialize(&mut self);

    /// Merge control-thread scene state into the render-side graph.
    /// May create the renderer lazily.
    fn sync(&mut self, window: &dyn RenderWindow);

    fn has_renderer(&self) -> bool;

    /// Installed once, right after the renderer is created.
    fn set_change_notifier(&mut self, notifier: SceneChangeNotifier);

    fn render(&mut self, size: Size);

    fn process_deferred_deletes(&mut self) {}

    /// Release every GPU-side resource and drop the renderer.
    fn invalidate(&mut self);
}

/// A GPU context. Created on the control thread, then owned by exactly one render thread.
pub trait GpuContext: Send {
    fn format(&self) -> SurfaceFormat;

    fn make_current(&mut self, surface: Surface<'_>) -> bool;

    fn done_current(&mut self);

    fn swap_buffers(&mut self, window: &dyn RenderWindow);

    /// `false` once the underlying context was lost
    fn is_valid(&self) -> bool;

    /// Rebuild a lost context in place
    fn recreate(&mut self) -> bool;

    fn read_framebuffer(&mut self, size: Size, alpha: bool, premultiplied: bool) -> RgbaImage;
}

/// Window-system integration used by the loops.
pub trait Platform: Send + Sync {
    fn capabilities(&self) -> PlatformCapabilities;

    fn global_share_context(&self) -> Option<ShareGroup> {
        None
    }

    fn create_context(
        &self,
        format: &SurfaceFormat,
        share: Option<ShareGroup>,
    ) -> std::result::Result<Box<dyn GpuContext>, String>;

    fn create_offscreen_surface(&self, format: &SurfaceFormat) -> Option<OffscreenSurface>;

    fn create_scene_graph(&self, window: &SharedWindow) -> Box<dyn SceneGraph>;

    /// Refresh rate of the primary screen
    fn refresh_rate(&self) -> Option<f64> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_size_emptiness() {
        assert!(Size::new(0, 600).is_empty());
        assert!(Size::new(800, -1).is_empty());
        assert!(!Size::new(800, 600).is_empty());
    }

    #[test]
    fn test_rect_intersection() {
        let screen = Rect::new(0, 0, 1920, 1080);
        assert!(Rect::new(100, 100, 800, 600).intersects(&screen));
        assert!(!Rect::new(5000, 5000, 800, 600).intersects(&screen));
        assert!(!Rect::new(1920, 0, 100, 100).intersects(&screen));
    }

    #[test]
    fn test_change_notifier_is_shared() {
        let notifier = SceneChangeNotifier::new();
        let renderer_side = notifier.clone();

        assert!(!notifier.take());
        renderer_side.notify();
        assert!(notifier.take());
        assert!(!notifier.take());
    }
}
