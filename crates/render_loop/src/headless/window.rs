use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::animation::AnimationController;
use crate::backend::{Rect, RenderWindow, Size, SurfaceFormat, WindowId};

use super::scene::SceneContent;
use super::{Call, HeadlessJournal};

/// Runs inside every scene graph sync of the window, on the thread doing the sync
pub type SyncHook = Arc<dyn Fn(WindowId) + Send + Sync>;

#[derive(Debug, Default)]
struct Notifications {
    polishes: AtomicU64,
    contexts_created: AtomicU64,
    stops: AtomicU64,
}

/// A window with no platform behind it. Starts hidden, unexposed and without a platform handle.
pub struct HeadlessWindow {
    id: WindowId,
    journal: HeadlessJournal,
    content: Arc<SceneContent>,
    geometry: Mutex<Rect>,
    screen: Mutex<Option<Rect>>,
    format: Mutex<SurfaceFormat>,
    refresh_rate: Mutex<Option<f64>>,
    clear_alpha: Mutex<u8>,
    exposed: AtomicBool,
    visible: AtomicBool,
    platform_handle: AtomicBool,
    persistent_scene_graph: AtomicBool,
    persistent_context: AtomicBool,
    animation_controller: Mutex<Option<Arc<AnimationController>>>,
    notifications: Notifications,
    frames: Mutex<u64>,
    frame_signal: Condvar,
}

impl HeadlessWindow {
    pub(crate) fn new(id: WindowId, size: Size, journal: HeadlessJournal) -> Self {
        Self {
            id,
            journal,
            content: Arc::new(SceneContent::default()),
            geometry: Mutex::new(Rect::new(0, 0, size.width, size.height)),
            screen: Mutex::new(None),
            format: Mutex::new(SurfaceFormat::default()),
            refresh_rate: Mutex::new(None),
            clear_alpha: Mutex::new(255),
            exposed: AtomicBool::new(false),
            visible: AtomicBool::new(false),
            platform_handle: AtomicBool::new(false),
            persistent_scene_graph: AtomicBool::new(true),
            persistent_context: AtomicBool::new(true),
            animation_controller: Mutex::new(None),
            notifications: Notifications::default(),
            frames: Mutex::new(0),
            frame_signal: Condvar::new(),
        }
    }

    pub(crate) fn content(&self) -> Arc<SceneContent> {
        self.content.clone()
    }

    /// Make the window visible and exposed in one step
    pub fn show_exposed(&self) {
        self.set_visible(true);
        self.set_exposed(true);
    }

    pub fn set_exposed(&self, exposed: bool) {
        self.exposed.store(exposed, Ordering::Release);
    }

    pub fn set_visible(&self, visible: bool) {
        self.visible.store(visible, Ordering::Release);
    }

    pub fn set_size(&self, size: Size) {
        let mut geometry = self.geometry.lock();
        geometry.width = size.width;
        geometry.height = size.height;
    }

    pub fn set_position(&self, x: i32, y: i32) {
        let mut geometry = self.geometry.lock();
        geometry.x = x;
        geometry.y = y;
    }

    pub fn set_screen_geometry(&self, screen: Option<Rect>) {
        *self.screen.lock() = screen;
    }

    pub fn set_format(&self, format: SurfaceFormat) {
        *self.format.lock() = format;
    }

    pub fn set_refresh_rate(&self, refresh_rate: Option<f64>) {
        *self.refresh_rate.lock() = refresh_rate;
    }

    pub fn set_clear_color_alpha(&self, alpha: u8) {
        *self.clear_alpha.lock() = alpha;
    }

    /// Simulate the platform window going away while the scene lives on
    pub fn destroy_platform_handle(&self) {
        self.platform_handle.store(false, Ordering::Release);
    }

    pub fn set_persistence(&self, scene_graph: bool, context: bool) {
        self.persistent_scene_graph.store(scene_graph, Ordering::Release);
        self.persistent_context.store(context, Ordering::Release);
    }

    pub fn set_animation_controller(&self, controller: Option<Arc<AnimationController>>) {
        *self.animation_controller.lock() = controller;
    }

    pub fn set_sync_hook(&self, hook: Option<SyncHook>) {
        self.content.set_sync_hook(hook);
    }

    /// Change the content color; the next sync reports a scene change
    pub fn set_color(&self, color: [u8; 4]) {
        self.content.set_color(color);
    }

    /// Report a scene change without changing what is drawn
    pub fn mark_dirty(&self) {
        self.content.mark_dirty();
    }

    pub fn polish_count(&self) -> u64 {
        self.notifications.polishes.load(Ordering::Acquire)
    }

    pub fn context_created_count(&self) -> u64 {
        self.notifications.contexts_created.load(Ordering::Acquire)
    }

    pub fn about_to_stop_count(&self) -> u64 {
        self.notifications.stops.load(Ordering::Acquire)
    }

    pub fn frames_swapped(&self) -> u64 {
        *self.frames.lock()
    }

    /// Block until at least `count` frames were swapped. Returns `false` on timeout.
    pub fn wait_for_frames(&self, count: u64, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut frames = self.frames.lock();
        while *frames < count {
            if self.frame_signal.wait_until(&mut frames, deadline).timed_out() {
                return *frames >= count;
            }
        }
        true
    }
}

impl RenderWindow for HeadlessWindow {
    fn id(&self) -> WindowId {
        self.id
    }

    fn size(&self) -> Size {
        self.geometry.lock().size()
    }

    fn geometry(&self) -> Rect {
        *self.geometry.lock()
    }

    fn screen_geometry(&self) -> Option<Rect> {
        *self.screen.lock()
    }

    fn is_exposed(&self) -> bool {
        self.exposed.load(Ordering::Acquire)
    }

    fn is_visible(&self) -> bool {
        self.visible.load(Ordering::Acquire)
    }

    fn requested_format(&self) -> SurfaceFormat {
        *self.format.lock()
    }

    fn has_platform_handle(&self) -> bool {
        self.platform_handle.load(Ordering::Acquire)
    }

    fn create_platform_handle(&self) {
        if !self.platform_handle.swap(true, Ordering::AcqRel) {
            self.journal.record(Some(self.id), Call::PlatformHandleCreated);
        }
    }

    fn persistent_scene_graph(&self) -> bool {
        self.persistent_scene_graph.load(Ordering::Acquire)
    }

    fn persistent_context(&self) -> bool {
        self.persistent_context.load(Ordering::Acquire)
    }

    fn refresh_rate(&self) -> Option<f64> {
        *self.refresh_rate.lock()
    }

    fn clear_color_alpha(&self) -> u8 {
        *self.clear_alpha.lock()
    }

    fn animation_controller(&self) -> Option<Arc<AnimationController>> {
        self.animation_controller.lock().clone()
    }

    fn polish_items(&self) {
        self.notifications.polishes.fetch_add(1, Ordering::AcqRel);
        self.journal.record(Some(self.id), Call::Polish);
    }

    fn about_to_animate(&self) {
        self.journal.record(Some(self.id), Call::AboutToAnimate);
    }

    fn context_created(&self, _format: &SurfaceFormat) {
        self.notifications.contexts_created.fetch_add(1, Ordering::AcqRel);
    }

    fn frame_swapped(&self) {
        self.journal.record(Some(self.id), Call::FrameSwapped);
        let mut frames = self.frames.lock();
        *frames += 1;
        self.frame_signal.notify_all();
    }

    fn about_to_stop(&self) {
        self.notifications.stops.fetch_add(1, Ordering::AcqRel);
        self.journal.record(Some(self.id), Call::AboutToStop);
    }
}
