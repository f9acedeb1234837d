use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::backend::{RenderWindow, SceneChangeNotifier, SceneGraph, Size, WindowId};

use super::platform::HeadlessGpu;
use super::window::SyncHook;
use super::{Call, HeadlessJournal};

/// Control-thread side of a headless scene: what the next sync picks up
pub(crate) struct SceneContent {
    generation: AtomicU64,
    color: Mutex<[u8; 4]>,
    sync_hook: Mutex<Option<SyncHook>>,
}

impl Default for SceneContent {
    fn default() -> Self {
        Self {
            generation: AtomicU64::new(0),
            color: Mutex::new([0, 0, 0, 255]),
            sync_hook: Mutex::new(None),
        }
    }
}

impl SceneContent {
    pub(crate) fn set_color(&self, color: [u8; 4]) {
        *self.color.lock() = color;
        self.mark_dirty();
    }

    pub(crate) fn mark_dirty(&self) {
        self.generation.fetch_add(1, Ordering::AcqRel);
    }

    pub(crate) fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    pub(crate) fn color(&self) -> [u8; 4] {
        *self.color.lock()
    }

    pub(crate) fn set_sync_hook(&self, hook: Option<SyncHook>) {
        *self.sync_hook.lock() = hook;
    }

    fn sync_hook(&self) -> Option<SyncHook> {
        self.sync_hook.lock().clone()
    }
}

struct Renderer {
    notifier: Option<SceneChangeNotifier>,
    synced_generation: u64,
    color: [u8; 4],
}

/// Render-side graph: created lazily on the first sync, fills frames with the synced color
pub struct HeadlessSceneGraph {
    window: WindowId,
    content: Arc<SceneContent>,
    gpu: Arc<HeadlessGpu>,
    journal: HeadlessJournal,
    initialized: bool,
    renderer: Option<Renderer>,
    deferred_deletes: u64,
}

impl HeadlessSceneGraph {
    pub(crate) fn new(
        window: WindowId,
        content: Arc<SceneContent>,
        gpu: Arc<HeadlessGpu>,
        journal: HeadlessJournal,
    ) -> Self {
        Self {
            window,
            content,
            gpu,
            journal,
            initialized: false,
            renderer: None,
            deferred_deletes: 0,
        }
    }

    pub fn deferred_deletes(&self) -> u64 {
        self.deferred_deletes
    }
}

impl SceneGraph for HeadlessSceneGraph {
    fn is_initialized(&self) -> bool {
        self.initialized
    }

    fn initialize(&mut self) {
        self.initialized = true;
        self.journal.record(Some(self.window), Call::SceneInitialized);
    }

    fn sync(&mut self, window: &dyn RenderWindow) {
        self.journal.record(Some(window.id()), Call::Sync);

        // Runs with the control thread blocked, like a real item's sync step
        if let Some(hook) = self.content.sync_hook() {
            hook(window.id());
        }

        let generation = self.content.generation();
        let color = self.content.color();
        match self.renderer.as_mut() {
            None => {
                tracing::trace!("[HEADLESS] renderer created for window {}", self.window);
                self.renderer = Some(Renderer {
                    notifier: None,
                    synced_generation: generation,
                    color,
                });
            }
            Some(renderer) if renderer.synced_generation != generation => {
                renderer.synced_generation = generation;
                renderer.color = color;
                if let Some(notifier) = renderer.notifier.as_ref() {
                    notifier.notify();
                }
            }
            Some(_) => {}
        }
    }

    fn has_renderer(&self) -> bool {
        self.renderer.is_some()
    }

    fn set_change_notifier(&mut self, notifier: SceneChangeNotifier) {
        if let Some(renderer) = self.renderer.as_mut() {
            renderer.notifier = Some(notifier);
        }
    }

    fn render(&mut self, size: Size) {
        self.journal.record(Some(self.window), Call::Render(size));
        if let Some(renderer) = self.renderer.as_ref() {
            self.gpu.store_frame(self.window, size, renderer.color);
        }
    }

    fn process_deferred_deletes(&mut self) {
        self.deferred_deletes += 1;
    }

    fn invalidate(&mut self) {
        self.journal.record(Some(self.window), Call::Invalidate);
        self.renderer = None;
        self.initialized = false;
        self.gpu.framebuffers.remove(&self.window);
    }
}
