//! Single-thread render loop
//!
//! Polish, sync, render and swap all run on the control thread, with one GPU
//! context shared by every window. Update requests are batched by a short
//! coalescing timer and rendered when the application pumps `process_events`.
//!
//! Two flavours share this implementation:
//!
//! - [`RenderLoopKind::Basic`]: a repeating animation timer advances the
//!   animation driver and schedules a pass for every exposed window.
//! - [`RenderLoopKind::Windows`]: no separate animation timer; each batched
//!   render pass advances the driver first and re-arms itself while animations run.
//!
//! The loop holds render-side state in `RefCell`s and is neither `Send` nor
//! `Sync`, so calls from any other thread are rejected at compile time.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use image::RgbaImage;

use crate::animation::AnimationDriver;
use crate::backend::{GpuContext, Platform, SceneGraph, SharedWindow, Surface, WindowId};
use crate::config::RenderLoopConfig;
use crate::control::{ControlEvent, ControlQueue, TimerId};
use crate::error::{ErrorHandler, ErrorSink, FatalHandler, RenderLoopError, Result};
use crate::render_loop::RenderLoop;
use crate::selector::RenderLoopKind;

struct GuiWindowData {
    window: SharedWindow,
    update_pending: bool,
    grab_only: bool,
}

pub struct GuiThreadRenderLoop {
    kind: RenderLoopKind,
    platform: Arc<dyn Platform>,
    config: RenderLoopConfig,
    windows: RefCell<HashMap<WindowId, GuiWindowData>>,
    scenes: RefCell<HashMap<WindowId, Box<dyn SceneGraph>>>,
    gl: RefCell<Option<Box<dyn GpuContext>>>,
    control: ControlQueue,
    update_timer: Cell<Option<TimerId>>,
    animation_driver: RefCell<AnimationDriver>,
    animation_timer: Cell<Option<TimerId>>,
    grab_content: RefCell<Option<RgbaImage>>,
    frames_swapped: Cell<u64>,
    errors: ErrorSink,
}

impl GuiThreadRenderLoop {
    pub fn new(kind: RenderLoopKind, platform: Arc<dyn Platform>, config: RenderLoopConfig) -> Self {
        let interval = config.animation_interval(platform.refresh_rate());
        tracing::debug!("[GUI-LOOP] {} loop created (animation interval {:?})", kind, interval);

        Self {
            kind,
            animation_driver: RefCell::new(AnimationDriver::new(config.timing_mode(), interval)),
            platform,
            config,
            windows: RefCell::new(HashMap::new()),
            scenes: RefCell::new(HashMap::new()),
            gl: RefCell::new(None),
            control: ControlQueue::new(),
            update_timer: Cell::new(None),
            animation_timer: Cell::new(None),
            grab_content: RefCell::new(None),
            frames_swapped: Cell::new(0),
            errors: ErrorSink::new(),
        }
    }

    pub fn has_context(&self) -> bool {
        self.gl.borrow().is_some()
    }

    pub fn frames_swapped(&self) -> u64 {
        self.frames_swapped.get()
    }

    pub fn is_update_pending(&self, window: WindowId) -> bool {
        self.windows
            .borrow()
            .get(&window)
            .is_some_and(|data| data.update_pending)
    }

    pub fn is_update_scheduled(&self) -> bool {
        self.update_timer.get().is_some()
    }

    pub fn is_animation_timer_active(&self) -> bool {
        self.animation_timer.get().is_some()
    }

    pub fn animation_advance_count(&self) -> u64 {
        self.animation_driver.borrow().advance_count()
    }

    fn register(&self, window: &SharedWindow) {
        self.windows
            .borrow_mut()
            .entry(window.id())
            .or_insert_with(|| GuiWindowData {
                window: window.clone(),
                update_pending: false,
                grab_only: false,
            });
    }

    fn schedule_pass(&self) {
        if self.update_timer.get().is_none() {
            let first = self.windows.borrow().keys().next().copied().unwrap_or_default();
            self.update_timer.set(Some(self.control.start_timer(
                self.config.exhaust_delay(),
                ControlEvent::UpdateRequest(first),
            )));
        }
    }

    fn render_window(&self, id: WindowId) -> Result<()> {
        profiling::profile_scope!("render_window");

        let window = match self.windows.borrow().get(&id) {
            Some(data) => data.window.clone(),
            None => return Ok(()),
        };
        if !window.is_renderable() {
            tracing::trace!("[GUI-LOOP] window {} not renderable, skipped", id);
            return Ok(());
        }
        if !window.has_platform_handle() {
            window.create_platform_handle();
        }

        // Taken out for the duration of the pass so callbacks may re-enter the loop
        let mut gl = self.gl.borrow_mut().take();
        let scene = self.scenes.borrow_mut().remove(&id);
        let mut scene_lost = false;

        let mut current = false;
        if let Some(context) = gl.as_mut() {
            current = context.make_current(Surface::Window(window.as_ref()));
            if !current && !context.is_valid() {
                tracing::warn!("[GUI-LOOP] GPU context lost, recreating");
                scene_lost = true;
                for other in self.scenes.borrow_mut().values_mut() {
                    other.invalidate();
                }
                current = context.recreate() && context.make_current(Surface::Window(window.as_ref()));
            }
        }

        if gl.is_none() {
            let format = window.requested_format();
            match self
                .platform
                .create_context(&format, self.platform.global_share_context())
            {
                Ok(mut context) => {
                    window.context_created(&context.format());
                    current = context.make_current(Surface::Window(window.as_ref()));
                    tracing::debug!("[GUI-LOOP] ✅ shared context created for window {}", id);
                    gl = Some(context);
                }
                Err(reason) => {
                    self.restore(id, gl, scene);
                    // Reported once; the next exposure or update tries again
                    if let Some(data) = self.windows.borrow_mut().get_mut(&id) {
                        data.update_pending = false;
                    }
                    let error = RenderLoopError::ContextCreation {
                        window: id,
                        api: format.api,
                        reason,
                    };
                    self.errors.report(&error);
                    return Err(error);
                }
            }
        }

        if !current {
            tracing::debug!("[GUI-LOOP] window {} could not be made current, pass skipped", id);
            self.restore(id, gl, scene);
            if self.is_update_pending(id) {
                self.schedule_pass();
            }
            return Ok(());
        }

        // A grab never presents; a pending update stays for the next normal pass
        let (also_swap, grab_only) = match self.windows.borrow_mut().get_mut(&id) {
            Some(data) if data.grab_only => (false, true),
            Some(data) => (std::mem::take(&mut data.update_pending), false),
            None => (false, false),
        };

        if !grab_only {
            window.deliver_pending_events();
            // Event delivery may have destroyed the window or stopped its rendering
            if !self.windows.borrow().contains_key(&id) {
                self.restore(id, gl, scene);
                return Ok(());
            }
        }

        let mut scene = scene.unwrap_or_else(|| self.platform.create_scene_graph(&window));
        if scene_lost {
            scene.invalidate();
        }
        if !scene.is_initialized() {
            scene.initialize();
        }

        {
            profiling::profile_scope!("polish");
            window.polish_items();
        }
        window.about_to_animate();
        {
            profiling::profile_scope!("sync");
            scene.sync(window.as_ref());
            scene.process_deferred_deletes();
        }
        let size = window.size();
        {
            profiling::profile_scope!("render");
            scene.render(size);
        }

        let mut swapped = false;
        if let Some(context) = gl.as_mut() {
            if grab_only {
                let alpha = window.requested_format().has_alpha() && window.clear_color_alpha() != 255;
                *self.grab_content.borrow_mut() = Some(context.read_framebuffer(size, alpha, alpha));
            }

            if also_swap && window.is_visible() {
                profiling::profile_scope!("swap");
                context.swap_buffers(window.as_ref());
                self.frames_swapped.set(self.frames_swapped.get() + 1);
                swapped = true;
            }
        }
        if grab_only {
            if let Some(data) = self.windows.borrow_mut().get_mut(&id) {
                data.grab_only = false;
            }
        }

        self.restore(id, gl, Some(scene));

        if swapped {
            window.frame_swapped();
        }

        // Might have been requested again during sync
        if self.is_update_pending(id) {
            self.schedule_pass();
        }
        Ok(())
    }

    fn restore(
        &self,
        id: WindowId,
        gl: Option<Box<dyn GpuContext>>,
        scene: Option<Box<dyn SceneGraph>>,
    ) {
        if let Some(gl) = gl {
            self.gl.borrow_mut().get_or_insert(gl);
        }
        if let Some(mut scene) = scene {
            if self.windows.borrow().contains_key(&id) {
                self.scenes.borrow_mut().insert(id, scene);
            } else {
                scene.invalidate();
            }
        }
    }

    fn render_pending_windows(&self) {
        if self.kind == RenderLoopKind::Windows {
            let mut driver = self.animation_driver.borrow_mut();
            if driver.is_running() {
                driver.advance();
            }
        }

        let pending: Vec<WindowId> = self
            .windows
            .borrow()
            .iter()
            .filter(|(_, data)| data.update_pending)
            .map(|(id, _)| *id)
            .collect();
        for id in pending {
            // Creation failures were already reported when the window was exposed
            let _ = self.render_window(id);
        }

        if self.kind == RenderLoopKind::Windows && self.animation_driver.borrow().is_running() {
            self.request_all_exposed();
        }
    }

    fn request_all_exposed(&self) {
        let exposed: Vec<WindowId> = self
            .windows
            .borrow()
            .iter()
            .filter(|(_, data)| data.window.is_exposed())
            .map(|(id, _)| *id)
            .collect();
        for id in exposed {
            let _ = self.maybe_update(id);
        }
    }
}

impl RenderLoop for GuiThreadRenderLoop {
    fn kind(&self) -> RenderLoopKind {
        self.kind
    }

    fn show(&self, window: &SharedWindow) {
        tracing::debug!("[GUI-LOOP] show() window {}", window.id());
        self.register(window);
        let _ = self.maybe_update(window.id());
    }

    fn hide(&self, window: WindowId) {
        let shown = self.windows.borrow().get(&window).map(|data| data.window.clone());
        let Some(shown) = shown else {
            return;
        };
        tracing::debug!("[GUI-LOOP] hide() window {}", window);
        shown.about_to_stop();
        if let Some(data) = self.windows.borrow_mut().get_mut(&window) {
            data.update_pending = false;
        }
    }

    fn resize(&self, window: WindowId) {
        let _ = self.maybe_update(window);
    }

    fn window_destroyed(&self, window: WindowId) {
        let Some(data) = self.windows.borrow_mut().remove(&window) else {
            return;
        };
        tracing::debug!("[GUI-LOOP] window_destroyed() window {}", window);
        data.window.about_to_stop();

        let fallback = if data.window.has_platform_handle() {
            None
        } else {
            self.platform
                .create_offscreen_surface(&data.window.requested_format())
        };

        let mut gl = self.gl.borrow_mut().take();
        let current = gl.as_mut().is_some_and(|context| {
            let surface = match fallback.as_ref() {
                Some(offscreen) => Surface::Offscreen(offscreen),
                None => Surface::Window(data.window.as_ref()),
            };
            context.make_current(surface)
        });
        if !current {
            tracing::debug!("[GUI-LOOP] cleanup of window {} without a current context", window);
        }

        if let Some(mut scene) = self.scenes.borrow_mut().remove(&window) {
            scene.invalidate();
            scene.process_deferred_deletes();
        }

        if self.windows.borrow().is_empty() {
            if gl.take().is_some() {
                tracing::debug!("[GUI-LOOP] last window gone, shared context released");
            }
        } else if let Some(context) = gl.as_mut() {
            if current {
                context.done_current();
            }
        }
        if let Some(gl) = gl {
            *self.gl.borrow_mut() = Some(gl);
        }
    }

    fn exposure_changed(&self, window: &SharedWindow) -> Result<()> {
        if !window.is_exposed() {
            return Ok(());
        }
        self.register(window);
        if let Some(data) = self.windows.borrow_mut().get_mut(&window.id()) {
            data.update_pending = true;
        }
        self.render_window(window.id())
    }

    fn maybe_update(&self, window: WindowId) -> Result<()> {
        {
            let mut windows = self.windows.borrow_mut();
            let Some(data) = windows.get_mut(&window) else {
                return Ok(());
            };
            data.update_pending = true;
        }
        self.schedule_pass();
        Ok(())
    }

    fn update(&self, window: WindowId) -> Result<()> {
        // Every pass of this loop renders, so a forced repaint is a plain update
        self.maybe_update(window)
    }

    fn grab(&self, window: WindowId) -> Result<Option<RgbaImage>> {
        profiling::profile_scope!("grab");
        {
            let mut windows = self.windows.borrow_mut();
            let data = windows
                .get_mut(&window)
                .ok_or(RenderLoopError::UnknownWindow(window))?;
            data.grab_only = true;
        }

        self.render_window(window)?;

        if let Some(data) = self.windows.borrow_mut().get_mut(&window) {
            data.grab_only = false;
        }
        Ok(self.grab_content.borrow_mut().take())
    }

    fn release_resources(&self, window: WindowId) {
        // Caches only; the shared context stays alive
        if let Some(scene) = self.scenes.borrow_mut().get_mut(&window) {
            scene.process_deferred_deletes();
        }
    }

    fn animation_started(&self) {
        tracing::debug!("[GUI-LOOP] animations started");
        self.animation_driver.borrow_mut().start();

        if self.kind == RenderLoopKind::Basic && self.animation_timer.get().is_none() {
            let interval = self.animation_driver.borrow().interval();
            self.animation_timer
                .set(Some(self.control.start_repeating(interval, ControlEvent::AnimationTick)));
        }
        self.request_all_exposed();
    }

    fn animation_stopped(&self) {
        tracing::debug!("[GUI-LOOP] animations stopped");
        self.animation_driver.borrow_mut().stop();
        if let Some(timer) = self.animation_timer.take() {
            self.control.kill_timer(timer);
        }
    }

    fn process_events(&self, max_wait: Duration) -> usize {
        let events = self.control.wait_for_events(max_wait);
        let handled = events.len();

        let mut rendered = false;
        for event in events {
            match event {
                ControlEvent::UpdateRequest(_) => {
                    if let Some(timer) = self.update_timer.take() {
                        self.control.kill_timer(timer);
                    }
                    if !rendered {
                        rendered = true;
                        self.render_pending_windows();
                    }
                }
                ControlEvent::AnimationTick => {
                    self.animation_driver.borrow_mut().advance();
                    self.request_all_exposed();
                }
            }
        }
        handled
    }

    fn set_error_handler(&self, handler: Option<ErrorHandler>) {
        self.errors.set_handler(handler);
    }

    fn set_fatal_handler(&self, handler: FatalHandler) {
        self.errors.set_fatal_handler(handler);
    }

    fn cleanup(&self) {
        let ids: Vec<WindowId> = self.windows.borrow().keys().copied().collect();
        for id in ids {
            self.window_destroyed(id);
        }
        if let Some(timer) = self.animation_timer.take() {
            self.control.kill_timer(timer);
        }
    }
}

impl Drop for GuiThreadRenderLoop {
    fn drop(&mut self) {
        self.cleanup();
    }
}
