//! Threaded render loop
//!
//! The control thread polishes, the window's render thread syncs, renders and
//! swaps. The two meet once per frame at the sync barrier:
//!
//! ```text
//! control:  polish ── post RequestSync ──▶ wait ─────────────▶ (free again)
//! render:                     take ── sync ── ack ──▶ render ── swap ── frame_swapped
//! ```
//!
//! # Design
//!
//! - One render thread per exposed window, started lazily on first exposure with
//!   a context created here and moved into the thread.
//! - Blocking points on the control thread: sync, obscure, release and grab.
//!   None has a timeout.
//! - A coarse animation timer advances the control-thread animation driver
//!   whenever the number of exposed windows is not exactly one. With a single
//!   window, every polish/sync cycle advances it instead.
//! - `window_destroyed` joins the render thread before the window record is dropped.

mod events;
mod render_thread;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::ThreadId;
use std::time::Duration;

use dashmap::DashMap;
use image::RgbaImage;
use parking_lot::Mutex;

use crate::animation::AnimationDriver;
use crate::backend::{Platform, SharedWindow, SurfaceFormat, WindowId};
use crate::config::RenderLoopConfig;
use crate::control::{ControlEvent, ControlQueue, TimerId};
use crate::error::{ErrorHandler, ErrorSink, FatalHandler, RenderLoopError, Result};
use crate::render_loop::RenderLoop;
use crate::selector::RenderLoopKind;

use events::RenderThreadEvent;
use render_thread::{RenderThreadHandle, RenderThreadParams};

/// Snapshot of one window's render-loop bookkeeping
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowStatus {
    pub render_thread_running: bool,
    pub active_window: Option<WindowId>,
    pub force_render_pass: bool,
    pub update_during_sync: bool,
    pub update_scheduled: bool,
    /// Successful syncs so far; doubles as the barrier generation
    pub syncs_completed: u64,
    pub frames_swapped: u64,
    pub messages_posted: u64,
}

struct WindowRecord {
    window: SharedWindow,
    thread: RenderThreadHandle,
    surface_format: SurfaceFormat,
    force_render_pass: AtomicBool,
    update_timer: Mutex<Option<TimerId>>,
    sync_in_flight: AtomicBool,
}

impl WindowRecord {
    fn new(window: SharedWindow) -> Self {
        Self {
            thread: RenderThreadHandle::new(window.id()),
            surface_format: window.requested_format(),
            window,
            force_render_pass: AtomicBool::new(false),
            update_timer: Mutex::new(None),
            sync_in_flight: AtomicBool::new(false),
        }
    }

    fn id(&self) -> WindowId {
        self.window.id()
    }
}

/// Releases the per-window sync slot when a polish/sync cycle ends
struct SyncSlot<'a>(&'a AtomicBool);

impl Drop for SyncSlot<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct ThreadedRenderLoop {
    platform: Arc<dyn Platform>,
    config: RenderLoopConfig,
    control_thread: ThreadId,
    windows: DashMap<WindowId, Arc<WindowRecord>>,
    control: ControlQueue,
    animation_driver: Mutex<AnimationDriver>,
    animation_timer: Mutex<Option<TimerId>>,
    errors: ErrorSink,
}

impl ThreadedRenderLoop {
    /// Create the loop. The calling thread becomes its control thread.
    pub fn new(platform: Arc<dyn Platform>, config: RenderLoopConfig) -> Self {
        let interval = config.animation_interval(platform.refresh_rate());
        tracing::debug!(
            "[RENDER-LOOP] threaded loop created (animation interval {:?}, exhaust delay {:?})",
            interval,
            config.exhaust_delay()
        );

        Self {
            animation_driver: Mutex::new(AnimationDriver::new(config.timing_mode(), interval)),
            platform,
            config,
            control_thread: std::thread::current().id(),
            windows: DashMap::new(),
            control: ControlQueue::new(),
            animation_timer: Mutex::new(None),
            errors: ErrorSink::new(),
        }
    }

    fn window_for(&self, id: WindowId) -> Option<Arc<WindowRecord>> {
        self.windows.get(&id).map(|record| record.value().clone())
    }

    fn is_control_thread(&self) -> bool {
        std::thread::current().id() == self.control_thread
    }

    pub fn window_status(&self, id: WindowId) -> Option<WindowStatus> {
        let record = self.window_for(id)?;
        let shared = record.thread.shared();
        let (active_window, syncs_completed) = {
            let state = shared.sync.lock();
            (state.active_window, state.syncs_completed)
        };
        let update_scheduled = record.update_timer.lock().is_some();

        Some(WindowStatus {
            render_thread_running: record.thread.is_running(),
            active_window,
            force_render_pass: record.force_render_pass.load(Ordering::Acquire),
            update_during_sync: shared.update_during_sync.load(Ordering::Acquire),
            update_scheduled,
            syncs_completed,
            frames_swapped: shared.frames_swapped.load(Ordering::Relaxed),
            messages_posted: shared.messages_posted.load(Ordering::Relaxed),
        })
    }

    pub fn window_count(&self) -> usize {
        self.windows.len()
    }

    pub fn is_animation_timer_active(&self) -> bool {
        self.animation_timer.lock().is_some()
    }

    /// Times the control-thread animation driver advanced
    pub fn animation_advance_count(&self) -> u64 {
        self.animation_driver.lock().advance_count()
    }

    fn handle_exposure(&self, window: &SharedWindow) -> Result<()> {
        profiling::profile_scope!("handle_exposure");
        let id = window.id();
        tracing::debug!("[RENDER-LOOP] handle_exposure() window {}", id);

        let record = self
            .windows
            .entry(id)
            .or_insert_with(|| Arc::new(WindowRecord::new(window.clone())))
            .value()
            .clone();

        let geometry = record.window.geometry();
        let off_screen = record.window.is_top_level()
            && record
                .window
                .screen_geometry()
                .is_some_and(|screen| !geometry.intersects(&screen));
        if geometry.is_empty() || off_screen {
            tracing::warn!(
                "[RENDER-LOOP] expose event received for window {} with invalid geometry: {},{} {}x{}",
                id,
                geometry.x,
                geometry.y,
                geometry.width,
                geometry.height
            );
            // No context for it until a resize brings it back
            self.start_or_stop_animation_timer();
            return Ok(());
        }

        // A context is about to be bound to it
        if !record.window.has_platform_handle() {
            record.window.create_platform_handle();
        }

        if !record.thread.is_running() {
            self.start_render_thread(&record)?;
        }

        // Set early so polish_and_sync does not treat the window as obscured
        record.thread.set_active_window(id);
        self.polish_and_sync(&record, true);
        self.start_or_stop_animation_timer();
        Ok(())
    }

    fn start_render_thread(&self, record: &Arc<WindowRecord>) -> Result<()> {
        let id = record.id();
        let format = record.surface_format;

        let gl = match self
            .platform
            .create_context(&format, self.platform.global_share_context())
        {
            Ok(gl) => gl,
            Err(reason) => {
                let error = RenderLoopError::ContextCreation {
                    window: id,
                    api: format.api,
                    reason,
                };
                self.errors.report(&error);
                return Err(error);
            }
        };
        record.window.context_created(&gl.format());

        let refresh_rate = record.window.refresh_rate().or_else(|| self.platform.refresh_rate());
        let params = RenderThreadParams {
            platform: self.platform.clone(),
            window: record.window.clone(),
            gl,
            control: self.control.sender(),
            vsync_delta: self.config.animation_interval(refresh_rate),
            timing: self.config.timing_mode(),
        };

        if let Err(e) = record.thread.start(params) {
            let error = RenderLoopError::ThreadStart {
                window: id,
                reason: e.to_string(),
            };
            self.errors.report(&error);
            return Err(error);
        }

        tracing::debug!("[RENDER-LOOP] ✅ render thread started for window {}", id);
        Ok(())
    }

    fn handle_obscurity(&self, record: &Arc<WindowRecord>) {
        let id = record.id();
        if record.thread.is_running() && record.thread.has_active_window() {
            tracing::debug!("[RENDER-LOOP] handle_obscurity() window {}", id);
            let _state = record
                .thread
                .post_and_wait(false, |ticket| RenderThreadEvent::Obscure { window: id, ticket });
        }
        self.start_or_stop_animation_timer();
    }

    fn polish_and_sync(&self, record: &Arc<WindowRecord>, in_expose: bool) {
        profiling::profile_scope!("polish_and_sync");
        let id = record.id();
        tracing::trace!("[RENDER-LOOP] polish_and_sync() window {} in_expose={}", id, in_expose);

        if !record.thread.is_running() || !record.thread.has_active_window() {
            tracing::debug!("[RENDER-LOOP] window {} not exposed, sync aborted", id);
            self.kill_update_timer(record);
            return;
        }

        if record.sync_in_flight.swap(true, Ordering::AcqRel) {
            tracing::warn!("[RENDER-LOOP] window {} already syncing, deferring", id);
            self.post_polish_request(record);
            return;
        }
        let _slot = SyncSlot(&record.sync_in_flight);

        record.window.deliver_pending_events();

        // Event delivery may have closed or obscured the window
        if !self.windows.contains_key(&id)
            || !record.thread.is_running()
            || !record.thread.has_active_window()
        {
            tracing::debug!("[RENDER-LOOP] window {} went away during event delivery", id);
            self.kill_update_timer(record);
            return;
        }

        {
            profiling::profile_scope!("polish");
            record.window.polish_items();
        }

        let shared = record.thread.shared();
        shared.update_during_sync.store(false, Ordering::Release);
        record.window.about_to_animate();

        let force_repaint = record.force_render_pass.swap(false, Ordering::AcqRel);
        let size = record.window.size();

        tracing::trace!("[RENDER-LOOP] window {} lock for sync", id);
        let sync_succeeded = {
            let state = record.thread.post_and_wait(true, |ticket| RenderThreadEvent::RequestSync {
                window: record.window.clone(),
                size,
                in_expose,
                force_repaint,
                ticket,
            });
            state.last_sync_succeeded
        };
        tracing::trace!("[RENDER-LOOP] window {} unlocked after sync", id);

        // A forced repaint must survive a sync that never reached the scene graph
        if force_repaint && !sync_succeeded {
            record.force_render_pass.store(true, Ordering::Release);
        }

        self.kill_update_timer(record);

        let timer_idle = self.animation_timer.lock().is_none();
        let advanced = {
            let mut driver = self.animation_driver.lock();
            if timer_idle && driver.is_running() {
                driver.advance();
                true
            } else {
                false
            }
        };

        if advanced {
            tracing::trace!("[RENDER-LOOP] advanced animations for window {}", id);
            self.post_polish_request(record);
        } else if shared.update_during_sync.load(Ordering::Acquire) {
            self.post_polish_request(record);
        }
    }

    fn post_polish_request(&self, record: &WindowRecord) {
        let mut timer = record.update_timer.lock();
        if timer.is_none() {
            *timer = Some(self.control.start_timer(
                self.config.exhaust_delay(),
                ControlEvent::UpdateRequest(record.id()),
            ));
        }
    }

    fn kill_update_timer(&self, record: &WindowRecord) {
        if let Some(timer) = record.update_timer.lock().take() {
            self.control.kill_timer(timer);
        }
    }

    fn release_resources_for(&self, record: &Arc<WindowRecord>, in_destructor: bool) {
        if !record.thread.is_running() {
            return;
        }
        tracing::debug!(
            "[RENDER-LOOP] release_resources() window {} in_destructor={}",
            record.id(),
            in_destructor
        );

        // The platform window may already be gone; clean up against an offscreen surface then
        let fallback_surface = if record.window.has_platform_handle() {
            None
        } else {
            self.platform.create_offscreen_surface(&record.surface_format)
        };

        let still_active = {
            let _state = record.thread.post_and_wait(false, |ticket| RenderThreadEvent::TryRelease {
                window: record.window.clone(),
                in_destructor,
                fallback_surface,
                ticket,
            });
            record.thread.is_active()
        };

        if !still_active {
            record.thread.wait();
        }
    }

    fn start_or_stop_animation_timer(&self) {
        let exposed: Vec<Arc<WindowRecord>> = self
            .windows
            .iter()
            .filter(|record| record.window.is_visible() && record.window.is_exposed())
            .map(|record| record.value().clone())
            .collect();
        let driver_running = self.animation_driver.lock().is_running();

        let mut timer = self.animation_timer.lock();
        if timer.is_some() && (exposed.len() == 1 || !driver_running) {
            if let Some(id) = timer.take() {
                self.control.kill_timer(id);
            }
            drop(timer);
            tracing::debug!("[RENDER-LOOP] animation timer stopped");

            // Keep animating through the single window's sync cycle
            if driver_running {
                if let Some(the_one) = exposed.first() {
                    self.post_polish_request(the_one);
                }
            }
        } else if timer.is_none() && exposed.len() != 1 && driver_running {
            let interval = self.animation_driver.lock().interval();
            *timer = Some(self.control.start_repeating(interval, ControlEvent::AnimationTick));
            tracing::debug!("[RENDER-LOOP] animation timer started ({:?})", interval);
        }
    }

    fn handle_animation_tick(&self) {
        self.animation_driver.lock().advance();

        // Animated content changed; let every exposed window pick it up
        let exposed: Vec<Arc<WindowRecord>> = self
            .windows
            .iter()
            .filter(|record| record.window.is_exposed())
            .map(|record| record.value().clone())
            .collect();
        for record in exposed {
            if record.thread.is_running() {
                self.post_polish_request(&record);
            }
        }
    }

    fn reject_wrong_thread(&self, operation: &'static str) -> Result<()> {
        tracing::warn!(
            "[RENDER-LOOP] {}: updates can only be scheduled from the control thread or from the render thread while it syncs",
            operation
        );
        Err(RenderLoopError::WrongThread { operation })
    }
}

impl RenderLoop for ThreadedRenderLoop {
    fn kind(&self) -> RenderLoopKind {
        RenderLoopKind::Threaded
    }

    fn show(&self, window: &SharedWindow) {
        // The render thread starts lazily on exposure
        tracing::debug!("[RENDER-LOOP] show() window {}", window.id());
    }

    fn hide(&self, window: WindowId) {
        let Some(record) = self.window_for(window) else {
            return;
        };
        tracing::debug!("[RENDER-LOOP] hide() window {}", window);

        if record.thread.has_active_window() {
            self.handle_obscurity(&record);
        }
        self.release_resources_for(&record, false);
    }

    fn resize(&self, window: WindowId) {
        let Some(record) = self.window_for(window) else {
            return;
        };
        if !record.window.is_renderable() {
            return;
        }
        // An exposure skipped for bad geometry is picked up once the window is usable
        if !record.thread.is_running() || !record.thread.has_active_window() {
            let window = record.window.clone();
            if let Err(e) = self.handle_exposure(&window) {
                tracing::debug!("[RENDER-LOOP] resize() could not expose window {}: {}", window.id(), e);
            }
            return;
        }
        tracing::debug!("[RENDER-LOOP] resize() window {} to {}", window, record.window.size());
        self.polish_and_sync(&record, true);
    }

    fn window_destroyed(&self, window: WindowId) {
        let Some(record) = self.window_for(window) else {
            return;
        };
        tracing::debug!("[RENDER-LOOP] window_destroyed() window {}", window);

        self.handle_obscurity(&record);
        self.release_resources_for(&record, true);
        record.thread.wait();
        debug_assert!(!record.thread.is_running());

        self.kill_update_timer(&record);
        self.windows.remove(&window);
        self.start_or_stop_animation_timer();
    }

    fn exposure_changed(&self, window: &SharedWindow) -> Result<()> {
        if window.is_exposed() {
            self.handle_exposure(window)
        } else {
            if let Some(record) = self.window_for(window.id()) {
                self.handle_obscurity(&record);
            }
            Ok(())
        }
    }

    fn maybe_update(&self, window: WindowId) -> Result<()> {
        let Some(record) = self.window_for(window) else {
            return Ok(());
        };
        if !record.thread.is_running() {
            return Ok(());
        }

        let on_render_thread = record.thread.is_current_thread();
        let locked_for_sync = record.thread.shared().locked_for_sync.load(Ordering::Acquire);
        if !self.is_control_thread() && !(on_render_thread && locked_for_sync) {
            return self.reject_wrong_thread("maybe_update");
        }

        if on_render_thread {
            record
                .thread
                .shared()
                .update_during_sync
                .store(true, Ordering::Release);
            return Ok(());
        }

        self.post_polish_request(&record);
        Ok(())
    }

    fn update(&self, window: WindowId) -> Result<()> {
        let Some(record) = self.window_for(window) else {
            return Ok(());
        };

        if record.thread.is_current_thread() {
            let shared = record.thread.shared();
            if shared.locked_for_sync.load(Ordering::Acquire) {
                record.force_render_pass.store(true, Ordering::Release);
                shared.update_during_sync.store(true, Ordering::Release);
            } else {
                tracing::trace!("[RENDER-LOOP] update() window {} on render thread", window);
                record.thread.post(RenderThreadEvent::RequestRepaint);
            }
            return Ok(());
        }

        if !self.is_control_thread() {
            return self.reject_wrong_thread("update");
        }

        // The next sync must also render, whatever the scene graph reports
        record.force_render_pass.store(true, Ordering::Release);
        self.maybe_update(window)
    }

    fn grab(&self, window: WindowId) -> Result<Option<RgbaImage>> {
        profiling::profile_scope!("grab");
        let record = self
            .window_for(window)
            .ok_or(RenderLoopError::UnknownWindow(window))?;
        if !self.is_control_thread() {
            return Err(RenderLoopError::WrongThread { operation: "grab" });
        }
        if !record.thread.is_running() {
            return Ok(None);
        }

        if !record.window.has_platform_handle() {
            record.window.create_platform_handle();
        }
        {
            profiling::profile_scope!("polish");
            record.window.polish_items();
        }

        let mut state = record.thread.post_and_wait(true, |ticket| RenderThreadEvent::Grab {
            window: record.window.clone(),
            ticket,
        });
        Ok(state.grabbed.take())
    }

    fn release_resources(&self, window: WindowId) {
        if let Some(record) = self.window_for(window) {
            self.release_resources_for(&record, false);
        }
    }

    fn animation_started(&self) {
        tracing::debug!("[RENDER-LOOP] animations started");
        self.animation_driver.lock().start();
        self.start_or_stop_animation_timer();

        let records: Vec<Arc<WindowRecord>> =
            self.windows.iter().map(|record| record.value().clone()).collect();
        for record in records {
            self.post_polish_request(&record);
        }
    }

    fn animation_stopped(&self) {
        tracing::debug!("[RENDER-LOOP] animations stopped");
        self.animation_driver.lock().stop();
        self.start_or_stop_animation_timer();
    }

    fn process_events(&self, max_wait: Duration) -> usize {
        let events = self.control.wait_for_events(max_wait);
        let handled = events.len();

        let mut synced: Vec<WindowId> = Vec::new();
        for event in events {
            match event {
                ControlEvent::UpdateRequest(id) => {
                    // Several requests for one window in a batch collapse into one sync
                    if synced.contains(&id) {
                        continue;
                    }
                    synced.push(id);
                    if let Some(record) = self.window_for(id) {
                        self.kill_update_timer(&record);
                        self.polish_and_sync(&record, false);
                    }
                }
                ControlEvent::AnimationTick => self.handle_animation_tick(),
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
        let ids: Vec<WindowId> = self.windows.iter().map(|record| *record.key()).collect();
        for id in ids {
            self.window_destroyed(id);
        }
        if let Some(timer) = self.animation_timer.lock().take() {
            self.control.kill_timer(timer);
        }
    }
}

impl Drop for ThreadedRenderLoop {
    fn drop(&mut self) {
        self.cleanup();
    }
}
