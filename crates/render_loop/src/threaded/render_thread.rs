//! Render thread
//!
//! One render thread per exposed window. It owns the window's GPU context and
//! scene graph; the control thread only ever reaches them by posting a
//! [`RenderThreadEvent`] and, for the blocking calls, waiting on the barrier.
//!
//! # Design
//!
//! - **Barrier:** `RenderThreadShared::sync` guards the handoff state. The control
//!   thread takes a ticket, posts its event while holding the lock and waits on
//!   the condvar until the render thread acknowledges that exact ticket.
//! - **Expose:** the first sync after exposure keeps the lock through render and
//!   swap, so the control thread wakes only once the first frame is on screen.
//! - **Idle:** the thread blocks on its queue whenever it has no window or no
//!   pending update, and sleeps out the frame interval after a sync that changed
//!   nothing.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{JoinHandle, ThreadId};
use std::time::{Duration, Instant};

use crossbeam_channel::Sender;
use image::RgbaImage;
use parking_lot::{Condvar, Mutex, MutexGuard, RwLock};

use crate::animation::{AnimationDriver, TimingMode};
use crate::backend::{
    GpuContext, OffscreenSurface, Platform, SceneChangeNotifier, SceneGraph, SharedWindow, Size,
    Surface, WindowId,
};
use crate::control::ControlEvent;
use crate::event_queue::RenderThreadEventQueue;
use crate::update_mask::{PendingUpdates, UpdateRequest};

use super::events::{RenderThreadEvent, Ticket};

/// Handoff state, only touched under `RenderThreadShared::sync`
#[derive(Default)]
pub(crate) struct SyncState {
    pub active_window: Option<WindowId>,
    pub requested: Ticket,
    pub acknowledged: Ticket,
    /// Generation counter bumped by every successful sync
    pub syncs_completed: u64,
    pub last_sync_succeeded: bool,
    pub grabbed: Option<RgbaImage>,
}

pub(crate) struct RenderThreadShared {
    pub window_id: WindowId,
    pub events: RenderThreadEventQueue<RenderThreadEvent>,
    pub sync: Mutex<SyncState>,
    pub wait_condition: Condvar,
    pub pending: PendingUpdates,
    /// OS thread alive
    pub running: AtomicBool,
    /// Main loop should keep going; false once the GPU context is gone
    pub active: AtomicBool,
    /// The control thread is blocked in a sync
    pub locked_for_sync: AtomicBool,
    pub update_during_sync: AtomicBool,
    pub messages_posted: AtomicU64,
    pub frames_swapped: AtomicU64,
    thread_id: RwLock<Option<ThreadId>>,
}

impl RenderThreadShared {
    fn new(window_id: WindowId) -> Self {
        Self {
            window_id,
            events: RenderThreadEventQueue::new(),
            sync: Mutex::new(SyncState::default()),
            wait_condition: Condvar::new(),
            pending: PendingUpdates::new(),
            running: AtomicBool::new(false),
            active: AtomicBool::new(false),
            locked_for_sync: AtomicBool::new(false),
            update_during_sync: AtomicBool::new(false),
            messages_posted: AtomicU64::new(0),
            frames_swapped: AtomicU64::new(0),
            thread_id: RwLock::new(None),
        }
    }

    fn acknowledge(&self, state: &mut SyncState, ticket: Ticket) {
        state.acknowledged = state.acknowledged.max(ticket);
        self.wait_condition.notify_all();
    }
}

/// Clears `running` however the thread leaves its main loop, and wakes any waiter.
struct RunningGuard(Arc<RenderThreadShared>);

impl Drop for RunningGuard {
    fn drop(&mut self) {
        self.0.active.store(false, Ordering::Release);
        self.0.running.store(false, Ordering::Release);
        let _state = self.0.sync.lock();
        self.0.wait_condition.notify_all();
    }
}

/// Everything a render thread needs at startup
pub(crate) struct RenderThreadParams {
    pub platform: Arc<dyn Platform>,
    pub window: SharedWindow,
    pub gl: Box<dyn GpuContext>,
    pub control: Sender<ControlEvent>,
    pub vsync_delta: Duration,
    pub timing: TimingMode,
}

/// Control-side handle to a window's render thread
pub(crate) struct RenderThreadHandle {
    shared: Arc<RenderThreadShared>,
    join: Mutex<Option<JoinHandle<()>>>,
}

impl RenderThreadHandle {
    pub(crate) fn new(window_id: WindowId) -> Self {
        Self {
            shared: Arc::new(RenderThreadShared::new(window_id)),
            join: Mutex::new(None),
        }
    }

    pub(crate) fn shared(&self) -> &RenderThreadShared {
        &self.shared
    }

    pub(crate) fn start(&self, params: RenderThreadParams) -> std::io::Result<()> {
        // Reap a previous run that tore itself down
        self.wait();

        let shared = self.shared.clone();
        let name = format!("RenderThread-{}", shared.window_id);
        shared.pending.take();
        shared.active.store(true, Ordering::Release);
        shared.running.store(true, Ordering::Release);

        let thread_name = name.clone();
        let spawned = std::thread::Builder::new().name(name).spawn(move || {
            let _running = RunningGuard(shared.clone());
            profiling::set_thread_name(thread_name);
            RenderThread::new(shared, params).run();
        });

        match spawned {
            Ok(handle) => {
                *self.shared.thread_id.write() = Some(handle.thread().id());
                *self.join.lock() = Some(handle);
                Ok(())
            }
            Err(e) => {
                self.shared.active.store(false, Ordering::Release);
                self.shared.running.store(false, Ordering::Release);
                Err(e)
            }
        }
    }

    pub(crate) fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::Acquire)
    }

    pub(crate) fn is_active(&self) -> bool {
        self.shared.active.load(Ordering::Acquire)
    }

    pub(crate) fn is_current_thread(&self) -> bool {
        *self.shared.thread_id.read() == Some(std::thread::current().id())
    }

    pub(crate) fn has_active_window(&self) -> bool {
        self.shared.sync.lock().active_window.is_some()
    }

    pub(crate) fn set_active_window(&self, window: WindowId) {
        self.shared.sync.lock().active_window = Some(window);
    }

    pub(crate) fn post(&self, event: RenderThreadEvent) {
        self.shared.messages_posted.fetch_add(1, Ordering::Relaxed);
        self.shared.events.post(event);
    }

    /// Post the event built for the next ticket and block until the render thread
    /// acknowledges it (or exits). The lock is held from post to wake-up.
    pub(crate) fn post_and_wait(
        &self,
        lock_for_sync: bool,
        make: impl FnOnce(Ticket) -> RenderThreadEvent,
    ) -> MutexGuard<'_, SyncState> {
        let mut state = self.shared.sync.lock();
        state.requested += 1;
        let ticket = state.requested;

        if lock_for_sync {
            self.shared.locked_for_sync.store(true, Ordering::Release);
        }
        self.post(make(ticket));

        while state.acknowledged < ticket && self.is_running() {
            self.shared.wait_condition.wait(&mut state);
        }

        if lock_for_sync {
            self.shared.locked_for_sync.store(false, Ordering::Release);
        }
        state
    }

    /// Join the OS thread if it has been started. Never called from the thread itself.
    pub(crate) fn wait(&self) {
        if self.is_current_thread() {
            return;
        }
        let handle = self.join.lock().take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                tracing::error!(
                    "[RENDER-LOOP] ❌ Render thread for window {} panicked",
                    self.shared.window_id
                );
            }
        }
    }
}

/// What a sync under the barrier lock found
#[derive(Debug, Default, Clone, Copy)]
struct SyncOutcome {
    changes: bool,
    context_lost: bool,
}

pub(crate) struct RenderThread {
    shared: Arc<RenderThreadShared>,
    gl: Option<Box<dyn GpuContext>>,
    scene: Box<dyn SceneGraph>,
    window: Option<SharedWindow>,
    window_size: Size,
    change_notifier: SceneChangeNotifier,
    sync_ticket: Ticket,
    animator_driver: AnimationDriver,
    vsync_delta: Duration,
    sleeping: bool,
    stop_event_processing: bool,
    control: Sender<ControlEvent>,
}

impl RenderThread {
    fn new(shared: Arc<RenderThreadShared>, params: RenderThreadParams) -> Self {
        let scene = params.platform.create_scene_graph(&params.window);
        Self {
            shared,
            gl: Some(params.gl),
            scene,
            window: None,
            window_size: params.window.size(),
            change_notifier: SceneChangeNotifier::new(),
            sync_ticket: 0,
            animator_driver: AnimationDriver::new(params.timing, params.vsync_delta),
            vsync_delta: params.vsync_delta,
            sleeping: false,
            stop_event_processing: false,
            control: params.control,
        }
    }

    fn id(&self) -> WindowId {
        self.shared.window_id
    }

    fn run(mut self) {
        tracing::debug!("[RENDER-THREAD] {} run()", self.id());

        while self.shared.active.load(Ordering::Acquire) {
            if self.window.is_some() {
                self.ensure_initialized();
                self.sync_and_render();
            }

            self.process_events();

            if self.shared.active.load(Ordering::Acquire)
                && (self.shared.pending.is_empty() || self.window.is_none())
            {
                tracing::trace!("[RENDER-THREAD] {} done drawing, sleep...", self.id());
                self.sleeping = true;
                self.process_events_and_wait_for_more();
                self.sleeping = false;
            }
        }

        debug_assert!(
            self.gl.is_none(),
            "the GPU context must be released before the render thread exits"
        );
        tracing::debug!("[RENDER-THREAD] {} run() completed", self.id());
    }

    fn ensure_initialized(&mut self) {
        if self.scene.is_initialized() || self.window_size.is_empty() {
            return;
        }
        let (Some(gl), Some(window)) = (self.gl.as_mut(), self.window.as_ref()) else {
            return;
        };
        if gl.make_current(Surface::Window(window.as_ref())) {
            self.scene.initialize();
            tracing::debug!("[RENDER-THREAD] {} scene graph initialized", self.shared.window_id);
        }
    }

    fn sync_and_render(&mut self) {
        profiling::profile_scope!("sync_and_render");
        let frame_started = Instant::now();

        let pending = self.shared.pending.take();
        let repaint_requested = pending.contains(UpdateRequest::REPAINT);
        let expose_requested = pending.contains(UpdateRequest::EXPOSE);

        let shared = Arc::clone(&self.shared);
        let mut expose_guard = None;
        let mut sync_resulted_in_changes = false;
        let mut context_lost = false;

        if pending.contains(UpdateRequest::SYNC) {
            tracing::trace!("[RENDER-THREAD] {} updatePending, doing sync", self.id());
            let mut state = shared.sync.lock();
            let outcome = self.sync(&mut state);
            sync_resulted_in_changes = outcome.changes;
            context_lost = outcome.context_lost;
            if expose_requested {
                expose_guard = Some(state);
            } else {
                shared.acknowledge(&mut state, self.sync_ticket);
            }
        }

        let context_valid = self.gl.as_ref().is_some_and(|gl| gl.is_valid());
        if !sync_resulted_in_changes && !repaint_requested && context_valid {
            tracing::trace!("[RENDER-THREAD] {} no changes, render aborted", self.id());
            self.pace_frame(frame_started);
            return;
        }

        self.advance_animators();

        let mut swapped = false;
        if let (Some(gl), Some(window)) = (self.gl.as_mut(), self.window.clone()) {
            let current = self.scene.has_renderer()
                && !self.window_size.is_empty()
                && gl.make_current(Surface::Window(window.as_ref()));

            if current {
                {
                    profiling::profile_scope!("render");
                    self.scene.render(self.window_size);
                }
                {
                    profiling::profile_scope!("swap");
                    gl.swap_buffers(window.as_ref());
                }
                self.shared.frames_swapped.fetch_add(1, Ordering::Relaxed);
                swapped = true;
            } else if !gl.is_valid() {
                if !context_lost {
                    tracing::debug!(
                        "[RENDER-THREAD] {} rendering failed, context lost; retrying next cycle",
                        self.shared.window_id
                    );
                }
                context_lost = true;
            } else {
                tracing::trace!("[RENDER-THREAD] {} window not ready, skipping render", self.shared.window_id);
            }
        }

        if let Some(mut state) = expose_guard.take() {
            tracing::debug!("[RENDER-THREAD] {} wake control thread after initial expose", self.id());
            shared.acknowledge(&mut state, self.sync_ticket);
        }

        // Only after the control thread is free again
        if context_lost {
            self.request_retry();
        }

        if swapped {
            if let Some(window) = self.window.as_ref() {
                window.frame_swapped();
            }
            profiling::record_frame_time(frame_started.elapsed().as_secs_f32() * 1000.0);
        }

        if self.animator_driver.is_running() {
            // Render-thread animators keep the thread drawing without control-thread syncs
            self.shared.pending.insert(UpdateRequest::REPAINT);
            self.pace_frame(frame_started);
        }
    }

    /// Runs under the barrier lock. Never blocks beyond the scene graph sync itself.
    fn sync(&mut self, state: &mut SyncState) -> SyncOutcome {
        profiling::profile_scope!("sync");

        let window_id = self.shared.window_id;
        let Some(window) = self.window.clone() else {
            state.last_sync_succeeded = false;
            return SyncOutcome::default();
        };
        let Some(gl) = self.gl.as_mut() else {
            state.last_sync_succeeded = false;
            return SyncOutcome::default();
        };
        state.active_window = Some(window.id());

        let size_ok = !self.window_size.is_empty();
        let mut current = size_ok && gl.make_current(Surface::Window(window.as_ref()));

        if !current && !gl.is_valid() {
            tracing::warn!("[RENDER-THREAD] {} GPU context lost, recreating", window_id);
            self.scene.invalidate();
            current = gl.recreate() && size_ok && gl.make_current(Surface::Window(window.as_ref()));
            if current {
                self.scene.initialize();
            } else {
                tracing::warn!(
                    "[RENDER-THREAD] {} ❌ context recreation failed, retrying next cycle",
                    window_id
                );
            }
        }

        if !current {
            let context_lost = !gl.is_valid();
            if !context_lost {
                tracing::debug!("[RENDER-THREAD] {} window has bad size, sync aborted", window_id);
            }
            state.last_sync_succeeded = false;
            return SyncOutcome {
                changes: false,
                context_lost,
            };
        }

        let had_renderer = self.scene.has_renderer();
        self.change_notifier.take();
        self.scene.sync(window.as_ref());

        let mut changes = false;
        if !had_renderer && self.scene.has_renderer() {
            tracing::debug!("[RENDER-THREAD] {} renderer created, watching scene changes", window_id);
            changes = true;
            self.scene.set_change_notifier(self.change_notifier.clone());
        }

        self.scene.process_deferred_deletes();
        changes |= self.change_notifier.take();

        state.syncs_completed += 1;
        state.last_sync_succeeded = true;
        SyncOutcome {
            changes,
            context_lost: false,
        }
    }

    fn advance_animators(&mut self) {
        let Some(controller) = self.window.as_ref().and_then(|w| w.animation_controller()) else {
            return;
        };

        if controller.is_running() {
            self.animator_driver.start();
        } else if self.animator_driver.is_running() {
            self.animator_driver.stop();
        }

        if self.animator_driver.is_running() {
            let mut animators = controller.lock();
            animators.time = self.animator_driver.advance();
            animators.ticks += 1;
        }
    }

    /// Sleep out the rest of the frame interval
    fn pace_frame(&self, frame_started: Instant) {
        if let Some(remaining) = self.vsync_delta.checked_sub(frame_started.elapsed()) {
            std::thread::sleep(remaining);
        }
    }

    /// Ask the control thread for another polish + sync once the frame interval passed
    fn request_retry(&self) {
        std::thread::sleep(self.vsync_delta);
        let _ = self.control.send(ControlEvent::UpdateRequest(self.shared.window_id));
    }

    fn process_events(&mut self) {
        while let Some(event) = self.shared.events.take(false) {
            self.handle_event(event);
        }
    }

    fn process_events_and_wait_for_more(&mut self) {
        self.stop_event_processing = false;
        while !self.stop_event_processing {
            match self.shared.events.take(true) {
                Some(event) => self.handle_event(event),
                None => break,
            }
        }
    }

    fn handle_event(&mut self, event: RenderThreadEvent) {
        tracing::trace!("[RENDER-THREAD] {} event: {:?}", self.id(), event);
        let shared = Arc::clone(&self.shared);

        match event {
            RenderThreadEvent::Obscure { window, ticket } => {
                let mut state = shared.sync.lock();
                if let Some(active) = self.window.take() {
                    tracing::debug!("[RENDER-THREAD] {} obscure, stop rendering", window);
                    active.about_to_stop();
                    if let Some(gl) = self.gl.as_mut() {
                        gl.done_current();
                    }
                }
                state.active_window = None;
                shared.acknowledge(&mut state, ticket);
            }

            RenderThreadEvent::RequestSync {
                window,
                size,
                in_expose,
                force_repaint,
                ticket,
            } => {
                self.sync_ticket = ticket;
                self.window_size = size;
                self.window = Some(window);

                let mut request = UpdateRequest::SYNC;
                if in_expose {
                    request |= UpdateRequest::EXPOSE;
                }
                if force_repaint {
                    request |= UpdateRequest::REPAINT;
                }
                shared.pending.insert(request);

                if self.sleeping {
                    self.stop_event_processing = true;
                }
            }

            RenderThreadEvent::TryRelease {
                window,
                in_destructor,
                fallback_surface,
                ticket,
            } => {
                let mut state = shared.sync.lock();
                if self.window.is_none() || in_destructor {
                    tracing::debug!("[RENDER-THREAD] {} releasing resources", window.id());
                    self.invalidate_context(&window, in_destructor, fallback_surface.as_ref());

                    let active = self.gl.is_some();
                    shared.active.store(active, Ordering::Release);
                    if !active {
                        self.window = None;
                        state.active_window = None;
                    }
                    if self.sleeping {
                        self.stop_event_processing = true;
                    }
                } else {
                    tracing::debug!(
                        "[RENDER-THREAD] {} still rendering, release skipped",
                        window.id()
                    );
                }
                shared.acknowledge(&mut state, ticket);
            }

            RenderThreadEvent::Grab { window, ticket } => {
                let mut state = shared.sync.lock();
                state.grabbed = self.grab(&window);
                shared.acknowledge(&mut state, ticket);
            }

            RenderThreadEvent::RequestRepaint => {
                if self.window.is_some() {
                    shared.pending.insert(UpdateRequest::REPAINT);
                }
                if self.sleeping {
                    self.stop_event_processing = true;
                }
            }
        }
    }

    fn grab(&mut self, window: &SharedWindow) -> Option<RgbaImage> {
        profiling::profile_scope!("grab");

        let size = window.size();
        if size.is_empty() {
            return None;
        }
        let gl = self.gl.as_mut()?;
        if !gl.make_current(Surface::Window(window.as_ref())) {
            tracing::warn!("[RENDER-THREAD] {} grab failed, context not current", window.id());
            return None;
        }

        if !self.scene.is_initialized() {
            self.scene.initialize();
        }
        let had_renderer = self.scene.has_renderer();
        self.scene.sync(window.as_ref());
        if !had_renderer && self.scene.has_renderer() {
            self.scene.set_change_notifier(self.change_notifier.clone());
        }
        self.scene.render(size);

        let alpha = window.requested_format().has_alpha() && window.clear_color_alpha() != 255;
        Some(gl.read_framebuffer(size, alpha, alpha))
    }

    fn invalidate_context(
        &mut self,
        window: &SharedWindow,
        in_destructor: bool,
        fallback: Option<&OffscreenSurface>,
    ) {
        let Some(gl) = self.gl.as_mut() else {
            return;
        };

        let wipe_scene = in_destructor || !window.persistent_scene_graph();
        let wipe_context = in_destructor || (wipe_scene && !window.persistent_context());

        let surface = match fallback {
            Some(offscreen) => Surface::Offscreen(offscreen),
            None => Surface::Window(window.as_ref()),
        };
        let current = gl.make_current(surface);
        if !current {
            tracing::debug!("[RENDER-THREAD] {} cleanup without a current context", window.id());
        }

        if !wipe_scene {
            tracing::debug!("[RENDER-THREAD] {} persistent scene graph, avoiding cleanup", window.id());
            if current {
                gl.done_current();
            }
            return;
        }

        self.scene.invalidate();
        self.scene.process_deferred_deletes();
        if current {
            gl.done_current();
        }
        tracing::debug!("[RENDER-THREAD] {} invalidated scene graph", window.id());

        if wipe_context {
            self.gl = None;
            self.animator_driver.stop();
            tracing::debug!("[RENDER-THREAD] {} invalidated GPU context", window.id());
        } else {
            tracing::debug!("[RENDER-THREAD] {} persistent GPU context, avoiding cleanup", window.id());
        }
    }
}
