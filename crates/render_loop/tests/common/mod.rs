#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use pulsar_render_loop::headless::{HeadlessPlatform, HeadlessWindow};
use pulsar_render_loop::{
    FatalHandler, RenderLoop, RenderLoopConfig, RenderLoopError, SharedWindow, Size,
};

pub const PUMP_TIMEOUT: Duration = Duration::from_secs(5);
pub const PUMP_STEP: Duration = Duration::from_millis(20);

/// Short coalescing delay and fixed animation steps keep the scenarios fast
pub fn fast_config() -> RenderLoopConfig {
    RenderLoopConfig {
        exhaust_delay_ms: 1,
        consistent_timing: true,
        ..Default::default()
    }
}

pub fn platform() -> Arc<HeadlessPlatform> {
    Arc::new(HeadlessPlatform::new())
}

pub fn shared(window: &Arc<HeadlessWindow>) -> SharedWindow {
    window.clone()
}

/// Visible, exposed window of the given size
pub fn exposed_window(platform: &HeadlessPlatform, id: u64, size: Size) -> Arc<HeadlessWindow> {
    let window = platform.create_window(id, size);
    window.show_exposed();
    window
}

pub fn expose<R: RenderLoop + ?Sized>(render_loop: &R, window: &Arc<HeadlessWindow>) {
    window.show_exposed();
    let shared = shared(window);
    render_loop.show(&shared);
    render_loop
        .exposure_changed(&shared)
        .expect("exposure should create rendering resources");
}

pub fn obscure<R: RenderLoop + ?Sized>(render_loop: &R, window: &Arc<HeadlessWindow>) {
    window.set_exposed(false);
    render_loop
        .exposure_changed(&shared(window))
        .expect("obscuring never fails");
}

/// Pump control-thread events until `done` holds. Returns `false` on timeout.
pub fn pump_until<R: RenderLoop + ?Sized>(render_loop: &R, mut done: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + PUMP_TIMEOUT;
    while !done() {
        if Instant::now() > deadline {
            return false;
        }
        render_loop.process_events(PUMP_STEP);
    }
    true
}

/// Pump for a fixed time regardless of what happens
pub fn pump_for<R: RenderLoop + ?Sized>(render_loop: &R, duration: Duration) {
    let deadline = Instant::now() + duration;
    while Instant::now() < deadline {
        render_loop.process_events(PUMP_STEP);
    }
}

/// Fatal handler that counts instead of aborting
pub fn counting_fatal_handler() -> (FatalHandler, Arc<AtomicUsize>) {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let handler: FatalHandler = Arc::new(move |_: &RenderLoopError| {
        counter.fetch_add(1, Ordering::SeqCst);
    });
    (handler, calls)
}
