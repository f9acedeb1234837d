//! Cross-thread protocol scenarios for the threaded render loop

mod common;

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use pulsar_render_loop::headless::{Call, SyncHook};
use pulsar_render_loop::{
    AnimationController, Rect, RenderLoop, RenderLoopError, Size, ThreadedRenderLoop,
};

use common::*;

fn threaded() -> (Arc<pulsar_render_loop::headless::HeadlessPlatform>, ThreadedRenderLoop) {
    let platform = platform();
    let render_loop = ThreadedRenderLoop::new(platform.clone(), fast_config());
    (platform, render_loop)
}

#[test]
fn test_expose_renders_first_frame_before_returning() {
    let (platform, render_loop) = threaded();
    let window = platform.create_window(1, Size::new(800, 600));

    expose(&render_loop, &window);

    let status = render_loop.window_status(1).unwrap();
    assert!(status.render_thread_running);
    assert_eq!(status.active_window, Some(1));
    assert!(!status.force_render_pass);
    assert_eq!(status.syncs_completed, 1);
    assert_eq!(status.frames_swapped, 1);
    assert_eq!(window.context_created_count(), 1);
    assert_eq!(platform.contexts_created(), 1);

    let calls = platform.journal().calls(1);
    assert!(calls.contains(&Call::Render(Size::new(800, 600))));

    // Rendering and swapping happen on the window's own render thread
    let swap = platform
        .journal()
        .entries()
        .into_iter()
        .find(|entry| entry.window == Some(1) && entry.call == Call::Swap)
        .unwrap();
    assert_eq!(swap.thread.as_deref(), Some("RenderThread-1"));
}

#[test]
fn test_each_sync_wakes_exactly_its_waiter() {
    let (platform, render_loop) = threaded();
    let window = exposed_window(&platform, 1, Size::new(320, 240));
    expose(&render_loop, &window);

    for cycle in 1..=5u64 {
        let before = render_loop.window_status(1).unwrap();
        window.mark_dirty();
        render_loop.maybe_update(1).unwrap();

        assert!(pump_until(&render_loop, || {
            render_loop.window_status(1).unwrap().syncs_completed != before.syncs_completed
        }));

        let after = render_loop.window_status(1).unwrap();
        assert_eq!(after.syncs_completed, before.syncs_completed + 1);
        // One request posted per sync: a new one is never posted while the previous is in flight
        assert_eq!(after.messages_posted, 1 + cycle);
        assert_eq!(after.syncs_completed, after.messages_posted);
    }
}

#[test]
fn test_repeated_updates_coalesce_into_one_sync() {
    let (platform, render_loop) = threaded();
    let window = exposed_window(&platform, 1, Size::new(320, 240));
    expose(&render_loop, &window);

    render_loop.maybe_update(1).unwrap();
    render_loop.maybe_update(1).unwrap();
    render_loop.maybe_update(1).unwrap();
    assert!(render_loop.window_status(1).unwrap().update_scheduled);

    assert!(pump_until(&render_loop, || {
        render_loop.window_status(1).unwrap().syncs_completed == 2
    }));
    pump_for(&render_loop, Duration::from_millis(50));

    let status = render_loop.window_status(1).unwrap();
    assert_eq!(status.syncs_completed, 2);
    assert!(!status.update_scheduled);
}

#[test]
fn test_swap_is_always_preceded_by_sync() {
    let (platform, render_loop) = threaded();
    let window = exposed_window(&platform, 1, Size::new(320, 240));
    expose(&render_loop, &window);

    for shade in 0..4u8 {
        window.set_color([shade * 60, 0, 0, 255]);
        render_loop.maybe_update(1).unwrap();
        let target = u64::from(shade) + 2;
        assert!(pump_until(&render_loop, || window.frames_swapped() >= target));
    }

    let mut synced = false;
    let mut swaps = 0;
    for call in platform.journal().calls(1) {
        match call {
            Call::Sync => synced = true,
            Call::Swap => {
                assert!(synced, "swap without a preceding sync");
                synced = false;
                swaps += 1;
            }
            _ => {}
        }
    }
    assert_eq!(swaps, 5);
}

#[test]
fn test_update_from_render_thread_during_sync() {
    let platform = platform();
    let render_loop = Arc::new(ThreadedRenderLoop::new(platform.clone(), fast_config()));
    let window = exposed_window(&platform, 1, Size::new(320, 240));
    expose(&*render_loop, &window);

    let armed = Arc::new(AtomicBool::new(false));
    let results = Arc::new(AtomicUsize::new(0));
    let hook: SyncHook = {
        let weak: Weak<ThreadedRenderLoop> = Arc::downgrade(&render_loop);
        let armed = armed.clone();
        let results = results.clone();
        Arc::new(move |id: u64| {
            if !armed.swap(false, Ordering::AcqRel) {
                return;
            }
            if let Some(render_loop) = weak.upgrade() {
                if render_loop.update(id).is_ok() {
                    results.fetch_add(1, Ordering::SeqCst);
                }
            }
        })
    };
    window.set_sync_hook(Some(hook));

    let before = render_loop.window_status(1).unwrap();
    armed.store(true, Ordering::Release);
    render_loop.maybe_update(1).unwrap();
    assert!(pump_until(&*render_loop, || {
        render_loop.window_status(1).unwrap().syncs_completed == before.syncs_completed + 1
    }));

    // The update ran inside the sync and only flagged the window
    let during = render_loop.window_status(1).unwrap();
    assert_eq!(results.load(Ordering::SeqCst), 1);
    assert!(during.update_during_sync);
    assert!(during.force_render_pass);
    assert!(during.update_scheduled);
    assert_eq!(during.messages_posted, before.messages_posted + 1);

    // Exactly one follow-up polish + sync
    assert!(pump_until(&*render_loop, || {
        render_loop.window_status(1).unwrap().syncs_completed == before.syncs_completed + 2
    }));
    pump_for(&*render_loop, Duration::from_millis(50));

    let after = render_loop.window_status(1).unwrap();
    assert_eq!(after.syncs_completed, before.syncs_completed + 2);
    assert!(!after.update_scheduled);
    assert!(!after.force_render_pass);

    window.set_sync_hook(None);
    render_loop.cleanup();
}

#[test]
fn test_updates_from_foreign_threads_are_rejected() {
    let (platform, render_loop) = threaded();
    let window = exposed_window(&platform, 1, Size::new(320, 240));
    expose(&render_loop, &window);

    std::thread::scope(|scope| {
        scope.spawn(|| {
            assert!(matches!(
                render_loop.maybe_update(1),
                Err(RenderLoopError::WrongThread { .. })
            ));
            assert!(matches!(
                render_loop.update(1),
                Err(RenderLoopError::WrongThread { .. })
            ));
            assert!(matches!(
                render_loop.grab(1),
                Err(RenderLoopError::WrongThread { .. })
            ));
        });
    });

    assert!(!render_loop.window_status(1).unwrap().update_scheduled);
}

#[test]
fn test_obscure_is_idempotent() {
    let (platform, render_loop) = threaded();
    let window = exposed_window(&platform, 1, Size::new(320, 240));
    expose(&render_loop, &window);

    obscure(&render_loop, &window);
    let first = render_loop.window_status(1).unwrap();
    assert_eq!(first.active_window, None);
    assert_eq!(window.about_to_stop_count(), 1);

    obscure(&render_loop, &window);
    let second = render_loop.window_status(1).unwrap();
    assert_eq!(second.messages_posted, first.messages_posted);
    assert_eq!(window.about_to_stop_count(), 1);
}

#[test]
fn test_obscured_window_ignores_updates() {
    let (platform, render_loop) = threaded();
    let window = exposed_window(&platform, 1, Size::new(320, 240));
    expose(&render_loop, &window);
    obscure(&render_loop, &window);

    let before = render_loop.window_status(1).unwrap();
    render_loop.maybe_update(1).unwrap();
    pump_for(&render_loop, Duration::from_millis(50));

    let after = render_loop.window_status(1).unwrap();
    assert_eq!(after.syncs_completed, before.syncs_completed);
    assert!(!after.update_scheduled);
}

#[test]
fn test_window_destroyed_tears_everything_down() {
    let (platform, render_loop) = threaded();
    let window = exposed_window(&platform, 1, Size::new(320, 240));
    expose(&render_loop, &window);
    assert_eq!(platform.live_contexts(), 1);

    render_loop.window_destroyed(1);

    assert!(render_loop.window_status(1).is_none());
    assert_eq!(render_loop.window_count(), 0);
    assert_eq!(platform.live_contexts(), 0);
    assert_eq!(window.about_to_stop_count(), 1);
    assert!(platform.journal().calls(1).contains(&Call::Invalidate));

    // Nothing of the window is reachable any more
    assert!(matches!(render_loop.grab(1), Err(RenderLoopError::UnknownWindow(1))));
    render_loop.maybe_update(1).unwrap();
}

#[test]
fn test_cleanup_releases_every_context() {
    let (platform, render_loop) = threaded();
    for id in 1..=3 {
        let window = exposed_window(&platform, id, Size::new(64, 64));
        expose(&render_loop, &window);
    }
    assert_eq!(platform.live_contexts(), 3);

    drop(render_loop);
    assert_eq!(platform.live_contexts(), 0);
    assert_eq!(platform.contexts_created(), 3);
}

#[test]
fn test_persistent_resources_survive_release() {
    let (platform, render_loop) = threaded();
    let window = exposed_window(&platform, 1, Size::new(320, 240));
    expose(&render_loop, &window);

    obscure(&render_loop, &window);
    render_loop.release_resources(1);

    let status = render_loop.window_status(1).unwrap();
    assert!(status.render_thread_running);
    assert_eq!(platform.live_contexts(), 1);
    assert!(!platform.journal().calls(1).contains(&Call::Invalidate));
}

#[test]
fn test_persistent_context_without_persistent_scene_graph() {
    let (platform, render_loop) = threaded();
    let window = exposed_window(&platform, 1, Size::new(320, 240));
    window.set_persistence(false, true);
    expose(&render_loop, &window);

    obscure(&render_loop, &window);
    render_loop.release_resources(1);

    assert!(render_loop.window_status(1).unwrap().render_thread_running);
    assert_eq!(platform.live_contexts(), 1);
    assert!(platform.journal().calls(1).contains(&Call::Invalidate));
}

#[test]
fn test_non_persistent_release_stops_thread_and_reexpose_restarts_it() {
    let (platform, render_loop) = threaded();
    let window = exposed_window(&platform, 1, Size::new(320, 240));
    window.set_persistence(false, false);
    expose(&render_loop, &window);

    obscure(&render_loop, &window);
    render_loop.release_resources(1);

    let released = render_loop.window_status(1).unwrap();
    assert!(!released.render_thread_running);
    assert_eq!(platform.live_contexts(), 0);

    expose(&render_loop, &window);
    let restarted = render_loop.window_status(1).unwrap();
    assert!(restarted.render_thread_running);
    assert_eq!(restarted.active_window, Some(1));
    assert_eq!(restarted.syncs_completed, released.syncs_completed + 1);
    assert_eq!(platform.contexts_created(), 2);
    assert_eq!(platform.live_contexts(), 1);
}

#[test]
fn test_hide_obscures_then_releases() {
    let (platform, render_loop) = threaded();
    let window = exposed_window(&platform, 1, Size::new(320, 240));
    window.set_persistence(false, false);
    expose(&render_loop, &window);

    render_loop.hide(1);

    let status = render_loop.window_status(1).unwrap();
    assert_eq!(status.active_window, None);
    assert!(!status.render_thread_running);
    assert_eq!(window.about_to_stop_count(), 1);
    assert_eq!(platform.live_contexts(), 0);
}

#[test]
fn test_release_after_platform_window_is_gone_uses_offscreen_surface() {
    let (platform, render_loop) = threaded();
    let window = exposed_window(&platform, 1, Size::new(320, 240));
    window.set_persistence(false, false);
    expose(&render_loop, &window);

    obscure(&render_loop, &window);
    window.destroy_platform_handle();
    render_loop.release_resources(1);

    let offscreen = platform
        .journal()
        .entries()
        .iter()
        .filter(|entry| entry.call == Call::MakeCurrent { offscreen: true })
        .count();
    assert_eq!(offscreen, 1);
    assert_eq!(platform.live_contexts(), 0);
}

#[test]
fn test_context_creation_failure_is_fatal_once() {
    let (platform, render_loop) = threaded();
    let (fatal, fatal_calls) = counting_fatal_handler();
    render_loop.set_fatal_handler(fatal);
    platform.set_fail_context_creation(true);

    let window = platform.create_window(1, Size::new(320, 240));
    window.show_exposed();
    let result = render_loop.exposure_changed(&shared(&window));

    assert!(matches!(result, Err(RenderLoopError::ContextCreation { window: 1, .. })));
    assert_eq!(fatal_calls.load(Ordering::SeqCst), 1);
    assert!(!render_loop.window_status(1).unwrap().render_thread_running);
    assert_eq!(platform.contexts_created(), 0);
}

#[test]
fn test_handled_context_failure_skips_fatal_handler() {
    let (platform, render_loop) = threaded();
    let (fatal, fatal_calls) = counting_fatal_handler();
    render_loop.set_fatal_handler(fatal);
    render_loop.set_error_handler(Some(Arc::new(|error: &RenderLoopError| {
        matches!(error, RenderLoopError::ContextCreation { .. })
    })));
    platform.set_fail_context_creation(true);

    let window = platform.create_window(1, Size::new(320, 240));
    window.show_exposed();
    assert!(render_loop.exposure_changed(&shared(&window)).is_err());
    assert_eq!(fatal_calls.load(Ordering::SeqCst), 0);

    // A later exposure can still succeed
    platform.set_fail_context_creation(false);
    expose(&render_loop, &window);
    assert!(render_loop.window_status(1).unwrap().render_thread_running);
}

#[test]
fn test_resize_syncs_new_size_synchronously() {
    let (platform, render_loop) = threaded();
    let window = exposed_window(&platform, 1, Size::new(800, 600));
    expose(&render_loop, &window);

    window.set_size(Size::new(1024, 768));
    render_loop.resize(1);

    let status = render_loop.window_status(1).unwrap();
    assert_eq!(status.syncs_completed, 2);
    assert_eq!(status.frames_swapped, 2);
    assert!(platform.journal().calls(1).contains(&Call::Render(Size::new(1024, 768))));
}

#[test]
fn test_bad_geometry_gets_no_context_until_resized() {
    let (platform, render_loop) = threaded();
    let empty = exposed_window(&platform, 1, Size::new(0, 240));
    render_loop.exposure_changed(&shared(&empty)).unwrap();

    let off_screen = exposed_window(&platform, 2, Size::new(320, 240));
    off_screen.set_screen_geometry(Some(Rect::new(0, 0, 1920, 1080)));
    off_screen.set_position(5000, 5000);
    render_loop.exposure_changed(&shared(&off_screen)).unwrap();

    for id in [1, 2] {
        let calls = platform.journal().calls(id);
        assert!(!calls
            .iter()
            .any(|call| matches!(call, Call::MakeCurrent { .. } | Call::Swap)));
        assert!(!render_loop.window_status(id).unwrap().render_thread_running);
    }
    assert_eq!(platform.contexts_created(), 0);

    empty.set_size(Size::new(320, 240));
    render_loop.resize(1);
    off_screen.set_position(100, 100);
    render_loop.resize(2);

    assert!(empty.wait_for_frames(1, PUMP_TIMEOUT));
    assert!(off_screen.wait_for_frames(1, PUMP_TIMEOUT));
    assert_eq!(platform.contexts_created(), 2);
}

#[test]
fn test_context_retry_does_not_hold_the_sync_lock() {
    let (platform, render_loop) = threaded();
    let window = exposed_window(&platform, 1, Size::new(320, 240));
    // 200 ms frame interval
    window.set_refresh_rate(Some(5.0));
    expose(&render_loop, &window);

    platform.set_fail_context_recreation(true);
    platform.lose_contexts();

    let started = Instant::now();
    render_loop.resize(1);
    let blocked = started.elapsed();

    assert!(
        blocked < Duration::from_millis(150),
        "control thread blocked for {:?}",
        blocked
    );
    assert!(!render_loop.window_status(1).unwrap().update_scheduled);
}

#[test]
fn test_grab_reads_back_current_content() {
    let (platform, render_loop) = threaded();
    let window = exposed_window(&platform, 1, Size::new(64, 32));
    expose(&render_loop, &window);

    window.set_color([10, 20, 30, 255]);
    let image = render_loop.grab(1).unwrap().unwrap();

    assert_eq!(image.dimensions(), (64, 32));
    assert_eq!(image.get_pixel(5, 5).0, [10, 20, 30, 255]);
    // Grabbing never presents
    assert_eq!(render_loop.window_status(1).unwrap().frames_swapped, 1);
}

#[test]
fn test_grab_unknown_window() {
    let (_platform, render_loop) = threaded();
    assert!(matches!(render_loop.grab(42), Err(RenderLoopError::UnknownWindow(42))));
}

#[test]
fn test_context_loss_is_recovered_on_next_sync() {
    let (platform, render_loop) = threaded();
    let window = exposed_window(&platform, 1, Size::new(320, 240));
    expose(&render_loop, &window);

    platform.lose_contexts();
    window.mark_dirty();
    render_loop.maybe_update(1).unwrap();

    assert!(pump_until(&render_loop, || window.frames_swapped() >= 2));
    assert_eq!(platform.contexts_recreated(), 1);
    assert_eq!(platform.live_contexts(), 1);

    let calls = platform.journal().calls(1);
    assert!(calls.contains(&Call::Invalidate));
    assert_eq!(calls.iter().filter(|c| **c == Call::SceneInitialized).count(), 2);
}

#[test]
fn test_forced_repaint_survives_failed_sync() {
    let (platform, render_loop) = threaded();
    let window = exposed_window(&platform, 1, Size::new(320, 240));
    expose(&render_loop, &window);

    platform.set_fail_context_recreation(true);
    platform.lose_contexts();
    render_loop.update(1).unwrap();

    let before = render_loop.window_status(1).unwrap();
    assert!(pump_until(&render_loop, || !render_loop.window_status(1).unwrap().update_scheduled));
    let failed = render_loop.window_status(1).unwrap();
    assert_eq!(failed.syncs_completed, before.syncs_completed);
    assert!(failed.force_render_pass);

    // The render thread keeps asking for retries; the first one that works renders
    platform.set_fail_context_recreation(false);
    assert!(pump_until(&render_loop, || window.frames_swapped() >= 2));
    assert!(!render_loop.window_status(1).unwrap().force_render_pass);
}

#[test]
fn test_single_window_animates_through_sync_cycle() {
    let (platform, render_loop) = threaded();
    let window = exposed_window(&platform, 1, Size::new(320, 240));
    expose(&render_loop, &window);

    render_loop.animation_started();
    assert!(!render_loop.is_animation_timer_active());

    assert!(pump_until(&render_loop, || render_loop.animation_advance_count() >= 3));
    assert!(!render_loop.is_animation_timer_active());

    render_loop.animation_stopped();
    pump_for(&render_loop, Duration::from_millis(30));
    let stopped_at = render_loop.animation_advance_count();
    pump_for(&render_loop, Duration::from_millis(50));
    assert_eq!(render_loop.animation_advance_count(), stopped_at);
}

#[test]
fn test_animation_timer_runs_unless_exactly_one_window_is_exposed() {
    let (platform, render_loop) = threaded();
    let a = exposed_window(&platform, 1, Size::new(64, 64));
    let b = exposed_window(&platform, 2, Size::new(64, 64));
    expose(&render_loop, &a);
    expose(&render_loop, &b);

    render_loop.animation_started();
    assert!(render_loop.is_animation_timer_active());
    assert!(pump_until(&render_loop, || render_loop.animation_advance_count() >= 2));

    obscure(&render_loop, &b);
    assert!(!render_loop.is_animation_timer_active());

    obscure(&render_loop, &a);
    assert!(render_loop.is_animation_timer_active());

    render_loop.animation_stopped();
    assert!(!render_loop.is_animation_timer_active());
}

#[test]
fn test_render_thread_animators_advance_under_window_lock() {
    let (platform, render_loop) = threaded();
    let window = exposed_window(&platform, 1, Size::new(64, 64));
    let controller = Arc::new(AnimationController::new());
    window.set_animation_controller(Some(controller.clone()));
    expose(&render_loop, &window);

    controller.start_animator();
    render_loop.update(1).unwrap();

    // Render-thread animators keep frames coming without further control-thread syncs
    assert!(pump_until(&render_loop, || controller.ticks() >= 3));
    assert!(window.wait_for_frames(3, PUMP_TIMEOUT));

    controller.stop_animator();
    render_loop.update(1).unwrap();
    pump_for(&render_loop, Duration::from_millis(50));
    let ticks = controller.ticks();
    std::thread::sleep(Duration::from_millis(50));
    assert_eq!(controller.ticks(), ticks);
}
