//! Render loop demo
//!
//! Drives the headless backend through whichever render loop the platform and
//! configuration select: exposes a few windows, changes their content every
//! frame, optionally runs animations and grabs the first window to a PNG.

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use clap::Parser;

use pulsar_render_loop::headless::{HeadlessPlatform, HeadlessWindow};
use pulsar_render_loop::{
    install, AnimationController, PlatformCapabilities, RenderLoopConfig, RenderLoopError,
    RenderLoopKind, RenderWindow, SharedWindow, Size,
};

mod args;
mod logging;

pub const DEMO_NAME: &str = env!("CARGO_PKG_NAME");
pub const DEMO_VERSION: &str = env!("CARGO_PKG_VERSION");

const PUMP_INTERVAL: Duration = Duration::from_millis(16);
const FRAME_TIMEOUT: Duration = Duration::from_secs(10);

fn main() -> anyhow::Result<()> {
    let args = args::ParsedArgs::parse();
    let _log_guard = logging::init(args.verbose, args.log_to_file)?;
    tracing::info!("{} v{}", DEMO_NAME, DEMO_VERSION);

    if args.profile {
        profiling::enable_profiling();
    }
    profiling::set_thread_name("ControlThread");

    let mut config = match args.config.as_deref() {
        Some(path) => RenderLoopConfig::load(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => RenderLoopConfig::global().clone(),
    };
    if let Some(kind) = args.loop_kind {
        config.loop_kind = Some(kind.to_string());
    }

    // The platform loop is only preferred when explicitly asked for
    let platform = Arc::new(HeadlessPlatform::with_capabilities(PlatformCapabilities {
        threaded_context: true,
        prefers_platform_loop: args.loop_kind == Some(RenderLoopKind::Windows),
    }));
    let render_loop = install(platform.clone(), config)?;
    render_loop.set_error_handler(Some(Arc::new(|error: &RenderLoopError| {
        tracing::error!("[DEMO] ❌ {}", error);
        false
    })));

    let controller = Arc::new(AnimationController::new());
    let windows: Vec<Arc<HeadlessWindow>> = (1..=args.windows)
        .map(|id| {
            let window = platform.create_window(id, Size::new(640, 480));
            window.set_animation_controller(Some(controller.clone()));
            window
        })
        .collect();

    for window in &windows {
        let shared: SharedWindow = window.clone();
        render_loop.show(&shared);
        window.show_exposed();
        render_loop.exposure_changed(&shared)?;
    }

    if args.animate {
        controller.start_animator();
        render_loop.animation_started();
    }

    for frame in 1..=args.frames {
        for window in &windows {
            let shade = (frame * 4 % 256) as u8;
            window.set_color([shade, 255 - shade, 128, 255]);
            render_loop.maybe_update(window.id())?;
        }

        let deadline = Instant::now() + FRAME_TIMEOUT;
        while windows
            .iter()
            .any(|window| window.frames_swapped() <= frame && window.is_renderable())
            && Instant::now() < deadline
        {
            render_loop.process_events(PUMP_INTERVAL);
        }
    }

    if args.animate {
        render_loop.animation_stopped();
        controller.stop_animator();
        tracing::info!("[DEMO] render-thread animators ticked {} times", controller.ticks());
    }

    if let (Some(path), Some(first)) = (args.grab.as_ref(), windows.first()) {
        match render_loop.grab(first.id())? {
            Some(image) => {
                image
                    .save(path)
                    .with_context(|| format!("saving grab to {}", path.display()))?;
                tracing::info!("[DEMO] ✅ grab of window {} saved to {}", first.id(), path.display());
            }
            None => tracing::warn!("[DEMO] window {} has nothing to grab", first.id()),
        }
    }

    for window in &windows {
        tracing::info!(
            "[DEMO] window {}: {} frames swapped, {} polishes",
            window.id(),
            window.frames_swapped(),
            window.polish_count()
        );
    }

    render_loop.cleanup();
    tracing::info!(
        "[DEMO] {} contexts created, {} still alive",
        platform.contexts_created(),
        platform.live_contexts()
    );

    if args.profile {
        println!("{}", profiling::frame_stats().to_json()?);
    }
    Ok(())
}
