//! Logging setup for the render loop demo
//
// Console output is always on; `--verbose` switches it to the colored
// formatter, `--log-file` adds a plain non-blocking file layer under the
// engine's app data directory.
//
// Usage:
//   Call `logging::init(verbose, log_to_file)` at the start of main().
//   Keep the returned guard alive for the program's duration.

use std::fs;
use std::path::PathBuf;

use anyhow::Context;
use chrono::Local;
use directories::ProjectDirs;
use tracing::Subscriber;
use tracing_subscriber::fmt::{
    format::{FormatEvent, FormatFields, Writer},
    FmtContext,
};
use tracing_subscriber::prelude::*;
use tracing_subscriber::registry::LookupSpan;

const DEFAULT_FILTER: &str = "info,pulsar_render_loop=debug";

#[allow(dead_code)]
pub struct LogGuard(Option<tracing_appender::non_blocking::WorkerGuard>);

pub fn init(verbose: bool, log_to_file: bool) -> anyhow::Result<LogGuard> {
    let env_filter = match std::env::var("RUST_LOG") {
        Ok(val) => tracing_subscriber::EnvFilter::new(val),
        Err(_) => tracing_subscriber::EnvFilter::new(DEFAULT_FILTER),
    };

    let (file_layer, guard) = if log_to_file {
        let path = log_file_path()?;
        let file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("failed to open {}", path.display()))?;
        let (non_blocking, guard) = tracing_appender::non_blocking(file);

        // Plain formatting, no ANSI codes
        let layer = tracing_subscriber::fmt::layer()
            .with_writer(non_blocking)
            .with_ansi(false)
            .with_target(true)
            .with_thread_names(true);
        (Some(layer), Some(guard))
    } else {
        (None, None)
    };

    let registry = tracing_subscriber::registry().with(env_filter).with(file_layer);

    if verbose {
        let console_layer = tracing_subscriber::fmt::layer()
            .with_writer(std::io::stdout)
            .event_format(ThreadFormatter);
        registry.with(console_layer).try_init()?;
    } else {
        let console_layer = tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(false)
            .compact();
        registry.with(console_layer).try_init()?;
    }

    Ok(LogGuard(guard))
}

fn log_file_path() -> anyhow::Result<PathBuf> {
    let proj_dirs = ProjectDirs::from("com", "Pulsar", "Pulsar_Engine")
        .context("could not determine app data directory")?;
    let logs_dir = proj_dirs.data_dir().join("logs");
    fs::create_dir_all(&logs_dir)
        .with_context(|| format!("failed to create {}", logs_dir.display()))?;

    let now = Local::now();
    Ok(logs_dir.join(format!("render_loop_{}.log", now.format("%Y-%m-%d_%H-%M-%S"))))
}

/// Colored console formatter that leads with the thread name, so
/// control-thread and render-thread lines are easy to tell apart.
pub struct ThreadFormatter;

impl<S, N> FormatEvent<S, N> for ThreadFormatter
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &tracing::Event<'_>,
    ) -> std::fmt::Result {
        let meta = event.metadata();
        let (level_str, level_color) = match *meta.level() {
            tracing::Level::ERROR => ("ERROR", "\x1b[1;91m"),
            tracing::Level::WARN => ("WARN ", "\x1b[1;93m"),
            tracing::Level::INFO => ("INFO ", "\x1b[1;94m"),
            tracing::Level::DEBUG => ("DEBUG", "\x1b[1;92m"),
            tracing::Level::TRACE => ("TRACE", "\x1b[1;95m"),
        };

        let now = Local::now();
        write!(writer, "\x1b[2;36m{}\x1b[0m ", now.format("%H:%M:%S%.3f"))?;
        write!(writer, "{}{}\x1b[0m ", level_color, level_str)?;

        let thread = std::thread::current();
        let thread_name = thread.name().unwrap_or("unnamed");
        write!(writer, "\x1b[2;35m{:<16}\x1b[0m ", thread_name)?;

        ctx.field_format().format_fields(writer.by_ref(), event)?;
        writeln!(writer)
    }
}
