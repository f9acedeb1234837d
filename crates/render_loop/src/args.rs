//! Command-line arguments for the render loop demo

use std::path::PathBuf;

use clap::Parser;

use pulsar_render_loop::RenderLoopKind;

#[derive(Parser, Debug, Clone)]
#[command(name = "render_loop_demo", version)]
#[command(about = "Drive the Pulsar render loops over the headless backend", long_about = None)]
pub struct ParsedArgs {
    /// Colored, thread-tagged console logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Also write logs to the app data directory
    #[arg(long = "log-file")]
    pub log_to_file: bool,

    /// Print per-phase frame statistics on exit
    #[arg(long)]
    pub profile: bool,

    /// Render loop to use: basic, threaded or windows
    #[arg(long = "loop", value_name = "KIND")]
    pub loop_kind: Option<RenderLoopKind>,

    /// TOML render loop configuration
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Number of windows to expose
    #[arg(long, default_value_t = 1, value_parser = clap::value_parser!(u64).range(1..))]
    pub windows: u64,

    /// Frames to render per window
    #[arg(long, default_value_t = 60)]
    pub frames: u64,

    /// Run the animation driver
    #[arg(long)]
    pub animate: bool,

    /// Save a grab of the first window as PNG
    #[arg(long, value_name = "PATH")]
    pub grab: Option<PathBuf>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    fn parse(args: &[&str]) -> Result<ParsedArgs, clap::Error> {
        ParsedArgs::try_parse_from(std::iter::once("render_loop_demo").chain(args.iter().copied()))
    }

    #[test]
    fn test_command_is_well_formed() {
        ParsedArgs::command().debug_assert();
    }

    #[test]
    fn test_defaults() {
        let parsed = parse(&[]).unwrap();
        assert_eq!(parsed.windows, 1);
        assert_eq!(parsed.frames, 60);
        assert!(parsed.loop_kind.is_none());
        assert!(!parsed.log_to_file);
    }

    #[test]
    fn test_full_command_line() {
        let parsed = parse(&[
            "-v", "--loop", "basic", "--windows", "3", "--frames", "10", "--animate", "--grab",
            "out.png", "--log-file",
        ])
        .unwrap();

        assert!(parsed.verbose);
        assert!(parsed.animate);
        assert!(parsed.log_to_file);
        assert_eq!(parsed.loop_kind, Some(RenderLoopKind::Basic));
        assert_eq!(parsed.windows, 3);
        assert_eq!(parsed.frames, 10);
        assert_eq!(parsed.grab, Some(PathBuf::from("out.png")));
    }

    #[test]
    fn test_rejects_bad_input() {
        assert!(parse(&["--loop", "vulkan"]).is_err());
        assert!(parse(&["--windows", "0"]).is_err());
        assert!(parse(&["--frames"]).is_err());
        assert!(parse(&["--bogus"]).is_err());
    }
}
