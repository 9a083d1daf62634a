//! CLI command definitions using clap

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// visreg: visual regression snapshots for browser-rendered pages
#[derive(Parser, Debug)]
#[command(name = "visreg")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Verbosity level (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Quiet mode (suppress non-error output)
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Color output (auto, always, never)
    #[arg(long, default_value = "auto", global = true)]
    pub color: ColorArg,

    /// Configuration file (defaults to ./visreg.yaml when present)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    pub log_json: bool,

    /// Subcommand to run
    #[command(subcommand)]
    pub command: Commands,
}

/// CLI subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Compare two PNG files
    Compare(CompareArgs),

    /// Compare every actual capture against its baseline
    Verify(VerifyArgs),

    /// Promote actual captures to baselines
    Approve(ApproveArgs),

    /// List baselines and pending captures
    Status(StatusArgs),

    /// Remove actual and diff captures
    Clean,
}

/// Arguments for the compare command
#[derive(Parser, Debug)]
pub struct CompareArgs {
    /// Baseline (expected) image
    pub baseline: PathBuf,

    /// Actual image
    pub actual: PathBuf,

    /// Write the diff image here
    #[arg(long)]
    pub diff: Option<PathBuf>,

    /// Colour sensitivity and ratio limit (0.0-1.0)
    #[arg(long)]
    pub threshold: Option<f64>,

    /// Maximum number of differing pixels
    #[arg(long)]
    pub max_diff_pixels: Option<u64>,

    /// Maximum ratio of differing pixels (0.0-1.0)
    #[arg(long)]
    pub max_diff_ratio: Option<f64>,

    /// Region to ignore as x,y,width,height (repeatable)
    #[arg(long, value_parser = parse_region)]
    pub mask: Vec<visreg::Region>,

    /// Require every configured limit to hold
    #[arg(long)]
    pub all: bool,

    /// Output format
    #[arg(long, default_value = "text")]
    pub format: OutputFormatArg,
}

/// Arguments for the verify command
#[derive(Parser, Debug)]
pub struct VerifyArgs {
    /// Browser glob; defaults to the configured browser, `*` for all
    #[arg(long)]
    pub browser: Option<String>,

    /// Only verify captures for this test (glob)
    #[arg(long)]
    pub test: Option<String>,

    /// Attach artifacts to the configured report directory
    #[arg(long)]
    pub report: bool,

    /// Seed baselines that do not exist yet instead of failing
    #[arg(long)]
    pub seed_missing: bool,

    /// Output format
    #[arg(long, default_value = "text")]
    pub format: OutputFormatArg,
}

/// Arguments for the approve command
#[derive(Parser, Debug)]
pub struct ApproveArgs {
    /// Browser glob; defaults to the configured browser, `*` for all
    #[arg(long)]
    pub browser: Option<String>,

    /// Only approve captures for this test (glob)
    #[arg(long)]
    pub test: Option<String>,

    /// Only approve captures with this snapshot name (glob)
    #[arg(long)]
    pub name: Option<String>,
}

/// Arguments for the status command
#[derive(Parser, Debug)]
pub struct StatusArgs {
    /// Browser glob; defaults to the configured browser, `*` for all
    #[arg(long)]
    pub browser: Option<String>,

    /// Output format
    #[arg(long, default_value = "text")]
    pub format: OutputFormatArg,
}

/// Output format argument
#[derive(ValueEnum, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum OutputFormatArg {
    /// Human-readable text
    #[default]
    Text,
    /// JSON document on stdout
    Json,
}

/// Color argument
#[derive(ValueEnum, Clone, Debug, Default)]
pub enum ColorArg {
    /// Automatic color detection
    #[default]
    Auto,
    /// Always use colors
    Always,
    /// Never use colors
    Never,
}

impl From<ColorArg> for crate::config::ColorChoice {
    fn from(arg: ColorArg) -> Self {
        match arg {
            ColorArg::Auto => Self::Auto,
            ColorArg::Always => Self::Always,
            ColorArg::Never => Self::Never,
        }
    }
}

impl From<OutputFormatArg> for crate::output::OutputFormat {
    fn from(arg: OutputFormatArg) -> Self {
        match arg {
            OutputFormatArg::Text => Self::Text,
            OutputFormatArg::Json => Self::Json,
        }
    }
}

/// Parse `x,y,width,height`
fn parse_region(value: &str) -> Result<visreg::Region, String> {
    let parts: Vec<&str> = value.split(',').map(str::trim).collect();
    let [x, y, width, height] = parts.as_slice() else {
        return Err(format!("expected x,y,width,height, got {value:?}"));
    };
    let number = |s: &str| {
        s.parse::<u32>()
            .map_err(|e| format!("invalid number {s:?}: {e}"))
    };
    Ok(visreg::Region::new(
        number(x)?,
        number(y)?,
        number(width)?,
        number(height)?,
    ))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::config::ColorChoice;

    mod cli_tests {
        use super::*;

        #[test]
        fn test_parse_compare_command() {
            let cli = Cli::parse_from(["visreg", "compare", "a.png", "b.png"]);
            let Commands::Compare(args) = cli.command else {
                panic!("expected compare command");
            };
            assert_eq!(args.baseline, PathBuf::from("a.png"));
            assert_eq!(args.actual, PathBuf::from("b.png"));
            assert_eq!(args.format, OutputFormatArg::Text);
            assert!(!args.all);
        }

        #[test]
        fn test_parse_compare_with_limits_and_masks() {
            let cli = Cli::parse_from([
                "visreg",
                "compare",
                "a.png",
                "b.png",
                "--threshold",
                "0.05",
                "--max-diff-pixels",
                "100",
                "--mask",
                "0,0,10,20",
                "--mask",
                "5, 5, 1, 1",
                "--all",
                "--format",
                "json",
            ]);
            let Commands::Compare(args) = cli.command else {
                panic!("expected compare command");
            };
            assert_eq!(args.threshold, Some(0.05));
            assert_eq!(args.max_diff_pixels, Some(100));
            assert_eq!(args.mask.len(), 2);
            assert_eq!(args.mask[0], visreg::Region::new(0, 0, 10, 20));
            assert!(args.all);
            assert_eq!(args.format, OutputFormatArg::Json);
        }

        #[test]
        fn test_bad_mask_rejected() {
            let result =
                Cli::try_parse_from(["visreg", "compare", "a.png", "b.png", "--mask", "1,2,3"]);
            assert!(result.is_err());
        }

        #[test]
        fn test_parse_verify_command() {
            let cli = Cli::parse_from([
                "visreg",
                "verify",
                "--browser",
                "firefox",
                "--seed-missing",
                "--report",
            ]);
            let Commands::Verify(args) = cli.command else {
                panic!("expected verify command");
            };
            assert_eq!(args.browser.as_deref(), Some("firefox"));
            assert!(args.seed_missing);
            assert!(args.report);
            assert!(args.test.is_none());
        }

        #[test]
        fn test_parse_approve_filters() {
            let cli = Cli::parse_from(["visreg", "approve", "--test", "home", "--name", "hero"]);
            let Commands::Approve(args) = cli.command else {
                panic!("expected approve command");
            };
            assert_eq!(args.test.as_deref(), Some("home"));
            assert_eq!(args.name.as_deref(), Some("hero"));
            assert!(args.browser.is_none());
        }

        #[test]
        fn test_parse_status_and_clean() {
            let cli = Cli::parse_from(["visreg", "status"]);
            assert!(matches!(cli.command, Commands::Status(_)));
            let cli = Cli::parse_from(["visreg", "clean"]);
            assert!(matches!(cli.command, Commands::Clean));
        }

        #[test]
        fn test_global_flags() {
            let cli = Cli::parse_from([
                "visreg",
                "-vv",
                "--color",
                "never",
                "--config",
                "ci.yaml",
                "--log-json",
                "status",
            ]);
            assert_eq!(cli.verbose, 2);
            assert!(matches!(cli.color, ColorArg::Never));
            assert_eq!(cli.config, Some(PathBuf::from("ci.yaml")));
            assert!(cli.log_json);
        }

        #[test]
        fn test_global_quiet_flag() {
            let cli = Cli::parse_from(["visreg", "clean", "-q"]);
            assert!(cli.quiet);
        }
    }

    mod conversion_tests {
        use super::*;

        #[test]
        fn test_color_arg_conversion() {
            let auto: ColorChoice = ColorArg::Auto.into();
            assert!(matches!(auto, ColorChoice::Auto));
            let never: ColorChoice = ColorArg::Never.into();
            assert!(matches!(never, ColorChoice::Never));
        }

        #[test]
        fn test_parse_region_errors() {
            assert!(parse_region("a,b,c,d").is_err());
            assert!(parse_region("1,2,3,4,5").is_err());
            assert_eq!(
                parse_region("1,2,3,4").unwrap(),
                visreg::Region::new(1, 2, 3, 4)
            );
        }
    }
}
