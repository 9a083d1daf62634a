//! visreg: visual regression snapshots from the command line
//!
//! ## Usage
//!
//! ```bash
//! visreg compare expected.png actual.png --diff diff.png
//! visreg verify                  # compare stored captures, fail on missing baselines
//! visreg approve --test "home*"  # promote captures to baselines
//! visreg status --format json
//! visreg clean
//! ```
//!
//! Exit status: 0 when everything matches, 1 when a snapshot differs or
//! cannot be compared, 2 on usage or configuration errors.

use clap::Parser;
use std::process::ExitCode;
use visreg::{LogFormat, PolicyComposition};
use visreg_cli::{
    compare_files, print_json, ApproveArgs, Cli, CliConfig, CliResult, ColorChoice, Commands,
    CompareArgs, CompareRequest, OutputFormat, ProgressReporter, SnapshotRunner, StatusArgs,
    Verbosity, VerifyArgs,
};

fn main() -> ExitCode {
    let cli = Cli::parse();
    let config = build_config(&cli);
    visreg::init_tracing(config.verbosity.log_filter(), config.log_format);

    match run(cli.command, &config) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(1),
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::from(2)
        }
    }
}

fn build_config(cli: &Cli) -> CliConfig {
    let color: ColorChoice = cli.color.clone().into();
    let log_format = if cli.log_json {
        LogFormat::Json
    } else {
        LogFormat::Text
    };

    CliConfig::new()
        .with_verbosity(Verbosity::from_flags(cli.quiet, cli.verbose))
        .with_color(color)
        .with_config_path(cli.config.clone())
        .with_log_format(log_format)
}

fn reporter(config: &CliConfig) -> ProgressReporter {
    ProgressReporter::new(config.color.should_color(), config.verbosity.is_quiet())
}

/// Returns whether every comparison passed
fn run(command: Commands, config: &CliConfig) -> CliResult<bool> {
    match command {
        Commands::Compare(args) => run_compare(config, args),
        Commands::Verify(args) => run_verify(config, &args),
        Commands::Approve(args) => run_approve(config, &args),
        Commands::Status(args) => run_status(config, &args),
        Commands::Clean => {
            let runner = SnapshotRunner::new(config.clone(), config.load_visual_config()?);
            let removed = runner.clean()?;
            reporter(config).info(&format!("removed {removed} files"));
            Ok(true)
        }
    }
}

fn run_compare(config: &CliConfig, args: CompareArgs) -> CliResult<bool> {
    let visual = config.load_visual_config()?;
    let mut request = CompareRequest::new(args.baseline, args.actual, &visual);
    request.diff = args.diff;
    if args.all {
        request.composition = PolicyComposition::All;
    }
    let mut options = request.options;
    if let Some(threshold) = args.threshold {
        options = options.with_threshold(threshold);
    }
    if let Some(pixels) = args.max_diff_pixels {
        options = options.with_max_diff_pixels(pixels);
    }
    if let Some(ratio) = args.max_diff_ratio {
        options = options.with_max_diff_pixel_ratio(ratio);
    }
    for region in args.mask {
        options = options.with_mask(region);
    }
    request.options = options;

    let outcome = compare_files(&request)?;

    match OutputFormat::from(args.format) {
        OutputFormat::Json => print_json(&outcome)?,
        OutputFormat::Text => {
            let reporter = reporter(config);
            let detail = format!(
                "{} of {} pixels differ ({:.2}%)",
                outcome.summary.diff_pixels,
                outcome.summary.total_pixels,
                outcome.diff_percentage
            );
            if outcome.passed {
                reporter.success(&detail);
            } else {
                reporter.failure(&detail);
            }
            if let Some(ref path) = outcome.diff_path {
                reporter.info(&format!("diff written to {}", path.display()));
            }
        }
    }
    Ok(outcome.passed)
}

fn run_verify(config: &CliConfig, args: &VerifyArgs) -> CliResult<bool> {
    let runner = SnapshotRunner::new(config.clone(), config.load_visual_config()?);
    let filter = runner.key_filter(args.browser.as_deref(), args.test.as_deref(), None)?;
    let format = OutputFormat::from(args.format);

    // JSON goes to stdout; keep stderr quiet apart from failures
    let mut reporter = ProgressReporter::new(
        config.color.should_color(),
        config.verbosity.is_quiet() || format == OutputFormat::Json,
    );
    let report = runner.verify(&filter, args.seed_missing, args.report, &mut reporter)?;

    match format {
        OutputFormat::Json => print_json(&report)?,
        OutputFormat::Text => {
            if report.outcomes.is_empty() {
                reporter.warning(&format!(
                    "no captures found under {}",
                    runner.store().output_dir().display()
                ));
            }
            reporter.summary(
                report.passed(),
                report.failed(),
                report.errors(),
                report.duration,
            );
        }
    }
    Ok(report.all_passed())
}

fn run_approve(config: &CliConfig, args: &ApproveArgs) -> CliResult<bool> {
    let runner = SnapshotRunner::new(config.clone(), config.load_visual_config()?);
    let filter = runner.key_filter(
        args.browser.as_deref(),
        args.test.as_deref(),
        args.name.as_deref(),
    )?;
    let approved = runner.approve(&filter)?;

    let reporter = reporter(config);
    for key in &approved {
        reporter.success(&format!("approved {key}"));
    }
    if approved.is_empty() {
        reporter.warning("nothing to approve");
    }
    Ok(true)
}

fn run_status(config: &CliConfig, args: &StatusArgs) -> CliResult<bool> {
    let runner = SnapshotRunner::new(config.clone(), config.load_visual_config()?);
    let filter = runner.key_filter(args.browser.as_deref(), None, None)?;
    let status = runner.status(&filter)?;

    match OutputFormat::from(args.format) {
        OutputFormat::Json => print_json(&status)?,
        OutputFormat::Text => {
            let reporter = reporter(config);
            reporter.header("Baselines");
            reporter.info(&format!(
                "{} baselines in {}",
                status.baselines.len(),
                runner.store().baseline_dir().display()
            ));
            reporter.info(&format!("{} actual captures", status.actual.len()));
            for key in &status.unbaselined {
                reporter.warning(&format!("{key} has no baseline"));
            }
            for diff in &status.diffs {
                reporter.failure(&format!("{} differs", diff.key));
            }
        }
    }
    Ok(true)
}
