//! visreg CLI library
//!
//! Command-line front end over the `visreg` baseline store: compare two
//! PNG files, verify stored captures, approve them as baselines and clean up.

#![warn(missing_docs)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]

mod commands;
mod config;
mod error;
mod output;
mod runner;

pub use commands::{
    ApproveArgs, Cli, ColorArg, Commands, CompareArgs, OutputFormatArg, StatusArgs, VerifyArgs,
};
pub use config::{CliConfig, ColorChoice, Verbosity};
pub use error::{CliError, CliResult};
pub use output::{print_json, OutputFormat, ProgressReporter};
pub use runner::{
    compare_files, CompareRequest, FileComparison, KeyFilter, SnapshotOutcome, SnapshotRunner,
    StatusReport, VerifyReport,
};
