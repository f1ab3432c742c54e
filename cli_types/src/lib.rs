use anyhow::{anyhow, Result};
use clap::{Args, CommandFactory, Parser, Subcommand, ValueEnum};
use std::fmt::Display;
use std::path::PathBuf;
use std::str::FromStr;

/// Evaluation strategy used to judge the current benchmark.
#[derive(ValueEnum, Copy, Clone, Debug, PartialEq, Eq)]
pub enum EvaluationMethod {
    /// Compare against fixed, configured values
    #[value(name = "threshold")]
    Threshold,
    /// Compare against the latest stored snapshot
    #[value(name = "previous")]
    Previous,
    /// Compare against the latest stored snapshot that passed its evaluation
    #[value(name = "previous_successful")]
    PreviousSuccessful,
    /// Require each metric to fall into a configured `[lower, upper]` range
    #[value(name = "threshold_range")]
    ThresholdRange,
    /// Reject jumps relative to the previous snapshot
    #[value(name = "jump_detection")]
    JumpDetection,
    /// Compare against the moving average of the last snapshots
    #[value(name = "trend_detection_moving_ave")]
    TrendMovingAverage,
    /// Compare against previous, week-old and last stable snapshots
    #[value(name = "trend_detection_deltas")]
    TrendDeltas,
}

impl EvaluationMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            EvaluationMethod::Threshold => "threshold",
            EvaluationMethod::Previous => "previous",
            EvaluationMethod::PreviousSuccessful => "previous_successful",
            EvaluationMethod::ThresholdRange => "threshold_range",
            EvaluationMethod::JumpDetection => "jump_detection",
            EvaluationMethod::TrendMovingAverage => "trend_detection_moving_ave",
            EvaluationMethod::TrendDeltas => "trend_detection_deltas",
        }
    }
}

impl Display for EvaluationMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EvaluationMethod {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "threshold" => Ok(EvaluationMethod::Threshold),
            "previous" => Ok(EvaluationMethod::Previous),
            "previous_successful" => Ok(EvaluationMethod::PreviousSuccessful),
            "threshold_range" => Ok(EvaluationMethod::ThresholdRange),
            "jump_detection" => Ok(EvaluationMethod::JumpDetection),
            "trend_detection_moving_ave" => Ok(EvaluationMethod::TrendMovingAverage),
            "trend_detection_deltas" => Ok(EvaluationMethod::TrendDeltas),
            _ => Err(anyhow!(
                "Invalid evaluation method: {}. Must be one of threshold, previous, previous_successful, threshold_range, jump_detection, trend_detection_moving_ave, trend_detection_deltas",
                s
            )),
        }
    }
}

/// Rule reducing all metric verdicts to a single build verdict.
#[derive(ValueEnum, Copy, Clone, Debug, PartialEq, Eq)]
pub enum FailingCondition {
    /// Fail if any metric failed
    Any,
    /// Fail only if every metric failed
    All,
    /// Never fail, only report
    None,
}

impl FromStr for FailingCondition {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "any" => Ok(FailingCondition::Any),
            "all" => Ok(FailingCondition::All),
            "none" => Ok(FailingCondition::None),
            _ => Err(anyhow!(
                "Invalid failing condition: {}. Valid values are: any, all, none",
                s
            )),
        }
    }
}

#[derive(Parser)]
#[command(version, name = "bench-gate")]
pub struct Cli {
    /// Increase verbosity level (can be specified multiple times.) The first level sets level
    /// "info", second sets level "debug", and third sets level "trace" for the logger.
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Create a versionless command for manpage generation
    pub fn command_without_version() -> clap::Command {
        let mut cmd = Self::command();
        cmd = cmd.version(None::<&str>);
        cmd
    }
}

#[derive(Args)]
pub struct CliDataFile {
    /// JSON document holding the benchmark history.
    /// Defaults to `<store.folder>/<store.file>` from the configuration.
    #[arg(short = 'f', long)]
    pub data_file: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Evaluate a benchmark result against the stored history.
    ///
    /// The result document is a JSON object with a `benchInfo` block and a
    /// `results` array of `{name, value, unit}` triples. The evaluation method
    /// and its per-metric parameters are read from the `[evaluation]` section
    /// of `.benchgateconfig`. Command line options override the file.
    ///
    /// ## Failing conditions
    ///
    /// **any**: the run fails if any metric failed.
    ///
    /// **all**: the run fails only if every metric failed. A single passing
    /// (or unevaluable) metric keeps the run green.
    ///
    /// **none**: the run never fails, results are only reported.
    ///
    /// The process exits with a non-zero status when the run fails. With
    /// `--save` the result is appended to the history after evaluation, also
    /// when it failed.
    Evaluate {
        /// Name of the benchmark group the result belongs to
        #[arg(short = 'n', long = "name", value_parser=parse_spaceless_string)]
        name: String,

        /// JSON file with the current benchmark results
        #[arg(short, long)]
        results: PathBuf,

        #[command(flatten)]
        data_file: CliDataFile,

        /// Additional configuration file, overriding discovered ones
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Override the configured evaluation method
        #[arg(short, long, value_enum)]
        method: Option<EvaluationMethod>,

        /// Override the configured failing condition
        #[arg(long, value_enum)]
        failing_condition: Option<FailingCondition>,

        /// Compare against another group's history instead of this one
        #[arg(long, value_parser=parse_spaceless_string)]
        compare_to: Option<String>,

        /// Commit id of the last stable release (delta trend detection)
        #[arg(long, value_parser=parse_spaceless_string)]
        stable_commit: Option<String>,

        /// Append the current result to the history after evaluation
        #[arg(short, long)]
        save: bool,

        /// Append a Markdown summary to this file
        #[arg(long, env = "GITHUB_STEP_SUMMARY")]
        summary: Option<PathBuf>,

        /// GitHub event payload describing the triggering commit
        #[arg(long, env = "GITHUB_EVENT_PATH")]
        event_path: Option<PathBuf>,

        /// Commit id to record when no event payload is available
        #[arg(long, value_parser=parse_spaceless_string)]
        commit_id: Option<String>,
    },

    /// List the most recent snapshots stored for a group
    History {
        /// Name of the benchmark group
        #[arg(short = 'n', long = "name", value_parser=parse_spaceless_string)]
        name: String,

        /// Number of snapshots to show
        #[arg(short = 'c', long, default_value = "10")]
        max_count: usize,

        /// Only show snapshots whose evaluation passed
        #[arg(long)]
        successful_only: bool,

        #[command(flatten)]
        data_file: CliDataFile,

        /// Additional configuration file, overriding discovered ones
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// Show the configuration sources and the effective evaluation settings
    Config {
        /// Additional configuration file, overriding discovered ones
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}

fn parse_spaceless_string(s: &str) -> Result<String> {
    if s.split_whitespace().count() > 1 {
        Err(anyhow!("invalid string/key/value: found space in '{}'", s))
    } else {
        Ok(String::from(s))
    }
}
