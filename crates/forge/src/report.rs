//! Per-unit and per-step results, aggregated into a run report.

use log::{error, info, warn};
use serde::Serialize;
use std::path::PathBuf;

use crate::error::{exit_label, Error};
use crate::profile::BuildProfile;

/// Outcome of one external tool run for a unit.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum BuildResult {
    Success,
    Failure { exit_code: Option<i32>, output: String },
    /// Never started because the run was interrupted.
    Interrupted,
}

impl BuildResult {
    pub fn is_success(&self) -> bool {
        matches!(self, BuildResult::Success)
    }
}

/// A result attributed to the unit that produced it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct UnitResult {
    pub source: PathBuf,
    pub object: PathBuf,
    pub result: BuildResult,
}

impl UnitResult {
    pub fn failure(&self) -> Option<UnitFailure> {
        match &self.result {
            BuildResult::Failure { exit_code, output } => Some(UnitFailure {
                source: self.source.clone(),
                exit_code: *exit_code,
                output: output.clone(),
            }),
            BuildResult::Success | BuildResult::Interrupted => None,
        }
    }
}

/// A failed unit with its captured tool output.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct UnitFailure {
    pub source: PathBuf,
    pub exit_code: Option<i32>,
    pub output: String,
}

/// Pipeline stage a step failed in.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Prepare,
    Compile,
    Archive,
    Link,
    PostLink,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Outcome {
    /// Produced fresh artifacts.
    Built { artifacts: Vec<PathBuf> },
    /// Archive reused from a previous run without invoking any tool.
    Cached { artifact: PathBuf },
    Failed {
        stage: Stage,
        message: String,
        /// Captured output of the failing link or extraction; unit output lives in `units`.
        output: Option<String>,
    },
    /// Not attempted because a step it depends on failed.
    Blocked { by: String },
    Interrupted,
}

impl Outcome {
    pub fn failed(stage: Stage, err: &Error) -> Self {
        Outcome::Failed {
            stage,
            message: err.to_string(),
            output: err.captured_output().map(str::to_string),
        }
    }

    /// True for outcomes that leave usable artifacts behind.
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Built { .. } | Outcome::Cached { .. })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    Archive,
    Target,
}

/// Everything that happened to one archive or target.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct StepReport {
    pub kind: StepKind,
    pub name: String,
    pub units: Vec<UnitResult>,
    pub outcome: Outcome,
}

impl StepReport {
    pub fn new(kind: StepKind, name: impl Into<String>, outcome: Outcome) -> Self {
        Self {
            kind,
            name: name.into(),
            units: Vec::new(),
            outcome,
        }
    }

    pub fn failed_units(&self) -> impl Iterator<Item = &UnitResult> {
        self.units
            .iter()
            .filter(|u| matches!(u.result, BuildResult::Failure { .. }))
    }
}

/// Aggregated result of a whole run. Never persisted as state; written out for the operator.
#[derive(Clone, Debug, Serialize)]
pub struct BuildReport {
    pub profile: BuildProfile,
    pub archives: Vec<StepReport>,
    pub targets: Vec<StepReport>,
}

impl BuildReport {
    pub fn new(profile: BuildProfile) -> Self {
        Self {
            profile,
            archives: Vec::new(),
            targets: Vec::new(),
        }
    }

    pub fn target(&self, name: &str) -> Option<&StepReport> {
        self.targets.iter().find(|t| t.name == name)
    }

    pub fn archive(&self, name: &str) -> Option<&StepReport> {
        self.archives.iter().find(|a| a.name == name)
    }

    fn steps(&self) -> impl Iterator<Item = &StepReport> {
        self.archives.iter().chain(self.targets.iter())
    }

    pub fn failed_targets(&self) -> usize {
        self.targets.iter().filter(|t| !t.outcome.is_success()).count()
    }

    pub fn failed_archives(&self) -> usize {
        self.archives.iter().filter(|a| !a.outcome.is_success()).count()
    }

    pub fn is_success(&self) -> bool {
        self.steps().all(|s| s.outcome.is_success())
    }

    /// Process exit status for this run.
    pub fn exit_code(&self) -> u8 {
        u8::from(!self.is_success())
    }

    /// Surface every captured failure, attributed to its unit or step, then a one-line summary.
    pub fn log_summary(&self) {
        for step in self.steps() {
            for unit in step.failed_units() {
                if let BuildResult::Failure { exit_code, output } = &unit.result {
                    error!(
                        "{}: {} failed ({})\n{}",
                        step.name,
                        unit.source.display(),
                        exit_label(exit_code),
                        output.trim_end()
                    );
                }
            }
            match &step.outcome {
                Outcome::Failed { message, output, .. } => {
                    error!("{message}");
                    if let Some(output) = output {
                        error!("{}", output.trim_end());
                    }
                }
                Outcome::Blocked { by } => warn!("{}: skipped, depends on failed {by}", step.name),
                Outcome::Interrupted => warn!("{}: interrupted", step.name),
                Outcome::Built { .. } | Outcome::Cached { .. } => {}
            }
        }

        if self.is_success() {
            info!(
                "{} targets built ({} profile)",
                self.targets.len(),
                self.profile.configuration
            );
        } else {
            error!(
                "{} of {} targets failed, {} of {} archives failed",
                self.failed_targets(),
                self.targets.len(),
                self.failed_archives(),
                self.archives.len()
            );
        }
    }
}
