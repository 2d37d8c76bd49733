//! Error taxonomy for the build pipeline.
//!
//! Failures of individual source units are not errors at this level: they are
//! collected as [`crate::BuildResult`]s and only turn into
//! [`Error::Compilation`] once a target has gathered all of them.

use std::path::PathBuf;
use thiserror::Error;

use crate::report::UnitFailure;

/// Errors raised by the orchestration core.
#[derive(Debug, Error)]
pub enum Error {
    /// Bad profile name, job count, target declaration or missing tool. Fatal before any build step.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A cached third-party archive could not be produced.
    #[error("archive {name} failed to build: {reason}")]
    ArchiveBuild {
        name: String,
        reason: String,
        /// Units that failed to compile, empty when the archiver itself failed.
        failures: Vec<UnitFailure>,
    },

    /// One or more units of a target failed to compile.
    #[error("{target}: {} of {total} units failed to compile", .failures.len())]
    Compilation {
        target: String,
        total: usize,
        failures: Vec<UnitFailure>,
    },

    /// The linker exited unsuccessfully.
    #[error("{target}: link failed ({})", exit_label(.exit_code))]
    Link {
        target: String,
        exit_code: Option<i32>,
        output: String,
    },

    /// Section extraction exited unsuccessfully.
    #[error("{target}: section extraction failed ({})", exit_label(.exit_code))]
    PostLink {
        target: String,
        exit_code: Option<i32>,
        output: String,
    },

    /// Declared target dependencies form a cycle.
    #[error("dependency cycle between targets: {}", .cycle.join(" -> "))]
    DependencyCycle { cycle: Vec<String> },

    /// The operator interrupted the run.
    #[error("build interrupted")]
    Interrupted,

    #[error("{context}: {source}")]
    Io {
        context: String,
        path: Option<PathBuf>,
        #[source]
        source: std::io::Error,
    },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
    pub(crate) fn config(message: impl Into<String>) -> Self {
        Error::Configuration(message.into())
    }

    pub(crate) fn io(context: impl Into<String>, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::Io {
            context: context.into(),
            path: Some(path.into()),
            source,
        }
    }

    /// Captured tool output carried by this error, if any.
    pub fn captured_output(&self) -> Option<&str> {
        match self {
            Error::Link { output, .. } | Error::PostLink { output, .. } => Some(output),
            _ => None,
        }
    }
}

#[allow(clippy::ref_option)]
pub(crate) fn exit_label(code: &Option<i32>) -> String {
    match *code {
        Some(code) => format!("exit status {code}"),
        None => "terminated without exit status".to_string(),
    }
}
