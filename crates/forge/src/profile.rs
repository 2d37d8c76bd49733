//! Build profile resolution.
//!
//! A profile is resolved once per run and passed by reference to every stage.

use serde::Serialize;
use std::fmt;
use std::num::NonZeroUsize;

use crate::error::{Error, Result};

/// Named build configuration.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Configuration {
    Debug,
    Release,
    RelWithDebInfo,
}

impl Configuration {
    pub const ALL: [Configuration; 3] = [
        Configuration::Debug,
        Configuration::Release,
        Configuration::RelWithDebInfo,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Configuration::Debug => "debug",
            Configuration::Release => "release",
            Configuration::RelWithDebInfo => "relwithdebinfo",
        }
    }

    /// Returns `(optimize, debug_info)`.
    fn toggles(self) -> (bool, bool) {
        match self {
            Configuration::Debug => (false, true),
            Configuration::Release => (true, false),
            Configuration::RelWithDebInfo => (true, true),
        }
    }
}

impl TryFrom<&str> for Configuration {
    type Error = Error;

    fn try_from(s: &str) -> Result<Self> {
        let wanted = s.to_ascii_lowercase();
        Configuration::ALL
            .into_iter()
            .find(|c| c.name() == wanted)
            .ok_or_else(|| {
                Error::config(format!(
                    "unknown configuration '{s}' (expected debug, release or relwithdebinfo)"
                ))
            })
    }
}

impl fmt::Display for Configuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Immutable per-run build settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct BuildProfile {
    pub configuration: Configuration,
    pub optimize: bool,
    pub debug_info: bool,
    pub job_count: usize,
    pub force_rebuild: bool,
}

impl BuildProfile {
    /// Resolve a named profile.
    ///
    /// `jobs` overrides the host parallelism.
    pub fn resolve(name: &str, jobs: Option<usize>, force_rebuild: bool) -> Result<Self> {
        let configuration = Configuration::try_from(name)?;
        Self::new(configuration, jobs.unwrap_or_else(host_parallelism), force_rebuild)
    }

    /// Zero jobs is rejected rather than clamped.
    pub fn new(configuration: Configuration, job_count: usize, force_rebuild: bool) -> Result<Self> {
        if job_count == 0 {
            return Err(Error::config("job count must be at least 1"));
        }
        let (optimize, debug_info) = configuration.toggles();
        Ok(Self {
            configuration,
            optimize,
            debug_info,
            job_count,
            force_rebuild,
        })
    }
}

fn host_parallelism() -> usize {
    std::thread::available_parallelism()
        .map(NonZeroUsize::get)
        .unwrap_or(1)
}
