//! Per-unit compiler command composition.
//!
//! Composition is pure: the same settings, unit and profile always produce the
//! same argument list. Profile flags come after target flags so that a
//! single-value switch set by the profile wins.

use std::path::{Path, PathBuf};

use crate::profile::BuildProfile;
use crate::target::{CompileSettings, SourceKind, SourceUnit};

/// Which compiler driver runs a unit.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Driver {
    C,
    Cxx,
}

impl Driver {
    pub fn for_kind(kind: SourceKind) -> Self {
        match kind {
            SourceKind::Cxx => Driver::Cxx,
            SourceKind::C | SourceKind::Assembly => Driver::C,
        }
    }
}

/// A fully composed compiler invocation for one unit.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CompileCommand {
    pub driver: Driver,
    pub args: Vec<String>,
    pub output: PathBuf,
}

/// Composes compiler commands for the units of one target or archive.
#[derive(Clone, Copy, Debug)]
pub struct FlagComposer<'a> {
    settings: &'a CompileSettings,
    profile: &'a BuildProfile,
    objects_dir: &'a Path,
}

impl<'a> FlagComposer<'a> {
    pub fn new(settings: &'a CompileSettings, profile: &'a BuildProfile, objects_dir: &'a Path) -> Self {
        Self {
            settings,
            profile,
            objects_dir,
        }
    }

    pub fn compose(&self, unit: &SourceUnit) -> CompileCommand {
        let output = self.objects_dir.join(&unit.object_name);
        let triple = self.settings.triple;

        let mut args = vec![
            "-target".to_string(),
            triple.as_str().to_string(),
            triple.march().to_string(),
        ];
        if let Some(std) = unit.kind.standard() {
            args.push(std.to_string());
        }
        args.extend(triple.environment_flags().iter().map(ToString::to_string));
        args.extend(
            self.settings
                .include_paths
                .iter()
                .map(|p| format!("-I{}", p.display())),
        );
        args.extend(self.settings.extra_flags.iter().cloned());
        args.extend(profile_flags(self.profile));
        args.extend([
            "-c".to_string(),
            "-o".to_string(),
            output.to_string_lossy().into_owned(),
            unit.path.to_string_lossy().into_owned(),
        ]);

        CompileCommand {
            driver: Driver::for_kind(unit.kind),
            args,
            output,
        }
    }
}

/// Flags derived from the build profile alone.
pub fn profile_flags(profile: &BuildProfile) -> Vec<String> {
    let mut flags = Vec::new();
    if profile.debug_info {
        flags.push("-g".to_string());
    }
    if profile.optimize {
        flags.push("-O2".to_string());
        flags.push("-DOPTIMIZED".to_string());
    }
    flags
}
