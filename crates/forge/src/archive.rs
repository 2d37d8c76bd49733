//! Cached static archives of third-party sources.
//!
//! An archive that exists on disk is reused as-is unless the profile forces a
//! rebuild. New archives are assembled at a partial path and renamed into
//! place only after every unit compiled and the archiver succeeded, so an
//! aborted run never leaves something that looks cached.

use log::{info, warn};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};

use crate::cancel::CancelToken;
use crate::error::{exit_label, Error, Result};
use crate::flags::FlagComposer;
use crate::layout::BuildLayout;
use crate::profile::BuildProfile;
use crate::report::{BuildResult, UnitResult};
use crate::scheduler::compile_all;
use crate::target::{check_unique_objects, CompileSettings, SourceUnit, Triple};
use crate::toolchain::Toolchain;

/// Which files of the source directory belong to an archive.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub enum SourceRule {
    /// Every regular file in the directory.
    AllFiles,
    /// Every file with this extension (without the dot).
    Extension(String),
    /// Exactly these files, relative to the directory.
    Explicit(Vec<PathBuf>),
}

/// A static library built once and reused across runs.
#[derive(Clone, Debug, Serialize)]
pub struct ArchiveSpec {
    pub name: String,
    pub source_dir: PathBuf,
    pub rule: SourceRule,
    pub settings: CompileSettings,
}

impl ArchiveSpec {
    pub fn new(name: impl Into<String>, triple: Triple, source_dir: impl Into<PathBuf>, rule: SourceRule) -> Self {
        Self {
            name: name.into(),
            source_dir: source_dir.into(),
            rule,
            settings: CompileSettings::new(triple),
        }
    }

    pub fn include(mut self, path: impl Into<PathBuf>) -> Self {
        self.settings.include(path);
        self
    }

    pub fn flags<I, S>(mut self, flags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.settings.extra_flags.extend(flags.into_iter().map(Into::into));
        self
    }

    /// Source units selected by the rule, sorted by file name.
    pub fn enumerate(&self) -> Result<Vec<SourceUnit>> {
        let mut paths = match &self.rule {
            SourceRule::Explicit(files) => files.iter().map(|f| self.source_dir.join(f)).collect(),
            SourceRule::AllFiles => self.list_dir(|_| true)?,
            SourceRule::Extension(ext) => {
                self.list_dir(|p| p.extension().and_then(|e| e.to_str()) == Some(ext.as_str()))?
            }
        };
        paths.sort();

        let units = paths.into_iter().map(SourceUnit::new).collect::<Result<Vec<_>>>()?;
        check_unique_objects(&self.name, &units)?;
        Ok(units)
    }

    fn list_dir(&self, keep: impl Fn(&Path) -> bool) -> Result<Vec<PathBuf>> {
        let dir = &self.source_dir;
        let entries = fs::read_dir(dir).map_err(|e| Error::io("reading archive sources", dir, e))?;
        let mut paths = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| Error::io("reading archive sources", dir, e))?;
            let path = entry.path();
            if path.is_file() && keep(&path) {
                paths.push(path);
            }
        }
        Ok(paths)
    }
}

/// Decides whether an archive already on disk can be reused.
pub trait CacheValidity: Send + Sync {
    fn is_current(&self, spec: &ArchiveSpec, archive: &Path) -> bool;
}

/// Treats any existing archive as up to date. No hashing, no timestamps.
#[derive(Clone, Copy, Debug, Default)]
pub struct ExistenceCheck;

impl CacheValidity for ExistenceCheck {
    fn is_current(&self, _spec: &ArchiveSpec, archive: &Path) -> bool {
        archive.is_file()
    }
}

/// How [`ArchiveCache::ensure_collecting`] satisfied a request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Ensured {
    Cached(PathBuf),
    Built(PathBuf),
}

impl Ensured {
    pub fn path(&self) -> &Path {
        match self {
            Ensured::Cached(p) | Ensured::Built(p) => p,
        }
    }
}

pub struct ArchiveCache<'a> {
    layout: &'a BuildLayout,
    tools: Toolchain<'a>,
    validity: &'a dyn CacheValidity,
}

impl<'a> ArchiveCache<'a> {
    pub fn new(layout: &'a BuildLayout, tools: Toolchain<'a>) -> Self {
        Self {
            layout,
            tools,
            validity: &ExistenceCheck,
        }
    }

    pub fn with_validity(mut self, validity: &'a dyn CacheValidity) -> Self {
        self.validity = validity;
        self
    }

    /// Return the archive path, building it first if it is missing or a rebuild is forced.
    pub fn ensure_archive(&self, spec: &ArchiveSpec, profile: &BuildProfile, cancel: &CancelToken) -> Result<PathBuf> {
        let mut units = Vec::new();
        self.ensure_collecting(spec, profile, cancel, &mut units)
            .map(|e| e.path().to_path_buf())
    }

    /// Like [`Self::ensure_archive`], also handing back every unit result.
    pub fn ensure_collecting(
        &self,
        spec: &ArchiveSpec,
        profile: &BuildProfile,
        cancel: &CancelToken,
        units: &mut Vec<UnitResult>,
    ) -> Result<Ensured> {
        let archive = self.layout.archive_path(&spec.name);
        if !profile.force_rebuild && self.validity.is_current(spec, &archive) {
            info!("[skip] {} archive already built", spec.name);
            return Ok(Ensured::Cached(archive));
        }

        info!("[step] Build archive: {}", spec.name);
        let sources = spec.enumerate()?;
        if sources.is_empty() {
            return Err(archive_error(spec, format!("no sources in {}", spec.source_dir.display())));
        }

        let objects_dir = self.layout.prepare_objects(&spec.name)?;
        let composer = FlagComposer::new(&spec.settings, profile, &objects_dir);
        *units = compile_all(
            &sources,
            |u| composer.compose(u),
            self.tools.compiler,
            profile.job_count,
            cancel,
        );

        if units.iter().any(|u| u.result == BuildResult::Interrupted) {
            return Err(Error::Interrupted);
        }
        let failures: Vec<_> = units.iter().filter_map(UnitResult::failure).collect();
        if !failures.is_empty() {
            return Err(Error::ArchiveBuild {
                name: spec.name.clone(),
                reason: format!("{} of {} units failed to compile", failures.len(), units.len()),
                failures,
            });
        }

        let objects: Vec<PathBuf> = units.iter().map(|u| u.object.clone()).collect();
        self.publish(spec, &objects, cancel)?;
        info!("[ok] {}: {}", spec.name, archive.display());
        Ok(Ensured::Built(archive))
    }

    fn publish(&self, spec: &ArchiveSpec, objects: &[PathBuf], cancel: &CancelToken) -> Result<()> {
        let partial = self.layout.partial_archive_path(&spec.name);
        let archive = self.layout.archive_path(&spec.name);

        // The archiver appends to an existing file.
        remove_if_present(&partial)?;

        let args = archive_args(&partial, objects);
        let result = self.tools.archiver.archive(&args, cancel);
        let out = match result {
            Ok(out) => out,
            Err(e) => {
                discard(&partial);
                return Err(archive_error(spec, format!("failed to run archiver: {e}")));
            }
        };
        if !out.succeeded() {
            discard(&partial);
            if cancel.is_cancelled() {
                return Err(Error::Interrupted);
            }
            return Err(archive_error(
                spec,
                format!("archiver failed ({})\n{}", exit_label(&out.exit_code), out.output.trim_end()),
            ));
        }
        if !partial.is_file() {
            return Err(archive_error(spec, "archiver reported success but wrote nothing".to_string()));
        }

        fs::rename(&partial, &archive).map_err(|e| Error::io("publishing archive", &archive, e))
    }
}

/// `llvm-ar -rs <archive> <objects...>`
pub fn archive_args(archive: &Path, objects: &[PathBuf]) -> Vec<String> {
    let mut args = vec!["-rs".to_string(), archive.to_string_lossy().into_owned()];
    args.extend(objects.iter().map(|o| o.to_string_lossy().into_owned()));
    args
}

fn archive_error(spec: &ArchiveSpec, reason: String) -> Error {
    Error::ArchiveBuild {
        name: spec.name.clone(),
        reason,
        failures: Vec::new(),
    }
}

fn remove_if_present(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(Error::io("removing stale partial archive", path, e)),
    }
}

fn discard(path: &Path) {
    if let Err(e) = remove_if_present(path) {
        warn!("{e}");
    }
}
