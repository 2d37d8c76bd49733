//! Pipeline sequencer.
//!
//! Archives are ensured first, then targets are built one at a time in
//! dependency order. A failed step blocks the steps that consume its output
//! but not unrelated ones, so one run reports everything that is broken.

use log::{info, warn};
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;

use crate::archive::{ArchiveCache, ArchiveSpec, CacheValidity, Ensured, ExistenceCheck};
use crate::cancel::CancelToken;
use crate::error::{Error, Result};
use crate::extract::extract_image;
use crate::flags::FlagComposer;
use crate::layout::BuildLayout;
use crate::link::link;
use crate::profile::BuildProfile;
use crate::report::{BuildReport, BuildResult, Outcome, Stage, StepKind, StepReport, UnitResult};
use crate::scheduler::compile_all;
use crate::target::{ImageFormat, SourceKind, Target};
use crate::toolchain::{Tool, Toolchain};

/// Every archive and target declared for a run.
#[derive(Clone, Debug, Default)]
pub struct BuildGraph {
    pub archives: Vec<ArchiveSpec>,
    pub targets: Vec<Target>,
}

impl BuildGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn archive(mut self, spec: ArchiveSpec) -> Self {
        self.archives.push(spec);
        self
    }

    pub fn target(mut self, target: Target) -> Self {
        self.targets.push(target);
        self
    }

    /// Check names and references before anything runs.
    pub fn validate(&self) -> Result<()> {
        let mut names = HashSet::new();
        for name in self.archives.iter().map(|a| &a.name).chain(self.targets.iter().map(|t| &t.name)) {
            if !names.insert(name.as_str()) {
                return Err(Error::config(format!("{name} is declared more than once")));
            }
        }

        let archives: HashSet<_> = self.archives.iter().map(|a| a.name.as_str()).collect();
        let targets: HashSet<_> = self.targets.iter().map(|t| t.name.as_str()).collect();
        for target in &self.targets {
            target.validate()?;
            if let Some(missing) = target.link.archives().iter().find(|a| !archives.contains(a.as_str())) {
                return Err(Error::config(format!("{} links undeclared archive {missing}", target.name)));
            }
            if let Some(missing) = target.embeds.iter().find(|e| !targets.contains(e.as_str())) {
                return Err(Error::config(format!("{} embeds undeclared target {missing}", target.name)));
            }
        }
        Ok(())
    }

    /// Targets in build order.
    ///
    /// Declaration order is kept except where an embedded target has to move
    /// ahead of the target embedding it. Cycles are rejected.
    pub fn order(&self) -> Result<Vec<&Target>> {
        let index: HashMap<&str, usize> = self
            .targets
            .iter()
            .enumerate()
            .map(|(i, t)| (t.name.as_str(), i))
            .collect();

        let mut state = vec![Visit::New; self.targets.len()];
        let mut stack = Vec::new();
        let mut order = Vec::with_capacity(self.targets.len());
        for i in 0..self.targets.len() {
            self.visit(i, &index, &mut state, &mut stack, &mut order)?;
        }
        Ok(order.into_iter().map(|i| &self.targets[i]).collect())
    }

    fn visit(
        &self,
        i: usize,
        index: &HashMap<&str, usize>,
        state: &mut [Visit],
        stack: &mut Vec<usize>,
        order: &mut Vec<usize>,
    ) -> Result<()> {
        match state[i] {
            Visit::Done => return Ok(()),
            Visit::Active => {
                let start = stack.iter().position(|&s| s == i).unwrap_or(0);
                let mut cycle: Vec<String> = stack[start..].iter().map(|&s| self.targets[s].name.clone()).collect();
                cycle.push(self.targets[i].name.clone());
                return Err(Error::DependencyCycle { cycle });
            }
            Visit::New => {}
        }

        state[i] = Visit::Active;
        stack.push(i);
        for dep in &self.targets[i].embeds {
            let &d = index
                .get(dep.as_str())
                .ok_or_else(|| Error::config(format!("{} embeds undeclared target {dep}", self.targets[i].name)))?;
            self.visit(d, index, state, stack, order)?;
        }
        stack.pop();
        state[i] = Visit::Done;
        order.push(i);
        Ok(())
    }

    /// The named target plus everything it transitively embeds or links.
    pub fn restrict(&self, name: &str) -> Result<BuildGraph> {
        let mut wanted = HashSet::new();
        let mut pending = vec![name.to_string()];
        while let Some(next) = pending.pop() {
            let target = self
                .targets
                .iter()
                .find(|t| t.name == next)
                .ok_or_else(|| Error::config(format!("unknown target: {next}")))?;
            if wanted.insert(target.name.clone()) {
                pending.extend(target.embeds.iter().cloned());
            }
        }

        let targets: Vec<Target> = self.targets.iter().filter(|t| wanted.contains(&t.name)).cloned().collect();
        let linked: HashSet<&str> = targets
            .iter()
            .flat_map(|t| t.link.archives().iter().map(String::as_str))
            .collect();
        let archives = self
            .archives
            .iter()
            .filter(|a| linked.contains(a.name.as_str()))
            .cloned()
            .collect();
        Ok(BuildGraph { archives, targets })
    }

    /// External tools this run can invoke.
    ///
    /// Archives that `validity` accepts are reused, so they need neither the
    /// archiver nor a compiler for their sources.
    pub fn required_tools(
        &self,
        layout: &BuildLayout,
        profile: &BuildProfile,
        validity: &dyn CacheValidity,
    ) -> Vec<Tool> {
        let stale: Vec<&ArchiveSpec> = self
            .archives
            .iter()
            .filter(|a| profile.force_rebuild || !validity.is_current(a, &layout.archive_path(&a.name)))
            .collect();
        let stale_cxx = stale.iter().any(|a| {
            a.enumerate()
                .is_ok_and(|units| units.iter().any(|u| u.kind == SourceKind::Cxx))
        });
        let target_cxx = self
            .targets
            .iter()
            .flat_map(|t| &t.units)
            .any(|u| u.kind == SourceKind::Cxx);

        let mut tools = vec![Tool::Cc];
        if target_cxx || stale_cxx {
            tools.push(Tool::Cxx);
        }
        if !stale.is_empty() {
            tools.push(Tool::Ar);
        }
        if self.targets.iter().any(|t| t.triple().format() == ImageFormat::Elf) {
            tools.push(Tool::Ld);
        }
        if self.targets.iter().any(|t| t.triple().format() == ImageFormat::Pe) {
            tools.push(Tool::LdCoff);
        }
        if self.targets.iter().any(|t| t.extract.is_some()) {
            tools.push(Tool::Objcopy);
        }
        tools
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Visit {
    New,
    Active,
    Done,
}

/// Drives a whole run over a [`BuildGraph`].
pub struct Pipeline<'a> {
    layout: &'a BuildLayout,
    tools: Toolchain<'a>,
    validity: &'a dyn CacheValidity,
    cancel: CancelToken,
}

impl<'a> Pipeline<'a> {
    pub fn new(layout: &'a BuildLayout, tools: Toolchain<'a>, cancel: CancelToken) -> Self {
        Self {
            layout,
            tools,
            validity: &ExistenceCheck,
            cancel,
        }
    }

    pub fn with_validity(mut self, validity: &'a dyn CacheValidity) -> Self {
        self.validity = validity;
        self
    }

    /// Build everything in `graph`.
    ///
    /// Returns `Err` only for problems found before any tool runs (bad
    /// declarations, cycles, an unusable output directory). Build failures are
    /// recorded in the report.
    pub fn run(&self, graph: &BuildGraph, profile: &BuildProfile) -> Result<BuildReport> {
        graph.validate()?;
        let order = graph.order()?;
        std::fs::create_dir_all(self.layout.root())
            .map_err(|e| Error::io("creating build directory", self.layout.root(), e))?;

        info!(
            "[info] Profile: {} ({} jobs{})",
            profile.configuration,
            profile.job_count,
            if profile.force_rebuild { ", forced rebuild" } else { "" }
        );

        let mut report = BuildReport::new(profile.clone());
        let mut archive_paths: HashMap<&str, PathBuf> = HashMap::new();
        let cache = ArchiveCache::new(self.layout, self.tools).with_validity(self.validity);

        for spec in &graph.archives {
            let mut step = StepReport::new(StepKind::Archive, &spec.name, Outcome::Interrupted);
            if !self.cancel.is_cancelled() {
                step.outcome = match cache.ensure_collecting(spec, profile, &self.cancel, &mut step.units) {
                    Ok(Ensured::Cached(path)) => {
                        archive_paths.insert(&spec.name, path.clone());
                        Outcome::Cached { artifact: path }
                    }
                    Ok(Ensured::Built(path)) => {
                        archive_paths.insert(&spec.name, path.clone());
                        Outcome::Built { artifacts: vec![path] }
                    }
                    Err(err) => self.failure_outcome(&spec.name, Stage::Archive, &err),
                };
            }
            report.archives.push(step);
        }

        let mut built: HashSet<&str> = HashSet::new();
        for target in order {
            let mut step = StepReport::new(StepKind::Target, &target.name, Outcome::Interrupted);
            if !self.cancel.is_cancelled() {
                step.outcome = match blocker(target, &archive_paths, &built) {
                    Some(by) => {
                        warn!("[skip] {}: depends on failed {by}", target.name);
                        Outcome::Blocked { by }
                    }
                    None => {
                        let archives: Vec<PathBuf> = target
                            .link
                            .archives()
                            .iter()
                            .filter_map(|a| archive_paths.get(a.as_str()).cloned())
                            .collect();
                        match self.build_target(target, profile, &archives, &mut step.units) {
                            Ok(artifacts) => {
                                built.insert(&target.name);
                                Outcome::Built { artifacts }
                            }
                            Err((stage, err)) => self.failure_outcome(&target.name, stage, &err),
                        }
                    }
                };
            }
            report.targets.push(step);
        }

        Ok(report)
    }

    /// Compile, link and optionally extract one target.
    fn build_target(
        &self,
        target: &Target,
        profile: &BuildProfile,
        archives: &[PathBuf],
        units: &mut Vec<UnitResult>,
    ) -> std::result::Result<Vec<PathBuf>, (Stage, Error)> {
        info!("[step] Build target: {} ({})", target.name, target.triple());

        let objects_dir = self
            .layout
            .prepare_objects(&target.name)
            .map_err(|e| (Stage::Prepare, e))?;
        let composer = FlagComposer::new(&target.settings, profile, &objects_dir);
        *units = compile_all(
            &target.units,
            |u| composer.compose(u),
            self.tools.compiler,
            profile.job_count,
            &self.cancel,
        );

        // Full barrier: nothing below runs until every unit has finished.
        if units.iter().any(|u| u.result == BuildResult::Interrupted) {
            return Err((Stage::Compile, Error::Interrupted));
        }
        let failures: Vec<_> = units.iter().filter_map(UnitResult::failure).collect();
        if !failures.is_empty() {
            return Err((
                Stage::Compile,
                Error::Compilation {
                    target: target.name.clone(),
                    total: units.len(),
                    failures,
                },
            ));
        }

        let objects: Vec<PathBuf> = units.iter().map(|u| u.object.clone()).collect();
        let image = link(target, &objects, archives, self.layout, self.tools.linker, &self.cancel)
            .map_err(|e| (Stage::Link, e))?;
        let mut artifacts = vec![image.clone()];

        if let Some(extraction) = &target.extract {
            let binary = extract_image(
                &target.name,
                &image,
                &extraction.sections,
                self.layout.binary_path(target),
                self.tools.extractor,
                &self.cancel,
            )
            .map_err(|e| (Stage::PostLink, e))?;
            artifacts.push(binary);
        }

        info!("[ok] {}: {}", target.name, image.display());
        Ok(artifacts)
    }

    fn failure_outcome(&self, name: &str, stage: Stage, err: &Error) -> Outcome {
        if matches!(err, Error::Interrupted) || self.cancel.is_cancelled() {
            warn!("{name}: interrupted");
            return Outcome::Interrupted;
        }
        let stage = match err {
            Error::Configuration(_) | Error::Io { .. } => Stage::Prepare,
            _ => stage,
        };
        Outcome::failed(stage, err)
    }
}

/// The first failed archive or embedded target `target` depends on.
fn blocker(target: &Target, archives: &HashMap<&str, PathBuf>, built: &HashSet<&str>) -> Option<String> {
    target
        .link
        .archives()
        .iter()
        .find(|a| !archives.contains_key(a.as_str()))
        .map(|a| format!("archive {a}"))
        .or_else(|| {
            target
                .embeds
                .iter()
                .find(|e| !built.contains(e.as_str()))
                .map(|e| format!("target {e}"))
        })
}
