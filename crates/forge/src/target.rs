//! Target descriptors: triples, source units, link policies.

use serde::Serialize;
use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Instruction set / ABI / environment a target is compiled for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub enum Triple {
    /// 64-bit freestanding ELF.
    X86_64Elf,
    /// 32-bit freestanding ELF.
    I686Elf,
    /// 16-bit real-mode code in a 32-bit ELF container.
    Code16,
    /// UEFI PE executable.
    X86_64Uefi,
}

/// Container format of a linked image.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum ImageFormat {
    Elf,
    Pe,
}

impl ImageFormat {
    pub fn extension(self) -> &'static str {
        match self {
            ImageFormat::Elf => "elf",
            ImageFormat::Pe => "efi",
        }
    }
}

impl Triple {
    pub fn as_str(self) -> &'static str {
        match self {
            Triple::X86_64Elf => "x86_64-unknown-unknown-elf",
            Triple::I686Elf => "i686-unknown-unknown-elf",
            Triple::Code16 => "i386-unknown-unknown-code16",
            Triple::X86_64Uefi => "x86_64-unknown-windows",
        }
    }

    /// Architecture baseline. Every x86 flavour is compiled against the x86-64 baseline.
    pub fn march(self) -> &'static str {
        "-march=x86-64"
    }

    pub fn format(self) -> ImageFormat {
        match self {
            Triple::X86_64Uefi => ImageFormat::Pe,
            Triple::X86_64Elf | Triple::I686Elf | Triple::Code16 => ImageFormat::Elf,
        }
    }

    /// Flags every freestanding unit of this triple needs.
    pub fn environment_flags(self) -> &'static [&'static str] {
        match self {
            Triple::X86_64Uefi => &["-ffreestanding", "-fshort-wchar", "-mno-red-zone"],
            Triple::X86_64Elf | Triple::I686Elf | Triple::Code16 => &["-ffreestanding"],
        }
    }
}

impl TryFrom<&str> for Triple {
    type Error = Error;

    fn try_from(s: &str) -> Result<Self> {
        [Triple::X86_64Elf, Triple::I686Elf, Triple::Code16, Triple::X86_64Uefi]
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| Error::config(format!("unsupported triple: {s}")))
    }
}

impl fmt::Display for Triple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Language of a translation unit, inferred from its extension.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum SourceKind {
    C,
    Cxx,
    Assembly,
}

impl SourceKind {
    pub fn from_path(path: &Path) -> Result<Self> {
        match path.extension().and_then(|e| e.to_str()) {
            Some("c") => Ok(SourceKind::C),
            Some("cpp" | "cc" | "cxx") => Ok(SourceKind::Cxx),
            Some("S" | "s" | "asm") => Ok(SourceKind::Assembly),
            _ => Err(Error::config(format!(
                "cannot infer source kind of {}",
                path.display()
            ))),
        }
    }

    /// Language standard switch, if the kind has one.
    pub fn standard(self) -> Option<&'static str> {
        match self {
            SourceKind::C => Some("-std=gnu11"),
            SourceKind::Cxx => Some("-std=gnu++11"),
            SourceKind::Assembly => None,
        }
    }
}

/// A single translation unit.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct SourceUnit {
    pub path: PathBuf,
    pub object_name: String,
    pub kind: SourceKind,
}

impl SourceUnit {
    /// Unit whose object is named after the source stem (`main.cpp` -> `main.o`).
    pub fn new(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let stem = path
            .file_stem()
            .and_then(|s| s.to_str())
            .ok_or_else(|| Error::config(format!("source path has no file stem: {}", path.display())))?;
        let object_name = format!("{stem}.o");
        Self::with_object(path, object_name)
    }

    pub fn with_object(path: impl Into<PathBuf>, object_name: impl Into<String>) -> Result<Self> {
        let path = path.into();
        let kind = SourceKind::from_path(&path)?;
        Ok(Self {
            path,
            object_name: object_name.into(),
            kind,
        })
    }
}

/// Compiler inputs shared by targets and archives.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct CompileSettings {
    pub triple: Triple,
    pub include_paths: Vec<PathBuf>,
    pub extra_flags: Vec<String>,
}

impl CompileSettings {
    pub fn new(triple: Triple) -> Self {
        Self {
            triple,
            include_paths: Vec::new(),
            extra_flags: Vec::new(),
        }
    }

    /// Adds an include path once; later duplicates are ignored.
    pub fn include(&mut self, path: impl Into<PathBuf>) {
        let path = path.into();
        if !self.include_paths.contains(&path) {
            self.include_paths.push(path);
        }
    }
}

/// Shape of the final linker invocation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub enum LinkPolicy {
    /// Fully linked image at fixed addresses.
    Final {
        entry: String,
        script: Option<PathBuf>,
        archives: Vec<String>,
    },
    /// Merge objects but keep relocations for a later link.
    Relocatable { archives: Vec<String> },
    /// Executable loadable at a runtime-chosen base.
    PositionIndependent { entry: String },
}

impl LinkPolicy {
    /// Names of the cached archives this policy links against.
    pub fn archives(&self) -> &[String] {
        match self {
            LinkPolicy::Final { archives, .. } | LinkPolicy::Relocatable { archives } => archives,
            LinkPolicy::PositionIndependent { .. } => &[],
        }
    }
}

/// Sections to pull out of a linked image into a flat binary.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Extraction {
    pub sections: Vec<String>,
}

/// A named, independently linkable build unit.
#[derive(Clone, Debug, Serialize)]
pub struct Target {
    pub name: String,
    pub settings: CompileSettings,
    pub units: Vec<SourceUnit>,
    pub link: LinkPolicy,
    /// Targets whose outputs this target embeds; they are built first.
    pub embeds: Vec<String>,
    pub extract: Option<Extraction>,
}

impl Target {
    pub fn new(name: impl Into<String>, triple: Triple, link: LinkPolicy) -> Self {
        Self {
            name: name.into(),
            settings: CompileSettings::new(triple),
            units: Vec::new(),
            link,
            embeds: Vec::new(),
            extract: None,
        }
    }

    pub fn source(mut self, unit: SourceUnit) -> Self {
        self.units.push(unit);
        self
    }

    pub fn sources(mut self, units: impl IntoIterator<Item = SourceUnit>) -> Self {
        self.units.extend(units);
        self
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

    pub fn embeds(mut self, target: impl Into<String>) -> Self {
        self.embeds.push(target.into());
        self
    }

    pub fn extract<I, S>(mut self, sections: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.extract = Some(Extraction {
            sections: sections.into_iter().map(Into::into).collect(),
        });
        self
    }

    pub fn triple(&self) -> Triple {
        self.settings.triple
    }

    /// Reject duplicate object names within this target.
    pub fn validate(&self) -> Result<()> {
        check_unique_objects(&self.name, &self.units)?;
        if let Some(extract) = &self.extract {
            if extract.sections.is_empty() {
                return Err(Error::config(format!(
                    "{}: extraction requested without any sections",
                    self.name
                )));
            }
            if self.triple().format() != ImageFormat::Elf {
                return Err(Error::config(format!(
                    "{}: section extraction needs an ELF image",
                    self.name
                )));
            }
        }
        Ok(())
    }
}

pub(crate) fn check_unique_objects(owner: &str, units: &[SourceUnit]) -> Result<()> {
    let mut seen = HashSet::new();
    for unit in units {
        if !seen.insert(unit.object_name.as_str()) {
            return Err(Error::config(format!(
                "{owner}: object name {} is produced by more than one unit",
                unit.object_name
            )));
        }
    }
    Ok(())
}
