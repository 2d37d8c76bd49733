//! Build output layout.
//!
//! ```text
//! build/
//!   objects/<name>/*.o     one directory per target or archive
//!   <archive>.a            cached third-party archives
//!   <target>.elf | .efi    linked images
//!   <target>.bin           extracted flat binaries
//! ```

use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::target::{SourceUnit, Target};

#[derive(Clone, Debug)]
pub struct BuildLayout {
    root: PathBuf,
}

impl BuildLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn objects_dir(&self, name: &str) -> PathBuf {
        self.root.join("objects").join(name)
    }

    pub fn object_path(&self, owner: &str, unit: &SourceUnit) -> PathBuf {
        self.objects_dir(owner).join(&unit.object_name)
    }

    pub fn archive_path(&self, name: &str) -> PathBuf {
        self.root.join(format!("{name}.a"))
    }

    /// Where an archive is assembled before it is published.
    pub fn partial_archive_path(&self, name: &str) -> PathBuf {
        self.root.join(format!("{name}.a.partial"))
    }

    pub fn image_path(&self, target: &Target) -> PathBuf {
        self.root
            .join(format!("{}.{}", target.name, target.triple().format().extension()))
    }

    pub fn binary_path(&self, target: &Target) -> PathBuf {
        self.root.join(format!("{}.bin", target.name))
    }

    pub fn report_path(&self) -> PathBuf {
        self.root.join("report.json")
    }

    /// Create the per-owner object directory.
    pub fn prepare_objects(&self, name: &str) -> Result<PathBuf> {
        let dir = self.objects_dir(name);
        std::fs::create_dir_all(&dir)
            .map_err(|e| Error::io("creating object directory", &dir, e))?;
        Ok(dir)
    }
}
