//! The declared image tree.
//!
//! ```text
//! init_secondary ──▶ init ──▶ kernel64 ──┬─▶ kernel32
//!    user_openlibm.a ─┘        ▲          └─▶ uefi_bootloader
//!                  acpica.a ───┘
//! ```

use anyhow::{Context, Result};
use forge::{ArchiveSpec, BuildGraph, LinkPolicy, SourceRule, SourceUnit, Target, Triple};
use std::path::{Path, PathBuf};

/// Code-model flags shared by everything running in kernel space.
const KERNEL_FLAGS: [&str; 6] = [
    "-mcmodel=kernel",
    "-fno-stack-protector",
    "-mno-red-zone",
    "-mno-mmx",
    "-mno-sse",
    "-mno-sse2",
];

const KERNEL64_SOURCES: [&str; 10] = [
    "static_init.S",
    "entry.S",
    "syscall.S",
    "preempt.S",
    "interrupts.S",
    "main.cpp",
    "process.cpp",
    "console.cpp",
    "paging.cpp",
    "acpi_environment.cpp",
];

pub fn repo_root() -> Result<PathBuf> {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .parent()
        .map(Path::to_path_buf)
        .context("xtask is expected at <repo>/xtask")
}

struct Tree {
    src: PathBuf,
    thirdparty: PathBuf,
}

impl Tree {
    fn src(&self, rel: &str) -> PathBuf {
        self.src.join(rel)
    }

    fn thirdparty(&self, rel: &str) -> PathBuf {
        self.thirdparty.join(rel)
    }

    fn unit(&self, path: PathBuf) -> Result<SourceUnit> {
        SourceUnit::new(&path).with_context(|| format!("declaring {}", path.display()))
    }

    fn printf(&self) -> Result<SourceUnit> {
        self.unit(self.thirdparty("printf/printf.c"))
    }
}

/// Every archive and image of the system, rooted at `root`.
///
/// Targets that pull another image in with `.incbin "build/<name>"` rely on
/// the tools running from `root`.
pub fn image_tree(root: &Path) -> Result<BuildGraph> {
    let tree = Tree {
        src: root.join("src"),
        thirdparty: root.join("thirdparty"),
    };

    let acpica = ArchiveSpec::new(
        "acpica",
        Triple::X86_64Elf,
        tree.thirdparty("acpica/src"),
        SourceRule::AllFiles,
    )
    .include(tree.thirdparty("acpica/include"))
    .flags(KERNEL_FLAGS);

    let openlibm = ArchiveSpec::new(
        "user_openlibm",
        Triple::X86_64Elf,
        tree.thirdparty("openlibm/src"),
        SourceRule::Extension("c".into()),
    )
    .include(tree.src("init"))
    .include(tree.thirdparty("openlibm/src"))
    .include(tree.thirdparty("openlibm/include"))
    .include(tree.thirdparty("openlibm/amd64"))
    .include(tree.thirdparty("openlibm/ld80"))
    .flags(["-D__BSD_VISIBLE=1", "-fpie"]);

    let init_secondary = Target::new(
        "init_secondary",
        Triple::X86_64Elf,
        LinkPolicy::Relocatable { archives: vec![] },
    )
    .source(tree.unit(tree.src("init/secondary.cpp"))?)
    .source(tree.printf()?)
    .include(tree.src("shared"))
    .include(tree.thirdparty("printf"))
    .flags(["-fpie"]);

    let init = Target::new(
        "init",
        Triple::X86_64Elf,
        LinkPolicy::Relocatable {
            archives: vec!["user_openlibm".into()],
        },
    )
    .source(tree.unit(tree.src("init/main.cpp"))?)
    .source(tree.printf()?)
    .include(tree.src("init"))
    .include(tree.src("shared"))
    .include(tree.thirdparty("printf"))
    .include(tree.thirdparty("openlibm/include"))
    .include(&tree.thirdparty)
    .flags(["-D__BSD_VISIBLE=1", "-fpie"])
    .embeds("init_secondary");

    let kernel64_units = KERNEL64_SOURCES
        .iter()
        .map(|name| tree.unit(tree.src("kernel64").join(name)))
        .chain(std::iter::once(tree.printf()))
        .collect::<Result<Vec<_>>>()?;
    let kernel64 = Target::new(
        "kernel64",
        Triple::X86_64Elf,
        LinkPolicy::Final {
            entry: "entry".into(),
            script: Some(tree.src("kernel64/linker.ld")),
            archives: vec!["acpica".into()],
        },
    )
    .sources(kernel64_units)
    .include(tree.src("shared"))
    .include(tree.thirdparty("acpica/include"))
    .include(tree.thirdparty("printf"))
    .flags(KERNEL_FLAGS)
    .embeds("init")
    .extract([".text", ".data", ".rodata"]);

    let kernel32 = Target::new(
        "kernel32",
        Triple::I686Elf,
        LinkPolicy::Final {
            entry: "entry".into(),
            script: Some(tree.src("kernel32/linker.ld")),
            archives: vec![],
        },
    )
    .source(tree.unit(tree.src("kernel32/entry.S"))?)
    .source(tree.unit(tree.src("kernel32/multiboot.S"))?)
    .flags(KERNEL_FLAGS)
    .embeds("kernel64");

    let uefi_bootloader = Target::new(
        "uefi_bootloader",
        Triple::X86_64Uefi,
        LinkPolicy::Final {
            entry: "efi_main".into(),
            script: None,
            archives: vec![],
        },
    )
    .source(tree.unit(tree.src("uefi_bootloader/main.cpp"))?)
    .include(tree.src("shared"))
    .flags(["-fno-stack-protector"])
    .embeds("kernel64");

    Ok(BuildGraph::new()
        .archive(acpica)
        .archive(openlibm)
        .target(init_secondary)
        .target(init)
        .target(kernel64)
        .target(kernel32)
        .target(uefi_bootloader))
}
