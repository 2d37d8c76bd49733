//! Link stage: one linker invocation per target, shaped by its link policy.

use log::info;
use std::path::{Path, PathBuf};

use crate::cancel::CancelToken;
use crate::error::{Error, Result};
use crate::layout::BuildLayout;
use crate::target::{ImageFormat, LinkPolicy, Target};
use crate::toolchain::Linker;

/// Linker arguments for `target`.
///
/// ELF final links list archives before objects; relocatable links list
/// objects first so the merged output keeps every unit's relocations.
pub fn link_args(target: &Target, output: &Path, objects: &[PathBuf], archives: &[PathBuf]) -> Result<Vec<String>> {
    let out = output.to_string_lossy().into_owned();
    let paths = |list: &[PathBuf]| list.iter().map(|p| p.to_string_lossy().into_owned()).collect::<Vec<_>>();

    let args = match (target.triple().format(), &target.link) {
        (ImageFormat::Elf, LinkPolicy::Final { entry, script, .. }) => {
            let mut args = vec!["-e".to_string(), entry.clone()];
            if let Some(script) = script {
                args.extend(["-T".to_string(), script.to_string_lossy().into_owned()]);
            }
            args.extend(["-o".to_string(), out]);
            args.extend(paths(archives));
            args.extend(paths(objects));
            args
        }
        (ImageFormat::Elf, LinkPolicy::Relocatable { .. }) => {
            let mut args = vec!["--relocatable".to_string(), "-o".to_string(), out];
            args.extend(paths(objects));
            args.extend(paths(archives));
            args
        }
        (ImageFormat::Elf, LinkPolicy::PositionIndependent { entry }) => {
            let mut args = vec!["-pie".to_string(), "-e".to_string(), entry.clone(), "-o".to_string(), out];
            args.extend(paths(objects));
            args
        }
        (ImageFormat::Pe, LinkPolicy::Final { entry, script: None, .. }) => {
            let mut args = vec![
                format!("/entry:{entry}"),
                "/subsystem:efi_application".to_string(),
                "/nodefaultlib".to_string(),
                format!("/out:{out}"),
            ];
            args.extend(paths(archives));
            args.extend(paths(objects));
            args
        }
        (ImageFormat::Pe, LinkPolicy::PositionIndependent { entry }) => {
            let mut args = vec![
                format!("/entry:{entry}"),
                "/subsystem:efi_application".to_string(),
                "/dynamicbase".to_string(),
                format!("/out:{out}"),
            ];
            args.extend(paths(objects));
            args
        }
        (ImageFormat::Pe, LinkPolicy::Final { script: Some(_), .. }) => {
            return Err(Error::config(format!("{}: PE images do not take a linker script", target.name)));
        }
        (ImageFormat::Pe, LinkPolicy::Relocatable { .. }) => {
            return Err(Error::config(format!("{}: PE images cannot be linked relocatably", target.name)));
        }
    };
    Ok(args)
}

/// Link `target` into its image at the layout's image path.
pub fn link(
    target: &Target,
    objects: &[PathBuf],
    archives: &[PathBuf],
    layout: &BuildLayout,
    linker: &dyn Linker,
    cancel: &CancelToken,
) -> Result<PathBuf> {
    let output = layout.image_path(target);
    let args = link_args(target, &output, objects, archives)?;

    info!("  linking {}", output.display());
    let out = linker
        .link(target.triple().format(), &args, cancel)
        .map_err(|e| Error::Link {
            target: target.name.clone(),
            exit_code: None,
            output: format!("failed to run linker: {e}"),
        })?;

    if out.succeeded() {
        Ok(output)
    } else if cancel.is_cancelled() {
        Err(Error::Interrupted)
    } else {
        Err(Error::Link {
            target: target.name.clone(),
            exit_code: out.exit_code,
            output: out.output,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::target::Triple;

    fn objects() -> Vec<PathBuf> {
        vec![PathBuf::from("o/entry.o"), PathBuf::from("o/main.o")]
    }

    #[test]
    fn test_final_puts_archives_before_objects() {
        let target = Target::new(
            "kernel64",
            Triple::X86_64Elf,
            LinkPolicy::Final {
                entry: "entry".into(),
                script: Some(PathBuf::from("src/kernel64/linker.ld")),
                archives: vec!["acpica".into()],
            },
        );
        let args = link_args(&target, Path::new("b/kernel64.elf"), &objects(), &[PathBuf::from("b/acpica.a")]).unwrap();
        assert_eq!(
            args,
            [
                "-e",
                "entry",
                "-T",
                "src/kernel64/linker.ld",
                "-o",
                "b/kernel64.elf",
                "b/acpica.a",
                "o/entry.o",
                "o/main.o",
            ]
        );
    }

    #[test]
    fn test_relocatable_has_no_entry() {
        let target = Target::new("init", Triple::X86_64Elf, LinkPolicy::Relocatable { archives: vec![] });
        let args = link_args(&target, Path::new("b/init.elf"), &objects(), &[PathBuf::from("b/user_openlibm.a")]).unwrap();
        assert_eq!(
            args,
            ["--relocatable", "-o", "b/init.elf", "o/entry.o", "o/main.o", "b/user_openlibm.a"]
        );
        assert!(!args.iter().any(|a| a == "-e"));
    }

    #[test]
    fn test_pie_shape() {
        let target = Target::new(
            "user_mode_test",
            Triple::X86_64Elf,
            LinkPolicy::PositionIndependent { entry: "main".into() },
        );
        let args = link_args(&target, Path::new("b/t.elf"), &objects(), &[]).unwrap();
        assert_eq!(args, ["-pie", "-e", "main", "-o", "b/t.elf", "o/entry.o", "o/main.o"]);
    }

    #[test]
    fn test_pe_rejects_relocatable() {
        let target = Target::new("loader", Triple::X86_64Uefi, LinkPolicy::Relocatable { archives: vec![] });
        assert!(matches!(
            link_args(&target, Path::new("b/loader.efi"), &objects(), &[]),
            Err(Error::Configuration(_))
        ));
    }

    #[test]
    fn test_pe_final_uses_coff_switches() {
        let target = Target::new(
            "uefi_bootloader",
            Triple::X86_64Uefi,
            LinkPolicy::Final { entry: "efi_main".into(), script: None, archives: vec![] },
        );
        let args = link_args(&target, Path::new("b/uefi_bootloader.efi"), &objects(), &[]).unwrap();
        assert_eq!(args[0], "/entry:efi_main");
        assert!(args.contains(&"/out:b/uefi_bootloader.efi".to_string()));
    }
}
