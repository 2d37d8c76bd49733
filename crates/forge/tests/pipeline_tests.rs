//! Integration tests for whole pipeline runs over a fake toolchain.

mod common;

use common::{exists, Call, FakeTools, Tree};
use forge::report::Stage;
use forge::target::ImageFormat;
use forge::{
    ArchiveSpec, BuildGraph, BuildLayout, BuildProfile, BuildResult, CacheValidity, CancelToken, Configuration,
    LinkPolicy, Outcome, Pipeline, SourceRule, SourceUnit, Target, Toolchain, Triple,
};
use std::fs;
use std::path::Path;

fn kernel64(tree: &Tree, broken: Option<&str>) -> Target {
    let sources = ["entry.S", "main.cpp", "paging.cpp", "console.cpp", "acpi.cpp"];
    let units = sources.iter().map(|name| {
        let text = if Some(*name) == broken {
            "#error 'Pml4' was not declared"
        } else {
            "int f();"
        };
        SourceUnit::new(tree.write(&format!("src/kernel64/{name}"), text)).unwrap()
    });
    Target::new(
        "kernel64",
        Triple::X86_64Elf,
        LinkPolicy::Final {
            entry: "main".into(),
            script: Some(tree.path("src/kernel64/linker.ld")),
            archives: vec![],
        },
    )
    .sources(units)
    .include(tree.path("src"))
    .extract([".text", ".data", ".rodata"])
}

fn debug() -> BuildProfile {
    BuildProfile::new(Configuration::Debug, 4, false).unwrap()
}

fn compiles(tools: &FakeTools) -> Vec<Vec<String>> {
    tools
        .calls()
        .into_iter()
        .filter_map(|c| match c {
            Call::Compile(args) => Some(args),
            _ => None,
        })
        .collect()
}

/// Five units compile with debug flags, link with the script, and extract three sections.
#[test]
fn test_kernel64_builds_end_to_end() {
    let tree = Tree::new();
    let layout = BuildLayout::new(tree.build_dir());
    let tools = FakeTools::default();
    let graph = BuildGraph::new().target(kernel64(&tree, None));

    let report = Pipeline::new(&layout, Toolchain::uniform(&tools), CancelToken::new())
        .run(&graph, &debug())
        .unwrap();

    assert_eq!(report.exit_code(), 0);
    let step = report.target("kernel64").unwrap();
    assert_eq!(step.units.len(), 5);
    assert!(step.units.iter().all(|u| u.result == BuildResult::Success));

    let compiles = compiles(&tools);
    assert_eq!(compiles.len(), 5);
    for args in &compiles {
        assert!(args.contains(&"-g".to_string()));
        assert!(!args.contains(&"-O2".to_string()));
        assert_eq!(args[..2], ["-target", "x86_64-unknown-unknown-elf"]);
    }

    let links: Vec<_> = tools
        .calls()
        .into_iter()
        .filter_map(|c| match c {
            Call::Link(format, args) => Some((format, args)),
            _ => None,
        })
        .collect();
    assert_eq!(links.len(), 1);
    let (format, args) = &links[0];
    assert_eq!(*format, ImageFormat::Elf);
    assert_eq!(args[..4], ["-e", "main", "-T", tree.path("src/kernel64/linker.ld").to_str().unwrap()]);
    assert_eq!(args.iter().filter(|a| a.ends_with(".o")).count(), 5);

    let image = tree.build_dir().join("kernel64.elf");
    let binary = tree.build_dir().join("kernel64.bin");
    assert!(exists(&image));
    assert_eq!(fs::read_to_string(&binary).unwrap(), ".text.data.rodata");
    assert_eq!(step.outcome, Outcome::Built { artifacts: vec![image, binary] });
}

/// One failing unit: the other four still produce objects, the link never runs.
#[test]
fn test_compile_failure_skips_link() {
    let tree = Tree::new();
    let layout = BuildLayout::new(tree.build_dir());
    let tools = FakeTools::default();
    let graph = BuildGraph::new().target(kernel64(&tree, Some("paging.cpp")));

    let report = Pipeline::new(&layout, Toolchain::uniform(&tools), CancelToken::new())
        .run(&graph, &debug())
        .unwrap();

    assert_eq!(report.exit_code(), 1);
    let step = report.target("kernel64").unwrap();
    assert!(matches!(step.outcome, Outcome::Failed { stage: Stage::Compile, .. }));

    let failed: Vec<_> = step.failed_units().collect();
    assert_eq!(failed.len(), 1);
    assert!(failed[0].source.ends_with("paging.cpp"));
    match &failed[0].result {
        BuildResult::Failure { exit_code, output } => {
            assert_eq!(*exit_code, Some(1));
            assert!(output.contains("'Pml4' was not declared"));
        }
        other => panic!("expected failure, got {other:?}"),
    }

    let built: Vec<_> = step.units.iter().filter(|u| u.result == BuildResult::Success).collect();
    assert_eq!(built.len(), 4);
    assert!(built.iter().all(|u| exists(&u.object)));

    assert_eq!(tools.count(|c| matches!(c, Call::Link(..))), 0);
    assert!(!tree.build_dir().join("kernel64.elf").exists());
}

/// Embedded targets build first and a failure blocks only its dependents.
#[test]
fn test_failure_blocks_dependents_only() {
    let tree = Tree::new();
    let layout = BuildLayout::new(tree.build_dir());
    let tools = FakeTools::default();

    let stub = SourceUnit::new(tree.write("src/kernel32/entry.S", "nop")).unwrap();
    let kernel32 = Target::new(
        "kernel32",
        Triple::I686Elf,
        LinkPolicy::Final { entry: "start".into(), script: None, archives: vec![] },
    )
    .source(stub)
    .embeds("kernel64");
    let init = Target::new("init", Triple::X86_64Elf, LinkPolicy::Relocatable { archives: vec![] })
        .source(SourceUnit::new(tree.write("src/init/main.cpp", "int main();")).unwrap());

    let graph = BuildGraph::new()
        .target(kernel32)
        .target(kernel64(&tree, Some("acpi.cpp")))
        .target(init);

    let report = Pipeline::new(&layout, Toolchain::uniform(&tools), CancelToken::new())
        .run(&graph, &debug())
        .unwrap();

    let names: Vec<_> = report.targets.iter().map(|t| t.name.as_str()).collect();
    assert_eq!(names, ["kernel64", "kernel32", "init"]);
    assert!(matches!(report.target("kernel64").unwrap().outcome, Outcome::Failed { .. }));
    assert_eq!(
        report.target("kernel32").unwrap().outcome,
        Outcome::Blocked { by: "target kernel64".into() }
    );
    assert!(report.target("init").unwrap().outcome.is_success());
    assert_eq!(report.failed_targets(), 2);
    assert_eq!(report.exit_code(), 1);
}

/// Archives are built before targets and their paths reach the linker; a broken archive blocks its consumers.
#[test]
fn test_archives_feed_targets() {
    let tree = Tree::new();
    tree.write("third_party/acpica/dsmethod.c", "int ds();");
    tree.write("third_party/acpica/tbxface.c", "int tb();");
    let acpica = ArchiveSpec::new("acpica", Triple::X86_64Elf, tree.path("third_party/acpica"), SourceRule::AllFiles);
    let kernel = Target::new(
        "kernel64",
        Triple::X86_64Elf,
        LinkPolicy::Final { entry: "main".into(), script: None, archives: vec!["acpica".into()] },
    )
    .source(SourceUnit::new(tree.write("src/kernel64/main.cpp", "int main();")).unwrap());

    let layout = BuildLayout::new(tree.build_dir());
    let tools = FakeTools::default();
    let graph = BuildGraph::new().archive(acpica).target(kernel);
    let report = Pipeline::new(&layout, Toolchain::uniform(&tools), CancelToken::new())
        .run(&graph, &debug())
        .unwrap();
    assert!(report.is_success());
    let archive = layout.archive_path("acpica");
    assert_eq!(report.archive("acpica").unwrap().outcome, Outcome::Built { artifacts: vec![archive.clone()] });
    let linked = tools.calls().into_iter().any(|c| match c {
        Call::Link(_, args) => args.contains(&archive.display().to_string()),
        _ => false,
    });
    assert!(linked);

    // Second run reuses the archive without touching the archiver.
    let again = FakeTools::default();
    let report = Pipeline::new(&layout, Toolchain::uniform(&again), CancelToken::new())
        .run(&graph, &debug())
        .unwrap();
    assert_eq!(report.archive("acpica").unwrap().outcome, Outcome::Cached { artifact: archive.clone() });
    assert_eq!(again.count(|c| matches!(c, Call::Archive(_))), 0);

    // A forced rebuild with a failing archiver blocks the kernel.
    let broken = FakeTools {
        fail_archive: true,
        ..FakeTools::default()
    };
    let forced = BuildProfile::new(Configuration::Debug, 4, true).unwrap();
    let report = Pipeline::new(&layout, Toolchain::uniform(&broken), CancelToken::new())
        .run(&graph, &forced)
        .unwrap();
    assert!(matches!(
        report.archive("acpica").unwrap().outcome,
        Outcome::Failed { stage: Stage::Archive, .. }
    ));
    assert_eq!(
        report.target("kernel64").unwrap().outcome,
        Outcome::Blocked { by: "archive acpica".into() }
    );
    assert_eq!(broken.count(|c| matches!(c, Call::Link(..))), 0);
}

/// Link failures carry the linker's captured output.
#[test]
fn test_link_failure_is_reported() {
    let tree = Tree::new();
    let layout = BuildLayout::new(tree.build_dir());
    let tools = FakeTools::default();
    let init = Target::new("init", Triple::X86_64Elf, LinkPolicy::Relocatable { archives: vec![] })
        .source(SourceUnit::new(tree.write("src/init/main.cpp", "undefined reference")).unwrap());

    let report = Pipeline::new(&layout, Toolchain::uniform(&tools), CancelToken::new())
        .run(&BuildGraph::new().target(init), &debug())
        .unwrap();

    match &report.target("init").unwrap().outcome {
        Outcome::Failed { stage, output, .. } => {
            assert_eq!(*stage, Stage::Link);
            assert!(output.as_deref().unwrap().contains("undefined symbol"));
        }
        other => panic!("expected link failure, got {other:?}"),
    }
    assert_eq!(report.exit_code(), 1);
}

/// Extraction failures are attributed to the post-link stage.
#[test]
fn test_extract_failure_is_post_link() {
    let tree = Tree::new();
    let layout = BuildLayout::new(tree.build_dir());
    let tools = FakeTools {
        fail_extract: true,
        ..FakeTools::default()
    };

    let report = Pipeline::new(&layout, Toolchain::uniform(&tools), CancelToken::new())
        .run(&BuildGraph::new().target(kernel64(&tree, None)), &debug())
        .unwrap();

    assert!(matches!(
        report.target("kernel64").unwrap().outcome,
        Outcome::Failed { stage: Stage::PostLink, .. }
    ));
    assert!(!tree.build_dir().join("kernel64.bin").exists());
}

/// An interrupt mid-compile stops the run: no link, remaining targets interrupted.
#[test]
fn test_interrupt_stops_run() {
    let tree = Tree::new();
    let layout = BuildLayout::new(tree.build_dir());
    let tools = FakeTools::default();
    let cancel = CancelToken::new();

    let first = Target::new("init_secondary", Triple::X86_64Elf, LinkPolicy::Relocatable { archives: vec![] })
        .source(SourceUnit::new(tree.write("src/init_secondary/a.cpp", "#interrupt")).unwrap())
        .source(SourceUnit::new(tree.write("src/init_secondary/b.cpp", "int b();")).unwrap());
    let graph = BuildGraph::new().target(first).target(kernel64(&tree, None));

    let report = Pipeline::new(&layout, Toolchain::uniform(&tools), cancel.clone())
        .run(&graph, &BuildProfile::new(Configuration::Debug, 1, false).unwrap())
        .unwrap();

    assert!(cancel.is_cancelled());
    let step = report.target("init_secondary").unwrap();
    assert_eq!(step.outcome, Outcome::Interrupted);
    assert!(step.units.iter().all(|u| u.result == BuildResult::Interrupted));
    assert_eq!(report.target("kernel64").unwrap().outcome, Outcome::Interrupted);
    assert_eq!(tools.count(|c| matches!(c, Call::Compile(_))), 1);
    assert_eq!(tools.count(|c| matches!(c, Call::Link(..))), 0);
    assert_eq!(report.exit_code(), 1);
}

/// Declaration problems are fatal before any tool runs.
#[test]
fn test_cycle_fails_before_tools_run() {
    let tree = Tree::new();
    let layout = BuildLayout::new(tree.build_dir());
    let tools = FakeTools::default();
    let reloc = |name: &str| Target::new(name, Triple::X86_64Elf, LinkPolicy::Relocatable { archives: vec![] });
    let graph = BuildGraph::new()
        .target(reloc("init").embeds("kernel64"))
        .target(reloc("kernel64").embeds("init"));

    let err = Pipeline::new(&layout, Toolchain::uniform(&tools), CancelToken::new())
        .run(&graph, &debug())
        .unwrap_err();
    assert!(err.to_string().contains("init -> kernel64 -> init"));
    assert!(tools.calls().is_empty());
    assert!(!tree.build_dir().exists());
}

/// Release builds carry optimisation flags and no debug info.
#[test]
fn test_release_profile_flags() {
    let tree = Tree::new();
    let layout = BuildLayout::new(tree.build_dir());
    let tools = FakeTools::default();
    let profile = BuildProfile::resolve("Release", Some(2), false).unwrap();

    Pipeline::new(&layout, Toolchain::uniform(&tools), CancelToken::new())
        .run(&BuildGraph::new().target(kernel64(&tree, None)), &profile)
        .unwrap();

    for args in compiles(&tools) {
        let n = args.len();
        assert_eq!(args[n - 6..n - 4], ["-O2", "-DOPTIMIZED"]);
        assert!(!args.contains(&"-g".to_string()));
    }
}

/// Reports archives built before a fixed size as stale.
struct MinimumSize(u64);

impl CacheValidity for MinimumSize {
    fn is_current(&self, _spec: &ArchiveSpec, archive: &Path) -> bool {
        fs::metadata(archive).is_ok_and(|m| m.len() >= self.0)
    }
}

/// The pipeline consults its validity check before reusing an archive.
#[test]
fn test_pipeline_uses_validity_check() {
    let tree = Tree::new();
    tree.write("third_party/acpica/dsmethod.c", "int ds();");
    let acpica = ArchiveSpec::new("acpica", Triple::X86_64Elf, tree.path("third_party/acpica"), SourceRule::AllFiles);
    let graph = BuildGraph::new().archive(acpica);
    let layout = BuildLayout::new(tree.build_dir());
    fs::create_dir_all(tree.build_dir()).unwrap();
    fs::write(layout.archive_path("acpica"), "x").unwrap();

    let tools = FakeTools::default();
    let report = Pipeline::new(&layout, Toolchain::uniform(&tools), CancelToken::new())
        .with_validity(&MinimumSize(4))
        .run(&graph, &debug())
        .unwrap();
    assert!(matches!(report.archive("acpica").unwrap().outcome, Outcome::Built { .. }));
    assert_eq!(tools.count(|c| matches!(c, Call::Archive(_))), 1);

    let report = Pipeline::new(&layout, Toolchain::uniform(&tools), CancelToken::new())
        .with_validity(&MinimumSize(4))
        .run(&graph, &debug())
        .unwrap();
    assert!(matches!(report.archive("acpica").unwrap().outcome, Outcome::Cached { .. }));
    assert_eq!(tools.count(|c| matches!(c, Call::Archive(_))), 1);
}
