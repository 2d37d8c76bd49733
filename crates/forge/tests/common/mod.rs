//! Shared fixtures: a recording fake toolchain over a temporary tree.
#![allow(dead_code)]

use forge::flags::CompileCommand;
use forge::target::ImageFormat;
use forge::{Archiver, CancelToken, Compiler, Linker, SectionExtractor, ToolOutput};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tempfile::TempDir;

/// One recorded tool run.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Call {
    Compile(Vec<String>),
    Link(ImageFormat, Vec<String>),
    Archive(Vec<String>),
    Extract(Vec<String>),
}

/// Fake toolchain that writes plausible outputs and records every call.
///
/// Compilation fails for sources whose text contains `#error` and acts like an
/// operator interrupt for `#interrupt`. Linking fails when any input object
/// contains `undefined`.
#[derive(Default)]
pub struct FakeTools {
    pub calls: Mutex<Vec<Call>>,
    pub fail_archive: bool,
    pub fail_extract: bool,
}

impl FakeTools {
    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, pred: impl Fn(&Call) -> bool) -> usize {
        self.calls().iter().filter(|c| pred(c)).count()
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }
}

/// Value following `flag` in `args`.
fn after<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
    args.iter().position(|a| a == flag).map(|i| args[i + 1].as_str())
}

impl Compiler for FakeTools {
    fn compile(&self, command: &CompileCommand, cancel: &CancelToken) -> std::io::Result<ToolOutput> {
        self.record(Call::Compile(command.args.clone()));
        let source = command.args.last().cloned().unwrap_or_default();
        let text = fs::read_to_string(&source)?;
        if text.contains("#interrupt") {
            cancel.cancel();
            return Ok(ToolOutput::failure(None, ""));
        }
        if text.contains("#error") {
            return Ok(ToolOutput::failure(Some(1), format!("{source}:1:2: error: {}", text.trim())));
        }
        fs::write(&command.output, format!("OBJ {text}"))?;
        Ok(ToolOutput::success())
    }
}

impl Linker for FakeTools {
    fn link(&self, format: ImageFormat, args: &[String], _: &CancelToken) -> std::io::Result<ToolOutput> {
        self.record(Call::Link(format, args.to_vec()));
        let inputs: Vec<&String> = args.iter().filter(|a| a.ends_with(".o") || a.ends_with(".a")).collect();
        let mut image = String::new();
        for input in inputs {
            let content = fs::read_to_string(input)?;
            if content.contains("undefined") {
                return Ok(ToolOutput::failure(Some(1), "ld.lld: error: undefined symbol: main"));
            }
            image.push_str(&content);
        }
        if let Some(out) = after(args, "-o") {
            fs::write(out, image)?;
        }
        Ok(ToolOutput::success())
    }
}

impl Archiver for FakeTools {
    fn archive(&self, args: &[String], _: &CancelToken) -> std::io::Result<ToolOutput> {
        self.record(Call::Archive(args.to_vec()));
        if self.fail_archive {
            fs::write(&args[1], "half written")?;
            return Ok(ToolOutput::failure(Some(1), "llvm-ar: error: disk full"));
        }
        fs::write(&args[1], format!("!<arch>\n{}", args[2..].join("\n")))?;
        Ok(ToolOutput::success())
    }
}

impl SectionExtractor for FakeTools {
    fn extract(&self, args: &[String], _: &CancelToken) -> std::io::Result<ToolOutput> {
        self.record(Call::Extract(args.to_vec()));
        if self.fail_extract {
            return Ok(ToolOutput::failure(Some(1), "llvm-objcopy: error: bad section"));
        }
        let sections: Vec<&str> = args
            .iter()
            .zip(args.iter().skip(1))
            .filter(|(flag, _)| *flag == "--only-section")
            .map(|(_, s)| s.as_str())
            .collect();
        let output = &args[args.len() - 1];
        fs::write(output, sections.join(""))?;
        Ok(ToolOutput::success())
    }
}

/// A scratch source tree with a build directory.
pub struct Tree {
    pub dir: TempDir,
}

impl Tree {
    pub fn new() -> Self {
        Self {
            dir: tempfile::tempdir().unwrap(),
        }
    }

    pub fn path(&self, rel: &str) -> PathBuf {
        self.dir.path().join(rel)
    }

    pub fn build_dir(&self) -> PathBuf {
        self.path("build")
    }

    /// Write a source file and return its path.
    pub fn write(&self, rel: &str, text: &str) -> PathBuf {
        let path = self.path(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, text).unwrap();
        path
    }
}

pub fn exists(path: &Path) -> bool {
    path.is_file()
}
