//! External toolchain capabilities.
//!
//! The pipeline only talks to these traits. [`SystemToolchain`] backs them
//! with real LLVM processes; tests substitute recording fakes.

use log::debug;
use std::ffi::OsStr;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use crate::cancel::CancelToken;
use crate::error::{Error, Result};
use crate::flags::{CompileCommand, Driver};
use crate::target::ImageFormat;

/// How often a running tool is checked for exit or cancellation.
const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// How long output is still collected after a kill. A grandchild may hold the
/// pipes open past the tool's own exit.
const DRAIN_GRACE: Duration = Duration::from_millis(200);

/// Exit status and combined stdout/stderr of one tool run.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ToolOutput {
    /// `None` when the process was killed by a signal.
    pub exit_code: Option<i32>,
    pub output: String,
}

impl ToolOutput {
    pub fn success() -> Self {
        Self {
            exit_code: Some(0),
            output: String::new(),
        }
    }

    pub fn failure(exit_code: Option<i32>, output: impl Into<String>) -> Self {
        Self {
            exit_code,
            output: output.into(),
        }
    }

    pub fn succeeded(&self) -> bool {
        self.exit_code == Some(0)
    }
}

pub trait Compiler: Send + Sync {
    fn compile(&self, command: &CompileCommand, cancel: &CancelToken) -> std::io::Result<ToolOutput>;
}

pub trait Linker: Send + Sync {
    fn link(&self, format: ImageFormat, args: &[String], cancel: &CancelToken) -> std::io::Result<ToolOutput>;
}

pub trait Archiver: Send + Sync {
    fn archive(&self, args: &[String], cancel: &CancelToken) -> std::io::Result<ToolOutput>;
}

pub trait SectionExtractor: Send + Sync {
    fn extract(&self, args: &[String], cancel: &CancelToken) -> std::io::Result<ToolOutput>;
}

/// The four capabilities bundled for the pipeline.
#[derive(Clone, Copy)]
pub struct Toolchain<'a> {
    pub compiler: &'a dyn Compiler,
    pub linker: &'a dyn Linker,
    pub archiver: &'a dyn Archiver,
    pub extractor: &'a dyn SectionExtractor,
}

impl<'a> Toolchain<'a> {
    /// Borrow every capability from one implementation.
    pub fn uniform<T>(tools: &'a T) -> Self
    where
        T: Compiler + Linker + Archiver + SectionExtractor,
    {
        Self {
            compiler: tools,
            linker: tools,
            archiver: tools,
            extractor: tools,
        }
    }
}

/// Names, override variables and resolved paths of the LLVM tools.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Tool {
    Cc,
    Cxx,
    Ld,
    LdCoff,
    Ar,
    Objcopy,
}

impl Tool {
    pub fn binary(self) -> &'static str {
        match self {
            Tool::Cc => "clang",
            Tool::Cxx => "clang++",
            Tool::Ld => "ld.lld",
            Tool::LdCoff => "lld-link",
            Tool::Ar => "llvm-ar",
            Tool::Objcopy => "llvm-objcopy",
        }
    }

    pub fn env_override(self) -> &'static str {
        match self {
            Tool::Cc => "FORGE_CC",
            Tool::Cxx => "FORGE_CXX",
            Tool::Ld => "FORGE_LD",
            Tool::LdCoff => "FORGE_LD_COFF",
            Tool::Ar => "FORGE_AR",
            Tool::Objcopy => "FORGE_OBJCOPY",
        }
    }

    /// Environment override first, then `PATH`.
    pub fn locate(self) -> Result<PathBuf> {
        if let Some(path) = std::env::var_os(self.env_override()) {
            return which::which(&path).map_err(|e| {
                Error::config(format!(
                    "{}={} does not name an executable: {e}",
                    self.env_override(),
                    Path::new(&path).display()
                ))
            });
        }
        which::which(self.binary()).map_err(|_| {
            Error::config(format!(
                "{} not found on PATH (set {} to override)",
                self.binary(),
                self.env_override()
            ))
        })
    }
}

/// Real toolchain: every capability spawns an external process.
#[derive(Clone, Debug, Default)]
pub struct SystemToolchain {
    paths: Vec<(Tool, PathBuf)>,
    working_dir: Option<PathBuf>,
}

impl SystemToolchain {
    /// Locate the given tools up front so a missing one fails before any build step.
    pub fn discover(required: &[Tool]) -> Result<Self> {
        let mut paths = Vec::with_capacity(required.len());
        for &tool in required {
            if !paths.iter().any(|(t, _)| *t == tool) {
                paths.push((tool, tool.locate()?));
            }
        }
        Ok(Self {
            paths,
            working_dir: None,
        })
    }

    /// Use explicit paths, bypassing discovery.
    pub fn with_paths(paths: impl IntoIterator<Item = (Tool, PathBuf)>) -> Self {
        Self {
            paths: paths.into_iter().collect(),
            working_dir: None,
        }
    }

    /// Run every tool from `dir`, so relative paths in sources (`.incbin`,
    /// `#include "..."`) resolve against it rather than the caller's directory.
    #[must_use]
    pub fn in_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    fn path(&self, tool: Tool) -> std::io::Result<&Path> {
        self.paths
            .iter()
            .find(|(t, _)| *t == tool)
            .map(|(_, p)| p.as_path())
            .ok_or_else(|| {
                std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    format!("{} was not located for this run", tool.binary()),
                )
            })
    }

    fn invoke(&self, tool: Tool, args: &[String], cancel: &CancelToken) -> std::io::Result<ToolOutput> {
        let program = self.path(tool)?;
        debug!("{} {}", program.display(), args.join(" "));
        run_tool(program, args, self.working_dir.as_deref(), cancel)
    }
}

impl Compiler for SystemToolchain {
    fn compile(&self, command: &CompileCommand, cancel: &CancelToken) -> std::io::Result<ToolOutput> {
        let tool = match command.driver {
            Driver::C => Tool::Cc,
            Driver::Cxx => Tool::Cxx,
        };
        self.invoke(tool, &command.args, cancel)
    }
}

impl Linker for SystemToolchain {
    fn link(&self, format: ImageFormat, args: &[String], cancel: &CancelToken) -> std::io::Result<ToolOutput> {
        let tool = match format {
            ImageFormat::Elf => Tool::Ld,
            ImageFormat::Pe => Tool::LdCoff,
        };
        self.invoke(tool, args, cancel)
    }
}

impl Archiver for SystemToolchain {
    fn archive(&self, args: &[String], cancel: &CancelToken) -> std::io::Result<ToolOutput> {
        self.invoke(Tool::Ar, args, cancel)
    }
}

impl SectionExtractor for SystemToolchain {
    fn extract(&self, args: &[String], cancel: &CancelToken) -> std::io::Result<ToolOutput> {
        self.invoke(Tool::Objcopy, args, cancel)
    }
}

/// Run a process to completion, capturing stdout and stderr.
///
/// The child is polled rather than waited on so that a tripped `cancel`
/// kills and reaps it instead of blocking the worker. `dir` sets the child's
/// working directory; `None` inherits ours.
pub fn run_tool<S: AsRef<OsStr>>(
    program: &Path,
    args: &[S],
    dir: Option<&Path>,
    cancel: &CancelToken,
) -> std::io::Result<ToolOutput> {
    let mut command = Command::new(program);
    command
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    if let Some(dir) = dir {
        command.current_dir(dir);
    }
    let mut child = command.spawn()?;

    let stdout = drain(child.stdout.take());
    let stderr = drain(child.stderr.take());

    let status = loop {
        if let Some(status) = child.try_wait()? {
            break Some(status);
        }
        if cancel.is_cancelled() {
            terminate(&mut child);
            break None;
        }
        thread::sleep(POLL_INTERVAL);
    };

    // After a kill, anything the tool forked may still hold the pipes.
    let wait = status.is_none().then_some(DRAIN_GRACE);
    let mut output = collect(stdout.as_ref(), wait);
    output.push_str(&collect(stderr.as_ref(), wait));

    Ok(ToolOutput {
        exit_code: status.and_then(|s| s.code()),
        output,
    })
}

fn terminate(child: &mut Child) {
    let _ = child.kill();
    let _ = child.wait();
}

/// Read a pipe to its end on a detached thread.
fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> Option<mpsc::Receiver<String>> {
    pipe.map(|mut pipe| {
        let (tx, rx) = mpsc::channel();
        thread::spawn(move || {
            let mut buf = Vec::new();
            let _ = pipe.read_to_end(&mut buf);
            let _ = tx.send(String::from_utf8_lossy(&buf).into_owned());
        });
        rx
    })
}

/// With `wait` set, give up after that long and leave the reader behind.
fn collect(rx: Option<&mpsc::Receiver<String>>, wait: Option<Duration>) -> String {
    let Some(rx) = rx else {
        return String::new();
    };
    match wait {
        Some(wait) => rx.recv_timeout(wait).unwrap_or_default(),
        None => rx.recv().unwrap_or_default(),
    }
}
