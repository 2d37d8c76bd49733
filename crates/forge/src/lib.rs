//! # forge
//!
//! Orchestrates native OS image builds over an external LLVM toolchain.
//!
//! ## Pipeline
//!
//! ```text
//! BuildProfile ──▶ FlagComposer ──▶ compile_all ──▶ link ──▶ extract_image
//!                                       ▲             ▲
//!                      ArchiveCache ────┴─────────────┘
//! ```
//!
//! - `profile` - named configuration to optimisation/debug toggles
//! - `target` - triples, source units, link policies
//! - `flags` - pure per-unit compiler command composition
//! - `archive` - existence-cached third-party static archives
//! - `scheduler` - bounded parallel compilation
//! - `link` / `extract` - linker and section extraction invocations
//! - `pipeline` - dependency ordering and the whole run
//! - `toolchain` - the external process capabilities

pub mod archive;
pub mod cancel;
pub mod error;
pub mod extract;
pub mod flags;
pub mod layout;
pub mod link;
pub mod pipeline;
pub mod profile;
pub mod report;
pub mod scheduler;
pub mod target;
pub mod toolchain;

pub use archive::{ArchiveCache, ArchiveSpec, CacheValidity, ExistenceCheck, SourceRule};
pub use cancel::CancelToken;
pub use error::{Error, Result};
pub use flags::{CompileCommand, Driver, FlagComposer};
pub use layout::BuildLayout;
pub use pipeline::{BuildGraph, Pipeline};
pub use profile::{BuildProfile, Configuration};
pub use report::{BuildReport, BuildResult, Outcome, Stage, StepReport, UnitResult};
pub use target::{LinkPolicy, SourceKind, SourceUnit, Target, Triple};
pub use toolchain::{Archiver, Compiler, Linker, SectionExtractor, SystemToolchain, Tool, ToolOutput, Toolchain};
