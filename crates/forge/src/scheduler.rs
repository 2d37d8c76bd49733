//! Bounded parallel compilation.
//!
//! Every unit is submitted exactly once to a fixed pool of scoped worker
//! threads. A failing unit never cancels its siblings; only an operator
//! interrupt stops new work from starting. Results come back in input order
//! whatever order the workers finished in.

use log::{debug, info};
use std::sync::{mpsc, Mutex, PoisonError};
use std::thread;

use crate::cancel::CancelToken;
use crate::flags::CompileCommand;
use crate::report::{BuildResult, UnitResult};
use crate::target::SourceUnit;
use crate::toolchain::Compiler;

/// Compile every unit with at most `jobs` concurrent compiler processes.
///
/// Returns one result per unit, index-aligned with `units`. Returns only after
/// every started compilation has finished.
pub fn compile_all<F>(
    units: &[SourceUnit],
    compose: F,
    compiler: &dyn Compiler,
    jobs: usize,
    cancel: &CancelToken,
) -> Vec<UnitResult>
where
    F: Fn(&SourceUnit) -> CompileCommand + Sync,
{
    if units.is_empty() {
        return Vec::new();
    }

    let workers = jobs.clamp(1, units.len());
    info!("compiling {} units with {} workers", units.len(), workers);

    let (job_tx, job_rx) = mpsc::channel::<usize>();
    for idx in 0..units.len() {
        // The receiver outlives this loop, so sending cannot fail.
        let _ = job_tx.send(idx);
    }
    drop(job_tx);

    let job_rx = Mutex::new(job_rx);
    let results: Mutex<Vec<Option<UnitResult>>> = Mutex::new(vec![None; units.len()]);
    let compose = &compose;

    thread::scope(|s| {
        for _ in 0..workers {
            s.spawn(|| loop {
                let next = job_rx.lock().unwrap_or_else(PoisonError::into_inner).recv();
                let Ok(idx) = next else { break };

                let unit = &units[idx];
                let command = compose(unit);
                let result = if cancel.is_cancelled() {
                    BuildResult::Interrupted
                } else {
                    compile_one(unit, &command, compiler, cancel)
                };

                let mut slots = results.lock().unwrap_or_else(PoisonError::into_inner);
                slots[idx] = Some(UnitResult {
                    source: unit.path.clone(),
                    object: command.output,
                    result,
                });
            });
        }
    });

    let slots = results.into_inner().unwrap_or_else(PoisonError::into_inner);
    slots
        .into_iter()
        .zip(units)
        .map(|(slot, unit)| {
            slot.unwrap_or_else(|| UnitResult {
                source: unit.path.clone(),
                object: unit.object_name.clone().into(),
                result: BuildResult::Interrupted,
            })
        })
        .collect()
}

fn compile_one(
    unit: &SourceUnit,
    command: &CompileCommand,
    compiler: &dyn Compiler,
    cancel: &CancelToken,
) -> BuildResult {
    debug!("compile {}", unit.path.display());
    match compiler.compile(command, cancel) {
        Ok(out) if out.succeeded() => BuildResult::Success,
        Ok(out) if out.exit_code.is_none() && cancel.is_cancelled() => BuildResult::Interrupted,
        Ok(out) => BuildResult::Failure {
            exit_code: out.exit_code,
            output: out.output,
        },
        Err(e) => BuildResult::Failure {
            exit_code: None,
            output: format!("failed to run compiler: {e}"),
        },
    }
}
