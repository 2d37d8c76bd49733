//! Post-link transform: flatten selected sections into a raw loadable blob.

use log::info;
use std::path::{Path, PathBuf};

use crate::cancel::CancelToken;
use crate::error::{Error, Result};
use crate::toolchain::SectionExtractor;

/// `llvm-objcopy --output-target=binary --only-section <s>... <in> <out>`
///
/// Sections are passed in declaration order; nothing else is copied.
pub fn extract_args(image: &Path, output: &Path, sections: &[String]) -> Vec<String> {
    let mut args = vec!["--output-target=binary".to_string()];
    for section in sections {
        args.push("--only-section".to_string());
        args.push(section.clone());
    }
    args.push(image.to_string_lossy().into_owned());
    args.push(output.to_string_lossy().into_owned());
    args
}

/// Extract `sections` of the linked `image` for `target` into `output`.
pub fn extract_image(
    target: &str,
    image: &Path,
    sections: &[String],
    output: PathBuf,
    extractor: &dyn SectionExtractor,
    cancel: &CancelToken,
) -> Result<PathBuf> {
    let args = extract_args(image, &output, sections);
    info!("  extracting {} -> {}", sections.join(" "), output.display());

    let out = extractor.extract(&args, cancel).map_err(|e| Error::PostLink {
        target: target.to_string(),
        exit_code: None,
        output: format!("failed to run section extractor: {e}"),
    })?;

    if out.succeeded() {
        Ok(output)
    } else if cancel.is_cancelled() {
        Err(Error::Interrupted)
    } else {
        Err(Error::PostLink {
            target: target.to_string(),
            exit_code: out.exit_code,
            output: out.output,
        })
    }
}
