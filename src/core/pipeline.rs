use std::{
    fmt,
    path::{Path, PathBuf},
};

use tracing::{info, warn};

use super::converter::{run, ConverterRegistry, ExitIndicator};

#[derive(Debug)]
pub struct OutputArtifact {
    pub path: PathBuf,
    pub converter: String,
}

#[derive(Debug, Clone)]
pub struct AttemptFailure {
    pub converter: String,
    pub exit: ExitIndicator,
    /// Raw tool output. Server-side only.
    pub diagnostic: String,
}

#[derive(Debug, Clone, Default)]
pub struct ConversionFailure {
    pub attempts: Vec<AttemptFailure>,
    pub probe: Option<String>,
}

impl ConversionFailure {
    /// Caller-facing summary: converter names and exit classes, no paths or tool output.
    pub fn summary(&self) -> String {
        if self.attempts.is_empty() {
            return "no converters configured".to_string();
        }

        self.attempts
            .iter()
            .map(|a| format!("{} ({})", a.converter, a.exit))
            .collect::<Vec<_>>()
            .join("; ")
    }
}

impl fmt::Display for ConversionFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.summary())
    }
}

pub type ConversionResult = Result<OutputArtifact, ConversionFailure>;

/// Tries each converter in priority order, stopping at the first one that
/// exits zero and leaves a non-empty file at `output`.
pub async fn convert(
    input: &Path,
    output: &Path,
    registry: &ConverterRegistry,
) -> ConversionResult {
    let mut failure = ConversionFailure::default();

    for spec in registry.converters() {
        let inv = run(&spec.command, Some(input), Some(output), registry.timeout()).await;

        let exit = match inv.exit.clone() {
            Some(exit) => Some(exit),
            None if output_ready(output).await => None,
            None => Some(ExitIndicator::EmptyOutput),
        };

        match exit {
            None => {
                info!("converted with {}", spec.name);
                return Ok(OutputArtifact {
                    path: output.to_path_buf(),
                    converter: spec.name.clone(),
                });
            }
            Some(exit) => {
                warn!(
                    "converter {} failed: {}, diagnostic: {}",
                    spec.name,
                    exit,
                    inv.diagnostic()
                );
                // next converter starts from a clean slot
                discard_partial(output).await;

                failure.attempts.push(AttemptFailure {
                    converter: spec.name.clone(),
                    exit,
                    diagnostic: inv.diagnostic(),
                });
            }
        }
    }

    if let Some(probe) = registry.probe() {
        let inv = run(probe, Some(input), None, registry.timeout()).await;
        let text = match &inv.exit {
            None => inv.stdout.trim().to_string(),
            Some(exit) => format!("{}: {}", exit, inv.diagnostic()),
        };
        warn!("input probe after failed conversion: {}", text);
        failure.probe = Some(text);
    }

    Err(failure)
}

async fn output_ready(output: &Path) -> bool {
    tokio::fs::metadata(output)
        .await
        .map(|m| m.is_file() && m.len() > 0)
        .unwrap_or(false)
}

/// Removes the output and any sibling sharing its stem, e.g. ImageMagick's
/// `output-0.jpg`, `output-1.jpg` for multi-image files or heif-convert's
/// `output-depth.png`.
async fn discard_partial(output: &Path) {
    let (Some(dir), Some(stem)) = (output.parent(), output.file_stem()) else {
        return;
    };
    let stem = stem.to_string_lossy();

    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) => {
            warn!("list {} error: {:?}", dir.display(), e);
            return;
        }
    };

    loop {
        let entry = match entries.next_entry().await {
            Ok(Some(entry)) => entry,
            Ok(None) => break,
            Err(e) => {
                warn!("list {} error: {:?}", dir.display(), e);
                break;
            }
        };

        let name = entry.file_name();
        if !name.to_string_lossy().starts_with(stem.as_ref()) {
            continue;
        }

        let path = entry.path();
        let r = match entry.file_type().await {
            Ok(t) if t.is_dir() => tokio::fs::remove_dir_all(&path).await,
            _ => tokio::fs::remove_file(&path).await,
        };
        if let Err(e) = r {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!("remove partial output {} error: {:?}", path.display(), e);
            }
        }
    }
}
