//! Test executable discovery.

use crate::error::{PipelineError, Result};
use glob::Pattern;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::{debug, info};

/// Find the test executable matching `pattern` under `root`.
///
/// Matches are narrowed to executable regular files that are not cargo
/// dependency-info files (`*.d`). Exactly one must remain unless
/// `pick_newest` is set, in which case the most recently modified wins.
pub fn discover_executable(root: &Path, pattern: &str, pick_newest: bool) -> Result<PathBuf> {
    let full_pattern = if Path::new(pattern).is_absolute() {
        pattern.to_string()
    } else {
        let root = Pattern::escape(&root.to_string_lossy());
        format!("{}/{}", root.trim_end_matches('/'), pattern)
    };
    debug!(pattern = %full_pattern, "Searching for test executable");

    let paths = glob::glob(&full_pattern).map_err(|e| PipelineError::InvalidPattern {
        pattern: pattern.to_string(),
        reason: e.to_string(),
    })?;

    let mut candidates: Vec<PathBuf> = paths
        .filter_map(|entry| entry.ok())
        .filter(|path| is_test_executable(path))
        .collect();
    candidates.sort();

    match candidates.len() {
        0 => Err(PipelineError::NoExecutable {
            pattern: pattern.to_string(),
        }),
        1 => {
            let found = candidates.remove(0);
            info!(executable = %found.display(), "Found test executable");
            Ok(found)
        }
        _ if pick_newest => {
            let newest = candidates
                .iter()
                .max_by_key(|path| modified(path))
                .cloned()
                .ok_or_else(|| PipelineError::NoExecutable {
                    pattern: pattern.to_string(),
                })?;
            info!(
                executable = %newest.display(),
                candidates = candidates.len(),
                "Picked newest of several test executables"
            );
            Ok(newest)
        }
        _ => Err(PipelineError::AmbiguousExecutable {
            pattern: pattern.to_string(),
            candidates,
        }),
    }
}

fn is_test_executable(path: &Path) -> bool {
    if path.extension().map(|e| e == "d").unwrap_or(false) {
        return false;
    }
    match std::fs::metadata(path) {
        Ok(meta) => meta.is_file() && is_executable(&meta),
        Err(_) => false,
    }
}

#[cfg(unix)]
fn is_executable(meta: &std::fs::Metadata) -> bool {
    use std::os::unix::fs::PermissionsExt;
    meta.permissions().mode() & 0o111 != 0
}

#[cfg(not(unix))]
fn is_executable(_meta: &std::fs::Metadata) -> bool {
    true
}

fn modified(path: &Path) -> SystemTime {
    std::fs::metadata(path)
        .and_then(|m| m.modified())
        .unwrap_or(SystemTime::UNIX_EPOCH)
}
