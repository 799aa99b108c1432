//! `.tar.gz` extraction.

use crate::error::{PipelineError, Result};
use flate2::bufread::GzDecoder;
use std::ffi::OsString;
use std::fs::File;
use std::io::BufReader;
use std::path::{Component, Path, PathBuf};
use tar::Archive;
use tracing::info;

/// Extract `archive` into `dest` and return the source tree, the archive's
/// single top-level directory.
pub async fn unpack_archive(archive: &Path, dest: &Path) -> Result<PathBuf> {
    let archive = archive.to_path_buf();
    let dest = dest.to_path_buf();
    let task_archive = archive.clone();

    tokio::task::spawn_blocking(move || unpack_blocking(&task_archive, &dest))
        .await
        .map_err(|e| PipelineError::Unpack {
            path: archive,
            reason: e.to_string(),
        })?
}

fn unpack_blocking(archive_path: &Path, dest: &Path) -> Result<PathBuf> {
    info!(archive = %archive_path.display(), dest = %dest.display(), "Unpacking archive");

    let fail = |reason: String| PipelineError::Unpack {
        path: archive_path.to_path_buf(),
        reason,
    };

    let file = File::open(archive_path).map_err(|e| fail(e.to_string()))?;
    std::fs::create_dir_all(dest).map_err(|e| fail(e.to_string()))?;

    let mut archive = Archive::new(GzDecoder::new(BufReader::new(file)));
    let mut top_level: Option<OsString> = None;

    for entry in archive.entries().map_err(|e| fail(e.to_string()))? {
        let mut entry = entry.map_err(|e| fail(e.to_string()))?;

        // GitHub archives start with a pax global header carrying the commit id.
        if entry.header().entry_type().is_pax_global_extensions() {
            continue;
        }

        let path = entry.path().map_err(|e| fail(e.to_string()))?.into_owned();
        if !is_relative_inside(&path) {
            return Err(fail(format!("unsafe entry path {}", path.display())));
        }
        // `./` itself, as written by `tar -C dir .`.
        let Some(first) = first_component(&path) else {
            continue;
        };

        match &top_level {
            None => top_level = Some(first),
            Some(existing) if *existing != first => {
                return Err(fail(format!(
                    "more than one top-level entry ({} and {})",
                    Path::new(existing).display(),
                    Path::new(&first).display()
                )));
            }
            Some(_) => {}
        }

        let unpacked = entry.unpack_in(dest).map_err(|e| fail(e.to_string()))?;
        if !unpacked {
            return Err(fail(format!("entry escapes destination: {}", path.display())));
        }
    }

    let top_level = top_level.ok_or_else(|| fail("archive is empty".to_string()))?;
    let source_dir = dest.join(top_level);
    if !source_dir.is_dir() {
        return Err(fail(format!(
            "top-level entry {} is not a directory",
            source_dir.display()
        )));
    }
    Ok(source_dir)
}

/// Only `.` and normal components; no root, prefix or `..`.
fn is_relative_inside(path: &Path) -> bool {
    path.components()
        .all(|c| matches!(c, Component::CurDir | Component::Normal(_)))
}

/// First normal component of an entry path.
fn first_component(path: &Path) -> Option<OsString> {
    path.components().find_map(|component| match component {
        Component::Normal(name) => Some(name.to_os_string()),
        _ => None,
    })
}
