//! Archive importer
//!
//! Extracts the designated subtree of a downloaded repository zipball. GitHub
//! wraps every entry in a synthetic `<repo>-<sha>/` folder; that segment and the
//! marker segment (e.g. `Assets/`) are stripped, so only the content below the
//! marker lands under the target directory.
//!
//! Extraction is fail-fast: the archive is planned and every selected entry is
//! decompressed into a sink before the first file is written, so a malformed or
//! corrupt archive leaves the target untouched. Only an I/O failure while
//! writing can leave earlier files behind, and that error names the entry.

use std::fs::{self, File};
use std::io::{self, Cursor, Read, Seek};
use std::path::{Component, Path, PathBuf};

use zip::ZipArchive;

use crate::error::{CatalogError, Result};

/// Result of a successful import
#[derive(Debug, Clone, PartialEq)]
pub struct ImportSummary {
    pub destination: PathBuf,
    pub files_written: usize,
    pub bytes_written: u64,
    /// File entries outside the marker subtree
    pub skipped: usize,
}

struct PlannedEntry {
    index: usize,
    name: String,
    relative: PathBuf,
}

/// Extract the `marker` subtree of a zip held in memory into `target_root`
pub fn import_archive(bytes: &[u8], target_root: &Path, marker: &str) -> Result<ImportSummary> {
    let mut archive = ZipArchive::new(Cursor::new(bytes))?;
    let (plan, skipped) = plan_entries(&mut archive, marker)?;

    for planned in &plan {
        let mut entry = archive.by_index(planned.index)?;
        io::copy(&mut entry, &mut io::sink()).map_err(|source| CatalogError::EntryFailed {
            entry: planned.name.clone(),
            source,
        })?;
    }

    fs::create_dir_all(target_root)?;

    let mut bytes_written = 0;
    for planned in &plan {
        let destination = target_root.join(&planned.relative);
        bytes_written += write_entry(&mut archive, planned.index, &destination).map_err(
            |source| CatalogError::EntryFailed {
                entry: planned.name.clone(),
                source,
            },
        )?;
    }

    tracing::info!(
        "Extracted {} file(s) into {} ({} skipped)",
        plan.len(),
        target_root.display(),
        skipped
    );

    Ok(ImportSummary {
        destination: target_root.to_path_buf(),
        files_written: plan.len(),
        bytes_written,
        skipped,
    })
}

fn plan_entries<R: Read + Seek>(
    archive: &mut ZipArchive<R>,
    marker: &str,
) -> Result<(Vec<PlannedEntry>, usize)> {
    let mut plan = Vec::new();
    let mut skipped = 0;

    for index in 0..archive.len() {
        let entry = archive.by_index(index)?;
        if entry.is_dir() {
            continue;
        }

        let name = entry.name().to_string();
        match relative_destination(&name, marker)? {
            Some(relative) => plan.push(PlannedEntry {
                index,
                name,
                relative,
            }),
            None => skipped += 1,
        }
    }

    Ok((plan, skipped))
}

/// Path of an entry below the marker, `None` when the entry is filtered out
fn relative_destination(name: &str, marker: &str) -> Result<Option<PathBuf>> {
    let Some((_root, rest)) = name.split_once('/') else {
        return Ok(None);
    };
    let Some(below) = rest
        .strip_prefix(marker)
        .and_then(|r| r.strip_prefix('/'))
    else {
        return Ok(None);
    };
    if below.is_empty() {
        return Ok(None);
    }

    let relative = Path::new(below);
    let contained = relative
        .components()
        .all(|c| matches!(c, Component::Normal(_) | Component::CurDir));
    if !contained {
        return Err(CatalogError::UnsafeEntryPath(name.to_string()));
    }

    Ok(Some(relative.to_path_buf()))
}

fn write_entry<R: Read + Seek>(
    archive: &mut ZipArchive<R>,
    index: usize,
    destination: &Path,
) -> io::Result<u64> {
    if let Some(parent) = destination.parent() {
        fs::create_dir_all(parent)?;
    }

    let mut entry = archive.by_index(index).map_err(io::Error::from)?;
    let mut file = File::create(destination)?;
    // io::copy streams through a fixed-size buffer
    io::copy(&mut entry, &mut file)
}
