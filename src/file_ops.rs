use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use regex::Regex;
use serde::Serialize;
use zip::ZipArchive;

use crate::domain::IdentifierMap;
use crate::error::GraderError;
use crate::reconcile::{IdentifierMatcher, SubstringMatcher};
use crate::table::Row;

#[derive(Debug, Clone, Default, Serialize)]
pub struct SortReport {
    pub copied: Vec<PathBuf>,
    pub missing: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RenameReport {
    pub renamed: Vec<(String, String)>,
    pub unmatched: Vec<String>,
    pub conflicts: Vec<String>,
}

/// `{fields joined by _}_{stem}{suffix}`, spaces to underscores, lower-cased.
pub fn copy_rename_name(row: &Row, name_fields: &[String], source_file: &Path) -> Result<String, GraderError> {
    let stem = source_file
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_default();
    let suffix = source_file
        .extension()
        .map(|ext| format!(".{}", ext.to_string_lossy()))
        .unwrap_or_default();
    let parts = name_fields
        .iter()
        .map(|field| {
            row.get(field)
                .map(String::as_str)
                .ok_or_else(|| GraderError::MissingColumn(field.clone()))
        })
        .collect::<Result<Vec<_>, GraderError>>()?;
    let name = format!("{}_{stem}{suffix}", parts.join("_"));
    Ok(name.replace(' ', "_").to_lowercase())
}

/// One copy of `source_file` per row. Rows that produce the same name overwrite each other.
pub fn copy_rename(
    source_file: &Path,
    rows: &[Row],
    name_fields: &[String],
    dest_dir: &Path,
) -> Result<Vec<PathBuf>, GraderError> {
    if !source_file.is_file() {
        return Err(GraderError::InvalidPath(source_file.to_path_buf()));
    }
    fs::create_dir_all(dest_dir).map_err(|err| GraderError::Filesystem(err.to_string()))?;
    let mut written = Vec::with_capacity(rows.len());
    for row in rows {
        let target = dest_dir.join(copy_rename_name(row, name_fields, source_file)?);
        fs::copy(source_file, &target).map_err(|err| {
            GraderError::Filesystem(format!("copy to {}: {err}", target.display()))
        })?;
        written.push(target);
    }
    tracing::info!(count = written.len(), dest = %dest_dir.display(), "copied files");
    Ok(written)
}

/// Returns the mapping keys that matched no file in `source_dir`.
pub fn sort_files(
    source_dir: &Path,
    dest_dir: &Path,
    mapping: &[(String, String)],
) -> Result<Vec<String>, GraderError> {
    Ok(sort_files_with(source_dir, dest_dir, mapping, &SubstringMatcher)?.missing)
}

pub fn sort_files_with(
    source_dir: &Path,
    dest_dir: &Path,
    mapping: &[(String, String)],
    matcher: &dyn IdentifierMatcher,
) -> Result<SortReport, GraderError> {
    if !source_dir.is_dir() {
        return Err(GraderError::InvalidPath(source_dir.to_path_buf()));
    }
    let files = list_files(source_dir)?;
    let mut report = SortReport::default();

    for (name, subfolder) in mapping {
        let folder = dest_dir.join(subfolder);
        fs::create_dir_all(&folder).map_err(|err| GraderError::Filesystem(err.to_string()))?;

        let matches: Vec<&PathBuf> = files
            .iter()
            .filter(|path| {
                path.file_name()
                    .and_then(|file_name| file_name.to_str())
                    .map(|file_name| matcher.matches(file_name, name))
                    .unwrap_or(false)
            })
            .collect();
        if matches.is_empty() {
            tracing::warn!(%name, "no files matched");
            report.missing.push(name.clone());
            continue;
        }
        for path in matches {
            let Some(file_name) = path.file_name() else {
                continue;
            };
            let target = folder.join(file_name);
            fs::copy(path, &target).map_err(|err| {
                GraderError::Filesystem(format!("copy to {}: {err}", target.display()))
            })?;
            report.copied.push(target);
        }
    }
    Ok(report)
}

/// Replaces internal LMS ids found in file names (as whole digit runs) with SIS ids.
pub fn rename_identifiers(dir: &Path, map: &IdentifierMap) -> Result<RenameReport, GraderError> {
    if !dir.is_dir() {
        return Err(GraderError::InvalidPath(dir.to_path_buf()));
    }
    let digits = Regex::new(r"\d+").map_err(|err| GraderError::InvalidPattern(err.to_string()))?;
    let mut report = RenameReport::default();

    for path in list_files(dir)? {
        let Some(name) = path.file_name().and_then(|name| name.to_str()) else {
            continue;
        };
        let renamed = digits.replace_all(name, |caps: &regex::Captures<'_>| {
            let run = &caps[0];
            map.get(run).unwrap_or(run).to_string()
        });
        if renamed == name {
            report.unmatched.push(name.to_string());
            continue;
        }
        let target = dir.join(renamed.as_ref());
        if target.exists() {
            report.conflicts.push(name.to_string());
            continue;
        }
        fs::rename(&path, &target).map_err(|err| GraderError::Filesystem(err.to_string()))?;
        report.renamed.push((name.to_string(), renamed.into_owned()));
    }
    Ok(report)
}

pub fn extract_zip(zip_path: &Path, target_dir: &Path) -> Result<usize, GraderError> {
    let file = fs::File::open(zip_path)
        .map_err(|err| GraderError::Filesystem(format!("open zip {}: {err}", zip_path.display())))?;
    let mut archive =
        ZipArchive::new(file).map_err(|err| GraderError::Filesystem(err.to_string()))?;

    let mut extracted = 0usize;
    for i in 0..archive.len() {
        let mut entry = archive
            .by_index(i)
            .map_err(|err| GraderError::Filesystem(err.to_string()))?;
        let entry_path = match entry.enclosed_name() {
            Some(path) => target_dir.join(path),
            None => {
                return Err(GraderError::Filesystem(
                    "zip entry path traversal detected".to_string(),
                ));
            }
        };

        if entry.is_dir() {
            fs::create_dir_all(&entry_path)
                .map_err(|err| GraderError::Filesystem(err.to_string()))?;
            continue;
        }

        if let Some(parent) = entry_path.parent() {
            fs::create_dir_all(parent).map_err(|err| GraderError::Filesystem(err.to_string()))?;
        }
        let mut outfile = fs::File::create(&entry_path)
            .map_err(|err| GraderError::Filesystem(err.to_string()))?;
        io::copy(&mut entry, &mut outfile)
            .map_err(|err| GraderError::Filesystem(err.to_string()))?;
        extracted += 1;
    }
    Ok(extracted)
}

fn list_files(dir: &Path) -> Result<Vec<PathBuf>, GraderError> {
    let entries = fs::read_dir(dir)
        .map_err(|err| GraderError::Filesystem(format!("read dir {}: {err}", dir.display())))?;
    let mut files = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|err| GraderError::Filesystem(err.to_string()))?;
        let path = entry.path();
        if path.is_file() {
            files.push(path);
        }
    }
    Ok(files)
}
