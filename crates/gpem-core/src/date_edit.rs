//! Date repair for files that already sit in a date-sorted output tree.
//!
//! The first pass turns `toEdit.json` (date bucket -> file names) into an edit
//! list carrying the sidecar timestamps of each file. The second pass writes
//! those timestamps into `<root>/<date>/<file>`.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::Context;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::asset::AssetMap;
use crate::asset_key::KeyRule;
use crate::cancel::{CancellationToken, CancelledError};
use crate::error::StrictModeError;
use crate::metadata::{self, exif_codec, GenericMetadataTool, ImageKind, TagMap};
use crate::sidecar::{best_timestamp, to_local_datetime, Sidecar};
use crate::writer::set_mtime;
use crate::ThrottledProgress;

/// Tag written through the generic tool; exiftool expands it to every date tag.
pub const ALL_DATES_TAG: &str = "AllDates";

/// Date bucket -> file names, as read from `toEdit.json`.
pub type ToEdit = BTreeMap<String, Vec<String>>;

/// One record of `edit.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DateEdit {
    pub file: String,
    pub date: String,
    pub photo_taken_time: Option<i64>,
    pub creation_time: Option<i64>,
}

/// A file listed in `toEdit.json` whose asset has no sidecar.
#[derive(Debug, Clone, Serialize)]
pub struct MissingSidecar {
    pub file: String,
    pub date: String,
    pub key: String,
}

/// A file whose sidecar exists but could not be read or parsed.
#[derive(Debug, Clone, Serialize)]
pub struct UnreadableSidecar {
    pub file: String,
    pub date: String,
    pub meta_path: PathBuf,
    pub message: String,
}

#[derive(Debug, Default)]
pub struct PreparedEdits {
    pub edits: Vec<DateEdit>,
    pub missing: Vec<MissingSidecar>,
    pub unreadable: Vec<UnreadableSidecar>,
}

pub fn load_to_edit(path: &Path) -> anyhow::Result<ToEdit> {
    let file = File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    serde_json::from_reader(BufReader::new(file))
        .with_context(|| format!("failed to parse {}", path.display()))
}

pub fn load_edit_list(path: &Path) -> anyhow::Result<Vec<DateEdit>> {
    let file = File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    serde_json::from_reader(BufReader::new(file))
        .with_context(|| format!("failed to parse {}", path.display()))
}

pub fn write_edit_list(path: &Path, edits: &[DateEdit]) -> anyhow::Result<()> {
    let file =
        File::create(path).with_context(|| format!("failed to create {}", path.display()))?;
    serde_json::to_writer_pretty(BufWriter::new(file), edits)?;
    Ok(())
}

/// Look up the sidecar timestamps of every file in `to_edit`.
///
/// Keys are derived with the extension vocabulary of the listed files, not of
/// the album scan. Files whose asset has no sidecar are collected in
/// `missing`, files with a broken sidecar in `unreadable`; in strict mode
/// either one fails the whole pass.
pub fn prepare(
    to_edit: &ToEdit,
    assets: &AssetMap,
    edited_suffix: &str,
    strict: bool,
) -> anyhow::Result<PreparedEdits> {
    let files: Vec<(&str, &str)> = to_edit
        .iter()
        .flat_map(|(date, files)| files.iter().map(move |f| (date.as_str(), f.as_str())))
        .collect();
    let rule = KeyRule::from_file_names(files.iter().map(|(_, f)| *f), edited_suffix);

    let mut prepared = PreparedEdits::default();
    for (date, file) in files {
        let key = rule.normalize(file).key;
        let Some(meta_path) = assets.get(&key).and_then(|e| e.meta_path()) else {
            if strict {
                return Err(StrictModeError::MissingSidecar {
                    file: file.to_string(),
                    date: date.to_string(),
                    key,
                }
                .into());
            }
            warn!("No sidecar for {}/{} (key '{}')", date, file, key);
            prepared.missing.push(MissingSidecar {
                file: file.to_string(),
                date: date.to_string(),
                key,
            });
            continue;
        };

        let sidecar = match Sidecar::load(meta_path) {
            Ok(s) => s,
            Err(e) if strict => return Err(e),
            Err(e) => {
                error!("{:#}; no date edit for {}/{}", e, date, file);
                prepared.unreadable.push(UnreadableSidecar {
                    file: file.to_string(),
                    date: date.to_string(),
                    meta_path: meta_path.to_path_buf(),
                    message: format!("{:#}", e),
                });
                continue;
            }
        };
        prepared.edits.push(DateEdit {
            file: file.to_string(),
            date: date.to_string(),
            photo_taken_time: sidecar.photo_taken_timestamp(),
            creation_time: sidecar.creation_timestamp(),
        });
    }

    info!(
        "Prepared {} date edits ({} without sidecar, {} unreadable)",
        prepared.edits.len(),
        prepared.missing.len(),
        prepared.unreadable.len()
    );
    Ok(prepared)
}

/// How a file's dates are rewritten, chosen by extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DateWriter {
    Exif(ImageKind),
    Tool,
    Unsupported,
}

impl DateWriter {
    pub fn for_file(file: &str) -> Self {
        let ext = Path::new(file)
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("")
            .to_lowercase();
        match ext.as_str() {
            "jpg" | "jpeg" => Self::Exif(ImageKind::Jpeg),
            "png" | "mp4" | "mov" => Self::Tool,
            _ => Self::Unsupported,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ApplyFailure {
    pub path: PathBuf,
    pub message: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ApplyReport {
    pub total: u64,
    pub exif_written: u64,
    pub tool_written: u64,
    pub unsupported: u64,
    pub failures: Vec<ApplyFailure>,
}

enum Outcome {
    Exif,
    Tool,
    Unsupported,
    Cancelled,
}

fn apply_one(
    edit: &DateEdit,
    path: &Path,
    tool: &dyn GenericMetadataTool,
    set_file_times: bool,
) -> anyhow::Result<Outcome> {
    let taken = best_timestamp(edit.photo_taken_time, edit.creation_time);

    let outcome = match DateWriter::for_file(&edit.file) {
        DateWriter::Unsupported => return Ok(Outcome::Unsupported),
        DateWriter::Exif(kind) => {
            // both tags come from photoTakenTime only; creationTime is a tool-path fallback
            let Some(date) = edit
                .photo_taken_time
                .filter(|ts| *ts != 0)
                .and_then(to_local_datetime)
            else {
                anyhow::bail!("no photoTakenTime");
            };
            let bytes = fs::read(path)?;
            let out = exif_codec::write_dates(bytes, kind, &date, &date)?;
            metadata::replace_file_contents(path, &out)?;
            Outcome::Exif
        }
        DateWriter::Tool => {
            let Some(date) = taken.and_then(to_local_datetime) else {
                anyhow::bail!("no usable timestamp");
            };
            let current = tool.read(path)?;
            if let Some(previous) = current.get("DateTimeOriginal") {
                debug!("{}: replacing DateTimeOriginal {}", path.display(), previous);
            }
            let mut tags = TagMap::new();
            tags.insert(
                ALL_DATES_TAG.to_string(),
                date.format(exif_codec::EXIF_DATE_FORMAT).to_string(),
            );
            tool.write(path, &tags)?;
            Outcome::Tool
        }
    };

    if set_file_times {
        if let Some(ts) = taken {
            set_mtime(path, ts);
        }
    }
    Ok(outcome)
}

/// Rewrite the date tags of every file in the edit list under `root`.
///
/// Files are processed in parallel and every write is awaited; per-file
/// failures are collected, never fatal.
pub fn apply(
    edits: &[DateEdit],
    root: &Path,
    tool: &dyn GenericMetadataTool,
    set_file_times: bool,
    progress: &ThrottledProgress,
    cancel_token: Option<&CancellationToken>,
) -> anyhow::Result<ApplyReport> {
    let total = edits.len() as u64;
    let done = AtomicU64::new(0);

    let results: Vec<(PathBuf, anyhow::Result<Outcome>)> = edits
        .par_iter()
        .map(|edit| {
            let path = root.join(&edit.date).join(&edit.file);
            if cancel_token.is_some_and(|t| t.is_cancelled()) {
                return (path, Ok(Outcome::Cancelled));
            }
            debug!("Processing {}/{}...", edit.date, edit.file);
            let result = apply_one(edit, &path, tool, set_file_times);
            let n = done.fetch_add(1, Ordering::Relaxed);
            progress.report("dates", n, total, &edit.file);
            (path, result)
        })
        .collect();

    let mut report = ApplyReport {
        total,
        ..ApplyReport::default()
    };
    let mut cancelled = false;
    for (path, result) in results {
        match result {
            Ok(Outcome::Exif) => report.exif_written += 1,
            Ok(Outcome::Tool) => report.tool_written += 1,
            Ok(Outcome::Unsupported) => report.unsupported += 1,
            Ok(Outcome::Cancelled) => cancelled = true,
            Err(e) => {
                error!("Date repair failed for {}: {:#}", path.display(), e);
                report.failures.push(ApplyFailure {
                    path,
                    message: format!("{:#}", e),
                });
            }
        }
    }
    if cancelled {
        return Err(CancelledError.into());
    }

    info!(
        "Dates written: {} via EXIF, {} via tool, {} unsupported, {} failed",
        report.exif_written,
        report.tool_written,
        report.unsupported,
        report.failures.len()
    );
    Ok(report)
}
