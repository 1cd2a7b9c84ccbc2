use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::Serialize;

use crate::asset::AssetInstance;
use crate::reconcile::{AlbumScanError, ReconcileStats};
use crate::resolve::SkipReason;
use crate::writer::MaterializeReport;

/// An asset that was not materialized, with everything needed to sort it out by hand.
#[derive(Debug, Clone, Serialize)]
pub struct SkippedAsset {
    pub key: String,
    pub reasons: Vec<SkipReason>,
    pub meta_path: Option<PathBuf>,
    pub instances: Vec<AssetInstance>,
}

#[derive(Serialize)]
struct Summary<'a> {
    albums_scanned: u64,
    files_seen: u64,
    found_meta: u64,
    double_meta: u64,
    edited: u64,
    total_assets: u64,
    materialized: u64,
    no_meta: u64,
    no_album: u64,
    too_many_albums: u64,
    geo_data_set: u64,
    writing_exif_error: u64,
    video_gps_errors: u64,
    copy_errors: u64,
    destination_collisions: u64,
    album_errors: &'a [AlbumScanError],
}

#[derive(Serialize)]
struct SkipReport<'a> {
    summary: Summary<'a>,
    skipped: &'a [SkippedAsset],
}

/// Write the skipped-asset report as pretty-printed JSON.
pub fn write_skip_report(
    path: &Path,
    stats: &ReconcileStats,
    report: &MaterializeReport,
) -> anyhow::Result<()> {
    let json = SkipReport {
        summary: Summary {
            albums_scanned: stats.albums_scanned,
            files_seen: stats.files_seen,
            found_meta: stats.found_meta,
            double_meta: stats.double_meta,
            edited: stats.edited,
            total_assets: report.total_assets,
            materialized: report.materialized,
            no_meta: report.no_meta,
            no_album: report.no_album,
            too_many_albums: report.too_many_albums,
            geo_data_set: report.geo_data_set,
            writing_exif_error: report.writing_exif_error,
            video_gps_errors: report.video_gps_errors,
            copy_errors: report.copy_errors,
            destination_collisions: report.destination_collisions,
            album_errors: &stats.album_errors,
        },
        skipped: &report.skipped,
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let file = File::create(path)
        .with_context(|| format!("failed to create report {}", path.display()))?;
    serde_json::to_writer_pretty(BufWriter::new(file), &json)?;
    Ok(())
}
