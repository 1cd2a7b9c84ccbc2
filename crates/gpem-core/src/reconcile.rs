use std::io;
use std::path::PathBuf;

use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::album_scan::sorted_entries;
use crate::asset::{Album, AlbumPaths, AssetInstance, AssetMap};
use crate::asset_key::{KeyRule, NormalizedName};
use crate::error::StrictModeError;
use crate::{ProcessOptions, ThrottledProgress};

/// An album folder that could not be listed. The album is left out of the run.
#[derive(Debug, Clone, Serialize)]
pub struct AlbumScanError {
    pub album: String,
    pub path: PathBuf,
    pub message: String,
}

/// Diagnostic counters of one reconciliation pass.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ReconcileStats {
    pub albums_scanned: u64,
    pub files_seen: u64,
    pub found_meta: u64,
    pub double_meta: u64,
    pub edited: u64,
    pub album_errors: Vec<AlbumScanError>,
}

pub struct Reconciliation {
    pub assets: AssetMap,
    pub stats: ReconcileStats,
}

/// Albums in processing order: albums without the year prefix first, original order otherwise.
pub fn ordered_albums<'a>(albums: &'a AlbumPaths, year_album_prefix: &str) -> Vec<&'a Album> {
    let mut ordered: Vec<&Album> = albums.iter().collect();
    // stable sort: false (named album) before true (year album)
    ordered.sort_by_key(|a| !year_album_prefix.is_empty() && a.name.contains(year_album_prefix));
    ordered
}

/// List the files of every source folder of an album, skipping the album metadata file.
fn list_album_files(
    album: &Album,
    metadata_file_name: &str,
) -> Result<Vec<(String, PathBuf)>, (PathBuf, io::Error)> {
    let mut files = Vec::new();
    for dir in &album.paths {
        let entries = sorted_entries(dir).map_err(|e| (dir.clone(), e))?;
        for entry in entries {
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            let file_name = entry.file_name().to_string_lossy().into_owned();
            if file_name == metadata_file_name || file_name.starts_with('.') {
                continue;
            }
            files.push((file_name, path));
        }
    }
    Ok(files)
}

/// Group every file of every album into asset entries keyed by normalized file name.
pub fn reconcile(
    albums: &AlbumPaths,
    options: &ProcessOptions,
    progress: &ThrottledProgress,
) -> anyhow::Result<Reconciliation> {
    info!("Collecting asset to album assignments...");

    let mut assets = AssetMap::new();
    let mut stats = ReconcileStats::default();
    let ordered = ordered_albums(albums, &options.year_album_prefix);
    let total = ordered.len() as u64;

    for (i, album) in ordered.into_iter().enumerate() {
        progress.report("reconcile", i as u64, total, &album.name);
        debug!("Scraping {}...", album.name);

        let files = match list_album_files(album, &options.metadata_file_name) {
            Ok(files) => files,
            Err((path, e)) => {
                error!("Skipping album '{}': cannot read {}: {}", album.name, path.display(), e);
                stats.album_errors.push(AlbumScanError {
                    album: album.name.clone(),
                    path,
                    message: e.to_string(),
                });
                continue;
            }
        };
        stats.albums_scanned += 1;

        let rule = KeyRule::from_file_names(
            files.iter().map(|(name, _)| name.as_str()),
            &options.edited_suffix,
        );

        for (file_name, path) in files {
            stats.files_seen += 1;
            let is_meta = file_name.contains(".json");
            let NormalizedName { key, edited } = rule.normalize(&file_name);

            if is_meta && edited {
                debug!("Edited asset with sidecar: {}", path.display());
            }
            if is_meta {
                stats.found_meta += 1;
            }
            if edited {
                stats.edited += 1;
            }

            let entry = assets.entry_mut(&key);
            if is_meta {
                match &entry.meta_path {
                    None => entry.meta_path = Some(path),
                    Some(first) => {
                        stats.double_meta += 1;
                        if options.strict {
                            return Err(StrictModeError::DuplicateSidecar {
                                key,
                                first: first.clone(),
                                second: path,
                            }
                            .into());
                        }
                        warn!(
                            "Second sidecar for '{}' ignored: {} (keeping {})",
                            key,
                            path.display(),
                            first.display()
                        );
                    }
                }
            } else {
                entry.instances.push(AssetInstance {
                    path,
                    album: album.name.clone(),
                    file_name,
                    edited,
                });
            }
        }
    }
    progress.report("reconcile", total, total, "Albums scanned");

    info!("Found {} meta files.", stats.found_meta);
    info!("Found {} double meta files.", stats.double_meta);
    info!("{} assets are edited.", stats.edited);
    Ok(Reconciliation { assets, stats })
}
