use std::fs::{self, DirEntry};
use std::io;
use std::path::Path;

use anyhow::Context;
use tracing::{debug, info};

use crate::asset::AlbumPaths;
use crate::error::ConfigError;

/// Directory entries sorted by file name, so every scan visits files in the same order.
pub(crate) fn sorted_entries(dir: &Path) -> io::Result<Vec<DirEntry>> {
    let mut entries = fs::read_dir(dir)?.collect::<io::Result<Vec<_>>>()?;
    entries.sort_by_key(|e| e.file_name());
    Ok(entries)
}

/// Collect every album folder of every export archive under `input`.
///
/// Each directory directly inside `input` is one unzipped archive; its albums live
/// at `<archive>/<export_sub_path...>/<album>`. Albums with the same folder name in
/// several archives are merged, keeping archive order.
pub fn discover_albums(input: &Path, export_sub_path: &[String]) -> anyhow::Result<AlbumPaths> {
    info!("Collecting all albums...");

    let mut roots = Vec::new();
    for entry in sorted_entries(input)
        .with_context(|| format!("failed to list input directory {}", input.display()))?
    {
        if entry.path().is_dir() {
            roots.push(entry.path());
        } else {
            debug!("Ignoring non-directory {} in input", entry.path().display());
        }
    }

    if roots.is_empty() {
        return Err(ConfigError::NoArchives(input.to_path_buf()).into());
    }

    let mut albums = AlbumPaths::new();
    for root in &roots {
        let folder = export_sub_path
            .iter()
            .fold(root.clone(), |path, segment| path.join(segment));

        if !folder.is_dir() {
            return Err(ConfigError::MissingExportSubPath {
                root: root.clone(),
                sub_path: export_sub_path.join("/"),
            }
            .into());
        }

        let entries = sorted_entries(&folder)
            .with_context(|| format!("failed to list albums in {}", folder.display()))?;
        for entry in entries {
            // file_type() does not follow symlinks
            let is_dir = entry.file_type().map(|t| t.is_dir()).unwrap_or(false);
            if !is_dir {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            albums.insert(&name, entry.path());
        }
    }

    info!(
        "Found {} albums in {} archive(s)",
        albums.len(),
        roots.len()
    );
    Ok(albums)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use tempfile::tempdir;

    fn sub_path() -> Vec<String> {
        vec!["Takeout".to_string(), "Google Fotos".to_string()]
    }

    #[test]
    fn test_albums_merged_across_archives() {
        let dir = tempdir().unwrap();
        for archive in ["takeout-1", "takeout-2"] {
            let base = dir.path().join(archive).join("Takeout").join("Google Fotos");
            fs::create_dir_all(base.join("Trip")).unwrap();
            File::create(base.join("Metadaten.json")).unwrap();
        }
        fs::create_dir_all(
            dir.path()
                .join("takeout-2")
                .join("Takeout")
                .join("Google Fotos")
                .join("Photos from 2020"),
        )
        .unwrap();

        let albums = discover_albums(dir.path(), &sub_path()).unwrap();
        assert_eq!(albums.len(), 2);

        let trip = albums.get("Trip").unwrap();
        assert_eq!(trip.len(), 2);
        assert!(trip[0].starts_with(dir.path().join("takeout-1")));
        assert!(trip[1].starts_with(dir.path().join("takeout-2")));
        assert_eq!(albums.get("Photos from 2020").unwrap().len(), 1);
    }

    #[test]
    fn test_single_archive_gives_one_path_per_album() {
        let dir = tempdir().unwrap();
        let base = dir.path().join("takeout").join("Takeout").join("Google Fotos");
        for album in ["A", "B", "Photos from 2019"] {
            fs::create_dir_all(base.join(album)).unwrap();
        }

        let albums = discover_albums(dir.path(), &sub_path()).unwrap();
        assert_eq!(albums.len(), 3);
        assert!(albums.iter().all(|a| a.paths.len() == 1));
    }

    #[test]
    fn test_files_in_input_are_not_archives() {
        let dir = tempdir().unwrap();
        File::create(dir.path().join(".DS_Store")).unwrap();
        fs::create_dir_all(dir.path().join("t").join("Takeout").join("Google Fotos").join("A"))
            .unwrap();

        let albums = discover_albums(dir.path(), &sub_path()).unwrap();
        assert_eq!(albums.len(), 1);
    }

    #[test]
    fn test_missing_sub_path_is_config_error() {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join("t").join("Takeout").join("Google Photos")).unwrap();

        let err = discover_albums(dir.path(), &sub_path()).unwrap_err();
        match err.downcast_ref::<ConfigError>() {
            Some(ConfigError::MissingExportSubPath { sub_path, .. }) => {
                assert_eq!(sub_path, "Takeout/Google Fotos")
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_empty_input_is_config_error() {
        let dir = tempdir().unwrap();
        let err = discover_albums(dir.path(), &sub_path()).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ConfigError>(),
            Some(ConfigError::NoArchives(_))
        ));
    }
}
