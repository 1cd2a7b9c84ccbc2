use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::asset::{AssetInstance, AssetMap};
use crate::cancel::CancellationToken;
use crate::error::StrictModeError;
use crate::metadata::{self, exif_codec, ContainerMetadataTool, ImageKind};
use crate::report::SkippedAsset;
use crate::resolve::{resolve, Resolution, SkipReason};
use crate::sidecar::Sidecar;
use crate::{ProcessOptions, ThrottledProgress};

/// Extensions whose GPS position is embedded through the EXIF codec.
pub const EXIF_GPS_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png"];

/// Video containers whose GPS position goes through the container tool.
pub const VIDEO_EXTENSIONS: &[&str] = &["mp4", "mov"];

pub const ALBUM_DIR: &str = "Album";
pub const NO_ALBUM_DIR: &str = "No Album";

/// Outcome counters of the materialization pass.
#[derive(Debug, Clone, Default, Serialize)]
pub struct MaterializeReport {
    pub total_assets: u64,
    pub materialized: u64,
    pub no_meta: u64,
    pub no_album: u64,
    pub too_many_albums: u64,
    pub geo_data_set: u64,
    pub writing_exif_error: u64,
    pub video_gps_written: u64,
    pub video_gps_errors: u64,
    pub gps_skipped: u64,
    pub sidecar_errors: u64,
    pub copy_errors: u64,
    pub destination_collisions: u64,
    pub skipped: Vec<SkippedAsset>,
}

impl MaterializeReport {
    fn count_skip(&mut self, reasons: &[SkipReason]) {
        for reason in reasons {
            match reason {
                SkipReason::NoMetadata => self.no_meta += 1,
                SkipReason::NoAlbum => self.no_album += 1,
                SkipReason::TooManyAlbums => self.too_many_albums += 1,
            }
        }
    }

    pub fn log_summary(&self) {
        info!("{} assets, {} materialized.", self.total_assets, self.materialized);
        info!("No metadata: {}", self.no_meta);
        info!("No album: {}", self.no_album);
        info!("Too many albums: {}", self.too_many_albums);
        info!("GeoData set: {}", self.geo_data_set);
        info!("Writing EXIF errors: {}", self.writing_exif_error);
        if self.video_gps_written + self.video_gps_errors > 0 {
            info!(
                "Video GPS: {} written, {} failed",
                self.video_gps_written, self.video_gps_errors
            );
        }
        if self.copy_errors > 0 || self.sidecar_errors > 0 {
            warn!(
                "Copy errors: {}, unreadable sidecars: {}",
                self.copy_errors, self.sidecar_errors
            );
        }
        if self.destination_collisions > 0 {
            warn!("Destination collisions (overwritten): {}", self.destination_collisions);
        }
    }
}

/// Output folder for an asset resolved into `album`.
///
/// Albums carrying the year prefix are auto-generated and go to `No Album`;
/// every other album gets `Album/<name>`.
pub fn destination_dir(output: &Path, album: &str, year_album_prefix: &str) -> PathBuf {
    if album.starts_with(year_album_prefix) {
        output.join(NO_ALBUM_DIR)
    } else {
        output.join(ALBUM_DIR).join(album)
    }
}

fn lowercase_extension(path: &Path) -> String {
    path.extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_lowercase()
}

pub(crate) fn set_mtime(path: &Path, epoch: i64) {
    let ft = filetime::FileTime::from_unix_time(epoch, 0);
    if let Err(e) = filetime::set_file_mtime(path, ft) {
        warn!("Cannot set modification time of {}: {}", path.display(), e);
    }
}

struct Materializer<'a> {
    options: &'a ProcessOptions,
    container_tool: Option<&'a dyn ContainerMetadataTool>,
    report: MaterializeReport,
    created_dirs: HashSet<PathBuf>,
    written: HashMap<PathBuf, PathBuf>,
}

impl<'a> Materializer<'a> {
    fn skip(
        &mut self,
        key: &str,
        meta_path: Option<&Path>,
        reasons: Vec<SkipReason>,
        candidates: Vec<&AssetInstance>,
    ) {
        self.report.count_skip(&reasons);
        warn!(
            "Skipping '{}' ({:?}): sidecar {:?}, instances [{}]",
            key,
            reasons,
            meta_path,
            candidates
                .iter()
                .map(|i| i.path.display().to_string())
                .collect::<Vec<_>>()
                .join(", ")
        );
        self.report.skipped.push(SkippedAsset {
            key: key.to_string(),
            reasons,
            meta_path: meta_path.map(Path::to_path_buf),
            instances: candidates.into_iter().cloned().collect(),
        });
    }

    fn ensure_dir(&mut self, dir: &Path) -> anyhow::Result<()> {
        if !self.created_dirs.contains(dir) {
            fs::create_dir_all(dir)
                .with_context(|| format!("failed to create {}", dir.display()))?;
            self.created_dirs.insert(dir.to_path_buf());
        }
        Ok(())
    }

    /// Copy one resolved asset and repair its metadata. Only destination
    /// directory failures and strict-mode conflicts are returned as errors.
    fn materialize(&mut self, instance: &AssetInstance, meta_path: &Path) -> anyhow::Result<()> {
        let dir = destination_dir(
            &self.options.output,
            &instance.album,
            &self.options.year_album_prefix,
        );
        self.ensure_dir(&dir)?;
        let dest = dir.join(&instance.file_name);

        if let Some(previous) = self.written.get(&dest) {
            self.report.destination_collisions += 1;
            if self.options.strict {
                return Err(StrictModeError::DestinationCollision {
                    dest,
                    previous: previous.clone(),
                    incoming: instance.path.clone(),
                }
                .into());
            }
            warn!(
                "{} overwrites {} (previously from {})",
                instance.path.display(),
                dest.display(),
                previous.display()
            );
        }

        if let Err(e) = fs::copy(&instance.path, &dest) {
            error!(
                "Cannot copy {} to {}: {}",
                instance.path.display(),
                dest.display(),
                e
            );
            self.report.copy_errors += 1;
            return Ok(());
        }
        self.written.insert(dest.clone(), instance.path.clone());
        self.report.materialized += 1;

        let sidecar = match Sidecar::load(meta_path) {
            Ok(s) => s,
            Err(e) => {
                error!("{:#}; {} copied without metadata", e, dest.display());
                self.report.sidecar_errors += 1;
                return Ok(());
            }
        };

        if sidecar.geo_data.is_set() {
            self.report.geo_data_set += 1;
            self.write_gps(instance, meta_path, &dest, &sidecar);
        }

        if self.options.set_file_times {
            if let Some(ts) = sidecar.best_timestamp() {
                set_mtime(&dest, ts);
            }
        }
        Ok(())
    }

    fn write_gps(
        &mut self,
        instance: &AssetInstance,
        meta_path: &Path,
        dest: &Path,
        sidecar: &Sidecar,
    ) {
        let ext = lowercase_extension(dest);
        let geo = &sidecar.geo_data;

        if EXIF_GPS_EXTENSIONS.contains(&ext.as_str()) {
            let result = ImageKind::from_extension(&ext)
                .ok_or_else(|| anyhow::anyhow!("no EXIF container for .{}", ext))
                .and_then(|kind| {
                    let bytes = fs::read(dest)?;
                    let out = exif_codec::write_gps(bytes, kind, geo)?;
                    metadata::replace_file_contents(dest, &out)?;
                    Ok(())
                });
            match result {
                Ok(()) => debug!("GPS written to {}", dest.display()),
                Err(e) => {
                    error!(
                        "Writing EXIF failed for {} (sidecar {}): {:#}; keeping plain copy",
                        instance.path.display(),
                        meta_path.display(),
                        e
                    );
                    self.report.writing_exif_error += 1;
                }
            }
        } else if VIDEO_EXTENSIONS.contains(&ext.as_str()) {
            let Some(tool) = self.container_tool else {
                warn!("No container tool configured, GPS skipped for {}", dest.display());
                self.report.gps_skipped += 1;
                return;
            };
            match metadata::add_gps_to_movie(tool, dest, geo) {
                Ok(()) => self.report.video_gps_written += 1,
                Err(e) => {
                    error!(
                        "Writing video GPS failed for {} (sidecar {}): {}",
                        instance.path.display(),
                        meta_path.display(),
                        e
                    );
                    self.report.video_gps_errors += 1;
                }
            }
        } else {
            info!("GPS embedding skipped for {} (.{})", dest.display(), ext);
            self.report.gps_skipped += 1;
        }
    }
}

/// Resolve every asset and copy the suitable ones into the output tree.
pub fn materialize_assets(
    assets: &AssetMap,
    options: &ProcessOptions,
    container_tool: Option<&dyn ContainerMetadataTool>,
    progress: &ThrottledProgress,
    cancel_token: Option<&CancellationToken>,
) -> anyhow::Result<MaterializeReport> {
    fs::create_dir_all(&options.output)
        .with_context(|| format!("failed to create {}", options.output.display()))?;

    let mut m = Materializer {
        options,
        container_tool,
        report: MaterializeReport {
            total_assets: assets.len() as u64,
            ..MaterializeReport::default()
        },
        created_dirs: HashSet::new(),
        written: HashMap::new(),
    };
    let total = assets.len() as u64;

    for (i, (key, entry)) in assets.iter().enumerate() {
        if let Some(token) = cancel_token {
            token.check()?;
        }
        progress.report("materialize", i as u64, total, key);

        match resolve(entry, &options.ignore_albums) {
            Resolution::Suitable {
                instance,
                meta_path,
            } => m.materialize(instance, meta_path)?,
            Resolution::Unsuitable {
                reasons,
                candidates,
            } => m.skip(key, entry.meta_path(), reasons, candidates),
        }
    }
    progress.report("materialize", total, total, "Done");

    m.report.log_summary();
    Ok(m.report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asset::AssetEntry;
    use crate::metadata::fake::FakeTool;
    use crate::metadata::LOCATION_TAG;
    use std::io::Cursor;
    use tempfile::{tempdir, TempDir};

    fn silent(_: &str, _: u64, _: u64, _: &str) {}

    fn tiny_jpeg() -> Vec<u8> {
        let img = image::RgbImage::from_pixel(2, 2, image::Rgb([10, 20, 30]));
        let mut buf = Cursor::new(Vec::new());
        image::DynamicImage::ImageRgb8(img)
            .write_to(&mut buf, image::ImageFormat::Jpeg)
            .unwrap();
        buf.into_inner()
    }

    struct Fixture {
        input: TempDir,
        output: TempDir,
        assets: AssetMap,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                input: tempdir().unwrap(),
                output: tempdir().unwrap(),
                assets: AssetMap::new(),
            }
        }

        fn add(&mut self, key: &str, album: &str, file: &str, bytes: &[u8], sidecar: Option<&str>) {
            let dir = self.input.path().join(album);
            fs::create_dir_all(&dir).unwrap();
            let path = dir.join(file);
            fs::write(&path, bytes).unwrap();
            let entry = self.assets.entry_mut(key);
            if let Some(json) = sidecar {
                let meta = dir.join(format!("{}.json", file));
                fs::write(&meta, json).unwrap();
                entry.meta_path.get_or_insert(meta);
            }
            entry.instances.push(AssetInstance {
                path,
                album: album.to_string(),
                file_name: file.to_string(),
                edited: false,
            });
        }

        fn options(&self) -> ProcessOptions {
            ProcessOptions {
                input: self.input.path().to_path_buf(),
                output: self.output.path().to_path_buf(),
                ..ProcessOptions::default()
            }
        }

        fn run(
            &self,
            options: &ProcessOptions,
            tool: Option<&dyn ContainerMetadataTool>,
        ) -> anyhow::Result<MaterializeReport> {
            let tp = ThrottledProgress::new(&silent);
            materialize_assets(&self.assets, options, tool, &tp, None)
        }
    }

    const GEO: &str = r#"{"geoData": {"latitude": 10.5, "longitude": 20.5, "altitude": 5.0},
        "photoTakenTime": {"timestamp": "1600000000"}}"#;
    const NO_GEO: &str = r#"{"geoData": {"latitude": 0.0, "longitude": 0.0, "altitude": 0.0}}"#;

    #[test]
    fn test_destination_dir_polarity() {
        let out = Path::new("/out");
        assert_eq!(
            destination_dir(out, "Photos from 2020", "Photos from"),
            Path::new("/out/No Album")
        );
        assert_eq!(
            destination_dir(out, "Summer", "Photos from"),
            Path::new("/out/Album/Summer")
        );
    }

    #[test]
    fn test_plain_copy_without_geo() {
        let mut f = Fixture::new();
        f.add("A", "Photos from 2020", "A.jpg", b"not really a jpeg", Some(NO_GEO));
        let report = f.run(&f.options(), None).unwrap();

        assert_eq!(report.materialized, 1);
        assert_eq!(report.geo_data_set, 0);
        let out = fs::read(f.output.path().join("No Album/A.jpg")).unwrap();
        assert_eq!(out, b"not really a jpeg");
    }

    #[test]
    fn test_broken_jpeg_keeps_plain_copy() {
        let mut f = Fixture::new();
        f.add("A", "Trip", "A.jpg", b"broken", Some(GEO));
        let report = f.run(&f.options(), None).unwrap();

        assert_eq!(report.geo_data_set, 1);
        assert_eq!(report.writing_exif_error, 1);
        assert_eq!(fs::read(f.output.path().join("Album/Trip/A.jpg")).unwrap(), b"broken");
    }

    #[test]
    fn test_gps_and_mtime_on_jpeg() {
        let mut f = Fixture::new();
        f.add("A", "Trip", "A.jpg", &tiny_jpeg(), Some(GEO));
        let report = f.run(&f.options(), None).unwrap();
        assert_eq!(report.writing_exif_error, 0);

        let dest = f.output.path().join("Album/Trip/A.jpg");
        let tags = exif_codec::ExifTags::load(&fs::read(&dest).unwrap()).unwrap();
        assert!(tags.get(exif::Tag::GPSLatitude).is_some());

        let mtime = filetime::FileTime::from_last_modification_time(&fs::metadata(&dest).unwrap());
        assert_eq!(mtime.unix_seconds(), 1600000000);
    }

    #[test]
    fn test_video_gps_goes_through_container_tool() {
        let mut f = Fixture::new();
        f.add("V", "Trip", "V.mp4", b"video", Some(GEO));
        f.add("W", "Trip", "W.mov", b"video", Some(GEO));
        let tool = FakeTool::failing_on("mov");
        let report = f.run(&f.options(), Some(&tool)).unwrap();

        assert_eq!(report.video_gps_written, 1);
        assert_eq!(report.video_gps_errors, 1);
        let tags = tool.tags(&f.output.path().join("Album/Trip/V.mp4")).unwrap();
        assert_eq!(tags[LOCATION_TAG], "+10.50000+20.50000+5.00000/");
    }

    #[test]
    fn test_unsupported_extension_skips_gps() {
        let mut f = Fixture::new();
        f.add("G", "Trip", "G.gif", b"gif", Some(GEO));
        let report = f.run(&f.options(), None).unwrap();
        assert_eq!(report.gps_skipped, 1);
        assert_eq!(fs::read(f.output.path().join("Album/Trip/G.gif")).unwrap(), b"gif");
    }

    #[test]
    fn test_unsuitable_assets_are_reported() {
        let mut f = Fixture::new();
        f.add("M", "Trip", "M.jpg", b"m", None);
        for album in ["A", "B", "C"] {
            f.add("X", album, "X.jpg", b"x", Some(NO_GEO));
        }
        let report = f.run(&f.options(), None).unwrap();

        assert_eq!(report.materialized, 0);
        assert_eq!(report.no_meta, 1);
        assert_eq!(report.too_many_albums, 1);
        assert_eq!(report.skipped.len(), 2);
        assert_eq!(report.skipped[1].instances.len(), 3);
        assert!(!f.output.path().join("Album").exists());
    }

    #[test]
    fn test_destination_collision_counts_or_fails() {
        let mut f = Fixture::new();
        f.add("A", "Trip", "same.jpg", b"first", Some(NO_GEO));
        // distinct keys sharing one destination file name
        f.add("B", "Trip", "same.jpg", b"second", Some(NO_GEO));

        let report = f.run(&f.options(), None).unwrap();
        assert_eq!(report.destination_collisions, 1);

        let strict = ProcessOptions {
            strict: true,
            ..f.options()
        };
        let err = f.run(&strict, None).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<StrictModeError>(),
            Some(StrictModeError::DestinationCollision { .. })
        ));
    }

    #[test]
    fn test_unreadable_sidecar_keeps_copy() {
        let mut f = Fixture::new();
        f.add("A", "Trip", "A.jpg", b"a", Some("{ not json"));
        let report = f.run(&f.options(), None).unwrap();
        assert_eq!(report.materialized, 1);
        assert_eq!(report.sidecar_errors, 1);
    }

    #[test]
    fn test_cancelled_before_first_asset() {
        let mut f = Fixture::new();
        f.add("A", "Trip", "A.jpg", b"a", Some(NO_GEO));
        let token = CancellationToken::new();
        token.cancel();
        let tp = ThrottledProgress::new(&silent);
        let err = materialize_assets(&f.assets, &f.options(), None, &tp, Some(&token)).unwrap_err();
        assert!(err.downcast_ref::<crate::cancel::CancelledError>().is_some());
    }

    #[test]
    fn test_entry_without_instances_is_not_materialized() {
        let mut f = Fixture::new();
        *f.assets.entry_mut("lonely") = AssetEntry {
            meta_path: Some(PathBuf::from("/x.json")),
            instances: vec![],
        };
        let report = f.run(&f.options(), None).unwrap();
        assert_eq!(report.no_album, 1);
        assert_eq!(report.materialized, 0);
    }
}
