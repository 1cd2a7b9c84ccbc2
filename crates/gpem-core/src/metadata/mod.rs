//! Metadata writers: the in-process EXIF codec for still images and the
//! external tools used for everything the codec cannot rewrite.

pub mod exif_codec;
pub mod exiftool;
pub mod ffmpeg;
pub mod tools;

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::geo::GeoData;

pub use exif_codec::{ExifError, ExifTags, ImageKind};
pub use exiftool::ExifTool;
pub use ffmpeg::FfMetadata;

/// Flat tag name to value map exchanged with the external tools.
pub type TagMap = BTreeMap<String, String>;

/// Container tag holding the ISO 6709 location of a video.
pub const LOCATION_TAG: &str = "location";

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("failed to run {tool}: {source}")]
    Spawn {
        tool: String,
        #[source]
        source: io::Error,
    },

    #[error("{tool} exited with {code:?} on {path}: {stderr}")]
    Failed {
        tool: String,
        path: PathBuf,
        code: Option<i32>,
        stderr: String,
    },

    #[error("unexpected output from {tool}: {message}")]
    Output { tool: String, message: String },

    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Read/modify/write tag access for formats the EXIF codec does not rewrite
/// (PNG stills and video containers in the date repair pass).
pub trait GenericMetadataTool: Send + Sync {
    fn read(&self, path: &Path) -> Result<TagMap, ToolError>;
    fn write(&self, path: &Path, tags: &TagMap) -> Result<(), ToolError>;
}

/// Container-level metadata of video files.
pub trait ContainerMetadataTool: Send + Sync {
    fn read(&self, path: &Path) -> Result<TagMap, ToolError>;
    fn write(&self, path: &Path, tags: &TagMap) -> Result<(), ToolError>;
}

/// Store a GPS position in the `location` tag of a video, keeping its other tags.
pub fn add_gps_to_movie(
    tool: &dyn ContainerMetadataTool,
    path: &Path,
    geo: &GeoData,
) -> Result<(), ToolError> {
    let mut tags = tool.read(path)?;
    tags.insert(LOCATION_TAG.to_string(), geo.iso6709());
    tool.write(path, &tags)
}

/// Temporary sibling used while rewriting `path`, keeping the extension so
/// tools that sniff the format by name still work.
pub(crate) fn temp_sibling(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!(".gpem-tmp-{}", name))
}

/// Replace a file's contents through a temporary sibling and a rename,
/// so a failed write never leaves a truncated file behind.
pub(crate) fn replace_file_contents(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let tmp = temp_sibling(path);
    if let Err(e) = fs::write(&tmp, bytes) {
        let _ = fs::remove_file(&tmp);
        return Err(e);
    }
    fs::rename(&tmp, path).map_err(|e| {
        let _ = fs::remove_file(&tmp);
        e
    })
}


#[cfg(test)]
mod tests {
    use super::fake::FakeTool;
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_add_gps_to_movie_keeps_existing_tags() {
        let tool = FakeTool::default();
        let path = Path::new("/out/clip.mp4");
        let mut existing = TagMap::new();
        existing.insert("title".into(), "Beach".into());
        ContainerMetadataTool::write(&tool, path, &existing).unwrap();

        add_gps_to_movie(&tool, path, &GeoData::new(10.5, 20.5, 5.0)).unwrap();

        let tags = tool.tags(path).unwrap();
        assert_eq!(tags["title"], "Beach");
        assert_eq!(tags[LOCATION_TAG], "+10.50000+20.50000+5.00000/");
    }

    #[test]
    fn test_add_gps_to_movie_propagates_failure() {
        let tool = FakeTool::failing_on("mov");
        let err = add_gps_to_movie(&tool, Path::new("a.mov"), &GeoData::new(1.0, 1.0, 1.0));
        assert!(matches!(err, Err(ToolError::Failed { .. })));
    }

    #[test]
    fn test_replace_file_contents() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a.jpg");
        fs::write(&path, b"old").unwrap();
        replace_file_contents(&path, b"new").unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"new");
        assert!(!temp_sibling(&path).exists());
    }

    #[test]
    fn test_temp_sibling_keeps_extension() {
        let tmp = temp_sibling(Path::new("/x/clip.MP4"));
        assert_eq!(tmp, Path::new("/x/.gpem-tmp-clip.MP4"));
    }
}
