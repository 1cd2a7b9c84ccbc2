use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::Serialize;

/// One logical album: every folder with the same leaf name across all archives.
#[derive(Debug, Clone)]
pub struct Album {
    pub name: String,
    /// Source folders in archive iteration order
    pub paths: Vec<PathBuf>,
}

/// Album name -> source folders, in discovery order.
#[derive(Debug, Clone, Default)]
pub struct AlbumPaths {
    albums: Vec<Album>,
    index: HashMap<String, usize>,
}

impl AlbumPaths {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a folder to the album with this name, creating the album on first sight.
    pub fn insert(&mut self, name: &str, path: PathBuf) {
        match self.index.get(name) {
            Some(&i) => self.albums[i].paths.push(path),
            None => {
                self.index.insert(name.to_string(), self.albums.len());
                self.albums.push(Album {
                    name: name.to_string(),
                    paths: vec![path],
                });
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<&[PathBuf]> {
        self.index.get(name).map(|&i| self.albums[i].paths.as_slice())
    }

    pub fn iter(&self) -> impl Iterator<Item = &Album> {
        self.albums.iter()
    }

    pub fn len(&self) -> usize {
        self.albums.len()
    }

    pub fn is_empty(&self) -> bool {
        self.albums.is_empty()
    }
}

/// A physical media file belonging to a logical asset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AssetInstance {
    pub path: PathBuf,
    pub album: String,
    pub file_name: String,
    pub edited: bool,
}

/// Everything found for one asset key: at most one sidecar, any number of media files.
#[derive(Debug, Clone, Default, Serialize)]
pub struct AssetEntry {
    pub meta_path: Option<PathBuf>,
    pub instances: Vec<AssetInstance>,
}

impl AssetEntry {
    pub fn meta_path(&self) -> Option<&Path> {
        self.meta_path.as_deref()
    }
}

/// Asset key -> entry, iterated in first-sighting order.
#[derive(Debug, Clone, Default)]
pub struct AssetMap {
    entries: Vec<(String, AssetEntry)>,
    index: HashMap<String, usize>,
}

impl AssetMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&AssetEntry> {
        self.index.get(key).map(|&i| &self.entries[i].1)
    }

    /// Entry for `key`, created empty if this is the first sighting.
    pub fn entry_mut(&mut self, key: &str) -> &mut AssetEntry {
        let i = match self.index.get(key) {
            Some(&i) => i,
            None => {
                let i = self.entries.len();
                self.index.insert(key.to_string(), i);
                self.entries.push((key.to_string(), AssetEntry::default()));
                i
            }
        };
        &mut self.entries[i].1
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &AssetEntry)> {
        self.entries.iter().map(|(k, e)| (k.as_str(), e))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
