use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::asset::{AssetEntry, AssetInstance};

/// Most candidate instances an asset may have and still be materialized.
pub const MAX_CANDIDATES: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SkipReason {
    NoMetadata,
    NoAlbum,
    TooManyAlbums,
}

#[derive(Debug)]
pub enum Resolution<'a> {
    Suitable {
        instance: &'a AssetInstance,
        meta_path: &'a Path,
    },
    Unsuitable {
        reasons: Vec<SkipReason>,
        candidates: Vec<&'a AssetInstance>,
    },
}

/// Instances that are not in an ignored album, in insertion order.
pub fn candidates<'a>(entry: &'a AssetEntry, ignore_albums: &[String]) -> Vec<&'a AssetInstance> {
    entry
        .instances
        .iter()
        .filter(|i| !ignore_albums.contains(&i.album))
        .collect()
}

/// Pick the album and file variant to materialize for one asset.
///
/// Edited variants take precedence over unedited ones; among the remaining
/// candidates the first one inserted wins.
pub fn resolve<'a>(entry: &'a AssetEntry, ignore_albums: &[String]) -> Resolution<'a> {
    let candidates = candidates(entry, ignore_albums);

    let chosen = if candidates.iter().any(|i| i.edited) {
        candidates.iter().copied().find(|i| i.edited)
    } else {
        candidates.first().copied()
    };

    let mut reasons = Vec::new();
    if entry.meta_path.is_none() {
        reasons.push(SkipReason::NoMetadata);
    }
    if chosen.is_none() {
        reasons.push(SkipReason::NoAlbum);
    }
    if candidates.len() > MAX_CANDIDATES {
        reasons.push(SkipReason::TooManyAlbums);
    }

    match (chosen, entry.meta_path(), reasons.is_empty()) {
        (Some(instance), Some(meta_path), true) => Resolution::Suitable {
            instance,
            meta_path,
        },
        _ => Resolution::Unsuitable {
            reasons,
            candidates,
        },
    }
}
