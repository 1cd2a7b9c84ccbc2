use std::path::PathBuf;

use thiserror::Error;

/// Problems with the run configuration. Always fatal, raised before any file is touched.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required option: {0}")]
    MissingOption(&'static str),

    #[error("input directory not found: {0}")]
    InputNotFound(PathBuf),

    #[error("input is not a directory: {0}")]
    InputNotADirectory(PathBuf),

    #[error("output exists and is not a directory: {0}")]
    OutputNotADirectory(PathBuf),

    #[error("no export archives found in {0}")]
    NoArchives(PathBuf),

    #[error("export sub-path '{sub_path}' not found in archive {root}")]
    MissingExportSubPath { root: PathBuf, sub_path: String },
}

/// Conflicts that are only counted by default and become fatal with `--strict`.
#[derive(Debug, Error)]
pub enum StrictModeError {
    #[error("asset '{key}' has more than one sidecar: {first} and {second}")]
    DuplicateSidecar {
        key: String,
        first: PathBuf,
        second: PathBuf,
    },

    #[error("destination {dest} was already written from {previous}, refusing to overwrite it with {incoming}")]
    DestinationCollision {
        dest: PathBuf,
        previous: PathBuf,
        incoming: PathBuf,
    },

    #[error("no sidecar found for {date}/{file} (asset key '{key}')")]
    MissingSidecar {
        file: String,
        date: String,
        key: String,
    },
}
