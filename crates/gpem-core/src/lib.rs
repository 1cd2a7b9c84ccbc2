pub mod album_scan;
pub mod asset;
pub mod asset_key;
pub mod cancel;
pub mod date_edit;
pub mod error;
pub mod geo;
pub mod metadata;
pub mod reconcile;
pub mod report;
pub mod resolve;
pub mod sidecar;
pub mod writer;

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::info;

pub use cancel::{CancellationToken, CancelledError};
pub use error::{ConfigError, StrictModeError};

use asset::AssetMap;
use date_edit::{ApplyReport, DateEdit, PreparedEdits, ToEdit};
use metadata::{ContainerMetadataTool, FfMetadata, GenericMetadataTool};
use reconcile::{ReconcileStats, Reconciliation};
use writer::MaterializeReport;

pub const DEFAULT_YEAR_ALBUM_PREFIX: &str = "Photos from";
pub const DEFAULT_EDITED_SUFFIX: &str = "-bearbeitet";
pub const DEFAULT_METADATA_FILE_NAME: &str = "Metadaten.json";

pub fn default_export_sub_path() -> Vec<String> {
    vec!["Takeout".to_string(), "Google Fotos".to_string()]
}

fn default_year_album_prefix() -> String {
    DEFAULT_YEAR_ALBUM_PREFIX.to_string()
}

fn default_edited_suffix() -> String {
    DEFAULT_EDITED_SUFFIX.to_string()
}

fn default_metadata_file_name() -> String {
    DEFAULT_METADATA_FILE_NAME.to_string()
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessOptions {
    /// Directory holding one unzipped export archive per sub-directory.
    pub input: PathBuf,
    pub output: PathBuf,
    #[serde(default = "default_year_album_prefix")]
    pub year_album_prefix: String,
    #[serde(default)]
    pub ignore_albums: Vec<String>,
    #[serde(default = "default_export_sub_path")]
    pub export_sub_path: Vec<String>,
    #[serde(default = "default_edited_suffix")]
    pub edited_suffix: String,
    #[serde(default = "default_metadata_file_name")]
    pub metadata_file_name: String,
    /// Fail on duplicate sidecars and destination collisions instead of counting them.
    #[serde(default)]
    pub strict: bool,
    #[serde(default = "default_true")]
    pub set_file_times: bool,
    /// Where to write the skipped-asset report.
    #[serde(default)]
    pub report: Option<PathBuf>,
}

impl Default for ProcessOptions {
    fn default() -> Self {
        Self {
            input: PathBuf::new(),
            output: PathBuf::new(),
            year_album_prefix: default_year_album_prefix(),
            ignore_albums: Vec::new(),
            export_sub_path: default_export_sub_path(),
            edited_suffix: default_edited_suffix(),
            metadata_file_name: default_metadata_file_name(),
            strict: false,
            set_file_times: true,
            report: None,
        }
    }
}

impl ProcessOptions {
    pub fn new(input: impl Into<PathBuf>, output: impl Into<PathBuf>) -> Self {
        Self {
            input: input.into(),
            output: output.into(),
            ..Self::default()
        }
    }

    pub fn validate_input(&self) -> Result<(), ConfigError> {
        if self.input.as_os_str().is_empty() {
            return Err(ConfigError::MissingOption("input"));
        }
        if !self.input.exists() {
            return Err(ConfigError::InputNotFound(self.input.clone()));
        }
        if !self.input.is_dir() {
            return Err(ConfigError::InputNotADirectory(self.input.clone()));
        }
        Ok(())
    }

    pub fn validate_output(&self) -> Result<(), ConfigError> {
        if self.output.as_os_str().is_empty() {
            return Err(ConfigError::MissingOption("output"));
        }
        if self.output.exists() && !self.output.is_dir() {
            return Err(ConfigError::OutputNotADirectory(self.output.clone()));
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.validate_input()?;
        self.validate_output()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ProcessResult {
    pub reconcile: ReconcileStats,
    pub materialize: MaterializeReport,
}

/// Runtime collaborators of a run that are not plain configuration.
#[derive(Clone, Default)]
pub struct ProcessControl {
    pub cancel_token: Option<CancellationToken>,
    /// Writes GPS into video containers. Without one, video GPS is skipped.
    pub container_tool: Option<Arc<dyn ContainerMetadataTool>>,
}

impl ProcessControl {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cancel_token(mut self, token: CancellationToken) -> Self {
        self.cancel_token = Some(token);
        self
    }

    pub fn with_container_tool(mut self, tool: Arc<dyn ContainerMetadataTool>) -> Self {
        self.container_tool = Some(tool);
        self
    }

    fn check_cancelled(&self) -> Result<(), CancelledError> {
        match &self.cancel_token {
            Some(token) => token.check(),
            None => Ok(()),
        }
    }
}

/// Type alias for progress callback: (stage, current, total, message).
pub type ProgressCallback = dyn Fn(&str, u64, u64, &str) + Send + Sync;

const PROGRESS_INTERVAL: Duration = Duration::from_millis(200);

/// Throttled progress reporter, emits at most every 200ms or on completion.
pub struct ThrottledProgress<'a> {
    inner: &'a ProgressCallback,
    last_emit: Mutex<Option<Instant>>,
}

impl<'a> ThrottledProgress<'a> {
    pub fn new(inner: &'a ProgressCallback) -> Self {
        Self {
            inner,
            last_emit: Mutex::new(None),
        }
    }

    pub fn report(&self, stage: &str, current: u64, total: u64, message: &str) {
        let is_done = current + 1 >= total;
        if !is_done {
            let Ok(mut last) = self.last_emit.lock() else {
                return;
            };
            if last.is_some_and(|t| t.elapsed() < PROGRESS_INTERVAL) {
                return;
            }
            *last = Some(Instant::now());
        }
        (self.inner)(stage, current, total, message);
    }
}

/// Discover albums and reconcile every file into asset entries.
pub fn load_assets(
    options: &ProcessOptions,
    progress: &ThrottledProgress,
) -> anyhow::Result<Reconciliation> {
    options.validate_input()?;
    let albums = album_scan::discover_albums(&options.input, &options.export_sub_path)?;
    reconcile::reconcile(&albums, options, progress)
}

/// Run the full pipeline, writing video GPS through ffmpeg.
pub fn process(
    options: &ProcessOptions,
    progress_callback: &ProgressCallback,
) -> anyhow::Result<ProcessResult> {
    let control = ProcessControl::new().with_container_tool(Arc::new(FfMetadata::new()));
    process_with_control(options, &control, progress_callback)
}

/// Run the full pipeline with explicit cancellation and tool choices.
pub fn process_with_control(
    options: &ProcessOptions,
    control: &ProcessControl,
    progress_callback: &ProgressCallback,
) -> anyhow::Result<ProcessResult> {
    let tp = ThrottledProgress::new(progress_callback);
    options.validate()?;
    control.check_cancelled()?;

    let Reconciliation { assets, stats } = load_assets(options, &tp)?;
    control.check_cancelled()?;

    let materialized = writer::materialize_assets(
        &assets,
        options,
        control.container_tool.as_deref(),
        &tp,
        control.cancel_token.as_ref(),
    )?;

    if let Some(path) = &options.report {
        report::write_skip_report(path, &stats, &materialized)?;
        info!("Skip report written to {}", path.display());
    }

    Ok(ProcessResult {
        reconcile: stats,
        materialize: materialized,
    })
}

/// First date-repair pass: resolve `toEdit` entries to their sidecar timestamps.
pub fn prepare_date_edits(
    options: &ProcessOptions,
    to_edit: &ToEdit,
    progress_callback: &ProgressCallback,
) -> anyhow::Result<PreparedEdits> {
    let tp = ThrottledProgress::new(progress_callback);
    let Reconciliation { assets, .. } = load_assets(options, &tp)?;
    prepare_date_edits_from(options, to_edit, &assets)
}

pub fn prepare_date_edits_from(
    options: &ProcessOptions,
    to_edit: &ToEdit,
    assets: &AssetMap,
) -> anyhow::Result<PreparedEdits> {
    date_edit::prepare(to_edit, assets, &options.edited_suffix, options.strict)
}

/// Second date-repair pass: write the dates into `<root>/<date>/<file>`.
pub fn apply_date_edits(
    edits: &[DateEdit],
    root: &Path,
    tool: &dyn GenericMetadataTool,
    set_file_times: bool,
    control: &ProcessControl,
    progress_callback: &ProgressCallback,
) -> anyhow::Result<ApplyReport> {
    let tp = ThrottledProgress::new(progress_callback);
    control.check_cancelled()?;
    date_edit::apply(
        edits,
        root,
        tool,
        set_file_times,
        &tp,
        control.cancel_token.as_ref(),
    )
}
