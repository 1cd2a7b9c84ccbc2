use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Instant;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{error, info, warn};

use gpem_core::date_edit::{self, PreparedEdits};
use gpem_core::metadata::exif_codec::{self, ImageKind};
use gpem_core::metadata::{ExifTool, FfMetadata, GenericMetadataTool};
use gpem_core::{CancellationToken, CancelledError, ConfigError, ProcessControl, ProcessOptions};

#[derive(Parser)]
#[command(
    name = "gpem",
    version,
    about = "Google Photos export manager - sort an unzipped takeout into album folders and repair GPS/date metadata"
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    #[command(flatten)]
    common: CommonArgs,
}

#[derive(Args)]
struct CommonArgs {
    /// Directory containing the unzipped export archives
    #[arg(short, long, global = true)]
    input: Option<PathBuf>,

    /// Output directory
    #[arg(short, long, global = true)]
    output: Option<PathBuf>,

    /// Marker of auto-generated year albums
    #[arg(short, long = "yearAlbumPrefix", global = true, default_value = gpem_core::DEFAULT_YEAR_ALBUM_PREFIX)]
    year_album_prefix: String,

    /// Album names that never receive an asset
    #[arg(long = "ignoreAlbums", visible_alias = "ia", global = true, num_args = 1..)]
    ignore_albums: Vec<String>,

    /// Path from an archive root to its album folders, e.g. "Takeout/Google Fotos"
    #[arg(short, long = "exportSubPath", global = true)]
    export_sub_path: Vec<String>,

    /// Marker of edited file variants
    #[arg(long = "editedPrefix", visible_alias = "ep", global = true, allow_hyphen_values = true, default_value = gpem_core::DEFAULT_EDITED_SUFFIX)]
    edited_prefix: String,

    /// Name of the per-album metadata file
    #[arg(short, long = "metadataFileName", global = true, default_value = gpem_core::DEFAULT_METADATA_FILE_NAME)]
    metadata_file_name: String,

    /// Fail on duplicate sidecars, destination collisions and missing sidecars
    #[arg(long, global = true)]
    strict: bool,

    /// Leave modification times of written files untouched
    #[arg(long, global = true)]
    no_file_times: bool,

    /// Write a JSON report of every skipped asset
    #[arg(long, global = true)]
    report: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Command {
    /// Build the date edit list from toEdit.json and the export sidecars
    DatesPrepare {
        /// Date bucket -> file names
        #[arg(long, default_value = "toEdit.json")]
        to_edit: PathBuf,

        /// Where to write the edit list
        #[arg(long, default_value = "edit.json")]
        edit_list: PathBuf,
    },
    /// Write the dates of an edit list into <root>/<date>/<file>
    DatesApply {
        #[arg(long, default_value = "edit.json")]
        edit_list: PathBuf,

        /// Date-sorted tree to repair (default: --output)
        #[arg(long)]
        root: Option<PathBuf>,
    },
    /// Print every EXIF field of a file
    Inspect { file: PathBuf },
}

/// Split each `-e` value on path separators so both `-e "Takeout/Google Fotos"`
/// and `-e Takeout -e "Google Fotos"` work.
fn split_sub_path(values: &[String]) -> Vec<String> {
    if values.is_empty() {
        return gpem_core::default_export_sub_path();
    }
    values
        .iter()
        .flat_map(|v| v.split(['/', '\\', std::path::MAIN_SEPARATOR]))
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

impl CommonArgs {
    fn options(&self) -> ProcessOptions {
        ProcessOptions {
            input: self.input.clone().unwrap_or_default(),
            output: self.output.clone().unwrap_or_default(),
            year_album_prefix: self.year_album_prefix.clone(),
            ignore_albums: self.ignore_albums.clone(),
            export_sub_path: split_sub_path(&self.export_sub_path),
            edited_suffix: self.edited_prefix.clone(),
            metadata_file_name: self.metadata_file_name.clone(),
            strict: self.strict,
            set_file_times: !self.no_file_times,
            report: self.report.clone(),
        }
    }
}

/// Stderr writer that clears the progress bar while a log line is printed.
struct BarWriter(ProgressBar);

impl Write for BarWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.suspend(|| io::stderr().write_all(buf))?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        io::stderr().flush()
    }
}

fn init_tracing(pb: &ProgressBar) {
    let pb = pb.clone();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "gpem=info,gpem_core=info".into()),
        )
        .with_writer(move || BarWriter(pb.clone()))
        .with_target(false)
        .init();
}

fn progress_bar() -> ProgressBar {
    let pb = ProgressBar::new(0);
    if let Ok(style) = ProgressStyle::default_bar().template("{prefix:>12} [{bar:40}] {pos}/{len} {wide_msg}") {
        pb.set_style(style);
    }
    pb
}

/// Progress callback driving the shared bar.
fn bar_callback(pb: &ProgressBar) -> impl Fn(&str, u64, u64, &str) + Send + Sync + 'static {
    let pb = pb.clone();
    move |stage: &str, current: u64, total: u64, message: &str| {
        pb.set_prefix(stage.to_string());
        pb.set_length(total);
        pb.set_position(current);
        pb.set_message(message.to_string());
    }
}

fn cancel_on_ctrlc() -> CancellationToken {
    let token = CancellationToken::new();
    let handler_token = token.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        warn!("Interrupted, stopping after the current file...");
        handler_token.cancel();
    }) {
        warn!("Cannot install Ctrl-C handler: {}", e);
    }
    token
}

fn exit_code(err: &anyhow::Error) -> u8 {
    if err.downcast_ref::<CancelledError>().is_some() {
        130
    } else if err.downcast_ref::<ConfigError>().is_some() {
        1
    } else {
        2
    }
}

fn organize(common: &CommonArgs, control: &ProcessControl, pb: &ProgressBar) -> anyhow::Result<()> {
    let options = common.options();
    let t_total = Instant::now();

    let result = gpem_core::process_with_control(&options, control, &bar_callback(pb))?;
    pb.finish_and_clear();

    let r = &result.materialize;
    info!(
        "Done! {} assets, {} materialized, {} skipped ({:.2}s)",
        r.total_assets,
        r.materialized,
        r.skipped.len(),
        t_total.elapsed().as_secs_f64()
    );
    Ok(())
}

fn dates_prepare(common: &CommonArgs, to_edit: &Path, edit_list: &Path, pb: &ProgressBar) -> anyhow::Result<()> {
    let options = common.options();
    let to_edit = date_edit::load_to_edit(to_edit)?;

    let PreparedEdits {
        edits,
        missing,
        unreadable,
    } = gpem_core::prepare_date_edits(&options, &to_edit, &bar_callback(pb))?;
    pb.finish_and_clear();

    date_edit::write_edit_list(edit_list, &edits)?;
    info!(
        "Wrote {} records to {} ({} files without sidecar, {} with unreadable sidecar)",
        edits.len(),
        edit_list.display(),
        missing.len(),
        unreadable.len()
    );
    Ok(())
}

fn dates_apply(
    common: &CommonArgs,
    edit_list: &Path,
    root: Option<&Path>,
    control: &ProcessControl,
    pb: &ProgressBar,
) -> anyhow::Result<()> {
    let root = root
        .or(common.output.as_deref())
        .ok_or(ConfigError::MissingOption("root"))?;
    let edits = date_edit::load_edit_list(edit_list)?;
    let tool = ExifTool::new();

    let report = gpem_core::apply_date_edits(
        &edits,
        root,
        &tool,
        !common.no_file_times,
        control,
        &bar_callback(pb),
    )?;
    pb.finish_and_clear();

    for failure in &report.failures {
        error!("{}: {}", failure.path.display(), failure.message);
    }
    info!(
        "Done! {} records, {} failed",
        report.total,
        report.failures.len()
    );
    Ok(())
}

fn inspect(file: &Path) -> anyhow::Result<()> {
    if ImageKind::from_path(file).is_some() {
        let bytes = std::fs::read(file).with_context(|| format!("failed to read {}", file.display()))?;
        let fields = exif_codec::describe(&bytes)?;
        if fields.is_empty() {
            println!("{}: no EXIF data", file.display());
        }
        for f in fields {
            println!("{:<10} {:<32} {}", f.ifd, f.tag, f.value);
        }
    } else {
        for (tag, value) in ExifTool::new().read(file)? {
            println!("{:<32} {}", tag, value);
        }
    }
    Ok(())
}

fn run(cli: Cli, pb: &ProgressBar) -> anyhow::Result<()> {
    let control = ProcessControl::new()
        .with_cancel_token(cancel_on_ctrlc())
        .with_container_tool(std::sync::Arc::new(FfMetadata::new()));

    match &cli.command {
        None => organize(&cli.common, &control, pb),
        Some(Command::DatesPrepare { to_edit, edit_list }) => {
            dates_prepare(&cli.common, to_edit, edit_list, pb)
        }
        Some(Command::DatesApply { edit_list, root }) => {
            dates_apply(&cli.common, edit_list, root.as_deref(), &control, pb)
        }
        Some(Command::Inspect { file }) => inspect(file),
    }
}

fn main() -> ExitCode {
    let pb = progress_bar();
    init_tracing(&pb);
    let cli = Cli::parse();

    match run(cli, &pb) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::from(exit_code(&e))
        }
    }
}
