//! Location of the external metadata tools.
//!
//! Resolution order: environment variable override, a copy next to the
//! running executable, then plain PATH lookup.

use std::env;
use std::path::PathBuf;

pub const EXIFTOOL_ENV: &str = "GPEM_EXIFTOOL_PATH";
pub const FFMPEG_ENV: &str = "GPEM_FFMPEG_PATH";

fn exe_dir() -> Option<PathBuf> {
    env::current_exe()
        .ok()
        .and_then(|p| p.parent().map(|d| d.to_path_buf()))
}

fn executable_name(name: &str) -> String {
    if cfg!(windows) && !name.to_lowercase().ends_with(".exe") {
        format!("{}.exe", name)
    } else {
        name.to_string()
    }
}

fn resolve_tool(env_key: &str, default_name: &str) -> PathBuf {
    if let Ok(v) = env::var(env_key) {
        let p = PathBuf::from(v);
        if p.exists() {
            return p;
        }
        tracing::warn!("{} points to a missing file, falling back", env_key);
    }

    let filename = executable_name(default_name);
    if let Some(dir) = exe_dir() {
        let candidate = dir.join(&filename);
        if candidate.exists() {
            return candidate;
        }
    }

    PathBuf::from(default_name)
}

pub fn exiftool_path() -> PathBuf {
    resolve_tool(EXIFTOOL_ENV, "exiftool")
}

pub fn ffmpeg_path() -> PathBuf {
    resolve_tool(FFMPEG_ENV, "ffmpeg")
}
