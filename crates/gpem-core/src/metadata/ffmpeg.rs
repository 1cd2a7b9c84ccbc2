// ffmpeg wrapper for container-level (global) metadata of video files

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use super::{temp_sibling, tools, ContainerMetadataTool, TagMap, ToolError};

const TOOL: &str = "ffmpeg";

/// Reads global container tags as ffmetadata and rewrites them with a stream copy.
#[derive(Debug, Clone)]
pub struct FfMetadata {
    program: PathBuf,
}

impl Default for FfMetadata {
    fn default() -> Self {
        Self::new()
    }
}

impl FfMetadata {
    pub fn new() -> Self {
        Self::with_program(tools::ffmpeg_path())
    }

    pub fn with_program(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    fn run(&self, path: &Path, args: &[String]) -> Result<Vec<u8>, ToolError> {
        let output = Command::new(&self.program)
            .args(["-hide_banner", "-v", "error"])
            .args(args)
            .output()
            .map_err(|source| ToolError::Spawn {
                tool: TOOL.to_string(),
                source,
            })?;

        if !output.status.success() {
            return Err(ToolError::Failed {
                tool: TOOL.to_string(),
                path: path.to_path_buf(),
                code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(output.stdout)
    }
}

impl ContainerMetadataTool for FfMetadata {
    fn read(&self, path: &Path) -> Result<TagMap, ToolError> {
        let args = vec![
            "-i".to_string(),
            path.to_string_lossy().into_owned(),
            "-f".to_string(),
            "ffmetadata".to_string(),
            "-".to_string(),
        ];
        let stdout = self.run(path, &args)?;
        Ok(parse_ffmetadata(&String::from_utf8_lossy(&stdout)))
    }

    fn write(&self, path: &Path, tags: &TagMap) -> Result<(), ToolError> {
        let tmp = temp_sibling(path);
        let mut args = vec![
            "-y".to_string(),
            "-i".to_string(),
            path.to_string_lossy().into_owned(),
            "-map".to_string(),
            "0".to_string(),
            "-map_metadata".to_string(),
            "0".to_string(),
            "-c".to_string(),
            "copy".to_string(),
        ];
        for (k, v) in tags {
            args.push("-metadata".to_string());
            args.push(format!("{}={}", k, v));
        }
        args.push(tmp.to_string_lossy().into_owned());

        if let Err(e) = self.run(path, &args) {
            let _ = fs::remove_file(&tmp);
            return Err(e);
        }
        fs::rename(&tmp, path).map_err(|e| {
            let _ = fs::remove_file(&tmp);
            ToolError::Io(e)
        })
    }
}

/// Parse the global section of an ffmetadata document.
fn parse_ffmetadata(text: &str) -> TagMap {
    let mut tags = TagMap::new();
    let mut pending = String::new();

    for line in text.lines() {
        // a trailing backslash escapes the newline
        if let Some(stripped) = line.strip_suffix('\\') {
            if !stripped.ends_with('\\') {
                pending.push_str(stripped);
                pending.push('\n');
                continue;
            }
        }
        pending.push_str(line);
        let line = std::mem::take(&mut pending);

        if line.starts_with('[') {
            break; // stream and chapter sections follow
        }
        if line.starts_with(';') || line.starts_with('#') || line.is_empty() {
            continue;
        }
        if let Some((k, v)) = split_unescaped(&line) {
            tags.insert(unescape(k), unescape(v));
        }
    }
    tags
}

fn split_unescaped(line: &str) -> Option<(&str, &str)> {
    let mut escaped = false;
    for (i, c) in line.char_indices() {
        match c {
            '\\' if !escaped => escaped = true,
            '=' if !escaped => return Some((&line[..i], &line[i + 1..])),
            _ => escaped = false,
        }
    }
    None
}

fn unescape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            if let Some(next) = chars.next() {
                out.push(next);
            }
        } else {
            out.push(c);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_ffmetadata_global_section() {
        let text = ";FFMETADATA1\nmajor_brand=isom\ntitle=a\\=b\nlocation=+10.5000+020.5000/\n[STREAM]\ntitle=ignored\n";
        let tags = parse_ffmetadata(text);
        assert_eq!(tags.len(), 3);
        assert_eq!(tags["major_brand"], "isom");
        assert_eq!(tags["title"], "a=b");
        assert_eq!(tags["location"], "+10.5000+020.5000/");
    }

    #[test]
    fn test_parse_ffmetadata_multiline_value() {
        let text = ";FFMETADATA1\ncomment=line one\\\nline two\nartist=me\n";
        let tags = parse_ffmetadata(text);
        assert_eq!(tags["comment"], "line one\nline two");
        assert_eq!(tags["artist"], "me");
    }

    #[test]
    fn test_missing_program_is_spawn_error() {
        let tool = FfMetadata::with_program("/nonexistent/gpem-ffmpeg");
        let err = tool.read(Path::new("a.mp4")).unwrap_err();
        assert!(matches!(err, ToolError::Spawn { .. }));
    }
}
