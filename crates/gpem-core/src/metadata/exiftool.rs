// ExifTool wrapper used as the generic metadata tool

use std::path::{Path, PathBuf};
use std::process::Command;

use super::{tools, GenericMetadataTool, TagMap, ToolError};

const TOOL: &str = "exiftool";

/// `exiftool` process wrapper. Reads with `-j -n`, writes with `-overwrite_original`.
#[derive(Debug, Clone)]
pub struct ExifTool {
    program: PathBuf,
}

impl Default for ExifTool {
    fn default() -> Self {
        Self::new()
    }
}

impl ExifTool {
    pub fn new() -> Self {
        Self::with_program(tools::exiftool_path())
    }

    pub fn with_program(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    fn run(&self, path: &Path, args: &[String]) -> Result<Vec<u8>, ToolError> {
        let output = Command::new(&self.program)
            .args(args)
            .arg(path)
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

impl GenericMetadataTool for ExifTool {
    fn read(&self, path: &Path) -> Result<TagMap, ToolError> {
        let stdout = self.run(path, &["-j".to_string(), "-n".to_string()])?;
        parse_json_tags(&stdout)
    }

    fn write(&self, path: &Path, tags: &TagMap) -> Result<(), ToolError> {
        if tags.is_empty() {
            return Ok(());
        }
        let mut args = vec!["-overwrite_original".to_string()];
        args.extend(tags.iter().map(|(k, v)| format!("-{}={}", k, v)));
        self.run(path, &args)?;
        Ok(())
    }
}

/// Flatten the first object of `exiftool -j` output into a tag map.
fn parse_json_tags(stdout: &[u8]) -> Result<TagMap, ToolError> {
    let output_err = |message: String| ToolError::Output {
        tool: TOOL.to_string(),
        message,
    };

    let raw: serde_json::Value =
        serde_json::from_slice(stdout).map_err(|e| output_err(e.to_string()))?;
    let object = raw
        .as_array()
        .and_then(|a| a.first())
        .and_then(|v| v.as_object())
        .ok_or_else(|| output_err("expected a JSON array of objects".to_string()))?;

    Ok(object
        .iter()
        .filter(|(k, _)| k.as_str() != "SourceFile")
        .map(|(k, v)| {
            let value = match v {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            (k.clone(), value)
        })
        .collect())
}
