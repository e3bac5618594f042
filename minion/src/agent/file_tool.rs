//! Bounded file reader for decayed content.
//!
//! Decay references tell the model to re-read swapped-out content via
//! `file_read`; this tool serves exactly that. Reads are restricted to the
//! agent's own cache directory and size-capped.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::tools::{ParamSpec, Tool, ToolError, ToolSpec};

/// Tool name for reading decayed content back.
pub const TOOL_FILE_READ: &str = "file_read";

const DEFAULT_MAX_BYTES: usize = 65_536;

pub struct FileReadTool {
    root: PathBuf,
    max_bytes: usize,
}

impl FileReadTool {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            max_bytes: DEFAULT_MAX_BYTES,
        }
    }

    fn resolve(&self, path: &str) -> Result<PathBuf, ToolError> {
        let requested = Path::new(path);
        let resolved = if requested.is_absolute() {
            requested.to_path_buf()
        } else {
            self.root.join(requested)
        };
        let canonical = resolved
            .canonicalize()
            .map_err(|e| ToolError::InvalidInput(format!("cannot read {path}: {e}")))?;
        let root = self
            .root
            .canonicalize()
            .map_err(|e| ToolError::Transport(format!("cache dir unavailable: {e}")))?;
        if !canonical.starts_with(&root) {
            return Err(ToolError::InvalidInput(format!(
                "path is outside the agent cache directory: {path}"
            )));
        }
        Ok(canonical)
    }
}

#[async_trait]
impl Tool for FileReadTool {
    fn name(&self) -> &str {
        TOOL_FILE_READ
    }

    fn spec(&self) -> ToolSpec {
        ToolSpec::new(
            TOOL_FILE_READ,
            "Read a file from the agent cache (e.g. decayed large outputs). \
             Returns at most max_bytes bytes starting at offset.",
        )
        .with_input("path", ParamSpec::required("string", "File path."))
        .with_input(
            "offset",
            ParamSpec::optional("integer", "Byte offset to start at.", Some(json!(0))),
        )
        .with_input(
            "max_bytes",
            ParamSpec::optional("integer", "Maximum bytes to return.", None),
        )
    }

    async fn call(&self, args: Value) -> Result<Value, ToolError> {
        let path = args
            .get("path")
            .and_then(Value::as_str)
            .ok_or_else(|| ToolError::InvalidInput("missing path".to_string()))?;
        let offset = args.get("offset").and_then(Value::as_u64).unwrap_or(0) as usize;
        let max_bytes = args
            .get("max_bytes")
            .and_then(Value::as_u64)
            .map(|b| (b as usize).min(self.max_bytes))
            .unwrap_or(self.max_bytes);

        let resolved = self.resolve(path)?;
        let content = tokio::fs::read_to_string(&resolved)
            .await
            .map_err(|e| ToolError::Transport(format!("read {path}: {e}")))?;
        let total = content.len();
        let window: String = content
            .chars()
            .skip(offset)
            .take(max_bytes)
            .collect();
        Ok(json!({
            "content": window,
            "total_bytes": total,
            "offset": offset,
            "truncated": offset + max_bytes < total,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn reads_file_inside_root() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("decay-step1-x.txt");
        std::fs::write(&path, "stored content").unwrap();
        let tool = FileReadTool::new(dir.path());
        let out = tool
            .call(json!({"path": path.display().to_string()}))
            .await
            .unwrap();
        assert_eq!(out["content"], "stored content");
        assert_eq!(out["truncated"], false);
    }

    #[tokio::test]
    async fn rejects_paths_outside_root() {
        let dir = tempfile::tempdir().unwrap();
        let outside = tempfile::NamedTempFile::new().unwrap();
        let tool = FileReadTool::new(dir.path());
        let err = tool
            .call(json!({"path": outside.path().display().to_string()}))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn offset_and_cap_window_the_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("big.txt");
        std::fs::write(&path, "0123456789").unwrap();
        let tool = FileReadTool::new(dir.path());
        let out = tool
            .call(json!({"path": "big.txt", "offset": 2, "max_bytes": 3}))
            .await
            .unwrap();
        assert_eq!(out["content"], "234");
        assert_eq!(out["truncated"], true);
    }
}
