//! File capabilities - read, write and list through the path safety gate.

use async_trait::async_trait;
use serde_json::{json, Map, Value};

use super::safety::PathPolicy;
use super::{str_arg, Args, Capability, CapabilitySchema, ParamType};
use crate::config::CapabilityLimits;
use crate::error::CapabilityError;

fn into_map(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

/// Read a UTF-8 text file, bounded by a size ceiling.
pub struct ReadFile {
    schema: CapabilitySchema,
    policy: PathPolicy,
    max_bytes: u64,
}

impl ReadFile {
    pub fn new(limits: &CapabilityLimits) -> Self {
        Self {
            schema: CapabilitySchema::new(
                "read_file",
                "Read a text file's contents. Returns the content, size in bytes and line count.",
            )
            .param("path", ParamType::String, "Absolute or relative path of the file", true),
            policy: PathPolicy::from_limits(limits),
            max_bytes: limits.max_read_bytes,
        }
    }
}

#[async_trait]
impl Capability for ReadFile {
    fn schema(&self) -> &CapabilitySchema {
        &self.schema
    }

    async fn invoke(&self, args: Args) -> Result<Map<String, Value>, CapabilityError> {
        let raw = str_arg(&args, "path")?;
        let path = self.policy.check_path(raw)?;

        let metadata = tokio::fs::metadata(&path)
            .await
            .map_err(|_| CapabilityError::NotFound(path.display().to_string()))?;
        if metadata.is_dir() {
            return Err(CapabilityError::invalid("path", "is a directory"));
        }
        if metadata.len() > self.max_bytes {
            return Err(CapabilityError::FileTooLarge {
                size: metadata.len(),
                limit: self.max_bytes,
            });
        }

        let bytes = tokio::fs::read(&path).await?;
        let size = bytes.len();
        let content = String::from_utf8(bytes)
            .map_err(|_| CapabilityError::invalid("path", "file is not valid UTF-8 text"))?;

        tracing::debug!(path = %path.display(), bytes = size, "Read file");

        Ok(into_map(json!({
            "path": path.display().to_string(),
            "content": content,
            "size": size,
            "lines": content.lines().count(),
        })))
    }
}

/// Write (overwrite) a file, creating parent directories as needed.
pub struct WriteFile {
    schema: CapabilitySchema,
    policy: PathPolicy,
}

impl WriteFile {
    pub fn new(limits: &CapabilityLimits) -> Self {
        Self {
            schema: CapabilitySchema::new(
                "write_file",
                "Write content to a file, replacing any existing content. Creates parent directories if needed.",
            )
            .param("path", ParamType::String, "Absolute or relative path of the file", true)
            .param("content", ParamType::String, "Full text to write", true),
            policy: PathPolicy::from_limits(limits),
        }
    }
}

#[async_trait]
impl Capability for WriteFile {
    fn schema(&self) -> &CapabilitySchema {
        &self.schema
    }

    async fn invoke(&self, args: Args) -> Result<Map<String, Value>, CapabilityError> {
        let raw = str_arg(&args, "path")?;
        let content = str_arg(&args, "content")?;
        let path = self.policy.check_path(raw)?;

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                CapabilityError::Execution(format!(
                    "Failed to create directory '{}': {}",
                    parent.display(),
                    e
                ))
            })?;
        }

        tokio::fs::write(&path, content.as_bytes()).await?;

        tracing::debug!(path = %path.display(), bytes = content.len(), "Wrote file");

        Ok(into_map(json!({
            "path": path.display().to_string(),
            "bytesWritten": content.len(),
        })))
    }
}

/// List a directory's entries, sorted by name.
pub struct ListDirectory {
    schema: CapabilitySchema,
    policy: PathPolicy,
}

impl ListDirectory {
    pub fn new(limits: &CapabilityLimits) -> Self {
        Self {
            schema: CapabilitySchema::new(
                "list_directory",
                "List files and subdirectories in a directory.",
            )
            .param("path", ParamType::String, "Directory to list", true),
            policy: PathPolicy::from_limits(limits),
        }
    }
}

#[async_trait]
impl Capability for ListDirectory {
    fn schema(&self) -> &CapabilitySchema {
        &self.schema
    }

    async fn invoke(&self, args: Args) -> Result<Map<String, Value>, CapabilityError> {
        let raw = str_arg(&args, "path")?;
        let path = self.policy.check_path(raw)?;

        let mut reader = tokio::fs::read_dir(&path)
            .await
            .map_err(|_| CapabilityError::NotFound(path.display().to_string()))?;

        let mut entries = Vec::new();
        while let Some(entry) = reader.next_entry().await? {
            let metadata = entry.metadata().await.ok();
            entries.push(json!({
                "name": entry.file_name().to_string_lossy(),
                "isDir": metadata.as_ref().map(|m| m.is_dir()).unwrap_or(false),
                "size": metadata.as_ref().map(|m| m.len()).unwrap_or(0),
            }));
        }
        entries.sort_by(|a, b| {
            a["name"]
                .as_str()
                .unwrap_or_default()
                .cmp(b["name"].as_str().unwrap_or_default())
        });

        Ok(into_map(json!({
            "path": path.display().to_string(),
            "count": entries.len(),
            "entries": entries,
        })))
    }
}
