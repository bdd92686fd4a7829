//! Text search capability - regex matches over a gitignore-aware directory walk.

use std::path::Path;

use async_trait::async_trait;
use regex::Regex;
use serde_json::{json, Map, Value};

use super::safety::PathPolicy;
use super::{str_arg, Args, Capability, CapabilitySchema, ParamType};
use crate::config::CapabilityLimits;
use crate::error::CapabilityError;

const MAX_LINE_CHARS: usize = 300;

pub struct SearchFiles {
    schema: CapabilitySchema,
    policy: PathPolicy,
    max_results: usize,
    max_file_bytes: u64,
}

impl SearchFiles {
    pub fn new(limits: &CapabilityLimits) -> Self {
        Self {
            schema: CapabilitySchema::new(
                "search_files",
                "Search file contents under a directory with a regular expression. \
                 Returns matching lines with file and line number.",
            )
            .param("pattern", ParamType::String, "Regular expression to search for", true)
            .param("path", ParamType::String, "File or directory to search", true)
            .param("max_results", ParamType::Integer, "Maximum matches to return", false),
            policy: PathPolicy::from_limits(limits),
            max_results: limits.max_search_results,
            max_file_bytes: limits.max_read_bytes,
        }
    }
}

#[async_trait]
impl Capability for SearchFiles {
    fn schema(&self) -> &CapabilitySchema {
        &self.schema
    }

    async fn invoke(&self, args: Args) -> Result<Map<String, Value>, CapabilityError> {
        let pattern = str_arg(&args, "pattern")?;
        let regex = Regex::new(pattern)
            .map_err(|e| CapabilityError::invalid("pattern", e.to_string()))?;
        let root = self.policy.check_path(str_arg(&args, "path")?)?;
        if !root.exists() {
            return Err(CapabilityError::NotFound(root.display().to_string()));
        }

        let limit = args
            .get("max_results")
            .and_then(|v| v.as_u64())
            .map(|n| (n as usize).min(self.max_results))
            .unwrap_or(self.max_results);
        let max_file_bytes = self.max_file_bytes;

        let root_display = root.display().to_string();
        let (matches, truncated, files_scanned) = tokio::task::spawn_blocking(move || {
            search_tree(&root, &regex, limit, max_file_bytes)
        })
        .await
        .map_err(|e| CapabilityError::Execution(format!("search task failed: {}", e)))?;

        Ok(match json!({
            "pattern": pattern,
            "path": root_display,
            "matches": matches,
            "truncated": truncated,
            "filesScanned": files_scanned,
        }) {
            Value::Object(map) => map,
            _ => Map::new(),
        })
    }
}

fn search_tree(root: &Path, regex: &Regex, limit: usize, max_file_bytes: u64) -> (Vec<Value>, bool, usize) {
    let mut matches = Vec::new();
    let mut files_scanned = 0;

    let walker = ignore::WalkBuilder::new(root)
        .hidden(true)
        .git_ignore(true)
        .build();

    for entry in walker.flatten() {
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        if path.metadata().map(|m| m.len() > max_file_bytes).unwrap_or(true) {
            continue;
        }
        // Binary or non-UTF-8 files are skipped
        let Ok(content) = std::fs::read_to_string(path) else {
            continue;
        };
        files_scanned += 1;

        for (idx, line) in content.lines().enumerate() {
            if regex.is_match(line) {
                if matches.len() >= limit {
                    return (matches, true, files_scanned);
                }
                matches.push(json!({
                    "file": path.display().to_string(),
                    "line": idx + 1,
                    "text": line.chars().take(MAX_LINE_CHARS).collect::<String>(),
                }));
            }
        }
    }

    (matches, false, files_scanned)
}
