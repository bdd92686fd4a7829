//! Safety gate - pre-execution checks for filesystem paths and shell commands.
//!
//! Command matching is best-effort pattern matching over the literal command
//! text. It catches the common destructive forms; it is advisory and not a
//! security boundary.

use std::path::{Component, Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;

use crate::config::CapabilityLimits;
use crate::error::CapabilityError;

/// System prefixes filesystem capabilities may not touch by default.
pub const DENIED_PATH_PREFIXES: &[&str] = &[
    "/bin",
    "/boot",
    "/dev",
    "/etc",
    "/lib",
    "/lib32",
    "/lib64",
    "/proc",
    "/sbin",
    "/sys",
    "/usr",
    "/var/lib",
    "/var/run",
    "/System",
    "/Library",
    "C:\\Windows",
    "C:\\Program Files",
];

// Terminator after a root/home target: whitespace, shell separators, quotes or end
const END: &str = r#"(?:\s|;|&|\||'|"|\)|$)"#;

static DESTRUCTIVE_PATTERNS: LazyLock<Vec<(&'static str, Regex)>> = LazyLock::new(|| {
    let rules: Vec<(&'static str, String)> = vec![
        (
            "recursive delete of root or home",
            format!(
                r#"\brm\s+(?:-[A-Za-z-]+\s+)*(?:-[A-Za-z]*[rR][A-Za-z]*|--recursive)\s+(?:-[A-Za-z-]+\s+)*["']?(?:/|/\*|~|~/|~/\*|\$HOME|\$HOME/|\$HOME/\*){END}"#
            ),
        ),
        ("recursive delete with --no-preserve-root", r"\brm\s+.*--no-preserve-root".to_string()),
        (
            "raw device write",
            r"\bdd\s+.*\bof=/dev/(?:sd|hd|nvme|disk|mmcblk|vd|xvd)".to_string(),
        ),
        (
            "raw device write",
            r">\s*/dev/(?:sd|hd|nvme|disk|mmcblk|vd|xvd)".to_string(),
        ),
        ("filesystem format", r"\bmkfs(?:\.[A-Za-z0-9]+)?\b".to_string()),
        ("filesystem format", r"\bformat\s+[A-Za-z]:".to_string()),
        (
            "recursive permission change on root",
            format!(
                r#"\bch(?:mod|own|grp)\s+(?:-[A-Za-z-]+\s+)*(?:-[A-Za-z]*R[A-Za-z]*|--recursive)\s+(?:-[A-Za-z-]+\s+)*\S+\s+["']?/{END}"#
            ),
        ),
        ("fork bomb", r":\(\)\s*\{\s*:\s*\|\s*:\s*&\s*\}\s*;\s*:".to_string()),
    ];

    rules
        .into_iter()
        .map(|(label, pattern)| {
            (
                label,
                Regex::new(&pattern).expect("destructive command pattern must compile"),
            )
        })
        .collect()
});

/// Name the destructive pattern a command matches, if any. Case-sensitive.
pub fn forbidden_command(command: &str) -> Option<&'static str> {
    DESTRUCTIVE_PATTERNS
        .iter()
        .find(|(_, re)| re.is_match(command))
        .map(|(label, _)| *label)
}

/// Reject a shell command before any process is spawned
pub fn check_command(command: &str) -> Result<(), CapabilityError> {
    match forbidden_command(command) {
        Some(label) => Err(CapabilityError::SafetyBlocked(format!(
            "command matches destructive pattern ({})",
            label
        ))),
        None => Ok(()),
    }
}

/// Path policy derived from capability limits.
#[derive(Debug, Clone, Default)]
pub struct PathPolicy {
    pub allow_system_paths: bool,
    pub extra_denied: Vec<PathBuf>,
}

impl PathPolicy {
    pub fn from_limits(limits: &CapabilityLimits) -> Self {
        Self {
            allow_system_paths: limits.allow_system_paths,
            extra_denied: limits.extra_denied_paths.clone(),
        }
    }

    /// Check if an absolute path falls inside a denied prefix
    pub fn is_denied(&self, path: &Path) -> bool {
        let builtin = !self.allow_system_paths
            && DENIED_PATH_PREFIXES
                .iter()
                .any(|prefix| path.starts_with(prefix));
        builtin || self.extra_denied.iter().any(|p| path.starts_with(p))
    }

    /// Resolve a user path to an absolute canonical path and apply the denylist
    pub fn check_path(&self, raw: &str) -> Result<PathBuf, CapabilityError> {
        if raw.trim().is_empty() {
            return Err(CapabilityError::invalid("path", "must not be empty"));
        }
        let lexical = absolute(Path::new(raw))?;
        let resolved = resolve_path(Path::new(raw))?;
        if self.is_denied(&lexical) || self.is_denied(&resolved) {
            return Err(CapabilityError::SafetyBlocked(format!(
                "path '{}' is inside a protected system directory",
                resolved.display()
            )));
        }
        Ok(resolved)
    }
}

/// Upper bound on dangling links followed while resolving one path
const MAX_LINK_HOPS: usize = 40;

/// Absolute canonical form of `path`. Symlinks are resolved on the longest
/// existing ancestor; the non-existent tail is normalized lexically.
/// Dangling links are followed to their target, which is where a write
/// through them would land.
pub fn resolve_path(path: &Path) -> Result<PathBuf, CapabilityError> {
    let mut current = absolute(path)?;
    for _ in 0..MAX_LINK_HOPS {
        match resolve_step(&current)? {
            Step::Resolved(resolved) => return Ok(resolved),
            Step::Follow(next) => current = next,
        }
    }
    Err(CapabilityError::SafetyBlocked(format!(
        "too many symbolic links resolving '{}'",
        path.display()
    )))
}

enum Step {
    Resolved(PathBuf),
    Follow(PathBuf),
}

fn resolve_step(normalized: &Path) -> Result<Step, CapabilityError> {
    let mut existing = normalized;
    let mut tail = Vec::new();
    loop {
        // symlink_metadata sees a link even when its target is missing
        if let Ok(metadata) = std::fs::symlink_metadata(existing) {
            if metadata.file_type().is_symlink() && !existing.exists() {
                let target = std::fs::read_link(existing)?;
                let base = match existing.parent() {
                    Some(parent) => parent.canonicalize()?,
                    None => PathBuf::from("/"),
                };
                let mut next = normalize(&base.join(target));
                for part in tail.iter().rev() {
                    next.push(part);
                }
                return Ok(Step::Follow(next));
            }

            let mut canonical = existing.canonicalize()?;
            for part in tail.iter().rev() {
                canonical.push(part);
            }
            return Ok(Step::Resolved(canonical));
        }
        match (existing.parent(), existing.file_name()) {
            (Some(parent), Some(name)) => {
                tail.push(name.to_os_string());
                existing = parent;
            }
            _ => return Ok(Step::Resolved(normalized.to_path_buf())),
        }
    }
}

/// Absolute, lexically normalized form of `path` without touching the filesystem
fn absolute(path: &Path) -> Result<PathBuf, CapabilityError> {
    let expanded = expand_home(path);
    let absolute = if expanded.is_absolute() {
        expanded
    } else {
        std::env::current_dir()?.join(expanded)
    };
    Ok(normalize(&absolute))
}

fn expand_home(path: &Path) -> PathBuf {
    if let Ok(rest) = path.strip_prefix("~") {
        if let Some(home) = std::env::var_os("HOME") {
            return PathBuf::from(home).join(rest);
        }
    }
    path.to_path_buf()
}

fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::ParentDir => {
                out.pop();
            }
            Component::CurDir => {}
            other => out.push(other.as_os_str()),
        }
    }
    out
}
