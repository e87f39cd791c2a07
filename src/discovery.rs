//! Async discovery of Markdown files.
//!
//! Inputs may be explicit files or directories; directories are walked
//! recursively collecting files by extension, filtered by optional
//! include/exclude glob patterns.

use std::path::{Path, PathBuf};

use regex::Regex;
use tokio::fs;

use crate::error::{CheckError, Result};

#[derive(Debug, Clone)]
pub struct FileDiscovery {
    /// File extensions to include (e.g. `["md"]`).
    extensions: Vec<String>,
    include_patterns: Vec<Regex>,
    exclude_patterns: Vec<Regex>,
}

impl Default for FileDiscovery {
    fn default() -> Self {
        Self::new()
    }
}

impl FileDiscovery {
    pub fn new() -> Self {
        Self {
            extensions: vec!["md".to_string()],
            include_patterns: Vec::new(),
            exclude_patterns: Vec::new(),
        }
    }

    pub fn with_extensions(mut self, extensions: Vec<String>) -> Self {
        self.extensions = extensions;
        self
    }

    /// Add include patterns (glob syntax).
    pub fn with_include_patterns(mut self, patterns: Vec<String>) -> Result<Self> {
        self.include_patterns = patterns
            .iter()
            .map(|p| glob_to_regex(p))
            .collect::<Result<Vec<_>>>()?;
        Ok(self)
    }

    /// Add exclude patterns (glob syntax).
    pub fn with_exclude_patterns(mut self, patterns: Vec<String>) -> Result<Self> {
        self.exclude_patterns = patterns
            .iter()
            .map(|p| glob_to_regex(p))
            .collect::<Result<Vec<_>>>()?;
        Ok(self)
    }

    /// Expand the given inputs into a sorted list of files. Explicit files
    /// are kept as-is when their extension matches; directories are walked
    /// recursively.
    pub async fn discover(&self, inputs: &[PathBuf]) -> Result<Vec<PathBuf>> {
        let mut files = Vec::new();
        for input in inputs {
            let meta = fs::metadata(input).await.map_err(|e| {
                CheckError::from(e).wrap(format!("stat {}", input.display()))
            })?;
            if meta.is_file() {
                if self.matches(input) {
                    files.push(input.clone());
                }
                continue;
            }

            // Iterative traversal; recursion does not compose with async.
            let mut pending = vec![input.clone()];
            while let Some(dir) = pending.pop() {
                let mut entries = fs::read_dir(&dir).await.map_err(|e| {
                    CheckError::from(e).wrap(format!("read dir {}", dir.display()))
                })?;
                while let Some(entry) = entries.next_entry().await.map_err(CheckError::from)? {
                    let path = entry.path();
                    let file_type = entry.file_type().await.map_err(CheckError::from)?;
                    if file_type.is_dir() {
                        pending.push(path);
                    } else if file_type.is_file() && self.matches(&path) {
                        files.push(path);
                    }
                }
            }
        }
        files.sort();
        files.dedup();
        Ok(files)
    }

    fn matches(&self, path: &Path) -> bool {
        let ext = path
            .extension()
            .map(|e| e.to_string_lossy().to_string())
            .unwrap_or_default();
        if !self.extensions.iter().any(|e| e == &ext) {
            return false;
        }

        let name = path.to_string_lossy();
        if !self.include_patterns.is_empty()
            && !self.include_patterns.iter().any(|p| p.is_match(&name))
        {
            return false;
        }
        !self.exclude_patterns.iter().any(|p| p.is_match(&name))
    }
}

/// Convert a glob pattern to an anchored regex (`*` → `.*`, `?` → `.`).
fn glob_to_regex(pattern: &str) -> Result<Regex> {
    let mut regex_pattern = String::from("^");
    for ch in pattern.chars() {
        match ch {
            '*' => regex_pattern.push_str(".*"),
            '?' => regex_pattern.push('.'),
            c if "\\.+()[]{}^$|".contains(c) => {
                regex_pattern.push('\\');
                regex_pattern.push(c);
            }
            c => regex_pattern.push(c),
        }
    }
    regex_pattern.push('$');
    Regex::new(&regex_pattern)
        .map_err(|e| CheckError::Config(format!("invalid glob pattern {:?}: {}", pattern, e)))
}
