//! Local link resolution: file existence and header-anchor lookups.
//!
//! The index is write-once per path: a failed stat caches as absent, a
//! directory caches as present-without-anchors, and a regular file is read
//! exactly once to collect its header IDs. Lookups never re-open files, so
//! cyclic file→destination→file references terminate by construction.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Component, Path};
use std::sync::LazyLock;

use regex::Regex;

use crate::error::{CheckError, Result};

/// Strip everything that is not a letter, number, mark, `-`, `#` or space.
/// `\p{L}\p{N}\p{M}` is the Unicode equivalent of `\w`.
static HEADER_PUNCTUATION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^\p{L}\p{N}\p{M}\-# ]").expect("static pattern"));

/// Per-path anchor sets: `None` means the path does not exist as a file or
/// directory, `Some(vec![])` a directory or anchor-less file, `Some(ids)` a
/// file with header anchors.
#[derive(Debug, Default)]
pub struct AnchorIndex {
    by_path: HashMap<String, Option<Vec<String>>>,
}

impl AnchorIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up an absolute link (optionally carrying a `#fragment`) against
    /// the filesystem and the header-anchor index.
    pub fn lookup(&mut self, abs_link: &str) -> Result<()> {
        let split_with = if abs_link.contains("/#") { "/#" } else { "#" };
        let mut parts = abs_link.splitn(2, split_with);
        let path = parts.next().unwrap_or_default();
        let fragment = parts.next();

        if !self.by_path.contains_key(path) {
            self.scan(path)?;
        }

        let ids = match self.by_path.get(path) {
            Some(Some(ids)) => ids,
            _ => return Err(CheckError::FileNotFound.wrap(path)),
        };

        let Some(fragment) = fragment else {
            return Ok(());
        };
        if ids.iter().any(|id| id == fragment) {
            return Ok(());
        }
        Err(CheckError::IdNotFound.wrap(format!(
            "link {}, existing ids: {:?}",
            abs_link, ids
        )))
    }

    /// Populate the index entry for a path. Missing paths cache negatively;
    /// directories cache with an empty anchor set; files are scanned line by
    /// line for `#` headers.
    fn scan(&mut self, path: &str) -> Result<()> {
        // Negative entry first so a failed read is never retried.
        self.by_path.insert(path.to_string(), None);

        let meta = match std::fs::metadata(path) {
            Ok(meta) => meta,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => {
                return Err(CheckError::from(e).wrap(format!("failed to stat {}", path)));
            }
        };

        if meta.is_dir() {
            self.by_path.insert(path.to_string(), Some(Vec::new()));
            return Ok(());
        }

        let file = File::open(path)
            .map_err(|e| CheckError::from(e).wrap(format!("failed to open file {}", path)))?;
        let mut ids = Vec::new();
        for line in BufReader::new(file).lines() {
            let line =
                line.map_err(|e| CheckError::from(e).wrap(format!("failed to read file {}", path)))?;
            if line.starts_with('#') {
                if let Some(id) = header_id(&line) {
                    ids.push(id);
                }
            }
        }
        self.by_path.insert(path.to_string(), Some(ids));
        Ok(())
    }
}

/// Derive the linkable anchor ID from a `#`-prefixed header line.
///
/// Punctuation other than `-`, `#` and space is stripped, the rest is
/// lower-cased and the leading `#` level marks removed. A header that is
/// punctuation-only has no linkable anchor. `{#custom-id}` attributes are
/// not extracted as the anchor: the braces fall to the punctuation strip,
/// leaving the attribute text in the derived ID.
pub fn header_id(header: &str) -> Option<String> {
    let stripped = HEADER_PUNCTUATION_RE.replace_all(header, "");
    let lowered = stripped.to_lowercase();
    let text = lowered.trim_start_matches('#');
    if text.chars().count() <= 1 {
        return None;
    }

    let mut id = String::new();
    for ch in text.chars().skip(1) {
        match ch {
            '{' => return Some(id),
            ' ' | '-' => id.push('-'),
            other => id.push(other),
        }
    }
    Some(id)
}

/// Normalize a Markdown destination into an absolute link string (possibly
/// carrying a `#fragment`), resolved against the anchor directory for
/// absolute-style destinations and against the document directory otherwise.
pub fn abs_local_link(anchor_dir: &Path, doc_path: &Path, destination: &str) -> String {
    let doc_dir = doc_path.parent().unwrap_or(Path::new("/"));
    let base = doc_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    if destination.starts_with('/') {
        return clean_join(anchor_dir, &destination[1..]);
    }
    if destination == "." {
        return clean_join(doc_dir, &base);
    }
    if let Some(frag) = destination.strip_prefix('#') {
        return clean_join(doc_dir, &format!("{}#{}", base, frag));
    }
    if destination.contains("/#") {
        let collapsed = destination.replacen("/#", "#", 1);
        return clean_join(anchor_dir, &collapsed);
    }
    clean_join(doc_dir, destination)
}

/// Turn an absolute link (with optional fragment) back into a link relative
/// to the document. A link to the document itself becomes `.`, or just the
/// fragment when one is present.
pub fn abs_to_rel_link(abs_link: &str, doc_path: &Path) -> String {
    let mut parts = abs_link.splitn(2, '#');
    let path = parts.next().unwrap_or_default();
    let fragment = parts.next();

    let doc_dir = doc_path.parent().unwrap_or(Path::new("/"));
    let mut rel = diff_paths(Path::new(path), doc_dir);
    let base = doc_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    if rel == base {
        rel = ".".to_string();
    }

    match fragment {
        None => rel,
        Some(frag) if rel == "." => format!("#{}", frag),
        Some(frag) => format!("{}#{}", rel, frag),
    }
}

/// Join `rest` onto `base` and lexically normalize `.` and `..` segments,
/// producing a `/`-separated string.
pub fn clean_join(base: &Path, rest: &str) -> String {
    let joined = base.join(rest);
    let mut parts: Vec<String> = Vec::new();
    let mut absolute = false;
    for comp in joined.components() {
        match comp {
            Component::RootDir => absolute = true,
            Component::CurDir => {}
            Component::ParentDir => {
                if parts.pop().is_none() && !absolute {
                    parts.push("..".to_string());
                }
            }
            Component::Normal(p) => parts.push(p.to_string_lossy().into_owned()),
            Component::Prefix(_) => {}
        }
    }
    let body = parts.join("/");
    if absolute {
        format!("/{}", body)
    } else if body.is_empty() {
        ".".to_string()
    } else {
        body
    }
}

/// Lexical relative path from `base` to `target`, using `/` separators.
pub fn relative_path(target: &Path, base: &Path) -> String {
    diff_paths(target, base)
}

fn diff_paths(target: &Path, base: &Path) -> String {
    let target: Vec<_> = target
        .components()
        .filter(|c| !matches!(c, Component::RootDir | Component::CurDir))
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    let base: Vec<_> = base
        .components()
        .filter(|c| !matches!(c, Component::RootDir | Component::CurDir))
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();

    let common = target
        .iter()
        .zip(base.iter())
        .take_while(|(a, b)| a == b)
        .count();

    let mut parts: Vec<String> = Vec::new();
    for _ in common..base.len() {
        parts.push("..".to_string());
    }
    parts.extend(target[common..].iter().cloned());
    if parts.is_empty() {
        ".".to_string()
    } else {
        parts.join("/")
    }
}
