//! Keyed coalescing of deferred link checks.
//!
//! Every link occurrence maps to a [`FutureKey`]; the first visit installs a
//! result producer and any further occurrence of the same key only bumps the
//! occurrence counter. Producers are registered at visit time and read at
//! close time — no callbacks escape the table.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::error::CheckError;

/// Identity of one deferred check: same file, destination and line set share
/// a single pending result.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FutureKey {
    pub filepath: PathBuf,
    pub dest: String,
    pub line_numbers: String,
}

/// How the result for a key is obtained at close time.
#[derive(Debug, Clone)]
pub enum Producer {
    /// Result known at visit time (`None` = success).
    Ready(Option<CheckError>),
    /// Result read from the shared remote-results map under its lock,
    /// keyed by destination.
    Deferred(String),
}

#[derive(Debug)]
pub struct FutureResult {
    pub producer: Producer,
    pub occurrences: usize,
}

/// Map of pending results, exclusively locked across visit and close by its
/// owner.
#[derive(Debug, Default)]
pub struct FutureTable {
    map: HashMap<FutureKey, FutureResult>,
}

impl FutureTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an occurrence of the key. Returns `false` when the key was
    /// already present (the occurrence counter is bumped), `true` when a new
    /// entry with a success producer was inserted and dispatch should
    /// proceed.
    pub fn visit(&mut self, key: FutureKey) -> bool {
        if let Some(existing) = self.map.get_mut(&key) {
            existing.occurrences += 1;
            return false;
        }
        self.map.insert(
            key,
            FutureResult {
                producer: Producer::Ready(None),
                occurrences: 1,
            },
        );
        true
    }

    /// Replace the producer installed for the key.
    pub fn set_producer(&mut self, key: &FutureKey, producer: Producer) {
        if let Some(entry) = self.map.get_mut(key) {
            entry.producer = producer;
        }
    }

    /// Remove and return all entries for the file, sorted descending by
    /// `filepath + dest` for deterministic diagnostic order.
    pub fn drain_file(&mut self, filepath: &Path) -> Vec<(FutureKey, FutureResult)> {
        let keys: Vec<FutureKey> = self
            .map
            .keys()
            .filter(|k| k.filepath == filepath)
            .cloned()
            .collect();

        let mut entries: Vec<(FutureKey, FutureResult)> = keys
            .into_iter()
            .filter_map(|k| self.map.remove(&k).map(|v| (k, v)))
            .collect();
        entries.sort_by(|(a, _), (b, _)| {
            let ka = format!("{}{}", a.filepath.display(), a.dest);
            let kb = format!("{}{}", b.filepath.display(), b.dest);
            kb.cmp(&ka)
        });
        entries
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}
