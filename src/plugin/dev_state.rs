//! Dev-server bookkeeping: which files each compiled module depends on and
//! the last source map produced for it.

use std::collections::BTreeSet;

use dashmap::DashMap;

/// Per-module indices, keyed by disk path.
#[derive(Debug, Default)]
pub struct DevState {
    /// Module → extra files whose changes must recompile it.
    watch_files: DashMap<String, Vec<String>>,
    /// Module → files that may appear later (e.g. a `marko.json` next to it).
    optional_files: DashMap<String, Vec<String>>,
    source_maps: DashMap<String, String>,
}

impl DevState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace what is known about `module` after a compile.
    pub fn record(
        &self,
        module: &str,
        watch_files: Vec<String>,
        optional_files: Vec<String>,
        source_map: Option<String>,
    ) {
        self.watch_files.insert(module.to_string(), watch_files);
        self.optional_files.insert(module.to_string(), optional_files);
        match source_map {
            Some(map) => {
                self.source_maps.insert(module.to_string(), map);
            }
            None => {
                self.source_maps.remove(module);
            }
        }
    }

    /// Modules that must be recompiled when `path` changes, sorted.
    pub fn modules_watching(&self, path: &str) -> Vec<String> {
        let mut modules = BTreeSet::new();
        for index in [&self.watch_files, &self.optional_files] {
            for entry in index.iter() {
                if entry.value().iter().any(|f| f == path) {
                    modules.insert(entry.key().clone());
                }
            }
        }
        modules.into_iter().collect()
    }

    pub fn source_map(&self, module: &str) -> Option<String> {
        self.source_maps.get(module).map(|m| m.value().clone())
    }

    /// Drop everything about a deleted module.
    pub fn forget(&self, module: &str) {
        self.watch_files.remove(module);
        self.optional_files.remove(module);
        self.source_maps.remove(module);
    }

    /// Every module compiled since the last clear, sorted.
    pub fn all_modules(&self) -> Vec<String> {
        let modules: BTreeSet<String> = self
            .watch_files
            .iter()
            .map(|e| e.key().clone())
            .chain(self.optional_files.iter().map(|e| e.key().clone()))
            .collect();
        modules.into_iter().collect()
    }

    pub fn clear(&self) {
        self.watch_files.clear();
        self.optional_files.clear();
        self.source_maps.clear();
    }
}
