//! Server → client handoff record.
//!
//! The server half of a linked build writes one [`ServerManifest`] when it
//! finishes; the client half reads it once when it starts. There is exactly
//! one writer and one reader and the operator runs them in order, so the
//! store does no locking and no versioning: a record either exists or it
//! doesn't.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};

use crate::LinkError;

// ---------------------------------------------------------------------------
// ServerManifest
// ---------------------------------------------------------------------------

/// What the server build decided, for the client build to pick up.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerManifest {
    /// Entry id → path relative to the project root.
    pub entries: BTreeMap<String, String>,
    /// Relative path → literal template source.
    pub entry_sources: BTreeMap<String, String>,
    /// Absolute paths of server chunks that receive the browser manifest.
    pub chunks_needing_assets: Vec<String>,
}

impl ServerManifest {
    /// Record an entry. Re-adding the same path is a no-op; a second path
    /// hashing to an id already taken is an error.
    pub fn add_entry(
        &mut self,
        entry_id: &str,
        relative_path: &str,
        source: &str,
    ) -> Result<(), LinkError> {
        if let Some(existing) = self.entries.get(entry_id) {
            if existing != relative_path {
                return Err(LinkError::EntryIdCollision {
                    entry_id: entry_id.to_string(),
                    existing: existing.clone(),
                    incoming: relative_path.to_string(),
                });
            }
        }

        self.entries
            .insert(entry_id.to_string(), relative_path.to_string());
        self.entry_sources
            .insert(relative_path.to_string(), source.to_string());
        Ok(())
    }

    /// Record a chunk once, keeping first-seen order.
    pub fn add_chunk_needing_assets(&mut self, path: impl Into<String>) {
        let path = path.into();
        if !self.chunks_needing_assets.contains(&path) {
            self.chunks_needing_assets.push(path);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// ---------------------------------------------------------------------------
// HandoffStore
// ---------------------------------------------------------------------------

#[derive(Debug)]
enum Backend {
    File(PathBuf),
    /// Serialized record; keeps the same codec as the file backend.
    Memory(Mutex<Option<String>>),
}

/// Durable single-record store for the [`ServerManifest`].
#[derive(Debug)]
pub struct HandoffStore {
    backend: Backend,
}

impl HandoffStore {
    /// Store the record at an explicit file path.
    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self {
            backend: Backend::File(path.into()),
        }
    }

    /// Store the record under `store_dir`, keyed by the project root and an
    /// optional runtime id so unrelated builds never share a record.
    pub fn for_project(store_dir: &Path, root: &Path, runtime_id: Option<&str>) -> Self {
        let root_key = hex::encode(Sha1::digest(root.to_string_lossy().as_bytes()));
        let file_name = match runtime_id {
            Some(id) => format!("server-manifest-{}-{id}.json", &root_key[..16]),
            None => format!("server-manifest-{}.json", &root_key[..16]),
        };
        Self::file(store_dir.join(file_name))
    }

    /// Process-local store, for hosts that run both halves in one process.
    pub fn memory() -> Self {
        Self {
            backend: Backend::Memory(Mutex::new(None)),
        }
    }

    /// Backing file, if any.
    pub fn location(&self) -> Option<&Path> {
        match &self.backend {
            Backend::File(path) => Some(path),
            Backend::Memory(_) => None,
        }
    }

    fn describe(&self) -> String {
        match &self.backend {
            Backend::File(path) => path.display().to_string(),
            Backend::Memory(_) => "<memory>".to_string(),
        }
    }

    /// Persist the record, replacing any previous one.
    pub async fn write(&self, manifest: &ServerManifest) -> Result<(), LinkError> {
        let serialized =
            serde_json::to_string(manifest).map_err(|e| LinkError::HandoffCorrupt {
                location: self.describe(),
                message: e.to_string(),
            })?;

        match &self.backend {
            Backend::File(path) => {
                if let Some(parent) = path.parent() {
                    tokio::fs::create_dir_all(parent)
                        .await
                        .map_err(|e| LinkError::io(parent, e))?;
                }
                // Write-then-rename so a reader never sees half a record.
                let tmp = path.with_extension("json.tmp");
                tokio::fs::write(&tmp, serialized)
                    .await
                    .map_err(|e| LinkError::io(&tmp, e))?;
                tokio::fs::rename(&tmp, path)
                    .await
                    .map_err(|e| LinkError::io(path, e))?;
            }
            Backend::Memory(slot) => {
                *slot.lock().unwrap_or_else(PoisonError::into_inner) = Some(serialized);
            }
        }

        tracing::info!(
            location = %self.describe(),
            entries = manifest.entries.len(),
            chunks = manifest.chunks_needing_assets.len(),
            "wrote server manifest"
        );
        Ok(())
    }

    /// Load the record. A missing record means the server build has not run.
    pub async fn read(&self) -> Result<ServerManifest, LinkError> {
        let serialized = match &self.backend {
            Backend::File(path) => match tokio::fs::read_to_string(path).await {
                Ok(text) => text,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    return Err(LinkError::ServerBuildMissing {
                        location: self.describe(),
                    });
                }
                Err(e) => return Err(LinkError::io(path, e)),
            },
            Backend::Memory(slot) => slot
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone()
                .ok_or_else(|| LinkError::ServerBuildMissing {
                    location: self.describe(),
                })?,
        };

        let manifest: ServerManifest =
            serde_json::from_str(&serialized).map_err(|e| LinkError::HandoffCorrupt {
                location: self.describe(),
                message: e.to_string(),
            })?;

        tracing::info!(
            location = %self.describe(),
            entries = manifest.entries.len(),
            "read server manifest"
        );
        Ok(manifest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn sample() -> ServerManifest {
        let mut manifest = ServerManifest::default();
        manifest
            .add_entry("a_cQCI", "a.marko", "<h1>a</h1>")
            .unwrap();
        manifest.add_chunk_needing_assets("/out/server/index.js");
        manifest
    }

    #[tokio::test]
    async fn memory_round_trip() {
        let store = HandoffStore::memory();
        store.write(&sample()).await.unwrap();
        assert_eq!(store.read().await.unwrap(), sample());
    }

    #[tokio::test]
    async fn file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = HandoffStore::for_project(dir.path(), Path::new("/project"), Some("app"));
        store.write(&sample()).await.unwrap();

        let location = store.location().unwrap();
        assert!(location.exists());
        assert!(location.to_string_lossy().ends_with("-app.json"));
        assert_eq!(store.read().await.unwrap(), sample());
    }

    #[tokio::test]
    async fn read_before_write_is_an_ordering_error() {
        let dir = tempfile::tempdir().unwrap();
        let stores = [
            HandoffStore::memory(),
            HandoffStore::for_project(dir.path(), Path::new("/project"), None),
        ];
        for store in stores {
            let err = store.read().await.unwrap_err();
            assert!(matches!(err, LinkError::ServerBuildMissing { .. }), "{err}");
            assert!(err
                .to_string()
                .contains("run the server build before the browser build"));
        }
    }

    #[tokio::test]
    async fn corrupt_record_is_reported_as_such() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("record.json");
        std::fs::write(&path, "{ not json").unwrap();
        let err = HandoffStore::file(&path).read().await.unwrap_err();
        assert!(matches!(err, LinkError::HandoffCorrupt { .. }), "{err}");
    }

    #[test]
    fn project_keys_differ_by_root_and_runtime_id() {
        let dir = Path::new("/tmp/store");
        let a = HandoffStore::for_project(dir, Path::new("/a"), None);
        let b = HandoffStore::for_project(dir, Path::new("/b"), None);
        let c = HandoffStore::for_project(dir, Path::new("/a"), Some("x"));
        assert_ne!(a.location(), b.location());
        assert_ne!(a.location(), c.location());
    }

    #[test]
    fn serialized_shape_is_camel_case() {
        let json = serde_json::to_value(sample()).unwrap();
        assert!(json.get("entrySources").is_some());
        assert!(json.get("chunksNeedingAssets").is_some());
    }

    #[test]
    fn entry_id_collision_detected() {
        let mut manifest = sample();
        manifest.add_entry("a_cQCI", "a.marko", "<h1>a</h1>").unwrap();
        let err = manifest
            .add_entry("a_cQCI", "other/a.marko", "")
            .unwrap_err();
        assert!(matches!(err, LinkError::EntryIdCollision { .. }));
    }
}
