use crate::error::{ZarrError, ZarrResult};
use async_trait::async_trait;
use bytes::Bytes;
use std::path::{Path, PathBuf};

// ---------------------------------------------------------------------------
// StorageBackend trait
// ---------------------------------------------------------------------------

/// Async storage abstraction over a hierarchical key space.
///
/// Keys are `/`-separated paths relative to the store root. Implementations
/// can target local filesystem, S3, GCS, Azure, or in-memory stores.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Fetch the contents at `path`.
    /// Returns `Ok(None)` when the key does not exist (rather than an error).
    async fn get(&self, path: &str) -> ZarrResult<Option<Bytes>>;

    /// Store `value` at `path`, replacing any existing value.
    async fn set(&self, path: &str, value: Bytes) -> ZarrResult<()>;

    /// Remove the value at `path`. Erasing a missing key is not an error.
    async fn erase(&self, path: &str) -> ZarrResult<()>;

    /// List the names of the immediate children under `prefix`.
    async fn list(&self, prefix: &str) -> ZarrResult<Vec<String>>;

    /// List every key below `prefix`, recursively, as full keys.
    async fn list_prefix(&self, prefix: &str) -> ZarrResult<Vec<String>>;

    /// Remove every key below `prefix`.
    async fn erase_prefix(&self, prefix: &str) -> ZarrResult<()>;

    /// Move every key below `from` to the same relative key below `to`.
    ///
    /// Fails if `to` already holds any key.
    async fn rename_prefix(&self, from: &str, to: &str) -> ZarrResult<()>;

    /// Join a base path with a relative segment.
    fn join(&self, base: &str, segment: &str) -> String;
}

/// Split a node path into its parent path and final name.
pub fn split_parent(path: &str) -> (&str, &str) {
    let trimmed = path.trim_end_matches('/');
    match trimmed.rfind('/') {
        Some(idx) => (&trimmed[..idx], &trimmed[idx + 1..]),
        None => ("", trimmed),
    }
}

// ---------------------------------------------------------------------------
// LocalBackend  (tokio::fs)
// ---------------------------------------------------------------------------

/// Simple local-filesystem backend using `tokio::fs`.
///
/// `rename_prefix` maps onto a single directory rename, which is atomic on
/// POSIX filesystems.
#[derive(Debug, Clone)]
pub struct LocalBackend {
    root: PathBuf,
}

impl LocalBackend {
    /// Create a new backend rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, path: &str) -> PathBuf {
        self.root.join(path)
    }

    fn relative_key(&self, full: &Path) -> Option<String> {
        let rel = full.strip_prefix(&self.root).ok()?;
        let parts: Vec<&str> = rel
            .components()
            .filter_map(|c| c.as_os_str().to_str())
            .collect();
        Some(parts.join("/"))
    }
}

#[async_trait]
impl StorageBackend for LocalBackend {
    async fn get(&self, path: &str) -> ZarrResult<Option<Bytes>> {
        let full = self.resolve(path);
        match tokio::fs::read(&full).await {
            Ok(data) => {
                if data.is_empty() {
                    Ok(None)
                } else {
                    Ok(Some(Bytes::from(data)))
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(ZarrError::Storage(format!(
                "Failed to read {}: {e}",
                full.display()
            ))),
        }
    }

    async fn set(&self, path: &str, value: Bytes) -> ZarrResult<()> {
        let full = self.resolve(path);
        if let Some(parent) = full.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                ZarrError::Storage(format!("Failed to create {}: {e}", parent.display()))
            })?;
        }
        tokio::fs::write(&full, &value).await.map_err(|e| {
            ZarrError::Storage(format!("Failed to write {}: {e}", full.display()))
        })
    }

    async fn erase(&self, path: &str) -> ZarrResult<()> {
        let full = self.resolve(path);
        match tokio::fs::remove_file(&full).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(ZarrError::Storage(format!(
                "Failed to remove {}: {e}",
                full.display()
            ))),
        }
    }

    async fn list(&self, prefix: &str) -> ZarrResult<Vec<String>> {
        let dir = self.resolve(prefix);
        let mut entries = Vec::new();
        let mut reader = match tokio::fs::read_dir(&dir).await {
            Ok(reader) => reader,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(entries),
            Err(e) => {
                return Err(ZarrError::Storage(format!(
                    "Failed to list {}: {e}",
                    dir.display()
                )));
            }
        };
        while let Some(entry) = reader.next_entry().await.map_err(|e| {
            ZarrError::Storage(format!("Failed to read entry in {}: {e}", dir.display()))
        })? {
            if let Some(name) = entry.file_name().to_str() {
                entries.push(name.to_string());
            }
        }
        entries.sort();
        Ok(entries)
    }

    async fn list_prefix(&self, prefix: &str) -> ZarrResult<Vec<String>> {
        let mut keys = Vec::new();
        let mut pending = vec![self.resolve(prefix)];
        while let Some(dir) = pending.pop() {
            let mut reader = match tokio::fs::read_dir(&dir).await {
                Ok(reader) => reader,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => {
                    return Err(ZarrError::Storage(format!(
                        "Failed to list {}: {e}",
                        dir.display()
                    )));
                }
            };
            while let Some(entry) = reader.next_entry().await.map_err(|e| {
                ZarrError::Storage(format!("Failed to read entry in {}: {e}", dir.display()))
            })? {
                let file_type = entry.file_type().await?;
                if file_type.is_dir() {
                    pending.push(entry.path());
                } else if let Some(key) = self.relative_key(&entry.path()) {
                    keys.push(key);
                }
            }
        }
        keys.sort();
        Ok(keys)
    }

    async fn erase_prefix(&self, prefix: &str) -> ZarrResult<()> {
        let dir = self.resolve(prefix);
        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(ZarrError::Storage(format!(
                "Failed to remove {}: {e}",
                dir.display()
            ))),
        }
    }

    async fn rename_prefix(&self, from: &str, to: &str) -> ZarrResult<()> {
        let src = self.resolve(from);
        let dst = self.resolve(to);
        if tokio::fs::try_exists(&dst).await? {
            return Err(ZarrError::Storage(format!(
                "Cannot rename {} onto existing {}",
                src.display(),
                dst.display()
            )));
        }
        if let Some(parent) = dst.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::rename(&src, &dst).await.map_err(|e| {
            ZarrError::Storage(format!(
                "Failed to rename {} to {}: {e}",
                src.display(),
                dst.display()
            ))
        })
    }

    fn join(&self, base: &str, segment: &str) -> String {
        let p = Path::new(base).join(segment);
        p.to_string_lossy().into_owned()
    }
}

// ---------------------------------------------------------------------------
// ObjectStoreBackend  (wraps object_store crate)
// ---------------------------------------------------------------------------

/// Backend that wraps any [`object_store::ObjectStore`] implementation.
///
/// Object stores have no directory rename, so `rename_prefix` moves keys one
/// at a time and is not atomic.
pub struct ObjectStoreBackend {
    store: Box<dyn object_store::ObjectStore>,
    prefix: String,
}

impl ObjectStoreBackend {
    pub fn new(store: Box<dyn object_store::ObjectStore>, prefix: impl Into<String>) -> Self {
        Self {
            store,
            prefix: prefix.into(),
        }
    }

    /// Backend over a fresh [`object_store::memory::InMemory`] store.
    pub fn in_memory() -> Self {
        Self::new(Box::new(object_store::memory::InMemory::new()), "")
    }

    fn full_path(&self, path: &str) -> object_store::path::Path {
        if self.prefix.is_empty() {
            object_store::path::Path::from(path)
        } else {
            object_store::path::Path::from(format!("{}/{}", self.prefix, path))
        }
    }

    fn strip_prefix(&self, location: &object_store::path::Path) -> String {
        let full = location.to_string();
        if self.prefix.is_empty() {
            return full;
        }
        let root = format!("{}/", self.prefix);
        full.strip_prefix(&root).map(str::to_string).unwrap_or(full)
    }
}

#[async_trait]
impl StorageBackend for ObjectStoreBackend {
    async fn get(&self, path: &str) -> ZarrResult<Option<Bytes>> {
        let location = self.full_path(path);
        match self.store.get(&location).await {
            Ok(result) => {
                let data = result.bytes().await.map_err(|e| {
                    ZarrError::Storage(format!("Failed to read bytes from {path}: {e}"))
                })?;
                if data.is_empty() {
                    Ok(None)
                } else {
                    Ok(Some(data))
                }
            }
            Err(object_store::Error::NotFound { .. }) => Ok(None),
            Err(e) => Err(ZarrError::Storage(format!(
                "Object store error for {path}: {e}"
            ))),
        }
    }

    async fn set(&self, path: &str, value: Bytes) -> ZarrResult<()> {
        let location = self.full_path(path);
        self.store
            .put(&location, object_store::PutPayload::from(value))
            .await
            .map(|_| ())
            .map_err(|e| ZarrError::Storage(format!("Object store put error for {path}: {e}")))
    }

    async fn erase(&self, path: &str) -> ZarrResult<()> {
        let location = self.full_path(path);
        match self.store.delete(&location).await {
            Ok(()) | Err(object_store::Error::NotFound { .. }) => Ok(()),
            Err(e) => Err(ZarrError::Storage(format!(
                "Object store delete error for {path}: {e}"
            ))),
        }
    }

    async fn list(&self, prefix: &str) -> ZarrResult<Vec<String>> {
        let location = self.full_path(prefix);
        let listing = self
            .store
            .list_with_delimiter(Some(&location))
            .await
            .map_err(|e| {
                ZarrError::Storage(format!("Object store list error for {prefix}: {e}"))
            })?;
        let mut entries: Vec<String> = listing
            .common_prefixes
            .iter()
            .filter_map(|p| p.filename().map(str::to_string))
            .chain(
                listing
                    .objects
                    .iter()
                    .filter_map(|meta| meta.location.filename().map(str::to_string)),
            )
            .collect();
        entries.sort();
        Ok(entries)
    }

    async fn list_prefix(&self, prefix: &str) -> ZarrResult<Vec<String>> {
        use futures::TryStreamExt;
        let location = self.full_path(prefix);
        let mut entries = Vec::new();
        let mut stream = self.store.list(Some(&location));
        while let Some(meta) = stream.try_next().await.map_err(|e| {
            ZarrError::Storage(format!("Object store list error for {prefix}: {e}"))
        })? {
            entries.push(self.strip_prefix(&meta.location));
        }
        entries.sort();
        Ok(entries)
    }

    async fn erase_prefix(&self, prefix: &str) -> ZarrResult<()> {
        for key in self.list_prefix(prefix).await? {
            self.erase(&key).await?;
        }
        Ok(())
    }

    async fn rename_prefix(&self, from: &str, to: &str) -> ZarrResult<()> {
        if !self.list_prefix(to).await?.is_empty() {
            return Err(ZarrError::Storage(format!(
                "Cannot rename {from} onto existing {to}"
            )));
        }
        let from_root = from.trim_end_matches('/');
        for key in self.list_prefix(from).await? {
            let relative = key
                .strip_prefix(from_root)
                .unwrap_or(&key)
                .trim_start_matches('/');
            let target = self.join(to, relative);
            self.store
                .rename(&self.full_path(&key), &self.full_path(&target))
                .await
                .map_err(|e| {
                    ZarrError::Storage(format!("Object store rename error for {key}: {e}"))
                })?;
        }
        Ok(())
    }

    fn join(&self, base: &str, segment: &str) -> String {
        if base.is_empty() {
            segment.to_string()
        } else {
            format!("{base}/{segment}")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_parent_handles_root_and_nested() {
        assert_eq!(split_parent("a"), ("", "a"));
        assert_eq!(split_parent("a/b/c"), ("a/b", "c"));
        assert_eq!(split_parent("a/b/"), ("a", "b"));
    }

    #[tokio::test]
    async fn memory_backend_lists_immediate_children() {
        let store = ObjectStoreBackend::in_memory();
        store.set("g/zarr.json", Bytes::from_static(b"{}")).await.unwrap();
        store.set("g/a/zarr.json", Bytes::from_static(b"{}")).await.unwrap();
        store.set("g/a/c/0", Bytes::from_static(b"x")).await.unwrap();

        assert_eq!(store.list("g").await.unwrap(), vec!["a", "zarr.json"]);
        assert_eq!(
            store.list_prefix("g/a").await.unwrap(),
            vec!["g/a/c/0", "g/a/zarr.json"]
        );
    }

    #[tokio::test]
    async fn memory_backend_rename_moves_all_keys() {
        let store = ObjectStoreBackend::in_memory();
        store.set("g/a/zarr.json", Bytes::from_static(b"{}")).await.unwrap();
        store.set("g/a/c/0", Bytes::from_static(b"x")).await.unwrap();

        store.rename_prefix("g/a", "g/b").await.unwrap();

        assert!(store.list_prefix("g/a").await.unwrap().is_empty());
        assert_eq!(
            store.get("g/b/c/0").await.unwrap(),
            Some(Bytes::from_static(b"x"))
        );
        assert!(store.rename_prefix("g/b", "g/b").await.is_err());
    }

    #[tokio::test]
    async fn local_backend_round_trips_and_renames() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalBackend::new(dir.path());
        store.set("g/a/c/0/1", Bytes::from_static(b"abc")).await.unwrap();
        store.set("g/a/zarr.json", Bytes::from_static(b"{}")).await.unwrap();

        assert_eq!(
            store.list_prefix("g/a").await.unwrap(),
            vec!["g/a/c/0/1", "g/a/zarr.json"]
        );

        store.rename_prefix("g/a", "g/b").await.unwrap();
        assert_eq!(store.get("g/a/c/0/1").await.unwrap(), None);
        assert_eq!(
            store.get("g/b/c/0/1").await.unwrap(),
            Some(Bytes::from_static(b"abc"))
        );

        store.erase_prefix("g/b").await.unwrap();
        assert!(store.list("g").await.unwrap().is_empty());
    }
}
