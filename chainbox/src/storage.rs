//! Storage adapters (spec component 11, §4.12 `kv`/`blob`): namespaced
//! key-value access with last-writer-wins semantics. Concrete backends are
//! out of scope (spec §1 "Out of scope"); this is the adapter contract and
//! a filesystem-backed implementation for local/dev use and for the Mesh
//! node binary.

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::RwLock;

#[async_trait]
pub trait StorageAdapter: Send + Sync {
    async fn get(&self, namespace: &str, key: &str) -> std::io::Result<Option<Vec<u8>>>;
    async fn set(&self, namespace: &str, key: &str, value: Vec<u8>) -> std::io::Result<()>;
    async fn delete(&self, namespace: &str, key: &str) -> std::io::Result<()>;
    async fn list(&self, namespace: &str, prefix: &str) -> std::io::Result<Vec<String>>;
}

/// In-process, namespace-scoped storage backed by a filesystem directory
/// tree: `<root>/<namespace>/<url-encoded key>`. Concurrent writers to the
/// same key are last-writer-wins (spec §5 "Shared resources").
pub struct FsStorageAdapter {
    root: PathBuf,
}

impl FsStorageAdapter {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path_for(&self, namespace: &str, key: &str) -> PathBuf {
        self.root
            .join(namespace)
            .join(urlencoding::encode(key).into_owned())
    }
}

#[async_trait]
impl StorageAdapter for FsStorageAdapter {
    async fn get(&self, namespace: &str, key: &str) -> std::io::Result<Option<Vec<u8>>> {
        let path = self.path_for(namespace, key);
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn set(&self, namespace: &str, key: &str, value: Vec<u8>) -> std::io::Result<()> {
        let path = self.path_for(namespace, key);
        if let Some(dir) = path.parent() {
            tokio::fs::create_dir_all(dir).await?;
        }
        tokio::fs::write(path, value).await
    }

    async fn delete(&self, namespace: &str, key: &str) -> std::io::Result<()> {
        let path = self.path_for(namespace, key);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn list(&self, namespace: &str, prefix: &str) -> std::io::Result<Vec<String>> {
        let dir = self.root.join(namespace);
        let mut names = Vec::new();
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(names),
            Err(e) => return Err(e),
        };
        while let Some(entry) = entries.next_entry().await? {
            if let Some(name) = entry.file_name().to_str() {
                if let Ok(decoded) = urlencoding::decode(name) {
                    if decoded.starts_with(prefix) {
                        names.push(decoded.into_owned());
                    }
                }
            }
        }
        Ok(names)
    }
}

/// Purely in-memory storage adapter, used by tests and ephemeral nodes.
#[derive(Default)]
pub struct MemoryStorageAdapter {
    data: RwLock<HashMap<(String, String), Vec<u8>>>,
}

#[async_trait]
impl StorageAdapter for MemoryStorageAdapter {
    async fn get(&self, namespace: &str, key: &str) -> std::io::Result<Option<Vec<u8>>> {
        Ok(self
            .data
            .read()
            .unwrap()
            .get(&(namespace.to_string(), key.to_string()))
            .cloned())
    }

    async fn set(&self, namespace: &str, key: &str, value: Vec<u8>) -> std::io::Result<()> {
        self.data
            .write()
            .unwrap()
            .insert((namespace.to_string(), key.to_string()), value);
        Ok(())
    }

    async fn delete(&self, namespace: &str, key: &str) -> std::io::Result<()> {
        self.data
            .write()
            .unwrap()
            .remove(&(namespace.to_string(), key.to_string()));
        Ok(())
    }

    async fn list(&self, namespace: &str, prefix: &str) -> std::io::Result<Vec<String>> {
        Ok(self
            .data
            .read()
            .unwrap()
            .keys()
            .filter(|(ns, key)| ns == namespace && key.starts_with(prefix))
            .map(|(_, key)| key.clone())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_adapter_round_trips() {
        let adapter = MemoryStorageAdapter::default();
        adapter.set("kv", "a", b"1".to_vec()).await.unwrap();
        assert_eq!(adapter.get("kv", "a").await.unwrap(), Some(b"1".to_vec()));
        adapter.delete("kv", "a").await.unwrap();
        assert_eq!(adapter.get("kv", "a").await.unwrap(), None);
    }

    #[tokio::test]
    async fn memory_adapter_lists_by_prefix() {
        let adapter = MemoryStorageAdapter::default();
        adapter.set("kv", "user:1", b"a".to_vec()).await.unwrap();
        adapter.set("kv", "user:2", b"b".to_vec()).await.unwrap();
        adapter.set("kv", "order:1", b"c".to_vec()).await.unwrap();
        let mut names = adapter.list("kv", "user:").await.unwrap();
        names.sort();
        assert_eq!(names, vec!["user:1".to_string(), "user:2".to_string()]);
    }

    #[tokio::test]
    async fn fs_adapter_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let adapter = FsStorageAdapter::new(dir.path());
        adapter.set("kv", "a/b", b"hello".to_vec()).await.unwrap();
        assert_eq!(adapter.get("kv", "a/b").await.unwrap(), Some(b"hello".to_vec()));
        adapter.delete("kv", "a/b").await.unwrap();
        assert_eq!(adapter.get("kv", "a/b").await.unwrap(), None);
    }
}
