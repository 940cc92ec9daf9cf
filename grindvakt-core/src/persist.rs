//! JSON document persistence for file-backed stores.
//!
//! Every read loads the file, so handles in other processes see each other's
//! writes. Updates run under an exclusive lock on a sibling `.lock` file,
//! reload the document, and rewrite it whole through a temporary file and a
//! rename. An update whose closure or write fails leaves the file untouched.

use std::fs::{File, OpenOptions};
use std::io::ErrorKind;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

use fs2::FileExt;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::StoreError;

pub struct JsonDocument<T> {
    path: PathBuf,
    _doc: PhantomData<fn() -> T>,
}

impl<T> JsonDocument<T>
where
    T: Serialize + DeserializeOwned + Default,
{
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            _doc: PhantomData,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn read<R>(&self, f: impl FnOnce(&T) -> R) -> Result<R, StoreError> {
        Ok(f(&self.load().await?))
    }

    pub async fn update<R>(
        &self,
        f: impl FnOnce(&mut T) -> Result<R, StoreError>,
    ) -> Result<R, StoreError> {
        let lock = self.lock().await?;
        let mut doc = self.load().await?;
        let result = f(&mut doc)?;
        self.persist(&doc).await?;
        drop(lock);
        Ok(result)
    }

    /// Blocks until this handle holds the document's lock file. The lock is
    /// released when the returned file is closed.
    async fn lock(&self) -> Result<File, StoreError> {
        self.ensure_parent().await?;
        let lock_path = self.path.with_extension("json.lock");
        tokio::task::spawn_blocking(move || -> Result<File, StoreError> {
            let file = OpenOptions::new()
                .create(true)
                .truncate(false)
                .read(true)
                .write(true)
                .open(&lock_path)?;
            file.lock_exclusive()?;
            Ok(file)
        })
        .await
        .map_err(|e| StoreError::Transient(format!("lock task failed: {e}")))?
    }

    async fn load(&self) -> Result<T, StoreError> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map_err(|e| StoreError::Serialization(format!("{}: {e}", self.path.display()))),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(T::default()),
            Err(e) => Err(e.into()),
        }
    }

    async fn persist(&self, doc: &T) -> Result<(), StoreError> {
        let bytes =
            serde_json::to_vec_pretty(doc).map_err(|e| StoreError::Serialization(e.to_string()))?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, bytes).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }

    async fn ensure_parent(&self) -> Result<(), StoreError> {
        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(dir).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    type Doc = BTreeMap<String, u32>;

    #[tokio::test]
    async fn missing_file_reads_as_default() {
        let dir = tempfile::tempdir().unwrap();
        let doc: JsonDocument<Doc> = JsonDocument::new(dir.path().join("absent.json"));
        assert_eq!(doc.read(|d| d.len()).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn updates_survive_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/doc.json");

        let doc: JsonDocument<Doc> = JsonDocument::new(&path);
        doc.update(|d| {
            d.insert("a".into(), 1);
            Ok(())
        })
        .await
        .unwrap();

        let reopened: JsonDocument<Doc> = JsonDocument::new(&path);
        assert_eq!(reopened.read(|d| d.get("a").copied()).await.unwrap(), Some(1));
    }

    #[tokio::test]
    async fn failed_update_changes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let doc: JsonDocument<Doc> = JsonDocument::new(dir.path().join("doc.json"));

        let result: Result<(), StoreError> = doc
            .update(|d| {
                d.insert("a".into(), 1);
                Err(StoreError::Rejected("no".into()))
            })
            .await;
        assert!(result.is_err());
        assert_eq!(doc.read(|d| d.len()).await.unwrap(), 0);
        assert!(!doc.path().exists());
    }

    #[tokio::test]
    async fn second_handle_sees_first_handles_writes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("doc.json");
        let first: JsonDocument<Doc> = JsonDocument::new(&path);
        let second: JsonDocument<Doc> = JsonDocument::new(&path);

        assert_eq!(second.read(|d| d.len()).await.unwrap(), 0);
        first
            .update(|d| {
                d.insert("a".into(), 1);
                Ok(())
            })
            .await
            .unwrap();
        second
            .update(|d| {
                d.insert("b".into(), 2);
                Ok(())
            })
            .await
            .unwrap();

        let keys = first.read(|d| d.keys().cloned().collect::<Vec<_>>()).await.unwrap();
        assert_eq!(keys, vec!["a".to_string(), "b".to_string()]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_handles_lose_no_updates() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("counter.json");

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let path = path.clone();
                tokio::spawn(async move {
                    let doc: JsonDocument<Doc> = JsonDocument::new(path);
                    for _ in 0..10 {
                        doc.update(|d| {
                            *d.entry("n".into()).or_default() += 1;
                            Ok(())
                        })
                        .await
                        .unwrap();
                    }
                })
            })
            .collect();
        for task in tasks {
            task.await.unwrap();
        }

        let doc: JsonDocument<Doc> = JsonDocument::new(&path);
        assert_eq!(doc.read(|d| d.get("n").copied()).await.unwrap(), Some(80));
    }

    #[tokio::test]
    async fn corrupt_file_is_a_serialization_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("doc.json");
        std::fs::write(&path, b"{not json").unwrap();
        let doc: JsonDocument<Doc> = JsonDocument::new(&path);
        assert!(matches!(
            doc.read(|d| d.len()).await,
            Err(StoreError::Serialization(_))
        ));
    }
}
