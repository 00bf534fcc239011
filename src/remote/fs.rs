use async_trait::async_trait;
use std::path::{Component, Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::{MetadataSink, ObjectStorage};
use crate::error::RemoteError;

/// Backend stored on the local filesystem (or a mounted share):
/// - objects under `<root>/objects/<container>/<path>`
/// - rows appended as JSON lines to `<root>/tables/<table>.jsonl`
#[derive(Debug)]
pub struct FsRemote {
    root: PathBuf,
    public_base_url: Option<String>,
    max_object_bytes: usize,
    // serializes appends to the table files
    table_lock: Mutex<()>,
}

impl FsRemote {
    pub fn new(root: impl Into<PathBuf>, public_base_url: Option<String>, max_object_bytes: usize) -> Self {
        Self {
            root: root.into(),
            public_base_url: public_base_url.map(|url| url.trim_end_matches('/').to_string()),
            max_object_bytes,
            table_lock: Mutex::new(()),
        }
    }

    fn container_dir(&self, container: &str) -> PathBuf {
        self.root.join("objects").join(container)
    }

    fn table_file(&self, table: &str) -> PathBuf {
        self.root.join("tables").join(format!("{table}.jsonl"))
    }

    /// Resolve an object path, refusing anything that escapes the container
    fn object_path(&self, container: &str, path: &str) -> Result<PathBuf, RemoteError> {
        let relative = Path::new(path);
        let safe = relative
            .components()
            .all(|c| matches!(c, Component::Normal(_)));
        if !safe || path.is_empty() {
            return Err(RemoteError::Upload {
                path: path.to_string(),
                reason: "object path must be relative and stay inside the container".into(),
            });
        }
        Ok(self.container_dir(container).join(relative))
    }

    /// Read back every row inserted into `table`
    pub async fn read_rows(&self, table: &str) -> Result<Vec<serde_json::Value>, RemoteError> {
        let contents = match fs::read_to_string(self.table_file(table)).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        contents
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| {
                serde_json::from_str(line).map_err(|e| RemoteError::Insert {
                    table: table.to_string(),
                    reason: format!("corrupt row: {e}"),
                })
            })
            .collect()
    }
}

#[async_trait]
impl ObjectStorage for FsRemote {
    async fn ensure_container(&self, name: &str) -> Result<(), RemoteError> {
        let dir = self.container_dir(name);
        if fs::metadata(&dir).await.map(|m| m.is_dir()).unwrap_or(false) {
            return Ok(());
        }

        fs::create_dir_all(&dir)
            .await
            .map_err(|e| RemoteError::ContainerUnavailable(name.to_string(), e.to_string()))?;
        info!(container = %name, path = %dir.display(), "Created container");
        Ok(())
    }

    async fn upload_object(&self, container: &str, path: &str, bytes: &[u8]) -> Result<(), RemoteError> {
        if bytes.len() > self.max_object_bytes {
            return Err(RemoteError::TooLarge {
                size: bytes.len(),
                limit: self.max_object_bytes,
            });
        }

        let target = self.object_path(container, path)?;
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).await?;
        }

        // never overwrite an existing object
        let mut file = fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&target)
            .await
            .map_err(|e| RemoteError::Upload {
                path: path.to_string(),
                reason: e.to_string(),
            })?;
        file.write_all(bytes).await?;
        file.flush().await?;

        debug!(%container, %path, size = bytes.len(), "Uploaded object");
        Ok(())
    }

    async fn public_url(&self, container: &str, path: &str) -> Option<String> {
        let target = self.object_path(container, path).ok()?;
        if !fs::try_exists(&target).await.unwrap_or(false) {
            return None;
        }

        match &self.public_base_url {
            Some(base) => Some(format!("{base}/{container}/{path}")),
            None => {
                let absolute = fs::canonicalize(&target).await.ok()?;
                Some(format!("file://{}", absolute.display()))
            }
        }
    }
}

#[async_trait]
impl MetadataSink for FsRemote {
    async fn insert_record(&self, table: &str, fields: serde_json::Value) -> Result<(), RemoteError> {
        let insert_err = |reason: String| RemoteError::Insert {
            table: table.to_string(),
            reason,
        };

        let mut line = serde_json::to_string(&fields).map_err(|e| insert_err(e.to_string()))?;
        line.push('\n');

        let _guard = self.table_lock.lock().await;
        let file_path = self.table_file(table);
        if let Some(parent) = file_path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&file_path)
            .await
            .map_err(|e| insert_err(e.to_string()))?;
        file.write_all(line.as_bytes())
            .await
            .map_err(|e| insert_err(e.to_string()))?;
        file.flush().await?;

        debug!(%table, "Inserted row");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn remote(dir: &TempDir, base: Option<&str>) -> FsRemote {
        FsRemote::new(dir.path(), base.map(String::from), 1024)
    }

    #[tokio::test]
    async fn upload_then_resolve_public_url() {
        let dir = TempDir::new().unwrap();
        let remote = remote(&dir, Some("https://cdn.example.com/storage/"));

        remote.ensure_container("pictures").await.unwrap();
        remote.ensure_container("pictures").await.unwrap();
        remote
            .upload_object("pictures", "stores/store-1/x.png", b"png")
            .await
            .unwrap();

        let stored = std::fs::read(dir.path().join("objects/pictures/stores/store-1/x.png")).unwrap();
        assert_eq!(stored, b"png");
        assert_eq!(
            remote.public_url("pictures", "stores/store-1/x.png").await.as_deref(),
            Some("https://cdn.example.com/storage/pictures/stores/store-1/x.png")
        );
    }

    #[tokio::test]
    async fn missing_object_has_no_url() {
        let dir = TempDir::new().unwrap();
        let remote = remote(&dir, None);
        remote.ensure_container("pictures").await.unwrap();

        assert!(remote.public_url("pictures", "stores/nope.png").await.is_none());
    }

    #[tokio::test]
    async fn file_urls_without_public_base() {
        let dir = TempDir::new().unwrap();
        let remote = remote(&dir, None);
        remote.upload_object("pictures", "a.jpg", b"jpg").await.unwrap();

        let url = remote.public_url("pictures", "a.jpg").await.unwrap();
        assert!(url.starts_with("file://"));
        assert!(url.ends_with("a.jpg"));
    }

    #[tokio::test]
    async fn oversized_and_escaping_uploads_are_rejected() {
        let dir = TempDir::new().unwrap();
        let remote = remote(&dir, None);

        let big = vec![0u8; 2048];
        assert!(matches!(
            remote.upload_object("pictures", "big.bin", &big).await,
            Err(RemoteError::TooLarge { size: 2048, limit: 1024 })
        ));
        assert!(matches!(
            remote.upload_object("pictures", "../outside.png", b"x").await,
            Err(RemoteError::Upload { .. })
        ));
    }

    #[tokio::test]
    async fn existing_objects_are_not_overwritten() {
        let dir = TempDir::new().unwrap();
        let remote = remote(&dir, None);

        remote.upload_object("pictures", "a.png", b"first").await.unwrap();
        assert!(remote.upload_object("pictures", "a.png", b"second").await.is_err());
    }

    #[tokio::test]
    async fn rows_are_appended_in_order() {
        let dir = TempDir::new().unwrap();
        let remote = remote(&dir, None);

        assert!(remote.read_rows("pictures").await.unwrap().is_empty());
        remote.insert_record("pictures", json!({ "n": 1 })).await.unwrap();
        remote.insert_record("pictures", json!({ "n": 2 })).await.unwrap();

        let rows = remote.read_rows("pictures").await.unwrap();
        assert_eq!(rows, vec![json!({ "n": 1 }), json!({ "n": 2 })]);
    }
}
