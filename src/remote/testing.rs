//! In-memory backend that records every call, with failure injection keyed
//! on the uploaded payload.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use super::{MetadataSink, ObjectStorage};
use crate::error::RemoteError;
use crate::state::record::RecordId;
use crate::state::store::CaptureStore;

#[derive(Debug, Default)]
pub(crate) struct FakeRemote {
    state: Mutex<FakeState>,
}

#[derive(Debug, Default)]
struct FakeState {
    containers: HashSet<String>,
    objects: HashMap<String, Vec<u8>>,
    rows: Vec<serde_json::Value>,
    ensure_calls: usize,
    upload_calls: usize,
    url_calls: usize,
    insert_calls: usize,
    fail_containers: bool,
    failing_uploads: HashSet<Vec<u8>>,
    unresolvable: HashSet<Vec<u8>>,
    failing_inserts: HashSet<Vec<u8>>,
    removed_mid_upload: Option<(Vec<u8>, CaptureStore, RecordId)>,
}

impl FakeRemote {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> std::sync::MutexGuard<'_, FakeState> {
        self.state.lock().unwrap()
    }

    pub fn fail_containers(&self) {
        self.state().fail_containers = true;
    }

    pub fn fail_upload_of(&self, payload: &[u8]) {
        self.state().failing_uploads.insert(payload.to_vec());
    }

    pub fn heal_upload_of(&self, payload: &[u8]) {
        self.state().failing_uploads.remove(payload);
    }

    pub fn fail_url_of(&self, payload: &[u8]) {
        self.state().unresolvable.insert(payload.to_vec());
    }

    pub fn fail_insert_of(&self, payload: &[u8]) {
        self.state().failing_inserts.insert(payload.to_vec());
    }

    /// Delete `id` from `store` while the upload of `payload` is in flight
    pub fn remove_during_upload_of(&self, payload: &[u8], store: CaptureStore, id: RecordId) {
        self.state().removed_mid_upload = Some((payload.to_vec(), store, id));
    }

    pub fn ensure_calls(&self) -> usize {
        self.state().ensure_calls
    }

    pub fn upload_calls(&self) -> usize {
        self.state().upload_calls
    }

    pub fn url_calls(&self) -> usize {
        self.state().url_calls
    }

    pub fn insert_calls(&self) -> usize {
        self.state().insert_calls
    }

    pub fn total_calls(&self) -> usize {
        let s = self.state();
        s.ensure_calls + s.upload_calls + s.url_calls + s.insert_calls
    }

    pub fn object_paths(&self) -> Vec<String> {
        let mut paths: Vec<_> = self.state().objects.keys().cloned().collect();
        paths.sort();
        paths
    }

    pub fn rows(&self) -> Vec<serde_json::Value> {
        self.state().rows.clone()
    }
}

fn url_for(container: &str, path: &str) -> String {
    format!("https://remote.test/{container}/{path}")
}

#[async_trait]
impl ObjectStorage for FakeRemote {
    async fn ensure_container(&self, name: &str) -> Result<(), RemoteError> {
        let mut s = self.state();
        s.ensure_calls += 1;
        if s.fail_containers {
            return Err(RemoteError::ContainerUnavailable(name.into(), "injected".into()));
        }
        s.containers.insert(name.to_string());
        Ok(())
    }

    async fn upload_object(&self, container: &str, path: &str, bytes: &[u8]) -> Result<(), RemoteError> {
        let removal = {
            let mut s = self.state();
            s.upload_calls += 1;
            if !s.containers.contains(container) || s.failing_uploads.contains(bytes) {
                return Err(RemoteError::Upload {
                    path: path.into(),
                    reason: "injected".into(),
                });
            }
            s.objects.insert(url_for(container, path), bytes.to_vec());
            match &s.removed_mid_upload {
                Some((payload, _, _)) if payload.as_slice() == bytes => s.removed_mid_upload.take(),
                _ => None,
            }
        };

        if let Some((_, store, id)) = removal {
            store.remove(&id).await.unwrap();
        }
        Ok(())
    }

    async fn public_url(&self, container: &str, path: &str) -> Option<String> {
        let mut s = self.state();
        s.url_calls += 1;
        let url = url_for(container, path);
        let payload = s.objects.get(&url)?;
        if s.unresolvable.contains(payload) {
            return None;
        }
        Some(url)
    }
}

#[async_trait]
impl MetadataSink for FakeRemote {
    async fn insert_record(&self, table: &str, fields: serde_json::Value) -> Result<(), RemoteError> {
        let mut s = self.state();
        s.insert_calls += 1;
        let payload = fields
            .get("image_url")
            .and_then(|url| url.as_str())
            .and_then(|url| s.objects.get(url));
        if payload.is_some_and(|p| s.failing_inserts.contains(p)) {
            return Err(RemoteError::Insert {
                table: table.into(),
                reason: "injected".into(),
            });
        }
        s.rows.push(fields);
        Ok(())
    }
}
