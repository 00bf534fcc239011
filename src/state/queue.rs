use chrono::Utc;
use std::sync::Arc;
use tracing::{info, warn};

use super::preview::PreviewCache;
use super::record::{CaptureMeta, CaptureRecord, RecordId};
use super::store::CaptureStore;
use crate::error::StoreError;
use crate::remote::AuthProvider;
use crate::sync::status::StatusBoard;

/// Write path of the offline queue: turns captures into durable records
/// and exposes them for display.
///
/// The pending count published on the status board is always re-read from
/// the store after a write, never tracked separately.
#[derive(Clone)]
pub struct CaptureQueue {
    store: CaptureStore,
    previews: PreviewCache,
    status: StatusBoard,
    auth: Arc<dyn AuthProvider>,
}

impl CaptureQueue {
    pub fn new(store: CaptureStore, status: StatusBoard, auth: Arc<dyn AuthProvider>) -> Self {
        status.set_storage_available(store.is_available());
        Self {
            store,
            previews: PreviewCache::new(),
            status,
            auth,
        }
    }

    pub fn store(&self) -> &CaptureStore {
        &self.store
    }

    pub fn status(&self) -> &StatusBoard {
        &self.status
    }

    /// Queue a capture and return its new local id.
    /// Storage failures are returned to the caller.
    pub async fn enqueue(
        &self,
        owner_id: &str,
        payload: Vec<u8>,
        file_name: &str,
        meta: CaptureMeta,
    ) -> Result<RecordId, StoreError> {
        if !self.store.is_available() {
            return Err(StoreError::Unavailable);
        }

        let id = RecordId::generate();
        let preview = self.previews.handle_for(&id, &payload).await;
        let record = CaptureRecord {
            id: id.clone(),
            owner_id: owner_id.to_string(),
            payload,
            file_name: file_name.to_string(),
            preview: Some(preview),
            created_at_ms: Utc::now().timestamp_millis(),
            uploaded: false,
            meta,
        };

        if let Err(e) = self.store.put(&record).await {
            self.previews.evict(&id);
            return Err(e);
        }

        let recount = self.store.count_pending().await;
        let pending = self.publish_enqueued(recount);

        info!(record_id = %id, %owner_id, size = record.payload.len(), pending, "Queued capture");
        Ok(id)
    }

    /// The capture is durable at this point, so a failed recount only
    /// degrades the badge until the next refresh
    fn publish_enqueued(&self, recount: Result<usize, StoreError>) -> usize {
        let pending = match recount {
            Ok(pending) => pending,
            Err(e) => {
                warn!("Failed to count pending captures after enqueue: {e}");
                self.status.current().pending_count.saturating_add(1)
            }
        };
        self.status.record_enqueue(pending);
        pending
    }

    /// Queue a capture attributed to the signed-in user
    pub async fn capture(
        &self,
        owner_id: &str,
        payload: Vec<u8>,
        file_name: &str,
    ) -> Result<RecordId, StoreError> {
        let meta = CaptureMeta {
            uploaded_by: self.auth.current_user_id(),
            original_name: Some(file_name.to_string()),
        };
        self.enqueue(owner_id, payload, file_name, meta).await
    }

    /// Look up a single capture, uploaded or not
    pub async fn get(&self, id: &RecordId) -> Result<Option<CaptureRecord>, StoreError> {
        match self.store.get(id).await? {
            Some(record) => Ok(Some(self.previews.attach(record).await)),
            None => Ok(None),
        }
    }

    /// Captures still waiting for upload, optionally for one owner, oldest first
    pub async fn list_pending(&self, owner_id: Option<&str>) -> Result<Vec<CaptureRecord>, StoreError> {
        let records = match owner_id {
            Some(owner) => self
                .store
                .list_by_owner(owner)
                .await?
                .into_iter()
                .filter(CaptureRecord::is_pending)
                .collect(),
            None => self.store.list_pending().await?,
        };
        Ok(self.with_previews(records).await)
    }

    /// Every local capture including already synced ones, oldest first
    pub async fn list_all(&self, owner_id: Option<&str>) -> Result<Vec<CaptureRecord>, StoreError> {
        let records = match owner_id {
            Some(owner) => self.store.list_by_owner(owner).await?,
            None => self.store.list_all().await?,
        };
        Ok(self.with_previews(records).await)
    }

    /// User-initiated deletion. Removing an unknown id succeeds.
    pub async fn remove(&self, id: &RecordId) -> Result<(), StoreError> {
        self.store.remove(id).await?;
        self.previews.evict(id);
        self.status.refresh_pending(&self.store).await;
        info!(record_id = %id, "Removed capture");
        Ok(())
    }

    pub async fn count_pending(&self) -> Result<usize, StoreError> {
        self.store.count_pending().await
    }

    async fn with_previews(&self, records: Vec<CaptureRecord>) -> Vec<CaptureRecord> {
        let mut out = Vec::with_capacity(records.len());
        for record in records {
            out.push(self.previews.attach(record).await);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::StaticAuth;
    use tempfile::TempDir;

    fn queue_at(dir: &TempDir) -> CaptureQueue {
        let store = CaptureStore::try_open(&dir.path().join("captures.db")).unwrap();
        CaptureQueue::new(
            store,
            StatusBoard::new(false, true),
            Arc::new(StaticAuth::new(Some("user-1".into()))),
        )
    }

    #[tokio::test]
    async fn enqueue_is_visible_in_next_count() {
        let dir = TempDir::new().unwrap();
        let queue = queue_at(&dir);

        let id = queue
            .enqueue("store-1", b"img".to_vec(), "a.png", CaptureMeta::default())
            .await
            .unwrap();

        assert!(id.is_local());
        assert_eq!(queue.count_pending().await.unwrap(), 1);
        assert_eq!(queue.status().current().pending_count, 1);
        assert_eq!(queue.status().current().queue_revision, 1);
    }

    #[tokio::test]
    async fn capture_fills_meta_from_auth() {
        let dir = TempDir::new().unwrap();
        let queue = queue_at(&dir);

        let id = queue.capture("store-1", b"img".to_vec(), "shelf.jpg").await.unwrap();
        let record = queue.get(&id).await.unwrap().unwrap();

        assert_eq!(record.meta.uploaded_by.as_deref(), Some("user-1"));
        assert_eq!(record.meta.original_name.as_deref(), Some("shelf.jpg"));
        assert!(record.preview.is_some());
    }

    #[tokio::test]
    async fn removing_one_of_three_leaves_the_others() {
        let dir = TempDir::new().unwrap();
        let queue = queue_at(&dir);

        let mut ids = Vec::new();
        for n in 0..3u8 {
            let id = queue
                .enqueue("store-1", vec![n], "a.png", CaptureMeta::default())
                .await
                .unwrap();
            ids.push(id);
        }
        queue.remove(&ids[1]).await.unwrap();

        let mut remaining: Vec<_> = queue
            .list_pending(None)
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.id)
            .collect();
        remaining.sort();
        let mut expected = vec![ids[0].clone(), ids[2].clone()];
        expected.sort();

        assert_eq!(remaining, expected);
        assert_eq!(queue.status().current().pending_count, 2);
    }

    #[tokio::test]
    async fn list_pending_filters_by_owner_and_status() {
        let dir = TempDir::new().unwrap();
        let queue = queue_at(&dir);

        let a = queue.enqueue("store-1", vec![1], "a.png", CaptureMeta::default()).await.unwrap();
        let b = queue.enqueue("store-1", vec![2], "b.png", CaptureMeta::default()).await.unwrap();
        let _c = queue.enqueue("store-2", vec![3], "c.png", CaptureMeta::default()).await.unwrap();
        queue.store().mark_uploaded(&a).await.unwrap();

        let pending = queue.list_pending(Some("store-1")).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, b);

        assert_eq!(queue.list_pending(None).await.unwrap().len(), 2);
        assert_eq!(queue.list_all(Some("store-1")).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn previews_are_regenerated_after_reopen() {
        let dir = TempDir::new().unwrap();
        let id = {
            let queue = queue_at(&dir);
            queue.enqueue("store-1", b"img".to_vec(), "a.png", CaptureMeta::default())
                .await
                .unwrap()
        };

        let reopened = queue_at(&dir);
        let pending = reopened.list_pending(None).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, id);
        let preview = pending[0].preview.as_ref().unwrap();
        assert_eq!(&*preview.bytes, b"img");
    }

    #[tokio::test]
    async fn failed_recount_after_enqueue_still_publishes_the_capture() {
        let dir = TempDir::new().unwrap();
        let queue = queue_at(&dir);
        queue.enqueue("store-1", vec![1], "a.png", CaptureMeta::default()).await.unwrap();
        let mut rx = queue.status().subscribe();

        let published = queue.publish_enqueued(Err(StoreError::Poisoned));

        assert_eq!(published, 2);
        assert!(rx.has_changed().unwrap());
        let status = *rx.borrow_and_update();
        assert_eq!(status.pending_count, 2);
        assert_eq!(status.queue_revision, 2);
    }

    #[tokio::test]
    async fn enqueue_fails_when_storage_is_unavailable() {
        let board = StatusBoard::new(true, true);
        let queue = CaptureQueue::new(
            CaptureStore::unavailable(),
            board.clone(),
            Arc::new(StaticAuth::default()),
        );

        assert!(!board.current().storage_available);
        let result = queue
            .enqueue("store-1", b"img".to_vec(), "a.png", CaptureMeta::default())
            .await;
        assert!(matches!(result, Err(StoreError::Unavailable)));
    }
}
