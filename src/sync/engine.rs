use serde::Serialize;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::status::StatusBoard;
use crate::error::{RemoteError, StoreError};
use crate::net::{ConnectivityMonitor, Subscription};
use crate::remote::{MetadataSink, ObjectStorage};
use crate::state::record::CaptureRecord;
use crate::state::store::CaptureStore;

/// Where synced captures go on the backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncSettings {
    pub bucket: String,
    pub table: String,
    pub object_prefix: String,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            bucket: "pictures".to_string(),
            table: "pictures".to_string(),
            object_prefix: "stores".to_string(),
        }
    }
}

/// Metadata row inserted for every synced picture
#[derive(Debug, Serialize)]
struct PictureRow<'a> {
    store_id: &'a str,
    image_url: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    uploaded_by: Option<&'a str>,
}

/// Outcome of one sync pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub attempted: usize,
    pub uploaded: usize,
    pub failed: usize,
}

/// Drains the capture queue into the backend.
///
/// Only one pass runs at a time: a pass requested while another is in
/// flight returns immediately. Failed captures stay pending for the next
/// pass, there is no retry within a pass.
pub struct SyncEngine {
    store: CaptureStore,
    monitor: ConnectivityMonitor,
    objects: Arc<dyn ObjectStorage>,
    metadata: Arc<dyn MetadataSink>,
    status: StatusBoard,
    settings: SyncSettings,
    in_flight: AtomicBool,
    _connectivity: Subscription,
}

impl SyncEngine {
    pub fn new(
        store: CaptureStore,
        monitor: ConnectivityMonitor,
        objects: Arc<dyn ObjectStorage>,
        metadata: Arc<dyn MetadataSink>,
        status: StatusBoard,
        settings: SyncSettings,
    ) -> Self {
        let connectivity = status.follow(&monitor);
        status.set_storage_available(store.is_available());
        Self {
            store,
            monitor,
            objects,
            metadata,
            status,
            settings,
            in_flight: AtomicBool::new(false),
            _connectivity: connectivity,
        }
    }

    pub fn status(&self) -> &StatusBoard {
        &self.status
    }

    /// Push every pending capture to the backend.
    ///
    /// Returns how many captures were delivered in this pass. Never fails:
    /// offline, degraded storage or an overlapping pass all yield 0.
    pub async fn sync_all(&self) -> usize {
        self.sync_with_report().await.uploaded
    }

    /// Same pass as `sync_all`, with failure counts for callers that show them
    pub async fn sync_with_report(&self) -> SyncReport {
        self.run_pass().await.unwrap_or_default()
    }

    /// `None` when another pass is already in flight
    async fn run_pass(&self) -> Option<SyncReport> {
        if !self.monitor.current() {
            debug!("Skipping sync pass, offline");
            return Some(SyncReport::default());
        }
        if !self.store.is_available() {
            debug!("Skipping sync pass, offline storage unavailable");
            return Some(SyncReport::default());
        }

        let _guard = InFlight::acquire(&self.in_flight, &self.status)?;

        // snapshot: captures queued from here on wait for the next pass
        let pending = match self.store.list_pending().await {
            Ok(pending) => pending,
            Err(e) => {
                warn!("Failed to list pending captures: {e}");
                return Some(SyncReport::default());
            }
        };

        let mut report = SyncReport {
            attempted: pending.len(),
            ..SyncReport::default()
        };

        for record in &pending {
            match self.push_record(record).await {
                Ok(url) => match self.store.mark_uploaded(&record.id).await {
                    Ok(()) => {
                        report.uploaded += 1;
                        debug!(record_id = %record.id, %url, "Synced capture");
                    }
                    Err(StoreError::NotFound(_)) => {
                        debug!(record_id = %record.id, "Capture was removed during sync");
                    }
                    Err(e) => {
                        report.failed += 1;
                        warn!(record_id = %record.id, "Uploaded capture but failed to mark it: {e}");
                    }
                },
                Err(e) => {
                    report.failed += 1;
                    warn!(record_id = %record.id, owner_id = %record.owner_id, "Failed to sync capture: {e}");
                }
            }
        }

        let pending_after = self.status.refresh_pending(&self.store).await;

        if report.attempted > 0 {
            info!(
                attempted = report.attempted,
                uploaded = report.uploaded,
                failed = report.failed,
                pending = pending_after,
                "Sync complete"
            );
        }

        Some(report)
    }

    /// Upload one capture and insert its row; returns the public URL
    async fn push_record(&self, record: &CaptureRecord) -> Result<String, RemoteError> {
        let bucket = &self.settings.bucket;

        self.objects.ensure_container(bucket).await?;

        let path = remote_path(&self.settings.object_prefix, &record.owner_id, &record.file_name);
        self.objects.upload_object(bucket, &path, &record.payload).await?;

        let url = self
            .objects
            .public_url(bucket, &path)
            .await
            .ok_or_else(|| RemoteError::UrlUnresolved(path.clone()))?;

        let row = PictureRow {
            store_id: &record.owner_id,
            image_url: &url,
            uploaded_by: record.meta.uploaded_by.as_deref(),
        };
        let fields = serde_json::to_value(&row).map_err(|e| RemoteError::Insert {
            table: self.settings.table.clone(),
            reason: e.to_string(),
        })?;
        self.metadata.insert_record(&self.settings.table, fields).await?;

        Ok(url)
    }

    /// Run a pass whenever connectivity comes back, or when new captures
    /// are queued while online.
    ///
    /// Runs until the returned handle is aborted.
    pub fn spawn_auto_sync(self: &Arc<Self>) -> JoinHandle<()> {
        let engine = Arc::clone(self);
        let mut rx = self.status.subscribe();
        let mut was_online = rx.borrow_and_update().is_online;

        tokio::spawn(async move {
            let mut synced_revision: Option<u64> = None;

            // captures queued by an earlier run count as pending work
            engine.status.refresh_pending(&engine.store).await;

            loop {
                let now = *rx.borrow_and_update();
                let reconnected = now.is_online && !was_online;
                let new_work = now.is_online
                    && now.pending_count > 0
                    && synced_revision != Some(now.queue_revision);
                was_online = now.is_online;

                if reconnected || new_work {
                    if engine.run_pass().await.is_some() {
                        synced_revision = Some(now.queue_revision);
                        continue;
                    }
                    // another pass is running; its completion wakes us up
                }

                if rx.changed().await.is_err() {
                    break;
                }
            }
        })
    }
}

/// Holds the in-flight flag for the duration of a pass
struct InFlight<'a> {
    flag: &'a AtomicBool,
    status: &'a StatusBoard,
}

impl<'a> InFlight<'a> {
    fn acquire(flag: &'a AtomicBool, status: &'a StatusBoard) -> Option<Self> {
        if flag
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("Sync pass already in flight");
            return None;
        }
        status.set_syncing(true);
        Some(Self { flag, status })
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
        self.status.set_syncing(false);
    }
}

/// `<prefix>/<owner>/<random>.<ext>`, fresh on every attempt so a retry
/// never collides with an object left by an earlier partial attempt
fn remote_path(prefix: &str, owner_id: &str, file_name: &str) -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    let extension = Path::new(file_name)
        .extension()
        .map(|ext| sanitize_segment(&ext.to_string_lossy()))
        .filter(|ext| !ext.is_empty());

    let name = match extension {
        Some(ext) => format!("{suffix}.{ext}"),
        None => suffix,
    };
    format!("{}/{}/{}", sanitize_segment(prefix), sanitize_segment(owner_id), name)
}

/// Keep a path segment to `[A-Za-z0-9_-]`
fn sanitize_segment(segment: &str) -> String {
    let cleaned: String = segment
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    if cleaned.is_empty() {
        "_".to_string()
    } else {
        cleaned
    }
}
