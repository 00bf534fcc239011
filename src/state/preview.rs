use image::{imageops::FilterType, DynamicImage, ImageFormat};
use std::collections::HashMap;
use std::io::Cursor;
use std::sync::{Arc, Mutex};
use tokio::task;
use tracing::debug;
use uuid::Uuid;

use super::record::{CaptureRecord, RecordId};

/// Size of generated preview thumbnails (square bound)
const THUMBNAIL_SIZE: u32 = 256;

/// Process-local handle used to render a queued capture.
///
/// Handles are never persisted. Their `uri` embeds the session id, so a
/// handle from a previous run can't be mistaken for a live one.
#[derive(Debug, Clone)]
pub struct PreviewHandle {
    pub uri: String,
    /// JPEG thumbnail, or the original payload if it could not be decoded
    pub bytes: Arc<[u8]>,
    pub is_thumbnail: bool,
}

/// Preview handles for the current process, keyed by capture id
#[derive(Debug, Clone)]
pub struct PreviewCache {
    session: String,
    handles: Arc<Mutex<HashMap<RecordId, PreviewHandle>>>,
}

impl Default for PreviewCache {
    fn default() -> Self {
        Self::new()
    }
}

impl PreviewCache {
    pub fn new() -> Self {
        Self {
            session: Uuid::new_v4().simple().to_string(),
            handles: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Get the preview for a capture, generating it from the payload if
    /// this process hasn't seen the capture yet
    pub async fn handle_for(&self, id: &RecordId, payload: &[u8]) -> PreviewHandle {
        if let Some(handle) = self.cached(id) {
            return handle;
        }

        let handle = self.render(id, payload).await;
        if let Ok(mut handles) = self.handles.lock() {
            handles.insert(id.clone(), handle.clone());
        }
        handle
    }

    async fn render(&self, id: &RecordId, payload: &[u8]) -> PreviewHandle {
        let uri = format!("preview://{}/{}", self.session, id);
        let payload: Arc<[u8]> = Arc::from(payload);
        let job = task::spawn_blocking({
            let payload = payload.clone();
            let uri = uri.clone();
            move || generate_preview(uri, payload)
        });

        // a panicking decoder still leaves us the raw payload
        job.await.unwrap_or_else(|_| PreviewHandle {
            uri,
            bytes: payload,
            is_thumbnail: false,
        })
    }

    /// Fill in the preview of a record loaded from storage.
    /// Only pending captures stay cached, uploaded ones are rendered on demand.
    pub async fn attach(&self, mut record: CaptureRecord) -> CaptureRecord {
        let preview = if record.uploaded {
            self.evict(&record.id);
            self.render(&record.id, &record.payload).await
        } else {
            self.handle_for(&record.id, &record.payload).await
        };
        record.preview = Some(preview);
        record
    }

    /// Drop the preview of a deleted capture
    pub fn evict(&self, id: &RecordId) {
        if let Ok(mut handles) = self.handles.lock() {
            handles.remove(id);
        }
    }

    fn cached(&self, id: &RecordId) -> Option<PreviewHandle> {
        self.handles.lock().ok()?.get(id).cloned()
    }
}

/// Decode the payload and resize it to a JPEG thumbnail.
/// Payloads that aren't images are used as-is.
fn generate_preview(uri: String, payload: Arc<[u8]>) -> PreviewHandle {
    match render_thumbnail(&payload) {
        Some(jpeg) => PreviewHandle {
            uri,
            bytes: Arc::from(jpeg),
            is_thumbnail: true,
        },
        None => {
            debug!(%uri, "Payload is not a decodable image, previewing raw bytes");
            PreviewHandle {
                uri,
                bytes: payload,
                is_thumbnail: false,
            }
        }
    }
}

fn render_thumbnail(payload: &[u8]) -> Option<Vec<u8>> {
    let img = image::load_from_memory(payload).ok()?;

    // Resize to thumbnail size, JPEG has no alpha channel
    let thumbnail = img.resize(THUMBNAIL_SIZE, THUMBNAIL_SIZE, FilterType::Lanczos3);
    let thumbnail = DynamicImage::ImageRgb8(thumbnail.to_rgb8());

    let mut out = Cursor::new(Vec::new());
    thumbnail.write_to(&mut out, ImageFormat::Jpeg).ok()?;
    Some(out.into_inner())
}
