//! Offline-capable capture queue for shelf photos.
//!
//! Captures are written to a local SQLite queue and pushed to the backend
//! by the sync engine whenever the device is online.

pub mod config;
pub mod error;
pub mod net;
pub mod remote;
pub mod state;
pub mod sync;

pub use config::Config;
pub use error::{ConfigError, RemoteError, StoreError};
pub use net::ConnectivityMonitor;
pub use state::queue::CaptureQueue;
pub use state::record::{CaptureMeta, CaptureRecord, RecordId};
pub use state::store::CaptureStore;
pub use sync::{StatusBoard, SyncEngine, SyncStatus};
