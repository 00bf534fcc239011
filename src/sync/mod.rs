/// Sync module
///
/// This module handles:
/// - Draining the capture queue into the backend, manually or automatically (engine.rs)
/// - The live online/pending status shared with the UI (status.rs)

pub mod engine;
pub mod status;

pub use engine::{SyncEngine, SyncReport, SyncSettings};
pub use status::{StatusBoard, SyncStatus};
