/// State management module
///
/// This module handles all local queue state, including:
/// - The SQLite database of queued captures (store.rs)
/// - Shared data structures (record.rs)
/// - Process-local preview handles (preview.rs)
/// - The capture write path and listings for display (queue.rs)

pub mod preview;
pub mod queue;
pub mod record;
pub mod store;
