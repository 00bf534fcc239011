/// Connectivity module
///
/// This module handles:
/// - Tracking online/offline state and notifying subscribers of edges (monitor.rs)
/// - Deriving the platform signal from a reachability probe (probe.rs)

pub mod monitor;
pub mod probe;

pub use monitor::{ConnectivityMonitor, Subscription};
