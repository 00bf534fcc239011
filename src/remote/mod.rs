/// Remote store adapter
///
/// The backend is consumed through three capabilities:
/// - Object storage: container provisioning, binary upload, public URLs
/// - Metadata: row insertion into a table
/// - Auth: who is capturing right now
///
/// fs.rs provides a filesystem-backed implementation of the first two.

use async_trait::async_trait;

use crate::error::RemoteError;

pub mod fs;
#[cfg(test)]
pub(crate) mod testing;

pub use fs::FsRemote;

#[async_trait]
pub trait ObjectStorage: Send + Sync {
    /// Make sure the container exists; cheap when it already does
    async fn ensure_container(&self, name: &str) -> Result<(), RemoteError>;

    async fn upload_object(
        &self,
        container: &str,
        path: &str,
        bytes: &[u8],
    ) -> Result<(), RemoteError>;

    /// Public URL of an uploaded object, `None` if it can't be resolved
    async fn public_url(&self, container: &str, path: &str) -> Option<String>;
}

#[async_trait]
pub trait MetadataSink: Send + Sync {
    async fn insert_record(&self, table: &str, fields: serde_json::Value)
        -> Result<(), RemoteError>;
}

/// Session capability: only the identity of the current user is needed
pub trait AuthProvider: Send + Sync {
    fn current_user_id(&self) -> Option<String>;

    fn is_authenticated(&self) -> bool {
        self.current_user_id().is_some()
    }
}

/// Fixed identity, e.g. from the config file
#[derive(Debug, Clone, Default)]
pub struct StaticAuth {
    user_id: Option<String>,
}

impl StaticAuth {
    pub fn new(user_id: Option<String>) -> Self {
        Self { user_id }
    }
}

impl AuthProvider for StaticAuth {
    fn current_user_id(&self) -> Option<String> {
        self.user_id.clone()
    }
}
