//! Instance inventory trait

use async_trait::async_trait;

use crate::error::TunnelError;
use crate::types::Instance;

/// Source of connectable instances
#[async_trait]
pub trait InstanceInventory: Send + Sync {
    /// List instances, optionally narrowed by a case-insensitive name/ID filter
    async fn list_instances(&self, filter: Option<&str>) -> Result<Vec<Instance>, TunnelError>;
}
