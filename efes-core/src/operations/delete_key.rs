use crate::error::Result;
use crate::registry::Registry;
use std::sync::Arc;

#[derive(Clone)]
pub struct DeleteKeyOperation {
    registry: Arc<dyn Registry>,
}

#[derive(Debug, Clone)]
pub struct DeleteKeyOperationRequest {
    pub key: String,
}

impl DeleteKeyOperation {
    pub fn new(registry: Arc<dyn Registry>) -> Self {
        Self { registry }
    }

    /// Tombstone the key mapping. Bytes are untouched here; the reclamation
    /// sweep frees them later. Deleting an absent or already-deleted key is
    /// a silent no-op.
    pub async fn run(&self, request: DeleteKeyOperationRequest) -> Result<()> {
        let existed = self.registry.tombstone_key(&request.key).await?;
        if !existed {
            tracing::debug!("delete for key {} matched no live mapping", request.key);
        }
        Ok(())
    }
}
