use crate::error::Result;
use crate::registry::{CommitOutcome, Registry};
use std::sync::Arc;

#[derive(Clone)]
pub struct CreateCloseOperation {
    registry: Arc<dyn Registry>,
}

#[derive(Debug, Clone)]
pub struct CreateCloseOperationRequest {
    pub key: String,
    pub size: i64,
    pub fid: i64,
    pub devid: i64,
}

impl CreateCloseOperation {
    pub fn new(registry: Arc<dyn Registry>) -> Self {
        Self { registry }
    }

    /// Commit the uploaded file under its key. Losing a concurrent race for
    /// the same key is resolved silently by the atomic swap; the superseded
    /// file is left for the reclamation sweep.
    pub async fn run(&self, request: CreateCloseOperationRequest) -> Result<()> {
        let outcome = self
            .registry
            .commit_file(&request.key, request.fid, request.devid, request.size)
            .await?;

        match outcome {
            CommitOutcome::Committed { replaced: Some(old) } => {
                tracing::debug!(
                    "key {} now maps to fid {}; fid {} awaits reclamation",
                    request.key,
                    request.fid,
                    old
                );
            }
            CommitOutcome::Committed { replaced: None } => {}
            CommitOutcome::AlreadyCommitted => {
                tracing::debug!(
                    "commit replay for key {} fid {} ignored",
                    request.key,
                    request.fid
                );
            }
        }
        Ok(())
    }
}
