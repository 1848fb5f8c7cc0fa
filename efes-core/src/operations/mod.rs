//! Tracker operations: placement, commit, resolution, delete, inventory and
//! the background reclamation sweep.

mod create_close;
mod create_open;
mod delete_key;
mod get_paths;
mod inventory;
mod reclaim;

pub use create_close::{CreateCloseOperation, CreateCloseOperationRequest};
pub use create_open::{
    CreateOpenOperation, CreateOpenOperationRequest, CreateOpenOperationResult,
};
pub use delete_key::{DeleteKeyOperation, DeleteKeyOperationRequest};
pub use get_paths::{GetPathsOperation, GetPathsOperationRequest, GetPathsOperationResult};
pub use inventory::{InventoryOperation, InventorySnapshot};
pub use reclaim::{ReclaimOperation, ReclaimOperationResult};
