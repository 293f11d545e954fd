use std::sync::Arc;

use sandnode_common::StoragePaths;

use crate::api::StateController;

/// Shared state every node client is built with.
#[derive(Clone)]
pub struct NodeContext {
    pub state_controller: Arc<dyn StateController>,
    pub paths: StoragePaths,
}

impl NodeContext {
    pub fn new(state_controller: Arc<dyn StateController>, paths: StoragePaths) -> Self {
        Self {
            state_controller,
            paths,
        }
    }
}
