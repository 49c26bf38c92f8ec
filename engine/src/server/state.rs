//! Server state

use std::sync::Arc;

use crate::deploy::DeploymentEngine;
use crate::routing::RequestRouter;

/// Server state shared across handlers
pub struct ServerState {
    pub engine: Arc<DeploymentEngine>,
    pub router: Arc<RequestRouter>,
}

impl ServerState {
    pub fn new(engine: Arc<DeploymentEngine>, router: Arc<RequestRouter>) -> Self {
        Self { engine, router }
    }
}
