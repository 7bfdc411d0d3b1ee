//! Application state shared across handlers

use auth::RbacCore;
use std::sync::Arc;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub core: Arc<RbacCore>,
}

impl AppState {
    pub fn new(core: RbacCore) -> Self {
        Self {
            core: Arc::new(core),
        }
    }
}
