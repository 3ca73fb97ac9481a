use std::sync::Arc;

use crate::tasks::Broker;

/// Shared state of the health surface
#[derive(Clone)]
pub struct AppState {
    pub broker: Arc<dyn Broker>,
}

impl AppState {
    pub fn new(broker: Arc<dyn Broker>) -> Self {
        Self { broker }
    }
}
