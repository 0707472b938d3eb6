use std::sync::Arc;

use crate::{bridge::PubSubBridge, config::Config, registry::ConnectionRegistry};

#[derive(Clone)]
pub struct AppState {
    pub registry: ConnectionRegistry,
    pub bridge: Arc<PubSubBridge>,
    pub config: Arc<Config>,
}
