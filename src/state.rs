mod connection_id;

use std::sync::Arc;

use crate::config::AppConfig;
use crate::intake::pipeline::UpstreamTransport;

use connection_id::ConnectionIdGenerator;

/// Shared application state accessible to all handlers.
pub struct AppState {
    pub config: AppConfig,
    pub transport: Arc<dyn UpstreamTransport>,
    connection_ids: ConnectionIdGenerator,
}

impl AppState {
    #[must_use]
    pub fn new(config: AppConfig, transport: Arc<dyn UpstreamTransport>) -> Self {
        Self {
            config,
            transport,
            connection_ids: ConnectionIdGenerator::new(),
        }
    }

    /// Id attached to the tracing span of the next generation request.
    #[must_use]
    pub fn next_connection_id(&self) -> uuid::Uuid {
        self.connection_ids.next_id()
    }
}
