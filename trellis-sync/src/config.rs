//! Engine configuration.

use crate::scope::Scope;
use crate::transport::{HttpTransport, TransportError};

/// Engine configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Origin of the layout store
    pub base_url: String,
    /// Page location the builder runs on; decides the scope
    pub location: String,
    /// Capacity of the event channel
    pub event_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8000".to_string(),
            location: "/admin/home".to_string(),
            event_capacity: 256,
        }
    }
}

impl EngineConfig {
    pub fn scope(&self) -> Scope {
        Scope::resolve(&self.location)
    }

    pub fn http_transport(&self) -> Result<HttpTransport, TransportError> {
        HttpTransport::parse(&self.base_url)
    }
}
