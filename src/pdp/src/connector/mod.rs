//! External attribute adapters
//!
//! Zones can wire external services that assert additional attributes for
//! subjects and resources. The registry holds per-zone configuration; the
//! client speaks OAuth client-credentials and the adapter wire format.

pub mod client;
pub mod config;

pub use client::{AdapterClient, AdapterResponse};
pub use config::{
    AdapterEndpoint, ConnectorConfig, ConnectorRegistry, InMemoryConnectorRegistry,
    SharedConnectorRegistry,
};
