//! HTTP side of TractorCare sync.
//!
//! [`HttpGateway`] implements `tractorcare_sync::RemoteGateway` against the
//! TractorCare REST API, and [`HttpReachabilityProbe`] feeds the
//! connectivity monitor from the API's health endpoint.

pub mod api_client;
pub mod config;
pub mod error;
pub mod probe;

pub use api_client::HttpGateway;
pub use config::GatewayConfig;
pub use error::{CloudError, CloudResult};
pub use probe::HttpReachabilityProbe;
