//! Typed, validated configuration tree. The gateway never parses a
//! configuration file itself — it receives this tree already built
//! and validated by the embedding application.

pub mod extension;
pub mod gateway;
pub mod host;

pub use extension::ExtensionConfig;
pub use gateway::GatewayConfig;
pub use host::{EndpointConfig, HostConfig, Mode};
