//! Shared data model for the raycoon proxy manager.
//!
//! Everything the other crates exchange lives here: catalog rows
//! (endpoints, groups, latency records), the active-connection singleton,
//! runtime enums (VPN mode, engine backend) and the recognized setting
//! keys with their defaults.

pub mod model;
pub mod settings;

pub use model::{
    ActiveConnection, AuthConfig, CoreKind, Endpoint, Group, LatencyRecord, TlsConfig,
    TransportConfig, VpnMode,
};
