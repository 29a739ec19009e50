//! SSDP-based discovery of OCast media receivers (§4.A–§4.C).

mod engine;
mod ssdp;
mod udp_socket;

pub use engine::{DiscoveryConfig, DiscoveryEngine, DiscoveryListener};
pub use ssdp::{MSearchRequest, MSearchResponse};
pub use udp_socket::{UdpSocket, UdpSocketListener};
