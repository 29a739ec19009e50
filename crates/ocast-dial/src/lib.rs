//! DIAL (Discovery-And-Launch) application lifecycle client and the UPnP
//! device description client that hydrates a freshly discovered device.

mod description;
mod dial;
mod xml;

pub use description::fetch_description;
pub use dial::DialClient;
pub use ocast_core::{Application, ApplicationState, Device, OCastAdditionalData};
