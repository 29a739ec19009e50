//! Shared data model and error taxonomy for the OCast client library.
//!
//! This crate has no I/O of its own: it defines the `Device`/`Application`
//! data model and the `Error` type returned across crate boundaries by
//! `ocast-discovery`, `ocast-dial`, `ocast-transport`, and `ocast-protocol`.

pub mod error;
pub mod models;

pub use error::{Error, ErrorKind};
pub use models::{
    extract_uuid, Application, ApplicationState, Device, OCastAdditionalData,
};
