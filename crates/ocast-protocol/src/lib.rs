//! OCast message codec, device session state machine, and callback
//! dispatcher (§4.F, §4.H, §4.I).

pub mod codec;
pub mod dispatch;
pub mod errors;
pub mod events;
pub mod session;

pub use codec::{
    decode_frame, decode_params, encode_command, ApplicationLayer, CommandFrame, DataLayer,
    IncomingFrame, MessageType, RoutingDomain,
};
pub use dispatch::{identity_dispatcher, wrap, Callback};
pub use errors::{code_to_error, media, Status, CLIENT, DEVICE_LAYER, SUCCESS, UNKNOWN};
pub use events::{
    ConnectionStatus, CustomEvent, Event, MetadataChangedEvent, PlaybackState,
    PlaybackStatusEvent, UpdateStatusEvent, WebAppConnectedStatusEvent,
};
pub use session::{DeviceSession, SessionConfig, SessionListener};
