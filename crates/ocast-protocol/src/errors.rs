//! Numeric error taxonomy for the OCast wire protocol (§6 "Error codes (wire)", §7).

use ocast_core::Error;

/// The command succeeded.
pub const SUCCESS: i32 = 0;
/// No more specific code applies.
pub const UNKNOWN: i32 = -1;
/// The client rejected or mis-decoded something before/after the wire round-trip.
pub const CLIENT: i32 = -2;
/// The device layer reported a non-`ok` status.
pub const DEVICE_LAYER: i32 = -3;

/// Media-service reply codes, carried in a reply's `params.code`.
pub mod media {
    pub const NOT_IMPLEMENTED: i32 = 2400;
    pub const INVALID_SERVICE: i32 = 2404;
    pub const INVALID_PLAYER_STATE: i32 = 2412;
    pub const NO_PLAYER: i32 = 2413;
    pub const INVALID_TRACK: i32 = 2414;
    pub const UNKNOWN_MEDIA_TYPE: i32 = 2415;
    pub const UNKNOWN_TRANSFER_MODE: i32 = 2416;
    pub const MISSING_PARAMETER: i32 = 2422;
    pub const INTERNAL: i32 = 2500;
}

/// Device-layer `status` values, per §4.F / §6.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Ok,
    JsonFormatError,
    ValueFormatError,
    MissingMandatoryField,
    ForbiddenUnsecureMode,
    InternalError,
    #[serde(other)]
    Unknown,
}

impl Status {
    /// One `DEVICE_LAYER_*` condition per non-`ok` status, per §4.H reply handling.
    pub fn as_device_layer_error(self) -> Error {
        let message = match self {
            Status::Ok => unreachable!("Ok does not produce a device-layer error"),
            Status::JsonFormatError => "device reported json_format_error",
            Status::ValueFormatError => "device reported value_format_error",
            Status::MissingMandatoryField => "device reported missing_mandatory_field",
            Status::ForbiddenUnsecureMode => "device reported forbidden_unsecure_mode",
            Status::InternalError => "device reported internal_error",
            Status::Unknown => "device reported an unrecognized status",
        };
        Error::protocol(DEVICE_LAYER, message)
    }
}

/// Maps a reply's `params.code` to the caller's error taxonomy; anything not
/// recognized here still propagates as the numeric code with a generic message.
pub fn code_to_error(code: i32) -> Error {
    let message = match code {
        media::NOT_IMPLEMENTED => "not implemented",
        media::INVALID_SERVICE => "invalid service",
        media::INVALID_PLAYER_STATE => "invalid player state",
        media::NO_PLAYER => "no player",
        media::INVALID_TRACK => "invalid track",
        media::UNKNOWN_MEDIA_TYPE => "unknown media type",
        media::UNKNOWN_TRANSFER_MODE => "unknown transfer mode",
        media::MISSING_PARAMETER => "missing parameter",
        media::INTERNAL => "internal error",
        UNKNOWN => "unknown error",
        _ => "command failed",
    };
    Error::protocol(code, message)
}
