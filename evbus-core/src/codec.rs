//! Codec for wire frame serialization and deserialization
//!
//! This module converts between [`ClientFrame`]/[`ServerFrame`] values and the
//! JSON text carried by the transport.
//!
//! # Error Mapping
//!
//! - Text that is not JSON at all → `Error::Serialization`
//! - JSON that is not an object with a known `type` discriminator, or whose
//!   fields do not match that frame → `Error::Protocol`
//!
//! The distinction lets the receive path log garbage separately from frames
//! produced by a newer or misbehaving endpoint.
//!
//! # Examples
//!
//! ```rust
//! use evbus_core::{codec, ClientFrame};
//!
//! let json = codec::encode_client_frame(&ClientFrame::Ping).unwrap();
//! assert_eq!(json, r#"{"type":"ping"}"#);
//!
//! let frame = codec::decode_server_frame(r#"{"type":"pong"}"#).unwrap();
//! assert!(matches!(frame, evbus_core::ServerFrame::Pong));
//! ```

use crate::error::{Error, Result};
use crate::frame::{ClientFrame, ServerFrame};
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Encode any serializable value to a JSON string
///
/// # Errors
///
/// Returns `Error::Serialization` if the value cannot be represented as JSON.
pub fn encode<T: Serialize>(msg: &T) -> Result<String> {
    serde_json::to_string(msg).map_err(|e| Error::Serialization(e.to_string()))
}

/// Encode a client frame for transmission
pub fn encode_client_frame(frame: &ClientFrame) -> Result<String> {
    encode(frame)
}

/// Encode a server frame (used by endpoint implementations and test doubles)
pub fn encode_server_frame(frame: &ServerFrame) -> Result<String> {
    encode(frame)
}

/// Decode a frame received from the remote endpoint
pub fn decode_server_frame(data: &str) -> Result<ServerFrame> {
    decode_frame(data)
}

/// Decode a frame sent by a client (used by endpoint implementations and test doubles)
pub fn decode_client_frame(data: &str) -> Result<ClientFrame> {
    decode_frame(data)
}

/// Two-step decode: parse as a generic value first so syntax errors and
/// shape errors map to different variants.
fn decode_frame<T: DeserializeOwned>(data: &str) -> Result<T> {
    let value: serde_json::Value =
        serde_json::from_str(data).map_err(|e| Error::Serialization(e.to_string()))?;

    if !value.is_object() {
        return Err(Error::Protocol("frame must be a JSON object".to_string()));
    }

    serde_json::from_value(value).map_err(|e| Error::Protocol(e.to_string()))
}
