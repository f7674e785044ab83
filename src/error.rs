//! # Error Surface
//!
//! The mesh distinguishes a small, exhaustive set of failure kinds rather than
//! propagating opaque I/O errors. Transport-level framing errors are recovered
//! locally (see `transport_socket::TransportSocket`); everything that reaches a
//! caller is one of these variants.

use thiserror::Error;

/// Errors raised anywhere in the transport, directory, or session layers.
#[derive(Error, Debug)]
pub enum Error {
    #[error("invalid url: {0}")]
    InvalidUrl(String),

    #[error("dns resolution failed for {0}")]
    DnsResolution(String),

    #[error("connection refused: {0}")]
    ConnectRefused(String),

    #[error("operation timed out")]
    Timeout,

    #[error("socket disconnected")]
    Disconnected,

    #[error("protocol framing corrupted, resynchronized on next magic")]
    ProtocolCorrupt,

    #[error("service '{0}' is already registered")]
    AlreadyRegistered(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("permission denied binding {0}")]
    PermissionDenied(String),

    #[error("address already in use: {0}")]
    AddressInUse(String),

    #[error("remote call raised: {0}")]
    MethodFault(String),

    #[error("reactor setup failed: {0}")]
    IoSetup(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Wire codes for the remote-raisable subset of [`Error`]. A directory or a
/// locally-hosted service that fails a call encodes one of these alongside
/// its message so the caller's session reconstructs the original kind
/// instead of collapsing every Error reply into `MethodFault`.
const WIRE_ALREADY_REGISTERED: u32 = 1;
const WIRE_NOT_FOUND: u32 = 2;
const WIRE_PERMISSION_DENIED: u32 = 3;
const WIRE_ADDRESS_IN_USE: u32 = 4;

impl Error {
    /// Split this error into the wire code and text carried in an Error
    /// reply's body. Errors with no remote-meaningful kind (local I/O,
    /// connection setup, framing) fall back to code `0`, reconstructed as
    /// `MethodFault` on the receiving end.
    pub fn wire_encode(&self) -> (u32, String) {
        match self {
            Error::AlreadyRegistered(name) => (WIRE_ALREADY_REGISTERED, name.clone()),
            Error::NotFound(what) => (WIRE_NOT_FOUND, what.clone()),
            Error::PermissionDenied(what) => (WIRE_PERMISSION_DENIED, what.clone()),
            Error::AddressInUse(what) => (WIRE_ADDRESS_IN_USE, what.clone()),
            other => (0, other.to_string()),
        }
    }

    /// Reconstruct the error a remote peer encoded with [`Error::wire_encode`].
    pub fn wire_decode(code: u32, text: String) -> Error {
        match code {
            WIRE_ALREADY_REGISTERED => Error::AlreadyRegistered(text),
            WIRE_NOT_FOUND => Error::NotFound(text),
            WIRE_PERMISSION_DENIED => Error::PermissionDenied(text),
            WIRE_ADDRESS_IN_USE => Error::AddressInUse(text),
            _ => Error::MethodFault(text),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_round_trip_preserves_kind() {
        let cases = [
            Error::AlreadyRegistered("echo".into()),
            Error::NotFound("echo".into()),
            Error::PermissionDenied("tcp://0.0.0.0:80".into()),
            Error::AddressInUse("tcp://127.0.0.1:9559".into()),
        ];
        for err in cases {
            let (code, text) = err.wire_encode();
            let decoded = Error::wire_decode(code, text);
            assert_eq!(decoded.to_string(), err.to_string());
        }
    }

    #[test]
    fn unrecognized_code_becomes_method_fault() {
        let decoded = Error::wire_decode(99, "boom".into());
        assert!(matches!(decoded, Error::MethodFault(text) if text == "boom"));
    }
}
