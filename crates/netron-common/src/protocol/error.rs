use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::value::Value;

/// Stable kind tags used on the wire. Protocol kinds round-trip back into the
/// matching [`NetronError`] variant; anything else reconstructs as
/// [`NetronError::Remote`] with every field preserved.
pub mod kind {
    pub const NOT_EXISTS: &str = "NotExists";
    pub const EXISTS: &str = "Exists";
    pub const INVALID_ARGUMENT: &str = "InvalidArgument";
    pub const NOT_VALID: &str = "NotValid";
    pub const UNKNOWN: &str = "Unknown";
    pub const TIMEOUT: &str = "Timeout";
    pub const CONNECTION_LOST: &str = "ConnectionLost";
    pub const CODEC: &str = "Codec";
    pub const IO: &str = "Io";
}

/// Wire form of an error crossing the peer boundary.
///
/// Application errors thrown inside an invoked context method keep their
/// name, message, stack and enumerable custom fields so the calling side can
/// reconstitute an equivalent error object.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ErrorDescriptor {
    pub kind: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub fields: BTreeMap<String, Value>,
}

impl ErrorDescriptor {
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
            stack: None,
            fields: BTreeMap::new(),
        }
    }

    pub fn with_stack(mut self, stack: impl Into<String>) -> Self {
        self.stack = Some(stack.into());
        self
    }

    pub fn with_field(mut self, name: impl Into<String>, value: Value) -> Self {
        self.fields.insert(name.into(), value);
        self
    }
}

#[derive(Error, Debug)]
pub enum NetronError {
    /// Referenced context name, definition id, task name or member does not
    /// exist at the time of the request.
    #[error("not exists: {0}")]
    NotExists(String),

    /// Attempted to attach a context name that is already attached.
    #[error("already exists: {0}")]
    Exists(String),

    /// Malformed request shape, e.g. writing a readonly property or
    /// reflecting an instance with zero public members.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Operation applied to a value that is not the expected protocol
    /// primitive, e.g. releasing a non-interface.
    #[error("not valid: {0}")]
    NotValid(String),

    /// Peer or definition lookup for an id this netron cannot resolve.
    #[error("unknown: {0}")]
    Unknown(String),

    /// A request's response did not arrive within the configured window.
    #[error("response timeout after {0} ms")]
    Timeout(u64),

    /// Channel closed while a request was outstanding.
    #[error("connection lost")]
    ConnectionLost,

    /// Encoding or decoding failed.
    #[error("codec error: {0}")]
    Codec(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// An error raised on the other side of the connection, reconstructed
    /// from its wire descriptor. Application error hierarchies arrive here.
    #[error("{}: {}", .0.kind, .0.message)]
    Remote(ErrorDescriptor),
}

impl NetronError {
    /// Creates an application-level error with an arbitrary kind name, the
    /// way a context method reports a domain failure to its remote caller.
    pub fn app(kind: impl Into<String>, message: impl Into<String>) -> Self {
        NetronError::Remote(ErrorDescriptor::new(kind, message))
    }

    /// Converts this error into its wire descriptor.
    pub fn to_descriptor(&self) -> ErrorDescriptor {
        match self {
            NetronError::NotExists(m) => ErrorDescriptor::new(kind::NOT_EXISTS, m.clone()),
            NetronError::Exists(m) => ErrorDescriptor::new(kind::EXISTS, m.clone()),
            NetronError::InvalidArgument(m) => {
                ErrorDescriptor::new(kind::INVALID_ARGUMENT, m.clone())
            }
            NetronError::NotValid(m) => ErrorDescriptor::new(kind::NOT_VALID, m.clone()),
            NetronError::Unknown(m) => ErrorDescriptor::new(kind::UNKNOWN, m.clone()),
            NetronError::Timeout(ms) => ErrorDescriptor::new(kind::TIMEOUT, format!("{} ms", ms))
                .with_field("timeout_ms", Value::Int(*ms as i64)),
            NetronError::ConnectionLost => {
                ErrorDescriptor::new(kind::CONNECTION_LOST, "connection lost")
            }
            NetronError::Codec(m) => ErrorDescriptor::new(kind::CODEC, m.clone()),
            NetronError::Io(e) => ErrorDescriptor::new(kind::IO, e.to_string()),
            NetronError::Remote(d) => d.clone(),
        }
    }

    /// Reconstructs an error from its wire descriptor.
    ///
    /// Unrecognized kinds are kept as [`NetronError::Remote`] rather than
    /// being flattened to a string, so no information is dropped.
    pub fn from_descriptor(descriptor: ErrorDescriptor) -> Self {
        match descriptor.kind.as_str() {
            kind::NOT_EXISTS => NetronError::NotExists(descriptor.message),
            kind::EXISTS => NetronError::Exists(descriptor.message),
            kind::INVALID_ARGUMENT => NetronError::InvalidArgument(descriptor.message),
            kind::NOT_VALID => NetronError::NotValid(descriptor.message),
            kind::UNKNOWN => NetronError::Unknown(descriptor.message),
            kind::TIMEOUT => {
                let ms = match descriptor.fields.get("timeout_ms") {
                    Some(Value::Int(ms)) => *ms as u64,
                    _ => 0,
                };
                NetronError::Timeout(ms)
            }
            kind::CONNECTION_LOST => NetronError::ConnectionLost,
            kind::CODEC => NetronError::Codec(descriptor.message),
            _ => NetronError::Remote(descriptor),
        }
    }

    /// The wire kind tag this error carries.
    pub fn kind(&self) -> &str {
        match self {
            NetronError::NotExists(_) => kind::NOT_EXISTS,
            NetronError::Exists(_) => kind::EXISTS,
            NetronError::InvalidArgument(_) => kind::INVALID_ARGUMENT,
            NetronError::NotValid(_) => kind::NOT_VALID,
            NetronError::Unknown(_) => kind::UNKNOWN,
            NetronError::Timeout(_) => kind::TIMEOUT,
            NetronError::ConnectionLost => kind::CONNECTION_LOST,
            NetronError::Codec(_) => kind::CODEC,
            NetronError::Io(_) => kind::IO,
            NetronError::Remote(d) => &d.kind,
        }
    }
}

impl From<serde_json::Error> for NetronError {
    fn from(err: serde_json::Error) -> Self {
        NetronError::Codec(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, NetronError>;
