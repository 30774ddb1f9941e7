//! Normalized call events: status codes, metadata and [`TransportEvent`].

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Standard RPC status codes, 0 through 16.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(i32)]
pub enum StatusCode {
    Ok = 0,
    Cancelled = 1,
    Unknown = 2,
    InvalidArgument = 3,
    DeadlineExceeded = 4,
    NotFound = 5,
    AlreadyExists = 6,
    PermissionDenied = 7,
    ResourceExhausted = 8,
    FailedPrecondition = 9,
    Aborted = 10,
    OutOfRange = 11,
    Unimplemented = 12,
    Internal = 13,
    Unavailable = 14,
    DataLoss = 15,
    Unauthenticated = 16,
}

impl StatusCode {
    /// Map a wire code. Codes outside 0..=16 become [`StatusCode::Unknown`].
    pub fn from_i32(code: i32) -> Self {
        match code {
            0 => StatusCode::Ok,
            1 => StatusCode::Cancelled,
            3 => StatusCode::InvalidArgument,
            4 => StatusCode::DeadlineExceeded,
            5 => StatusCode::NotFound,
            6 => StatusCode::AlreadyExists,
            7 => StatusCode::PermissionDenied,
            8 => StatusCode::ResourceExhausted,
            9 => StatusCode::FailedPrecondition,
            10 => StatusCode::Aborted,
            11 => StatusCode::OutOfRange,
            12 => StatusCode::Unimplemented,
            13 => StatusCode::Internal,
            14 => StatusCode::Unavailable,
            15 => StatusCode::DataLoss,
            16 => StatusCode::Unauthenticated,
            _ => StatusCode::Unknown,
        }
    }

    pub fn as_i32(self) -> i32 {
        self as i32
    }

    /// Canonical upper-case name, e.g. `NOT_FOUND`.
    pub fn name(self) -> &'static str {
        match self {
            StatusCode::Ok => "OK",
            StatusCode::Cancelled => "CANCELLED",
            StatusCode::Unknown => "UNKNOWN",
            StatusCode::InvalidArgument => "INVALID_ARGUMENT",
            StatusCode::DeadlineExceeded => "DEADLINE_EXCEEDED",
            StatusCode::NotFound => "NOT_FOUND",
            StatusCode::AlreadyExists => "ALREADY_EXISTS",
            StatusCode::PermissionDenied => "PERMISSION_DENIED",
            StatusCode::ResourceExhausted => "RESOURCE_EXHAUSTED",
            StatusCode::FailedPrecondition => "FAILED_PRECONDITION",
            StatusCode::Aborted => "ABORTED",
            StatusCode::OutOfRange => "OUT_OF_RANGE",
            StatusCode::Unimplemented => "UNIMPLEMENTED",
            StatusCode::Internal => "INTERNAL",
            StatusCode::Unavailable => "UNAVAILABLE",
            StatusCode::DataLoss => "DATA_LOSS",
            StatusCode::Unauthenticated => "UNAUTHENTICATED",
        }
    }

    pub fn is_ok(self) -> bool {
        self == StatusCode::Ok
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.as_i32(), self.name())
    }
}

/// Opaque string-to-string call metadata.
///
/// Passed unchanged from the caller to the transport, and echoed back as
/// trailing metadata on terminal events.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Metadata(BTreeMap<String, String>);

impl Metadata {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) -> Option<String> {
        self.0.insert(key.into(), value.into())
    }

    /// Builder-style [`Metadata::insert`].
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Metadata {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

/// Terminal status of a call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallStatus {
    pub code: StatusCode,
    pub message: String,
    /// Trailing metadata.
    pub metadata: Metadata,
}

impl CallStatus {
    pub fn new(code: StatusCode, message: impl Into<String>, metadata: Metadata) -> Self {
        Self {
            code,
            message: message.into(),
            metadata,
        }
    }

    /// `OK` with an empty message and no trailers.
    pub fn ok() -> Self {
        Self::new(StatusCode::Ok, "", Metadata::new())
    }

    /// `OK` with trailers.
    pub fn ok_with(metadata: Metadata) -> Self {
        Self::new(StatusCode::Ok, "", metadata)
    }
}

/// A failure raised by the transport itself rather than reported by the
/// remote end as a status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallError {
    pub code: StatusCode,
    pub message: String,
    pub metadata: Metadata,
}

impl CallError {
    /// `OK` is never an error code; it is replaced by `UNKNOWN`.
    pub fn new(code: StatusCode, message: impl Into<String>) -> Self {
        let code = if code.is_ok() { StatusCode::Unknown } else { code };
        Self {
            code,
            message: message.into(),
            metadata: Metadata::new(),
        }
    }

    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }
}

/// One event of a call's event sequence.
///
/// A sequence is zero or more `Data` events followed by exactly one
/// terminal `Status` or `Error`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent<T> {
    Data(T),
    Status(CallStatus),
    Error(CallError),
}

impl<T> TransportEvent<T> {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TransportEvent::Data(_))
    }

    /// Status code of a terminal event.
    pub fn code(&self) -> Option<StatusCode> {
        match self {
            TransportEvent::Data(_) => None,
            TransportEvent::Status(status) => Some(status.code),
            TransportEvent::Error(error) => Some(error.code),
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> TransportEvent<U> {
        match self {
            TransportEvent::Data(data) => TransportEvent::Data(f(data)),
            TransportEvent::Status(status) => TransportEvent::Status(status),
            TransportEvent::Error(error) => TransportEvent::Error(error),
        }
    }
}
