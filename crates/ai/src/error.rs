use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Failure taxonomy for a single capability attempt.
///
/// Drives both the retry decision and the shape of the persisted error envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureClass {
    /// 5xx, timeout, connection reset. Worth retrying.
    TransientRemote,
    /// 4xx, malformed response, auth failure.
    PermanentRemote,
    /// File missing, permission denied.
    LocalIo,
    /// Unexpected fault in local processing (decode error, panic).
    LocalFault,
}

impl FailureClass {
    pub fn is_transient(self) -> bool {
        matches!(self, FailureClass::TransientRemote)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            FailureClass::TransientRemote => "transient_remote",
            FailureClass::PermanentRemote => "permanent_remote",
            FailureClass::LocalIo => "local_io",
            FailureClass::LocalFault => "local_fault",
        }
    }
}

impl core::fmt::Display for FailureClass {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Raw failure signal observed at a capability boundary, before classification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawFailure {
    /// Non-success HTTP status from a remote backend.
    HttpStatus(u16),
    Timeout,
    Connection,
    /// Response body could not be decoded into the expected shape.
    MalformedResponse,
    /// Remote workflow reported a failed run; carries the reported error text.
    WorkflowFailed(String),
    FileMissing,
    PermissionDenied,
    /// Any other local I/O failure.
    Io,
    /// Local processing failed (decoder, model, panic).
    Fault,
}

/// Marker the workflow backend puts in the error text of runs that died server-side.
const INTERNAL_SERVER_ERROR_MARKER: &str = "internal_server_error";

/// Classify a raw failure signal. Pure: the same signal always maps to the same class.
pub fn classify(raw: &RawFailure) -> FailureClass {
    match raw {
        RawFailure::HttpStatus(status) => classify_status(*status),
        RawFailure::Timeout | RawFailure::Connection => FailureClass::TransientRemote,
        RawFailure::MalformedResponse => FailureClass::PermanentRemote,
        RawFailure::WorkflowFailed(error) => {
            if error.to_lowercase().contains(INTERNAL_SERVER_ERROR_MARKER) {
                FailureClass::TransientRemote
            } else {
                FailureClass::PermanentRemote
            }
        }
        RawFailure::FileMissing | RawFailure::PermissionDenied | RawFailure::Io => {
            FailureClass::LocalIo
        }
        RawFailure::Fault => FailureClass::LocalFault,
    }
}

/// 5xx is transient; everything else that reached us as a failure is permanent.
pub fn classify_status(status: u16) -> FailureClass {
    if (500..600).contains(&status) {
        FailureClass::TransientRemote
    } else {
        FailureClass::PermanentRemote
    }
}

/// A classified failure crossing the capability boundary.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct CapabilityError {
    pub class: FailureClass,
    pub message: String,
    /// HTTP status, when the failure came from a remote response.
    pub status: Option<u16>,
}

impl CapabilityError {
    pub fn new(class: FailureClass, message: impl Into<String>) -> Self {
        Self {
            class,
            message: message.into(),
            status: None,
        }
    }

    pub fn from_raw(raw: RawFailure, message: impl Into<String>) -> Self {
        let status = match raw {
            RawFailure::HttpStatus(s) => Some(s),
            _ => None,
        };
        Self {
            class: classify(&raw),
            message: message.into(),
            status,
        }
    }

    pub fn from_status(status: u16, body: impl AsRef<str>) -> Self {
        Self::from_raw(
            RawFailure::HttpStatus(status),
            format!("HTTP {status}: {}", body.as_ref()),
        )
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::new(FailureClass::TransientRemote, message)
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self::new(FailureClass::PermanentRemote, message)
    }

    pub fn local_io(message: impl Into<String>) -> Self {
        Self::new(FailureClass::LocalIo, message)
    }

    pub fn local_fault(message: impl Into<String>) -> Self {
        Self::new(FailureClass::LocalFault, message)
    }

    /// Classify a transport error from the HTTP client.
    pub fn from_reqwest(err: &reqwest::Error) -> Self {
        let raw = if let Some(status) = err.status() {
            RawFailure::HttpStatus(status.as_u16())
        } else if err.is_timeout() {
            RawFailure::Timeout
        } else if err.is_connect() || err.is_request() || err.is_body() {
            // A body cut off mid-read is a transport failure, not a bad payload.
            RawFailure::Connection
        } else if err.is_decode() {
            RawFailure::MalformedResponse
        } else if err.is_builder() {
            RawFailure::Fault
        } else {
            RawFailure::Connection
        };
        Self::from_raw(raw, format!("request failed: {err}"))
    }

    /// Classify a local file access error.
    pub fn from_io(path: &std::path::Path, err: &std::io::Error) -> Self {
        let (raw, message) = match err.kind() {
            std::io::ErrorKind::NotFound => (
                RawFailure::FileMissing,
                format!("file not found: {}", path.display()),
            ),
            std::io::ErrorKind::PermissionDenied => (
                RawFailure::PermissionDenied,
                format!("permission denied accessing file: {}", path.display()),
            ),
            _ => (
                RawFailure::Io,
                format!("i/o error on {}: {err}", path.display()),
            ),
        };
        Self::from_raw(raw, message)
    }

    /// Same failure, but never worth retrying.
    ///
    /// Used for staging (upload) failures: retrying an upload the remote rejected is pointless.
    pub fn into_terminal(mut self) -> Self {
        if self.class == FailureClass::TransientRemote {
            self.class = FailureClass::PermanentRemote;
        }
        self
    }
}
