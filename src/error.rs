//! Error types for the sluice engine.
//!
//! Every failure the engine can observe is one variant of [`Error`].  The reconciler and the
//! registry convert errors into notifications before returning them, so a caller may inspect the
//! kind but never has to surface it a second time.

use std::error;
use std::fmt;
use std::io;
use std::sync::Arc;

/// The main error type for the sluice engine.
#[derive(Clone, Debug)]
pub enum Error {
    /// A send was requested while no session was selected.
    NoActiveSession,

    /// A send was requested for a session that already has a turn in flight.
    SessionBusy {
        /// The session that is busy.
        session_id: String,
    },

    /// The backend rejected a request before any streaming began.
    Transport {
        /// Human-readable error message.
        message: String,
        /// HTTP status code, when the backend answered at all.
        status_code: Option<u16>,
        /// Underlying cause.
        source: Option<Arc<dyn error::Error + Send + Sync>>,
    },

    /// The stream ended or errored before the terminal marker.
    StreamInterrupted {
        /// Human-readable error message.
        message: String,
        /// Underlying cause.
        source: Option<Arc<dyn error::Error + Send + Sync>>,
    },

    /// A frame could not be classified.  Never surfaced to the UI.
    MalformedFrame {
        /// Human-readable error message.
        message: String,
    },

    /// The consumer stopped an in-flight stream.
    Cancelled {
        /// The session whose turn was cancelled.
        session_id: String,
    },

    /// A session id that the registry does not hold.
    NotFound {
        /// Human-readable error message.
        message: String,
        /// The id that was looked up.
        session_id: Option<String>,
    },

    /// Error during validation of request parameters.
    Validation {
        /// Human-readable error message.
        message: String,
        /// Parameter that failed validation.
        param: Option<String>,
    },

    /// Error during JSON serialization or deserialization.
    Serialization {
        /// Human-readable error message.
        message: String,
        /// The underlying error.
        source: Option<Arc<dyn error::Error + Send + Sync>>,
    },

    /// I/O error.
    Io {
        /// Human-readable error message.
        message: String,
        /// The underlying error.
        source: Arc<io::Error>,
    },

    /// A URL parsing or manipulation error.
    Url {
        /// Human-readable error message.
        message: String,
        /// The underlying error.
        source: Option<url::ParseError>,
    },
}

impl Error {
    /// Creates a new no-active-session error.
    pub fn no_active_session() -> Self {
        Error::NoActiveSession
    }

    /// Creates a new session-busy error.
    pub fn session_busy(session_id: impl Into<String>) -> Self {
        Error::SessionBusy {
            session_id: session_id.into(),
        }
    }

    /// Creates a new transport error.
    pub fn transport(
        message: impl Into<String>,
        status_code: Option<u16>,
        source: Option<Box<dyn error::Error + Send + Sync>>,
    ) -> Self {
        Error::Transport {
            message: message.into(),
            status_code,
            source: source.map(Arc::from),
        }
    }

    /// Creates a new stream-interrupted error.
    pub fn stream_interrupted(
        message: impl Into<String>,
        source: Option<Box<dyn error::Error + Send + Sync>>,
    ) -> Self {
        Error::StreamInterrupted {
            message: message.into(),
            source: source.map(Arc::from),
        }
    }

    /// Creates a new malformed-frame error.
    pub fn malformed_frame(message: impl Into<String>) -> Self {
        Error::MalformedFrame {
            message: message.into(),
        }
    }

    /// Creates a new cancellation error.
    pub fn cancelled(session_id: impl Into<String>) -> Self {
        Error::Cancelled {
            session_id: session_id.into(),
        }
    }

    /// Creates a new not found error.
    pub fn not_found(message: impl Into<String>, session_id: Option<String>) -> Self {
        Error::NotFound {
            message: message.into(),
            session_id,
        }
    }

    /// Creates a new validation error.
    pub fn validation(message: impl Into<String>, param: Option<String>) -> Self {
        Error::Validation {
            message: message.into(),
            param,
        }
    }

    /// Creates a new serialization error.
    pub fn serialization(
        message: impl Into<String>,
        source: Option<Box<dyn error::Error + Send + Sync>>,
    ) -> Self {
        Error::Serialization {
            message: message.into(),
            source: source.map(Arc::from),
        }
    }

    /// Creates a new I/O error.
    pub fn io(message: impl Into<String>, source: io::Error) -> Self {
        Error::Io {
            message: message.into(),
            source: Arc::new(source),
        }
    }

    /// Creates a new URL error.
    pub fn url(message: impl Into<String>, source: Option<url::ParseError>) -> Self {
        Error::Url {
            message: message.into(),
            source,
        }
    }

    /// Returns true if this error is a no-active-session error.
    pub fn is_no_active_session(&self) -> bool {
        matches!(self, Error::NoActiveSession)
    }

    /// Returns true if this error is a session-busy error.
    pub fn is_session_busy(&self) -> bool {
        matches!(self, Error::SessionBusy { .. })
    }

    /// Returns true if this error is a transport error.
    pub fn is_transport(&self) -> bool {
        matches!(self, Error::Transport { .. })
    }

    /// Returns true if this error is a stream-interrupted error.
    pub fn is_stream_interrupted(&self) -> bool {
        matches!(self, Error::StreamInterrupted { .. })
    }

    /// Returns true if this error is a malformed-frame error.
    pub fn is_malformed_frame(&self) -> bool {
        matches!(self, Error::MalformedFrame { .. })
    }

    /// Returns true if this error is a cancellation.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled { .. })
    }

    /// Returns true if this error is a "not found" error.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound { .. })
    }

    /// Returns true if this error is a validation error.
    pub fn is_validation(&self) -> bool {
        matches!(self, Error::Validation { .. })
    }

    /// Returns true if a user should see this error as a notification.
    ///
    /// Malformed frames are part of the grammar's ignorable lines and cancellations are
    /// requested by the user, so neither raises a banner.
    pub fn is_user_visible(&self) -> bool {
        !matches!(self, Error::MalformedFrame { .. } | Error::Cancelled { .. })
    }

    /// Returns the status code associated with this error, if any.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Error::Transport { status_code, .. } => *status_code,
            _ => None,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::NoActiveSession => write!(f, "No active session: select or create a session first"),
            Error::SessionBusy { session_id } => {
                write!(f, "Session busy: a response is still streaming for {session_id}")
            }
            Error::Transport {
                message,
                status_code,
                ..
            } => {
                if let Some(status_code) = status_code {
                    write!(f, "Transport error: {message} (status {status_code})")
                } else {
                    write!(f, "Transport error: {message}")
                }
            }
            Error::StreamInterrupted { message, .. } => {
                write!(f, "Stream interrupted: {message}")
            }
            Error::MalformedFrame { message } => {
                write!(f, "Malformed frame: {message}")
            }
            Error::Cancelled { session_id } => {
                write!(f, "Cancelled: stream for {session_id} was stopped")
            }
            Error::NotFound {
                message,
                session_id,
            } => {
                if let Some(session_id) = session_id {
                    write!(f, "Session not found: {message} [ID: {session_id}]")
                } else {
                    write!(f, "Session not found: {message}")
                }
            }
            Error::Validation { message, param } => {
                if let Some(param) = param {
                    write!(f, "Validation error: {message} (parameter: {param})")
                } else {
                    write!(f, "Validation error: {message}")
                }
            }
            Error::Serialization { message, .. } => {
                write!(f, "Serialization error: {message}")
            }
            Error::Io { message, .. } => {
                write!(f, "I/O error: {message}")
            }
            Error::Url { message, .. } => {
                write!(f, "URL error: {message}")
            }
        }
    }
}

impl error::Error for Error {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self {
            Error::Transport { source, .. } => source
                .as_ref()
                .map(|e| e.as_ref() as &(dyn error::Error + 'static)),
            Error::StreamInterrupted { source, .. } => source
                .as_ref()
                .map(|e| e.as_ref() as &(dyn error::Error + 'static)),
            Error::Serialization { source, .. } => source
                .as_ref()
                .map(|e| e.as_ref() as &(dyn error::Error + 'static)),
            Error::Io { source, .. } => Some(source),
            Error::Url { source, .. } => {
                source.as_ref().map(|e| e as &(dyn error::Error + 'static))
            }
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::io(err.to_string(), err)
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::serialization(format!("JSON error: {err}"), Some(Box::new(err)))
    }
}

impl From<url::ParseError> for Error {
    fn from(err: url::ParseError) -> Self {
        Error::url(format!("URL parse error: {err}"), Some(err))
    }
}

/// A specialized Result type for sluice operations.
pub type Result<T> = std::result::Result<T, Error>;
