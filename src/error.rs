use std::fmt;

/// Classification shared by every error the service reports to a caller.
///
/// Module errors map themselves onto a kind; the HTTP layer turns the kind
/// into a status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Missing or rejected credential.
    Unauthorized,
    /// Malformed payload or query parameter.
    BadRequest,
    MethodNotAllowed,
    /// Connection, query or insert failure against a store.
    StoreUnavailable,
    /// Enqueue or dequeue failure.
    QueueUnavailable,
    InternalError,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Unauthorized => "unauthorized",
            ErrorKind::BadRequest => "bad_request",
            ErrorKind::MethodNotAllowed => "method_not_allowed",
            ErrorKind::StoreUnavailable => "store_unavailable",
            ErrorKind::QueueUnavailable => "queue_unavailable",
            ErrorKind::InternalError => "internal_error",
        }
    }

    /// The kind a caller outside the service gets to see.
    ///
    /// Backend failures are not exposed individually.
    pub fn surfaced(self) -> ErrorKind {
        match self {
            ErrorKind::StoreUnavailable | ErrorKind::QueueUnavailable => ErrorKind::InternalError,
            other => other,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
