use std::fmt;

/// Error kind for connector errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Invalid or unsupported options handed to a broker or sink.
    Config,
    /// Local I/O failure (file output, replay file, ...).
    Io,
    /// Broker or downstream connection failure. Usually transient.
    Transport,
    /// The peer refused the request (unknown message id, exclusive
    /// subscription already taken, event rejected by the sink).
    Rejected,
    /// The handle or client has been closed and cannot be used again.
    Closed,
}

/// Returned by every broker, subscription and sink trait method.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectorError {
    pub kind: ErrorKind,
    pub message: String,
}

impl ConnectorError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self { kind: ErrorKind::Config, message: msg.into() }
    }

    pub fn io(msg: impl Into<String>) -> Self {
        Self { kind: ErrorKind::Io, message: msg.into() }
    }

    pub fn transport(msg: impl Into<String>) -> Self {
        Self { kind: ErrorKind::Transport, message: msg.into() }
    }

    pub fn rejected(msg: impl Into<String>) -> Self {
        Self { kind: ErrorKind::Rejected, message: msg.into() }
    }

    pub fn closed(msg: impl Into<String>) -> Self {
        Self { kind: ErrorKind::Closed, message: msg.into() }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Add context to the error, preserving the original ErrorKind.
    ///
    /// Produces: `"context: original message"`.
    pub fn with_context(self, ctx: impl fmt::Display) -> Self {
        Self {
            kind: self.kind,
            message: format!("{ctx}: {}", self.message),
        }
    }
}

impl fmt::Display for ConnectorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

impl std::error::Error for ConnectorError {}

// ---------------------------------------------------------------------------
// From impls: standard error types → ConnectorError with correct ErrorKind
// ---------------------------------------------------------------------------

impl From<std::io::Error> for ConnectorError {
    fn from(e: std::io::Error) -> Self {
        Self::io(e.to_string())
    }
}

impl From<serde_json::Error> for ConnectorError {
    fn from(e: serde_json::Error) -> Self {
        Self::config(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn context_keeps_kind() {
        let e = ConnectorError::transport("connection reset").with_context("consumer 'sub-1'");
        assert_eq!(e.kind(), ErrorKind::Transport);
        assert_eq!(e.message, "consumer 'sub-1': connection reset");
        assert_eq!(e.to_string(), "Transport: consumer 'sub-1': connection reset");
    }

    #[test]
    fn io_error_maps_to_io_kind() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        assert_eq!(ConnectorError::from(io).kind(), ErrorKind::Io);
    }
}
