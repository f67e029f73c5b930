use thiserror::Error;

// Every message is self-contained: the underlying `io::Error` is rendered
// inline and not exposed through `source()`, so a `{:#}` chain never repeats it.

/// Failures raised by a stream transport (connect and write paths).
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("cannot reach {address}:{port}: {error}")]
    Connect {
        address: String,
        port: u16,
        error: std::io::Error,
    },

    #[error("timed out connecting to {address}:{port} after {ms}ms")]
    ConnectTimeout { address: String, port: u16, ms: u64 },

    #[error("write failed: {error}")]
    SendFailed { error: std::io::Error },
}

impl TransportError {
    /// Whether the error happened while establishing the connection.
    pub fn is_connect_error(&self) -> bool {
        matches!(self, Self::Connect { .. } | Self::ConnectTimeout { .. })
    }
}

/// Outcomes reported back to callers of the command channel.
#[derive(Error, Debug)]
pub enum ChannelError {
    #[error("Connection failed: {0}")]
    Connect(TransportError),

    #[error("Handshake failed: {0}")]
    Handshake(TransportError),

    #[error("Command channel worker is no longer running")]
    WorkerStopped,
}

#[derive(Error, Debug)]
pub enum DiscoveryError {
    #[error("A scan is already in progress")]
    ScanInProgress,

    #[error("Discovery socket error: {0}")]
    Socket(std::io::Error),

    #[error("Scan failed: {reason}")]
    ScanFailed { reason: String },
}

impl From<std::io::Error> for DiscoveryError {
    fn from(e: std::io::Error) -> Self {
        Self::Socket(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;
    use std::io;

    /// `{:#}`-style rendering: every message in the source chain, joined.
    fn chain(err: &dyn std::error::Error) -> String {
        let mut text = err.to_string();
        let mut next = err.source();
        while let Some(cause) = next {
            text.push_str(": ");
            text.push_str(&cause.to_string());
            next = cause.source();
        }
        text
    }

    #[test]
    fn connect_failure_message_carries_reason() {
        let err = ChannelError::Connect(TransportError::Connect {
            address: "10.0.0.5".into(),
            port: 8888,
            error: io::Error::new(io::ErrorKind::ConnectionRefused, "refused"),
        });
        assert_eq!(
            err.to_string(),
            "Connection failed: cannot reach 10.0.0.5:8888: refused"
        );
    }

    #[test]
    fn chained_rendering_states_reason_once() {
        let err = ChannelError::Connect(TransportError::Connect {
            address: "127.0.0.1".into(),
            port: 1,
            error: io::Error::new(io::ErrorKind::ConnectionRefused, "Connection refused"),
        });
        let rendered = chain(&err);
        assert_eq!(rendered, "Connection failed: cannot reach 127.0.0.1:1: Connection refused");
        assert_eq!(rendered.matches("Connection refused").count(), 1);

        let socket = DiscoveryError::from(io::Error::new(io::ErrorKind::PermissionDenied, "denied"));
        assert!(socket.source().is_none());
        assert_eq!(chain(&socket), "Discovery socket error: denied");
    }

    #[test]
    fn classifies_connect_errors() {
        let timeout = TransportError::ConnectTimeout {
            address: "h".into(),
            port: 1,
            ms: 10,
        };
        let write = TransportError::SendFailed {
            error: io::Error::from(io::ErrorKind::BrokenPipe),
        };
        assert!(timeout.is_connect_error());
        assert!(!write.is_connect_error());
    }
}
