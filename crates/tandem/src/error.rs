//! Unified error type for Tandem.

use tandem_clock::ClockError;
use tandem_protocol::ProtocolError;
use tandem_session::SessionError;
use tandem_sync::SyncError;
use tandem_transport::TransportError;

/// Top-level error that wraps all crate-specific errors.
///
/// The `#[from]` attributes let `?` convert sub-crate errors.
#[derive(Debug, thiserror::Error)]
pub enum TandemError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Sync(#[from] SyncError),

    #[error(transparent)]
    Clock(#[from] ClockError),

    #[error("invalid config: {0}")]
    Config(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// The operation needs a state the connection is not in.
    #[error("not connected: {0}")]
    NotConnected(&'static str),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_transport_error() {
        let err = TransportError::ConnectionClosed("gone".into());
        let tandem_err: TandemError = err.into();
        assert!(matches!(tandem_err, TandemError::Transport(_)));
        assert!(tandem_err.to_string().contains("gone"));
    }

    #[test]
    fn test_from_protocol_error() {
        let tandem_err: TandemError = ProtocolError::UnknownTag(200).into();
        assert!(matches!(tandem_err, TandemError::Protocol(_)));
    }

    #[test]
    fn test_from_session_error() {
        let tandem_err: TandemError = SessionError::WrongPassword.into();
        assert!(matches!(tandem_err, TandemError::Session(_)));
    }

    #[test]
    fn test_from_sync_error() {
        let err = SyncError::SnapshotSequence("done before size");
        let tandem_err: TandemError = err.into();
        assert!(matches!(tandem_err, TandemError::Sync(_)));
    }
}
