//! Error types for the session layer.

use tandem_protocol::{ClientId, ErrorCode};

use crate::ConnectionState;

/// Errors that can occur while a participant joins.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// The key-confirmation proof did not verify. With password
    /// authentication this is what a wrong password looks like.
    #[error("wrong password")]
    WrongPassword,

    /// The identity key is not on the allow list or its signature failed.
    #[error("not authorized")]
    NotAuthorized,

    /// The host asked for a method this side cannot perform.
    #[error("authentication method unavailable: {0}")]
    MethodUnavailable(&'static str),

    /// Key agreement or key derivation failed.
    #[error("key exchange failed")]
    KeyExchange,

    /// A message arrived that is not legal in the current state.
    #[error("illegal transition from {from} to {to}")]
    IllegalTransition {
        from: ConnectionState,
        to: ConnectionState,
    },

    /// Another participant already uses this name.
    #[error("name {0:?} is already in use")]
    NameInUse(String),

    /// The host has no room for another participant.
    #[error("server full")]
    ServerFull,

    #[error("client {0} not found")]
    NotFound(ClientId),
}

impl SessionError {
    /// The code reported to the peer when this error ends a join.
    pub fn error_code(&self) -> ErrorCode {
        match self {
            Self::WrongPassword => ErrorCode::WrongPassword,
            Self::NotAuthorized | Self::MethodUnavailable(_) => ErrorCode::NotAuthorized,
            Self::KeyExchange => ErrorCode::General,
            Self::IllegalTransition { .. } => ErrorCode::NotExpected,
            Self::NameInUse(_) => ErrorCode::NameInUse,
            Self::ServerFull => ErrorCode::ServerFull,
            Self::NotFound(_) => ErrorCode::General,
        }
    }
}
