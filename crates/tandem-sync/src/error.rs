//! Error types for lockstep synchronization.

use tandem_protocol::{Checksum, ClientId, CompanyId, ErrorCode, RecvStatus};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SyncError {
    /// A command arrived for a frame this instance has already executed.
    #[error("command for frame {frame} arrived after frame {executed} was executed")]
    LateCommand { frame: u32, executed: u32 },

    #[error("client {client} exceeded {limit} commands per frame")]
    TooManyCommands { client: ClientId, limit: u32 },

    /// The submitter may not act for this company.
    #[error("client {client} may not submit for company {company}")]
    NotEntitled { client: ClientId, company: CompanyId },

    /// The simulation refused the command.
    #[error("invalid command: {0}")]
    InvalidCommand(String),

    #[error("desync at frame {frame}: host {expected}, local {actual}")]
    Desync {
        frame: u32,
        expected: Checksum,
        actual: Checksum,
    },

    #[error("snapshot overflow: {received} bytes received, {announced} announced")]
    SnapshotOverflow { received: usize, announced: usize },

    /// The announced or saved size exceeds what this side accepts.
    #[error("snapshot of {size} bytes exceeds the {max} byte limit")]
    SnapshotTooLarge { size: usize, max: usize },

    #[error("snapshot ended early: {received} of {announced} bytes")]
    SnapshotShort { received: usize, announced: usize },

    /// A snapshot message arrived out of sequence.
    #[error("unexpected snapshot message: {0}")]
    SnapshotSequence(&'static str),

    #[error("snapshot could not be loaded: {0}")]
    SnapshotLoad(String),
}

impl SyncError {
    /// The code reported to the peer.
    pub fn error_code(&self) -> ErrorCode {
        match self {
            Self::LateCommand { .. } => ErrorCode::NotExpected,
            Self::TooManyCommands { .. } => ErrorCode::TooManyCommands,
            Self::NotEntitled { .. } => ErrorCode::CompanyMismatch,
            Self::InvalidCommand(_) => ErrorCode::InvalidCommand,
            Self::Desync { .. } => ErrorCode::Desync,
            Self::SnapshotOverflow { .. }
            | Self::SnapshotTooLarge { .. }
            | Self::SnapshotShort { .. }
            | Self::SnapshotSequence(_)
            | Self::SnapshotLoad(_) => ErrorCode::SnapshotFailed,
        }
    }

    /// How the connection ends when this error is fatal to it.
    ///
    /// Command rejections never end a connection; they map to `Okay`.
    pub fn recv_status(&self) -> RecvStatus {
        match self {
            Self::TooManyCommands { .. } | Self::NotEntitled { .. } | Self::InvalidCommand(_) => {
                RecvStatus::Okay
            }
            Self::LateCommand { .. } => RecvStatus::MalformedPacket,
            Self::Desync { .. } => RecvStatus::Desync,
            Self::SnapshotOverflow { .. }
            | Self::SnapshotTooLarge { .. }
            | Self::SnapshotShort { .. }
            | Self::SnapshotSequence(_)
            | Self::SnapshotLoad(_) => RecvStatus::SnapshotFailed,
        }
    }
}
