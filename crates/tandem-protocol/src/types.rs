//! Identity and status types shared by both ends of a session.

use std::fmt;

// ---------------------------------------------------------------------------
// Identity types
// ---------------------------------------------------------------------------

/// Identity the host assigns to a participant in `ServerWelcome`.
///
/// `0` is never assigned. The host's own local instance is always
/// [`ClientId::HOST`]; remote participants count up from there.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClientId(pub u32);

impl ClientId {
    /// Placeholder used before a participant has been welcomed.
    pub const INVALID: Self = Self(0);
    /// The authoritative side's own local participant.
    pub const HOST: Self = Self(1);

    /// Returns `true` unless this is the unassigned placeholder.
    pub fn is_valid(self) -> bool {
        self != Self::INVALID
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "C-{}", self.0)
    }
}

/// The company (actor) a participant plays for.
///
/// Commands carry the company they act on; the host only accepts a
/// command whose company matches the one the submitter joined as.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CompanyId(pub u8);

impl CompanyId {
    /// Participants watching without a company. Never entitled to submit.
    pub const SPECTATOR: Self = Self(u8::MAX);

    pub fn is_spectator(self) -> bool {
        self == Self::SPECTATOR
    }
}

impl fmt::Display for CompanyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_spectator() {
            write!(f, "spectator")
        } else {
            write!(f, "company-{}", self.0)
        }
    }
}

// ---------------------------------------------------------------------------
// Checksum
// ---------------------------------------------------------------------------

/// Digest pair of deterministic simulation state at one frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Checksum(pub u32, pub u32);

impl fmt::Display for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:08x}:{:08x}", self.0, self.1)
    }
}

// ---------------------------------------------------------------------------
// CallbackKind
// ---------------------------------------------------------------------------

/// What the submitting application wants done once its command executes.
///
/// Resolved by the application layer on the submitter's own instance;
/// other instances carry it along untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CallbackKind {
    #[default]
    None,
    /// Confirm the action to the user (sound, message).
    Confirm,
    /// Move the viewport to whatever the command affected.
    Focus,
    /// Select whatever the command created.
    Select,
}

impl CallbackKind {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::None),
            1 => Some(Self::Confirm),
            2 => Some(Self::Focus),
            3 => Some(Self::Select),
            _ => None,
        }
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

// ---------------------------------------------------------------------------
// ErrorCode
// ---------------------------------------------------------------------------

/// Error codes carried by `ServerError`, `ClientError`,
/// `ServerErrorQuit` and `ServerCommandRejected`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ErrorCode {
    General = 0,
    Desync,
    SnapshotFailed,
    ConnectionLost,
    IllegalPacket,
    ContentMismatch,
    NotAuthorized,
    NotExpected,
    WrongRevision,
    NameInUse,
    WrongPassword,
    CompanyMismatch,
    Kicked,
    InvalidCommand,
    ServerFull,
    TooManyCommands,
    TimeoutComputer,
    TimeoutJoin,
    TimeoutSnapshot,
}

impl ErrorCode {
    const ALL: [Self; 19] = [
        Self::General,
        Self::Desync,
        Self::SnapshotFailed,
        Self::ConnectionLost,
        Self::IllegalPacket,
        Self::ContentMismatch,
        Self::NotAuthorized,
        Self::NotExpected,
        Self::WrongRevision,
        Self::NameInUse,
        Self::WrongPassword,
        Self::CompanyMismatch,
        Self::Kicked,
        Self::InvalidCommand,
        Self::ServerFull,
        Self::TooManyCommands,
        Self::TimeoutComputer,
        Self::TimeoutJoin,
        Self::TimeoutSnapshot,
    ];

    /// Unknown codes from newer peers collapse to [`ErrorCode::General`].
    pub fn from_u8(value: u8) -> Self {
        Self::ALL
            .get(value as usize)
            .copied()
            .unwrap_or(Self::General)
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::General => "general error",
            Self::Desync => "desync",
            Self::SnapshotFailed => "snapshot transfer failed",
            Self::ConnectionLost => "connection lost",
            Self::IllegalPacket => "illegal packet",
            Self::ContentMismatch => "content mismatch",
            Self::NotAuthorized => "not authorized",
            Self::NotExpected => "unexpected packet",
            Self::WrongRevision => "wrong revision",
            Self::NameInUse => "name in use",
            Self::WrongPassword => "wrong password",
            Self::CompanyMismatch => "company mismatch",
            Self::Kicked => "kicked",
            Self::InvalidCommand => "invalid command",
            Self::ServerFull => "server full",
            Self::TooManyCommands => "too many commands",
            Self::TimeoutComputer => "timed out",
            Self::TimeoutJoin => "join timed out",
            Self::TimeoutSnapshot => "snapshot download timed out",
        };
        f.write_str(text)
    }
}

// ---------------------------------------------------------------------------
// RecvStatus
// ---------------------------------------------------------------------------

/// Disposition returned by every message handler.
///
/// Anything other than [`RecvStatus::Okay`] is terminal: the receive loop
/// stops handling buffered packets for that connection and the connection
/// is closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecvStatus {
    Okay,
    Desync,
    ContentMismatch,
    SnapshotFailed,
    ClientQuit,
    MalformedPacket,
    ServerError,
    ServerFull,
    ServerBanned,
    ConnectionLost,
    Timeout,
}

impl RecvStatus {
    pub fn is_terminal(self) -> bool {
        self != Self::Okay
    }

    /// The error code sent to the peer when closing with this status.
    pub fn error_code(self) -> ErrorCode {
        match self {
            Self::Okay | Self::ServerError | Self::ClientQuit => ErrorCode::General,
            Self::Desync => ErrorCode::Desync,
            Self::ContentMismatch => ErrorCode::ContentMismatch,
            Self::SnapshotFailed => ErrorCode::SnapshotFailed,
            Self::MalformedPacket => ErrorCode::IllegalPacket,
            Self::ServerFull => ErrorCode::ServerFull,
            Self::ServerBanned => ErrorCode::Kicked,
            Self::ConnectionLost => ErrorCode::ConnectionLost,
            Self::Timeout => ErrorCode::TimeoutComputer,
        }
    }
}

impl fmt::Display for RecvStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

// ---------------------------------------------------------------------------
// Direction
// ---------------------------------------------------------------------------

/// Which role a message is addressed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Participant → host.
    ToHost,
    /// Host → participant.
    ToParticipant,
}
