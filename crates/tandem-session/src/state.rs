//! The participant-side connection state machine.

use std::fmt;

use crate::SessionError;

// ---------------------------------------------------------------------------
// ConnectionState
// ---------------------------------------------------------------------------

/// Where a participant is in the join sequence.
///
/// ```text
/// Inactive → Joining → AuthenticatingPassword → Encrypted
///          → CheckingContentCompatibility → Authorized
///          → [WaitingForSnapshot →] ReceivingSnapshot → Active
/// ```
///
/// Every state except `Inactive` may drop back to `Inactive` (connection
/// lost, quit, fatal error). Only a fresh connect leaves `Inactive`.
/// `End` bounds the enumeration and is never entered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub enum ConnectionState {
    #[default]
    Inactive,
    Joining,
    AuthenticatingPassword,
    Encrypted,
    CheckingContentCompatibility,
    Authorized,
    WaitingForSnapshot,
    ReceivingSnapshot,
    Active,
    End,
}

impl ConnectionState {
    /// Every state, in declaration order.
    pub const ALL: [Self; 10] = [
        Self::Inactive,
        Self::Joining,
        Self::AuthenticatingPassword,
        Self::Encrypted,
        Self::CheckingContentCompatibility,
        Self::Authorized,
        Self::WaitingForSnapshot,
        Self::ReceivingSnapshot,
        Self::Active,
        Self::End,
    ];

    /// Returns `true` if moving to `target` is legal.
    pub fn can_transition_to(self, target: Self) -> bool {
        use ConnectionState::*;
        match (self, target) {
            (_, End) | (End, _) => false,
            (Inactive, Joining) => true,
            (Inactive, _) => false,
            (_, Inactive) => true,
            (Joining, AuthenticatingPassword)
            | (AuthenticatingPassword, Encrypted)
            | (Encrypted, CheckingContentCompatibility)
            | (CheckingContentCompatibility, Authorized)
            | (Authorized, WaitingForSnapshot)
            | (Authorized, ReceivingSnapshot)
            | (WaitingForSnapshot, ReceivingSnapshot)
            | (ReceivingSnapshot, Active) => true,
            _ => false,
        }
    }

    /// Steady state: commands and frame broadcasts are live.
    pub fn is_active(self) -> bool {
        self == Self::Active
    }

    /// Frames in both directions are encrypted in this state.
    pub fn is_encrypted(self) -> bool {
        self >= Self::Encrypted && self < Self::End
    }

    /// Somewhere in the join sequence or beyond.
    pub fn is_connected(self) -> bool {
        !matches!(self, Self::Inactive | Self::End)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

// ---------------------------------------------------------------------------
// StateMachine
// ---------------------------------------------------------------------------

/// One participant connection's state, with every change checked.
#[derive(Debug, Default)]
pub struct StateMachine {
    state: ConnectionState,
}

impl StateMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// User-initiated connect: `Inactive → Joining`.
    pub fn connect(&mut self) -> Result<(), SessionError> {
        self.transition(ConnectionState::Joining)
    }

    /// Moves to `target` if legal.
    ///
    /// # Errors
    /// [`SessionError::IllegalTransition`]; the state is left unchanged.
    pub fn transition(&mut self, target: ConnectionState) -> Result<(), SessionError> {
        if !self.state.can_transition_to(target) {
            return Err(SessionError::IllegalTransition {
                from: self.state,
                to: target,
            });
        }
        tracing::debug!(from = %self.state, to = %target, "connection state change");
        self.state = target;
        Ok(())
    }

    /// Drops to `Inactive` from wherever the connection was.
    ///
    /// Returns the state left behind, or `None` if already inactive.
    pub fn close(&mut self) -> Option<ConnectionState> {
        if self.state == ConnectionState::Inactive {
            return None;
        }
        let previous = std::mem::replace(&mut self.state, ConnectionState::Inactive);
        tracing::debug!(from = %previous, "connection state reset to Inactive");
        Some(previous)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::{HashSet, VecDeque};

    use ConnectionState::*;

    /// States reachable from `Joining` without ever visiting `avoid`.
    fn reachable_avoiding(avoid: ConnectionState) -> HashSet<ConnectionState> {
        let mut seen = HashSet::from([Joining]);
        let mut queue = VecDeque::from([Joining]);
        while let Some(state) = queue.pop_front() {
            for next in ConnectionState::ALL {
                if next != avoid
                    && next != Inactive
                    && state.can_transition_to(next)
                    && seen.insert(next)
                {
                    queue.push_back(next);
                }
            }
        }
        seen
    }

    #[test]
    fn test_inactive_only_allows_connect() {
        for target in ConnectionState::ALL {
            assert_eq!(Inactive.can_transition_to(target), target == Joining, "{target}");
        }
    }

    #[test]
    fn test_every_connected_state_can_drop_to_inactive() {
        for state in ConnectionState::ALL {
            if state.is_connected() {
                assert!(state.can_transition_to(Inactive), "{state}");
            }
        }
    }

    #[test]
    fn test_end_is_never_entered() {
        for state in ConnectionState::ALL {
            assert!(!state.can_transition_to(End));
        }
    }

    #[test]
    fn test_active_unreachable_without_encrypted() {
        assert!(!reachable_avoiding(Encrypted).contains(&Active));
    }

    #[test]
    fn test_active_unreachable_without_content_check() {
        assert!(!reachable_avoiding(CheckingContentCompatibility).contains(&Active));
    }

    #[test]
    fn test_content_check_unreachable_without_encrypted() {
        assert!(!reachable_avoiding(Encrypted).contains(&CheckingContentCompatibility));
    }

    #[test]
    fn test_snapshot_may_skip_waiting() {
        assert!(Authorized.can_transition_to(ReceivingSnapshot));
        assert!(Authorized.can_transition_to(WaitingForSnapshot));
        assert!(!WaitingForSnapshot.can_transition_to(Active));
    }

    #[test]
    fn test_is_encrypted_from_encrypted_onwards() {
        assert!(!AuthenticatingPassword.is_encrypted());
        assert!(Encrypted.is_encrypted());
        assert!(Active.is_encrypted());
        assert!(!End.is_encrypted());
    }

    #[test]
    fn test_machine_full_join_sequence_succeeds() {
        let mut machine = StateMachine::new();
        machine.connect().unwrap();
        for next in [
            AuthenticatingPassword,
            Encrypted,
            CheckingContentCompatibility,
            Authorized,
            WaitingForSnapshot,
            ReceivingSnapshot,
            Active,
        ] {
            machine.transition(next).unwrap();
        }
        assert!(machine.state().is_active());
    }

    #[test]
    fn test_machine_illegal_transition_leaves_state() {
        let mut machine = StateMachine::new();
        machine.connect().unwrap();
        let err = machine.transition(Active).unwrap_err();
        assert!(matches!(
            err,
            SessionError::IllegalTransition {
                from: Joining,
                to: Active
            }
        ));
        assert_eq!(machine.state(), Joining);
    }

    #[test]
    fn test_machine_close_reports_previous_state() {
        let mut machine = StateMachine::new();
        assert_eq!(machine.close(), None);
        machine.connect().unwrap();
        assert_eq!(machine.close(), Some(Joining));
        assert_eq!(machine.state(), Inactive);
    }

    #[test]
    fn test_machine_connect_twice_fails() {
        let mut machine = StateMachine::new();
        machine.connect().unwrap();
        assert!(machine.connect().is_err());
    }
}
