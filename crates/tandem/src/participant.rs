//! A joining instance, without I/O.
//!
//! [`Participant`] walks the join sequence, loads the host's snapshot and
//! then executes frames strictly behind the ceiling the host grants. The
//! driver calls [`Participant::receive`] with socket bytes,
//! [`Participant::step`] on its own cadence, and ships
//! [`Participant::drain_outgoing`].

use std::collections::BTreeMap;

use tandem_clock::SimClock;
use tandem_protocol::{
    AUTH_NONCE_LEN, AuthMethod, Checksum, ClientId, CommandPacket, CompanyId, ContentEntry,
    Direction, ErrorCode, Framer, GameMessage, NONCE_BASE_LEN, PUBLIC_KEY_LEN, ProtocolError,
    RecvStatus,
};
use tandem_session::{ConnectionState, Credentials, JoinerHandshake, SessionKeys, StateMachine};
use tandem_sync::{
    CommandQueue, ContentCatalog, DesyncDetector, Simulation, SnapshotReceiver, SyncError,
};
use tracing::{debug, info, trace, warn};

use crate::{NetworkConfig, TandemError};

/// Something the application may want to react to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParticipantEvent {
    StateChanged {
        from: ConnectionState,
        to: ConnectionState,
    },
    /// The host accepted us under this id.
    Welcomed(ClientId),
    /// Another participant is downloading; we are `position` in line.
    WaitingForSnapshot { position: u16 },
    SnapshotApplied { frame: u32 },
    CommandExecuted(CommandPacket),
    /// The host refused one of our commands.
    CommandRejected { cmd: u16, code: ErrorCode },
    ClientInfo {
        client_id: ClientId,
        company: CompanyId,
        name: String,
    },
    /// A participant finished joining.
    ClientJoined(ClientId),
    /// A participant left; `code` is set when it was dropped for an error.
    ClientLeft {
        client_id: ClientId,
        code: Option<ErrorCode>,
    },
    Chat { from: ClientId, message: String },
    /// Content the host requires that this instance lacks.
    ContentMissing(Vec<ContentEntry>),
    Desync {
        frame: u32,
        expected: Checksum,
        actual: Checksum,
    },
    Disconnected(RecvStatus),
}

/// Why the connection is ending, from this side.
#[derive(Debug, Clone, Copy)]
struct Close {
    status: RecvStatus,
    /// Reported to the host in a `ClientError` before closing.
    report: Option<ErrorCode>,
}

impl Close {
    fn quiet(status: RecvStatus) -> Self {
        Self {
            status,
            report: None,
        }
    }

    fn unexpected() -> Self {
        Self {
            status: RecvStatus::MalformedPacket,
            report: Some(ErrorCode::NotExpected),
        }
    }

    fn sync(e: &SyncError) -> Self {
        Self {
            status: e.recv_status(),
            report: Some(e.error_code()),
        }
    }
}

impl From<ProtocolError> for Close {
    fn from(e: ProtocolError) -> Self {
        warn!(error = %e, "could not encode message");
        Self::quiet(RecvStatus::ServerError)
    }
}

/// One joining instance of the simulation.
pub struct Participant<S: Simulation> {
    config: NetworkConfig,
    company: CompanyId,
    sim: S,
    catalog: Box<dyn ContentCatalog>,
    machine: StateMachine,
    framer: Framer,
    handshake: JoinerHandshake,
    keys: Option<SessionKeys>,
    client_id: Option<ClientId>,
    clock: SimClock,
    queue: CommandQueue,
    desync: DesyncDetector,
    snapshot: SnapshotReceiver,
    clients: BTreeMap<ClientId, (CompanyId, String)>,
    /// Liveness token to echo after the next executed frame.
    pending_token: Option<u8>,
    exit_status: Option<RecvStatus>,
    outgoing: Vec<u8>,
    events: Vec<ParticipantEvent>,
}

impl<S: Simulation> Participant<S> {
    /// `company` is the one this participant asks to play for; use
    /// [`CompanyId::SPECTATOR`] to only watch.
    pub fn new(
        config: NetworkConfig,
        credentials: Credentials,
        company: CompanyId,
        sim: S,
        catalog: impl ContentCatalog,
    ) -> Self {
        let config = config.validated();
        Self {
            framer: Framer::new(config.max_frame_size),
            snapshot: SnapshotReceiver::with_limit(config.max_snapshot_size),
            desync: DesyncDetector::new(config.checksum_history),
            config,
            company,
            sim,
            catalog: Box::new(catalog),
            machine: StateMachine::new(),
            handshake: JoinerHandshake::new(credentials),
            keys: None,
            client_id: None,
            clock: SimClock::shadow(0),
            queue: CommandQueue::new(),
            clients: BTreeMap::new(),
            pending_token: None,
            exit_status: None,
            outgoing: Vec::new(),
            events: Vec::new(),
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.machine.state()
    }

    pub fn config(&self) -> &NetworkConfig {
        &self.config
    }

    /// How the last connection ended, if it has.
    pub fn exit_status(&self) -> Option<RecvStatus> {
        self.exit_status
    }

    /// Our id, once welcomed.
    pub fn client_id(&self) -> Option<ClientId> {
        self.client_id
    }

    pub fn clock(&self) -> &SimClock {
        &self.clock
    }

    pub fn frame(&self) -> u32 {
        self.clock.frame()
    }

    pub fn simulation(&self) -> &S {
        &self.sim
    }

    /// Names and companies of the other participants, as announced.
    pub fn clients(&self) -> impl Iterator<Item = (ClientId, CompanyId, &str)> {
        self.clients
            .iter()
            .map(|(&id, (company, name))| (id, *company, name.as_str()))
    }

    /// Commands received but not yet executed.
    pub fn queued_commands(&self) -> usize {
        self.queue.len()
    }

    pub fn drain_outgoing(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.outgoing)
    }

    pub fn drain_events(&mut self) -> Vec<ParticipantEvent> {
        std::mem::take(&mut self.events)
    }

    // -- Lifecycle --

    /// Starts the join sequence on a freshly opened connection.
    ///
    /// # Errors
    /// [`TandemError::Session`] if a connection is already in progress.
    pub fn connect(&mut self) -> Result<(), TandemError> {
        self.machine.connect()?;
        self.events.push(ParticipantEvent::StateChanged {
            from: ConnectionState::Inactive,
            to: ConnectionState::Joining,
        });
        self.framer = Framer::new(self.config.max_frame_size);
        self.keys = None;
        self.client_id = None;
        self.queue.clear();
        self.desync.reset();
        self.snapshot = SnapshotReceiver::with_limit(self.config.max_snapshot_size);
        self.clients.clear();
        self.pending_token = None;
        self.exit_status = None;

        let revision = self.config.revision.clone();
        self.send(&GameMessage::ClientJoin { revision })?;
        info!(name = %self.config.player_name, "joining");
        Ok(())
    }

    /// Leaves the session politely.
    pub fn quit(&mut self) {
        if !self.machine.state().is_connected() {
            return;
        }
        if let Err(e) = self.send(&GameMessage::ClientQuit) {
            debug!(error = %e, "quit notice not sent");
        }
        self.terminate(Close::quiet(RecvStatus::ClientQuit));
    }

    /// The transport reported the connection gone.
    pub fn connection_lost(&mut self) {
        self.terminate(Close::quiet(RecvStatus::ConnectionLost));
    }

    /// Sends a command to the host for scheduling.
    ///
    /// # Errors
    /// [`TandemError::NotConnected`] unless active.
    pub fn submit(&mut self, mut command: CommandPacket) -> Result<(), TandemError> {
        if !self.machine.state().is_active() {
            return Err(TandemError::NotConnected("commands need an active session"));
        }
        command.frame = 0;
        command.is_mine = false;
        if let Some(id) = self.client_id {
            command.origin = id;
        }
        self.send(&GameMessage::ClientCommand(command))?;
        Ok(())
    }

    /// Sends a chat line to every active participant.
    pub fn chat(&mut self, message: impl Into<String>) -> Result<(), TandemError> {
        if !self.machine.state().is_active() {
            return Err(TandemError::NotConnected("chat needs an active session"));
        }
        self.send(&GameMessage::ClientChat {
            message: message.into(),
        })?;
        Ok(())
    }

    fn send(&mut self, msg: &GameMessage) -> Result<(), ProtocolError> {
        let packet = msg.encode()?;
        let bytes = self.framer.encode(&packet)?;
        trace!(packet = ?msg.packet_type(), len = bytes.len(), "queued");
        self.outgoing.extend_from_slice(&bytes);
        Ok(())
    }

    fn transition(&mut self, to: ConnectionState) -> Result<(), Close> {
        let from = self.machine.state();
        self.machine.transition(to).map_err(|e| {
            warn!(error = %e, "state change refused");
            Close::unexpected()
        })?;
        self.events.push(ParticipantEvent::StateChanged { from, to });
        Ok(())
    }

    /// Ends the connection, reporting to the host when there is something
    /// to report. Returns the status it ended with.
    fn terminate(&mut self, close: Close) -> RecvStatus {
        let state = self.machine.state();
        if state == ConnectionState::Inactive {
            return close.status;
        }
        if let Some(code) = close.report {
            if let Err(e) = self.send(&GameMessage::ClientError { code }) {
                debug!(error = %e, "error report not sent");
            }
        }
        if state.is_active() && close.status != RecvStatus::ClientQuit {
            warn!(frame = self.clock.frame(), "leaving an active session, saving locally");
            self.sim.emergency_save();
        }
        if let Some(from) = self.machine.close() {
            self.events.push(ParticipantEvent::StateChanged {
                from,
                to: ConnectionState::Inactive,
            });
        }
        self.keys = None;
        self.pending_token = None;
        self.exit_status = Some(close.status);
        match close.status {
            RecvStatus::ClientQuit => info!("left the session"),
            status => warn!(%status, "disconnected"),
        }
        self.events.push(ParticipantEvent::Disconnected(close.status));
        close.status
    }

    // -- Receiving --

    /// Feeds bytes read from the host connection.
    ///
    /// Stops at the first terminal status and returns it; the connection
    /// is closed by then.
    pub fn receive(&mut self, bytes: &[u8]) -> RecvStatus {
        if self.machine.state() == ConnectionState::Inactive {
            return RecvStatus::Okay;
        }
        self.framer.extend(bytes);
        loop {
            let body = match self.framer.next_frame() {
                Ok(Some(body)) => body,
                Ok(None) => return RecvStatus::Okay,
                Err(e) => {
                    warn!(error = %e, "malformed frame");
                    return self.terminate(Close {
                        status: RecvStatus::MalformedPacket,
                        report: Some(ErrorCode::IllegalPacket),
                    });
                }
            };
            let result = match GameMessage::decode(&body) {
                Ok(msg) => self.handle(msg),
                Err(e) => {
                    warn!(error = %e, "malformed packet");
                    Err(Close {
                        status: RecvStatus::MalformedPacket,
                        report: Some(ErrorCode::IllegalPacket),
                    })
                }
            };
            if let Err(close) = result {
                return self.terminate(close);
            }
        }
    }

    fn handle(&mut self, msg: GameMessage) -> Result<(), Close> {
        if msg.direction() != Direction::ToParticipant {
            warn!(packet = ?msg.packet_type(), "message not valid for a participant");
            return Err(Close::unexpected());
        }
        let state = self.machine.state();
        trace!(packet = ?msg.packet_type(), %state, "received");

        use ConnectionState as S;
        use GameMessage as M;
        match (state, msg) {
            (_, M::ServerFull) => Err(Close::quiet(RecvStatus::ServerFull)),
            (_, M::ServerBanned) => Err(Close::quiet(RecvStatus::ServerBanned)),
            (_, M::ServerError { code, detail }) => {
                warn!(%code, %detail, "host reported an error");
                Err(Close::quiet(RecvStatus::ServerError))
            }
            (_, M::ServerShutdown) => {
                info!("host shut down");
                Err(Close::quiet(RecvStatus::ServerError))
            }
            (
                S::Joining,
                M::ServerAuthRequest {
                    method,
                    server_public_key,
                    nonce,
                },
            ) => self.on_auth_request(method, &server_public_key, &nonce),
            (S::AuthenticatingPassword, M::ServerEnableEncryption { nonce_base }) => {
                self.on_enable_encryption(nonce_base)
            }
            (S::Encrypted, M::ServerCheckContent { content }) => self.on_check_content(&content),
            (S::CheckingContentCompatibility, M::ServerWelcome { client_id }) => {
                self.client_id = Some(client_id);
                self.transition(S::Authorized)?;
                self.events.push(ParticipantEvent::Welcomed(client_id));
                info!(client = %client_id, "welcomed");
                self.send(&M::ClientGetSnapshot)?;
                Ok(())
            }
            (S::Authorized | S::WaitingForSnapshot, M::ServerWaitForSnapshot { position }) => {
                if state == S::Authorized {
                    self.transition(S::WaitingForSnapshot)?;
                }
                self.events
                    .push(ParticipantEvent::WaitingForSnapshot { position });
                Ok(())
            }
            (S::Authorized | S::WaitingForSnapshot, M::ServerSnapshotBegin { frame }) => {
                self.transition(S::ReceivingSnapshot)?;
                self.snapshot.begin(frame);
                debug!(frame, "snapshot download started");
                Ok(())
            }
            (S::ReceivingSnapshot, M::ServerSnapshotSize { total }) => self
                .snapshot
                .set_size(total as usize)
                .map_err(|e| Close::sync(&e)),
            (S::ReceivingSnapshot, M::ServerSnapshotData { chunk }) => {
                self.snapshot.push_chunk(&chunk).map_err(|e| Close::sync(&e))
            }
            (S::ReceivingSnapshot, M::ServerSnapshotDone) => self.on_snapshot_done(),
            (S::Active, M::ServerFrame {
                frame,
                frame_max,
                token,
            }) => {
                self.clock.raise_ceiling(frame_max);
                self.clock.observe_server_frame(frame);
                if token.is_some() {
                    self.pending_token = token;
                }
                Ok(())
            }
            (S::Active, M::ServerSync { frame, checksum }) => {
                self.desync
                    .record_expected(frame, checksum)
                    .map_err(|e| self.desynced(&e))?;
                self.clock.record_sync(frame);
                Ok(())
            }
            (S::Active, M::ServerCommand(mut command)) => {
                command.is_mine = Some(command.origin) == self.client_id;
                self.queue
                    .enqueue(command, self.clock.frame())
                    .map_err(|e| Close::sync(&e))
            }
            (S::Active, M::ServerCommandRejected { cmd, code }) => {
                warn!(cmd, %code, "command rejected by host");
                self.events
                    .push(ParticipantEvent::CommandRejected { cmd, code });
                Ok(())
            }
            (S::Active, M::ServerChat { client_id, message }) => {
                self.events.push(ParticipantEvent::Chat {
                    from: client_id,
                    message,
                });
                Ok(())
            }
            (S::Active, M::ServerClientJoined { client_id }) => {
                self.events.push(ParticipantEvent::ClientJoined(client_id));
                Ok(())
            }
            (
                state,
                M::ServerClientInfo {
                    client_id,
                    company,
                    name,
                },
            ) if state >= S::Authorized => {
                self.clients.insert(client_id, (company, name.clone()));
                self.events.push(ParticipantEvent::ClientInfo {
                    client_id,
                    company,
                    name,
                });
                Ok(())
            }
            (state, M::ServerQuit { client_id }) if state >= S::Authorized => {
                self.client_left(client_id, None);
                Ok(())
            }
            (state, M::ServerErrorQuit { client_id, code }) if state >= S::Authorized => {
                self.client_left(client_id, Some(code));
                Ok(())
            }
            (state, msg) => {
                warn!(%state, packet = ?msg.packet_type(), "message not expected");
                Err(Close::unexpected())
            }
        }
    }

    fn on_auth_request(
        &mut self,
        method: AuthMethod,
        server_public_key: &[u8; PUBLIC_KEY_LEN],
        nonce: &[u8; AUTH_NONCE_LEN],
    ) -> Result<(), Close> {
        let (response, keys) = self
            .handshake
            .respond(method, server_public_key, nonce)
            .map_err(|e| {
                warn!(?method, error = %e, "cannot answer authentication");
                Close {
                    status: RecvStatus::ServerError,
                    report: Some(e.error_code()),
                }
            })?;
        self.send(&response)?;
        self.keys = Some(keys);
        self.transition(ConnectionState::AuthenticatingPassword)
    }

    fn on_enable_encryption(&mut self, nonce_base: [u8; NONCE_BASE_LEN]) -> Result<(), Close> {
        let keys = self.keys.take().ok_or_else(Close::unexpected)?;
        let (send, recv) = keys.participant_ciphers(nonce_base)?;
        self.framer.enable_send_encryption(send);
        self.framer.enable_recv_encryption(recv);
        self.transition(ConnectionState::Encrypted)?;
        debug!("encryption enabled");

        let msg = GameMessage::ClientIdentify {
            name: self.config.player_name.clone(),
            company: self.company,
        };
        self.send(&msg)?;
        Ok(())
    }

    fn on_check_content(&mut self, required: &[ContentEntry]) -> Result<(), Close> {
        self.transition(ConnectionState::CheckingContentCompatibility)?;
        let missing = self.catalog.missing(required);
        if !missing.is_empty() {
            warn!(missing = missing.len(), "required content not available");
            self.events.push(ParticipantEvent::ContentMissing(missing));
            return Err(Close {
                status: RecvStatus::ContentMismatch,
                report: Some(ErrorCode::ContentMismatch),
            });
        }
        self.send(&GameMessage::ClientContentChecked)?;
        Ok(())
    }

    fn on_snapshot_done(&mut self) -> Result<(), Close> {
        let (frame, data) = self.snapshot.finish().map_err(|e| Close::sync(&e))?;
        self.sim
            .load_snapshot(&data)
            .map_err(|e| Close::sync(&SyncError::SnapshotLoad(e)))?;
        self.clock = SimClock::shadow(frame);
        self.desync.reset();
        self.transition(ConnectionState::Active)?;
        self.send(&GameMessage::ClientSnapshotOk)?;
        self.events.push(ParticipantEvent::SnapshotApplied { frame });
        info!(frame, bytes = data.len(), "snapshot loaded");
        Ok(())
    }

    fn client_left(&mut self, client_id: ClientId, code: Option<ErrorCode>) {
        self.clients.remove(&client_id);
        self.events
            .push(ParticipantEvent::ClientLeft { client_id, code });
    }

    fn desynced(&mut self, e: &SyncError) -> Close {
        if let SyncError::Desync {
            frame,
            expected,
            actual,
        } = *e
        {
            warn!(frame, %expected, %actual, "desync detected");
            self.events.push(ParticipantEvent::Desync {
                frame,
                expected,
                actual,
            });
        }
        Close::sync(e)
    }

    // -- Stepping --

    /// Executes the next frame if the host has granted it.
    ///
    /// Returns the executed frame, or `None` when not active or at the
    /// ceiling. A desync found here ends the connection.
    pub fn step(&mut self) -> Option<u32> {
        if !self.machine.state().is_active() {
            return None;
        }
        let frame = self.clock.advance().ok()?;
        for command in self.queue.drain_due(frame) {
            self.sim.apply_command(&command);
            self.events.push(ParticipantEvent::CommandExecuted(command));
        }
        self.sim.step();
        let checksum = self.sim.checksum();
        trace!(frame, %checksum, "frame executed");

        if let Err(e) = self.desync.record_local(frame, checksum) {
            let close = self.desynced(&e);
            self.terminate(close);
            return Some(frame);
        }
        if let Some(token) = self.pending_token.take() {
            if let Err(e) = self.send(&GameMessage::ClientAck { frame, token }) {
                self.terminate(e.into());
            }
        }
        Some(frame)
    }

    /// Executes granted frames, at most `limit`. Returns how many ran.
    pub fn catch_up(&mut self, limit: usize) -> usize {
        let mut executed = 0;
        while executed < limit && self.step().is_some() {
            executed += 1;
        }
        executed
    }
}
