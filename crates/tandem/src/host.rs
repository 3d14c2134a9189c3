//! The authoritative side, without I/O.
//!
//! [`Host`] owns the canonical simulation and clock and one
//! [`RemoteClient`](crate::remote::RemoteClient) per connection. The
//! driver feeds it bytes and heartbeats and ships whatever it queued:
//!
//! ```text
//! accept() ─┐
//! receive() ├─▶ Host ──▶ drain_outgoing() ──▶ transport
//! tick()   ─┘       └──▶ reap()          ──▶ close sockets
//! ```
//!
//! Closing is two-phase: a connection that fails is only marked, and its
//! state is released by [`Host::reap`] between loop iterations.

use std::collections::{BTreeMap, BTreeSet};
use std::net::IpAddr;

use tandem_clock::SimClock;
use tandem_protocol::{
    Checksum, ClientId, CommandPacket, CompanyId, Direction, ErrorCode, Framer, GameMessage,
    HEADER_LEN, PUBLIC_KEY_LEN, ProtocolError, RecvStatus, TAG_LEN,
};
use tandem_session::{AuthPolicy, ClientInfo, ClientRegistry, HostHandshake, SessionKeys};
use tandem_sync::{
    CommandDistributor, CommandQueue, ContentCatalog, Simulation, SnapshotScheduler,
    SnapshotSender, SnapshotSlot, SyncError,
};
use tracing::{debug, info, trace, warn};

use crate::remote::{RemoteClient, RemoteStatus};
use crate::{NetworkConfig, TandemError};

/// Company the host's own participant plays for.
pub const HOST_COMPANY: CompanyId = CompanyId(0);

/// Something the application may want to react to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostEvent {
    ClientConnected(ClientId),
    /// The participant identified itself.
    ClientJoined { client_id: ClientId, name: String },
    /// The participant loaded its snapshot and is in lockstep.
    ClientActive(ClientId),
    ClientLeft {
        client_id: ClientId,
        status: RecvStatus,
    },
    /// A command was applied to the host's simulation.
    CommandExecuted(CommandPacket),
    CommandRejected {
        origin: ClientId,
        cmd: u16,
        code: ErrorCode,
    },
    Chat { from: ClientId, message: String },
}

/// A connection refused on accept. Write `bytes`, then close.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejection {
    pub bytes: Vec<u8>,
    pub status: RecvStatus,
}

/// Why a handler ends a connection.
#[derive(Debug, Clone, Copy)]
struct Disconnect {
    status: RecvStatus,
    /// Sent to the peer (if `tell_peer`) and to the other participants.
    code: ErrorCode,
    tell_peer: bool,
}

impl Disconnect {
    fn error(code: ErrorCode) -> Self {
        Self {
            status: RecvStatus::ServerError,
            code,
            tell_peer: true,
        }
    }

    fn status(status: RecvStatus) -> Self {
        Self {
            status,
            code: status.error_code(),
            tell_peer: !matches!(status, RecvStatus::ClientQuit | RecvStatus::ConnectionLost),
        }
    }

    fn violation() -> Self {
        Self {
            status: RecvStatus::MalformedPacket,
            code: ErrorCode::NotExpected,
            tell_peer: true,
        }
    }

    /// The participant reported an error and is leaving.
    fn reported(code: ErrorCode) -> Self {
        let status = match code {
            ErrorCode::Desync => RecvStatus::Desync,
            ErrorCode::ContentMismatch => RecvStatus::ContentMismatch,
            ErrorCode::SnapshotFailed => RecvStatus::SnapshotFailed,
            _ => RecvStatus::ServerError,
        };
        Self {
            status,
            code,
            tell_peer: false,
        }
    }
}

impl From<ProtocolError> for Disconnect {
    fn from(e: ProtocolError) -> Self {
        warn!(error = %e, "could not encode message");
        Self::error(ErrorCode::General)
    }
}

/// The authoritative side of a session.
pub struct Host<S: Simulation> {
    config: NetworkConfig,
    auth: AuthPolicy,
    sim: S,
    catalog: Box<dyn ContentCatalog>,
    clock: SimClock,
    checksum: Checksum,
    registry: ClientRegistry,
    distributor: CommandDistributor,
    queue: CommandQueue,
    scheduler: SnapshotScheduler,
    remotes: BTreeMap<ClientId, RemoteClient>,
    pending_close: BTreeSet<ClientId>,
    events: Vec<HostEvent>,
}

impl<S: Simulation> Host<S> {
    pub fn new(
        config: NetworkConfig,
        auth: AuthPolicy,
        sim: S,
        catalog: impl ContentCatalog,
    ) -> Self {
        let config = config.validated();
        let mut registry = ClientRegistry::new(config.max_clients);
        registry.register_host(config.player_name.clone(), HOST_COMPANY);
        let checksum = sim.checksum();
        info!(
            method = ?auth.method(),
            lead_time = config.lead_time,
            revision = %config.revision,
            "host created"
        );
        Self {
            distributor: CommandDistributor::new(config.lead_time, config.max_commands_per_frame),
            config,
            auth,
            sim,
            catalog: Box::new(catalog),
            clock: SimClock::authoritative(0),
            checksum,
            registry,
            queue: CommandQueue::new(),
            scheduler: SnapshotScheduler::new(),
            remotes: BTreeMap::new(),
            pending_close: BTreeSet::new(),
            events: Vec::new(),
        }
    }

    // -- Accessors --

    pub fn frame(&self) -> u32 {
        self.clock.frame()
    }

    /// Checksum of the state after the last executed frame.
    pub fn checksum(&self) -> Checksum {
        self.checksum
    }

    pub fn simulation(&self) -> &S {
        &self.sim
    }

    pub fn config(&self) -> &NetworkConfig {
        &self.config
    }

    pub fn status(&self, id: ClientId) -> Option<RemoteStatus> {
        self.remotes.get(&id).map(|r| r.status)
    }

    /// Every known participant, the host included.
    pub fn clients(&self) -> impl Iterator<Item = &ClientInfo> {
        self.registry.iter()
    }

    /// Connections not yet reaped.
    pub fn connection_count(&self) -> usize {
        self.remotes.len()
    }

    pub fn is_closing(&self, id: ClientId) -> bool {
        self.pending_close.contains(&id)
    }

    // -- Connection lifecycle --

    /// Registers a new connection.
    ///
    /// # Errors
    /// A [`Rejection`] for banned addresses and a full server; the
    /// connection gets no id.
    pub fn accept(&mut self, peer: Option<IpAddr>) -> Result<ClientId, Rejection> {
        if let Some(address) = peer {
            if self.registry.is_banned(address) {
                info!(%address, "banned address refused");
                return Err(self.rejection(&GameMessage::ServerBanned, RecvStatus::ServerBanned));
            }
        }
        let id = match self.registry.allocate(peer) {
            Ok(id) => id,
            Err(_) => {
                info!(?peer, "server full, connection refused");
                return Err(self.rejection(&GameMessage::ServerFull, RecvStatus::ServerFull));
            }
        };

        let deadline = self.clock.frame().saturating_add(self.config.join_timeout_frames);
        self.remotes
            .insert(id, RemoteClient::new(id, self.config.max_frame_size, deadline));
        self.events.push(HostEvent::ClientConnected(id));
        info!(client = %id, ?peer, "connection accepted");
        Ok(id)
    }

    fn rejection(&self, msg: &GameMessage, status: RecvStatus) -> Rejection {
        let bytes = msg
            .encode()
            .and_then(|p| Framer::new(self.config.max_frame_size).encode(&p))
            .unwrap_or_else(|e| {
                warn!(error = %e, "could not encode rejection");
                Vec::new()
            });
        Rejection { bytes, status }
    }

    /// Feeds bytes read from `id`'s connection.
    ///
    /// Every complete frame is handled in order; handling stops at the
    /// first terminal status, which is returned.
    pub fn receive(&mut self, id: ClientId, bytes: &[u8]) -> RecvStatus {
        if self.pending_close.contains(&id) {
            return RecvStatus::Okay;
        }
        let Some(remote) = self.remotes.get_mut(&id) else {
            return RecvStatus::ConnectionLost;
        };
        remote.framer.extend(bytes);

        loop {
            // A handler may have closed this connection; what is still
            // buffered behind that frame is dropped.
            if self.pending_close.contains(&id) {
                return RecvStatus::Okay;
            }
            let next = match self.remotes.get_mut(&id) {
                Some(remote) => remote.framer.next_frame(),
                None => return RecvStatus::ConnectionLost,
            };
            let body = match next {
                Ok(Some(body)) => body,
                Ok(None) => return RecvStatus::Okay,
                Err(e) => {
                    warn!(client = %id, error = %e, "malformed frame");
                    return self.fail(id, Disconnect::status(RecvStatus::MalformedPacket));
                }
            };
            let result = match GameMessage::decode(&body) {
                Ok(msg) => self.handle(id, msg),
                Err(e) => {
                    warn!(client = %id, error = %e, "malformed packet");
                    Err(Disconnect::status(RecvStatus::MalformedPacket))
                }
            };
            if let Err(d) = result {
                return self.fail(id, d);
            }
        }
    }

    /// The transport reported the connection gone.
    pub fn connection_lost(&mut self, id: ClientId) {
        self.disconnect(id, Disconnect::status(RecvStatus::ConnectionLost));
    }

    pub fn kick(&mut self, id: ClientId) {
        self.disconnect(id, Disconnect::error(ErrorCode::Kicked));
    }

    /// Kicks `id` and refuses its address from now on.
    pub fn ban(&mut self, id: ClientId) {
        if let Some(address) = self.registry.get(id).and_then(|c| c.address) {
            self.registry.ban(address);
        }
        self.kick(id);
    }

    /// Tells every participant the session is over and closes them all.
    pub fn shutdown(&mut self) {
        let ids: Vec<_> = self.remotes.keys().copied().collect();
        for id in ids {
            if self.pending_close.insert(id) {
                if let Some(remote) = self.remotes.get_mut(&id) {
                    if let Err(e) = remote.send(&GameMessage::ServerShutdown) {
                        debug!(client = %id, error = %e, "shutdown notice not sent");
                    }
                }
                self.events.push(HostEvent::ClientLeft {
                    client_id: id,
                    status: RecvStatus::ServerError,
                });
            }
        }
        info!("host shut down");
    }

    /// Releases every connection marked for closing and returns the bytes
    /// still to be written to each before its socket is closed.
    pub fn reap(&mut self) -> Vec<(ClientId, Vec<u8>)> {
        let mut reaped = Vec::new();
        for id in std::mem::take(&mut self.pending_close) {
            if let Some(mut remote) = self.remotes.remove(&id) {
                reaped.push((id, remote.take_outgoing()));
            }
            self.registry.remove(id);
            if let Some(next) = self.scheduler.release(id) {
                if let Err(d) = self.start_snapshot(next) {
                    self.disconnect(next, d);
                }
            }
            debug!(client = %id, "connection reaped");
        }
        if !reaped.is_empty() {
            self.send_wait_positions();
        }
        reaped
    }

    pub fn drain_outgoing(&mut self) -> Vec<(ClientId, Vec<u8>)> {
        self.remotes
            .values_mut()
            .filter(|r| !r.outgoing.is_empty())
            .map(|r| (r.id, r.take_outgoing()))
            .collect()
    }

    pub fn drain_events(&mut self) -> Vec<HostEvent> {
        std::mem::take(&mut self.events)
    }

    /// Marks `id` for closing and tells everyone who needs to know.
    fn disconnect(&mut self, id: ClientId, d: Disconnect) {
        if self.pending_close.contains(&id) || !self.remotes.contains_key(&id) {
            return;
        }
        if d.tell_peer {
            if let Some(remote) = self.remotes.get_mut(&id) {
                let msg = GameMessage::ServerError {
                    code: d.code,
                    detail: String::new(),
                };
                if let Err(e) = remote.send(&msg) {
                    debug!(client = %id, error = %e, "error notice not sent");
                }
            }
        }
        self.pending_close.insert(id);
        self.distributor.forget(id);

        let announced = self
            .remotes
            .get(&id)
            .is_some_and(|r| r.status.is_announced());
        if announced {
            let notice = if d.status == RecvStatus::ClientQuit {
                GameMessage::ServerQuit { client_id: id }
            } else {
                GameMessage::ServerErrorQuit {
                    client_id: id,
                    code: d.code,
                }
            };
            if let Err(e) = self.broadcast(&notice, |r| r.status.is_announced()) {
                warn!(client = %id, error = %e, "leave notice not sent");
            }
        }

        match d.status {
            RecvStatus::ClientQuit => info!(client = %id, "client quit"),
            status => warn!(client = %id, %status, code = %d.code, "client dropped"),
        }
        self.events.push(HostEvent::ClientLeft {
            client_id: id,
            status: d.status,
        });
    }

    fn fail(&mut self, id: ClientId, d: Disconnect) -> RecvStatus {
        self.disconnect(id, d);
        d.status
    }

    /// Sends `msg` to every open connection matching `filter`.
    ///
    /// The packet is sized once against a sealed frame. A message that
    /// cannot fit is an error for the caller and reaches nobody; only a
    /// recipient whose own framer then fails is dropped.
    fn broadcast(
        &mut self,
        msg: &GameMessage,
        filter: impl Fn(&RemoteClient) -> bool,
    ) -> Result<(), ProtocolError> {
        let packet = msg.encode()?;
        let sealed = HEADER_LEN + packet.len() + TAG_LEN;
        if sealed > self.config.max_frame_size {
            return Err(ProtocolError::FrameTooLarge {
                len: sealed,
                max: self.config.max_frame_size,
            });
        }

        let mut failed = Vec::new();
        for remote in self.remotes.values_mut() {
            if self.pending_close.contains(&remote.id) || !filter(remote) {
                continue;
            }
            if let Err(e) = remote.send_packet(&packet) {
                warn!(client = %remote.id, error = %e, "broadcast failed");
                failed.push(remote.id);
            }
        }
        for id in failed {
            self.disconnect(id, Disconnect::error(ErrorCode::General));
        }
        Ok(())
    }

    fn remote(&mut self, id: ClientId) -> Result<&mut RemoteClient, Disconnect> {
        self.remotes
            .get_mut(&id)
            .ok_or(Disconnect::status(RecvStatus::ConnectionLost))
    }

    fn send_to(&mut self, id: ClientId, msg: &GameMessage) -> Result<(), Disconnect> {
        self.remote(id)?.send(msg)?;
        Ok(())
    }

    // -- Message handling --

    fn handle(&mut self, id: ClientId, msg: GameMessage) -> Result<(), Disconnect> {
        if msg.direction() != Direction::ToHost {
            warn!(client = %id, packet = ?msg.packet_type(), "message not valid for the host");
            return Err(Disconnect::status(RecvStatus::MalformedPacket));
        }
        let status = self.remote(id)?.status;
        debug!(client = %id, packet = ?msg.packet_type(), %status, "received");

        use GameMessage as M;
        use RemoteStatus as R;
        match (status, msg) {
            (_, M::ClientQuit) => Err(Disconnect::status(RecvStatus::ClientQuit)),
            (_, M::ClientError { code }) => Err(Disconnect::reported(code)),
            (R::Inactive, M::ClientJoin { revision }) => self.on_join(id, &revision),
            (
                R::Authenticating,
                M::ClientAuthResponse {
                    public_key,
                    proof,
                    identity_key,
                    signature,
                },
            ) => self.on_auth_response(id, &public_key, &proof, &identity_key, &signature),
            (R::Identifying, M::ClientIdentify { name, company }) => {
                self.on_identify(id, &name, company)
            }
            (R::CheckingContent, M::ClientContentChecked) => self.on_content_checked(id),
            (R::Authorized, M::ClientGetSnapshot) => self.on_get_snapshot(id),
            (R::SnapshotSent, M::ClientSnapshotOk) => self.on_snapshot_ok(id),
            (R::Active, M::ClientAck { frame, token }) => {
                self.on_ack(id, frame, token);
                Ok(())
            }
            (R::Active, M::ClientCommand(command)) => self.on_command(id, command),
            (R::Active, M::ClientChat { message }) => {
                let relay = M::ServerChat {
                    client_id: id,
                    message: message.clone(),
                };
                match self.broadcast(&relay, |r| r.status == R::Active) {
                    Ok(()) => self.events.push(HostEvent::Chat { from: id, message }),
                    Err(e) => warn!(client = %id, error = %e, "chat line not relayed"),
                }
                Ok(())
            }
            (status, msg) => {
                warn!(client = %id, %status, packet = ?msg.packet_type(), "message not expected");
                Err(Disconnect::violation())
            }
        }
    }

    fn on_join(&mut self, id: ClientId, revision: &str) -> Result<(), Disconnect> {
        if revision != self.config.revision {
            info!(client = %id, revision, expected = %self.config.revision, "revision mismatch");
            return Err(Disconnect::error(ErrorCode::WrongRevision));
        }
        let handshake = HostHandshake::new(self.auth.clone()).map_err(|e| {
            warn!(client = %id, error = %e, "handshake setup failed");
            Disconnect::error(e.error_code())
        })?;
        let request = handshake.request();
        let remote = self.remote(id)?;
        remote.send(&request)?;
        remote.handshake = Some(handshake);
        remote.status = RemoteStatus::Authenticating;
        Ok(())
    }

    fn on_auth_response(
        &mut self,
        id: ClientId,
        public_key: &[u8; PUBLIC_KEY_LEN],
        proof: &[u8],
        identity_key: &[u8],
        signature: &[u8],
    ) -> Result<(), Disconnect> {
        let remote = self.remote(id)?;
        let handshake = remote.handshake.take().ok_or(Disconnect::violation())?;
        let keys = handshake
            .verify(public_key, proof, identity_key, signature)
            .map_err(|e| {
                warn!(client = %id, error = %e, "authentication failed");
                Disconnect::error(e.error_code())
            })?;
        let nonce_base =
            SessionKeys::fresh_nonce_base().map_err(|e| Disconnect::error(e.error_code()))?;
        let (send, recv) = keys.host_ciphers(nonce_base)?;

        // The switch notice itself still goes out in the clear.
        remote.send(&GameMessage::ServerEnableEncryption { nonce_base })?;
        remote.framer.enable_send_encryption(send);
        remote.framer.enable_recv_encryption(recv);
        remote.status = RemoteStatus::Identifying;
        debug!(client = %id, "encryption enabled");
        Ok(())
    }

    fn on_identify(
        &mut self,
        id: ClientId,
        name: &str,
        company: CompanyId,
    ) -> Result<(), Disconnect> {
        if name.trim().is_empty() {
            return Err(Disconnect::error(ErrorCode::General));
        }
        self.registry
            .identify(id, name, company)
            .map_err(|e| Disconnect::error(e.error_code()))?;
        self.events.push(HostEvent::ClientJoined {
            client_id: id,
            name: name.to_string(),
        });

        let content = self.catalog.required();
        let remote = self.remote(id)?;
        remote.send(&GameMessage::ServerCheckContent { content })?;
        remote.status = RemoteStatus::CheckingContent;
        Ok(())
    }

    fn on_content_checked(&mut self, id: ClientId) -> Result<(), Disconnect> {
        let infos: Vec<GameMessage> = self
            .registry
            .iter()
            .filter(|c| c.is_identified())
            .map(|c| GameMessage::ServerClientInfo {
                client_id: c.id,
                company: c.company,
                name: c.name.clone(),
            })
            .collect();
        let own = infos
            .iter()
            .find(|m| {
                matches!(m, GameMessage::ServerClientInfo { client_id, .. } if *client_id == id)
            })
            .cloned();

        self.send_to(id, &GameMessage::ServerWelcome { client_id: id })?;
        for info in &infos {
            self.send_to(id, info)?;
        }
        if let Some(own) = own {
            self.broadcast(&own, |r| r.id != id && r.status.is_announced())?;
        }
        self.remote(id)?.status = RemoteStatus::Authorized;
        info!(client = %id, "client authorized");
        Ok(())
    }

    fn on_get_snapshot(&mut self, id: ClientId) -> Result<(), Disconnect> {
        match self.scheduler.request(id) {
            SnapshotSlot::Start => self.start_snapshot(id),
            SnapshotSlot::Wait { position } => {
                let remote = self.remote(id)?;
                remote.send(&GameMessage::ServerWaitForSnapshot { position })?;
                remote.status = RemoteStatus::WaitingForSnapshot;
                debug!(client = %id, position, "snapshot queued");
                Ok(())
            }
        }
    }

    /// Captures the world for `id` and queues the commands it will need
    /// on top of it.
    fn start_snapshot(&mut self, id: ClientId) -> Result<(), Disconnect> {
        let frame = self.clock.frame();
        let data = self.sim.save_snapshot();
        let size = data.len();
        let pending: Vec<CommandPacket> = self
            .queue
            .pending_after(frame)
            .cloned()
            .map(|mut c| {
                c.is_mine = false;
                c
            })
            .collect();
        let sender =
            SnapshotSender::new(frame, data, self.config.snapshot_chunk_size).map_err(|e| {
                warn!(client = %id, error = %e, "snapshot cannot be sent");
                Disconnect::error(e.error_code())
            })?;

        let remote = self.remote(id)?;
        remote.commands = pending;
        remote.snapshot = Some(sender);
        remote.status = RemoteStatus::SendingSnapshot;
        info!(client = %id, frame, bytes = size, "snapshot transfer started");
        Ok(())
    }

    fn send_wait_positions(&mut self) {
        let waiting: Vec<_> = self.scheduler.waiting().collect();
        for (id, position) in waiting {
            if let Err(d) = self.send_to(id, &GameMessage::ServerWaitForSnapshot { position }) {
                self.disconnect(id, d);
            }
        }
    }

    fn on_snapshot_ok(&mut self, id: ClientId) -> Result<(), Disconnect> {
        let frame = self.clock.frame();
        let remote = self.remote(id)?;
        remote.status = RemoteStatus::Active;
        remote.last_ack_frame = frame;
        remote.last_token_frame = frame;
        self.broadcast(&GameMessage::ServerClientJoined { client_id: id }, |r| {
            r.id != id && r.status == RemoteStatus::Active
        })?;
        self.events.push(HostEvent::ClientActive(id));
        info!(client = %id, frame, "client active");
        Ok(())
    }

    fn on_ack(&mut self, id: ClientId, frame: u32, token: u8) {
        let Some(remote) = self.remotes.get_mut(&id) else {
            return;
        };
        remote.last_ack_frame = remote.last_ack_frame.max(frame);
        if remote.token.is_some_and(|(t, _)| t == token) {
            trace!(client = %id, token, "liveness token echoed");
            remote.token = None;
        }
    }

    fn on_command(&mut self, id: ClientId, command: CommandPacket) -> Result<(), Disconnect> {
        let company = self
            .registry
            .get(id)
            .map_or(CompanyId::SPECTATOR, |c| c.company);
        let cmd = command.cmd;
        let result = self
            .sim
            .validate_command(id, &command)
            .map_err(SyncError::InvalidCommand)
            .and_then(|()| self.distributor.submit(id, company, command));

        if let Err(e) = result {
            warn!(client = %id, cmd, error = %e, "command rejected");
            let code = e.error_code();
            self.events.push(HostEvent::CommandRejected {
                origin: id,
                cmd,
                code,
            });
            self.send_to(id, &GameMessage::ServerCommandRejected { cmd, code })?;
        }
        Ok(())
    }

    // -- Local participant --

    /// Submits a command from the host's own participant.
    ///
    /// # Errors
    /// [`TandemError::Sync`] if the simulation or the distributor refuses
    /// it; nothing is scheduled in that case.
    pub fn submit(&mut self, command: CommandPacket) -> Result<(), TandemError> {
        self.sim
            .validate_command(ClientId::HOST, &command)
            .map_err(SyncError::InvalidCommand)?;
        let company = self
            .registry
            .get(ClientId::HOST)
            .map_or(HOST_COMPANY, |c| c.company);
        self.distributor.submit(ClientId::HOST, company, command)?;
        Ok(())
    }

    /// Sends a chat line from the host to every active participant.
    ///
    /// # Errors
    /// [`TandemError::Protocol`] if the line does not fit in one frame.
    pub fn chat(&mut self, message: impl Into<String>) -> Result<(), TandemError> {
        let msg = GameMessage::ServerChat {
            client_id: ClientId::HOST,
            message: message.into(),
        };
        self.broadcast(&msg, |r| r.status == RemoteStatus::Active)?;
        Ok(())
    }

    // -- Heartbeat --

    /// Runs one host frame and returns its number.
    ///
    /// 1. Assign execution frames to the commands submitted since the last
    ///    tick, counted from the frame they arrived during.
    /// 2. Execute the commands due this frame and step the simulation.
    /// 3. Send active participants their commands, the frame ceiling and,
    ///    every `sync_interval` frames, the checksum.
    /// 4. Push snapshot chunks.
    /// 5. Drop participants that timed out.
    pub fn tick(&mut self) -> Result<u32, TandemError> {
        let arrived = self.clock.frame();
        for mut command in self.distributor.assign(arrived) {
            for remote in self.remotes.values_mut() {
                if remote.status.is_snapshot_synced() && !self.pending_close.contains(&remote.id) {
                    remote.commands.push(command.clone());
                }
            }
            command.is_mine = command.origin == ClientId::HOST;
            self.queue.enqueue(command, arrived)?;
        }

        let frame = self.clock.advance()?;
        for command in self.queue.drain_due(frame) {
            self.sim.apply_command(&command);
            self.events.push(HostEvent::CommandExecuted(command));
        }
        self.sim.step();
        self.checksum = self.sim.checksum();
        trace!(frame, checksum = %self.checksum, "host frame");

        let ceiling = self.distributor.ceiling(frame);
        let sync = frame % self.config.sync_interval == 0;
        let ids: Vec<ClientId> = self.remotes.keys().copied().collect();
        for &id in &ids {
            if let Err(d) = self.send_frame_updates(id, frame, ceiling, sync) {
                self.disconnect(id, d);
            }
        }
        for &id in &ids {
            if let Err(d) = self.pump_snapshot(id) {
                self.disconnect(id, d);
            }
        }
        self.check_timeouts(frame);
        Ok(frame)
    }

    fn send_frame_updates(
        &mut self,
        id: ClientId,
        frame: u32,
        ceiling: u32,
        sync: bool,
    ) -> Result<(), Disconnect> {
        if self.pending_close.contains(&id) {
            return Ok(());
        }
        let token_interval = self.config.token_interval;
        let checksum = self.checksum;
        let remote = self.remote(id)?;
        if remote.status != RemoteStatus::Active {
            return Ok(());
        }

        for command in std::mem::take(&mut remote.commands) {
            remote.send(&GameMessage::ServerCommand(command))?;
        }

        let token = if remote.token.is_none()
            && frame.saturating_sub(remote.last_token_frame) >= token_interval
        {
            // 0 is "no token" on the wire.
            let token = rand::random_range(1..=u8::MAX);
            remote.token = Some((token, frame));
            remote.last_token_frame = frame;
            Some(token)
        } else {
            None
        };
        remote.send(&GameMessage::ServerFrame {
            frame,
            frame_max: ceiling,
            token,
        })?;
        if sync {
            remote.send(&GameMessage::ServerSync { frame, checksum })?;
        }
        Ok(())
    }

    fn pump_snapshot(&mut self, id: ClientId) -> Result<(), Disconnect> {
        if self.pending_close.contains(&id) {
            return Ok(());
        }
        let chunks = self.config.snapshot_chunks_per_tick;
        let remote = self.remote(id)?;
        let Some(sender) = remote.snapshot.as_mut() else {
            return Ok(());
        };
        let messages = sender.pump(chunks);
        let finished = sender.is_finished();
        for msg in &messages {
            remote.send(msg)?;
        }
        if !finished {
            return Ok(());
        }

        remote.snapshot = None;
        remote.status = RemoteStatus::SnapshotSent;
        debug!(client = %id, "snapshot sent");
        if let Some(next) = self.scheduler.release(id) {
            if let Err(d) = self.start_snapshot(next) {
                self.disconnect(next, d);
            }
        }
        self.send_wait_positions();
        Ok(())
    }

    fn check_timeouts(&mut self, frame: u32) {
        let max_lag = self.config.max_lag_frames;
        let expired: Vec<(ClientId, ErrorCode)> = self
            .remotes
            .values()
            .filter(|r| !self.pending_close.contains(&r.id))
            .filter_map(|r| match r.status {
                RemoteStatus::Active => match r.token {
                    Some((_, sent)) if frame.saturating_sub(sent) > max_lag => {
                        Some((r.id, ErrorCode::TimeoutComputer))
                    }
                    _ => None,
                },
                RemoteStatus::WaitingForSnapshot
                | RemoteStatus::SendingSnapshot
                | RemoteStatus::SnapshotSent
                    if frame > r.join_deadline =>
                {
                    Some((r.id, ErrorCode::TimeoutSnapshot))
                }
                _ if frame > r.join_deadline => Some((r.id, ErrorCode::TimeoutJoin)),
                _ => None,
            })
            .collect();

        for (id, code) in expired {
            warn!(client = %id, frame, %code, "client timed out");
            self.disconnect(
                id,
                Disconnect {
                    status: RecvStatus::Timeout,
                    code,
                    tell_peer: true,
                },
            );
        }
    }
}
