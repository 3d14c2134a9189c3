//! Shared fixtures: a toy deterministic simulation and an in-memory
//! network that shuttles bytes between one host and its participants.

#![allow(dead_code)]

use tandem::{
    AuthPolicy, Checksum, ClientId, CommandPacket, CompanyId, ContentEntry, Credentials, Host,
    HostEvent, NetworkConfig, Participant, ParticipantEvent, Simulation,
};

/// Command id the simulation refuses on the host.
pub const FORBIDDEN_CMD: u16 = 999;

#[derive(Debug, Default)]
pub struct Counter {
    pub value: u32,
    pub frames: u32,
    /// `(executing frame, cmd)` of every applied command, in order.
    pub applied: Vec<(u32, u16)>,
    /// Zero bytes appended to snapshots to make them span several chunks.
    pub ballast: usize,
    /// Corrupts the state when stepping this frame.
    pub drift_at: Option<u32>,
    pub emergency_saves: u32,
}

impl Counter {
    pub fn with_ballast(ballast: usize) -> Self {
        Self {
            ballast,
            ..Default::default()
        }
    }

    pub fn drifting_at(frame: u32) -> Self {
        Self {
            drift_at: Some(frame),
            ..Default::default()
        }
    }
}

impl Simulation for Counter {
    fn apply_command(&mut self, command: &CommandPacket) {
        let params: u32 = command.params.iter().map(|&b| u32::from(b)).sum();
        self.value = self
            .value
            .wrapping_mul(31)
            .wrapping_add(u32::from(command.cmd))
            .wrapping_add(params);
        self.applied.push((self.frames + 1, command.cmd));
    }

    fn step(&mut self) {
        self.frames += 1;
        if self.drift_at == Some(self.frames) {
            self.value ^= 0xdead_beef;
        }
    }

    fn checksum(&self) -> Checksum {
        Checksum(self.value, self.frames)
    }

    fn save_snapshot(&self) -> Vec<u8> {
        let mut data = Vec::with_capacity(8 + self.ballast);
        data.extend_from_slice(&self.value.to_le_bytes());
        data.extend_from_slice(&self.frames.to_le_bytes());
        data.resize(8 + self.ballast, 0);
        data
    }

    fn load_snapshot(&mut self, data: &[u8]) -> Result<(), String> {
        let (head, _) = data
            .split_at_checked(8)
            .ok_or_else(|| format!("snapshot too short: {} bytes", data.len()))?;
        let (value, frames) = head.split_at(4);
        self.value = u32::from_le_bytes(value.try_into().map_err(|_| "value")?);
        self.frames = u32::from_le_bytes(frames.try_into().map_err(|_| "frames")?);
        Ok(())
    }

    fn validate_command(&self, _origin: ClientId, command: &CommandPacket) -> Result<(), String> {
        if command.cmd == FORBIDDEN_CMD {
            return Err("forbidden command".into());
        }
        Ok(())
    }

    fn emergency_save(&mut self) {
        self.emergency_saves += 1;
    }
}

pub fn content() -> Vec<ContentEntry> {
    vec![ContentEntry {
        id: 7,
        checksum: [3; 16],
    }]
}

pub fn config() -> NetworkConfig {
    NetworkConfig {
        revision: "test-1".into(),
        player_name: "host".into(),
        ..Default::default()
    }
}

pub fn host(config: NetworkConfig, auth: AuthPolicy) -> Host<Counter> {
    Host::new(config, auth, Counter::default(), content())
}

pub fn participant(name: &str, company: u8) -> Participant<Counter> {
    participant_with(name, company, Credentials::default(), Counter::default())
}

pub fn participant_with(
    name: &str,
    company: u8,
    credentials: Credentials,
    sim: Counter,
) -> Participant<Counter> {
    let config = NetworkConfig {
        player_name: name.into(),
        ..config()
    };
    Participant::new(config, credentials, CompanyId(company), sim, content())
}

/// A participant plugged into the in-memory network.
pub struct Peer {
    pub id: ClientId,
    pub participant: Participant<Counter>,
    /// Stops executing frames while set.
    pub stalled: bool,
    pub events: Vec<ParticipantEvent>,
}

/// One host and its participants, connected by memory.
pub struct Network {
    pub host: Host<Counter>,
    pub peers: Vec<Peer>,
    pub host_events: Vec<HostEvent>,
}

impl Network {
    pub fn new(host: Host<Counter>) -> Self {
        Self {
            host,
            peers: Vec::new(),
            host_events: Vec::new(),
        }
    }

    /// Connects a participant and runs the exchange as far as it goes
    /// without host frames. Returns its index in `peers`.
    pub fn join(&mut self, mut participant: Participant<Counter>) -> usize {
        let id = self.host.accept(None).expect("host should accept");
        participant.connect().expect("should start joining");
        self.peers.push(Peer {
            id,
            participant,
            stalled: false,
            events: Vec::new(),
        });
        self.pump();
        self.peers.len() - 1
    }

    /// Moves bytes both ways until nothing is left in flight.
    pub fn pump(&mut self) {
        loop {
            let mut moved = false;
            for peer in &mut self.peers {
                let bytes = peer.participant.drain_outgoing();
                if !bytes.is_empty() {
                    moved = true;
                    self.host.receive(peer.id, &bytes);
                }
            }
            for (id, bytes) in self.host.drain_outgoing() {
                moved = true;
                self.deliver(id, &bytes);
            }
            for (id, bytes) in self.host.reap() {
                moved = true;
                self.deliver(id, &bytes);
                if let Some(peer) = self.peer_mut(id) {
                    peer.participant.connection_lost();
                }
            }
            if !moved {
                break;
            }
        }
        self.collect_events();
    }

    fn deliver(&mut self, id: ClientId, bytes: &[u8]) {
        if let Some(peer) = self.peer_mut(id) {
            peer.participant.receive(bytes);
        }
    }

    fn collect_events(&mut self) {
        self.host_events.extend(self.host.drain_events());
        for peer in &mut self.peers {
            peer.events.extend(peer.participant.drain_events());
        }
    }

    pub fn peer_mut(&mut self, id: ClientId) -> Option<&mut Peer> {
        self.peers.iter_mut().find(|p| p.id == id)
    }

    /// One host frame, then every live participant runs what it was granted.
    pub fn tick(&mut self) -> u32 {
        let frame = self.host.tick().expect("host tick");
        self.pump();
        for peer in &mut self.peers {
            if !peer.stalled {
                peer.participant.catch_up(usize::MAX);
            }
        }
        self.pump();
        frame
    }

    pub fn tick_until(&mut self, frame: u32) {
        while self.host.frame() < frame {
            self.tick();
        }
    }

    /// Ticks while `pred` holds, at most `limit` frames.
    pub fn tick_while(&mut self, limit: u32, mut pred: impl FnMut(&Self) -> bool) {
        for _ in 0..limit {
            if !pred(self) {
                return;
            }
            self.tick();
        }
    }
}
