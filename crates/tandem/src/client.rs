//! `ParticipantClient`: a participant's protocol loop over TCP.

use tandem_clock::FrameTicker;
use tandem_protocol::RecvStatus;
use tandem_sync::Simulation;
use tandem_transport::{
    ConnectionHandle, Rendezvous, TransportEvent, connect_with_fallback, spawn_connection,
};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::{Participant, ParticipantEvent, TandemError};

/// Frames a participant may execute per heartbeat when behind the ceiling.
const CATCH_UP_FRAMES: usize = 8;

/// A participant connected to a host.
pub struct ParticipantClient<S: Simulation> {
    participant: Participant<S>,
    handle: ConnectionHandle,
    events: mpsc::UnboundedReceiver<TransportEvent>,
    ticker: FrameTicker,
}

impl<S: Simulation> ParticipantClient<S> {
    /// Connects to `target` (directly, then through `rendezvous`) and
    /// sends the join request.
    pub async fn connect<R: Rendezvous>(
        target: &str,
        rendezvous: &R,
        mut participant: Participant<S>,
    ) -> Result<Self, TandemError> {
        let conn = connect_with_fallback(target, rendezvous).await?;
        let (tx, events) = mpsc::unbounded_channel();
        let handle = spawn_connection(conn, tx);
        participant.connect()?;
        handle.send(participant.drain_outgoing())?;
        info!(target, "connected to host");

        let ticker = FrameTicker::new(participant.config().ticker());
        Ok(Self {
            participant,
            handle,
            events,
            ticker,
        })
    }

    pub fn participant(&self) -> &Participant<S> {
        &self.participant
    }

    /// Runs until the session ends or `shutdown` completes.
    ///
    /// `on_frame` is called once per heartbeat with the events raised since
    /// the previous one, after executing whatever frames the host granted.
    /// Returns the participant and the status the session ended with.
    pub async fn run<F>(
        mut self,
        shutdown: impl Future<Output = ()>,
        mut on_frame: F,
    ) -> Result<(Participant<S>, RecvStatus), TandemError>
    where
        F: FnMut(&mut Participant<S>, Vec<ParticipantEvent>),
    {
        tokio::pin!(shutdown);

        let status = loop {
            let mut ended = None;
            tokio::select! {
                () = &mut shutdown => {
                    self.participant.quit();
                    ended = Some(RecvStatus::ClientQuit);
                }
                event = self.events.recv() => match event {
                    Some(TransportEvent::Data { bytes, .. }) => {
                        let status = self.participant.receive(&bytes);
                        if status.is_terminal() {
                            ended = Some(status);
                        }
                    }
                    Some(TransportEvent::Closed { reason, .. }) => {
                        debug!(?reason, "host closed the connection");
                        self.participant.connection_lost();
                        ended = Some(RecvStatus::ConnectionLost);
                    }
                    None => {
                        self.participant.connection_lost();
                        ended = Some(RecvStatus::ConnectionLost);
                    }
                },
                _ = self.ticker.wait_for_frame() => {
                    self.participant.catch_up(CATCH_UP_FRAMES);
                    let events = self.participant.drain_events();
                    on_frame(&mut self.participant, events);
                    self.ticker.record_frame_end();
                    if !self.participant.state().is_connected() {
                        ended = self.participant.exit_status();
                    }
                }
            }

            let bytes = self.participant.drain_outgoing();
            if !bytes.is_empty() {
                if let Err(e) = self.handle.send(bytes) {
                    warn!(error = %e, "send failed");
                    self.participant.connection_lost();
                    ended = ended.or(Some(RecvStatus::ConnectionLost));
                }
            }
            if let Some(status) = ended {
                break status;
            }
        };

        self.handle.close();
        info!(%status, frame = self.participant.frame(), "session ended");
        Ok((self.participant, status))
    }
}
