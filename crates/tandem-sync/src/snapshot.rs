//! Chunked world snapshot transfer.
//!
//! ```text
//! host                                    participant
//!  │── ServerSnapshotBegin(frame) ───────────▶│  buffer reset
//!  │── ServerSnapshotSize(total) ────────────▶│  checked against the limit
//!  │── ServerSnapshotData(chunk) × n ────────▶│  overflow is fatal
//!  │── ServerSnapshotDone ───────────────────▶│  short transfer is fatal
//!  │◀──────────────────── ClientSnapshotOk ────│
//! ```
//!
//! Only one transfer runs at a time; [`SnapshotScheduler`] queues the
//! other joiners and tells them their position.

use std::collections::VecDeque;

use bytes::Bytes;
use tandem_protocol::{ClientId, GameMessage};

use crate::SyncError;

/// Largest snapshot a [`SnapshotReceiver`] accepts unless told otherwise.
pub const DEFAULT_MAX_SNAPSHOT_SIZE: usize = 64 * 1024 * 1024;

// ---------------------------------------------------------------------------
// SnapshotSender
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SendPhase {
    Header,
    Data,
    Done,
}

/// Host side of one transfer: turns a saved snapshot into messages.
#[derive(Debug)]
pub struct SnapshotSender {
    frame: u32,
    data: Bytes,
    total: u32,
    offset: usize,
    chunk_size: usize,
    phase: SendPhase,
}

impl SnapshotSender {
    /// `frame` is the frame the snapshot was captured at. `chunk_size` is
    /// raised to at least 1.
    ///
    /// # Errors
    /// [`SyncError::SnapshotTooLarge`] if the size does not fit the `u32`
    /// announced on the wire.
    pub fn new(frame: u32, data: impl Into<Bytes>, chunk_size: usize) -> Result<Self, SyncError> {
        let data = data.into();
        let total = wire_size(data.len())?;
        Ok(Self {
            frame,
            data,
            total,
            offset: 0,
            chunk_size: chunk_size.max(1),
            phase: SendPhase::Header,
        })
    }

    pub fn frame(&self) -> u32 {
        self.frame
    }

    pub fn total(&self) -> usize {
        self.data.len()
    }

    /// Bytes queued so far.
    pub fn sent(&self) -> usize {
        self.offset
    }

    /// Produces the next messages of the transfer, at most `max_chunks`
    /// data chunks per call. The header messages go out with the first
    /// call and `ServerSnapshotDone` with the last.
    pub fn pump(&mut self, max_chunks: usize) -> Vec<GameMessage> {
        let mut out = Vec::new();
        if self.phase == SendPhase::Header {
            out.push(GameMessage::ServerSnapshotBegin { frame: self.frame });
            out.push(GameMessage::ServerSnapshotSize { total: self.total });
            self.phase = SendPhase::Data;
        }
        if self.phase == SendPhase::Data {
            for _ in 0..max_chunks {
                if self.offset >= self.data.len() {
                    break;
                }
                let end = (self.offset + self.chunk_size).min(self.data.len());
                out.push(GameMessage::ServerSnapshotData {
                    chunk: self.data.slice(self.offset..end).to_vec(),
                });
                self.offset = end;
            }
            if self.offset >= self.data.len() {
                out.push(GameMessage::ServerSnapshotDone);
                self.phase = SendPhase::Done;
            }
        }
        out
    }

    pub fn is_finished(&self) -> bool {
        self.phase == SendPhase::Done
    }
}

/// The size as announced in `ServerSnapshotSize`.
fn wire_size(len: usize) -> Result<u32, SyncError> {
    u32::try_from(len).map_err(|_| SyncError::SnapshotTooLarge {
        size: len,
        max: u32::MAX as usize,
    })
}

// ---------------------------------------------------------------------------
// SnapshotReceiver
// ---------------------------------------------------------------------------

/// Participant side of one transfer.
#[derive(Debug)]
pub struct SnapshotReceiver {
    frame: Option<u32>,
    announced: Option<usize>,
    buffer: Vec<u8>,
    max_size: usize,
}

impl Default for SnapshotReceiver {
    fn default() -> Self {
        Self::with_limit(DEFAULT_MAX_SNAPSHOT_SIZE)
    }
}

impl SnapshotReceiver {
    pub fn new() -> Self {
        Self::default()
    }

    /// A receiver refusing any transfer announced larger than `max_size`.
    pub fn with_limit(max_size: usize) -> Self {
        Self {
            frame: None,
            announced: None,
            buffer: Vec::new(),
            max_size,
        }
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    /// Starts a transfer captured at `frame`, discarding any partial one.
    pub fn begin(&mut self, frame: u32) {
        self.frame = Some(frame);
        self.announced = None;
        self.buffer.clear();
    }

    /// Fixes the total size of the transfer.
    ///
    /// # Errors
    /// - [`SyncError::SnapshotSequence`]: before `begin` or if the size
    ///   was already announced.
    /// - [`SyncError::SnapshotTooLarge`]: `total` is over the limit;
    ///   nothing is allocated.
    pub fn set_size(&mut self, total: usize) -> Result<(), SyncError> {
        if self.frame.is_none() {
            return Err(SyncError::SnapshotSequence("size before begin"));
        }
        if self.announced.is_some() {
            return Err(SyncError::SnapshotSequence("size announced twice"));
        }
        if total > self.max_size {
            return Err(SyncError::SnapshotTooLarge {
                size: total,
                max: self.max_size,
            });
        }
        self.announced = Some(total);
        self.buffer.reserve_exact(total);
        Ok(())
    }

    /// Appends one chunk.
    ///
    /// # Errors
    /// - [`SyncError::SnapshotSequence`]: no size announced yet.
    /// - [`SyncError::SnapshotOverflow`]: more bytes than announced.
    pub fn push_chunk(&mut self, chunk: &[u8]) -> Result<(), SyncError> {
        let announced = self
            .announced
            .ok_or(SyncError::SnapshotSequence("data before size"))?;
        let received = self.buffer.len() + chunk.len();
        if received > announced {
            return Err(SyncError::SnapshotOverflow {
                received,
                announced,
            });
        }
        self.buffer.extend_from_slice(chunk);
        Ok(())
    }

    /// Ends the transfer and returns `(frame, data)`.
    ///
    /// # Errors
    /// - [`SyncError::SnapshotSequence`]: no size announced.
    /// - [`SyncError::SnapshotShort`]: fewer bytes than announced.
    pub fn finish(&mut self) -> Result<(u32, Vec<u8>), SyncError> {
        let (Some(frame), Some(announced)) = (self.frame, self.announced) else {
            return Err(SyncError::SnapshotSequence("done before size"));
        };
        if self.buffer.len() != announced {
            return Err(SyncError::SnapshotShort {
                received: self.buffer.len(),
                announced,
            });
        }
        self.frame = None;
        self.announced = None;
        Ok((frame, std::mem::take(&mut self.buffer)))
    }

    pub fn received(&self) -> usize {
        self.buffer.len()
    }

    pub fn announced(&self) -> Option<usize> {
        self.announced
    }
}

// ---------------------------------------------------------------------------
// SnapshotScheduler
// ---------------------------------------------------------------------------

/// Outcome of a snapshot request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotSlot {
    /// The transfer may start now.
    Start,
    /// Another transfer is running; `position` is 1-based.
    Wait { position: u16 },
}

/// Serializes snapshot transfers: one runs, the rest wait in arrival order.
#[derive(Debug, Default)]
pub struct SnapshotScheduler {
    current: Option<ClientId>,
    waiting: VecDeque<ClientId>,
}

impl SnapshotScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request(&mut self, client: ClientId) -> SnapshotSlot {
        if self.current == Some(client) {
            return SnapshotSlot::Start;
        }
        if self.current.is_none() {
            self.current = Some(client);
            return SnapshotSlot::Start;
        }
        if !self.waiting.contains(&client) {
            self.waiting.push_back(client);
        }
        SnapshotSlot::Wait {
            position: self.position(client).unwrap_or(u16::MAX),
        }
    }

    /// Releases `client`'s slot or queue entry. If the running transfer
    /// was `client`'s, the next waiter is promoted and returned.
    pub fn release(&mut self, client: ClientId) -> Option<ClientId> {
        self.waiting.retain(|c| *c != client);
        if self.current != Some(client) {
            return None;
        }
        self.current = self.waiting.pop_front();
        if let Some(next) = self.current {
            tracing::debug!(client = %next, "snapshot slot promoted");
        }
        self.current
    }

    pub fn current(&self) -> Option<ClientId> {
        self.current
    }

    /// 1-based queue position of a waiting client.
    pub fn position(&self, client: ClientId) -> Option<u16> {
        self.waiting
            .iter()
            .position(|c| *c == client)
            .map(|i| u16::try_from(i + 1).unwrap_or(u16::MAX))
    }

    /// Waiting clients with their current positions.
    pub fn waiting(&self) -> impl Iterator<Item = (ClientId, u16)> + '_ {
        self.waiting
            .iter()
            .enumerate()
            .map(|(i, c)| (*c, u16::try_from(i + 1).unwrap_or(u16::MAX)))
    }
}
