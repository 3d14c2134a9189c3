//! Length-prefixed framing over an ordered byte stream.
//!
//! Wire layout of one frame:
//!
//! ```text
//! [u32 LE total length][body]
//! ```
//!
//! The total length counts the 4 header bytes. Before encryption the body
//! is `[tag][fields]`; after, it is the sealed `[tag][fields]` plus a
//! 16-byte authentication tag. The header always stays in the clear and
//! is bound to the body as associated data.
//!
//! Decryption happens one frame at a time, when the frame is taken out of
//! the buffer. A frame that switches encryption on is therefore handled
//! before the frame behind it (already buffered) is opened with the new
//! key.

use bytes::{Buf, BytesMut};

use crate::cipher::{FrameCipher, TAG_LEN};
use crate::{Packet, ProtocolError};

/// Size of the length header.
pub const HEADER_LEN: usize = 4;

/// Default upper bound on a single frame, header included.
pub const DEFAULT_MAX_FRAME_SIZE: usize = 32_767;

/// Per-connection frame encoder/decoder.
#[derive(Debug)]
pub struct Framer {
    inbound: BytesMut,
    max_frame_size: usize,
    send_cipher: Option<FrameCipher>,
    recv_cipher: Option<FrameCipher>,
}

impl Framer {
    pub fn new(max_frame_size: usize) -> Self {
        Self {
            inbound: BytesMut::with_capacity(4096),
            max_frame_size,
            send_cipher: None,
            recv_cipher: None,
        }
    }

    pub fn max_frame_size(&self) -> usize {
        self.max_frame_size
    }

    /// Encrypt every frame sent from now on.
    pub fn enable_send_encryption(&mut self, cipher: FrameCipher) {
        self.send_cipher = Some(cipher);
    }

    /// Decrypt every frame taken from the buffer from now on.
    pub fn enable_recv_encryption(&mut self, cipher: FrameCipher) {
        self.recv_cipher = Some(cipher);
    }

    pub fn is_send_encrypted(&self) -> bool {
        self.send_cipher.is_some()
    }

    pub fn is_recv_encrypted(&self) -> bool {
        self.recv_cipher.is_some()
    }

    /// Bytes received but not yet taken out as frames.
    pub fn buffered(&self) -> usize {
        self.inbound.len()
    }

    fn min_frame_len(encrypted: bool) -> usize {
        // Header plus tag byte, plus the authentication tag when sealed.
        HEADER_LEN + 1 + if encrypted { TAG_LEN } else { 0 }
    }

    /// Produces the wire bytes for one packet.
    ///
    /// # Errors
    /// [`ProtocolError::FrameTooLarge`] if the frame would exceed the
    /// configured maximum; nothing is sent in that case.
    pub fn encode(&mut self, packet: &Packet) -> Result<Vec<u8>, ProtocolError> {
        let overhead = if self.send_cipher.is_some() { TAG_LEN } else { 0 };
        let total = HEADER_LEN + packet.len() + overhead;
        if total > self.max_frame_size {
            return Err(ProtocolError::FrameTooLarge {
                len: total,
                max: self.max_frame_size,
            });
        }

        // `total` fits in u32: it is bounded by `max_frame_size`.
        let header = (total as u32).to_le_bytes();
        let mut body = packet.as_bytes().to_vec();
        if let Some(cipher) = self.send_cipher.as_mut() {
            cipher.seal(header, &mut body)?;
        }

        let mut out = Vec::with_capacity(total);
        out.extend_from_slice(&header);
        out.extend_from_slice(&body);
        Ok(out)
    }

    /// Appends received bytes to the inbound buffer.
    pub fn extend(&mut self, data: &[u8]) {
        self.inbound.extend_from_slice(data);
    }

    /// Takes the next complete frame out of the buffer and returns its
    /// plaintext body (`[tag][fields]`).
    ///
    /// Returns `Ok(None)` while a frame is still incomplete. Any error is
    /// fatal to the connection; the buffer is left in an unspecified state.
    pub fn next_frame(&mut self) -> Result<Option<Vec<u8>>, ProtocolError> {
        if self.inbound.len() < HEADER_LEN {
            return Ok(None);
        }

        let mut header = [0u8; HEADER_LEN];
        header.copy_from_slice(&self.inbound[..HEADER_LEN]);
        let len = u32::from_le_bytes(header) as usize;

        if len > self.max_frame_size {
            return Err(ProtocolError::FrameTooLarge {
                len,
                max: self.max_frame_size,
            });
        }
        if len < Self::min_frame_len(self.recv_cipher.is_some()) {
            return Err(ProtocolError::FrameTooShort(len));
        }
        if self.inbound.len() < len {
            return Ok(None);
        }

        let mut frame = self.inbound.split_to(len);
        frame.advance(HEADER_LEN);
        let mut body = frame.to_vec();
        if let Some(cipher) = self.recv_cipher.as_mut() {
            cipher.open(header, &mut body)?;
        }
        Ok(Some(body))
    }
}

impl Default for Framer {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME_SIZE)
    }
}
