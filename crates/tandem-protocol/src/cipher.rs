//! Per-direction authenticated encryption of frame bodies.
//!
//! Nonce layout: `nonce_base XOR (counter as u64 LE in bytes 0..8)`.
//! The counter advances once per frame. Each direction has its own key,
//! so the two counters never collide on the same key.

use ring::aead::{self, Aad, LessSafeKey, Nonce, UnboundKey};

use crate::ProtocolError;

/// Length of the nonce base sent in `ServerEnableEncryption`.
pub const NONCE_BASE_LEN: usize = 12;

/// Length of the authentication tag appended to every encrypted body.
pub const TAG_LEN: usize = 16;

/// Encrypts or decrypts frame bodies for one direction of a connection.
pub struct FrameCipher {
    key: LessSafeKey,
    nonce_base: [u8; NONCE_BASE_LEN],
    counter: u64,
}

impl FrameCipher {
    pub fn new(key: &[u8; 32], nonce_base: [u8; NONCE_BASE_LEN]) -> Result<Self, ProtocolError> {
        let unbound = UnboundKey::new(&aead::CHACHA20_POLY1305, key)
            .map_err(|_| ProtocolError::EncryptFailed)?;
        Ok(Self {
            key: LessSafeKey::new(unbound),
            nonce_base,
            counter: 0,
        })
    }

    fn next_nonce(&mut self) -> Result<Nonce, ProtocolError> {
        let counter = self.counter;
        self.counter = self
            .counter
            .checked_add(1)
            .ok_or(ProtocolError::NonceExhausted)?;

        let mut bytes = self.nonce_base;
        for (b, c) in bytes.iter_mut().zip(counter.to_le_bytes()) {
            *b ^= c;
        }
        Ok(Nonce::assume_unique_for_key(bytes))
    }

    /// Encrypts `body` in place and appends the tag. `header` is bound as
    /// associated data.
    pub fn seal(&mut self, header: [u8; 4], body: &mut Vec<u8>) -> Result<(), ProtocolError> {
        let nonce = self.next_nonce()?;
        self.key
            .seal_in_place_append_tag(nonce, Aad::from(header), body)
            .map_err(|_| ProtocolError::EncryptFailed)
    }

    /// Decrypts `body` in place and strips the tag.
    pub fn open(&mut self, header: [u8; 4], body: &mut Vec<u8>) -> Result<(), ProtocolError> {
        let nonce = self.next_nonce()?;
        let plain_len = self
            .key
            .open_in_place(nonce, Aad::from(header), body.as_mut_slice())
            .map_err(|_| ProtocolError::DecryptFailed)?
            .len();
        body.truncate(plain_len);
        Ok(())
    }
}

impl std::fmt::Debug for FrameCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameCipher")
            .field("counter", &self.counter)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pair() -> (FrameCipher, FrameCipher) {
        let key = [7u8; 32];
        let base = [9u8; NONCE_BASE_LEN];
        (
            FrameCipher::new(&key, base).unwrap(),
            FrameCipher::new(&key, base).unwrap(),
        )
    }

    #[test]
    fn test_seal_then_open_restores_body() {
        let (mut tx, mut rx) = pair();
        let header = [10, 0, 0, 0];
        let mut body = b"hello".to_vec();
        tx.seal(header, &mut body).unwrap();
        assert_eq!(body.len(), 5 + TAG_LEN);
        assert_ne!(&body[..5], b"hello");
        rx.open(header, &mut body).unwrap();
        assert_eq!(body, b"hello");
    }

    #[test]
    fn test_open_with_tampered_header_fails() {
        let (mut tx, mut rx) = pair();
        let mut body = b"payload".to_vec();
        tx.seal([1, 2, 3, 4], &mut body).unwrap();
        assert!(matches!(
            rx.open([1, 2, 3, 5], &mut body),
            Err(ProtocolError::DecryptFailed)
        ));
    }

    #[test]
    fn test_open_out_of_order_fails() {
        let (mut tx, mut rx) = pair();
        let header = [0; 4];
        let mut first = b"one".to_vec();
        let mut second = b"two".to_vec();
        tx.seal(header, &mut first).unwrap();
        tx.seal(header, &mut second).unwrap();
        assert!(rx.open(header, &mut second).is_err());
    }

    #[test]
    fn test_different_keys_do_not_interoperate() {
        let base = [0u8; NONCE_BASE_LEN];
        let mut tx = FrameCipher::new(&[1u8; 32], base).unwrap();
        let mut rx = FrameCipher::new(&[2u8; 32], base).unwrap();
        let mut body = b"secret".to_vec();
        tx.seal([0; 4], &mut body).unwrap();
        assert!(rx.open([0; 4], &mut body).is_err());
    }
}
