//! The join handshake: key agreement, authentication, session keys.
//!
//! ```text
//! host                                    participant
//!  │── ServerAuthRequest(method, pk_s, nonce) ──▶│
//!  │◀── ClientAuthResponse(pk_c, proof, [id, sig]) ─│
//!  │── ServerEnableEncryption(nonce_base) ──────▶│
//!  │      (every later frame is encrypted)        │
//! ```
//!
//! Both sides run X25519 on fresh ephemeral keys and feed the shared
//! secret through HKDF-SHA256:
//!
//! - salt: the host's nonce
//! - info: label ‖ pk_c ‖ pk_s ‖ password (empty unless the method is
//!   `Password`)
//!
//! The 96 output bytes split into the participant→host key, the
//! host→participant key, and a key-confirmation key. The participant
//! proves it derived the same keys with an HMAC over the transcript, so a
//! wrong password fails before any encrypted frame is sent. With
//! `AuthorizedKey`, the participant also signs the transcript with a
//! long-term Ed25519 key the host must have on its allow list.

use hkdf::Hkdf;
use ring::agreement::{self, EphemeralPrivateKey, UnparsedPublicKey, X25519};
use ring::hmac;
use ring::rand::{SecureRandom, SystemRandom};
use ring::signature::{self, Ed25519KeyPair, KeyPair};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use tandem_protocol::{
    AUTH_NONCE_LEN, AuthMethod, FrameCipher, GameMessage, NONCE_BASE_LEN, PUBLIC_KEY_LEN,
    ProtocolError,
};

use crate::SessionError;

const KEY_INFO_LABEL: &[u8] = b"tandem-session-keys-v1";
const PROOF_LABEL: &[u8] = b"tandem-key-confirmation-v1";

fn random_bytes<const N: usize>() -> Result<[u8; N], SessionError> {
    let mut out = [0u8; N];
    SystemRandom::new()
        .fill(&mut out)
        .map_err(|_| SessionError::KeyExchange)?;
    Ok(out)
}

fn transcript(client_pub: &[u8], server_pub: &[u8], nonce: &[u8]) -> Vec<u8> {
    let mut t = Vec::with_capacity(
        PROOF_LABEL.len() + client_pub.len() + server_pub.len() + nonce.len(),
    );
    t.extend_from_slice(PROOF_LABEL);
    t.extend_from_slice(client_pub);
    t.extend_from_slice(server_pub);
    t.extend_from_slice(nonce);
    t
}

// ---------------------------------------------------------------------------
// AuthPolicy / Credentials
// ---------------------------------------------------------------------------

/// How the host authenticates joining participants.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum AuthPolicy {
    /// Anyone may join; the handshake only sets up encryption.
    #[default]
    KeyExchangeOnly,
    /// Participants must know the game password.
    Password { password: String },
    /// Participants must sign with one of these Ed25519 public keys.
    AuthorizedKeys { keys: Vec<[u8; 32]> },
}

impl AuthPolicy {
    pub fn method(&self) -> AuthMethod {
        match self {
            Self::KeyExchangeOnly => AuthMethod::KeyExchangeOnly,
            Self::Password { .. } => AuthMethod::Password,
            Self::AuthorizedKeys { .. } => AuthMethod::AuthorizedKey,
        }
    }

    fn password(&self) -> &str {
        match self {
            Self::Password { password } => password,
            _ => "",
        }
    }
}

/// What a participant can prove about itself.
#[derive(Debug, Clone, Default)]
pub struct Credentials {
    pub password: Option<String>,
    /// Seed of the participant's long-term Ed25519 identity key.
    pub identity_seed: Option<[u8; 32]>,
}

impl Credentials {
    pub fn password(password: impl Into<String>) -> Self {
        Self {
            password: Some(password.into()),
            identity_seed: None,
        }
    }

    pub fn identity(seed: [u8; 32]) -> Self {
        Self {
            password: None,
            identity_seed: Some(seed),
        }
    }

    /// Public half of the identity key, for the host's allow list.
    pub fn identity_public_key(&self) -> Result<Option<[u8; 32]>, SessionError> {
        let Some(seed) = self.identity_seed else {
            return Ok(None);
        };
        let pair =
            Ed25519KeyPair::from_seed_unchecked(&seed).map_err(|_| SessionError::KeyExchange)?;
        let mut public = [0u8; 32];
        public.copy_from_slice(pair.public_key().as_ref());
        Ok(Some(public))
    }
}

// ---------------------------------------------------------------------------
// SessionKeys
// ---------------------------------------------------------------------------

/// Keys derived from one handshake.
pub struct SessionKeys {
    client_to_server: [u8; 32],
    server_to_client: [u8; 32],
    confirmation: [u8; 32],
}

impl SessionKeys {
    fn derive(
        shared_secret: &[u8],
        nonce: &[u8],
        client_pub: &[u8],
        server_pub: &[u8],
        password: &str,
    ) -> Result<Self, SessionError> {
        let hk = Hkdf::<Sha256>::new(Some(nonce), shared_secret);
        let mut info = Vec::with_capacity(KEY_INFO_LABEL.len() + 64 + password.len());
        info.extend_from_slice(KEY_INFO_LABEL);
        info.extend_from_slice(client_pub);
        info.extend_from_slice(server_pub);
        info.extend_from_slice(password.as_bytes());

        let mut okm = [0u8; 96];
        hk.expand(&info, &mut okm)
            .map_err(|_| SessionError::KeyExchange)?;

        let mut keys = Self {
            client_to_server: [0; 32],
            server_to_client: [0; 32],
            confirmation: [0; 32],
        };
        keys.client_to_server.copy_from_slice(&okm[..32]);
        keys.server_to_client.copy_from_slice(&okm[32..64]);
        keys.confirmation.copy_from_slice(&okm[64..]);
        Ok(keys)
    }

    fn confirmation_key(&self) -> hmac::Key {
        hmac::Key::new(hmac::HMAC_SHA256, &self.confirmation)
    }

    /// A fresh nonce base for `ServerEnableEncryption`.
    pub fn fresh_nonce_base() -> Result<[u8; NONCE_BASE_LEN], SessionError> {
        random_bytes()
    }

    /// `(send, receive)` ciphers for the host end.
    pub fn host_ciphers(
        &self,
        nonce_base: [u8; NONCE_BASE_LEN],
    ) -> Result<(FrameCipher, FrameCipher), ProtocolError> {
        Ok((
            FrameCipher::new(&self.server_to_client, nonce_base)?,
            FrameCipher::new(&self.client_to_server, nonce_base)?,
        ))
    }

    /// `(send, receive)` ciphers for the participant end.
    pub fn participant_ciphers(
        &self,
        nonce_base: [u8; NONCE_BASE_LEN],
    ) -> Result<(FrameCipher, FrameCipher), ProtocolError> {
        Ok((
            FrameCipher::new(&self.client_to_server, nonce_base)?,
            FrameCipher::new(&self.server_to_client, nonce_base)?,
        ))
    }
}

impl std::fmt::Debug for SessionKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SessionKeys(..)")
    }
}

// ---------------------------------------------------------------------------
// Host side
// ---------------------------------------------------------------------------

/// The host's half of one handshake. Single use.
pub struct HostHandshake {
    private_key: EphemeralPrivateKey,
    public_key: [u8; PUBLIC_KEY_LEN],
    nonce: [u8; AUTH_NONCE_LEN],
    policy: AuthPolicy,
}

impl HostHandshake {
    pub fn new(policy: AuthPolicy) -> Result<Self, SessionError> {
        let rng = SystemRandom::new();
        let private_key =
            EphemeralPrivateKey::generate(&X25519, &rng).map_err(|_| SessionError::KeyExchange)?;
        let mut public_key = [0u8; PUBLIC_KEY_LEN];
        public_key.copy_from_slice(
            private_key
                .compute_public_key()
                .map_err(|_| SessionError::KeyExchange)?
                .as_ref(),
        );
        Ok(Self {
            private_key,
            public_key,
            nonce: random_bytes()?,
            policy,
        })
    }

    /// The `ServerAuthRequest` opening this handshake.
    pub fn request(&self) -> GameMessage {
        GameMessage::ServerAuthRequest {
            method: self.policy.method(),
            server_public_key: self.public_key,
            nonce: self.nonce,
        }
    }

    /// Checks a `ClientAuthResponse` and derives the session keys.
    ///
    /// # Errors
    /// - [`SessionError::WrongPassword`]: the confirmation did not verify
    ///   under a password policy.
    /// - [`SessionError::NotAuthorized`]: identity key missing, unknown,
    ///   or its signature is bad.
    /// - [`SessionError::KeyExchange`]: anything else cryptographic.
    pub fn verify(
        self,
        client_public_key: &[u8; PUBLIC_KEY_LEN],
        proof: &[u8],
        identity_key: &[u8],
        signature: &[u8],
    ) -> Result<SessionKeys, SessionError> {
        let Self {
            private_key,
            public_key,
            nonce,
            policy,
        } = self;

        let peer = UnparsedPublicKey::new(&X25519, client_public_key);
        let keys = agreement::agree_ephemeral(private_key, &peer, |shared| {
            SessionKeys::derive(shared, &nonce, client_public_key, &public_key, policy.password())
        })
        .map_err(|_| SessionError::KeyExchange)??;

        let transcript = transcript(client_public_key, &public_key, &nonce);
        if hmac::verify(&keys.confirmation_key(), &transcript, proof).is_err() {
            return Err(match policy {
                AuthPolicy::Password { .. } => SessionError::WrongPassword,
                _ => SessionError::KeyExchange,
            });
        }

        if let AuthPolicy::AuthorizedKeys { keys: allowed } = &policy {
            let known = allowed.iter().any(|k| k.as_slice() == identity_key);
            let signed = signature::UnparsedPublicKey::new(&signature::ED25519, identity_key)
                .verify(&transcript, signature)
                .is_ok();
            if !known || !signed {
                return Err(SessionError::NotAuthorized);
            }
        }

        Ok(keys)
    }
}

// ---------------------------------------------------------------------------
// Participant side
// ---------------------------------------------------------------------------

/// The participant's half of the handshake.
#[derive(Debug, Clone, Default)]
pub struct JoinerHandshake {
    credentials: Credentials,
}

impl JoinerHandshake {
    pub fn new(credentials: Credentials) -> Self {
        Self { credentials }
    }

    /// Answers a `ServerAuthRequest`.
    ///
    /// Returns the `ClientAuthResponse` to send and the derived keys, which
    /// go live once `ServerEnableEncryption` arrives.
    ///
    /// # Errors
    /// [`SessionError::MethodUnavailable`] when the host wants a password
    /// or identity this participant does not have.
    pub fn respond(
        &self,
        method: AuthMethod,
        server_public_key: &[u8; PUBLIC_KEY_LEN],
        nonce: &[u8; AUTH_NONCE_LEN],
    ) -> Result<(GameMessage, SessionKeys), SessionError> {
        let password = match method {
            AuthMethod::Password => self
                .credentials
                .password
                .as_deref()
                .ok_or(SessionError::MethodUnavailable("password"))?,
            _ => "",
        };

        let rng = SystemRandom::new();
        let private_key =
            EphemeralPrivateKey::generate(&X25519, &rng).map_err(|_| SessionError::KeyExchange)?;
        let mut public_key = [0u8; PUBLIC_KEY_LEN];
        public_key.copy_from_slice(
            private_key
                .compute_public_key()
                .map_err(|_| SessionError::KeyExchange)?
                .as_ref(),
        );

        let peer = UnparsedPublicKey::new(&X25519, server_public_key);
        let keys = agreement::agree_ephemeral(private_key, &peer, |shared| {
            SessionKeys::derive(shared, nonce, &public_key, server_public_key, password)
        })
        .map_err(|_| SessionError::KeyExchange)??;

        let transcript = transcript(&public_key, server_public_key, nonce);
        let proof = hmac::sign(&keys.confirmation_key(), &transcript)
            .as_ref()
            .to_vec();

        let (identity_key, signature) = match method {
            AuthMethod::AuthorizedKey => {
                let seed = self
                    .credentials
                    .identity_seed
                    .ok_or(SessionError::MethodUnavailable("identity key"))?;
                let pair = Ed25519KeyPair::from_seed_unchecked(&seed)
                    .map_err(|_| SessionError::KeyExchange)?;
                (
                    pair.public_key().as_ref().to_vec(),
                    pair.sign(&transcript).as_ref().to_vec(),
                )
            }
            _ => (Vec::new(), Vec::new()),
        };

        let response = GameMessage::ClientAuthResponse {
            public_key,
            proof,
            identity_key,
            signature,
        };
        Ok((response, keys))
    }
}
