//! X25519 key agreement and the triple-DH handshake.
//!
//! The handshake combines three DH computations across identity and
//! handshake keys:
//!
//!   DH1 = DH(IK_local,  HK_peer)
//!   DH2 = DH(HK_local,  IK_peer)
//!   DH3 = DH(HK_local,  HK_peer)
//!
//! Alice concatenates DH1 || DH2 || DH3, Bob mirrors the first two terms,
//! so both roles derive byte-identical key material. The concatenation is
//! fed through HKDF with an all-zero salt to produce the master key that
//! seeds the ratchet.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use rand::rngs::OsRng;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use x25519_dalek::{PublicKey as X25519Public, StaticSecret};
use zeroize::Zeroize;

use crate::{error::CryptoError, kdf};

const HANDSHAKE_INFO: &[u8] = b"axo-3dh-v1";

/// Which side of the conversation this party plays. Fixed at establishment
/// and never changed afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    /// The initiator: did not commit a ratchet key during the handshake,
    /// so the first send performs a DH-ratchet step.
    Alice,
    /// The responder: committed a ratchet keypair during the handshake and
    /// starts with a primed sending chain.
    Bob,
}

// ── Keypair ──────────────────────────────────────────────────────────────────

/// An X25519 keypair. The secret half never leaves this process except via
/// the serde impl used for vault-encrypted state blobs.
pub struct KeyPair {
    secret_bytes: [u8; 32],
    public: X25519Public,
}

impl KeyPair {
    /// Generate a fresh keypair from the OS CSPRNG.
    pub fn generate() -> Self {
        let secret = StaticSecret::random_from_rng(OsRng);
        let public = X25519Public::from(&secret);
        Self {
            secret_bytes: secret.to_bytes(),
            public,
        }
    }

    /// Rebuild a keypair from raw secret bytes (clamping happens inside the
    /// curve operation, per RFC 7748).
    pub fn from_bytes(secret_bytes: [u8; 32]) -> Self {
        let secret = StaticSecret::from(secret_bytes);
        let public = X25519Public::from(&secret);
        Self {
            secret_bytes,
            public,
        }
    }

    pub fn public(&self) -> &X25519Public {
        &self.public
    }

    /// X25519 shared secret with a peer public key.
    ///
    /// Rejects non-contributory results (low-order peer points), which
    /// would otherwise yield an all-zero shared secret.
    pub fn dh(&self, peer: &X25519Public) -> Result<[u8; 32], CryptoError> {
        let shared = StaticSecret::from(self.secret_bytes).diffie_hellman(peer);
        if !shared.was_contributory() {
            return Err(CryptoError::Handshake(
                "low-order peer public key".into(),
            ));
        }
        Ok(*shared.as_bytes())
    }
}

impl Drop for KeyPair {
    fn drop(&mut self) {
        self.secret_bytes.zeroize();
    }
}

impl std::fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyPair")
            .field("public", &URL_SAFE_NO_PAD.encode(self.public.as_bytes()))
            .finish_non_exhaustive()
    }
}

impl Serialize for KeyPair {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&URL_SAFE_NO_PAD.encode(self.secret_bytes))
    }
}

impl<'de> Deserialize<'de> for KeyPair {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        let bytes = URL_SAFE_NO_PAD
            .decode(&s)
            .map_err(serde::de::Error::custom)?;
        let arr: [u8; 32] = bytes
            .try_into()
            .map_err(|_| serde::de::Error::custom("expected 32-byte secret"))?;
        Ok(KeyPair::from_bytes(arr))
    }
}

// ── Triple DH ────────────────────────────────────────────────────────────────

/// Run the 3-DH handshake and derive the 32-byte master key.
///
/// `role` fixes the ordering of the two asymmetric DH terms so that both
/// parties compute identical output. Run once per conversation, before any
/// ratchet state exists.
pub fn generate_3dh(
    identity: &KeyPair,
    handshake: &KeyPair,
    peer_identity: &X25519Public,
    peer_handshake: &X25519Public,
    role: Role,
) -> Result<[u8; 32], CryptoError> {
    let id_hs = identity.dh(peer_handshake)?;
    let hs_id = handshake.dh(peer_identity)?;
    let hs_hs = handshake.dh(peer_handshake)?;

    let mut ikm = Vec::with_capacity(96);
    match role {
        Role::Alice => {
            ikm.extend_from_slice(&id_hs);
            ikm.extend_from_slice(&hs_id);
        }
        Role::Bob => {
            ikm.extend_from_slice(&hs_id);
            ikm.extend_from_slice(&id_hs);
        }
    }
    ikm.extend_from_slice(&hs_hs);

    let master = kdf::kdf(&ikm, &kdf::ZERO_SALT, HANDSHAKE_INFO)?;
    ikm.zeroize();
    Ok(master)
}

// ── Serde helper for Option<X25519Public> ────────────────────────────────────

pub(crate) mod option_pub_key_serde {
    use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
    use serde::{self, Deserialize, Deserializer, Serializer};
    use x25519_dalek::PublicKey as X25519Public;

    pub fn serialize<S>(key: &Option<X25519Public>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match key {
            Some(k) => serializer.serialize_some(&URL_SAFE_NO_PAD.encode(k.as_bytes())),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<X25519Public>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let opt: Option<String> = Option::deserialize(deserializer)?;
        match opt {
            None => Ok(None),
            Some(s) => {
                let bytes = URL_SAFE_NO_PAD
                    .decode(&s)
                    .map_err(serde::de::Error::custom)?;
                let arr: [u8; 32] = bytes
                    .try_into()
                    .map_err(|_| serde::de::Error::custom("expected 32 bytes"))?;
                Ok(Some(X25519Public::from(arr)))
            }
        }
    }
}
