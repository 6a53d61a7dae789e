//! Transport envelope.
//!
//! An [`Envelope`] is what actually travels over whatever transport the
//! application uses. The payload is the ratchet wire output (encrypted
//! header block plus body) encoded as base64; the surrounding fields are
//! routing metadata only and reveal nothing about the plaintext.

use base64::{engine::general_purpose::STANDARD as B64, Engine};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use axo_crypto::{Conversation, CryptoError};

use crate::codec::{self, CodecError, PaddingMode};

/// Wire format version. Bumped on any incompatible envelope change.
pub const WIRE_VERSION: u8 = 1;

#[derive(Debug, Error)]
pub enum EnvelopeError {
    #[error("unsupported wire version {0}")]
    UnsupportedVersion(u8),

    #[error("envelope is addressed to conversation {got}, expected {expected}")]
    WrongConversation { got: String, expected: String },

    #[error("crypto: {0}")]
    Crypto(#[from] CryptoError),

    #[error("codec: {0}")]
    Codec(#[from] CodecError),

    #[error("serialisation: {0}")]
    Serialisation(#[from] serde_json::Error),

    #[error("payload is not valid base64: {0}")]
    Base64(#[from] base64::DecodeError),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub envelope_id: Uuid,
    pub version: u8,
    pub conversation_id: String,
    pub sent_at: DateTime<Utc>,
    /// Base64 of the ratchet wire bytes.
    pub payload: String,
}

impl Envelope {
    /// Pad and encrypt `plaintext` for `conversation`, producing an
    /// envelope ready for transport.
    pub fn seal(
        conversation: &mut Conversation,
        plaintext: &[u8],
        padding: PaddingMode,
    ) -> Result<Self, EnvelopeError> {
        let framed = codec::pad(plaintext, padding)?;
        let wire = conversation.encrypt(&framed)?;
        Ok(Self {
            envelope_id: Uuid::new_v4(),
            version: WIRE_VERSION,
            conversation_id: conversation.id().to_owned(),
            sent_at: Utc::now(),
            payload: B64.encode(wire),
        })
    }

    /// Decrypt an envelope with `conversation` and strip the padding.
    ///
    /// The conversation id is checked before any cryptography runs, so a
    /// misrouted envelope fails loudly instead of surfacing as a generic
    /// decryption error.
    pub fn open(&self, conversation: &mut Conversation) -> Result<Vec<u8>, EnvelopeError> {
        if self.version != WIRE_VERSION {
            return Err(EnvelopeError::UnsupportedVersion(self.version));
        }
        if self.conversation_id != conversation.id() {
            return Err(EnvelopeError::WrongConversation {
                got: self.conversation_id.clone(),
                expected: conversation.id().to_owned(),
            });
        }
        let wire = B64.decode(&self.payload)?;
        let framed = conversation.decrypt(&wire)?;
        Ok(codec::unpad(&framed)?)
    }

    pub fn to_json(&self) -> Result<String, EnvelopeError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(raw: &str) -> Result<Self, EnvelopeError> {
        Ok(serde_json::from_str(raw)?)
    }
}
