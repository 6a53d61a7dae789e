use thiserror::Error;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("Handshake failed: {0}")]
    Handshake(String),

    #[error("Message failed to authenticate under any known key")]
    Undecipherable,

    #[error("Conversation not established for this operation")]
    NotEstablished,

    #[error("Key derivation failed: {0}")]
    KeyDerivation(String),

    #[error("Invalid key material: {0}")]
    InvalidKey(String),

    #[error("Too many skipped messages ({got} > {max})")]
    TooManySkipped { got: u32, max: u32 },

    #[error("Serialisation error: {0}")]
    Serialisation(#[from] serde_json::Error),

    #[error("Base64 decode error: {0}")]
    Base64Decode(#[from] base64::DecodeError),
}
