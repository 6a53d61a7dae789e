//! axo_crypto - Axochannel ratchet core and cryptographic primitives
//!
//! # Design principles
//! - NO custom crypto; all primitives come from audited Rust crates.
//! - Zeroize all secret material on drop.
//! - Authentication failures are typed errors, never silently swallowed.
//!
//! # Module layout
//! - `dh`           - X25519 keypairs and the triple-DH handshake
//! - `kdf`          - HKDF / HMAC chain steps / Argon2id vault key
//! - `aead`         - XChaCha20-Poly1305 encrypt/decrypt helpers
//! - `header`       - fixed-length encrypted ratchet header block
//! - `conversation` - the header-encrypting double-ratchet state machine
//! - `error`        - unified error type

pub mod aead;
pub mod conversation;
pub mod dh;
pub mod error;
pub mod header;
pub mod kdf;

pub use conversation::Conversation;
pub use dh::{generate_3dh, KeyPair, Role};
pub use error::CryptoError;
