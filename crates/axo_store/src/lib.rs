//! axo_store - Encrypted local persistence for ratchet conversations
//!
//! # Encryption strategy
//! SQLite does NOT natively encrypt.  We use application-level encryption:
//! - Conversation state blobs are stored as XChaCha20-Poly1305 ciphertext,
//!   base64-encoded, never as plaintext rows.
//! - The vault key is derived from the user password via Argon2id and held
//!   in memory only while the vault is unlocked.
//! - Row metadata (conversation id, timestamps) stays in plaintext so
//!   lookups do not require the vault.
//!
//! # Migration
//! SQLx migrations in `migrations/` are run on first open.

pub mod db;
pub mod error;
pub mod models;
pub mod vault;

pub use db::Store;
pub use error::StoreError;
pub use vault::Vault;
