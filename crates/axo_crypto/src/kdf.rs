//! Key derivation functions
//!
//! `kdf` - HKDF-SHA256 extract+expand, the single derivation step used for
//!   the 3-DH master key, root-key advances, and establishment keys.
//!
//! `kdf_ck` - one HMAC-SHA256 step over a 1-byte label; derives either the
//!   per-message key or the next chain key from the current chain key.
//!
//! `vault_key_from_password` - Argon2id, derives the 32-byte key used by
//!   the store to encrypt conversation state at rest.

use argon2::{Argon2, Params, Version};
use hkdf::Hkdf;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use zeroize::ZeroizeOnDrop;

use crate::error::CryptoError;

/// All-zero salt used at handshake and establishment time, before any
/// shared root key exists.
pub const ZERO_SALT: [u8; 32] = [0u8; 32];

/// Chain-key label deriving the single-use message key.
pub const MESSAGE_KEY_LABEL: u8 = 0x00;
/// Chain-key label advancing the chain itself.
pub const CHAIN_KEY_LABEL: u8 = 0x01;

// ── HKDF-SHA256 ──────────────────────────────────────────────────────────────

/// Derive 32 bytes from `secret` under `salt` and `info`.
///
/// Deterministic and side-effect free. An empty secret is rejected: every
/// caller in this crate feeds DH output or an existing key, so an empty
/// input always indicates a caller bug.
pub fn kdf(secret: &[u8], salt: &[u8], info: &[u8]) -> Result<[u8; 32], CryptoError> {
    if secret.is_empty() {
        return Err(CryptoError::KeyDerivation("empty input secret".into()));
    }
    let hk = Hkdf::<Sha256>::new(Some(salt), secret);
    let mut out = [0u8; 32];
    hk.expand(info, &mut out)
        .map_err(|e| CryptoError::KeyDerivation(e.to_string()))?;
    Ok(out)
}

// ── Chain step (HMAC-SHA256) ─────────────────────────────────────────────────

/// One symmetric-ratchet step: HMAC(chain_key, label).
///
/// The two labels are fixed and distinct so message keys can never collide
/// with chain keys derived from the same input.
pub fn kdf_ck(chain_key: &[u8; 32], label: u8) -> Result<[u8; 32], CryptoError> {
    let mut mac = Hmac::<Sha256>::new_from_slice(chain_key)
        .map_err(|e| CryptoError::KeyDerivation(e.to_string()))?;
    mac.update(&[label]);
    Ok(mac.finalize().into_bytes().into())
}

// ── Vault key (Argon2id) ─────────────────────────────────────────────────────

/// 32-byte vault key derived from a user password. Zeroized on drop.
#[derive(ZeroizeOnDrop)]
pub struct VaultKey(pub [u8; 32]);

/// Argon2id parameters tuned for interactive (desktop) use.
fn argon2_params() -> Params {
    Params::new(
        64 * 1024, // m_cost: 64 MiB
        3,         // t_cost
        1,         // p_cost
        Some(32),
    )
    .expect("static Argon2 params are always valid")
}

/// Derive a vault key from a user password plus a 16-byte salt.
/// The salt is stored alongside the encrypted state (not secret).
pub fn vault_key_from_password(password: &[u8], salt: &[u8; 16]) -> Result<VaultKey, CryptoError> {
    let argon2 = Argon2::new(argon2::Algorithm::Argon2id, Version::V0x13, argon2_params());
    let mut output = [0u8; 32];
    argon2
        .hash_password_into(password, salt, &mut output)
        .map_err(|e| CryptoError::KeyDerivation(e.to_string()))?;
    Ok(VaultKey(output))
}

/// Fresh random 16-byte salt (call once per store; persist it).
pub fn generate_salt() -> [u8; 16] {
    use rand::RngCore;
    let mut salt = [0u8; 16];
    rand::rngs::OsRng.fill_bytes(&mut salt);
    salt
}
