//! Authenticated encryption
//!
//! XChaCha20-Poly1305. Key: 32 bytes. Nonce: 24 bytes, random per call.
//! Tag: 16 bytes.
//!
//! Blob layout:
//!   [ nonce (24) | tag (16) | ciphertext ]

use chacha20poly1305::{
    aead::{Aead, AeadCore, KeyInit, OsRng as AeadOsRng},
    XChaCha20Poly1305,
};
use zeroize::Zeroizing;

use crate::error::CryptoError;

pub const NONCE_LEN: usize = 24;
pub const TAG_LEN: usize = 16;
/// Fixed per-message expansion of the blob over the plaintext.
pub const OVERHEAD: usize = NONCE_LEN + TAG_LEN;

/// Encrypt `plaintext` under a 32-byte key with a fresh random nonce.
pub fn encrypt(key: &[u8; 32], plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let cipher = XChaCha20Poly1305::new_from_slice(key)
        .map_err(|e| CryptoError::InvalidKey(e.to_string()))?;

    let nonce = XChaCha20Poly1305::generate_nonce(&mut AeadOsRng);
    let ct_and_tag = cipher
        .encrypt(&nonce, plaintext)
        .map_err(|_| CryptoError::Undecipherable)?;

    // The cipher appends the tag; the blob layout wants it up front.
    let (ct, tag) = ct_and_tag.split_at(ct_and_tag.len() - TAG_LEN);
    let mut out = Vec::with_capacity(OVERHEAD + ct.len());
    out.extend_from_slice(&nonce);
    out.extend_from_slice(tag);
    out.extend_from_slice(ct);
    Ok(out)
}

/// Decrypt a blob produced by [`encrypt`]. Fails with
/// [`CryptoError::Undecipherable`] if the tag does not verify, the key is
/// wrong, or the blob is too short.
pub fn decrypt(key: &[u8; 32], blob: &[u8]) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
    if blob.len() < OVERHEAD {
        return Err(CryptoError::Undecipherable);
    }
    let (nonce_bytes, rest) = blob.split_at(NONCE_LEN);
    let (tag, ct) = rest.split_at(TAG_LEN);
    let nonce = chacha20poly1305::XNonce::from_slice(nonce_bytes);

    let cipher = XChaCha20Poly1305::new_from_slice(key)
        .map_err(|_| CryptoError::Undecipherable)?;

    let mut ct_and_tag = Vec::with_capacity(ct.len() + TAG_LEN);
    ct_and_tag.extend_from_slice(ct);
    ct_and_tag.extend_from_slice(tag);

    let plaintext = cipher
        .decrypt(nonce, ct_and_tag.as_slice())
        .map_err(|_| CryptoError::Undecipherable)?;

    Ok(Zeroizing::new(plaintext))
}
