//! Fixed-length encrypted ratchet header block.
//!
//! Plaintext layout (big-endian), 40 bytes total:
//!   [ message number: u32 | previous-chain length: u32 | ratchet public key: 32 ]
//!
//! The plaintext is encrypted under the sender's header key, then the
//! resulting blob is padded with random bytes to a fixed `HEADER_LEN` so
//! the wire never reveals ratchet metadata through its size. The pad
//! length lives in one byte at the fixed offset `HEADER_LEN - 1`.

use rand::RngCore;
use x25519_dalek::PublicKey as X25519Public;

use crate::{aead, error::CryptoError};

/// Total on-wire size of the encrypted header block.
pub const HEADER_LEN: usize = 128;

/// Plaintext header size before encryption.
const PLAIN_LEN: usize = 4 + 4 + 32;

/// Per-message ratchet metadata, never visible on the wire in plaintext.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RatchetHeader {
    /// Message number in the sender's current chain.
    pub n: u32,
    /// Length of the sender's previous sending chain.
    pub pn: u32,
    /// Sender's current ratchet public key.
    pub ratchet_pub: [u8; 32],
}

impl RatchetHeader {
    fn encode(&self) -> [u8; PLAIN_LEN] {
        let mut out = [0u8; PLAIN_LEN];
        out[..4].copy_from_slice(&self.n.to_be_bytes());
        out[4..8].copy_from_slice(&self.pn.to_be_bytes());
        out[8..].copy_from_slice(&self.ratchet_pub);
        out
    }

    fn decode(bytes: &[u8]) -> Result<Self, CryptoError> {
        if bytes.len() != PLAIN_LEN {
            return Err(CryptoError::Undecipherable);
        }
        let n = u32::from_be_bytes(bytes[..4].try_into().expect("checked length"));
        let pn = u32::from_be_bytes(bytes[4..8].try_into().expect("checked length"));
        let mut ratchet_pub = [0u8; 32];
        ratchet_pub.copy_from_slice(&bytes[8..]);
        Ok(Self { n, pn, ratchet_pub })
    }

    pub fn ratchet_public(&self) -> X25519Public {
        X25519Public::from(self.ratchet_pub)
    }
}

/// Encrypt a header under `header_key` and pad to [`HEADER_LEN`].
pub fn seal(header_key: &[u8; 32], header: &RatchetHeader) -> Result<[u8; HEADER_LEN], CryptoError> {
    let enc = aead::encrypt(header_key, &header.encode())?;
    debug_assert!(enc.len() < HEADER_LEN);
    let pad_len = HEADER_LEN - 1 - enc.len();

    let mut block = [0u8; HEADER_LEN];
    block[..enc.len()].copy_from_slice(&enc);
    rand::rngs::OsRng.fill_bytes(&mut block[enc.len()..HEADER_LEN - 1]);
    block[HEADER_LEN - 1] = pad_len as u8;
    Ok(block)
}

/// Strip padding and decrypt a header block with `header_key`.
///
/// Any authentication failure, malformed pad byte, or wrong length is an
/// [`CryptoError::Undecipherable`]; callers use that to fall through to the
/// next candidate key.
pub fn open(header_key: &[u8; 32], block: &[u8]) -> Result<RatchetHeader, CryptoError> {
    if block.len() != HEADER_LEN {
        return Err(CryptoError::Undecipherable);
    }
    let pad_len = block[HEADER_LEN - 1] as usize;
    if pad_len >= HEADER_LEN {
        return Err(CryptoError::Undecipherable);
    }
    let enc = &block[..HEADER_LEN - 1 - pad_len];
    let plain = aead::decrypt(header_key, enc)?;
    RatchetHeader::decode(&plain)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(n: u32) -> RatchetHeader {
        RatchetHeader {
            n,
            pn: 3,
            ratchet_pub: [0xAB; 32],
        }
    }

    #[test]
    fn seal_open_roundtrip() {
        let hk = [5u8; 32];
        let header = sample(17);
        let block = seal(&hk, &header).unwrap();
        assert_eq!(open(&hk, &block).unwrap(), header);
    }

    #[test]
    fn block_size_is_constant_across_counters() {
        let hk = [5u8; 32];
        let a = seal(&hk, &sample(0)).unwrap();
        let b = seal(&hk, &sample(u32::MAX)).unwrap();
        assert_eq!(a.len(), HEADER_LEN);
        assert_eq!(b.len(), HEADER_LEN);
    }

    #[test]
    fn wrong_key_is_undecipherable() {
        let block = seal(&[1u8; 32], &sample(2)).unwrap();
        assert!(matches!(
            open(&[2u8; 32], &block),
            Err(CryptoError::Undecipherable)
        ));
    }

    #[test]
    fn tampered_pad_byte_is_undecipherable() {
        let hk = [8u8; 32];
        let mut block = seal(&hk, &sample(2)).unwrap();
        block[HEADER_LEN - 1] = block[HEADER_LEN - 1].wrapping_add(1);
        assert!(matches!(
            open(&hk, &block),
            Err(CryptoError::Undecipherable)
        ));
    }
}
