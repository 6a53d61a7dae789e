//! Length-hiding padding.
//!
//! Every plaintext is framed as `u32-le length || plaintext || random fill`
//! and rounded up to a bucket size, so a passive observer watching
//! ciphertext lengths learns only which bucket a message fell into.

use rand::RngCore;
use thiserror::Error;

/// Padded sizes a message can occupy. A message is placed in the smallest
/// bucket that fits its framed form.
pub const BUCKET_SIZES: [usize; 6] = [256, 512, 1024, 4096, 16384, 65536];

const LEN_PREFIX: usize = 4;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("message of {got} bytes exceeds the largest padding bucket ({max})")]
    MessageTooLarge { got: usize, max: usize },

    #[error("padded frame is malformed")]
    MalformedFrame,
}

/// How plaintext is padded before encryption.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PaddingMode {
    /// No padding. Message length is visible modulo cipher overhead.
    None,
    /// Round up to the nearest bucket in [`BUCKET_SIZES`].
    #[default]
    Buckets,
    /// Always pad to the largest bucket. Maximum cover, maximum cost.
    Maximum,
}

/// Frame and pad `plaintext` according to `mode`.
pub fn pad(plaintext: &[u8], mode: PaddingMode) -> Result<Vec<u8>, CodecError> {
    let framed_len = LEN_PREFIX + plaintext.len();
    let max = BUCKET_SIZES[BUCKET_SIZES.len() - 1];

    let target = match mode {
        PaddingMode::None => framed_len,
        PaddingMode::Buckets => BUCKET_SIZES
            .iter()
            .copied()
            .find(|&b| b >= framed_len)
            .ok_or(CodecError::MessageTooLarge {
                got: plaintext.len(),
                max: max - LEN_PREFIX,
            })?,
        PaddingMode::Maximum => {
            if framed_len > max {
                return Err(CodecError::MessageTooLarge {
                    got: plaintext.len(),
                    max: max - LEN_PREFIX,
                });
            }
            max
        }
    };

    let len = plaintext.len() as u32;
    let mut out = Vec::with_capacity(target);
    out.extend_from_slice(&len.to_le_bytes());
    out.extend_from_slice(plaintext);

    // Random fill, not zeros: padding is indistinguishable from content
    // even if a cipher ever leaks plaintext structure.
    let mut fill = vec![0u8; target - framed_len];
    rand::rngs::OsRng.fill_bytes(&mut fill);
    out.extend_from_slice(&fill);
    Ok(out)
}

/// Recover the original plaintext from a padded frame.
pub fn unpad(frame: &[u8]) -> Result<Vec<u8>, CodecError> {
    if frame.len() < LEN_PREFIX {
        return Err(CodecError::MalformedFrame);
    }
    let mut len_bytes = [0u8; LEN_PREFIX];
    len_bytes.copy_from_slice(&frame[..LEN_PREFIX]);
    let len = u32::from_le_bytes(len_bytes) as usize;
    if len > frame.len() - LEN_PREFIX {
        return Err(CodecError::MalformedFrame);
    }
    Ok(frame[LEN_PREFIX..LEN_PREFIX + len].to_vec())
}
