//! Message framing for ratchet conversations.
//!
//! [`codec`] pads plaintext into size buckets before encryption so the
//! ciphertext length leaks a bucket, not a byte count. [`envelope`] wraps
//! the encrypted wire bytes in a serializable record with routing metadata
//! that a transport can carry without learning anything about the content.

pub mod codec;
pub mod envelope;

pub use codec::{CodecError, PaddingMode};
pub use envelope::{Envelope, EnvelopeError, WIRE_VERSION};
