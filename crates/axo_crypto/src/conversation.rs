//! Header-encrypting double ratchet.
//!
//! State separation:
//!   RK        - root key, advanced once per DH-ratchet step
//!   HKs/HKr   - header keys encrypting per-message metadata
//!   NHKs/NHKr - next-generation header keys, committed one step ahead
//!   CKs/CKr   - chain keys, advanced once per message
//!   MK        - message key, derived from a chain key, used once, deleted
//!
//! Unlike a plain-header ratchet, the receiver learns which chain a
//! message belongs to by trial-decrypting its fixed-length header block:
//! first against cached skipped keys, then the current receiving header
//! key, then the next-generation header key (which signals that the peer
//! performed a DH-ratchet step). Nothing on the wire identifies the chain.
//!
//! Forward secrecy: old chain and message keys are deleted after use.
//! A message that fails to authenticate is dropped without touching state,
//! so one corrupted message never poisons the conversation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use x25519_dalek::PublicKey as X25519Public;
use zeroize::{Zeroize, Zeroizing};

use crate::{
    aead,
    dh::{option_pub_key_serde, KeyPair, Role},
    error::CryptoError,
    header::{self, RatchetHeader, HEADER_LEN},
    kdf,
};

/// Maximum number of message keys a single message may skip over.
/// Larger gaps are rejected rather than ground through the chain.
const MAX_SKIP: u32 = 255;

/// Upper bound on cached skipped keys per conversation; the oldest entries
/// are evicted (and zeroized) past this point.
const MAX_SKIPPED_KEYS: usize = 512;

const INIT_ROOT_INFO: &[u8] = b"axo-init-root-v1";
const INIT_HEADER_BOB_INFO: &[u8] = b"axo-init-header-bob-v1";
const INIT_NEXT_HEADER_ALICE_INFO: &[u8] = b"axo-init-next-header-alice-v1";
const INIT_NEXT_HEADER_BOB_INFO: &[u8] = b"axo-init-next-header-bob-v1";
const INIT_CHAIN_BOB_INFO: &[u8] = b"axo-init-chain-bob-v1";

const RATCHET_ROOT_INFO: &[u8] = b"axo-ratchet-root-v1";
const RATCHET_NEXT_HEADER_INFO: &[u8] = b"axo-ratchet-next-header-v1";
const RATCHET_CHAIN_INFO: &[u8] = b"axo-ratchet-chain-v1";

// ── Skipped message keys ─────────────────────────────────────────────────────

/// A message key cached for an out-of-order message, together with the
/// header key of the chain it belongs to. Deleted on first successful use.
#[derive(Serialize, Deserialize)]
struct SkippedMessageKey {
    header_key: [u8; 32],
    message_key: [u8; 32],
    cached_at: DateTime<Utc>,
}

impl Drop for SkippedMessageKey {
    fn drop(&mut self) {
        self.header_key.zeroize();
        self.message_key.zeroize();
    }
}

// ── Conversation state ───────────────────────────────────────────────────────

/// Complete ratchet state for one peer pair.
///
/// `encrypt` and `decrypt` take `&mut self`: exclusive access is the
/// locking discipline here, enforced by the borrow checker. Callers that
/// share a conversation across threads wrap it in `Arc<Mutex<_>>`.
#[derive(Serialize, Deserialize)]
pub struct Conversation {
    id: String,
    role: Role,

    root_key: [u8; 32],

    // ── Header keys ──────────────────────────────────────────────────────
    header_key_send: Option<[u8; 32]>,
    header_key_recv: Option<[u8; 32]>,
    next_header_key_send: [u8; 32],
    next_header_key_recv: [u8; 32],

    // ── Chains ───────────────────────────────────────────────────────────
    chain_key_send: Option<[u8; 32]>,
    chain_key_recv: Option<[u8; 32]>,
    send_n: u32,
    recv_n: u32,
    prev_send_n: u32,

    // ── DH ratchet ───────────────────────────────────────────────────────
    /// Our current ratchet keypair. None for Alice before her first send
    /// and briefly after processing a peer ratchet step.
    ratchet_keypair: Option<KeyPair>,
    /// Peer's last known ratchet public key.
    #[serde(with = "option_pub_key_serde")]
    peer_ratchet_pub: Option<X25519Public>,
    /// Set when the peer has advanced the DH ratchet (or we have never
    /// sent); the next `encrypt` performs our own ratchet step first.
    ratchet_pending: bool,

    skipped: Vec<SkippedMessageKey>,
}

impl Drop for Conversation {
    fn drop(&mut self) {
        self.root_key.zeroize();
        self.next_header_key_send.zeroize();
        self.next_header_key_recv.zeroize();
        for slot in [
            &mut self.header_key_send,
            &mut self.header_key_recv,
            &mut self.chain_key_send,
            &mut self.chain_key_recv,
        ] {
            if let Some(ref mut key) = slot {
                key.zeroize();
            }
        }
        // KeyPair and SkippedMessageKey zeroize themselves.
    }
}

impl std::fmt::Debug for Conversation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Conversation")
            .field("id", &self.id)
            .field("role", &self.role)
            .field("send_n", &self.send_n)
            .field("recv_n", &self.recv_n)
            .field("ratchet_pending", &self.ratchet_pending)
            .field("skipped_keys", &self.skipped.len())
            .finish()
    }
}

/// Keys shared by both roles at establishment, derived from the 3-DH
/// master key. Bob's sending side is Alice's receiving side.
struct InitialKeys {
    root: [u8; 32],
    header_bob: [u8; 32],
    next_header_alice: [u8; 32],
    next_header_bob: [u8; 32],
    chain_bob: [u8; 32],
}

fn derive_initial_keys(master_key: &[u8; 32]) -> Result<InitialKeys, CryptoError> {
    Ok(InitialKeys {
        root: kdf::kdf(master_key, &kdf::ZERO_SALT, INIT_ROOT_INFO)?,
        header_bob: kdf::kdf(master_key, &kdf::ZERO_SALT, INIT_HEADER_BOB_INFO)?,
        next_header_alice: kdf::kdf(master_key, &kdf::ZERO_SALT, INIT_NEXT_HEADER_ALICE_INFO)?,
        next_header_bob: kdf::kdf(master_key, &kdf::ZERO_SALT, INIT_NEXT_HEADER_BOB_INFO)?,
        chain_bob: kdf::kdf(master_key, &kdf::ZERO_SALT, INIT_CHAIN_BOB_INFO)?,
    })
}

/// Conversation id: keyed hash of both identity keys under the master key,
/// with the keys ordered bytewise so both sides derive the same id.
fn derive_conversation_id(
    master_key: &[u8; 32],
    our_identity: &X25519Public,
    peer_identity: &X25519Public,
) -> String {
    let (lo, hi) = if our_identity.as_bytes() <= peer_identity.as_bytes() {
        (our_identity, peer_identity)
    } else {
        (peer_identity, our_identity)
    };
    let mut data = Vec::with_capacity(16 + 64);
    data.extend_from_slice(b"axo-conv-id-v1\x00");
    data.extend_from_slice(lo.as_bytes());
    data.extend_from_slice(hi.as_bytes());
    hex::encode(blake3::keyed_hash(master_key, &data).as_bytes())
}

// ── Construction ─────────────────────────────────────────────────────────────

impl Conversation {
    /// Establish as the initiator (Alice).
    ///
    /// Alice did not commit a ratchet key during the handshake: only her
    /// receiving side is primed, and her first `encrypt` performs a
    /// DH-ratchet step against `peer_ratchet_pub` (Bob's handshake key).
    pub fn new_alice(
        master_key: &[u8; 32],
        our_identity: &X25519Public,
        peer_identity: &X25519Public,
        peer_ratchet_pub: X25519Public,
    ) -> Result<Self, CryptoError> {
        let keys = derive_initial_keys(master_key)?;
        Ok(Self {
            id: derive_conversation_id(master_key, our_identity, peer_identity),
            role: Role::Alice,
            root_key: keys.root,
            header_key_send: None,
            header_key_recv: Some(keys.header_bob),
            next_header_key_send: keys.next_header_alice,
            next_header_key_recv: keys.next_header_bob,
            chain_key_send: None,
            chain_key_recv: Some(keys.chain_bob),
            send_n: 0,
            recv_n: 0,
            prev_send_n: 0,
            ratchet_keypair: None,
            peer_ratchet_pub: Some(peer_ratchet_pub),
            ratchet_pending: true,
            skipped: Vec::new(),
        })
    }

    /// Establish as the responder (Bob).
    ///
    /// Bob committed `ratchet_keypair` during the handshake, so his sending
    /// chain is primed immediately; his receiving side stays empty until
    /// Alice's first message reveals her ratchet key.
    pub fn new_bob(
        master_key: &[u8; 32],
        our_identity: &X25519Public,
        peer_identity: &X25519Public,
        ratchet_keypair: KeyPair,
    ) -> Result<Self, CryptoError> {
        let keys = derive_initial_keys(master_key)?;
        Ok(Self {
            id: derive_conversation_id(master_key, our_identity, peer_identity),
            role: Role::Bob,
            root_key: keys.root,
            header_key_send: Some(keys.header_bob),
            header_key_recv: None,
            next_header_key_send: keys.next_header_bob,
            next_header_key_recv: keys.next_header_alice,
            chain_key_send: Some(keys.chain_bob),
            chain_key_recv: None,
            send_n: 0,
            recv_n: 0,
            prev_send_n: 0,
            ratchet_keypair: Some(ratchet_keypair),
            peer_ratchet_pub: None,
            ratchet_pending: false,
            skipped: Vec::new(),
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn skipped_key_count(&self) -> usize {
        self.skipped.len()
    }

    // ── Encrypt ──────────────────────────────────────────────────────────

    /// Encrypt a message. Returns the wire bytes:
    /// a fixed-length encrypted header block followed by the body blob.
    pub fn encrypt(&mut self, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        if self.ratchet_pending {
            self.advance_send_ratchet()?;
        }

        let ck = Zeroizing::new(self.chain_key_send.ok_or(CryptoError::NotEstablished)?);
        let mk = Zeroizing::new(kdf::kdf_ck(&ck, kdf::MESSAGE_KEY_LABEL)?);
        self.chain_key_send = Some(kdf::kdf_ck(&ck, kdf::CHAIN_KEY_LABEL)?);

        let hk = self.header_key_send.ok_or(CryptoError::NotEstablished)?;
        let pair = self
            .ratchet_keypair
            .as_ref()
            .ok_or(CryptoError::NotEstablished)?;
        let head = RatchetHeader {
            n: self.send_n,
            pn: self.prev_send_n,
            ratchet_pub: *pair.public().as_bytes(),
        };

        let block = header::seal(&hk, &head)?;
        let body = aead::encrypt(&mk, plaintext)?;

        let mut wire = Vec::with_capacity(HEADER_LEN + body.len());
        wire.extend_from_slice(&block);
        wire.extend_from_slice(&body);

        self.send_n += 1;
        Ok(wire)
    }

    /// DH-ratchet step on the sending side: fresh ratchet keypair, new root
    /// key, promotion of the committed next-header key, new sending chain.
    fn advance_send_ratchet(&mut self) -> Result<(), CryptoError> {
        let peer = self.peer_ratchet_pub.ok_or(CryptoError::NotEstablished)?;
        let pair = KeyPair::generate();
        let dh_out = Zeroizing::new(pair.dh(&peer)?);

        let new_root = kdf::kdf(dh_out.as_slice(), &self.root_key, RATCHET_ROOT_INFO)?;
        let new_next_header = kdf::kdf(dh_out.as_slice(), &self.root_key, RATCHET_NEXT_HEADER_INFO)?;
        let new_chain = kdf::kdf(dh_out.as_slice(), &self.root_key, RATCHET_CHAIN_INFO)?;

        self.header_key_send = Some(std::mem::replace(
            &mut self.next_header_key_send,
            new_next_header,
        ));
        self.chain_key_send = Some(new_chain);
        self.root_key = new_root;
        self.prev_send_n = self.send_n;
        self.send_n = 0;
        self.ratchet_keypair = Some(pair);
        self.ratchet_pending = false;
        Ok(())
    }

    // ── Decrypt ──────────────────────────────────────────────────────────

    /// Decrypt a wire message.
    ///
    /// Resolution order: cached skipped keys, then the current receiving
    /// header key, then the next-generation header key (peer ratcheted).
    /// Anything else fails with [`CryptoError::Undecipherable`]; the
    /// message is dropped and the conversation stays intact.
    pub fn decrypt(&mut self, wire: &[u8]) -> Result<Vec<u8>, CryptoError> {
        if wire.len() < HEADER_LEN + aead::OVERHEAD {
            return Err(CryptoError::Undecipherable);
        }
        let (block, body) = wire.split_at(HEADER_LEN);

        if let Some(plaintext) = self.try_skipped(block, body) {
            return Ok(plaintext);
        }

        if let Some(hk) = self.header_key_recv {
            if let Ok(head) = header::open(&hk, block) {
                return self.decrypt_current_chain(&head, body);
            }
        }

        let next_hk = self.next_header_key_recv;
        if let Ok(head) = header::open(&next_hk, block) {
            return self.decrypt_after_peer_ratchet(&head, body);
        }

        Err(CryptoError::Undecipherable)
    }

    /// Case 1: an out-of-order message whose key was cached earlier.
    /// The matching entry is consumed; a second delivery of the same wire
    /// message will not find it again.
    fn try_skipped(&mut self, block: &[u8], body: &[u8]) -> Option<Vec<u8>> {
        let mut hit = None;
        for (i, entry) in self.skipped.iter().enumerate() {
            if header::open(&entry.header_key, block).is_err() {
                continue;
            }
            if let Ok(plaintext) = aead::decrypt(&entry.message_key, body) {
                hit = Some((i, plaintext.to_vec()));
                break;
            }
        }
        hit.map(|(i, plaintext)| {
            self.skipped.remove(i);
            plaintext
        })
    }

    /// Case 2: the header authenticated under the current receiving header
    /// key, so the message belongs to the current receiving chain.
    ///
    /// All derivations run on scratch values; state is committed only after
    /// the body authenticates.
    fn decrypt_current_chain(
        &mut self,
        head: &RatchetHeader,
        body: &[u8],
    ) -> Result<Vec<u8>, CryptoError> {
        let ck = Zeroizing::new(self.chain_key_recv.ok_or(CryptoError::NotEstablished)?);
        let hk = self.header_key_recv.ok_or(CryptoError::NotEstablished)?;

        if head.n < self.recv_n {
            // Key already consumed and no longer cached.
            return Err(CryptoError::Undecipherable);
        }
        let (staged, ck_at_target) = stage_chain(&ck, self.recv_n, head.n)?;
        let mk = Zeroizing::new(kdf::kdf_ck(&ck_at_target, kdf::MESSAGE_KEY_LABEL)?);
        let plaintext = aead::decrypt(&mk, body)?;

        self.chain_key_recv = Some(kdf::kdf_ck(&ck_at_target, kdf::CHAIN_KEY_LABEL)?);
        self.recv_n = head.n + 1;
        self.cache_skipped(&hk, staged);
        Ok(plaintext.to_vec())
    }

    /// Case 3: the header authenticated under the next-generation header
    /// key: the peer performed a DH-ratchet step and revealed a new ratchet
    /// public key. Skipped keys from the outgoing chain are cached before
    /// the receiving side moves to the new chain.
    fn decrypt_after_peer_ratchet(
        &mut self,
        head: &RatchetHeader,
        body: &[u8],
    ) -> Result<Vec<u8>, CryptoError> {
        // No live ratchet key means any ratchet signal here is forged or
        // replayed: an honest peer cannot ratchet twice without a send
        // from us in between.
        let pair = self
            .ratchet_keypair
            .as_ref()
            .ok_or(CryptoError::Undecipherable)?;

        // Close out the previous receiving chain. A previous-chain length
        // shorter than what we already decrypted would require discarding
        // accepted state, so it is rejected outright.
        let mut staged_old = Vec::new();
        let mut old_chain_hk = None;
        if let (Some(hk), Some(ck)) = (self.header_key_recv, self.chain_key_recv) {
            let ck = Zeroizing::new(ck);
            if head.pn < self.recv_n {
                return Err(CryptoError::Undecipherable);
            }
            let (staged, _) = stage_chain(&ck, self.recv_n, head.pn)?;
            staged_old = staged;
            old_chain_hk = Some(hk);
        }

        let peer_pub = head.ratchet_public();
        let dh_out =
            Zeroizing::new(pair.dh(&peer_pub).map_err(|_| CryptoError::Undecipherable)?);
        let new_root = kdf::kdf(dh_out.as_slice(), &self.root_key, RATCHET_ROOT_INFO)?;
        let new_next_header = kdf::kdf(dh_out.as_slice(), &self.root_key, RATCHET_NEXT_HEADER_INFO)?;
        let new_chain = Zeroizing::new(kdf::kdf(dh_out.as_slice(), &self.root_key, RATCHET_CHAIN_INFO)?);

        // The new chain starts at zero; anything before `head.n` is skipped.
        let (staged_new, ck_at_target) = stage_chain(&new_chain, 0, head.n)?;
        let mk = Zeroizing::new(kdf::kdf_ck(&ck_at_target, kdf::MESSAGE_KEY_LABEL)?);
        let plaintext = aead::decrypt(&mk, body)?;

        // Commit.
        if let Some(hk) = old_chain_hk {
            self.cache_skipped(&hk, staged_old);
        }
        let new_header_recv =
            std::mem::replace(&mut self.next_header_key_recv, new_next_header);
        self.cache_skipped(&new_header_recv, staged_new);
        self.header_key_recv = Some(new_header_recv);
        self.chain_key_recv = Some(kdf::kdf_ck(&ck_at_target, kdf::CHAIN_KEY_LABEL)?);
        self.recv_n = head.n + 1;
        self.root_key = new_root;
        self.peer_ratchet_pub = Some(peer_pub);
        // Our ratchet key is spent; the next send generates a fresh one.
        self.ratchet_keypair = None;
        self.ratchet_pending = true;
        Ok(plaintext.to_vec())
    }

    fn cache_skipped(&mut self, header_key: &[u8; 32], message_keys: Vec<[u8; 32]>) {
        let now = Utc::now();
        for message_key in message_keys {
            self.skipped.push(SkippedMessageKey {
                header_key: *header_key,
                message_key,
                cached_at: now,
            });
        }
        while self.skipped.len() > MAX_SKIPPED_KEYS {
            if let Some(oldest) = (0..self.skipped.len())
                .min_by_key(|&i| self.skipped[i].cached_at)
            {
                self.skipped.remove(oldest);
            }
        }
    }

    // ── Persistence ──────────────────────────────────────────────────────

    /// Serialize the full conversation state to an opaque blob. The store
    /// layer encrypts it at rest; the format is not a wire contract.
    pub fn to_blob(&self) -> Result<Vec<u8>, CryptoError> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Restore a conversation from a blob produced by [`to_blob`].
    pub fn from_blob(blob: &[u8]) -> Result<Self, CryptoError> {
        Ok(serde_json::from_slice(blob)?)
    }
}

/// Walk a chain key from message index `from` to `to`, collecting the
/// message keys in between. Pure: the caller commits results after the
/// target message authenticates.
fn stage_chain(
    chain_key: &[u8; 32],
    from: u32,
    to: u32,
) -> Result<(Vec<[u8; 32]>, Zeroizing<[u8; 32]>), CryptoError> {
    let gap = to
        .checked_sub(from)
        .ok_or(CryptoError::Undecipherable)?;
    if gap > MAX_SKIP {
        return Err(CryptoError::TooManySkipped {
            got: gap,
            max: MAX_SKIP,
        });
    }
    let mut ck = Zeroizing::new(*chain_key);
    let mut staged = Vec::with_capacity(gap as usize);
    for _ in 0..gap {
        staged.push(kdf::kdf_ck(&ck, kdf::MESSAGE_KEY_LABEL)?);
        ck = Zeroizing::new(kdf::kdf_ck(&ck, kdf::CHAIN_KEY_LABEL)?);
    }
    Ok((staged, ck))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dh::generate_3dh;

    /// Run the full handshake and return (alice, bob) conversations.
    fn establish() -> (Conversation, Conversation) {
        let alice_id = KeyPair::generate();
        let alice_hs = KeyPair::generate();
        let bob_id = KeyPair::generate();
        let bob_hs = KeyPair::generate();

        let master_a = generate_3dh(
            &alice_id,
            &alice_hs,
            bob_id.public(),
            bob_hs.public(),
            Role::Alice,
        )
        .unwrap();
        let master_b = generate_3dh(
            &bob_id,
            &bob_hs,
            alice_id.public(),
            alice_hs.public(),
            Role::Bob,
        )
        .unwrap();
        assert_eq!(master_a, master_b);

        let bob_ratchet = KeyPair::generate();
        let alice = Conversation::new_alice(
            &master_a,
            alice_id.public(),
            bob_id.public(),
            *bob_ratchet.public(),
        )
        .unwrap();
        let bob = Conversation::new_bob(
            &master_b,
            bob_id.public(),
            alice_id.public(),
            bob_ratchet,
        )
        .unwrap();
        (alice, bob)
    }

    #[test]
    fn both_sides_derive_the_same_conversation_id() {
        let (alice, bob) = establish();
        assert_eq!(alice.id(), bob.id());
        assert_eq!(alice.id().len(), 64);
    }

    #[test]
    fn hello_roundtrip_both_directions() {
        let (mut alice, mut bob) = establish();

        let wire = alice.encrypt(b"hello").unwrap();
        assert_eq!(bob.decrypt(&wire).unwrap(), b"hello");

        let reply = bob.encrypt(b"hi back").unwrap();
        assert_eq!(alice.decrypt(&reply).unwrap(), b"hi back");
    }

    #[test]
    fn bob_can_send_first() {
        let (mut alice, mut bob) = establish();

        let wire = bob.encrypt(b"responder speaks first").unwrap();
        assert_eq!(alice.decrypt(&wire).unwrap(), b"responder speaks first");

        let reply = alice.encrypt(b"indeed").unwrap();
        assert_eq!(bob.decrypt(&reply).unwrap(), b"indeed");
    }

    #[test]
    fn multi_turn_ping_pong() {
        let (mut alice, mut bob) = establish();
        for turn in 0u32..6 {
            let msg = format!("ping {turn}");
            let wire = alice.encrypt(msg.as_bytes()).unwrap();
            assert_eq!(bob.decrypt(&wire).unwrap(), msg.as_bytes());

            let msg = format!("pong {turn}");
            let wire = bob.encrypt(msg.as_bytes()).unwrap();
            assert_eq!(alice.decrypt(&wire).unwrap(), msg.as_bytes());
        }
    }

    #[test]
    fn out_of_order_within_one_chain() {
        let (mut alice, mut bob) = establish();
        // Warm up so both directions are live.
        let w = alice.encrypt(b"hello").unwrap();
        bob.decrypt(&w).unwrap();
        let w = bob.encrypt(b"hi back").unwrap();
        alice.decrypt(&w).unwrap();

        // Alice sends "a" then "b"; Bob reads "b" first.
        let wire_a = alice.encrypt(b"a").unwrap();
        let wire_b = alice.encrypt(b"b").unwrap();

        assert_eq!(bob.decrypt(&wire_b).unwrap(), b"b");
        assert_eq!(bob.skipped_key_count(), 1);
        assert_eq!(bob.decrypt(&wire_a).unwrap(), b"a");
        assert_eq!(bob.skipped_key_count(), 0);
    }

    #[test]
    fn out_of_order_across_a_ratchet_step() {
        let (mut alice, mut bob) = establish();
        let w = alice.encrypt(b"hello").unwrap();
        bob.decrypt(&w).unwrap();

        // Alice leaves one message in flight, then Bob replies, ratcheting.
        let in_flight = alice.encrypt(b"late").unwrap();
        let reply = bob.encrypt(b"reply").unwrap();
        alice.decrypt(&reply).unwrap();

        // Alice's next send opens a new chain; Bob reads it first.
        let fresh = alice.encrypt(b"fresh chain").unwrap();
        assert_eq!(bob.decrypt(&fresh).unwrap(), b"fresh chain");
        // The in-flight message from the previous chain still decrypts.
        assert_eq!(bob.decrypt(&in_flight).unwrap(), b"late");
    }

    #[test]
    fn decrypting_the_same_message_twice_fails() {
        let (mut alice, mut bob) = establish();
        let wire = alice.encrypt(b"once only").unwrap();
        assert_eq!(bob.decrypt(&wire).unwrap(), b"once only");
        assert!(matches!(
            bob.decrypt(&wire),
            Err(CryptoError::Undecipherable)
        ));
    }

    #[test]
    fn consumed_skipped_key_cannot_be_reused() {
        let (mut alice, mut bob) = establish();
        let wire_a = alice.encrypt(b"a").unwrap();
        let wire_b = alice.encrypt(b"b").unwrap();

        bob.decrypt(&wire_b).unwrap();
        bob.decrypt(&wire_a).unwrap();
        assert!(matches!(
            bob.decrypt(&wire_a),
            Err(CryptoError::Undecipherable)
        ));
    }

    #[test]
    fn garbage_leaves_the_conversation_usable() {
        let (mut alice, mut bob) = establish();
        let w = alice.encrypt(b"hello").unwrap();
        bob.decrypt(&w).unwrap();

        let mut garbage = vec![0u8; HEADER_LEN + aead::OVERHEAD + 12];
        use rand::RngCore;
        rand::rngs::OsRng.fill_bytes(&mut garbage);
        assert!(matches!(
            bob.decrypt(&garbage),
            Err(CryptoError::Undecipherable)
        ));
        assert!(matches!(
            bob.decrypt(&[1, 2, 3]),
            Err(CryptoError::Undecipherable)
        ));

        // State untouched: the next real message still decrypts.
        let wire = alice.encrypt(b"still fine").unwrap();
        assert_eq!(bob.decrypt(&wire).unwrap(), b"still fine");
    }

    #[test]
    fn tampered_body_fails_without_corrupting_state() {
        let (mut alice, mut bob) = establish();
        let mut wire = alice.encrypt(b"hello").unwrap();
        let last = wire.len() - 1;
        wire[last] ^= 0xFF;
        assert!(matches!(
            bob.decrypt(&wire),
            Err(CryptoError::Undecipherable)
        ));

        let wire = alice.encrypt(b"second").unwrap();
        assert_eq!(bob.decrypt(&wire).unwrap(), b"second");
    }

    #[test]
    fn header_block_length_never_varies() {
        let (mut alice, mut bob) = establish();
        let first = alice.encrypt(b"xx").unwrap();
        bob.decrypt(&first).unwrap();
        let reply = bob.encrypt(b"xx").unwrap();
        alice.decrypt(&reply).unwrap();
        let later = alice.encrypt(b"xx").unwrap();

        // Same plaintext length, different counters and chains: identical
        // wire length, and the header block is always HEADER_LEN.
        assert_eq!(first.len(), later.len());
        assert_eq!(first.len(), HEADER_LEN + aead::OVERHEAD + 2);
    }

    #[test]
    fn gap_beyond_max_skip_is_rejected() {
        let (mut alice, mut bob) = establish();
        let w = alice.encrypt(b"hello").unwrap();
        bob.decrypt(&w).unwrap();

        // Push Alice's counter past the skip window.
        let mut last = Vec::new();
        for _ in 0..(MAX_SKIP + 2) {
            last = alice.encrypt(b"burst").unwrap();
        }
        assert!(matches!(
            bob.decrypt(&last),
            Err(CryptoError::TooManySkipped { .. })
        ));
    }

    #[test]
    fn skipped_key_cache_is_capped_with_oldest_first_eviction() {
        let (mut alice, mut bob) = establish();
        let w = alice.encrypt(b"hello").unwrap();
        bob.decrypt(&w).unwrap();

        // Three bursts within the per-message skip window; Bob reads only
        // the last message of each, caching 200 skipped keys per burst.
        let mut skipped_wires = Vec::new();
        for _ in 0..3 {
            for _ in 0..200 {
                skipped_wires.push(alice.encrypt(b"skipped").unwrap());
            }
            let tail = alice.encrypt(b"tail").unwrap();
            assert_eq!(bob.decrypt(&tail).unwrap(), b"tail");
        }

        // 600 keys staged in total, capped at the cache bound.
        assert_eq!(bob.skipped_key_count(), MAX_SKIPPED_KEYS);

        // The earliest burst lost its keys to eviction.
        assert!(matches!(
            bob.decrypt(&skipped_wires[0]),
            Err(CryptoError::Undecipherable)
        ));
        // A recently skipped message still decrypts, consuming its entry.
        let recent = skipped_wires.last().unwrap();
        assert_eq!(bob.decrypt(recent).unwrap(), b"skipped");
        assert_eq!(bob.skipped_key_count(), MAX_SKIPPED_KEYS - 1);
    }

    #[test]
    fn forged_ratchet_signal_with_spent_keypair_is_undecipherable() {
        let (mut alice, mut bob) = establish();
        // After processing Alice's ratchet step Bob's own ratchet key is
        // spent until he sends.
        let w = alice.encrypt(b"hello").unwrap();
        bob.decrypt(&w).unwrap();
        assert!(bob.ratchet_keypair.is_none());

        // A block sealed under Bob's next-generation header key claims
        // another peer ratchet step, which an honest Alice cannot perform.
        let head = RatchetHeader {
            n: 0,
            pn: 9,
            ratchet_pub: *KeyPair::generate().public().as_bytes(),
        };
        let block = header::seal(&bob.next_header_key_recv, &head).unwrap();
        let mut wire = block.to_vec();
        wire.extend_from_slice(&aead::encrypt(&[0u8; 32], b"junk").unwrap());

        assert!(matches!(
            bob.decrypt(&wire),
            Err(CryptoError::Undecipherable)
        ));

        // The forgery leaves the conversation intact.
        let wire = alice.encrypt(b"still fine").unwrap();
        assert_eq!(bob.decrypt(&wire).unwrap(), b"still fine");
    }

    #[test]
    fn state_blob_roundtrip_preserves_the_session() {
        let (mut alice, mut bob) = establish();
        let w = alice.encrypt(b"before save").unwrap();
        bob.decrypt(&w).unwrap();

        let blob = bob.to_blob().unwrap();
        let mut restored = Conversation::from_blob(&blob).unwrap();
        assert_eq!(restored.id(), bob.id());
        drop(bob);

        let reply = restored.encrypt(b"from restored state").unwrap();
        assert_eq!(alice.decrypt(&reply).unwrap(), b"from restored state");
    }
}
