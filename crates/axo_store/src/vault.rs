//! Vault: in-memory key material unlocked by user password.
//!
//! The vault holds the 32-byte database encryption key in memory.
//! Locking the vault zeroizes the key; every store operation that touches
//! ciphertext goes through [`Vault::with_key`] and fails with
//! [`StoreError::VaultLocked`] once the key is gone.

use std::sync::Arc;
use tokio::sync::RwLock;
use zeroize::ZeroizeOnDrop;

use axo_crypto::kdf::{generate_salt, vault_key_from_password};

use crate::error::StoreError;

#[derive(ZeroizeOnDrop)]
struct VaultInner {
    key: [u8; 32],
}

/// Thread-safe vault handle.  Clone to share across tasks.
#[derive(Clone)]
pub struct Vault {
    inner: Arc<RwLock<Option<VaultInner>>>,
}

impl Vault {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(None)),
        }
    }

    /// Unlock the vault with the given password and salt.
    /// Call before any store read or write.
    pub async fn unlock(&self, password: &[u8], salt: &[u8; 16]) -> Result<(), StoreError> {
        let vault_key = vault_key_from_password(password, salt)?;
        let mut guard = self.inner.write().await;
        *guard = Some(VaultInner { key: vault_key.0 });
        Ok(())
    }

    /// Unlock with an existing key (e.g., from a platform keyring).
    pub async fn unlock_with_key(&self, key: [u8; 32]) {
        let mut guard = self.inner.write().await;
        *guard = Some(VaultInner { key });
    }

    /// Lock the vault. Zeroizes the key.
    pub async fn lock(&self) {
        let mut guard = self.inner.write().await;
        *guard = None;
    }

    pub async fn is_locked(&self) -> bool {
        self.inner.read().await.is_none()
    }

    /// Access the raw key for an encrypt/decrypt operation.
    /// Returns Err if the vault is locked.
    pub async fn with_key<F, R>(&self, f: F) -> Result<R, StoreError>
    where
        F: FnOnce(&[u8; 32]) -> Result<R, StoreError>,
    {
        let guard = self.inner.read().await;
        match guard.as_ref() {
            Some(inner) => f(&inner.key),
            None => Err(StoreError::VaultLocked),
        }
    }
}

impl Default for Vault {
    fn default() -> Self {
        Self::new()
    }
}

/// Generate a fresh salt for a new profile.  Stored alongside the DB, not secret.
pub fn new_vault_salt() -> [u8; 16] {
    generate_salt()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn starts_locked_and_unlocks_with_key() {
        let vault = Vault::new();
        assert!(vault.is_locked().await);

        vault.unlock_with_key([7u8; 32]).await;
        assert!(!vault.is_locked().await);
        let byte = vault.with_key(|k| Ok(k[0])).await.unwrap();
        assert_eq!(byte, 7);
    }

    #[tokio::test]
    async fn locking_denies_key_access() {
        let vault = Vault::new();
        vault.unlock_with_key([7u8; 32]).await;
        vault.lock().await;
        assert!(matches!(
            vault.with_key(|_| Ok(())).await,
            Err(StoreError::VaultLocked)
        ));
    }

    #[tokio::test]
    async fn same_password_and_salt_derive_the_same_key() {
        let salt = new_vault_salt();
        let a = Vault::new();
        let b = Vault::new();
        a.unlock(b"correct horse", &salt).await.unwrap();
        b.unlock(b"correct horse", &salt).await.unwrap();
        let ka = a.with_key(|k| Ok(*k)).await.unwrap();
        let kb = b.with_key(|k| Ok(*k)).await.unwrap();
        assert_eq!(ka, kb);
    }
}
