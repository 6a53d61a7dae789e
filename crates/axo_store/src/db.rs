//! Database abstraction over SQLite via sqlx.

use std::path::Path;

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::Utc;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool};
use tracing::debug;

use axo_crypto::Conversation;

use crate::{error::StoreError, models::ConversationRow, vault::Vault};

/// Central store handle.  Cheap to clone (Arc internally).
#[derive(Clone)]
pub struct Store {
    pub pool: SqlitePool,
    pub vault: Vault,
}

impl Store {
    /// Open (or create) the SQLite database at `db_path`.
    /// Runs all pending migrations automatically.
    ///
    /// WAL journal mode and foreign-key enforcement are configured at
    /// connection time here, NOT inside a migration: SQLite forbids changing
    /// `journal_mode` inside a transaction and sqlx wraps every migration
    /// in one.
    pub async fn open(db_path: &Path, vault: Vault) -> Result<Self, StoreError> {
        let opts = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .foreign_keys(true);

        let pool = SqlitePool::connect_with(opts).await?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(|e| StoreError::Migration(e.to_string()))?;

        debug!(path = %db_path.display(), "store opened");
        Ok(Self { pool, vault })
    }

    // ── Conversations ────────────────────────────────────────────────────

    /// Persist a conversation under its own id, replacing any previous
    /// snapshot. The state blob is encrypted with the vault key before it
    /// touches the database.
    pub async fn save_conversation(&self, conversation: &Conversation) -> Result<(), StoreError> {
        let blob = conversation.to_blob()?;
        let state_enc = self.encrypt_value(&blob).await?;
        let now = Utc::now();

        sqlx::query(
            "INSERT INTO conversations (id, state_enc, created_at, updated_at)
             VALUES (?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET state_enc = excluded.state_enc,
                                           updated_at = excluded.updated_at",
        )
        .bind(conversation.id())
        .bind(&state_enc)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;

        debug!(conversation = conversation.id(), "conversation saved");
        Ok(())
    }

    /// Load and decrypt a conversation by id.
    pub async fn load_conversation(&self, id: &str) -> Result<Conversation, StoreError> {
        let row: Option<ConversationRow> =
            sqlx::query_as("SELECT * FROM conversations WHERE id = ?")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;

        let row = row.ok_or_else(|| StoreError::NotFound(id.to_owned()))?;
        let blob = self.decrypt_value(&row.state_enc).await?;
        Ok(Conversation::from_blob(&blob)?)
    }

    /// Delete a conversation and its key material from disk. Idempotent:
    /// deleting an unknown id is not an error.
    pub async fn delete_conversation(&self, id: &str) -> Result<(), StoreError> {
        let result = sqlx::query("DELETE FROM conversations WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        debug!(
            conversation = id,
            deleted = result.rows_affected(),
            "conversation deleted"
        );
        Ok(())
    }

    /// Ids of all stored conversations. Metadata only, no vault needed.
    pub async fn list_conversation_ids(&self) -> Result<Vec<String>, StoreError> {
        let ids = sqlx::query_scalar("SELECT id FROM conversations ORDER BY updated_at DESC")
            .fetch_all(&self.pool)
            .await?;
        Ok(ids)
    }

    // ── Helpers ──────────────────────────────────────────────────────────

    /// Encrypt a plaintext value with the vault key.
    pub async fn encrypt_value(&self, plaintext: &[u8]) -> Result<String, StoreError> {
        self.vault
            .with_key(|key| {
                let ct = axo_crypto::aead::encrypt(key, plaintext).map_err(StoreError::Crypto)?;
                Ok(URL_SAFE_NO_PAD.encode(ct))
            })
            .await
    }

    /// Decrypt a vault-encrypted value.
    pub async fn decrypt_value(&self, b64: &str) -> Result<Vec<u8>, StoreError> {
        let ct = URL_SAFE_NO_PAD
            .decode(b64)
            .map_err(|e| StoreError::Crypto(axo_crypto::CryptoError::Base64Decode(e)))?;

        self.vault
            .with_key(|key| {
                let pt = axo_crypto::aead::decrypt(key, &ct).map_err(StoreError::Crypto)?;
                Ok(pt.to_vec())
            })
            .await
    }
}
