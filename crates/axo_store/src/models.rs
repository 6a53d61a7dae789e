//! Database row models - these map to/from SQL rows.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ConversationRow {
    /// Conversation id as derived by the ratchet layer (hex, 64 chars).
    pub id: String,
    /// Vault-encrypted conversation state blob, base64.
    pub state_enc: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
