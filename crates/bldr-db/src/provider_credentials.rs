use rusqlite::{OptionalExtension, params};
use serde::{Deserialize, Serialize};

use bldr_llm::now_ms;

use crate::database::Database;
use crate::error::Result;

/// A stored API key for one model provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderCredential {
    pub provider_id: String,
    pub credential_value: String,
    pub created_at_ms: i64,
    pub updated_at_ms: i64,
}

pub struct ProviderCredentials<'db> {
    pub(crate) db: &'db mut Database,
}

impl ProviderCredentials<'_> {
    pub fn get(&self, provider_id: &str) -> Result<Option<String>> {
        self.db
            .conn
            .query_row(
                "SELECT credential_value FROM provider_credentials WHERE provider_id = ?1",
                params![provider_id],
                |row| row.get(0),
            )
            .optional()
            .map_err(Into::into)
    }

    /// Stored provider ids, without their secrets.
    pub fn list(&self) -> Result<Vec<ProviderCredential>> {
        let mut stmt = self.db.conn.prepare(
            "SELECT provider_id, created_at_ms, updated_at_ms
             FROM provider_credentials
             ORDER BY provider_id",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(ProviderCredential {
                provider_id: row.get(0)?,
                credential_value: String::new(),
                created_at_ms: row.get(1)?,
                updated_at_ms: row.get(2)?,
            })
        })?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(Into::into)
    }

    pub fn upsert(&mut self, provider_id: &str, credential_value: &str) -> Result<()> {
        let now = now_ms();
        self.db.conn.execute(
            "INSERT INTO provider_credentials (
                provider_id, credential_value, created_at_ms, updated_at_ms
             ) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(provider_id) DO UPDATE SET
                credential_value = excluded.credential_value,
                updated_at_ms = excluded.updated_at_ms",
            params![provider_id, credential_value, now, now],
        )?;
        Ok(())
    }

    pub fn remove(&mut self, provider_id: &str) -> Result<bool> {
        let removed = self.db.conn.execute(
            "DELETE FROM provider_credentials WHERE provider_id = ?1",
            params![provider_id],
        )?;
        Ok(removed > 0)
    }
}
