use bldr_core::{Checkpoint, Conversation, ConversationSummary, title_from_prompt};
use bldr_llm::{Message, Role, now_ms};
use rusqlite::types::Type;
use rusqlite::{OptionalExtension, Row, Transaction, params};

use crate::database::Database;
use crate::error::{Error, Result};

pub struct Conversations<'db> {
    pub(crate) db: &'db mut Database,
}

impl Conversations<'_> {
    pub fn create(&mut self, title: Option<&str>) -> Result<Conversation> {
        let now = now_ms();
        let conversation = Conversation {
            id: bldr_core::conversation::new_id(),
            title: title.map(title_from_prompt).unwrap_or_default(),
            messages: Vec::new(),
            last_activity: now,
        };
        self.db.conn.execute(
            "INSERT INTO conversations (id, title, created_at_ms, last_activity_ms)
             VALUES (?1, ?2, ?3, ?4)",
            params![conversation.id, conversation.title, now, now],
        )?;
        Ok(conversation)
    }

    pub fn append(&mut self, conversation_id: &str, message: &Message) -> Result<()> {
        let tx = self.db.conn.transaction()?;
        let position = message_count(&tx, conversation_id)?;

        let attachments_json = serde_json::to_string(&message.attachments)?;
        let actions_json = serde_json::to_string(&message.actions)?;
        let metadata_json = message
            .metadata
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        tx.execute(
            "INSERT INTO messages (
                conversation_id, position, id, role, content, timestamp_ms,
                attachments_json, actions_json, metadata_json
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                conversation_id,
                position as i64,
                message.id,
                message.role.as_str(),
                message.content,
                message.timestamp,
                attachments_json,
                actions_json,
                metadata_json,
            ],
        )?;
        if message.role == Role::User {
            tx.execute(
                "UPDATE conversations SET title = ?2 WHERE id = ?1 AND title = ''",
                params![conversation_id, title_from_prompt(&message.content)],
            )?;
        }
        tx.execute(
            "UPDATE conversations SET last_activity_ms = ?2 WHERE id = ?1",
            params![conversation_id, now_ms()],
        )?;
        tx.commit()?;
        Ok(())
    }

    /// Truncate to just before `message_id`; returns the new message count.
    pub fn rollback(&mut self, conversation_id: &str, message_id: &str) -> Result<usize> {
        let position: Option<i64> = self
            .db
            .conn
            .query_row(
                "SELECT position FROM messages WHERE conversation_id = ?1 AND id = ?2",
                params![conversation_id, message_id],
                |row| row.get(0),
            )
            .optional()?;
        let Some(position) = position else {
            self.require(conversation_id)?;
            return Err(Error::MessageNotFound {
                conversation_id: conversation_id.to_string(),
                message_id: message_id.to_string(),
            });
        };
        let index = position as usize;
        self.rollback_to_index(conversation_id, index)?;
        Ok(index)
    }

    pub fn rollback_to_index(&mut self, conversation_id: &str, index: usize) -> Result<()> {
        let tx = self.db.conn.transaction()?;
        let len = message_count(&tx, conversation_id)?;
        if index > len {
            return Err(Error::InvalidRollback {
                conversation_id: conversation_id.to_string(),
                index,
                len,
            });
        }
        tx.execute(
            "DELETE FROM messages WHERE conversation_id = ?1 AND position >= ?2",
            params![conversation_id, index as i64],
        )?;
        tx.execute(
            "DELETE FROM checkpoints WHERE conversation_id = ?1 AND message_index > ?2",
            params![conversation_id, index as i64],
        )?;
        tx.commit()?;
        Ok(())
    }

    pub fn get(&self, conversation_id: &str) -> Result<Option<Conversation>> {
        let header = self
            .db
            .conn
            .query_row(
                "SELECT id, title, last_activity_ms FROM conversations WHERE id = ?1",
                params![conversation_id],
                |row| Ok((row.get::<_, String>(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()?;
        let Some((id, title, last_activity)) = header else {
            return Ok(None);
        };

        let mut stmt = self.db.conn.prepare(
            "SELECT id, role, content, timestamp_ms, attachments_json, actions_json, metadata_json
             FROM messages
             WHERE conversation_id = ?1
             ORDER BY position ASC",
        )?;
        let messages = stmt
            .query_map(params![conversation_id], row_to_message)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(Some(Conversation {
            id,
            title,
            messages,
            last_activity,
        }))
    }

    /// Most recently active first.
    pub fn list(&self) -> Result<Vec<ConversationSummary>> {
        let mut stmt = self.db.conn.prepare(
            "SELECT c.id, c.title, c.last_activity_ms,
                    (SELECT COUNT(*) FROM messages m WHERE m.conversation_id = c.id)
             FROM conversations c
             ORDER BY c.last_activity_ms DESC, c.created_at_ms DESC",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(ConversationSummary {
                id: row.get(0)?,
                title: row.get(1)?,
                last_activity: row.get(2)?,
                message_count: row.get::<_, i64>(3)? as usize,
            })
        })?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(Into::into)
    }

    pub fn create_checkpoint(&mut self, conversation_id: &str) -> Result<Checkpoint> {
        let tx = self.db.conn.transaction()?;
        let checkpoint = Checkpoint {
            id: bldr_core::conversation::new_id(),
            conversation_id: conversation_id.to_string(),
            message_index: message_count(&tx, conversation_id)?,
            created_at_ms: now_ms(),
        };
        tx.execute(
            "INSERT INTO checkpoints (id, conversation_id, message_index, created_at_ms)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                checkpoint.id,
                checkpoint.conversation_id,
                checkpoint.message_index as i64,
                checkpoint.created_at_ms,
            ],
        )?;
        tx.commit()?;
        Ok(checkpoint)
    }

    pub fn checkpoints(&self, conversation_id: &str) -> Result<Vec<Checkpoint>> {
        self.require(conversation_id)?;
        let mut stmt = self.db.conn.prepare(
            "SELECT id, conversation_id, message_index, created_at_ms
             FROM checkpoints
             WHERE conversation_id = ?1
             ORDER BY message_index ASC, created_at_ms ASC",
        )?;
        let rows = stmt.query_map(params![conversation_id], |row| {
            Ok(Checkpoint {
                id: row.get(0)?,
                conversation_id: row.get(1)?,
                message_index: row.get::<_, i64>(2)? as usize,
                created_at_ms: row.get(3)?,
            })
        })?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(Into::into)
    }

    fn require(&self, conversation_id: &str) -> Result<()> {
        let exists: bool = self.db.conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM conversations WHERE id = ?1)",
            params![conversation_id],
            |row| row.get(0),
        )?;
        if exists {
            Ok(())
        } else {
            Err(Error::ConversationNotFound(conversation_id.to_string()))
        }
    }
}

/// Number of messages in the conversation; fails if it does not exist.
fn message_count(tx: &Transaction<'_>, conversation_id: &str) -> Result<usize> {
    let exists: bool = tx.query_row(
        "SELECT EXISTS(SELECT 1 FROM conversations WHERE id = ?1)",
        params![conversation_id],
        |row| row.get(0),
    )?;
    if !exists {
        return Err(Error::ConversationNotFound(conversation_id.to_string()));
    }
    let count: i64 = tx.query_row(
        "SELECT COUNT(*) FROM messages WHERE conversation_id = ?1",
        params![conversation_id],
        |row| row.get(0),
    )?;
    Ok(count as usize)
}

fn row_to_message(row: &Row<'_>) -> rusqlite::Result<Message> {
    let role: String = row.get(1)?;
    let role = match role.as_str() {
        "user" => Role::User,
        "assistant" => Role::Assistant,
        "system" => Role::System,
        other => {
            return Err(rusqlite::Error::FromSqlConversionFailure(
                1,
                Type::Text,
                format!("unknown role '{other}'").into(),
            ));
        }
    };
    let metadata_json: Option<String> = row.get(6)?;
    Ok(Message {
        id: row.get(0)?,
        role,
        content: row.get(2)?,
        timestamp: row.get(3)?,
        attachments: parse_json_column(row, 4)?,
        actions: parse_json_column(row, 5)?,
        metadata: metadata_json
            .map(|raw| serde_json::from_str(&raw))
            .transpose()
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(6, Type::Text, Box::new(e)))?,
    })
}

fn parse_json_column<T: serde::de::DeserializeOwned>(
    row: &Row<'_>,
    idx: usize,
) -> rusqlite::Result<T> {
    let raw: String = row.get(idx)?;
    serde_json::from_str(&raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}
