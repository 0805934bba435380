use bldr_core::{BuildProgress, BuildStatus};
use bldr_llm::now_ms;
use rusqlite::types::Type;
use rusqlite::{OptionalExtension, params};

use crate::database::Database;
use crate::error::Result;

/// Build progress records, one row per build.
pub struct Builds<'db> {
    pub(crate) db: &'db mut Database,
}

impl Builds<'_> {
    pub fn save(&mut self, progress: &BuildProgress) -> Result<()> {
        let progress_json = serde_json::to_string(progress)?;
        self.db.conn.execute(
            "INSERT INTO builds (
                id, project_id, conversation_id, status, progress_json, started_at_ms, updated_at_ms
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(id) DO UPDATE SET
                status = excluded.status,
                progress_json = excluded.progress_json,
                updated_at_ms = excluded.updated_at_ms",
            params![
                progress.build_id,
                progress.project_id,
                progress.conversation_id,
                progress.status.as_str(),
                progress_json,
                progress.started_at_ms,
                progress.updated_at_ms,
            ],
        )?;
        Ok(())
    }

    pub fn get(&self, build_id: &str) -> Result<Option<BuildProgress>> {
        self.db
            .conn
            .query_row(
                "SELECT progress_json FROM builds WHERE id = ?1",
                params![build_id],
                parse_progress,
            )
            .optional()
            .map_err(Into::into)
    }

    /// Most recent build of a project.
    pub fn latest_for_project(&self, project_id: &str) -> Result<Option<BuildProgress>> {
        self.db
            .conn
            .query_row(
                "SELECT progress_json FROM builds
                 WHERE project_id = ?1
                 ORDER BY started_at_ms DESC
                 LIMIT 1",
                params![project_id],
                parse_progress,
            )
            .optional()
            .map_err(Into::into)
    }

    /// Most recent build of a project that has not finished, whichever
    /// process started it.
    pub fn active_for_project(&self, project_id: &str) -> Result<Option<BuildProgress>> {
        self.db
            .conn
            .query_row(
                "SELECT progress_json FROM builds
                 WHERE project_id = ?1 AND status NOT IN ('completed', 'error')
                 ORDER BY started_at_ms DESC
                 LIMIT 1",
                params![project_id],
                parse_progress,
            )
            .optional()
            .map_err(Into::into)
    }

    /// Mark builds left unfinished by a previous process as failed. Returns
    /// how many were updated.
    pub fn fail_interrupted(&mut self, reason: &str) -> Result<usize> {
        let tx = self.db.conn.transaction()?;
        let unfinished = {
            let mut stmt = tx.prepare(
                "SELECT progress_json FROM builds WHERE status NOT IN ('completed', 'error')",
            )?;
            stmt.query_map([], parse_progress)?
                .collect::<rusqlite::Result<Vec<_>>>()?
        };

        for mut progress in unfinished.iter().cloned() {
            progress.record_error(reason);
            if progress.advance(BuildStatus::Error, reason).is_err() {
                continue;
            }
            progress.updated_at_ms = now_ms();
            tx.execute(
                "UPDATE builds SET status = ?2, progress_json = ?3, updated_at_ms = ?4 WHERE id = ?1",
                params![
                    progress.build_id,
                    progress.status.as_str(),
                    serde_json::to_string(&progress)?,
                    progress.updated_at_ms,
                ],
            )?;
        }
        tx.commit()?;
        Ok(unfinished.len())
    }
}

fn parse_progress(row: &rusqlite::Row<'_>) -> rusqlite::Result<BuildProgress> {
    let raw: String = row.get(0)?;
    serde_json::from_str(&raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(0, Type::Text, Box::new(e)))
}
