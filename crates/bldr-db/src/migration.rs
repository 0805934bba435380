use rusqlite::Connection;

use crate::error::Result;

struct Migration {
    version: i64,
    sql: &'static str,
}

const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        sql: include_str!("../migrations/0001_init.sql"),
    },
    Migration {
        version: 2,
        sql: include_str!("../migrations/0002_builds.sql"),
    },
    Migration {
        version: 3,
        sql: include_str!("../migrations/0003_provider_credentials.sql"),
    },
];

/// Bring the schema up to date. Returns the resulting schema version.
pub(crate) fn apply(conn: &mut Connection) -> Result<i64> {
    let mut version: i64 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;

    let current = version;
    for migration in MIGRATIONS.iter().filter(|m| m.version > current) {
        let tx = conn.transaction()?;
        tx.execute_batch(migration.sql)?;
        tx.pragma_update(None, "user_version", migration.version)?;
        tx.commit()?;
        tracing::info!(version = migration.version, "applied database migration");
        version = migration.version;
    }

    Ok(version)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn migrations_are_applied_once() {
        let mut conn = Connection::open_in_memory().expect("open");
        assert_eq!(apply(&mut conn).expect("first"), 3);
        assert_eq!(apply(&mut conn).expect("second"), 3);

        let tables: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master
                 WHERE type = 'table'
                   AND name IN ('conversations', 'messages', 'checkpoints', 'builds', 'provider_credentials')",
                [],
                |row| row.get(0),
            )
            .expect("count");
        assert_eq!(tables, 5);
    }
}
