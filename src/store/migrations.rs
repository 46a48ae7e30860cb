//! Version-tracked database migrations for the libSQL backend.
//!
//! Each migration has a version number and SQL. `run_migrations()` checks
//! the current version and applies only the new ones sequentially.

use libsql::Connection;

use crate::error::DatabaseError;

/// A single migration step.
struct Migration {
    version: i64,
    name: &'static str,
    sql: &'static str,
}

/// All migrations in order. Add new versions to the end.
static MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "rules_schema",
        sql: r#"
            CREATE TABLE IF NOT EXISTS rules (
                uid INTEGER PRIMARY KEY AUTOINCREMENT,
                recip_name TEXT NOT NULL DEFAULT '',
                recip_id INTEGER NOT NULL DEFAULT 0,
                donor_name TEXT NOT NULL DEFAULT '',
                donor_id INTEGER NOT NULL DEFAULT 0,
                sender_fname TEXT NOT NULL DEFAULT '',
                sender_lname TEXT NOT NULL DEFAULT '',
                sender_uname TEXT NOT NULL DEFAULT '',
                sender_id INTEGER NOT NULL DEFAULT 0,
                filter TEXT NOT NULL DEFAULT '',
                black_list TEXT NOT NULL DEFAULT '',
                and_list TEXT NOT NULL DEFAULT '',
                or_list TEXT NOT NULL DEFAULT '',
                format TEXT NOT NULL DEFAULT 'm',
                title TEXT NOT NULL DEFAULT '',
                status TEXT NOT NULL DEFAULT '',
                user_id INTEGER NOT NULL DEFAULT 0
            );
            CREATE INDEX IF NOT EXISTS idx_rules_donor ON rules(donor_id);
            CREATE INDEX IF NOT EXISTS idx_rules_status ON rules(status);
        "#,
    },
    Migration {
        version: 2,
        name: "bleep_rules",
        sql: r#"
            CREATE TABLE IF NOT EXISTS bleep_rules (
                uid INTEGER PRIMARY KEY AUTOINCREMENT,
                donor_name TEXT NOT NULL DEFAULT '',
                donor_id INTEGER NOT NULL DEFAULT 0,
                black_list TEXT NOT NULL DEFAULT '',
                status TEXT NOT NULL DEFAULT '',
                bleep_symbol TEXT NOT NULL DEFAULT '*',
                bleep_action TEXT NOT NULL DEFAULT '',
                action_format TEXT NOT NULL DEFAULT ''
            );
            CREATE INDEX IF NOT EXISTS idx_bleep_rules_donor ON bleep_rules(donor_id);
        "#,
    },
];

/// Run all pending migrations.
///
/// Creates the `_migrations` tracking table if needed, then applies every
/// migration newer than the recorded version.
pub async fn run_migrations(conn: &Connection) -> Result<(), DatabaseError> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS _migrations (
            version INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        )",
        (),
    )
    .await
    .map_err(|e| DatabaseError::Migration(format!("Failed to create _migrations table: {e}")))?;

    let current_version = get_current_version(conn).await?;

    for migration in MIGRATIONS {
        if migration.version > current_version {
            tracing::info!(
                version = migration.version,
                name = migration.name,
                "Applying migration"
            );
            conn.execute_batch(migration.sql).await.map_err(|e| {
                DatabaseError::Migration(format!(
                    "Migration V{} ({}) failed: {e}",
                    migration.version, migration.name
                ))
            })?;
            seed_version(conn, migration.version, migration.name).await?;
        }
    }

    let version = get_current_version(conn).await?;
    tracing::debug!(version, "Database migrations complete");
    Ok(())
}

/// Get the highest applied migration version, or 0 if none.
async fn get_current_version(conn: &Connection) -> Result<i64, DatabaseError> {
    let mut rows = conn
        .query("SELECT COALESCE(MAX(version), 0) FROM _migrations", ())
        .await
        .map_err(|e| DatabaseError::Migration(format!("Failed to query migration version: {e}")))?;

    let row = rows
        .next()
        .await
        .map_err(|e| DatabaseError::Migration(format!("Failed to read migration version: {e}")))?;

    match row {
        Some(row) => row.get(0).map_err(|e| {
            DatabaseError::Migration(format!("Failed to parse migration version: {e}"))
        }),
        None => Ok(0),
    }
}

/// Insert a version record into `_migrations`.
async fn seed_version(conn: &Connection, version: i64, name: &str) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT OR IGNORE INTO _migrations (version, name) VALUES (?1, ?2)",
        libsql::params![version, name],
    )
    .await
    .map_err(|e| DatabaseError::Migration(format!("Failed to record migration V{version}: {e}")))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn test_conn() -> Connection {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .unwrap();
        db.connect().unwrap()
    }

    async fn table_exists(conn: &Connection, table: &str) -> bool {
        let mut rows = conn
            .query(
                "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name=?1",
                libsql::params![table],
            )
            .await
            .unwrap();
        let row = rows.next().await.unwrap().unwrap();
        let count: i64 = row.get(0).unwrap();
        count == 1
    }

    #[tokio::test]
    async fn migrations_create_all_tables() {
        let conn = test_conn().await;
        run_migrations(&conn).await.unwrap();

        for table in ["rules", "bleep_rules", "_migrations"] {
            assert!(table_exists(&conn, table).await, "Table '{table}' should exist");
        }
    }

    #[tokio::test]
    async fn migrations_are_idempotent() {
        let conn = test_conn().await;
        run_migrations(&conn).await.unwrap();
        run_migrations(&conn).await.unwrap();

        let version = get_current_version(&conn).await.unwrap();
        assert_eq!(version, 2);
    }

    #[tokio::test]
    async fn version_tracking() {
        let conn = test_conn().await;
        run_migrations(&conn).await.unwrap();

        let mut rows = conn
            .query("SELECT version, name FROM _migrations ORDER BY version", ())
            .await
            .unwrap();
        let row1 = rows.next().await.unwrap().unwrap();
        assert_eq!(row1.get::<i64>(0).unwrap(), 1);
        assert_eq!(row1.get::<String>(1).unwrap(), "rules_schema");

        let row2 = rows.next().await.unwrap().unwrap();
        assert_eq!(row2.get::<i64>(0).unwrap(), 2);
        assert_eq!(row2.get::<String>(1).unwrap(), "bleep_rules");
    }

    #[tokio::test]
    async fn partial_database_gets_remaining_migrations() {
        let conn = test_conn().await;
        conn.execute_batch(
            "CREATE TABLE _migrations (
                version INTEGER PRIMARY KEY,
                name TEXT NOT NULL,
                applied_at TEXT NOT NULL DEFAULT (datetime('now'))
            );",
        )
        .await
        .unwrap();
        conn.execute_batch(MIGRATIONS[0].sql).await.unwrap();
        seed_version(&conn, 1, "rules_schema").await.unwrap();
        assert!(!table_exists(&conn, "bleep_rules").await);

        run_migrations(&conn).await.unwrap();
        assert!(table_exists(&conn, "bleep_rules").await);
    }
}
