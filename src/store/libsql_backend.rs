//! libSQL backend: async `RuleStore` implementation.
//!
//! Supports local file and in-memory databases.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use libsql::{Connection, Database as LibSqlDatabase, params};
use tracing::{debug, info};

use crate::error::DatabaseError;
use crate::pipeline::rules::{BleepRule, Rule, STATUS_ACTIVE};
use crate::store::migrations;
use crate::store::traits::RuleStore;

/// libSQL database backend.
///
/// Stores a single connection that is reused for all operations.
pub struct LibSqlBackend {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
}

impl LibSqlBackend {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Pool(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to open libSQL database: {e}")))?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;

        let backend = Self {
            db: Arc::new(db),
            conn,
        };
        backend.run_migrations().await?;
        info!(path = %path.display(), "Database opened");
        Ok(backend)
    }

    /// Create an in-memory database (for tests and dry runs).
    pub async fn new_memory() -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                DatabaseError::Pool(format!("Failed to create in-memory database: {e}"))
            })?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;

        let backend = Self {
            db: Arc::new(db),
            conn,
        };
        backend.run_migrations().await?;
        Ok(backend)
    }

    fn conn(&self) -> &Connection {
        &self.conn
    }

    async fn query_rules(&self, sql: &str, op: &str) -> Result<Vec<Rule>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(sql, ())
            .await
            .map_err(|e| DatabaseError::Query(format!("{op}: {e}")))?;

        let mut rules = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("{op}: {e}")))?
        {
            match row_to_rule(&row) {
                Ok(rule) => rules.push(rule),
                Err(e) => tracing::warn!("Skipping rule row: {e}"),
            }
        }
        Ok(rules)
    }
}

// ── Row mapping ─────────────────────────────────────────────────────

const RULE_COLUMNS: &str = "uid, recip_name, recip_id, donor_name, donor_id, sender_fname, sender_lname, sender_uname, sender_id, filter, black_list, and_list, or_list, format, title, status, user_id";

const BLEEP_COLUMNS: &str =
    "uid, donor_name, donor_id, black_list, status, bleep_symbol, bleep_action, action_format";

fn row_to_rule(row: &libsql::Row) -> Result<Rule, libsql::Error> {
    Ok(Rule {
        uid: row.get(0)?,
        recip_name: row.get(1)?,
        recip_id: row.get(2)?,
        donor_name: row.get(3)?,
        donor_id: row.get(4)?,
        sender_fname: row.get(5)?,
        sender_lname: row.get(6)?,
        sender_uname: row.get(7)?,
        sender_id: row.get(8)?,
        filter: row.get(9)?,
        black_list: row.get(10)?,
        and_list: row.get(11)?,
        or_list: row.get(12)?,
        format: row.get(13)?,
        title: row.get(14)?,
        status: row.get(15)?,
        user_id: row.get(16)?,
    })
}

fn row_to_bleep(row: &libsql::Row) -> Result<BleepRule, libsql::Error> {
    Ok(BleepRule {
        uid: row.get(0)?,
        donor_name: row.get(1)?,
        donor_id: row.get(2)?,
        black_list: row.get(3)?,
        status: row.get(4)?,
        bleep_symbol: row.get(5)?,
        bleep_action: row.get(6)?,
        action_format: row.get(7)?,
    })
}

// ── Trait implementation ────────────────────────────────────────────

#[async_trait]
impl RuleStore for LibSqlBackend {
    async fn run_migrations(&self) -> Result<(), DatabaseError> {
        migrations::run_migrations(self.conn()).await
    }

    async fn load_rules(&self) -> Result<Vec<Rule>, DatabaseError> {
        self.query_rules(
            &format!("SELECT {RULE_COLUMNS} FROM rules ORDER BY uid ASC"),
            "load_rules",
        )
        .await
    }

    async fn load_active_rules(&self) -> Result<Vec<Rule>, DatabaseError> {
        self.query_rules(
            &format!(
                "SELECT {RULE_COLUMNS} FROM rules WHERE lower(trim(status)) = '{STATUS_ACTIVE}' ORDER BY uid ASC"
            ),
            "load_active_rules",
        )
        .await
    }

    async fn update_rule_status(&self, uid: i64, status: &str) -> Result<(), DatabaseError> {
        let changed = self
            .conn()
            .execute(
                "UPDATE rules SET status = ?1 WHERE uid = ?2",
                params![status, uid],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("update_rule_status: {e}")))?;

        if changed == 0 {
            return Err(DatabaseError::NotFound {
                entity: "rule".into(),
                id: uid.to_string(),
            });
        }
        debug!(uid, status, "Rule status updated");
        Ok(())
    }

    async fn replace_rules(&self, rules: &[Rule]) -> Result<usize, DatabaseError> {
        let tx = self
            .conn()
            .transaction()
            .await
            .map_err(|e| DatabaseError::Query(format!("replace_rules begin: {e}")))?;

        tx.execute("DELETE FROM rules", ())
            .await
            .map_err(|e| DatabaseError::Query(format!("replace_rules delete: {e}")))?;

        for rule in rules {
            tx.execute(
                &format!(
                    "INSERT INTO rules ({RULE_COLUMNS}) VALUES (NULLIF(?1, 0), ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)"
                ),
                params![
                    rule.uid,
                    rule.recip_name.as_str(),
                    rule.recip_id,
                    rule.donor_name.as_str(),
                    rule.donor_id,
                    rule.sender_fname.as_str(),
                    rule.sender_lname.as_str(),
                    rule.sender_uname.as_str(),
                    rule.sender_id,
                    rule.filter.as_str(),
                    rule.black_list.as_str(),
                    rule.and_list.as_str(),
                    rule.or_list.as_str(),
                    rule.format.as_str(),
                    rule.title.as_str(),
                    rule.status.as_str(),
                    rule.user_id,
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("replace_rules insert #{}: {e}", rule.uid)))?;
        }

        tx.commit()
            .await
            .map_err(|e| DatabaseError::Query(format!("replace_rules commit: {e}")))?;

        info!(count = rules.len(), "Rules replaced");
        Ok(rules.len())
    }

    async fn load_bleep_rules(&self) -> Result<Vec<BleepRule>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {BLEEP_COLUMNS} FROM bleep_rules ORDER BY uid ASC"),
                (),
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("load_bleep_rules: {e}")))?;

        let mut rules = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("load_bleep_rules: {e}")))?
        {
            match row_to_bleep(&row) {
                Ok(rule) => rules.push(rule),
                Err(e) => tracing::warn!("Skipping bleep rule row: {e}"),
            }
        }
        Ok(rules)
    }

    async fn replace_bleep_rules(&self, rules: &[BleepRule]) -> Result<usize, DatabaseError> {
        let tx = self
            .conn()
            .transaction()
            .await
            .map_err(|e| DatabaseError::Query(format!("replace_bleep_rules begin: {e}")))?;

        tx.execute("DELETE FROM bleep_rules", ())
            .await
            .map_err(|e| DatabaseError::Query(format!("replace_bleep_rules delete: {e}")))?;

        for rule in rules {
            tx.execute(
                &format!(
                    "INSERT INTO bleep_rules ({BLEEP_COLUMNS}) VALUES (NULLIF(?1, 0), ?2, ?3, ?4, ?5, ?6, ?7, ?8)"
                ),
                params![
                    rule.uid,
                    rule.donor_name.as_str(),
                    rule.donor_id,
                    rule.black_list.as_str(),
                    rule.status.as_str(),
                    rule.bleep_symbol.as_str(),
                    rule.bleep_action.as_str(),
                    rule.action_format.as_str(),
                ],
            )
            .await
            .map_err(|e| {
                DatabaseError::Query(format!("replace_bleep_rules insert #{}: {e}", rule.uid))
            })?;
        }

        tx.commit()
            .await
            .map_err(|e| DatabaseError::Query(format!("replace_bleep_rules commit: {e}")))?;

        info!(count = rules.len(), "Bleep rules replaced");
        Ok(rules.len())
    }
}
