//! `RuleStore` trait: the single async interface to persisted rules.

use async_trait::async_trait;

use crate::error::DatabaseError;
use crate::pipeline::rules::{BleepRule, Rule};

/// Backend-agnostic storage of forwarding and bleep rules.
///
/// The store owns the source-of-truth records; the router only reads from it
/// when building a snapshot.
#[async_trait]
pub trait RuleStore: Send + Sync {
    /// Run all pending schema migrations.
    async fn run_migrations(&self) -> Result<(), DatabaseError>;

    // ── Forwarding rules ────────────────────────────────────────────

    /// Every rule, trash bin included, ordered by uid.
    async fn load_rules(&self) -> Result<Vec<Rule>, DatabaseError>;

    /// Rules whose status is `active`, ordered by uid.
    async fn load_active_rules(&self) -> Result<Vec<Rule>, DatabaseError>;

    /// Set a rule's status. Fails with `NotFound` for an unknown uid.
    async fn update_rule_status(&self, uid: i64, status: &str) -> Result<(), DatabaseError>;

    /// Atomically replace the whole rule set. A uid of 0 is assigned by the
    /// store. Returns the number of rules stored.
    async fn replace_rules(&self, rules: &[Rule]) -> Result<usize, DatabaseError>;

    // ── Bleep rules ─────────────────────────────────────────────────

    /// Every bleep rule, ordered by uid.
    async fn load_bleep_rules(&self) -> Result<Vec<BleepRule>, DatabaseError>;

    /// Atomically replace the whole bleep rule set.
    async fn replace_bleep_rules(&self, rules: &[BleepRule]) -> Result<usize, DatabaseError>;
}
