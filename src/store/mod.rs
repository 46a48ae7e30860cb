//! Persistence layer: libSQL-backed rule storage and CSV interchange.

pub mod libsql_backend;
pub mod migrations;
pub mod rules_io;
pub mod traits;

pub use libsql_backend::LibSqlBackend;
pub use rules_io::{CsvKind, ImportSummary, export_bleep_rules, export_rules, import_csv};
pub use traits::RuleStore;
