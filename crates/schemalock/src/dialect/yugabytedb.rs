//! YugabyteDB dialect.
//!
//! YugabyteDB speaks the PostgreSQL wire protocol but has no session-level
//! advisory locks, so migration runners coordinate through a lock table.
//! Plain PostgreSQL URLs resolve here as well.

use super::{baseline_statement, Dialect};

/// YugabyteDB (and generic PostgreSQL-wire) dialect.
#[derive(Debug, Clone, Copy, Default)]
pub struct YugabyteDbDialect;

impl YugabyteDbDialect {
    /// Creates a new YugabyteDB dialect.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl Dialect for YugabyteDbDialect {
    fn name(&self) -> &'static str {
        "yugabytedb"
    }

    fn url_prefixes(&self) -> &'static [&'static str] {
        &["yugabytedb:", "postgresql:", "postgres:", "p6spy:postgresql:"]
    }

    fn placeholder(&self, index: usize) -> String {
        format!("${index}")
    }

    fn text_type(&self) -> &'static str {
        "VARCHAR"
    }

    fn is_retryable(&self, code: &str) -> bool {
        // serialization_failure, deadlock_detected
        matches!(code, "40001" | "40P01")
    }

    fn history_table_ddl(&self, table: &str, baseline: bool) -> String {
        postgres_family_history_ddl(self, table, baseline)
    }
}

/// History table DDL shared by PostgreSQL-compatible dialects.
pub(super) fn postgres_family_history_ddl(
    dialect: &dyn Dialect,
    table: &str,
    baseline: bool,
) -> String {
    let quoted = dialect.quote_identifier(table);
    let mut sql = format!(
        "CREATE TABLE IF NOT EXISTS {quoted} (\n\
         \x20   \"installed_rank\" INT NOT NULL PRIMARY KEY,\n\
         \x20   \"version\" VARCHAR(50),\n\
         \x20   \"description\" VARCHAR(200) NOT NULL,\n\
         \x20   \"type\" VARCHAR(20) NOT NULL,\n\
         \x20   \"script\" VARCHAR(1000) NOT NULL,\n\
         \x20   \"checksum\" INTEGER,\n\
         \x20   \"installed_by\" VARCHAR(100) NOT NULL,\n\
         \x20   \"installed_on\" TIMESTAMP NOT NULL DEFAULT now(),\n\
         \x20   \"execution_time\" INTEGER NOT NULL,\n\
         \x20   \"success\" BOOLEAN NOT NULL\n\
         );\n"
    );
    if baseline {
        sql.push_str(&baseline_statement(&quoted, dialect.bool_literal(true)));
        sql.push_str(";\n");
    }
    sql.push_str(&format!(
        "CREATE INDEX IF NOT EXISTS {} ON {quoted} (\"success\");",
        dialect.quote_identifier(&format!("{table}_s_idx"))
    ));
    sql
}
