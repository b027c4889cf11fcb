//! SQLite dialect.
//!
//! SQLite has no row locks. `BEGIN IMMEDIATE` takes the database write lock
//! up front, which serialises the read-modify-write on the lock row the same
//! way `SELECT ... FOR UPDATE` does elsewhere. Contention surfaces as
//! `SQLITE_BUSY` once the busy timeout expires.

use super::{baseline_statement, Dialect};

/// SQLite dialect.
#[derive(Debug, Clone, Copy, Default)]
pub struct SqliteDialect;

impl SqliteDialect {
    /// Creates a new SQLite dialect.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl Dialect for SqliteDialect {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    fn url_prefixes(&self) -> &'static [&'static str] {
        &["sqlite:"]
    }

    fn begin_statement(&self) -> &'static str {
        "BEGIN IMMEDIATE"
    }

    fn for_update_clause(&self) -> &'static str {
        ""
    }

    fn text_type(&self) -> &'static str {
        "TEXT"
    }

    fn bigint_type(&self) -> &'static str {
        "INTEGER"
    }

    fn timestamp_type(&self) -> &'static str {
        "TEXT"
    }

    fn bool_literal(&self, value: bool) -> &'static str {
        if value { "1" } else { "0" }
    }

    fn lock_table_columns_query(&self, table: &str) -> String {
        format!(
            "SELECT LOWER(name) FROM pragma_table_info('{}')",
            table.replace('\'', "''")
        )
    }

    fn is_retryable(&self, code: &str) -> bool {
        // SQLITE_BUSY and SQLITE_LOCKED with their extended codes
        matches!(code, "5" | "6" | "261" | "262" | "517" | "773")
    }

    fn is_unique_violation(&self, code: &str) -> bool {
        // SQLITE_CONSTRAINT_PRIMARYKEY, SQLITE_CONSTRAINT_UNIQUE
        matches!(code, "1555" | "2067")
    }

    fn history_table_ddl(&self, table: &str, baseline: bool) -> String {
        let quoted = self.quote_identifier(table);
        let mut sql = format!(
            "CREATE TABLE IF NOT EXISTS {quoted} (\n\
             \x20   \"installed_rank\" INTEGER NOT NULL PRIMARY KEY,\n\
             \x20   \"version\" TEXT,\n\
             \x20   \"description\" TEXT NOT NULL,\n\
             \x20   \"type\" TEXT NOT NULL,\n\
             \x20   \"script\" TEXT NOT NULL,\n\
             \x20   \"checksum\" INTEGER,\n\
             \x20   \"installed_by\" TEXT NOT NULL,\n\
             \x20   \"installed_on\" TEXT NOT NULL DEFAULT (datetime('now')),\n\
             \x20   \"execution_time\" INTEGER NOT NULL,\n\
             \x20   \"success\" BOOLEAN NOT NULL\n\
             );\n"
        );
        if baseline {
            // SQLite has no CURRENT_USER
            sql.push_str(
                &baseline_statement(&quoted, self.bool_literal(true))
                    .replace("CURRENT_USER", "''"),
            );
            sql.push_str(";\n");
        }
        sql.push_str(&format!(
            "CREATE INDEX IF NOT EXISTS {} ON {quoted} (\"success\");",
            self.quote_identifier(&format!("{table}_s_idx"))
        ));
        sql
    }
}
