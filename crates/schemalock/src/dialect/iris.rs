//! InterSystems IRIS dialect.
//!
//! IRIS reports SQLCODE values rather than SQLSTATEs for most lock
//! conflicts, so both spellings are classified.

use super::Dialect;

/// InterSystems IRIS dialect.
#[derive(Debug, Clone, Copy, Default)]
pub struct IrisDialect;

impl IrisDialect {
    /// Creates a new IRIS dialect.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl Dialect for IrisDialect {
    fn name(&self) -> &'static str {
        "iris"
    }

    fn url_prefixes(&self) -> &'static [&'static str] {
        &["IRIS:"]
    }

    fn bool_type(&self) -> &'static str {
        "BIT"
    }

    fn bool_literal(&self, value: bool) -> &'static str {
        if value { "1" } else { "0" }
    }

    fn is_retryable(&self, code: &str) -> bool {
        // -110: lock timeout on INSERT, -114: unable to acquire row lock
        matches!(code, "40001" | "-110" | "-114")
    }

    fn is_unique_violation(&self, code: &str) -> bool {
        matches!(code, "23000" | "23505" | "-119")
    }

    fn history_table_ddl(&self, table: &str, baseline: bool) -> String {
        let quoted = self.quote_identifier(table);
        let mut sql = format!(
            "CREATE TABLE {quoted} (\n\
             \x20 \"installed_rank\" INTEGER NOT NULL,\n\
             \x20 \"version\" VARCHAR(50),\n\
             \x20 \"description\" VARCHAR(200) NOT NULL,\n\
             \x20 \"type\" VARCHAR(20) NOT NULL,\n\
             \x20 \"script\" VARCHAR(1000) NOT NULL,\n\
             \x20 \"checksum\" INTEGER,\n\
             \x20 \"installed_by\" VARCHAR(100) NOT NULL,\n\
             \x20 \"installed_on\" TIMESTAMP NOT NULL DEFAULT getdate(),\n\
             \x20 \"execution_time\" INTEGER NOT NULL,\n\
             \x20 \"success\" BIT NOT NULL\n\
             );\n\
             ALTER TABLE {quoted} ADD CONSTRAINT {} PRIMARY KEY (\"installed_rank\");",
            self.quote_identifier(&format!("{table}_pk"))
        );
        if baseline {
            sql.push('\n');
            sql.push_str(&super::baseline_statement(&quoted, self.bool_literal(true)));
            sql.push(';');
        }
        sql
    }
}
