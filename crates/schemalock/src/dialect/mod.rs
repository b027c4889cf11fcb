//! Database dialect implementations.
//!
//! Each dialect knows how to spell the handful of statements the row-lock
//! protocol needs and how to classify the errors its database reports.

mod iris;
mod kingbase;
mod sqlite;
mod yugabytedb;

pub use iris::IrisDialect;
pub use kingbase::KingbaseDialect;
pub use sqlite::SqliteDialect;
pub use yugabytedb::YugabyteDbDialect;

use std::sync::Arc;

use crate::error::{LockError, Result};

/// Trait for database-specific SQL spelling and error classification.
pub trait Dialect: Send + Sync {
    /// Returns the dialect name.
    fn name(&self) -> &'static str;

    /// URL prefixes (after an optional `jdbc:`) this dialect accepts.
    fn url_prefixes(&self) -> &'static [&'static str];

    /// Returns whether this dialect handles the given connection URL.
    fn handles_url(&self, url: &str) -> bool {
        let url = strip_jdbc(url);
        self.url_prefixes().iter().any(|prefix| {
            url.get(..prefix.len())
                .is_some_and(|head| head.eq_ignore_ascii_case(prefix))
        })
    }

    /// Quote an identifier (table name, column name, etc.).
    fn quote_identifier(&self, name: &str) -> String {
        format!("\"{}\"", name.replace('"', "\"\""))
    }

    /// Returns the positional bind marker for the 1-based parameter `index`.
    fn placeholder(&self, _index: usize) -> String {
        "?".to_string()
    }

    /// Statement that opens an explicit transaction.
    fn begin_statement(&self) -> &'static str {
        "BEGIN"
    }

    /// Statement that commits the current transaction.
    fn commit_statement(&self) -> &'static str {
        "COMMIT"
    }

    /// Clause appended to a SELECT to take a row lock, including the leading space.
    fn for_update_clause(&self) -> &'static str {
        " FOR UPDATE"
    }

    /// Column type for the resource name.
    fn text_type(&self) -> &'static str {
        "VARCHAR(255)"
    }

    /// Column type for the flag variant.
    fn bool_type(&self) -> &'static str {
        "BOOLEAN"
    }

    /// Column type for the token variant.
    fn bigint_type(&self) -> &'static str {
        "BIGINT"
    }

    /// Column type for the acquisition timestamp.
    fn timestamp_type(&self) -> &'static str {
        "TIMESTAMP"
    }

    /// SQL expression for the current timestamp.
    fn current_timestamp(&self) -> &'static str {
        "CURRENT_TIMESTAMP"
    }

    /// SQL literal for a boolean.
    fn bool_literal(&self, value: bool) -> &'static str {
        if value { "TRUE" } else { "FALSE" }
    }

    /// Query returning the (lower-case) column names of `table`, one per row.
    ///
    /// An empty result means the table does not exist.
    fn lock_table_columns_query(&self, table: &str) -> String {
        format!(
            "SELECT LOWER(column_name) FROM information_schema.columns WHERE LOWER(table_name) = '{}'",
            table.to_lowercase().replace('\'', "''")
        )
    }

    /// Returns whether an error code is a serialization failure or deadlock
    /// that justifies another acquire attempt.
    fn is_retryable(&self, code: &str) -> bool;

    /// Returns whether an error code is a unique-constraint violation.
    fn is_unique_violation(&self, code: &str) -> bool {
        code == "23505"
    }

    /// Generates the DDL for the migration-history table.
    ///
    /// Statements are separated by `;\n`. With `baseline`, an INSERT of the
    /// baseline marker row follows the CREATE.
    fn history_table_ddl(&self, table: &str, baseline: bool) -> String;
}

/// Strips an optional `jdbc:` prefix from a connection URL.
fn strip_jdbc(url: &str) -> &str {
    url.strip_prefix("jdbc:").unwrap_or(url)
}

/// Baseline marker row shared by every dialect's history table.
pub(crate) fn baseline_statement(quoted_table: &str, bool_true: &str) -> String {
    format!(
        "INSERT INTO {quoted_table} (\"installed_rank\", \"version\", \"description\", \"type\", \
         \"script\", \"checksum\", \"installed_by\", \"execution_time\", \"success\") \
         VALUES (1, '1', '<< Baseline >>', 'BASELINE', '<< Baseline >>', NULL, CURRENT_USER, 0, {bool_true})"
    )
}

/// Resolves dialects from connection URLs.
pub struct DialectRegistry {
    dialects: Vec<Arc<dyn Dialect>>,
}

impl Default for DialectRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

impl DialectRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            dialects: Vec::new(),
        }
    }

    /// Creates a registry holding every built-in dialect.
    ///
    /// Kingbase is registered before YugabyteDB so that the more specific
    /// prefix wins; YugabyteDB also accepts plain PostgreSQL URLs.
    #[must_use]
    pub fn with_builtins() -> Self {
        Self::empty()
            .register(KingbaseDialect::new())
            .register(IrisDialect::new())
            .register(SqliteDialect::new())
            .register(YugabyteDbDialect::new())
    }

    /// Adds a dialect. Earlier registrations take precedence.
    #[must_use]
    pub fn register(mut self, dialect: impl Dialect + 'static) -> Self {
        self.dialects.push(Arc::new(dialect));
        self
    }

    /// Returns the names of all registered dialects.
    #[must_use]
    pub fn names(&self) -> Vec<&'static str> {
        self.dialects.iter().map(|d| d.name()).collect()
    }

    /// Finds the dialect that handles `url`.
    pub fn detect(&self, url: &str) -> Result<Arc<dyn Dialect>> {
        self.dialects
            .iter()
            .find(|d| d.handles_url(url))
            .cloned()
            .ok_or_else(|| {
                LockError::UnknownDialect(format!(
                    "{url} (registered: {})",
                    self.names().join(", ")
                ))
            })
    }
}
