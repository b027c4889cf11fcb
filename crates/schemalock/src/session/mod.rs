//! SQL sessions the lock coordinator runs its statements on.
//!
//! The coordinator only needs to run a statement, read a scalar and read a
//! few strings. Transactions are driven with explicit `BEGIN`/`COMMIT`
//! statements from the dialect, so a session must keep one physical
//! connection for its whole lifetime.

mod postgres;
mod sqlite;

pub use postgres::PgSession;
pub use sqlite::SqliteSession;

use async_trait::async_trait;

use crate::error::SqlError;

/// A positional statement parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SqlParam {
    /// Text value.
    Text(String),
    /// 64-bit integer.
    BigInt(i64),
    /// Boolean.
    Bool(bool),
}

impl SqlParam {
    /// Creates a text parameter.
    pub fn text(value: impl Into<String>) -> Self {
        Self::Text(value.into())
    }
}

/// One row of the lock table, as shown to operators.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockRow {
    /// Protected resource.
    pub resource: String,
    /// Raw lock state: zero when free.
    pub state: i64,
    /// Acquisition timestamp, if the table records one.
    pub acquired_at: Option<String>,
}

impl LockRow {
    /// Returns whether the row is held.
    #[must_use]
    pub fn is_held(&self) -> bool {
        self.state != 0
    }
}

/// Minimal SQL capability needed by the row-lock protocol.
#[async_trait]
pub trait LockSession: Send {
    /// Runs a statement and returns the number of affected rows.
    async fn execute(&mut self, sql: &str, params: &[SqlParam]) -> Result<u64, SqlError>;

    /// Runs a query and returns the first column of the first row as an
    /// integer. Boolean columns are widened to 0/1; NULL reads as 0.
    async fn query_i64(&mut self, sql: &str, params: &[SqlParam])
    -> Result<Option<i64>, SqlError>;

    /// Runs a query and returns the first column of every row as a string.
    async fn query_strings(
        &mut self,
        sql: &str,
        params: &[SqlParam],
    ) -> Result<Vec<String>, SqlError>;

    /// Runs a query returning `(resource, state, acquired_at)` rows.
    async fn query_lock_rows(
        &mut self,
        sql: &str,
        params: &[SqlParam],
    ) -> Result<Vec<LockRow>, SqlError>;
}

#[async_trait]
impl<S: LockSession + ?Sized> LockSession for Box<S> {
    async fn execute(&mut self, sql: &str, params: &[SqlParam]) -> Result<u64, SqlError> {
        (**self).execute(sql, params).await
    }

    async fn query_i64(
        &mut self,
        sql: &str,
        params: &[SqlParam],
    ) -> Result<Option<i64>, SqlError> {
        (**self).query_i64(sql, params).await
    }

    async fn query_strings(
        &mut self,
        sql: &str,
        params: &[SqlParam],
    ) -> Result<Vec<String>, SqlError> {
        (**self).query_strings(sql, params).await
    }

    async fn query_lock_rows(
        &mut self,
        sql: &str,
        params: &[SqlParam],
    ) -> Result<Vec<LockRow>, SqlError> {
        (**self).query_lock_rows(sql, params).await
    }
}

/// Opens a session for a connection URL.
///
/// `postgres://`/`postgresql://` URLs (optionally behind `jdbc:` or with the
/// `yugabytedb:` / `kingbase8:` scheme) open a PostgreSQL-wire connection;
/// `sqlite:` URLs open SQLite.
pub async fn connect(url: &str) -> crate::error::Result<Box<dyn LockSession>> {
    let url = url.strip_prefix("jdbc:").unwrap_or(url);
    if url.starts_with("sqlite:") {
        return Ok(Box::new(SqliteSession::connect(url).await?));
    }
    for scheme in ["yugabytedb:", "kingbase8:", "postgresql:", "postgres:"] {
        if let Some(rest) = url.strip_prefix(scheme) {
            let normalized = format!("postgres:{rest}");
            return Ok(Box::new(PgSession::connect(&normalized).await?));
        }
    }
    Err(crate::error::LockError::InvalidConfig(format!(
        "no SQL driver available for '{url}'"
    )))
}
