//! The lock table.
//!
//! One row per protected resource. The row is inserted lazily on the first
//! lock attempt and never deleted; its `lock_state` column is zero/false when
//! the resource is free.

use std::fmt;
use std::sync::Arc;

use tracing::{debug, info};

use crate::config::LockVariant;
use crate::dialect::Dialect;
use crate::error::{LockError, Result};
use crate::session::{LockRow, LockSession, SqlParam};

/// Column holding the resource name.
pub const RESOURCE_COLUMN: &str = "resource_name";

/// Column holding the lock state.
pub const STATE_COLUMN: &str = "lock_state";

/// Column holding the acquisition timestamp (token variant only).
pub const TIMESTAMP_COLUMN: &str = "ts";

/// What a runner wrote into the lock row when it acquired it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeldMarker {
    /// The flag was flipped to true.
    Flag,
    /// This token was written.
    Token(i64),
}

impl HeldMarker {
    /// Mints a fresh marker for the variant.
    #[must_use]
    pub fn mint(variant: LockVariant) -> Self {
        match variant {
            LockVariant::Flag => Self::Flag,
            LockVariant::Token => Self::Token(rand::random::<i64>()),
        }
    }

    /// Returns whether the stored state still carries this marker.
    #[must_use]
    pub fn matches(&self, state: i64) -> bool {
        match self {
            Self::Flag => state != 0,
            Self::Token(token) => state == *token,
        }
    }

    fn param(self) -> SqlParam {
        match self {
            Self::Flag => SqlParam::Bool(true),
            Self::Token(token) => SqlParam::BigInt(token),
        }
    }
}

impl fmt::Display for HeldMarker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Flag => f.write_str("flag"),
            Self::Token(token) => write!(f, "token {token}"),
        }
    }
}

/// Statement builder and bootstrap for a lock table.
#[derive(Clone)]
pub struct LockTable {
    name: String,
    variant: LockVariant,
    dialect: Arc<dyn Dialect>,
}

impl fmt::Debug for LockTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockTable")
            .field("name", &self.name)
            .field("variant", &self.variant)
            .field("dialect", &self.dialect.name())
            .finish()
    }
}

impl LockTable {
    /// Creates a lock table description.
    pub fn new(name: impl Into<String>, variant: LockVariant, dialect: Arc<dyn Dialect>) -> Self {
        Self {
            name: name.into(),
            variant,
            dialect,
        }
    }

    /// Returns the unquoted table name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the lock row encoding.
    #[must_use]
    pub fn variant(&self) -> LockVariant {
        self.variant
    }

    /// Returns the dialect.
    #[must_use]
    pub fn dialect(&self) -> &dyn Dialect {
        self.dialect.as_ref()
    }

    fn quoted(&self) -> String {
        self.dialect.quote_identifier(&self.name)
    }

    fn free_param(&self) -> SqlParam {
        match self.variant {
            LockVariant::Flag => SqlParam::Bool(false),
            LockVariant::Token => SqlParam::BigInt(0),
        }
    }

    /// `CREATE TABLE IF NOT EXISTS` for the lock table.
    #[must_use]
    pub fn create_sql(&self) -> String {
        let d = self.dialect.as_ref();
        match self.variant {
            LockVariant::Flag => format!(
                "CREATE TABLE IF NOT EXISTS {} ({RESOURCE_COLUMN} {} PRIMARY KEY, {STATE_COLUMN} {} NOT NULL)",
                self.quoted(),
                d.text_type(),
                d.bool_type()
            ),
            LockVariant::Token => format!(
                "CREATE TABLE IF NOT EXISTS {} ({RESOURCE_COLUMN} {} PRIMARY KEY, {STATE_COLUMN} {} NOT NULL, {TIMESTAMP_COLUMN} {})",
                self.quoted(),
                d.text_type(),
                d.bigint_type(),
                d.timestamp_type()
            ),
        }
    }

    /// `DROP TABLE IF EXISTS` for the lock table.
    #[must_use]
    pub fn drop_sql(&self) -> String {
        format!("DROP TABLE IF EXISTS {}", self.quoted())
    }

    /// INSERT of the token row for a resource, in the free state.
    #[must_use]
    pub fn insert_token_row_sql(&self) -> String {
        format!(
            "INSERT INTO {} ({RESOURCE_COLUMN}, {STATE_COLUMN}) VALUES ({}, {})",
            self.quoted(),
            self.dialect.placeholder(1),
            self.dialect.placeholder(2)
        )
    }

    /// SELECT of the lock state that takes the row lock.
    #[must_use]
    pub fn select_for_update_sql(&self) -> String {
        format!(
            "SELECT {STATE_COLUMN} FROM {} WHERE {RESOURCE_COLUMN} = {}{}",
            self.quoted(),
            self.dialect.placeholder(1),
            self.dialect.for_update_clause()
        )
    }

    /// UPDATE writing a held marker.
    #[must_use]
    pub fn mark_held_sql(&self) -> String {
        let stamp = match self.variant {
            LockVariant::Flag => String::new(),
            LockVariant::Token => format!(
                ", {TIMESTAMP_COLUMN} = {}",
                self.dialect.current_timestamp()
            ),
        };
        format!(
            "UPDATE {} SET {STATE_COLUMN} = {}{stamp} WHERE {RESOURCE_COLUMN} = {}",
            self.quoted(),
            self.dialect.placeholder(1),
            self.dialect.placeholder(2)
        )
    }

    /// UPDATE writing the free state.
    #[must_use]
    pub fn clear_sql(&self) -> String {
        format!(
            "UPDATE {} SET {STATE_COLUMN} = {} WHERE {RESOURCE_COLUMN} = {}",
            self.quoted(),
            self.dialect.placeholder(1),
            self.dialect.placeholder(2)
        )
    }

    /// SELECT of the lock rows, optionally for one resource.
    #[must_use]
    pub fn status_sql(&self, filtered: bool) -> String {
        let ts = match self.variant {
            LockVariant::Flag => "NULL".to_string(),
            LockVariant::Token => format!(
                "CAST({TIMESTAMP_COLUMN} AS {})",
                self.dialect.text_type()
            ),
        };
        let filter = if filtered {
            format!(" WHERE {RESOURCE_COLUMN} = {}", self.dialect.placeholder(1))
        } else {
            String::new()
        };
        format!(
            "SELECT {RESOURCE_COLUMN}, {STATE_COLUMN}, {ts} FROM {}{filter} ORDER BY {RESOURCE_COLUMN}",
            self.quoted()
        )
    }

    /// Parameters for [`Self::insert_token_row_sql`].
    #[must_use]
    pub fn insert_token_row_params(&self, resource: &str) -> Vec<SqlParam> {
        vec![SqlParam::text(resource), self.free_param()]
    }

    /// Parameters for [`Self::mark_held_sql`].
    #[must_use]
    pub fn mark_held_params(&self, resource: &str, marker: HeldMarker) -> Vec<SqlParam> {
        vec![marker.param(), SqlParam::text(resource)]
    }

    /// Parameters for [`Self::clear_sql`].
    #[must_use]
    pub fn clear_params(&self, resource: &str) -> Vec<SqlParam> {
        vec![self.free_param(), SqlParam::text(resource)]
    }

    /// Creates the lock table if needed.
    ///
    /// A table left behind with the flag schema is dropped and recreated when
    /// the token variant is configured. Configuring the flag variant against
    /// a token-schema table is rejected.
    pub async fn ensure<S: LockSession + ?Sized>(&self, session: &mut S) -> Result<()> {
        let columns = self.columns(session).await?;

        if columns.is_empty() {
            debug!(lock_table = %self.name, "Lock table not found, creating it");
            return self.create(session).await;
        }

        let has_timestamp = columns.iter().any(|c| c == TIMESTAMP_COLUMN);
        match (self.variant, has_timestamp) {
            (LockVariant::Token, true) | (LockVariant::Flag, false) => {
                debug!(lock_table = %self.name, "Lock table with expected schema already exists");
                Ok(())
            }
            (LockVariant::Token, false) => {
                info!(
                    lock_table = %self.name,
                    "Lock table exists but has old schema. Dropping and recreating it with new schema"
                );
                session
                    .execute(&self.drop_sql(), &[])
                    .await
                    .map_err(|e| LockError::sql("Unable to drop the old lock table", e))?;
                self.create(session).await
            }
            (LockVariant::Flag, true) => Err(LockError::InvalidConfig(format!(
                "lock table '{}' uses the token schema; configure the token variant",
                self.name
            ))),
        }
    }

    async fn columns<S: LockSession + ?Sized>(&self, session: &mut S) -> Result<Vec<String>> {
        session
            .query_strings(&self.dialect.lock_table_columns_query(&self.name), &[])
            .await
            .map_err(|e| LockError::sql("Unable to initialize the lock table", e))
    }

    async fn create<S: LockSession + ?Sized>(&self, session: &mut S) -> Result<()> {
        if let Err(err) = session.execute(&self.create_sql(), &[]).await {
            // Another runner may have created it between our check and CREATE.
            if self.columns(session).await?.is_empty() {
                return Err(LockError::sql("Unable to initialize the lock table", err));
            }
            debug!(lock_table = %self.name, error = %err, "Lock table created concurrently");
        }
        Ok(())
    }

    /// Inserts the token row for `resource`.
    ///
    /// Returns `true` if this call inserted it and `false` if it was already
    /// present.
    pub async fn ensure_token_row<S: LockSession + ?Sized>(
        &self,
        session: &mut S,
        resource: &str,
    ) -> std::result::Result<bool, crate::error::SqlError> {
        let params = self.insert_token_row_params(resource);
        match session.execute(&self.insert_token_row_sql(), &params).await {
            Ok(_) => {
                info!(
                    resource = %resource,
                    lock_table = %self.name,
                    "Inserted a token row"
                );
                Ok(true)
            }
            Err(err) if self.dialect.is_unique_violation(err.code()) => {
                debug!(resource = %resource, "Token row already added");
                Ok(false)
            }
            Err(err) => Err(err),
        }
    }

    /// Lists lock rows, optionally for a single resource.
    pub async fn status<S: LockSession + ?Sized>(
        &self,
        session: &mut S,
        resource: Option<&str>,
    ) -> Result<Vec<LockRow>> {
        let params: Vec<SqlParam> = resource.map(SqlParam::text).into_iter().collect();
        session
            .query_lock_rows(&self.status_sql(resource.is_some()), &params)
            .await
            .map_err(|e| LockError::sql("Unable to read the lock table", e))
    }

    /// Clears the lock on `resource` regardless of who holds it.
    ///
    /// Returns whether a row was updated.
    pub async fn force_release<S: LockSession + ?Sized>(
        &self,
        session: &mut S,
        resource: &str,
    ) -> Result<bool> {
        let affected = session
            .execute(&self.clear_sql(), &self.clear_params(resource))
            .await
            .map_err(|e| LockError::sql("Unable to release the lock", e))?;
        Ok(affected > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialect::{SqliteDialect, YugabyteDbDialect};
    use crate::session::SqliteSession;

    fn sqlite_table(variant: LockVariant) -> LockTable {
        LockTable::new("locks", variant, Arc::new(SqliteDialect::new()))
    }

    async fn memory_session() -> SqliteSession {
        SqliteSession::connect("sqlite::memory:")
            .await
            .expect("Failed to open in-memory SQLite connection")
    }

    #[test]
    fn test_create_sql() {
        let table = LockTable::new(
            "locks",
            LockVariant::Token,
            Arc::new(YugabyteDbDialect::new()),
        );
        assert_eq!(
            table.create_sql(),
            "CREATE TABLE IF NOT EXISTS \"locks\" (resource_name VARCHAR PRIMARY KEY, \
             lock_state BIGINT NOT NULL, ts TIMESTAMP)"
        );

        let table = sqlite_table(LockVariant::Flag);
        assert_eq!(
            table.create_sql(),
            "CREATE TABLE IF NOT EXISTS \"locks\" (resource_name TEXT PRIMARY KEY, \
             lock_state BOOLEAN NOT NULL)"
        );
    }

    #[test]
    fn test_select_for_update_sql() {
        let table = LockTable::new(
            "locks",
            LockVariant::Token,
            Arc::new(YugabyteDbDialect::new()),
        );
        assert_eq!(
            table.select_for_update_sql(),
            "SELECT lock_state FROM \"locks\" WHERE resource_name = $1 FOR UPDATE"
        );
        assert_eq!(
            sqlite_table(LockVariant::Token).select_for_update_sql(),
            "SELECT lock_state FROM \"locks\" WHERE resource_name = ?"
        );
    }

    #[test]
    fn test_mark_held_sql() {
        assert_eq!(
            sqlite_table(LockVariant::Token).mark_held_sql(),
            "UPDATE \"locks\" SET lock_state = ?, ts = CURRENT_TIMESTAMP WHERE resource_name = ?"
        );
        assert_eq!(
            sqlite_table(LockVariant::Flag).mark_held_sql(),
            "UPDATE \"locks\" SET lock_state = ? WHERE resource_name = ?"
        );
    }

    #[test]
    fn test_held_marker() {
        assert!(HeldMarker::Flag.matches(1));
        assert!(!HeldMarker::Flag.matches(0));
        assert!(HeldMarker::Token(99).matches(99));
        assert!(!HeldMarker::Token(99).matches(98));
        assert!(!HeldMarker::Token(99).matches(0));
        assert_eq!(HeldMarker::mint(LockVariant::Flag), HeldMarker::Flag);
        assert!(matches!(
            HeldMarker::mint(LockVariant::Token),
            HeldMarker::Token(_)
        ));
    }

    #[tokio::test]
    async fn test_ensure_idempotent() {
        let mut session = memory_session().await;
        let table = sqlite_table(LockVariant::Token);

        table.ensure(&mut session).await.unwrap();
        table.ensure(&mut session).await.unwrap();

        assert!(table.status(&mut session, None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_ensure_upgrades_flag_schema() {
        let mut session = memory_session().await;
        let old = sqlite_table(LockVariant::Flag);
        old.ensure(&mut session).await.unwrap();
        old.ensure_token_row(&mut session, "history").await.unwrap();

        let table = sqlite_table(LockVariant::Token);
        table.ensure(&mut session).await.unwrap();

        let columns = session
            .query_strings("SELECT LOWER(name) FROM pragma_table_info('locks')", &[])
            .await
            .unwrap();
        assert!(columns.contains(&"ts".to_string()));
        // Recreated, so the old token row is gone.
        assert!(table.status(&mut session, None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_flag_variant_rejects_token_schema() {
        let mut session = memory_session().await;
        sqlite_table(LockVariant::Token)
            .ensure(&mut session)
            .await
            .unwrap();

        let err = sqlite_table(LockVariant::Flag)
            .ensure(&mut session)
            .await
            .unwrap_err();
        assert!(matches!(err, LockError::InvalidConfig(_)));
    }

    #[tokio::test]
    async fn test_ensure_token_row() {
        let mut session = memory_session().await;
        let table = sqlite_table(LockVariant::Token);
        table.ensure(&mut session).await.unwrap();

        assert!(table.ensure_token_row(&mut session, "history").await.unwrap());
        assert!(!table.ensure_token_row(&mut session, "history").await.unwrap());

        let rows = table.status(&mut session, Some("history")).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].resource, "history");
        assert!(!rows[0].is_held());
    }

    #[tokio::test]
    async fn test_force_release() {
        let mut session = memory_session().await;
        let table = sqlite_table(LockVariant::Token);
        table.ensure(&mut session).await.unwrap();
        table.ensure_token_row(&mut session, "history").await.unwrap();

        session
            .execute(
                &table.mark_held_sql(),
                &table.mark_held_params("history", HeldMarker::Token(5)),
            )
            .await
            .unwrap();
        let rows = table.status(&mut session, Some("history")).await.unwrap();
        assert_eq!(rows[0].state, 5);
        assert!(rows[0].acquired_at.is_some());

        assert!(table.force_release(&mut session, "history").await.unwrap());
        assert!(!table.force_release(&mut session, "missing").await.unwrap());

        let rows = table.status(&mut session, None).await.unwrap();
        assert!(!rows[0].is_held());
    }
}
