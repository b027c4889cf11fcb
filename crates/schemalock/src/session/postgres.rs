//! PostgreSQL-wire session (YugabyteDB, Kingbase, PostgreSQL).

use std::str::FromStr;

use async_trait::async_trait;
use sqlx::postgres::{PgArguments, PgConnectOptions, PgConnection, PgRow, Postgres};
use sqlx::query::Query;
use sqlx::{ConnectOptions, Row};

use super::{LockRow, LockSession, SqlParam};
use crate::error::SqlError;

/// Lock session backed by one PostgreSQL-wire connection.
pub struct PgSession {
    conn: PgConnection,
}

impl PgSession {
    /// Wraps an open connection.
    #[must_use]
    pub fn new(conn: PgConnection) -> Self {
        Self { conn }
    }

    /// Opens a connection from a `postgres://` URL.
    pub async fn connect(url: &str) -> crate::error::Result<Self> {
        let options = PgConnectOptions::from_str(url)?;
        Ok(Self::new(options.connect().await?))
    }

}

fn bind_params<'q>(
    mut query: Query<'q, Postgres, PgArguments>,
    params: &'q [SqlParam],
) -> Query<'q, Postgres, PgArguments> {
    for param in params {
        query = match param {
            SqlParam::Text(value) => query.bind(value.as_str()),
            SqlParam::BigInt(value) => query.bind(*value),
            SqlParam::Bool(value) => query.bind(*value),
        };
    }
    query
}

fn state_at(row: &PgRow, index: usize) -> Result<i64, sqlx::Error> {
    match row.try_get::<Option<i64>, _>(index) {
        Ok(value) => Ok(value.unwrap_or(0)),
        Err(_) => Ok(row
            .try_get::<Option<bool>, _>(index)?
            .map(i64::from)
            .unwrap_or(0)),
    }
}

#[async_trait]
impl LockSession for PgSession {
    async fn execute(&mut self, sql: &str, params: &[SqlParam]) -> Result<u64, SqlError> {
        let result = bind_params(sqlx::query(sql), params)
            .execute(&mut self.conn)
            .await?;
        Ok(result.rows_affected())
    }

    async fn query_i64(
        &mut self,
        sql: &str,
        params: &[SqlParam],
    ) -> Result<Option<i64>, SqlError> {
        let row = bind_params(sqlx::query(sql), params)
            .fetch_optional(&mut self.conn)
            .await?;
        match row {
            Some(row) => Ok(Some(state_at(&row, 0)?)),
            None => Ok(None),
        }
    }

    async fn query_strings(
        &mut self,
        sql: &str,
        params: &[SqlParam],
    ) -> Result<Vec<String>, SqlError> {
        let rows = bind_params(sqlx::query(sql), params)
            .fetch_all(&mut self.conn)
            .await?;
        let mut values = Vec::with_capacity(rows.len());
        for row in rows {
            values.push(row.try_get::<String, _>(0)?);
        }
        Ok(values)
    }

    async fn query_lock_rows(
        &mut self,
        sql: &str,
        params: &[SqlParam],
    ) -> Result<Vec<LockRow>, SqlError> {
        let rows = bind_params(sqlx::query(sql), params)
            .fetch_all(&mut self.conn)
            .await?;
        let mut lock_rows = Vec::with_capacity(rows.len());
        for row in rows {
            lock_rows.push(LockRow {
                resource: row.try_get(0)?,
                state: state_at(&row, 1)?,
                acquired_at: row.try_get(2)?,
            });
        }
        Ok(lock_rows)
    }
}
