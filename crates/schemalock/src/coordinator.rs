//! Row-lock coordinator.
//!
//! Mutual exclusion for migration runners on databases without advisory
//! locks. A runner takes the row lock on its resource's token row with
//! `SELECT ... FOR UPDATE`, writes a held marker and commits, so the
//! database row lock is only held for the duration of that short
//! transaction. The marker, not the row lock, keeps other runners out while
//! the critical section runs; they see it, commit, and retry after a delay.

use std::collections::HashSet;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use futures::FutureExt;
use tracing::{debug, error, info, warn};

use crate::config::LockConfig;
use crate::dialect::Dialect;
use crate::error::{LockError, Result, SqlError};
use crate::lock_table::{HeldMarker, LockTable};
use crate::retry::RetryStrategy;
use crate::session::{LockSession, SqlParam};

/// Runs critical sections under a lock-table lock.
///
/// A coordinator owns one session and serves one critical section at a
/// time. Runners in other tasks or processes each use their own coordinator
/// against the same database.
pub struct RowLockCoordinator<S: LockSession> {
    session: S,
    table: LockTable,
    config: LockConfig,
    table_ready: bool,
    token_rows: HashSet<String>,
}

impl<S: LockSession> RowLockCoordinator<S> {
    /// Creates a coordinator.
    pub fn new(session: S, dialect: Arc<dyn Dialect>, config: LockConfig) -> Result<Self> {
        config.validate()?;
        let table = LockTable::new(config.lock_table.clone(), config.variant, dialect);
        Ok(Self {
            session,
            table,
            config,
            table_ready: false,
            token_rows: HashSet::new(),
        })
    }

    /// Returns the lock table.
    #[must_use]
    pub fn lock_table(&self) -> &LockTable {
        &self.table
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &LockConfig {
        &self.config
    }

    /// Returns the session.
    pub fn session_mut(&mut self) -> &mut S {
        &mut self.session
    }

    /// Consumes the coordinator, returning the session.
    pub fn into_session(self) -> S {
        self.session
    }

    /// Runs `critical_section` while holding the lock on `resource`.
    ///
    /// The lock is released after the critical section finishes, whether it
    /// succeeded or not. If both the critical section and the release fail,
    /// the critical section's error is returned and the release failure is
    /// only logged. If the lock cannot be acquired the critical section does
    /// not run. A panicking critical section still releases the lock before
    /// the panic resumes.
    pub async fn execute<T, E, F, Fut>(
        &mut self,
        resource: &str,
        critical_section: F,
    ) -> std::result::Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        E: From<LockError>,
    {
        let marker = self.lock(resource).await?;
        let outcome = match AssertUnwindSafe(critical_section()).catch_unwind().await {
            Ok(outcome) => outcome,
            Err(payload) => {
                error!(resource = %resource, "Critical section panicked, releasing the lock");
                // With an error in flight the release never fails.
                let _ = self.unlock(resource, marker, true).await;
                panic::resume_unwind(payload);
            }
        };

        match self.unlock(resource, marker, outcome.is_err()).await {
            Ok(()) => outcome,
            Err(unlock_err) => match outcome {
                Ok(_) => Err(unlock_err.into()),
                Err(err) => Err(err),
            },
        }
    }

    /// Creates the lock table once per coordinator.
    pub async fn init(&mut self) -> Result<()> {
        if !self.table_ready {
            self.table.ensure(&mut self.session).await?;
            self.table_ready = true;
        }
        Ok(())
    }

    /// Acquires the lock on `resource`, retrying while it is contended.
    pub async fn lock(&mut self, resource: &str) -> Result<HeldMarker> {
        self.init().await?;

        let mut retry = RetryStrategy::new(self.config.retry_count, self.config.delay());
        loop {
            if let Some(marker) = self.try_lock(resource).await? {
                info!(resource = %resource, marker = %marker, "Lock acquired");
                return Ok(marker);
            }
            retry.failed_attempt(resource).await?;
        }
    }

    /// Makes one acquire attempt.
    ///
    /// `Ok(None)` means the lock is held elsewhere, the token row vanished,
    /// or the database reported a retryable conflict.
    pub async fn try_lock(&mut self, resource: &str) -> Result<Option<HeldMarker>> {
        if !self.token_rows.contains(resource) {
            match self.table.ensure_token_row(&mut self.session, resource).await {
                Ok(_) => {
                    self.token_rows.insert(resource.to_string());
                }
                Err(err) => {
                    return self.acquire_failed(
                        resource,
                        err,
                        format!(
                            "Could not add token row for {resource} in table {}",
                            self.table.name()
                        ),
                    );
                }
            }
        }

        let begin = self.table.dialect().begin_statement();
        if let Err(err) = self.session.execute(begin, &[]).await {
            return self.acquire_failed(resource, err, "Unable to perform lock action".to_string());
        }

        let outcome = self.acquire_in_transaction(resource).await;

        let commit = self.table.dialect().commit_statement();
        let committed = self.session.execute(commit, &[]).await;

        match (outcome, committed) {
            (Ok(marker), Ok(_)) => {
                debug!(resource = %resource, "Completed the lock transaction");
                Ok(marker)
            }
            (Ok(_), Err(err)) => self.acquire_failed(
                resource,
                err,
                "Failed to commit the lock transaction".to_string(),
            ),
            (Err(err), commit_result) => {
                if let Err(commit_err) = commit_result {
                    warn!(
                        resource = %resource,
                        error = %commit_err,
                        "Failed to commit the lock transaction"
                    );
                }
                self.acquire_failed(resource, err, "Unable to perform lock action".to_string())
            }
        }
    }

    async fn acquire_in_transaction(
        &mut self,
        resource: &str,
    ) -> std::result::Result<Option<HeldMarker>, SqlError> {
        let params = [SqlParam::text(resource)];
        let state = self
            .session
            .query_i64(&self.table.select_for_update_sql(), &params)
            .await?;

        match state {
            None => {
                debug!(resource = %resource, "Token row not found, retrying");
                self.token_rows.remove(resource);
                Ok(None)
            }
            Some(state) if state != 0 => {
                debug!(
                    resource = %resource,
                    "Another migration runner holds the lock. Allowing it to complete"
                );
                Ok(None)
            }
            Some(_) => {
                let marker = HeldMarker::mint(self.table.variant());
                debug!(resource = %resource, marker = %marker, "Writing held marker");
                self.session
                    .execute(
                        &self.table.mark_held_sql(),
                        &self.table.mark_held_params(resource, marker),
                    )
                    .await?;
                Ok(Some(marker))
            }
        }
    }

    fn acquire_failed(
        &self,
        resource: &str,
        err: SqlError,
        context: String,
    ) -> Result<Option<HeldMarker>> {
        warn!(
            resource = %resource,
            code = %err.code(),
            "Unable to perform lock action"
        );
        if self.table.dialect().is_retryable(err.code()) {
            Ok(None)
        } else {
            Err(LockError::sql(context, err))
        }
    }

    /// Releases the lock on `resource` acquired with `marker`.
    ///
    /// With `error_in_flight`, failures are logged and swallowed so that the
    /// caller's own error is the one reported.
    pub async fn unlock(
        &mut self,
        resource: &str,
        marker: HeldMarker,
        error_in_flight: bool,
    ) -> Result<()> {
        let mut failure: Option<LockError> = None;

        let begin = self.table.dialect().begin_statement();
        match self.session.execute(begin, &[]).await {
            Err(err) => {
                failure = Some(LockError::sql("Unable to perform unlock action", err));
            }
            Ok(_) => {
                match self.release_in_transaction(resource, marker).await {
                    Ok(true) => {}
                    Ok(false) => {
                        warn!(
                            resource = %resource,
                            marker = %marker,
                            "Unlock failed but the protected operation may have succeeded. \
                             Check it before re-trying"
                        );
                        failure = Some(LockError::UnlockMismatch {
                            resource: resource.to_string(),
                        });
                    }
                    Err(err) => {
                        failure = Some(LockError::sql("Unable to perform unlock action", err));
                    }
                }

                let commit = self.table.dialect().commit_statement();
                match self.session.execute(commit, &[]).await {
                    Ok(_) => {
                        debug!(resource = %resource, "Completed the unlock transaction");
                    }
                    Err(err) if failure.is_none() => {
                        failure = Some(LockError::sql("Failed to commit unlock action", err));
                    }
                    Err(err) => {
                        warn!(resource = %resource, error = %err, "Failed to commit unlock action");
                    }
                }
            }
        }

        match failure {
            None => {
                info!(resource = %resource, "Lock released");
                Ok(())
            }
            Some(err) if error_in_flight => {
                warn!(resource = %resource, error = %err, "Unable to perform unlock action");
                Ok(())
            }
            Some(err) => Err(err),
        }
    }

    async fn release_in_transaction(
        &mut self,
        resource: &str,
        marker: HeldMarker,
    ) -> std::result::Result<bool, SqlError> {
        let params = [SqlParam::text(resource)];
        let state = self
            .session
            .query_i64(&self.table.select_for_update_sql(), &params)
            .await?;

        match state {
            Some(state) if marker.matches(state) => {
                self.session
                    .execute(&self.table.clear_sql(), &self.table.clear_params(resource))
                    .await?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}
