//! Lock coordinator configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{LockError, Result};

/// Default name of the lock table.
pub const DEFAULT_LOCK_TABLE: &str = "schemalock_lock_table";

/// Default number of retries before giving up on a contended lock.
pub const DEFAULT_RETRY_COUNT: i64 = 50;

/// Default delay between acquire attempts, in milliseconds.
pub const DEFAULT_RETRY_DELAY_MS: u64 = 1000;

/// How the lock row records that it is held.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LockVariant {
    /// A boolean flag. Cannot tell a stale holder apart from a new one.
    Flag,
    /// A random 64-bit token minted per acquisition, zero when free.
    #[default]
    Token,
}

impl LockVariant {
    /// Parses a variant name (`flag` or `token`).
    pub fn parse(value: &str) -> Result<Self> {
        match value.to_ascii_lowercase().as_str() {
            "flag" | "bool" | "boolean" => Ok(Self::Flag),
            "token" => Ok(Self::Token),
            other => Err(LockError::InvalidConfig(format!(
                "unknown lock variant '{other}', expected 'flag' or 'token'"
            ))),
        }
    }
}

/// Configuration consumed by the row-lock coordinator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LockConfig {
    /// Name of the lock table.
    pub lock_table: String,
    /// Lock row encoding.
    pub variant: LockVariant,
    /// Retries after the first failed attempt. Negative means unlimited.
    #[serde(rename = "lock_retry_count")]
    pub retry_count: i64,
    /// Fixed delay between attempts.
    pub retry_delay_ms: u64,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            lock_table: DEFAULT_LOCK_TABLE.to_string(),
            variant: LockVariant::default(),
            retry_count: DEFAULT_RETRY_COUNT,
            retry_delay_ms: DEFAULT_RETRY_DELAY_MS,
        }
    }
}

impl LockConfig {
    /// Creates a configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the lock table name.
    #[must_use]
    pub fn lock_table(mut self, name: impl Into<String>) -> Self {
        self.lock_table = name.into();
        self
    }

    /// Sets the lock row encoding.
    #[must_use]
    pub fn variant(mut self, variant: LockVariant) -> Self {
        self.variant = variant;
        self
    }

    /// Sets the retry count. Negative means unlimited.
    #[must_use]
    pub fn retry_count(mut self, count: i64) -> Self {
        self.retry_count = count;
        self
    }

    /// Sets the delay between attempts.
    #[must_use]
    pub fn retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Returns the delay between attempts.
    #[must_use]
    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    /// Returns whether retries are unlimited.
    #[must_use]
    pub fn unlimited_retries(&self) -> bool {
        self.retry_count < 0
    }

    /// Parses a configuration from JSON.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| LockError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Checks that the configuration can be used.
    pub fn validate(&self) -> Result<()> {
        if self.lock_table.trim().is_empty() {
            return Err(LockError::InvalidConfig(
                "lock table name must not be empty".to_string(),
            ));
        }
        if self.lock_table.contains(['"', '`', '[', ']', ';']) {
            return Err(LockError::InvalidConfig(format!(
                "lock table name '{}' contains quoting characters",
                self.lock_table
            )));
        }
        Ok(())
    }
}
