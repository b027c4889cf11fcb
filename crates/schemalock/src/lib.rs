//! Row-lock coordination for schema migration runners.
//!
//! `schemalock` serialises migration runners against one target database on
//! engines that have no advisory or session locks (YugabyteDB, Kingbase,
//! InterSystems IRIS, SQLite). It keeps one row per protected resource in a
//! dedicated lock table and coordinates through `SELECT ... FOR UPDATE` on
//! that row:
//!
//! - **Coordinator** - Acquires the lock, runs a critical section, releases
//! - **Lock table** - DDL, statements and idempotent bootstrap of the table
//! - **Retry** - Bounded or unlimited retries with a fixed delay
//! - **Dialect** - Per-database SQL spelling and error classification
//! - **Session** - The minimal SQL capability the protocol runs on
//!
//! # Example
//!
//! ```rust,ignore
//! use schemalock::prelude::*;
//!
//! let registry = DialectRegistry::with_builtins();
//! let url = "postgres://yugabyte@localhost:5433/yugabyte";
//! let session = schemalock::session::connect(url).await?;
//! let mut coordinator =
//!     RowLockCoordinator::new(session, registry.detect(url)?, LockConfig::default())?;
//!
//! coordinator
//!     .execute("flyway_schema_history", || async {
//!         // apply migrations
//!         Ok::<_, LockError>(())
//!     })
//!     .await?;
//! ```
//!
//! # CLI Usage
//!
//! ```bash
//! # Create the lock table
//! schemalock --database postgres://localhost/db init
//!
//! # Show lock rows
//! schemalock --database postgres://localhost/db status
//!
//! # Clear a lock left behind by a crashed runner
//! schemalock --database postgres://localhost/db release --resource flyway_schema_history
//! ```

pub mod config;
pub mod coordinator;
pub mod dialect;
pub mod error;
pub mod lock_table;
pub mod retry;
pub mod session;

/// Prelude for convenient imports.
pub mod prelude {
    pub use crate::config::{LockConfig, LockVariant};
    pub use crate::coordinator::RowLockCoordinator;
    pub use crate::dialect::{
        Dialect, DialectRegistry, IrisDialect, KingbaseDialect, SqliteDialect, YugabyteDbDialect,
    };
    pub use crate::error::{LockError, Result, SqlError};
    pub use crate::lock_table::{HeldMarker, LockTable};
    pub use crate::retry::RetryStrategy;
    pub use crate::session::{LockRow, LockSession, PgSession, SqlParam, SqliteSession};
}
