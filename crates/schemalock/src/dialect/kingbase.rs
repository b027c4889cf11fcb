//! Kingbase dialect (PostgreSQL compatibility mode).

use super::yugabytedb::postgres_family_history_ddl;
use super::Dialect;

/// Kingbase dialect.
#[derive(Debug, Clone, Copy, Default)]
pub struct KingbaseDialect;

impl KingbaseDialect {
    /// Creates a new Kingbase dialect.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl Dialect for KingbaseDialect {
    fn name(&self) -> &'static str {
        "kingbase"
    }

    fn url_prefixes(&self) -> &'static [&'static str] {
        &["kingbase8:", "p6spy:kingbase8:"]
    }

    fn placeholder(&self, index: usize) -> String {
        format!("${index}")
    }

    fn text_type(&self) -> &'static str {
        "VARCHAR"
    }

    fn bool_type(&self) -> &'static str {
        "BOOL"
    }

    fn is_retryable(&self, code: &str) -> bool {
        matches!(code, "40001" | "40P01")
    }

    fn history_table_ddl(&self, table: &str, baseline: bool) -> String {
        postgres_family_history_ddl(self, table, baseline)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handles_url() {
        let dialect = KingbaseDialect::new();
        assert!(dialect.handles_url("jdbc:kingbase8://localhost:54321/test"));
        assert!(dialect.handles_url("jdbc:p6spy:kingbase8://localhost/test"));
        assert!(!dialect.handles_url("jdbc:postgresql://localhost/test"));
    }

    #[test]
    fn test_types() {
        let dialect = KingbaseDialect::new();
        assert_eq!(dialect.bool_type(), "BOOL");
        assert_eq!(dialect.placeholder(2), "$2");
    }
}
