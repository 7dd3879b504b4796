//! Write policy and statement classification
//!
//! Classification is a leading-keyword heuristic, not a parser. Known blind
//! spots, kept as-is:
//! - a comment before the keyword (`/* x */ DELETE ...`) classifies as read-only
//! - writing CTEs (`WITH gone AS (DELETE ...) SELECT ...`) classify as read-only
//! - only the first statement of a multi-statement string is inspected
//!
//! The guard executes through the extended query protocol, which refuses
//! multi-statement strings on the server side.

use super::{GatewayError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, warn};

/// Leading keywords treated as mutating
pub const MUTATING_KEYWORDS: [&str; 9] = [
    "insert", "update", "delete", "drop", "create", "alter", "truncate", "grant", "revoke",
];

/// Read-only vs mutating intent of a statement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Classification {
    ReadOnly,
    Mutating,
}

impl Classification {
    pub fn is_mutating(&self) -> bool {
        matches!(self, Classification::Mutating)
    }
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Classification::ReadOnly => write!(f, "read_only"),
            Classification::Mutating => write!(f, "mutating"),
        }
    }
}

/// First word of the statement, lowercased. Empty when the text does not
/// start with a word character.
pub fn leading_keyword(sql: &str) -> String {
    sql.trim_start()
        .chars()
        .take_while(|c| c.is_ascii_alphanumeric() || *c == '_')
        .collect::<String>()
        .to_ascii_lowercase()
}

pub fn classify(sql: &str) -> Classification {
    let keyword = leading_keyword(sql);
    if MUTATING_KEYWORDS.contains(&keyword.as_str()) {
        Classification::Mutating
    } else {
        Classification::ReadOnly
    }
}

/// Process-wide write policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WritePolicy {
    allow_write: bool,
}

impl WritePolicy {
    pub fn new(allow_write: bool) -> Self {
        WritePolicy { allow_write }
    }

    pub fn read_only() -> Self {
        WritePolicy::new(false)
    }

    pub fn allows_writes(&self) -> bool {
        self.allow_write
    }

    /// Classify `sql` and reject it when it mutates under a read-only policy
    pub fn authorize(&self, sql: &str) -> Result<Classification> {
        let classification = classify(sql);
        if classification.is_mutating() && !self.allow_write {
            let keyword = leading_keyword(sql).to_ascii_uppercase();
            warn!(keyword = %keyword, "Rejected mutating statement under read-only policy");
            return Err(GatewayError::WriteNotAllowed(keyword));
        }
        debug!(%classification, "Statement authorized");
        Ok(classification)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mutating_keywords_any_case() {
        for keyword in MUTATING_KEYWORDS {
            let upper = format!("  {} something", keyword.to_uppercase());
            let mixed = format!("\n\t{}{} x", &keyword[..1].to_uppercase(), &keyword[1..]);
            assert_eq!(classify(&upper), Classification::Mutating, "{}", upper);
            assert_eq!(classify(&mixed), Classification::Mutating, "{}", mixed);
        }
        assert_eq!(classify("  INSERT into t values (1)"), Classification::Mutating);
    }

    #[test]
    fn test_reads() {
        assert_eq!(classify("select 1"), Classification::ReadOnly);
        assert_eq!(classify("WITH x AS (SELECT 1) SELECT * FROM x"), Classification::ReadOnly);
        assert_eq!(classify("explain select 1"), Classification::ReadOnly);
        assert_eq!(classify(""), Classification::ReadOnly);
        // keyword must be the whole leading token
        assert_eq!(classify("updated_rows"), Classification::ReadOnly);
    }

    #[test]
    fn test_comment_prefix_is_not_detected() {
        assert_eq!(classify("/* note */ DELETE FROM t"), Classification::ReadOnly);
        assert_eq!(classify("-- x\nDROP TABLE t"), Classification::ReadOnly);
    }

    #[test]
    fn test_policy() {
        let read_only = WritePolicy::read_only();
        let err = read_only.authorize("delete from t").unwrap_err();
        assert!(matches!(err, GatewayError::WriteNotAllowed(ref k) if k == "DELETE"));
        assert_eq!(
            read_only.authorize("select * from t").unwrap(),
            Classification::ReadOnly
        );

        let writable = WritePolicy::new(true);
        assert_eq!(
            writable.authorize("DROP TABLE t").unwrap(),
            Classification::Mutating
        );
    }
}
