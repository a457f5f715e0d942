//! Shared parsing utilities for the domain modules.
//!
//! Typed-event payloads keep numeric fields as the strings the wire
//! carries; these helpers turn them into row values, defaulting
//! rather than failing where a partial payload should not lose the
//! whole event.

use chrono::{DateTime, Utc};

use harbor_core::error::ModuleError;
use harbor_core::ports::EventContext;

/// Metadata every domain row carries, derived from the block context.
#[derive(Debug, Clone)]
pub struct RowMeta {
    /// Height the event was observed at.
    pub height: u64,
    /// Tx hash as 0x hex, when the event came from a transaction.
    pub tx_hash: Option<String>,
    /// Block time as a timestamp.
    pub time: DateTime<Utc>,
}

impl RowMeta {
    pub fn from_ctx(ctx: &EventContext) -> Self {
        Self {
            height: ctx.height,
            tx_hash: ctx.tx_hash.as_ref().map(|h| h.to_hex()),
            time: ctx.timestamp,
        }
    }

    /// Block time in unix seconds.
    pub fn unix_time(&self) -> i64 {
        self.time.timestamp()
    }
}

/// Parse a u64 carried as a decimal string; empty defaults to 0.
pub fn parse_u64(s: &str) -> u64 {
    s.parse().unwrap_or(0)
}

/// Parse an i64 carried as a decimal string; empty defaults to 0.
pub fn parse_i64(s: &str) -> i64 {
    s.parse().unwrap_or(0)
}

/// Parse an i32 carried as a decimal string; empty defaults to 0.
pub fn parse_i32(s: &str) -> i32 {
    s.parse().unwrap_or(0)
}

/// Parse a bool from its JSON forms.
pub fn parse_bool(s: &str) -> bool {
    matches!(s, "true" | "True" | "TRUE" | "1")
}

/// Validate an on-chain object id (decimal, possibly larger than
/// u64). Returns the digits or an error naming the field.
pub fn require_id(value: &str, event: &str, attribute: &str) -> Result<String, ModuleError> {
    let digits = value.trim();
    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
        return Err(ModuleError::MissingAttribute {
            event: event.to_string(),
            attribute: attribute.to_string(),
        });
    }
    Ok(digits.to_string())
}

/// Validate a decimal amount string (used for balances and rates,
/// which exceed u64). Accepts an optional leading sign.
pub fn parse_decimal(s: &str) -> String {
    let trimmed = s.trim();
    let body = trimmed.strip_prefix('-').unwrap_or(trimmed);
    if !body.is_empty() && body.chars().all(|c| c.is_ascii_digit()) {
        trimmed.to_string()
    } else {
        "0".to_string()
    }
}

/// Parse an RFC 3339 timestamp attribute, if present and valid.
pub fn parse_time(s: &str) -> Option<DateTime<Utc>> {
    s.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_parsing_defaults_instead_of_failing() {
        assert_eq!(parse_u64("123"), 123);
        assert_eq!(parse_u64(""), 0);
        assert_eq!(parse_u64("nope"), 0);
        assert_eq!(parse_i64("-5"), -5);
        assert_eq!(parse_i32("42"), 42);
    }

    #[test]
    fn bool_parsing_accepts_json_forms() {
        assert!(parse_bool("true"));
        assert!(parse_bool("1"));
        assert!(!parse_bool("false"));
        assert!(!parse_bool(""));
    }

    // Test critique: un id manquant ou non numérique est une erreur
    // nommant l'événement et l'attribut
    #[test]
    fn require_id_rejects_non_numeric() {
        assert_eq!(require_id("171", "EventCreateBucket", "bucket_id").unwrap(), "171");
        let err = require_id("", "EventCreateBucket", "bucket_id").unwrap_err();
        assert!(err.to_string().contains("bucket_id"));
        assert!(require_id("0xab", "EventCreateBucket", "bucket_id").is_err());
    }

    #[test]
    fn decimal_amounts_keep_sign_and_default_to_zero() {
        assert_eq!(parse_decimal("340282366920938463463374607431768211455"), "340282366920938463463374607431768211455");
        assert_eq!(parse_decimal("-17"), "-17");
        assert_eq!(parse_decimal("x"), "0");
    }
}
