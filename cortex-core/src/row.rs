//! The atomic storage unit: `(id, prop, valu, time)` rows and the
//! storable value type.

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::errors::{CortexError, CortexResult};

/// 128-bit opaque identifier rendered as 32 lowercase hex chars.
/// Unique per entity and stable for life.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Guid(String);

impl Guid {
    /// Draw a fresh random guid.
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().simple().to_string())
    }

    /// Validate and adopt an existing 32-char lowercase hex string.
    pub fn parse(text: &str) -> CortexResult<Self> {
        let ok = text.len() == 32
            && text
                .chars()
                .all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase());
        if !ok {
            return Err(CortexError::InvalidParam {
                name: "id".to_string(),
                mesg: format!("{text:?} is not a 32-char lowercase hex guid"),
            });
        }
        Ok(Self(text.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for Guid {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for Guid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A storable scalar, plus `List` for query literals and by-strategy
/// arguments. `List` fails the canstor predicate and is rejected on insert.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Valu {
    Int(i64),
    Str(String),
    Bytes(Vec<u8>),
    List(Vec<Valu>),
}

impl Valu {
    /// The canstor predicate: may this value be written to a cortex?
    pub fn canstor(&self) -> bool {
        !matches!(self, Valu::List(_))
    }

    /// Compare against another value of the same variant.
    /// Cross-variant comparisons have no defined order.
    pub fn cmp_same(&self, other: &Valu) -> Option<Ordering> {
        match (self, other) {
            (Valu::Int(a), Valu::Int(b)) => Some(a.cmp(b)),
            (Valu::Str(a), Valu::Str(b)) => Some(a.cmp(b)),
            (Valu::Bytes(a), Valu::Bytes(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Valu::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Valu::Str(v) => Some(v),
            _ => None,
        }
    }
}

impl From<i64> for Valu {
    fn from(v: i64) -> Self {
        Valu::Int(v)
    }
}

impl From<&str> for Valu {
    fn from(v: &str) -> Self {
        Valu::Str(v.to_string())
    }
}

impl From<String> for Valu {
    fn from(v: String) -> Self {
        Valu::Str(v)
    }
}

impl From<Vec<u8>> for Valu {
    fn from(v: Vec<u8>) -> Self {
        Valu::Bytes(v)
    }
}

/// Parse an integer with an optional sign and `0x`/`0o`/`0b` base prefix.
pub fn parse_int(text: &str) -> Option<i64> {
    let text = text.trim();
    let (neg, digits) = match text.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, text.strip_prefix('+').unwrap_or(text)),
    };
    let (radix, digits) = if let Some(hex) = digits.strip_prefix("0x") {
        (16, hex)
    } else if let Some(oct) = digits.strip_prefix("0o") {
        (8, oct)
    } else if let Some(bin) = digits.strip_prefix("0b") {
        (2, bin)
    } else {
        (10, digits)
    };
    let magnitude = i64::from_str_radix(digits, radix).ok()?;
    if neg {
        magnitude.checked_neg()
    } else {
        Some(magnitude)
    }
}

/// Current time in epoch milliseconds. Producers stamp rows with this;
/// the store never re-timestamps.
pub fn now() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// One row of storage: `(id, prop, valu, time)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Row {
    pub id: Guid,
    pub prop: String,
    pub valu: Valu,
    pub time: i64,
}

impl Row {
    /// Build a row, case-folding the property name.
    pub fn new(id: Guid, prop: impl Into<String>, valu: impl Into<Valu>, time: i64) -> Self {
        let mut prop = prop.into();
        prop.make_ascii_lowercase();
        Self {
            id,
            prop,
            valu: valu.into(),
            time,
        }
    }
}

/// Reject rows that a cortex cannot store.
pub fn req_stor_rows(rows: &[Row]) -> CortexResult<()> {
    for row in rows {
        if row.prop.is_empty() {
            return Err(CortexError::InvalidParam {
                name: "prop".to_string(),
                mesg: "empty property name".to_string(),
            });
        }
        if !row.valu.canstor() {
            return Err(CortexError::BadStorValu {
                name: row.prop.clone(),
                mesg: "value fails the canstor predicate".to_string(),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guid_is_32_lowercase_hex() {
        let guid = Guid::new();
        assert_eq!(guid.as_str().len(), 32);
        assert!(guid
            .as_str()
            .chars()
            .all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
        assert!(Guid::parse(guid.as_str()).is_ok());
    }

    #[test]
    fn guid_parse_rejects_bad_input() {
        assert!(Guid::parse("short").is_err());
        assert!(Guid::parse(&"A".repeat(32)).is_err());
        assert!(Guid::parse(&"g".repeat(32)).is_err());
    }

    #[test]
    fn parse_int_handles_base_prefixes() {
        assert_eq!(parse_int("10"), Some(10));
        assert_eq!(parse_int("0x10"), Some(16));
        assert_eq!(parse_int("0o10"), Some(8));
        assert_eq!(parse_int("0b10"), Some(2));
        assert_eq!(parse_int("-0x10"), Some(-16));
        assert_eq!(parse_int("woot"), None);
    }

    #[test]
    fn row_new_folds_prop_case() {
        let row = Row::new(Guid::new(), "Foo:Bar", 1, 0);
        assert_eq!(row.prop, "foo:bar");
    }

    #[test]
    fn canstor_rejects_lists() {
        let rows = vec![Row::new(
            Guid::new(),
            "foo:bar",
            Valu::List(vec![Valu::Int(1)]),
            0,
        )];
        let err = req_stor_rows(&rows).unwrap_err();
        assert_eq!(err.kind(), "BadStorValu");
    }

    #[test]
    fn cmp_same_is_variant_scoped() {
        use std::cmp::Ordering;
        assert_eq!(Valu::Int(1).cmp_same(&Valu::Int(2)), Some(Ordering::Less));
        assert_eq!(Valu::Int(1).cmp_same(&Valu::Str("x".into())), None);
    }
}
