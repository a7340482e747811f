//! Typed handler arguments.
//!
//! Raw strings taken from the path or query are converted once per request
//! into an [`ArgValue`]; the handler thunk then moves each value out with
//! [`FromArg::from_value`].

use chrono::{DateTime, NaiveDate, Utc};
use uuid::Uuid;

/// Conversion target of a bound parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    Str,
    I32,
    I64,
    U32,
    U64,
    F64,
    Bool,
    Uuid,
    DateTime,
    Date,
}

impl ParamKind {
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            ParamKind::Str => "string",
            ParamKind::I32 => "i32",
            ParamKind::I64 => "i64",
            ParamKind::U32 => "u32",
            ParamKind::U64 => "u64",
            ParamKind::F64 => "f64",
            ParamKind::Bool => "bool",
            ParamKind::Uuid => "uuid",
            ParamKind::DateTime => "datetime",
            ParamKind::Date => "date",
        }
    }

    /// Convert a raw string into a value of this kind.
    ///
    /// Returns `None` when `raw` is not a valid representation.
    #[must_use]
    pub fn convert(self, raw: &str) -> Option<ArgValue> {
        let v = match self {
            ParamKind::Str => ArgValue::Str(raw.to_string()),
            ParamKind::I32 => ArgValue::I32(raw.trim().parse().ok()?),
            ParamKind::I64 => ArgValue::I64(raw.trim().parse().ok()?),
            ParamKind::U32 => ArgValue::U32(raw.trim().parse().ok()?),
            ParamKind::U64 => ArgValue::U64(raw.trim().parse().ok()?),
            ParamKind::F64 => ArgValue::F64(raw.trim().parse().ok()?),
            ParamKind::Bool => ArgValue::Bool(parse_bool(raw)?),
            ParamKind::Uuid => ArgValue::Uuid(Uuid::parse_str(raw.trim()).ok()?),
            ParamKind::DateTime => ArgValue::DateTime(
                DateTime::parse_from_rfc3339(raw.trim())
                    .ok()?
                    .with_timezone(&Utc),
            ),
            ParamKind::Date => ArgValue::Date(NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d").ok()?),
        };
        Some(v)
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// A converted argument.
#[derive(Debug, Clone, PartialEq)]
pub enum ArgValue {
    /// Absent optional parameter, or a slot the thunk fills itself
    /// (session/request injection).
    Missing,
    Str(String),
    I32(i32),
    I64(i64),
    U32(u32),
    U64(u64),
    F64(f64),
    Bool(bool),
    Uuid(Uuid),
    DateTime(DateTime<Utc>),
    Date(NaiveDate),
}

/// Types a handler parameter may have.
pub trait FromArg: Sized + 'static {
    const KIND: ParamKind;
    /// `true` for `Option<T>`: absence is not an error.
    const OPTIONAL: bool = false;

    fn from_value(value: ArgValue) -> Option<Self>;
}

macro_rules! impl_from_arg {
    ($($ty:ty => $kind:ident),* $(,)?) => {
        $(
            impl FromArg for $ty {
                const KIND: ParamKind = ParamKind::$kind;

                fn from_value(value: ArgValue) -> Option<Self> {
                    match value {
                        ArgValue::$kind(v) => Some(v),
                        _ => None,
                    }
                }
            }
        )*
    };
}

impl_from_arg! {
    String => Str,
    i32 => I32,
    i64 => I64,
    u32 => U32,
    u64 => U64,
    f64 => F64,
    bool => Bool,
    Uuid => Uuid,
    DateTime<Utc> => DateTime,
    NaiveDate => Date,
}

impl<T: FromArg> FromArg for Option<T> {
    const KIND: ParamKind = T::KIND;
    const OPTIONAL: bool = true;

    fn from_value(value: ArgValue) -> Option<Self> {
        match value {
            ArgValue::Missing => Some(None),
            other => T::from_value(other).map(Some),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conversions() {
        assert_eq!(ParamKind::I32.convert("2023"), Some(ArgValue::I32(2023)));
        assert_eq!(ParamKind::I32.convert("xx"), None);
        assert_eq!(ParamKind::U32.convert("-1"), None);
        assert_eq!(ParamKind::Bool.convert("TRUE"), Some(ArgValue::Bool(true)));
        assert!(ParamKind::Uuid
            .convert("67e55044-10b1-426f-9247-bb680e5fe0c8")
            .is_some());
        assert!(ParamKind::DateTime.convert("2024-02-29T12:00:00+02:00").is_some());
        assert_eq!(
            ParamKind::Date.convert("2024-02-29"),
            NaiveDate::from_ymd_opt(2024, 2, 29).map(ArgValue::Date)
        );
        assert_eq!(ParamKind::Date.convert("2023-02-29"), None);
    }

    #[test]
    fn test_option_accepts_missing() {
        assert_eq!(<Option<u32>>::from_value(ArgValue::Missing), Some(None));
        assert_eq!(<Option<u32>>::from_value(ArgValue::U32(5)), Some(Some(5)));
        assert_eq!(u32::from_value(ArgValue::Missing), None);
        assert!(<Option<String> as FromArg>::OPTIONAL);
        assert!(!<String as FromArg>::OPTIONAL);
    }
}
