use std::fmt;

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime};
use uuid::Uuid;

/// A column value normalised across engines.
///
/// Every backend converts its native values into this type and every value
/// reaches the wire through its [`Display`](fmt::Display) implementation:
///
/// | variant | text |
/// |---|---|
/// | `Null` | `<nil>` |
/// | `Bool` | `true` / `false` |
/// | `Int64`, `UInt64` | decimal digits |
/// | `Real32`, `Real64` | shortest representation that round-trips (`1.5`, `1`, `NaN`, `inf`) |
/// | `Numeric` | the engine's exact decimal digits, scale preserved |
/// | `Date` | `2024-01-31` |
/// | `Time` | `13:45:00`, fractional seconds only when non-zero |
/// | `DateTime` | `2024-01-31 13:45:00`, fractional seconds only when non-zero |
/// | `DateTimeOffset` | `2024-01-31 13:45:00 +02:00` |
/// | `Bytes` | `0x` followed by lowercase hex |
/// | `Uuid` | lowercase hyphenated |
/// | `Json` | compact JSON |
/// | `String` | text as stored; intervals, time with zone, network addresses and money use the server's own rendering |
#[derive(Debug, Clone, PartialEq)]
pub enum DatabaseValue {
    Null,
    String(String),
    Bool(bool),
    Int64(i64),
    UInt64(u64),
    Real32(f32),
    Real64(f64),
    Numeric(String),
    Date(NaiveDate),
    Time(NaiveTime),
    DateTime(NaiveDateTime),
    DateTimeOffset(DateTime<FixedOffset>),
    Bytes(Vec<u8>),
    Uuid(Uuid),
    Json(serde_json::Value),
}

const NULL_TEXT: &str = "<nil>";

impl DatabaseValue {
    #[must_use]
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }
}

impl fmt::Display for DatabaseValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str(NULL_TEXT),
            Self::String(value) | Self::Numeric(value) => f.write_str(value),
            Self::Bool(value) => write!(f, "{value}"),
            Self::Int64(value) => write!(f, "{value}"),
            Self::UInt64(value) => write!(f, "{value}"),
            Self::Real32(value) => write!(f, "{value}"),
            Self::Real64(value) => write!(f, "{value}"),
            Self::Date(value) => write!(f, "{}", value.format("%Y-%m-%d")),
            Self::Time(value) => write!(f, "{}", value.format("%H:%M:%S%.f")),
            Self::DateTime(value) => write!(f, "{}", value.format("%Y-%m-%d %H:%M:%S%.f")),
            Self::DateTimeOffset(value) => {
                write!(f, "{}", value.format("%Y-%m-%d %H:%M:%S%.f %:z"))
            }
            Self::Bytes(value) => write!(f, "0x{}", hex::encode(value)),
            Self::Uuid(value) => write!(f, "{}", value.hyphenated()),
            Self::Json(value) => write!(f, "{value}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr as _;

    use chrono::{NaiveDate, TimeZone as _};
    use pretty_assertions::assert_eq;

    use super::*;

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, 31).unwrap()
    }

    #[test]
    fn null_renders_as_nil_token() {
        assert_eq!(DatabaseValue::Null.to_string(), "<nil>");
    }

    #[test]
    fn renders_scalars() {
        assert_eq!(DatabaseValue::Bool(true).to_string(), "true");
        assert_eq!(DatabaseValue::Int64(-42).to_string(), "-42");
        assert_eq!(DatabaseValue::UInt64(u64::MAX).to_string(), "18446744073709551615");
        assert_eq!(DatabaseValue::Real64(1.5).to_string(), "1.5");
        assert_eq!(DatabaseValue::Real64(2.0).to_string(), "2");
        assert_eq!(DatabaseValue::Real32(0.25).to_string(), "0.25");
        assert_eq!(DatabaseValue::String("abc".into()).to_string(), "abc");
    }

    #[test]
    fn decimals_keep_their_scale() {
        assert_eq!(DatabaseValue::Numeric("12.3400".into()).to_string(), "12.3400");
        assert_eq!(
            DatabaseValue::Numeric("12345678901234567890123456789012.5".into()).to_string(),
            "12345678901234567890123456789012.5"
        );
    }

    #[test]
    fn renders_temporal_values() {
        let time = NaiveTime::from_hms_opt(13, 45, 0).unwrap();
        let fractional = NaiveTime::from_hms_milli_opt(13, 45, 0, 250).unwrap();

        assert_eq!(DatabaseValue::Date(date()).to_string(), "2024-01-31");
        assert_eq!(DatabaseValue::Time(time).to_string(), "13:45:00");
        assert_eq!(DatabaseValue::Time(fractional).to_string(), "13:45:00.250");
        assert_eq!(
            DatabaseValue::DateTime(date().and_time(time)).to_string(),
            "2024-01-31 13:45:00"
        );
        assert_eq!(
            DatabaseValue::DateTimeOffset(
                FixedOffset::east_opt(2 * 3600)
                    .unwrap()
                    .from_local_datetime(&date().and_time(time))
                    .unwrap()
            )
            .to_string(),
            "2024-01-31 13:45:00 +02:00"
        );
    }

    #[test]
    fn renders_binary_as_hex() {
        assert_eq!(
            DatabaseValue::Bytes(vec![0xde, 0xad, 0x01]).to_string(),
            "0xdead01"
        );
        assert_eq!(DatabaseValue::Bytes(vec![]).to_string(), "0x");
    }

    #[test]
    fn renders_uuid_and_json() {
        let uuid = Uuid::from_str("67e55044-10b1-426f-9247-bb680e5fe0c8").unwrap();

        assert_eq!(
            DatabaseValue::Uuid(uuid).to_string(),
            "67e55044-10b1-426f-9247-bb680e5fe0c8"
        );
        assert_eq!(
            DatabaseValue::Json(serde_json::json!({"a": [1, 2]})).to_string(),
            "{\"a\":[1,2]}"
        );
    }
}
