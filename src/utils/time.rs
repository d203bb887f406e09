//! RFC 3339 serde adapters for session and message timestamps.

use serde::{Deserialize, Deserializer, Serializer};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

/// Deserialize an RFC 3339 formatted string into an OffsetDateTime
pub fn deserialize<'de, D>(deserializer: D) -> Result<OffsetDateTime, D::Error>
where
    D: Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    parse(&s).map_err(serde::de::Error::custom)
}

/// Serialize an OffsetDateTime into an RFC 3339 formatted string
pub fn serialize<S>(datetime: &OffsetDateTime, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    let s = datetime
        .format(&Rfc3339)
        .map_err(serde::ser::Error::custom)?;
    serializer.serialize_str(&s)
}

/// Parse a timestamp the way the backend writes them.
///
/// The backend emits naive ISO 8601 timestamps (no offset) for some records; those are taken to
/// be UTC.
pub fn parse(s: &str) -> Result<OffsetDateTime, time::error::Parse> {
    match OffsetDateTime::parse(s, &Rfc3339) {
        Ok(datetime) => Ok(datetime),
        Err(err) => {
            let naive = format!("{s}Z");
            OffsetDateTime::parse(&naive, &Rfc3339).map_err(|_| err)
        }
    }
}

/// The same adapters for optional timestamps.
pub mod option {
    use serde::{Deserialize, Deserializer, Serializer};
    use time::OffsetDateTime;

    /// Deserialize an optional RFC 3339 string.
    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<OffsetDateTime>, D::Error>
    where
        D: Deserializer<'de>,
    {
        match Option::<String>::deserialize(deserializer)? {
            Some(s) => super::parse(&s)
                .map(Some)
                .map_err(serde::de::Error::custom),
            None => Ok(None),
        }
    }

    /// Serialize an optional OffsetDateTime.
    pub fn serialize<S>(datetime: &Option<OffsetDateTime>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match datetime {
            Some(datetime) => super::serialize(datetime, serializer),
            None => serializer.serialize_none(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn naive_timestamps_are_utc() {
        let parsed = parse("2025-06-01T12:30:00.123456").unwrap();
        assert_eq!(parsed.offset(), time::UtcOffset::UTC);
        assert_eq!(parsed.hour(), 12);
    }

    #[test]
    fn offset_timestamps_round_trip() {
        let parsed = parse("2025-06-01T12:30:00+09:00").unwrap();
        assert_eq!(parsed.offset().whole_hours(), 9);
    }
}
