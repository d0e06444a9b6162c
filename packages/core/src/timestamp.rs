//! ISO-8601 timestamps with a fixed millisecond layout.
//!
//! Every timestamp in a job document is written as `YYYY-MM-DDTHH:MM:SS.mmmZ`.
//! With a fixed width, string order equals chronological order, which is what
//! lets a store compare `process_expiration` against "now" without knowing
//! anything about dates.

use chrono::{DateTime, SecondsFormat, TimeDelta, Utc};
use serde::{Deserialize, Deserializer, Serializer};

/// Milliseconds since the epoch of `9999-12-31T23:59:59.999Z`, the last
/// instant the four-digit-year layout can hold.
const LATEST_MILLIS: i64 = 253_402_300_799_999;

/// The latest timestamp that keeps the fixed layout.
pub fn latest() -> DateTime<Utc> {
    DateTime::<Utc>::UNIX_EPOCH + TimeDelta::milliseconds(LATEST_MILLIS)
}

/// Render a timestamp in the persisted layout.
pub fn format(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Parse a persisted timestamp. Any RFC 3339 offset is accepted and
/// normalised to UTC.
pub fn parse(s: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    Ok(DateTime::parse_from_rfc3339(s)?.with_timezone(&Utc))
}

pub fn serialize<S>(at: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_str(&format(at))
}

pub fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    parse(&raw).map_err(serde::de::Error::custom)
}

/// Same layout for optional fields; `None` is written as `null`.
pub mod option {
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(at: &Option<DateTime<Utc>>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match at {
            Some(at) => serializer.serialize_str(&super::format(at)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = Option::<String>::deserialize(deserializer)?;
        raw.map(|s| super::parse(&s).map_err(serde::de::Error::custom))
            .transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn formats_with_millis_and_zulu() {
        let at = Utc
            .with_ymd_and_hms(2016, 4, 2, 1, 2, 3)
            .unwrap()
            .checked_add_signed(chrono::Duration::milliseconds(456))
            .unwrap();
        assert_eq!(format(&at), "2016-04-02T01:02:03.456Z");
        assert_eq!(parse("2016-04-02T01:02:03.456Z").unwrap(), at);
    }

    #[test]
    fn latest_is_the_last_four_digit_year() {
        assert_eq!(format(&latest()), "9999-12-31T23:59:59.999Z");
        assert_eq!(parse("9999-12-31T23:59:59.999Z").unwrap(), latest());
    }

    #[test]
    fn string_order_matches_time_order() {
        let early = parse("2016-04-02T01:02:03.456Z").unwrap();
        let late = parse("2016-04-02T01:02:13.056Z").unwrap();
        assert!(format(&early) < format(&late));
    }

    #[test]
    fn offsets_normalise_to_utc() {
        let at = parse("2016-04-02T03:02:03.000+02:00").unwrap();
        assert_eq!(format(&at), "2016-04-02T01:02:03.000Z");
    }
}
