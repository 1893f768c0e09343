use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use time::format_description::well_known::Rfc3339;
use time::macros::format_description;
use time::{Date, OffsetDateTime, PrimitiveDateTime};

use crate::{TidemarkError, TidemarkResult};

/// Instant in UTC, stored as microseconds since the Unix epoch.
///
/// Every backend persists this as a `BIGINT`, which keeps ordering and range
/// predicates identical across sqlite, postgres and mysql.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct Timestamp(pub i64);

impl Timestamp {
    pub fn as_micros(self) -> i64 {
        self.0
    }

    pub fn from_datetime(value: OffsetDateTime) -> Self {
        Self((value.unix_timestamp_nanos() / 1_000) as i64)
    }

    pub fn to_datetime(self) -> TidemarkResult<OffsetDateTime> {
        OffsetDateTime::from_unix_timestamp_nanos(i128::from(self.0) * 1_000)
            .map_err(|err| TidemarkError::invalid(format!("timestamp {} out of range: {err}", self.0)))
    }

    pub fn from_ymd(year: i32, month: u8, day: u8) -> TidemarkResult<Self> {
        let month = time::Month::try_from(month)
            .map_err(|err| TidemarkError::invalid(format!("invalid month {month}: {err}")))?;
        let date = Date::from_calendar_date(year, month, day)
            .map_err(|err| TidemarkError::invalid(format!("invalid date: {err}")))?;
        Ok(Self::from_datetime(date.midnight().assume_utc()))
    }

    /// Accepts RFC 3339, `YYYY-MM-DD HH:MM:SS` / `YYYY-MM-DDTHH:MM:SS` (read as UTC)
    /// and bare `YYYY-MM-DD` dates.
    pub fn parse(value: &str) -> TidemarkResult<Self> {
        let value = value.trim();
        if let Ok(parsed) = OffsetDateTime::parse(value, &Rfc3339) {
            return Ok(Self::from_datetime(parsed));
        }
        if let Ok(parsed) = PrimitiveDateTime::parse(
            value,
            format_description!("[year]-[month]-[day] [hour]:[minute]:[second]"),
        ) {
            return Ok(Self::from_datetime(parsed.assume_utc()));
        }
        if let Ok(parsed) = PrimitiveDateTime::parse(
            value,
            format_description!("[year]-[month]-[day]T[hour]:[minute]:[second]"),
        ) {
            return Ok(Self::from_datetime(parsed.assume_utc()));
        }
        let date = Date::parse(value, format_description!("[year]-[month]-[day]"))
            .map_err(|err| TidemarkError::invalid(format!("invalid timestamp '{value}': {err}")))?;
        Ok(Self::from_datetime(date.midnight().assume_utc()))
    }

    pub fn format_day(self) -> TidemarkResult<String> {
        self.to_datetime()?
            .format(format_description!("[year]-[month]-[day]"))
            .map_err(|err| TidemarkError::invalid(format!("format timestamp: {err}")))
    }

    pub fn format_iso8601(self) -> TidemarkResult<String> {
        self.to_datetime()?
            .format(format_description!(
                "[year]-[month]-[day]T[hour]:[minute]:[second].[subsecond digits:6][offset_hour sign:mandatory]:[offset_minute]"
            ))
            .map_err(|err| TidemarkError::invalid(format!("format timestamp: {err}")))
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.format_iso8601() {
            Ok(text) => f.write_str(&text),
            Err(_) => write!(f, "{}us", self.0),
        }
    }
}

impl FromStr for Timestamp {
    type Err = TidemarkError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Timestamp::parse(value)
    }
}

impl From<OffsetDateTime> for Timestamp {
    fn from(value: OffsetDateTime) -> Self {
        Timestamp::from_datetime(value)
    }
}

impl Serialize for Timestamp {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_i64(self.0)
    }
}

impl<'de> Deserialize<'de> for Timestamp {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = i64::deserialize(deserializer)?;
        Ok(Timestamp(value))
    }
}
