//! `Timestamp` and `Duration` runtime values, built on `chrono`.

use std::fmt;

use chrono::{DateTime, Datelike, Timelike, Utc};

/// An absolute instant with nanosecond resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Timestamp {
    instant: DateTime<Utc>,
}

impl Timestamp {
    pub fn from_utc(instant: DateTime<Utc>) -> Self {
        Timestamp { instant }
    }

    pub fn epoch() -> Self {
        Timestamp { instant: DateTime::<Utc>::from_timestamp(0, 0).expect("epoch is representable") }
    }

    pub fn parse_rfc3339(s: &str) -> Option<Self> {
        if s.len() < 20 || s.len() > 30 {
            return None;
        }
        DateTime::parse_from_rfc3339(s).ok().map(|dt| Timestamp { instant: dt.with_timezone(&Utc) })
    }

    pub fn as_utc(&self) -> DateTime<Utc> {
        self.instant
    }

    pub fn checked_add(&self, d: Duration) -> Option<Timestamp> {
        self.instant.checked_add_signed(d.as_chrono()).map(|instant| Timestamp { instant })
    }

    pub fn checked_sub_duration(&self, d: Duration) -> Option<Timestamp> {
        self.instant.checked_sub_signed(d.as_chrono()).map(|instant| Timestamp { instant })
    }

    pub fn sub_timestamp(&self, other: &Timestamp) -> Duration {
        Duration::from_chrono(self.instant - other.instant)
    }

    /// Calendar components shifted by a fixed UTC offset in seconds — the
    /// seam a `Clock` implementation fills in for named IANA zones.
    pub fn components_at_offset(&self, offset_seconds: i32) -> CalendarComponents {
        let offset = chrono::FixedOffset::east_opt(offset_seconds).unwrap_or_else(|| chrono::FixedOffset::east_opt(0).unwrap());
        let local = self.instant.with_timezone(&offset);
        CalendarComponents {
            year: local.year(),
            month0: local.month0() as i64,
            day_of_month0: (local.day() - 1) as i64,
            day_of_week: local.weekday().num_days_from_sunday() as i64,
            day_of_year0: (local.ordinal() - 1) as i64,
            hour: local.hour() as i64,
            minute: local.minute() as i64,
            second: local.second() as i64,
            millisecond: (local.nanosecond() / 1_000_000) as i64,
        }
    }

    pub fn utc_components(&self) -> CalendarComponents {
        self.components_at_offset(0)
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.instant.to_rfc3339_opts(chrono::SecondsFormat::AutoSi, true))
    }
}

/// Calendar fields read off a `Timestamp` at some offset. `day_of_month0`
/// and `day_of_year0` are 0-based, matching the open question in the
/// grounding spec: the `getDayOf*` family is 0-based, inconsistent with
/// most calendar APIs.
pub struct CalendarComponents {
    pub year: i32,
    pub month0: i64,
    pub day_of_month0: i64,
    pub day_of_week: i64,
    pub day_of_year0: i64,
    pub hour: i64,
    pub minute: i64,
    pub second: i64,
    pub millisecond: i64,
}

/// A length of time, stored as seconds + nanoseconds like `google.protobuf.Duration`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Duration {
    pub seconds: i64,
    pub nanos: i32,
}

impl Duration {
    pub fn new(seconds: i64, nanos: i32) -> Self {
        Duration { seconds, nanos }
    }

    pub fn zero() -> Self {
        Duration { seconds: 0, nanos: 0 }
    }

    fn as_chrono(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.seconds) + chrono::Duration::nanoseconds(self.nanos as i64)
    }

    fn from_chrono(d: chrono::Duration) -> Self {
        let seconds = d.num_seconds();
        let nanos = (d - chrono::Duration::seconds(seconds)).num_nanoseconds().unwrap_or(0) as i32;
        Duration { seconds, nanos }
    }

    pub fn checked_add(&self, other: Duration) -> Option<Duration> {
        let total_nanos = (self.nanos as i64).checked_add(other.nanos as i64)?;
        let (carry, nanos) = (total_nanos.div_euclid(1_000_000_000), total_nanos.rem_euclid(1_000_000_000));
        let seconds = self.seconds.checked_add(other.seconds)?.checked_add(carry)?;
        Some(Duration { seconds, nanos: nanos as i32 })
    }

    pub fn checked_sub(&self, other: Duration) -> Option<Duration> {
        self.checked_add(Duration { seconds: -other.seconds, nanos: -other.nanos })
    }

    pub fn total_hours(&self) -> i64 {
        self.seconds / 3600
    }
    pub fn total_minutes(&self) -> i64 {
        self.seconds / 60
    }
    pub fn total_seconds(&self) -> i64 {
        self.seconds
    }
    pub fn total_milliseconds(&self) -> i64 {
        self.seconds * 1000 + (self.nanos as i64) / 1_000_000
    }

    /// Parses the Go-style duration form: optional sign, a non-empty run of
    /// `<decimal><unit>` pairs with units `h, m, s, ms, us, µs, ns`.
    pub fn parse_go_form(s: &str) -> Option<Self> {
        let mut rest = s;
        let negative = if let Some(stripped) = rest.strip_prefix('-') {
            rest = stripped;
            true
        } else if let Some(stripped) = rest.strip_prefix('+') {
            rest = stripped;
            false
        } else {
            false
        };
        if rest.is_empty() {
            return None;
        }
        let mut total = Duration::zero();
        let mut saw_any = false;
        while !rest.is_empty() {
            let digits_end = rest.find(|c: char| !c.is_ascii_digit() && c != '.').unwrap_or(rest.len());
            if digits_end == 0 {
                return None;
            }
            let number_part = &rest[..digits_end];
            rest = &rest[digits_end..];
            let unit_len = [("ms", 2), ("us", 2), ("\u{b5}s", 2), ("ns", 2), ("h", 1), ("m", 1), ("s", 1)]
                .into_iter()
                .find(|(u, _)| rest.starts_with(u))?;
            let unit = &rest[..unit_len.1];
            rest = &rest[unit_len.1..];
            let value: f64 = number_part.parse().ok()?;
            let unit_seconds = match unit {
                "h" => 3600.0,
                "m" => 60.0,
                "s" => 1.0,
                "ms" => 1e-3,
                "us" | "\u{b5}s" => 1e-6,
                "ns" => 1e-9,
                _ => return None,
            };
            let total_seconds = value * unit_seconds;
            let whole = total_seconds.trunc() as i64;
            let frac_nanos = ((total_seconds - total_seconds.trunc()) * 1e9).round() as i32;
            total = total.checked_add(Duration::new(whole, frac_nanos))?;
            saw_any = true;
        }
        if !saw_any {
            return None;
        }
        if negative {
            Some(Duration::new(-total.seconds, -total.nanos))
        } else {
            Some(total)
        }
    }
}

impl fmt::Display for Duration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:09}s", self.seconds, self.nanos.unsigned_abs())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn epoch_round_trips_through_rfc3339() {
        let ts = Timestamp::parse_rfc3339("1970-01-01T00:00:00Z").unwrap();
        assert_eq!(ts, Timestamp::epoch());
    }

    #[test]
    fn adding_then_subtracting_a_duration_is_identity() {
        let ts = Timestamp::parse_rfc3339("1970-01-01T00:00:00Z").unwrap();
        let d = Duration::parse_go_form("1s").unwrap();
        let shifted = ts.checked_add(d).unwrap();
        let back = shifted.checked_sub_duration(d).unwrap();
        assert_eq!(ts, back);
    }

    #[test]
    fn go_form_parses_compound_units() {
        let d = Duration::parse_go_form("1h30m").unwrap();
        assert_eq!(d.total_minutes(), 90);
    }

    #[test]
    fn go_form_rejects_empty_string() {
        assert!(Duration::parse_go_form("").is_none());
    }
}
