//! Date literals.
//!
//! Every literal resolves to a half-open UTC range `[start, end)`. Days,
//! weeks, months and the named periods cover whole calendar units; hour
//! offsets and full timestamps are instants one microsecond wide.

use chrono::{DateTime, Datelike, Days, Duration, Months, NaiveDate, TimeZone, Utc};

/// Largest accepted relative offset, in units. Keeps arithmetic in range.
pub const MAX_OFFSET: i64 = 100_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Unit {
    Hour,
    Day,
    Week,
    Month,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Named {
    Today,
    Yesterday,
    Tomorrow,
    ThisWeek,
    LastWeek,
    ThisMonth,
    LastMonth,
}

impl Named {
    pub const ALL: [(&'static str, Self); 7] = [
        ("today", Self::Today),
        ("yesterday", Self::Yesterday),
        ("tomorrow", Self::Tomorrow),
        ("this_week", Self::ThisWeek),
        ("last_week", Self::LastWeek),
        ("this_month", Self::ThisMonth),
        ("last_month", Self::LastMonth),
    ];
}

/// A parsed date literal, not yet anchored to a clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DateSpec {
    Day(NaiveDate),
    Instant(DateTime<Utc>),
    Offset { amount: i64, unit: Unit },
    Named(Named),
}

/// Half-open UTC range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl DateRange {
    #[must_use]
    pub fn contains(&self, ts: &DateTime<Utc>) -> bool {
        *ts >= self.start && *ts < self.end
    }

    fn instant(ts: DateTime<Utc>) -> Self {
        Self {
            start: ts,
            end: ts + Duration::microseconds(1),
        }
    }

    fn days(first: NaiveDate, count: u64) -> Option<Self> {
        let end = first.checked_add_days(Days::new(count))?;
        Some(Self {
            start: midnight(first),
            end: midnight(end),
        })
    }
}

fn midnight(day: NaiveDate) -> DateTime<Utc> {
    Utc.from_utc_datetime(&day.and_time(chrono::NaiveTime::MIN))
}

/// Parse a date literal. Returns `None` for anything unrecognized.
#[must_use]
pub fn parse(raw: &str) -> Option<DateSpec> {
    let raw = raw.trim();
    let lower = raw.to_ascii_lowercase();
    if let Some((_, named)) = Named::ALL.iter().find(|(name, _)| *name == lower) {
        return Some(DateSpec::Named(*named));
    }
    if let Some(rest) = raw.strip_prefix(['-', '+']) {
        if !rest.is_ascii() {
            return None;
        }
        let (digits, unit) = rest.split_at(rest.len().checked_sub(1)?);
        let unit = match unit {
            "h" => Unit::Hour,
            "d" => Unit::Day,
            "w" => Unit::Week,
            "m" => Unit::Month,
            _ => return None,
        };
        let magnitude: i64 = digits.parse().ok()?;
        if magnitude > MAX_OFFSET {
            return None;
        }
        let amount = if raw.starts_with('-') { -magnitude } else { magnitude };
        return Some(DateSpec::Offset { amount, unit });
    }
    if let Ok(day) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return Some(DateSpec::Day(day));
    }
    crate::time::parse(raw).map(DateSpec::Instant)
}

fn shift_months(day: NaiveDate, amount: i64) -> Option<NaiveDate> {
    let months = Months::new(u32::try_from(amount.unsigned_abs()).ok()?);
    if amount < 0 {
        day.checked_sub_months(months)
    } else {
        day.checked_add_months(months)
    }
}

fn shift_days(day: NaiveDate, amount: i64) -> Option<NaiveDate> {
    let days = Days::new(amount.unsigned_abs());
    if amount < 0 {
        day.checked_sub_days(days)
    } else {
        day.checked_add_days(days)
    }
}

/// Anchor a literal at `now`. `None` only when the result leaves chrono's
/// representable range.
#[must_use]
pub fn resolve(spec: DateSpec, now: DateTime<Utc>) -> Option<DateRange> {
    let today = now.date_naive();
    let since_monday = u64::from(today.weekday().num_days_from_monday());
    let monday = today.checked_sub_days(Days::new(since_monday))?;
    let first_of_month = today.with_day(1)?;
    match spec {
        DateSpec::Day(day) => DateRange::days(day, 1),
        DateSpec::Instant(ts) => Some(DateRange::instant(ts)),
        DateSpec::Offset { amount, unit } => match unit {
            Unit::Hour => Some(DateRange::instant(
                now.checked_add_signed(Duration::hours(amount))?,
            )),
            Unit::Day => DateRange::days(shift_days(today, amount)?, 1),
            Unit::Week => DateRange::days(shift_days(today, amount.checked_mul(7)?)?, 1),
            Unit::Month => DateRange::days(shift_months(today, amount)?, 1),
        },
        DateSpec::Named(named) => match named {
            Named::Today => DateRange::days(today, 1),
            Named::Yesterday => DateRange::days(shift_days(today, -1)?, 1),
            Named::Tomorrow => DateRange::days(shift_days(today, 1)?, 1),
            Named::ThisWeek => DateRange::days(monday, 7),
            Named::LastWeek => DateRange::days(shift_days(monday, -7)?, 7),
            Named::ThisMonth => Some(DateRange {
                start: midnight(first_of_month),
                end: midnight(shift_months(first_of_month, 1)?),
            }),
            Named::LastMonth => Some(DateRange {
                start: midnight(shift_months(first_of_month, -1)?),
                end: midnight(first_of_month),
            }),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(s: &str) -> DateTime<Utc> {
        crate::time::parse(s).unwrap()
    }

    // Wednesday.
    const NOW: &str = "2025-03-12T15:30:00Z";

    #[test]
    fn parses_every_literal_shape() {
        assert_eq!(
            parse("2025-01-31"),
            Some(DateSpec::Day(NaiveDate::from_ymd_opt(2025, 1, 31).unwrap()))
        );
        assert_eq!(
            parse("-7d"),
            Some(DateSpec::Offset {
                amount: -7,
                unit: Unit::Day
            })
        );
        assert_eq!(
            parse("+2w"),
            Some(DateSpec::Offset {
                amount: 2,
                unit: Unit::Week
            })
        );
        assert_eq!(parse("This_Week"), Some(DateSpec::Named(Named::ThisWeek)));
        assert!(matches!(parse("2025-01-31T10:00:00Z"), Some(DateSpec::Instant(_))));
        assert_eq!(parse("soon"), None);
        assert_eq!(parse("-7y"), None);
        assert_eq!(parse("-"), None);
        assert_eq!(parse("-999999999d"), None);
    }

    #[test]
    fn relative_days_cover_whole_day() {
        let range = resolve(parse("-7d").unwrap(), at(NOW)).unwrap();
        assert_eq!(range.start, at("2025-03-05T00:00:00Z"));
        assert_eq!(range.end, at("2025-03-06T00:00:00Z"));
    }

    #[test]
    fn hours_are_instants() {
        let range = resolve(parse("+3h").unwrap(), at(NOW)).unwrap();
        assert_eq!(range.start, at("2025-03-12T18:30:00Z"));
        assert!(range.contains(&at("2025-03-12T18:30:00Z")));
        assert!(!range.contains(&at("2025-03-12T18:30:01Z")));
    }

    #[test]
    fn named_periods() {
        let now = at(NOW);
        let week = resolve(DateSpec::Named(Named::ThisWeek), now).unwrap();
        assert_eq!(week.start, at("2025-03-10T00:00:00Z"));
        assert_eq!(week.end, at("2025-03-17T00:00:00Z"));

        let last_week = resolve(DateSpec::Named(Named::LastWeek), now).unwrap();
        assert_eq!(last_week.start, at("2025-03-03T00:00:00Z"));
        assert_eq!(last_week.end, week.start);

        let last_month = resolve(DateSpec::Named(Named::LastMonth), now).unwrap();
        assert_eq!(last_month.start, at("2025-02-01T00:00:00Z"));
        assert_eq!(last_month.end, at("2025-03-01T00:00:00Z"));

        let yesterday = resolve(DateSpec::Named(Named::Yesterday), now).unwrap();
        assert!(yesterday.contains(&at("2025-03-11T23:59:59Z")));
        assert!(!yesterday.contains(&at("2025-03-12T00:00:00Z")));
    }

    #[test]
    fn month_offsets_clamp_to_month_end() {
        let now = at("2025-03-31T12:00:00Z");
        let range = resolve(parse("-1m").unwrap(), now).unwrap();
        assert_eq!(range.start, at("2025-02-28T00:00:00Z"));
    }
}
