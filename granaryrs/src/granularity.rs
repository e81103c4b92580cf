//! Time grains and the request-level bucketing policy.
//!
//! Grain arithmetic is calendar arithmetic: a "day" is a local calendar day
//! in the grain's zone, which may span 23 or 25 hours across an offset
//! transition. Minute and hour buckets are fixed-duration and advance on the
//! instant instead. All instants are stored in UTC.

use std::fmt;
use std::str::FromStr;

use chrono::{
    DateTime, Datelike, Days, Duration, LocalResult, Months, NaiveDate, NaiveDateTime, NaiveTime,
    TimeZone, Timelike, Utc,
};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize, Serializer};

use crate::error::{GranaryError, Result};
use crate::intervals::Interval;

/// A calendar period. Variants are ordered from finest to coarsest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeGrain {
    Minute,
    Hour,
    Day,
    Week,
    Month,
    Quarter,
    Year,
}

impl TimeGrain {
    /// The ISO 8601 period the backend expects for this grain.
    pub fn period_iso(&self) -> &'static str {
        match self {
            TimeGrain::Minute => "PT1M",
            TimeGrain::Hour => "PT1H",
            TimeGrain::Day => "P1D",
            TimeGrain::Week => "P1W",
            TimeGrain::Month => "P1M",
            TimeGrain::Quarter => "P3M",
            TimeGrain::Year => "P1Y",
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            TimeGrain::Minute => "minute",
            TimeGrain::Hour => "hour",
            TimeGrain::Day => "day",
            TimeGrain::Week => "week",
            TimeGrain::Month => "month",
            TimeGrain::Quarter => "quarter",
            TimeGrain::Year => "year",
        }
    }

    /// Whether buckets of `finer` compose exactly into buckets of `self`.
    ///
    /// Days stack into weeks, months, and every coarser grain; weeks do not
    /// stack into months, quarters, or years because they straddle their
    /// boundaries.
    pub fn satisfied_by(&self, finer: TimeGrain) -> bool {
        if finer == *self {
            return true;
        }
        match self {
            TimeGrain::Minute => false,
            TimeGrain::Hour | TimeGrain::Day | TimeGrain::Week => finer < *self,
            TimeGrain::Month | TimeGrain::Quarter | TimeGrain::Year => {
                finer < *self && finer != TimeGrain::Week
            }
        }
    }

    /// Attach a zone, producing a grain that can bucket instants.
    pub fn zoned(self, time_zone: Tz) -> ZonedTimeGrain {
        ZonedTimeGrain {
            grain: self,
            time_zone,
        }
    }
}

impl FromStr for TimeGrain {
    type Err = GranaryError;

    fn from_str(raw: &str) -> Result<Self> {
        match raw {
            "minute" => Ok(TimeGrain::Minute),
            "hour" => Ok(TimeGrain::Hour),
            "day" => Ok(TimeGrain::Day),
            "week" => Ok(TimeGrain::Week),
            "month" => Ok(TimeGrain::Month),
            "quarter" => Ok(TimeGrain::Quarter),
            "year" => Ok(TimeGrain::Year),
            other => Err(GranaryError::Binding(format!(
                "unknown time grain '{}'",
                other
            ))),
        }
    }
}

impl fmt::Display for TimeGrain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A time grain fixed to a zone: the unit of bucketing for a query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ZonedTimeGrain {
    grain: TimeGrain,
    time_zone: Tz,
}

impl ZonedTimeGrain {
    pub fn new(grain: TimeGrain, time_zone: Tz) -> Self {
        ZonedTimeGrain { grain, time_zone }
    }

    pub fn grain(&self) -> TimeGrain {
        self.grain
    }

    pub fn time_zone(&self) -> Tz {
        self.time_zone
    }

    /// The same grain re-zoned, used when a template override grain adopts
    /// the request time zone.
    pub fn with_zone(&self, time_zone: Tz) -> ZonedTimeGrain {
        ZonedTimeGrain {
            grain: self.grain,
            time_zone,
        }
    }

    /// Start of the bucket containing `instant`.
    pub fn round_floor(&self, instant: DateTime<Utc>) -> DateTime<Utc> {
        let local = instant.with_timezone(&self.time_zone).naive_local();
        let date = local.date();
        let floored = match self.grain {
            TimeGrain::Minute => {
                let seconds = i64::from(local.time().num_seconds_from_midnight()) / 60 * 60;
                date.and_time(NaiveTime::MIN) + Duration::seconds(seconds)
            }
            TimeGrain::Hour => {
                let seconds = i64::from(local.time().num_seconds_from_midnight()) / 3600 * 3600;
                date.and_time(NaiveTime::MIN) + Duration::seconds(seconds)
            }
            TimeGrain::Day => date.and_time(NaiveTime::MIN),
            TimeGrain::Week => {
                let monday = date - Days::new(u64::from(date.weekday().num_days_from_monday()));
                monday.and_time(NaiveTime::MIN)
            }
            TimeGrain::Month => first_of_month(date).and_time(NaiveTime::MIN),
            TimeGrain::Quarter => {
                let mut first = first_of_month(date);
                for _ in 0..(date.month0() % 3) {
                    first = first_of_month(first - Days::new(1));
                }
                first.and_time(NaiveTime::MIN)
            }
            TimeGrain::Year => {
                let jan_first = date - Days::new(u64::from(date.ordinal0()));
                jan_first.and_time(NaiveTime::MIN)
            }
        };
        self.localize(floored)
    }

    /// Start of the bucket after the one beginning at `bucket_start`.
    ///
    /// Expects a value produced by [`round_floor`](Self::round_floor).
    pub fn next(&self, bucket_start: DateTime<Utc>) -> DateTime<Utc> {
        match self.grain {
            TimeGrain::Minute => bucket_start + Duration::minutes(1),
            TimeGrain::Hour => bucket_start + Duration::hours(1),
            TimeGrain::Day => self.advance_calendar(bucket_start, |date| date + Days::new(1)),
            TimeGrain::Week => self.advance_calendar(bucket_start, |date| date + Days::new(7)),
            TimeGrain::Month => self.advance_calendar(bucket_start, |date| date + Months::new(1)),
            TimeGrain::Quarter => {
                self.advance_calendar(bucket_start, |date| date + Months::new(3))
            }
            TimeGrain::Year => self.advance_calendar(bucket_start, |date| date + Months::new(12)),
        }
    }

    fn advance_calendar(
        &self,
        bucket_start: DateTime<Utc>,
        step: impl Fn(NaiveDate) -> NaiveDate,
    ) -> DateTime<Utc> {
        let date = bucket_start.with_timezone(&self.time_zone).date_naive();
        self.localize(step(date).and_time(NaiveTime::MIN))
    }

    /// Both endpoints of `interval` sit on bucket boundaries.
    pub fn aligns(&self, interval: &Interval) -> bool {
        self.round_floor(interval.start()) == interval.start()
            && self.round_floor(interval.end()) == interval.end()
    }

    fn localize(&self, naive: NaiveDateTime) -> DateTime<Utc> {
        match self.time_zone.from_local_datetime(&naive) {
            LocalResult::Single(local) => local.with_timezone(&Utc),
            LocalResult::Ambiguous(first, _) => first.with_timezone(&Utc),
            LocalResult::None => {
                // The wall time fell in an offset-transition gap; take the
                // first instant after it.
                let mut probe = naive;
                for _ in 0..8 {
                    probe += Duration::minutes(30);
                    if let Some(local) = self.time_zone.from_local_datetime(&probe).earliest() {
                        return local.with_timezone(&Utc);
                    }
                }
                Utc.from_utc_datetime(&naive)
            }
        }
    }
}

impl fmt::Display for ZonedTimeGrain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]", self.grain, self.time_zone)
    }
}

fn first_of_month(date: NaiveDate) -> NaiveDate {
    date - Days::new(u64::from(date.day0()))
}

/// The request-level bucketing policy: either a single bucket per requested
/// interval (`All`) or fixed calendar buckets at a grain. Both carry the
/// request time zone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Granularity {
    All(Tz),
    Grain(ZonedTimeGrain),
}

impl Granularity {
    /// Bind a user-facing granularity name in a zone.
    pub fn from_name(name: &str, time_zone: Tz) -> Result<Self> {
        if name == "all" {
            return Ok(Granularity::All(time_zone));
        }
        Ok(Granularity::Grain(TimeGrain::from_str(name)?.zoned(time_zone)))
    }

    pub fn time_zone(&self) -> Tz {
        match self {
            Granularity::All(zone) => *zone,
            Granularity::Grain(zoned) => zoned.time_zone(),
        }
    }

    pub fn is_all(&self) -> bool {
        matches!(self, Granularity::All(_))
    }

    pub fn grain(&self) -> Option<&ZonedTimeGrain> {
        match self {
            Granularity::All(_) => None,
            Granularity::Grain(zoned) => Some(zoned),
        }
    }

    /// All granularity accepts any interval; a grain requires both endpoints
    /// on bucket boundaries.
    pub fn aligns(&self, interval: &Interval) -> bool {
        match self {
            Granularity::All(_) => true,
            Granularity::Grain(zoned) => zoned.aligns(interval),
        }
    }

    /// Enumerate the buckets covering `intervals`: under `All` the intervals
    /// themselves, under a grain every grain bucket touching them.
    pub fn intervals_over(&self, intervals: &[Interval]) -> Vec<Interval> {
        match self {
            Granularity::All(_) => intervals.to_vec(),
            Granularity::Grain(zoned) => {
                let mut buckets = Vec::new();
                for interval in intervals {
                    let mut start = zoned.round_floor(interval.start());
                    while start < interval.end() {
                        let end = zoned.next(start);
                        if let Ok(bucket) = Interval::new(start, end) {
                            buckets.push(bucket);
                        }
                        start = end;
                    }
                }
                buckets
            }
        }
    }
}

impl fmt::Display for Granularity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Granularity::All(_) => f.write_str("all"),
            Granularity::Grain(zoned) => write!(f, "{}", zoned),
        }
    }
}

/// Serializes to the backend's native granularity object: `{"type":"all"}`
/// or a period granularity with an explicit zone.
impl Serialize for Granularity {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        use serde::ser::SerializeMap;
        match self {
            Granularity::All(_) => {
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry("type", "all")?;
                map.end()
            }
            Granularity::Grain(zoned) => {
                let mut map = serializer.serialize_map(Some(3))?;
                map.serialize_entry("type", "period")?;
                map.serialize_entry("period", zoned.grain().period_iso())?;
                map.serialize_entry("timeZone", zoned.time_zone().name())?;
                map.end()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn utc(raw: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(raw)
            .expect("test instant")
            .with_timezone(&Utc)
    }

    #[test]
    fn floors_to_calendar_boundaries_in_utc() {
        let day = TimeGrain::Day.zoned(Tz::UTC);
        assert_eq!(
            day.round_floor(utc("2024-05-15T13:45:10Z")),
            utc("2024-05-15T00:00:00Z")
        );
        let week = TimeGrain::Week.zoned(Tz::UTC);
        // 2024-05-15 is a Wednesday; the ISO week starts Monday the 13th.
        assert_eq!(
            week.round_floor(utc("2024-05-15T13:45:10Z")),
            utc("2024-05-13T00:00:00Z")
        );
        let quarter = TimeGrain::Quarter.zoned(Tz::UTC);
        assert_eq!(
            quarter.round_floor(utc("2024-05-15T13:45:10Z")),
            utc("2024-04-01T00:00:00Z")
        );
        let year = TimeGrain::Year.zoned(Tz::UTC);
        assert_eq!(
            year.round_floor(utc("2024-05-15T13:45:10Z")),
            utc("2024-01-01T00:00:00Z")
        );
    }

    #[test]
    fn day_buckets_follow_offset_transitions() {
        let day = TimeGrain::Day.zoned(Tz::America__New_York);
        // 2024-03-10 is the US spring-forward date: a 23-hour day.
        let start = day.round_floor(utc("2024-03-10T12:00:00Z"));
        assert_eq!(start, utc("2024-03-10T05:00:00Z"));
        assert_eq!(day.next(start), utc("2024-03-11T04:00:00Z"));
    }

    #[test]
    fn hour_buckets_are_fixed_duration_across_transitions() {
        let hour = TimeGrain::Hour.zoned(Tz::America__New_York);
        // 2024-11-03 01:30 EDT, inside the repeated fall-back hour.
        let start = hour.round_floor(utc("2024-11-03T05:30:00Z"));
        assert_eq!(start, utc("2024-11-03T05:00:00Z"));
        assert_eq!(hour.next(start), utc("2024-11-03T06:00:00Z"));
    }

    #[test]
    fn week_does_not_satisfy_month() {
        assert!(TimeGrain::Week.satisfied_by(TimeGrain::Day));
        assert!(TimeGrain::Month.satisfied_by(TimeGrain::Day));
        assert!(TimeGrain::Year.satisfied_by(TimeGrain::Month));
        assert!(!TimeGrain::Month.satisfied_by(TimeGrain::Week));
        assert!(!TimeGrain::Year.satisfied_by(TimeGrain::Week));
        assert!(!TimeGrain::Day.satisfied_by(TimeGrain::Week));
    }

    #[test]
    fn alignment_checks_both_endpoints() {
        let month = Granularity::from_name("month", Tz::UTC).expect("granularity");
        let aligned = Interval::parse("2024-01-01/2024-03-01", Tz::UTC).expect("interval");
        let ragged = Interval::parse("2024-01-01/2024-03-15", Tz::UTC).expect("interval");
        assert!(month.aligns(&aligned));
        assert!(!month.aligns(&ragged));
        let all = Granularity::from_name("all", Tz::UTC).expect("granularity");
        assert!(all.aligns(&ragged));
    }

    #[test]
    fn buckets_enumerate_per_grain_and_pass_through_for_all() {
        let interval = Interval::parse("2024-01-01/2024-01-04", Tz::UTC).expect("interval");
        let day = Granularity::from_name("day", Tz::UTC).expect("granularity");
        let buckets = day.intervals_over(std::slice::from_ref(&interval));
        assert_eq!(buckets.len(), 3);
        assert_eq!(buckets[0].start(), utc("2024-01-01T00:00:00Z"));
        assert_eq!(buckets[2].end(), utc("2024-01-04T00:00:00Z"));

        let all = Granularity::from_name("all", Tz::UTC).expect("granularity");
        assert_eq!(all.intervals_over(std::slice::from_ref(&interval)), vec![interval]);
    }

    #[test]
    fn serializes_to_native_granularity_objects() {
        let all = Granularity::All(Tz::UTC);
        assert_eq!(serde_json::to_value(all).expect("json"), json!({"type": "all"}));

        let day = Granularity::Grain(TimeGrain::Day.zoned(Tz::America__New_York));
        assert_eq!(
            serde_json::to_value(day).expect("json"),
            json!({"type": "period", "period": "P1D", "timeZone": "America/New_York"})
        );
    }

    #[test]
    fn unknown_names_are_binding_errors() {
        assert!(Granularity::from_name("fortnight", Tz::UTC).is_err());
    }
}
