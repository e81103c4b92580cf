//! Half-open time intervals and the normalized interval lists that all
//! availability and partial-data math runs on.
//!
//! Backend intervals are expressed as `start/end` strings over RFC 3339
//! instants. Internally everything is UTC; request binding localizes
//! date-only endpoints into the request time zone before converting.

use std::fmt;

use chrono::{DateTime, NaiveDate, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{GranaryError, Result};

/// Instant format used on the wire: RFC 3339 with millisecond precision.
const INSTANT_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.3fZ";

/// A half-open interval `[start, end)` of UTC instants.
///
/// Zero-length and backwards intervals are rejected at construction, so any
/// `Interval` in flight is known to cover at least one instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Interval {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
}

impl Interval {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Self> {
        if start >= end {
            return Err(GranaryError::Binding(format!(
                "interval start '{}' must precede end '{}'",
                start, end
            )));
        }
        Ok(Interval { start, end })
    }

    pub fn start(&self) -> DateTime<Utc> {
        self.start
    }

    pub fn end(&self) -> DateTime<Utc> {
        self.end
    }

    /// True when `other` lies entirely within this interval.
    pub fn contains(&self, other: &Interval) -> bool {
        self.start <= other.start && other.end <= self.end
    }

    pub fn overlaps(&self, other: &Interval) -> bool {
        self.start < other.end && other.start < self.end
    }

    /// Parse a `start/end` pair. Endpoints are RFC 3339 instants; bare dates
    /// are taken as midnight in `zone`.
    pub fn parse(raw: &str, zone: Tz) -> Result<Self> {
        let (start, end) = raw.split_once('/').ok_or_else(|| {
            GranaryError::Binding(format!("interval '{}' is not of the form start/end", raw))
        })?;
        Interval::new(parse_instant(start, zone)?, parse_instant(end, zone)?)
    }
}

fn parse_instant(raw: &str, zone: Tz) -> Result<DateTime<Utc>> {
    if let Ok(instant) = DateTime::parse_from_rfc3339(raw) {
        return Ok(instant.with_timezone(&Utc));
    }
    let date = NaiveDate::parse_from_str(raw, "%Y-%m-%d").map_err(|_| {
        GranaryError::Binding(format!(
            "'{}' is neither an RFC 3339 instant nor a calendar date",
            raw
        ))
    })?;
    zone.from_local_datetime(&date.and_time(NaiveTime::MIN))
        .earliest()
        .map(|local| local.with_timezone(&Utc))
        .ok_or_else(|| {
            GranaryError::Binding(format!("midnight of '{}' does not exist in zone {}", raw, zone))
        })
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}",
            self.start.format(INSTANT_FORMAT),
            self.end.format(INSTANT_FORMAT)
        )
    }
}

impl Serialize for Interval {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Interval {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        // Dictionary files carry availability in UTC.
        Interval::parse(&raw, Tz::UTC).map_err(D::Error::custom)
    }
}

/// An always-normalized interval list: sorted by start, overlap-free, with
/// abutting neighbors merged. The canonical form availability is reported in.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IntervalSet(Vec<Interval>);

impl IntervalSet {
    pub fn new(intervals: impl IntoIterator<Item = Interval>) -> Self {
        let mut raw: Vec<Interval> = intervals.into_iter().collect();
        raw.sort();
        let mut merged: Vec<Interval> = Vec::with_capacity(raw.len());
        for interval in raw {
            match merged.last_mut() {
                Some(last) if interval.start <= last.end => {
                    last.end = last.end.max(interval.end);
                }
                _ => merged.push(interval),
            }
        }
        IntervalSet(merged)
    }

    pub fn empty() -> Self {
        IntervalSet(Vec::new())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Interval> {
        self.0.iter()
    }

    pub fn as_slice(&self) -> &[Interval] {
        &self.0
    }

    pub fn union(&self, other: &IntervalSet) -> IntervalSet {
        IntervalSet::new(self.0.iter().chain(other.0.iter()).copied())
    }

    /// Pairwise intersection of two normalized lists.
    pub fn intersect(&self, other: &IntervalSet) -> IntervalSet {
        let (a, b) = (&self.0, &other.0);
        let (mut i, mut j) = (0, 0);
        let mut out = Vec::new();
        while i < a.len() && j < b.len() {
            let start = a[i].start.max(b[j].start);
            let end = a[i].end.min(b[j].end);
            if start < end {
                out.push(Interval { start, end });
            }
            if a[i].end <= b[j].end {
                i += 1;
            } else {
                j += 1;
            }
        }
        // The sweep emits in order without overlaps already.
        IntervalSet(out)
    }

    /// True when `interval` is fully covered. Normalization guarantees a
    /// covered interval lies within a single entry.
    pub fn covers(&self, interval: &Interval) -> bool {
        self.0.iter().any(|held| held.contains(interval))
    }
}

impl FromIterator<Interval> for IntervalSet {
    fn from_iter<I: IntoIterator<Item = Interval>>(iter: I) -> Self {
        IntervalSet::new(iter)
    }
}

impl fmt::Display for IntervalSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (idx, interval) in self.0.iter().enumerate() {
            if idx > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", interval)?;
        }
        write!(f, "]")
    }
}
