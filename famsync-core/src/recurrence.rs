//! Recurrence rule expansion.
//!
//! Expands a FREQ/INTERVAL rule anchored at a start time into a bounded,
//! strictly increasing list of occurrence start times. Expansion is pure:
//! the only notion of "now" is the caller-supplied `from_exclusive`.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Datelike, Duration, Months, NaiveDate, Timelike, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{SyncError, SyncResult};
use crate::event::CalendarEvent;

/// Hard upper bound on how far an open-ended expansion may reach.
pub const SAFETY_HORIZON_DAYS: i64 = 365;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Frequency {
    Daily,
    Weekly,
    Monthly,
    Yearly,
}

impl fmt::Display for Frequency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Frequency::Daily => write!(f, "DAILY"),
            Frequency::Weekly => write!(f, "WEEKLY"),
            Frequency::Monthly => write!(f, "MONTHLY"),
            Frequency::Yearly => write!(f, "YEARLY"),
        }
    }
}

impl FromStr for Frequency {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "DAILY" => Ok(Frequency::Daily),
            "WEEKLY" => Ok(Frequency::Weekly),
            "MONTHLY" => Ok(Frequency::Monthly),
            "YEARLY" => Ok(Frequency::Yearly),
            other => Err(SyncError::InvalidRule(format!(
                "unsupported frequency '{other}'"
            ))),
        }
    }
}

/// How a series ends. `Count` includes the anchor; `Until` is inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecurrenceEnd {
    Count(u32),
    Until(DateTime<Utc>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecurrenceRule {
    pub frequency: Frequency,
    pub interval: u32,
    pub end: Option<RecurrenceEnd>,
}

impl RecurrenceRule {
    pub fn new(frequency: Frequency, interval: u32) -> Self {
        RecurrenceRule {
            frequency,
            interval,
            end: None,
        }
    }

    pub fn with_count(mut self, count: u32) -> Self {
        self.end = Some(RecurrenceEnd::Count(count));
        self
    }

    pub fn with_until(mut self, until: DateTime<Utc>) -> Self {
        self.end = Some(RecurrenceEnd::Until(until));
        self
    }

    pub fn validate(&self) -> SyncResult<()> {
        if self.interval < 1 {
            return Err(SyncError::InvalidRule(format!(
                "interval must be at least 1, got {}",
                self.interval
            )));
        }
        if self.end == Some(RecurrenceEnd::Count(0)) {
            return Err(SyncError::InvalidRule("count must be at least 1".into()));
        }
        Ok(())
    }

    /// Start of the `index`-th occurrence (the anchor is index 0).
    ///
    /// Always computed from the anchor rather than from the previous
    /// occurrence, so a clamped month end (Jan 31 -> Feb 28) does not drift
    /// the rest of the series.
    fn nth(&self, anchor: DateTime<Utc>, index: u64) -> Option<DateTime<Utc>> {
        let steps = index.checked_mul(u64::from(self.interval))?;
        match self.frequency {
            Frequency::Daily => {
                let days = i64::try_from(steps).ok()?;
                anchor.checked_add_signed(Duration::try_days(days)?)
            }
            Frequency::Weekly => {
                let days = i64::try_from(steps.checked_mul(7)?).ok()?;
                anchor.checked_add_signed(Duration::try_days(days)?)
            }
            Frequency::Monthly => {
                let months = u32::try_from(steps).ok()?;
                anchor.checked_add_months(Months::new(months))
            }
            Frequency::Yearly => {
                let months = u32::try_from(steps.checked_mul(12)?).ok()?;
                anchor.checked_add_months(Months::new(months))
            }
        }
    }

    /// A lower bound on the index of the first occurrence after `from`.
    /// Lets expansion skip a long past without losing count bookkeeping.
    fn first_index_after(&self, anchor: DateTime<Utc>, from: DateTime<Utc>) -> u64 {
        if from <= anchor {
            return 0;
        }
        let interval = u64::from(self.interval);
        let elapsed_days = (from - anchor).num_days().max(0) as u64;
        match self.frequency {
            Frequency::Daily => elapsed_days / interval,
            Frequency::Weekly => elapsed_days / (7 * interval),
            Frequency::Monthly => {
                let months = (from.year() - anchor.year()) as i64 * 12
                    + from.month() as i64
                    - anchor.month() as i64;
                (months - 1).max(0) as u64 / interval
            }
            Frequency::Yearly => {
                let years = (from.year() - anchor.year()) as i64;
                (years - 1).max(0) as u64 / interval
            }
        }
    }

    /// Serialize as an iCalendar RRULE value (without the `RRULE:` prefix).
    pub fn to_rrule(&self) -> String {
        let mut parts = vec![format!("FREQ={}", self.frequency)];
        if self.interval != 1 {
            parts.push(format!("INTERVAL={}", self.interval));
        }
        match self.end {
            Some(RecurrenceEnd::Count(n)) => parts.push(format!("COUNT={n}")),
            Some(RecurrenceEnd::Until(until)) => {
                parts.push(format!("UNTIL={}", until.format("%Y%m%dT%H%M%SZ")))
            }
            None => {}
        }
        parts.join(";")
    }
}

impl fmt::Display for RecurrenceRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let unit = match self.frequency {
            Frequency::Daily => "day",
            Frequency::Weekly => "week",
            Frequency::Monthly => "month",
            Frequency::Yearly => "year",
        };
        if self.interval == 1 {
            write!(f, "every {unit}")?;
        } else {
            write!(f, "every {} {unit}s", self.interval)?;
        }
        match self.end {
            Some(RecurrenceEnd::Count(n)) => write!(f, ", {n} times"),
            Some(RecurrenceEnd::Until(until)) => write!(f, ", until {}", until.format("%Y-%m-%d")),
            None => Ok(()),
        }
    }
}

impl FromStr for RecurrenceRule {
    type Err = SyncError;

    /// Parse an RRULE value such as `FREQ=WEEKLY;INTERVAL=2;COUNT=5`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let value = s.trim().trim_start_matches("RRULE:");
        let mut frequency = None;
        let mut interval = 1;
        let mut end = None;

        for part in value.split(';').filter(|p| !p.is_empty()) {
            let (key, val) = part
                .split_once('=')
                .ok_or_else(|| SyncError::InvalidRule(format!("malformed rule part '{part}'")))?;
            match key.to_ascii_uppercase().as_str() {
                "FREQ" => frequency = Some(val.parse::<Frequency>()?),
                "INTERVAL" => {
                    interval = val.parse().map_err(|_| {
                        SyncError::InvalidRule(format!("invalid INTERVAL '{val}'"))
                    })?
                }
                "COUNT" => {
                    let count = val
                        .parse()
                        .map_err(|_| SyncError::InvalidRule(format!("invalid COUNT '{val}'")))?;
                    end = Some(RecurrenceEnd::Count(count));
                }
                "UNTIL" => end = Some(RecurrenceEnd::Until(parse_until(val)?)),
                "WKST" => {}
                other => {
                    return Err(SyncError::InvalidRule(format!(
                        "unsupported rule part '{other}'"
                    )));
                }
            }
        }

        let rule = RecurrenceRule {
            frequency: frequency
                .ok_or_else(|| SyncError::InvalidRule("missing FREQ".into()))?,
            interval,
            end,
        };
        rule.validate()?;
        Ok(rule)
    }
}

fn parse_until(val: &str) -> SyncResult<DateTime<Utc>> {
    let trimmed = val.trim_end_matches('Z');
    if let Ok(dt) = chrono::NaiveDateTime::parse_from_str(trimmed, "%Y%m%dT%H%M%S") {
        return Ok(dt.and_utc());
    }
    NaiveDate::parse_from_str(trimmed, "%Y%m%d")
        .ok()
        .and_then(|d| d.and_hms_opt(23, 59, 59))
        .map(|dt| dt.and_utc())
        .ok_or_else(|| SyncError::InvalidRule(format!("invalid UNTIL '{val}'")))
}

/// Expand `rule` anchored at `anchor` into occurrence starts strictly after
/// `from_exclusive`.
///
/// Expansion stops at whichever comes first:
/// - `limit` returned occurrences
/// - the rule's own COUNT/UNTIL
/// - `stop_before` (exclusive), or when absent, [`SAFETY_HORIZON_DAYS`] past
///   the later of `anchor` and `from_exclusive`
pub fn expand(
    rule: &RecurrenceRule,
    anchor: DateTime<Utc>,
    from_exclusive: DateTime<Utc>,
    limit: usize,
    stop_before: Option<DateTime<Utc>>,
) -> SyncResult<Vec<DateTime<Utc>>> {
    rule.validate()?;

    let mut occurrences = Vec::new();
    if limit == 0 {
        return Ok(occurrences);
    }

    let bound = stop_before.unwrap_or_else(|| {
        anchor
            .max(from_exclusive)
            .checked_add_signed(Duration::days(SAFETY_HORIZON_DAYS))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    });

    let mut index = rule.first_index_after(anchor, from_exclusive);
    loop {
        if matches!(rule.end, Some(RecurrenceEnd::Count(count)) if index >= u64::from(count)) {
            break;
        }
        let Some(occurrence) = rule.nth(anchor, index) else {
            break;
        };
        if occurrence >= bound {
            break;
        }
        if matches!(rule.end, Some(RecurrenceEnd::Until(until)) if occurrence > until) {
            break;
        }
        if occurrence > from_exclusive {
            occurrences.push(occurrence);
            if occurrences.len() == limit {
                break;
            }
        }
        index += 1;
    }

    Ok(occurrences)
}

/// Start of the first event after `anchor` that occupies the same time-of-day
/// slot under a different title. A recurring slot stops being free there, so
/// the result is suitable as `stop_before` for [`expand`].
pub fn next_occupant(
    anchor: DateTime<Utc>,
    title: &str,
    others: &[CalendarEvent],
) -> Option<DateTime<Utc>> {
    let slot = (anchor.hour(), anchor.minute());
    others
        .iter()
        .filter(|e| e.title != title)
        .filter(|e| e.start > anchor && (e.start.hour(), e.start.minute()) == slot)
        .map(|e| e.start)
        .min()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Weekday};

    fn at(y: i32, m: u32, d: u32, h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, 0, 0).unwrap()
    }

    fn just_before(dt: DateTime<Utc>) -> DateTime<Utc> {
        dt - Duration::seconds(1)
    }

    #[test]
    fn test_weekly_returns_limit_mondays() {
        let anchor = at(2025, 1, 6, 9);
        let rule = RecurrenceRule::new(Frequency::Weekly, 1);

        let occurrences = expand(&rule, anchor, just_before(anchor), 10, None).unwrap();

        assert_eq!(occurrences.len(), 10);
        assert_eq!(occurrences[0], anchor);
        for pair in occurrences.windows(2) {
            assert_eq!(pair[1] - pair[0], Duration::days(7));
        }
        assert!(occurrences.iter().all(|o| o.weekday() == Weekday::Mon));
    }

    #[test]
    fn test_expand_is_deterministic_and_strictly_increasing() {
        let anchor = at(2024, 1, 31, 18);
        for frequency in [
            Frequency::Daily,
            Frequency::Weekly,
            Frequency::Monthly,
            Frequency::Yearly,
        ] {
            for interval in 1..=3 {
                let rule = RecurrenceRule::new(frequency, interval);
                let first = expand(&rule, anchor, anchor - Duration::days(3), 50, None).unwrap();
                let second = expand(&rule, anchor, anchor - Duration::days(3), 50, None).unwrap();
                assert_eq!(first, second);
                assert!(first.windows(2).all(|w| w[0] < w[1]), "{frequency} x{interval}");
            }
        }
    }

    #[test]
    fn test_stop_before_truncates_below_limit() {
        let anchor = at(2025, 2, 1, 7);
        let rule = RecurrenceRule::new(Frequency::Daily, 1);
        let stop = anchor + Duration::days(21);

        let occurrences = expand(&rule, anchor, just_before(anchor), 100, Some(stop)).unwrap();

        assert_eq!(occurrences.len(), 21);
        assert!(occurrences.iter().all(|o| *o < stop));
    }

    #[test]
    fn test_open_ended_expansion_stops_at_horizon() {
        let anchor = at(2025, 1, 1, 12);
        let rule = RecurrenceRule::new(Frequency::Daily, 1);

        let occurrences = expand(&rule, anchor, just_before(anchor), usize::MAX, None).unwrap();

        assert_eq!(occurrences.len(), SAFETY_HORIZON_DAYS as usize);
        let last = *occurrences.last().unwrap();
        assert!(last < anchor + Duration::days(SAFETY_HORIZON_DAYS));
    }

    #[test]
    fn test_open_ended_expansion_near_max_date_does_not_overflow() {
        let anchor = DateTime::<Utc>::MAX_UTC - Duration::days(10);
        let rule = RecurrenceRule::new(Frequency::Daily, 1);

        let result = expand(&rule, anchor, anchor - Duration::seconds(1), 3, None).unwrap();

        assert_eq!(
            result,
            vec![anchor, anchor + Duration::days(1), anchor + Duration::days(2)]
        );
    }

    #[test]
    fn test_zero_interval_is_invalid() {
        let rule = RecurrenceRule::new(Frequency::Weekly, 0);
        let anchor = at(2025, 1, 6, 9);
        assert!(matches!(
            expand(&rule, anchor, anchor, 5, None),
            Err(SyncError::InvalidRule(_))
        ));
    }

    #[test]
    fn test_month_end_clamps_without_drift() {
        let anchor = at(2025, 1, 31, 10);
        let rule = RecurrenceRule::new(Frequency::Monthly, 1);

        let occurrences = expand(&rule, anchor, just_before(anchor), 4, None).unwrap();
        let days: Vec<u32> = occurrences.iter().map(|o| o.day()).collect();

        assert_eq!(days, vec![31, 28, 31, 30]);
    }

    #[test]
    fn test_leap_day_yearly_clamps_to_feb_28() {
        let anchor = at(2024, 2, 29, 8);
        let rule = RecurrenceRule::new(Frequency::Yearly, 1);

        let occurrences = expand(&rule, anchor, just_before(anchor), 2, None).unwrap();

        assert_eq!(occurrences[1], at(2025, 2, 28, 8));
    }

    #[test]
    fn test_count_includes_occurrences_before_window() {
        let anchor = at(2025, 1, 1, 9);
        let rule = RecurrenceRule::new(Frequency::Daily, 1).with_count(5);

        let occurrences = expand(&rule, anchor, at(2025, 1, 3, 9), 100, None).unwrap();

        assert_eq!(occurrences, vec![at(2025, 1, 4, 9), at(2025, 1, 5, 9)]);
    }

    #[test]
    fn test_until_is_inclusive() {
        let anchor = at(2025, 1, 1, 9);
        let rule = RecurrenceRule::new(Frequency::Weekly, 1).with_until(at(2025, 1, 15, 9));

        let occurrences = expand(&rule, anchor, just_before(anchor), 100, None).unwrap();

        assert_eq!(occurrences.len(), 3);
    }

    #[test]
    fn test_skip_ahead_matches_full_walk() {
        let anchor = at(2020, 5, 31, 6);
        let rule = RecurrenceRule::new(Frequency::Monthly, 2);
        let from = at(2024, 3, 15, 0);

        let skipped = expand(&rule, anchor, from, 5, None).unwrap();
        let walked: Vec<_> = (0..200)
            .filter_map(|i| rule.nth(anchor, i))
            .filter(|o| *o > from)
            .take(5)
            .collect();

        assert_eq!(skipped.len(), 5);
        assert_eq!(skipped, walked);
    }

    #[test]
    fn test_rrule_string_roundtrip() {
        let rule = RecurrenceRule::new(Frequency::Weekly, 2).with_count(6);
        assert_eq!(rule.to_rrule(), "FREQ=WEEKLY;INTERVAL=2;COUNT=6");
        assert_eq!(rule.to_rrule().parse::<RecurrenceRule>().unwrap(), rule);
    }

    #[test]
    fn test_rrule_rejects_byday() {
        assert!("FREQ=WEEKLY;BYDAY=MO,WE".parse::<RecurrenceRule>().is_err());
        assert!("INTERVAL=2".parse::<RecurrenceRule>().is_err());
    }

    #[test]
    fn test_next_occupant_finds_different_title_in_slot() {
        let anchor = at(2025, 3, 3, 16);
        let make = |title: &str, start: DateTime<Utc>| CalendarEvent {
            external_id: title.to_lowercase(),
            calendar_id: "family".into(),
            title: title.into(),
            start,
            end: start + Duration::hours(1),
            location: None,
            notes: None,
            is_all_day: false,
            recurrence: None,
            occurrence: None,
            alarms: vec![],
            last_modified: None,
        };
        let others = vec![
            make("Piano", at(2025, 3, 10, 16)),
            make("Swim", at(2025, 3, 24, 16)),
            make("Swim", at(2025, 3, 17, 9)),
        ];

        assert_eq!(next_occupant(anchor, "Piano", &others), Some(at(2025, 3, 24, 16)));
    }
}
