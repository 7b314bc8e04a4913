//! Turning what the user typed into UTC instants.
//!
//! ISO forms ("2025-03-20", "2025-03-20 15:00") are read directly; anything
//! else goes through fuzzydate ("tomorrow at 5pm", "next fri"). Local wall
//! times are converted with the system timezone. All-day events are filed at
//! UTC midnight of their date, matching how the calendar files store them.

use std::ops::Range;

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Local, NaiveDate, NaiveDateTime, TimeZone, Utc};

/// A parsed start or end.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum When {
    Day(NaiveDate),
    At(DateTime<Utc>),
}

impl When {
    pub fn is_all_day(&self) -> bool {
        matches!(self, When::Day(_))
    }

    pub fn to_utc(self) -> DateTime<Utc> {
        match self {
            When::Day(d) => Utc.from_utc_datetime(&d.and_time(chrono::NaiveTime::MIN)),
            When::At(dt) => dt,
        }
    }

    /// +1 hour for timed starts, +1 day for all-day starts.
    pub fn default_end(self) -> When {
        match self {
            When::Day(d) => When::Day(d + Duration::days(1)),
            When::At(dt) => When::At(dt + Duration::hours(1)),
        }
    }

    pub fn plus(self, duration: Duration) -> When {
        match self {
            When::Day(d) => When::Day(d + duration),
            When::At(dt) => When::At(dt + duration),
        }
    }
}

const ISO_DATETIME_FORMATS: [&str; 3] = ["%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M", "%Y-%m-%dT%H:%M:%S"];

/// Parse a date or date/time. Input without a time component is all-day.
pub fn parse_when(input: &str) -> Result<When> {
    let trimmed = input.trim();

    if let Ok(date) = NaiveDate::parse_from_str(trimmed, "%Y-%m-%d") {
        return Ok(When::Day(date));
    }
    for format in ISO_DATETIME_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(trimmed, format) {
            return Ok(When::At(local_to_utc(naive)?));
        }
    }

    let expanded = expand_abbreviations(trimmed);
    let naive = fuzzydate::parse(&expanded)
        .map_err(|_| anyhow::anyhow!("Could not parse date/time: \"{}\"", input))?;

    if has_time_component(trimmed) {
        Ok(When::At(local_to_utc(naive)?))
    } else {
        Ok(When::Day(naive.date()))
    }
}

/// Parse an occurrence start. A bare date is UTC midnight, where all-day
/// occurrences start.
pub fn parse_instant(input: &str) -> Result<DateTime<Utc>> {
    Ok(parse_when(input)?.to_utc())
}

/// Last instant of a series. A bare date includes that whole local day.
pub fn parse_until(input: &str) -> Result<DateTime<Utc>> {
    match parse_when(input)? {
        When::Day(d) => Ok(local_midnight(d + Duration::days(1))? - Duration::seconds(1)),
        When::At(dt) => Ok(dt),
    }
}

/// Parse an end: a duration after `start` ("45m"), or a date/time,
/// optionally prefixed with "until" or "to".
pub fn parse_end(input: &str, start: When) -> Result<When> {
    if let Ok(duration) = parse_duration(input) {
        return Ok(start.plus(duration));
    }

    let cleaned = input
        .strip_prefix("until ")
        .or_else(|| input.strip_prefix("to "))
        .unwrap_or(input);
    parse_when(cleaned)
}

pub fn parse_duration(input: &str) -> Result<Duration> {
    let std_dur = humantime::parse_duration(input.trim())
        .with_context(|| format!("Could not parse duration: \"{}\"", input))?;
    Duration::from_std(std_dur).context("Duration too large")
}

/// Range for agenda commands. `from` defaults to today, `to` to a week
/// after `from`. Both are whole local days.
pub fn date_range(from: Option<&str>, to: Option<&str>) -> Result<Range<DateTime<Utc>>> {
    let start_day = match from {
        Some(input) => day_of(parse_when(input)?),
        None => Local::now().date_naive(),
    };
    let end_day = match to {
        Some(input) => day_of(parse_when(input)?) + Duration::days(1),
        None => start_day + Duration::days(7),
    };
    if end_day <= start_day {
        anyhow::bail!("--to must not be before --from");
    }

    Ok(local_midnight(start_day)?..local_midnight(end_day)?)
}

fn day_of(when: When) -> NaiveDate {
    match when {
        When::Day(d) => d,
        When::At(dt) => dt.with_timezone(&Local).date_naive(),
    }
}

fn local_midnight(day: NaiveDate) -> Result<DateTime<Utc>> {
    local_to_utc(day.and_time(chrono::NaiveTime::MIN))
}

fn local_to_utc(naive: NaiveDateTime) -> Result<DateTime<Utc>> {
    Local
        .from_local_datetime(&naive)
        .earliest()
        .map(|dt| dt.with_timezone(&Utc))
        .ok_or_else(|| anyhow::anyhow!("{} does not exist in the local timezone", naive))
}

/// Expand common abbreviations that fuzzydate doesn't handle.
fn expand_abbreviations(input: &str) -> String {
    const ABBREVIATIONS: [(&str, &str); 22] = [
        ("mon", "monday"),
        ("tue", "tuesday"),
        ("tues", "tuesday"),
        ("wed", "wednesday"),
        ("thu", "thursday"),
        ("thur", "thursday"),
        ("thurs", "thursday"),
        ("fri", "friday"),
        ("sat", "saturday"),
        ("sun", "sunday"),
        ("jan", "january"),
        ("feb", "february"),
        ("mar", "march"),
        ("apr", "april"),
        ("jun", "june"),
        ("jul", "july"),
        ("aug", "august"),
        ("sep", "september"),
        ("sept", "september"),
        ("oct", "october"),
        ("nov", "november"),
        ("dec", "december"),
    ];

    input
        .to_lowercase()
        .split_whitespace()
        .map(|word| {
            ABBREVIATIONS
                .iter()
                .find(|(abbr, _)| *abbr == word)
                .map(|(_, full)| *full)
                .unwrap_or(word)
                .to_string()
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Whether the input names a time of day: am/pm, HH:MM, noon, midnight or
/// "at <digit>".
fn has_time_component(input: &str) -> bool {
    let lower = input.to_lowercase();
    if lower.contains("noon") || lower.contains("midnight") {
        return true;
    }

    let bytes = lower.as_bytes();
    for i in 0..bytes.len() {
        let meridiem = (bytes[i] == b'a' || bytes[i] == b'p') && bytes.get(i + 1) == Some(&b'm');
        if meridiem {
            let digit_before = i > 0 && bytes[i - 1].is_ascii_digit();
            let digit_before_space = i > 1 && bytes[i - 1] == b' ' && bytes[i - 2].is_ascii_digit();
            if digit_before || digit_before_space {
                return true;
            }
        }
        if bytes[i] == b':' {
            let digit_before = i > 0 && bytes[i - 1].is_ascii_digit();
            let digit_after = bytes.get(i + 1).is_some_and(|b| b.is_ascii_digit());
            if digit_before && digit_after {
                return true;
            }
        }
    }

    let after_at = lower
        .strip_prefix("at ")
        .or_else(|| lower.find(" at ").map(|pos| &lower[pos + 4..]));
    after_at.is_some_and(|rest| rest.starts_with(|c: char| c.is_ascii_digit()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_iso_date_is_all_day() {
        let when = parse_when("2025-03-20").unwrap();
        assert_eq!(when, When::Day(NaiveDate::from_ymd_opt(2025, 3, 20).unwrap()));
        assert_eq!(
            when.to_utc(),
            Utc.with_ymd_and_hms(2025, 3, 20, 0, 0, 0).unwrap()
        );
        assert_eq!(
            when.default_end(),
            When::Day(NaiveDate::from_ymd_opt(2025, 3, 21).unwrap())
        );
    }

    #[test]
    fn test_iso_datetime_is_timed() {
        let when = parse_when("2025-03-20 15:00").unwrap();
        assert!(!when.is_all_day());
        let expected = Local
            .with_ymd_and_hms(2025, 3, 20, 15, 0, 0)
            .unwrap()
            .with_timezone(&Utc);
        assert_eq!(when.to_utc(), expected);
    }

    #[test]
    fn test_end_accepts_duration() {
        let start = parse_when("2025-03-20T15:00").unwrap();
        let end = parse_end("90m", start).unwrap();
        assert_eq!(end.to_utc() - start.to_utc(), Duration::minutes(90));
    }

    #[test]
    fn test_until_date_includes_the_whole_day() {
        let until = parse_until("2025-03-20").unwrap();
        let evening = Local
            .with_ymd_and_hms(2025, 3, 20, 21, 0, 0)
            .unwrap()
            .with_timezone(&Utc);
        assert!(until > evening);
    }

    #[test]
    fn test_has_time_component() {
        assert!(has_time_component("tomorrow at 5"));
        assert!(has_time_component("friday 6pm"));
        assert!(has_time_component("friday 6 pm"));
        assert!(has_time_component("15:30"));
        assert!(has_time_component("noon"));
        assert!(!has_time_component("next friday"));
        assert!(!has_time_component("march 3"));
    }

    #[test]
    fn test_expand_abbreviations() {
        assert_eq!(expand_abbreviations("Next Fri"), "next friday");
        assert_eq!(expand_abbreviations("3 sept"), "3 september");
    }

    #[test]
    fn test_date_range_covers_whole_days() {
        let range = date_range(Some("2025-03-20"), Some("2025-03-21")).unwrap();
        assert_eq!(range.end - range.start, Duration::days(2));
        assert!(date_range(Some("2025-03-21"), Some("2025-03-19")).is_err());
    }
}
