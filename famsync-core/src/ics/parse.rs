//! ICS file parsing using the icalendar crate's parser.

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;
use icalendar::{
    CalendarDateTime, DatePerhapsTime,
    parser::{Property, read_calendar, unfold},
};

use crate::event::{CalendarEvent, Reminder};
use crate::recurrence::RecurrenceRule;
use crate::store::StoredSeries;

/// Parse a single-VEVENT ICS file into a stored series.
///
/// Returns `None` for content that is not a usable event (no UID, no start,
/// or a recurrence rule this engine cannot represent).
pub fn parse_series(content: &str, calendar_id: &str) -> Option<StoredSeries> {
    let unfolded = unfold(content);
    let calendar = read_calendar(&unfolded).ok()?;
    let vevent = calendar.components.iter().find(|c| c.name == "VEVENT")?;

    let external_id = vevent.find_prop("UID")?.val.to_string();
    let title = vevent
        .find_prop("SUMMARY")
        .map(|p| p.val.to_string())
        .unwrap_or_else(|| "(No title)".to_string());

    let start_raw = DatePerhapsTime::try_from(vevent.find_prop("DTSTART")?).ok()?;
    let is_all_day = matches!(start_raw, DatePerhapsTime::Date(_));
    let start = to_utc(start_raw)?;
    let end = match vevent.find_prop("DTEND") {
        Some(prop) => to_utc(DatePerhapsTime::try_from(prop).ok()?)?,
        None if is_all_day => start + chrono::Duration::days(1),
        None => start,
    };

    let notes = vevent.find_prop("DESCRIPTION").map(|p| p.val.to_string());
    let location = vevent.find_prop("LOCATION").map(|p| p.val.to_string());

    let recurrence = match vevent.find_prop("RRULE") {
        Some(prop) => Some(prop.val.as_ref().parse::<RecurrenceRule>().ok()?),
        None => None,
    };

    let last_modified = vevent
        .find_prop("LAST-MODIFIED")
        .and_then(|p| {
            NaiveDateTime::parse_from_str(p.val.as_ref().trim_end_matches('Z'), "%Y%m%dT%H%M%S")
                .ok()
        })
        .map(|dt| dt.and_utc());

    let alarms: Vec<Reminder> = vevent
        .components
        .iter()
        .filter(|c| c.name == "VALARM")
        .filter_map(|alarm| {
            let trigger = alarm.find_prop("TRIGGER")?.val.as_ref();
            let minutes = parse_trigger_minutes(trigger)?;
            Some(Reminder { minutes })
        })
        .collect();

    let mut series = StoredSeries::new(CalendarEvent {
        external_id,
        calendar_id: calendar_id.to_string(),
        title,
        start,
        end,
        location,
        notes,
        is_all_day,
        recurrence,
        occurrence: None,
        alarms,
        last_modified,
    });

    if series.master.recurrence.is_some() {
        series.exdates = vevent
            .properties
            .iter()
            .filter(|p| p.name == "EXDATE")
            .flat_map(parse_exdate_property)
            .collect();
    }

    Some(series)
}

/// Resolve an ICS time to an instant. Floating times are read as UTC.
fn to_utc(dpt: DatePerhapsTime) -> Option<DateTime<Utc>> {
    match dpt {
        DatePerhapsTime::Date(d) => Some(d.and_hms_opt(0, 0, 0)?.and_utc()),
        DatePerhapsTime::DateTime(cal_dt) => match cal_dt {
            CalendarDateTime::Utc(dt) => Some(dt),
            CalendarDateTime::Floating(naive) => Some(naive.and_utc()),
            CalendarDateTime::WithTimezone { date_time, tzid } => zoned_to_utc(date_time, &tzid),
        },
    }
}

fn zoned_to_utc(local: NaiveDateTime, tzid: &str) -> Option<DateTime<Utc>> {
    match tzid.parse::<Tz>() {
        Ok(tz) => tz
            .from_local_datetime(&local)
            .earliest()
            .map(|dt| dt.with_timezone(&Utc)),
        Err(_) => Some(local.and_utc()),
    }
}

/// Parse an EXDATE property into instants.
///
/// Handles TZID, VALUE=DATE, UTC and floating values, each possibly
/// comma-separated.
fn parse_exdate_property(prop: &Property) -> Vec<DateTime<Utc>> {
    let tzid = prop
        .params
        .iter()
        .find(|p| p.key == "TZID")
        .and_then(|p| p.val.as_ref().map(|v| v.to_string()));

    let is_date = prop
        .params
        .iter()
        .any(|p| p.key == "VALUE" && p.val.as_ref().map(|v| v.as_ref()) == Some("DATE"));

    prop.val
        .as_ref()
        .split(',')
        .filter_map(|s| {
            let s = s.trim();
            if s.is_empty() {
                return None;
            }
            if is_date {
                NaiveDate::parse_from_str(s, "%Y%m%d")
                    .ok()
                    .and_then(|d| d.and_hms_opt(0, 0, 0))
                    .map(|dt| dt.and_utc())
            } else {
                let naive =
                    NaiveDateTime::parse_from_str(s.trim_end_matches('Z'), "%Y%m%dT%H%M%S").ok()?;
                match tzid {
                    Some(ref tz) if !s.ends_with('Z') => zoned_to_utc(naive, tz),
                    _ => Some(naive.and_utc()),
                }
            }
        })
        .collect()
}

/// Parse TRIGGER value to minutes before event (-PT30M, -P1D, etc.)
fn parse_trigger_minutes(value: &str) -> Option<i64> {
    let is_before = value.starts_with('-');
    let duration_str = value.trim_start_matches(['-', '+']);

    let duration = iso8601::duration(duration_str).ok()?;
    let std_duration: std::time::Duration = duration.into();
    let minutes = (std_duration.as_secs() / 60) as i64;

    Some(if is_before { minutes } else { -minutes })
}
