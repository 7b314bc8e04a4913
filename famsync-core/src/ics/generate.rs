//! ICS file generation.

use chrono::{DateTime, Utc};
use icalendar::{Alarm, Calendar, Component, EventLike, Property, Trigger, ValueType};

use crate::error::SyncResult;
use crate::store::StoredSeries;

/// Generate .ics content for a stored event or series.
pub fn generate_ics(series: &StoredSeries) -> SyncResult<String> {
    let event = &series.master;
    let mut cal = Calendar::new();

    let mut ics_event = icalendar::Event::new();
    ics_event.uid(&event.external_id);
    ics_event.summary(&event.title);

    // DTSTAMP - required by RFC 5545
    let stamp = event.last_modified.unwrap_or_else(Utc::now);
    ics_event.add_property("DTSTAMP", utc_stamp(stamp));
    ics_event.add_property("LAST-MODIFIED", utc_stamp(stamp));

    if event.is_all_day {
        add_date_property(&mut ics_event, "DTSTART", event.start);
        add_date_property(&mut ics_event, "DTEND", event.end);
    } else {
        ics_event.add_property("DTSTART", utc_stamp(event.start));
        ics_event.add_property("DTEND", utc_stamp(event.end));
    }

    if let Some(ref notes) = event.notes {
        ics_event.description(notes);
    }

    if let Some(ref loc) = event.location {
        ics_event.location(loc);
    }

    if let Some(ref rule) = event.recurrence {
        ics_event.add_property("RRULE", rule.to_rrule());
        for exdate in &series.exdates {
            let prop = if event.is_all_day {
                let mut prop = Property::new("EXDATE", exdate.format("%Y%m%d").to_string());
                prop.append_parameter(ValueType::Date);
                prop
            } else {
                Property::new("EXDATE", utc_stamp(*exdate))
            };
            ics_event.append_multi_property(prop);
        }
    }

    for reminder in &event.alarms {
        let trigger = Trigger::before_start(chrono::Duration::minutes(reminder.minutes));
        ics_event.alarm(Alarm::display("Reminder", trigger));
    }

    cal.push(ics_event.done());
    let cal = cal.done();

    Ok(strip_ics_bloat(&cal.to_string()))
}

fn utc_stamp(dt: DateTime<Utc>) -> String {
    dt.format("%Y%m%dT%H%M%SZ").to_string()
}

fn add_date_property(ics_event: &mut icalendar::Event, name: &str, at: DateTime<Utc>) {
    let mut prop = Property::new(name, at.format("%Y%m%d").to_string());
    prop.append_parameter(ValueType::Date);
    ics_event.append_property(prop);
}

/// Clean up ICS output from the icalendar crate
/// - Replace PRODID
/// - Remove CALSCALE:GREGORIAN (it's the default)
/// - Remove DTSTAMP and UID inside VALARM sections
fn strip_ics_bloat(ics: &str) -> String {
    let mut result = String::with_capacity(ics.len());
    let mut in_valarm = false;

    for line in ics.lines() {
        if line.starts_with("PRODID:") {
            result.push_str("PRODID:FAMSYNC\r\n");
            continue;
        }

        if line == "CALSCALE:GREGORIAN" {
            continue;
        }

        if line == "BEGIN:VALARM" {
            in_valarm = true;
        } else if line == "END:VALARM" {
            in_valarm = false;
        }

        if in_valarm && (line.starts_with("DTSTAMP:") || line.starts_with("UID:")) {
            continue;
        }

        result.push_str(line);
        result.push_str("\r\n");
    }

    result
}
