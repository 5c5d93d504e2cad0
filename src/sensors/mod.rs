/// Sensor descriptions and the field extractor
use crate::domain::{AircraftRecord, Booking, SensorValue, TotalValue};
use crate::utils::round2;
use chrono::{DateTime, Duration, FixedOffset, LocalResult, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::warn;

/// Formats tried, in order, for a booking's localized start
pub const BOOKING_DATE_FORMATS: &[&str] = &["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%d %H:%M:%S"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StateClass {
    Measurement,
    Total,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceClass {
    Timestamp,
    Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityCategory {
    Diagnostic,
}

/// Static metadata for one metric
#[derive(Debug, Clone, Copy, Serialize)]
pub struct SensorDescription {
    pub key: &'static str,
    pub name: &'static str,
    pub icon: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state_class: Option<StateClass>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_class: Option<DeviceClass>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entity_category: Option<EntityCategory>,
}

const fn describe(key: &'static str, name: &'static str, icon: &'static str) -> SensorDescription {
    SensorDescription {
        key,
        name,
        icon,
        unit: None,
        state_class: None,
        device_class: None,
        entity_category: None,
    }
}

const fn countdown(
    key: &'static str,
    name: &'static str,
    icon: &'static str,
    unit: &'static str,
) -> SensorDescription {
    SensorDescription {
        unit: Some(unit),
        state_class: Some(StateClass::Measurement),
        device_class: Some(DeviceClass::Duration),
        ..describe(key, name, icon)
    }
}

const fn flight_hours(key: &'static str, name: &'static str, icon: &'static str) -> SensorDescription {
    SensorDescription {
        unit: Some("h"),
        state_class: Some(StateClass::Total),
        device_class: Some(DeviceClass::Duration),
        ..describe(key, name, icon)
    }
}

pub const SENSOR_TYPES: &[SensorDescription] = &[
    SensorDescription {
        device_class: Some(DeviceClass::Timestamp),
        ..describe("next_booking", "Next Booking", "mdi:calendar-clock")
    },
    SensorDescription {
        state_class: Some(StateClass::Measurement),
        ..describe("yellow_tags", "Yellow Tags", "mdi:tag-outline")
    },
    SensorDescription {
        state_class: Some(StateClass::Measurement),
        ..describe("red_tags", "Red Tags", "mdi:tag")
    },
    countdown("days_to_go", "Days to Go (Maintenance)", "mdi:calendar-range", "d"),
    countdown(
        "days_to_flight_stop",
        "Days to Go (Flight Stop)",
        "mdi:calendar-alert",
        "d",
    ),
    countdown("hours_to_go", "Hours to Go (Maintenance)", "mdi:clock-outline", "h"),
    countdown(
        "hours_to_flight_stop",
        "Hours to Go (Flight Stop)",
        "mdi:clock-alert-outline",
        "h",
    ),
    flight_hours("airborne", "Airborne", "mdi:airplane"),
    flight_hours("block", "Block", "mdi:car-brake-hold"),
    flight_hours("tachometer", "Tachometer", "mdi:counter"),
    flight_hours("tach_time", "Tach Time", "mdi:timer-outline"),
    SensorDescription {
        state_class: Some(StateClass::Total),
        ..describe("landings", "Landings", "mdi:airplane-landing")
    },
    SensorDescription {
        entity_category: Some(EntityCategory::Diagnostic),
        ..describe("model", "Model", "mdi:alpha-m-circle-outline")
    },
    SensorDescription {
        entity_category: Some(EntityCategory::Diagnostic),
        ..describe("club", "Club", "mdi:account-group")
    },
];

pub fn description(key: &str) -> Option<&'static SensorDescription> {
    SENSOR_TYPES.iter().find(|d| d.key == key)
}

/// The booking picked as "next", kept for attribute derivation
#[derive(Debug, Clone, PartialEq)]
pub struct NextBooking<'a> {
    pub booking: &'a Booking,
    pub starts_at: Option<DateTime<FixedOffset>>,
}

/// Earliest booking strictly after `now`; the first of equal starts wins
pub fn select_next_booking(bookings: &[Booking], now: DateTime<Utc>) -> Option<&Booking> {
    let now = now.timestamp_millis() as f64 / 1000.0;
    bookings
        .iter()
        .filter(|b| b.start.is_some_and(|s| s > now))
        .fold(None, |best: Option<&Booking>, b| match best {
            Some(cur) if cur.start <= b.start => Some(cur),
            _ => Some(b),
        })
}

/// Resolve the next booking and parse its localized start
pub fn next_booking(bookings: &[Booking], now: DateTime<Utc>) -> Option<NextBooking<'_>> {
    let booking = select_next_booking(bookings, now)?;
    let starts_at = booking
        .local_start
        .as_ref()
        .and_then(|lt| parse_local_start(&lt.date, &lt.timezone));
    Some(NextBooking { booking, starts_at })
}

/// Parse `date` in the named zone; None when the date or zone does not parse
pub fn parse_local_start(date: &str, timezone: &str) -> Option<DateTime<FixedOffset>> {
    let tz: Tz = timezone.parse().ok()?;
    let naive = BOOKING_DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(date, fmt).ok())?;
    match tz.from_local_datetime(&naive) {
        LocalResult::Single(dt) | LocalResult::Ambiguous(dt, _) => Some(dt.fixed_offset()),
        // skipped by a forward transition: keep the offset in effect before it
        LocalResult::None => {
            let before = tz
                .from_local_datetime(&(naive - Duration::days(1)))
                .earliest()?;
            before.fixed_offset().offset().from_local_datetime(&naive).single()
        }
    }
}

/// ISO-8601 with offset; microseconds only when non-zero
pub fn isoformat(dt: &DateTime<FixedOffset>) -> String {
    if dt.timestamp_subsec_micros() == 0 {
        dt.format("%Y-%m-%dT%H:%M:%S%:z").to_string()
    } else {
        dt.format("%Y-%m-%dT%H:%M:%S%.6f%:z").to_string()
    }
}

/// Render `end - start` seconds as e.g. `1 day 2 hrs 30 min`
pub fn booking_length(start: f64, end: f64) -> String {
    let total_minutes = ((end - start) / 60.0).trunc().max(0.0) as i64;
    let minutes = total_minutes % 60;
    let total_hours = total_minutes / 60;
    let hours = total_hours % 24;
    let days = total_hours / 24;

    let plural = |n: i64| if n == 1 { "" } else { "s" };
    let mut parts = Vec::new();
    if days > 0 {
        parts.push(format!("{} day{}", days, plural(days)));
    }
    if hours > 0 || days > 0 {
        parts.push(format!("{} hr{}", hours, plural(hours)));
    }
    parts.push(format!("{} min", minutes));
    parts.join(" ")
}

fn total(value: &TotalValue) -> SensorValue {
    match value {
        TotalValue::Number(n) => SensorValue::Number(round2(*n)),
        TotalValue::Raw(v) => SensorValue::from_json(v),
    }
}

/// Compute the state of one metric from the latest record and bookings.
/// Unknown keys log and yield None.
pub fn extract(
    key: &str,
    record: &AircraftRecord,
    bookings: &[Booking],
    now: DateTime<Utc>,
) -> Option<SensorValue> {
    match key {
        "yellow_tags" => Some(SensorValue::Count(record.yellow_tags as i64)),
        "red_tags" => Some(SensorValue::Count(record.red_tags as i64)),
        "days_to_go" => Some(SensorValue::from_json(&record.maintenance.days_to_go)),
        "days_to_flight_stop" => Some(SensorValue::from_json(
            &record.maintenance.days_to_flight_stop,
        )),
        "hours_to_go" => Some(SensorValue::Number(round2(record.maintenance.hours_to_go))),
        "hours_to_flight_stop" => Some(SensorValue::Number(round2(
            record.maintenance.hours_to_flight_stop,
        ))),
        "airborne" => Some(total(&record.totals.airborne)),
        "block" => Some(total(&record.totals.block)),
        "tachometer" => Some(total(&record.totals.tachometer)),
        "tach_time" => Some(total(&record.totals.tach_time)),
        "landings" => Some(total(&record.totals.landings)),
        "model" => record.model.clone().map(SensorValue::Text),
        "club" => record.club.clone().map(SensorValue::Text),
        "next_booking" => {
            next_booking(bookings, now)?.starts_at.map(SensorValue::Timestamp)
        }
        _ => {
            warn!("Unknown sensor key: {} for aircraft id={}", key, record.id);
            None
        }
    }
}

/// Extra attributes for one metric
pub fn attributes(
    key: &str,
    state: Option<&SensorValue>,
    bookings: &[Booking],
    now: DateTime<Utc>,
) -> Map<String, Value> {
    let mut attrs = Map::new();
    match (key, state) {
        ("red_tags", Some(SensorValue::Count(n))) if *n > 0 => {
            attrs.insert("icon_color".to_string(), Value::from("red"));
        }
        ("yellow_tags", Some(SensorValue::Count(n))) if *n > 0 => {
            attrs.insert("icon_color".to_string(), Value::from("yellow"));
        }
        ("next_booking", _) => {
            if let Some(next) = next_booking(bookings, now) {
                let booking = next.booking;
                if let Some(pilot) = &booking.pilot {
                    attrs.insert("booked_by".to_string(), Value::from(pilot.clone()));
                }
                if let Some(student) = &booking.student {
                    attrs.insert("student_name".to_string(), Value::from(student.clone()));
                }
                if let (Some(start), Some(end)) = (booking.start, booking.end) {
                    attrs.insert(
                        "booking_length".to_string(),
                        Value::from(booking_length(start, end)),
                    );
                }
            }
        }
        _ => {}
    }
    attrs
}
