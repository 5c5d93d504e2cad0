/// Domain models for the application
use crate::utils::{num, path, s_pick};
use chrono::{DateTime, FixedOffset, Utc};
use serde::{Deserialize, Serialize, Serializer};
use serde_json::Value;

/// Username/password pair plus the session app token
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
    pub app_token: Option<String>,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"***")
            .field("app_token", &self.app_token.as_ref().map(|_| "***"))
            .finish()
    }
}

/// Aircraft chosen for tracking
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackedAircraft {
    pub id: String,
    pub regnr: String,
    pub title: String,
}

/// Persisted configuration entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryData {
    pub username: String,
    pub password: String,
    #[serde(default)]
    pub app_token: String,
    #[serde(default)]
    pub airplanes: Vec<TrackedAircraft>,
}

impl EntryData {
    pub fn credentials(&self) -> Credentials {
        Credentials {
            username: self.username.clone(),
            password: self.password.clone(),
            app_token: Some(self.app_token.clone()),
        }
    }

    /// Title shown for the entry, e.g. `MyWeblog (pilot - 2 planes)`
    pub fn title(&self) -> String {
        entry_title(&self.username, self.airplanes.len())
    }
}

pub fn entry_title(username: &str, count: usize) -> String {
    let noun = if count == 1 { "plane" } else { "planes" };
    format!("MyWeblog ({} - {} {})", username, count, noun)
}

/// Which layout the remote used for flight totals
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordShape {
    /// `flightData.total`
    Current,
    /// `ftData`
    Legacy,
    /// Neither block present
    Bare,
}

/// A flight total after resolving the current/legacy fallback
#[derive(Debug, Clone, PartialEq)]
pub enum TotalValue {
    Number(f64),
    /// A non-numeric legacy value, passed through unchanged
    Raw(Value),
}

#[derive(Debug, Clone, PartialEq)]
pub struct FlightTotals {
    pub airborne: TotalValue,
    pub block: TotalValue,
    pub tachometer: TotalValue,
    pub tach_time: TotalValue,
    pub landings: TotalValue,
}

/// Maintenance countdowns from `maintTimeDate`
#[derive(Debug, Clone, PartialEq)]
pub struct Maintenance {
    pub days_to_go: Value,
    pub days_to_flight_stop: Value,
    pub hours_to_go: f64,
    pub hours_to_flight_stop: f64,
}

/// Aircraft object normalized from either remote layout
#[derive(Debug, Clone, PartialEq)]
pub struct AircraftRecord {
    pub id: String,
    pub regnr: Option<String>,
    pub model: Option<String>,
    pub club: Option<String>,
    pub shape: RecordShape,
    pub yellow_tags: usize,
    pub red_tags: usize,
    pub maintenance: Maintenance,
    pub totals: FlightTotals,
}

impl AircraftRecord {
    /// Normalize a raw `Object` entry. Returns None when it carries no id.
    pub fn from_raw(raw: &Value) -> Option<Self> {
        let id = s_pick(raw, &["ID"])?;

        let current = path(raw, &["flightData", "total"]).filter(|v| v.is_object());
        let legacy = raw.get("ftData").filter(|v| v.is_object());
        let shape = match (current, legacy) {
            (Some(_), _) => RecordShape::Current,
            (None, Some(_)) => RecordShape::Legacy,
            (None, None) => RecordShape::Bare,
        };

        let total = |current_key: &str, legacy_key: &str| {
            let value = current
                .and_then(|t| t.get(current_key))
                .or_else(|| legacy.and_then(|t| t.get(legacy_key)));
            match value {
                None | Some(Value::Null) => TotalValue::Number(0.0),
                Some(v) => match num(v) {
                    Some(n) => TotalValue::Number(n),
                    None => TotalValue::Raw(v.clone()),
                },
            }
        };
        let totals = FlightTotals {
            airborne: total("airborne", "airborne"),
            block: total("block", "block"),
            tachometer: total("tachoMeter", "tachometer"),
            tach_time: total("tachtime", "tachtime"),
            landings: total("landings", "landings"),
        };

        let maint = raw.get("maintTimeDate");
        let maint_raw = |key: &str| {
            maint
                .and_then(|m| m.get(key))
                .filter(|v| !v.is_null())
                .cloned()
                .unwrap_or_else(|| Value::from(0))
        };
        let maint_num = |key: &str| maint.and_then(|m| m.get(key)).and_then(num).unwrap_or(0.0);
        let maintenance = Maintenance {
            days_to_go: maint_raw("daysToGoValue"),
            days_to_flight_stop: maint_raw("flightStop_daysToGoValue"),
            hours_to_go: maint_num("hoursToGoValue"),
            hours_to_flight_stop: maint_num("flightStop_hoursToGoValue"),
        };

        let (yellow_tags, red_tags) = count_remarks(raw.get("activeRemarks"));

        Some(Self {
            id,
            regnr: s_pick(raw, &["regnr"]),
            model: s_pick(raw, &["model"]),
            club: s_pick(raw, &["clubname"]),
            shape,
            yellow_tags,
            red_tags,
            maintenance,
            totals,
        })
    }
}

fn count_remarks(remarks: Option<&Value>) -> (usize, usize) {
    let Some(list) = remarks.and_then(Value::as_array) else {
        return (0, 0);
    };
    list.iter()
        .filter_map(|r| s_pick(r, &["remarkCategory"]))
        .fold((0, 0), |(yellow, red), category| match category.as_str() {
            "1" => (yellow + 1, red),
            "2" => (yellow, red + 1),
            _ => (yellow, red),
        })
}

/// Localized start of a booking
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalStart {
    pub date: String,
    pub timezone: String,
}

/// One booking record
#[derive(Debug, Clone, PartialEq)]
pub struct Booking {
    pub start: Option<f64>,
    pub end: Option<f64>,
    pub local_start: Option<LocalStart>,
    pub pilot: Option<String>,
    pub student: Option<String>,
}

impl Booking {
    pub fn from_raw(raw: &Value) -> Self {
        let epoch = |key: &str| raw.get(key).and_then(Value::as_f64);
        let local_start = raw.get("bStartLTObj").and_then(|lt| {
            Some(LocalStart {
                date: lt.get("date")?.as_str()?.to_string(),
                timezone: lt.get("timezone")?.as_str()?.to_string(),
            })
        });
        let name = |key: &str| {
            raw.get(key)
                .and_then(Value::as_str)
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        };

        Self {
            start: epoch("bStart"),
            end: epoch("bEnd"),
            local_start,
            pilot: name("fullname"),
            student: name("extra_elev_fullname"),
        }
    }
}

/// Value of a sensor reading
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum SensorValue {
    Count(i64),
    Number(f64),
    Text(String),
    #[serde(serialize_with = "serialize_timestamp")]
    Timestamp(DateTime<FixedOffset>),
    Raw(Value),
}

fn serialize_timestamp<S: Serializer>(dt: &DateTime<FixedOffset>, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(&crate::sensors::isoformat(dt))
}

impl SensorValue {
    /// Keep an upstream value as-is, using the typed variants where they fit
    pub fn from_json(v: &Value) -> Self {
        match v {
            Value::Number(n) => match n.as_i64() {
                Some(i) => SensorValue::Count(i),
                None => SensorValue::Number(n.as_f64().unwrap_or(0.0)),
            },
            Value::String(s) => SensorValue::Text(s.clone()),
            other => SensorValue::Raw(other.clone()),
        }
    }
}

/// Health check response
#[derive(Serialize)]
pub struct Health {
    pub status: &'static str,
    pub instance: &'static str,
    pub reauth_required: bool,
    pub now: DateTime<Utc>,
}
