use chrono::{DateTime, Utc};
use chrono_tz::Tz;

pub const DEFAULT_TIMEZONE: &str = "UTC";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Unit {
    Year,
    Month,
    Week,
    Day,
    Hour,
    Minute,
    Second,
}

const UNITS: [(Unit, f64); 7] = [
    (Unit::Year, 31_536_000.0),
    (Unit::Month, 2_592_000.0),
    (Unit::Week, 604_800.0),
    (Unit::Day, 86_400.0),
    (Unit::Hour, 3_600.0),
    (Unit::Minute, 60.0),
    (Unit::Second, 1.0),
];

impl Unit {
    fn name(self) -> &'static str {
        match self {
            Unit::Year => "year",
            Unit::Month => "month",
            Unit::Week => "week",
            Unit::Day => "day",
            Unit::Hour => "hour",
            Unit::Minute => "minute",
            Unit::Second => "second",
        }
    }

    fn idiom(self, value: i64) -> Option<&'static str> {
        match (self, value) {
            (Unit::Second, 0) => Some("now"),
            (Unit::Minute, 0) => Some("this minute"),
            (Unit::Hour, 0) => Some("this hour"),
            (Unit::Day, -1) => Some("yesterday"),
            (Unit::Day, 0) => Some("today"),
            (Unit::Day, 1) => Some("tomorrow"),
            (Unit::Week, -1) => Some("last week"),
            (Unit::Week, 0) => Some("this week"),
            (Unit::Week, 1) => Some("next week"),
            (Unit::Month, -1) => Some("last month"),
            (Unit::Month, 0) => Some("this month"),
            (Unit::Month, 1) => Some("next month"),
            (Unit::Year, -1) => Some("last year"),
            (Unit::Year, 0) => Some("this year"),
            (Unit::Year, 1) => Some("next year"),
            _ => None,
        }
    }
}

/// Looks up an IANA zone name, falling back to UTC.
pub fn resolve_zone(name: &str) -> Tz {
    name.trim().parse::<Tz>().unwrap_or_else(|_| {
        tracing::debug!(zone = name, "unknown time zone; using UTC");
        Tz::UTC
    })
}

/// The zone used when neither the host nor the feed names one.
pub fn system_zone_name() -> String {
    std::env::var("TZ")
        .ok()
        .map(|tz| tz.trim().trim_start_matches(':').to_string())
        .filter(|tz| tz.parse::<Tz>().is_ok())
        .unwrap_or_else(|| DEFAULT_TIMEZONE.to_string())
}

/// Medium date plus short time, e.g. `Jan 1, 2024, 9:05 AM`.
pub fn absolute(time: DateTime<Utc>, timezone: &str) -> String {
    time.with_timezone(&resolve_zone(timezone))
        .format("%b %-d, %Y, %-I:%M %p")
        .to_string()
}

/// Phrases `time` relative to `now` in the largest unit the gap reaches,
/// e.g. `in 3 minutes`, `5 hours ago`, `yesterday`.
pub fn relative(time: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let elapsed = (now - time).num_milliseconds() as f64 / 1000.0;
    let magnitude = elapsed.abs();

    let (unit, seconds) = UNITS
        .iter()
        .copied()
        .find(|(unit, seconds)| magnitude >= *seconds || *unit == Unit::Second)
        .unwrap_or((Unit::Second, 1.0));

    phrase(round_half_up(-elapsed / seconds), unit)
}

fn round_half_up(value: f64) -> i64 {
    (value + 0.5).floor() as i64
}

fn phrase(value: i64, unit: Unit) -> String {
    if let Some(idiom) = unit.idiom(value) {
        return idiom.to_string();
    }
    let count = value.unsigned_abs();
    let plural = if count == 1 { "" } else { "s" };
    if value > 0 {
        format!("in {count} {}{plural}", unit.name())
    } else {
        format!("{count} {}{plural} ago", unit.name())
    }
}
