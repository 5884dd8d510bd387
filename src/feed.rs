use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

pub const DEFAULT_FEED_TITLE: &str = "Live Feed";
pub const UNTITLED: &str = "Untitled";

/// Number of title characters that go into a derived post id.
const ID_TITLE_CHARS: usize = 24;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeedSnapshot {
    #[serde(default, deserialize_with = "lenient_meta")]
    pub meta: FeedMeta,
    #[serde(default, deserialize_with = "lenient_posts")]
    pub posts: Vec<Post>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeedMeta {
    #[serde(default, deserialize_with = "lenient_string", skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, deserialize_with = "lenient_string", skip_serializing_if = "Option::is_none")]
    pub timezone: Option<String>,
    #[serde(default, deserialize_with = "lenient_string", skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
}

/// One post as it appears in a snapshot.
///
/// Equality is structural over every field, including fields this crate does
/// not interpret (kept in `extra`), so two documents that differ only in key
/// order compare equal.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Post {
    #[serde(default, deserialize_with = "lenient_string", skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, deserialize_with = "lenient_string", skip_serializing_if = "Option::is_none")]
    pub time: Option<String>,
    #[serde(default, deserialize_with = "lenient_string", skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, deserialize_with = "lenient_string", skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, deserialize_with = "lenient_strings")]
    pub images: Vec<String>,
    #[serde(default, deserialize_with = "lenient_embeds", skip_serializing_if = "Option::is_none")]
    pub embeds: Option<Embeds>,
    #[serde(default, deserialize_with = "lenient_strings")]
    pub tags: Vec<String>,
    #[serde(default, deserialize_with = "lenient_bool")]
    pub pinned: bool,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Embeds {
    #[serde(default, deserialize_with = "lenient_strings")]
    pub youtube: Vec<String>,
    #[serde(default, deserialize_with = "lenient_strings")]
    pub telegram: Vec<String>,
    #[serde(default, deserialize_with = "lenient_strings")]
    pub links: Vec<String>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl FeedSnapshot {
    /// Parses a feed document. Only invalid JSON is an error; any other shape
    /// degrades to an empty or partially filled snapshot.
    pub fn from_json(body: &[u8]) -> Result<Self, serde_json::Error> {
        let value: Value = serde_json::from_slice(body)?;
        Ok(Self::from_value(value))
    }

    pub fn from_value(value: Value) -> Self {
        if !value.is_object() {
            tracing::debug!("feed document is not an object; treating as empty");
            return Self::default();
        }
        serde_json::from_value(value).unwrap_or_else(|err| {
            tracing::warn!(%err, "feed document could not be read; treating as empty");
            Self::default()
        })
    }

    pub fn title(&self) -> &str {
        non_empty(self.meta.title.as_deref()).unwrap_or(DEFAULT_FEED_TITLE)
    }
}

impl Post {
    /// Stable identity: the explicit id, or `"<time>-<title prefix>"`.
    pub fn key(&self) -> String {
        if let Some(id) = non_empty(self.id.as_deref()) {
            return id.to_string();
        }
        let time = self.time.as_deref().unwrap_or("undefined");
        let prefix: String = self
            .title
            .as_deref()
            .unwrap_or_default()
            .chars()
            .take(ID_TITLE_CHARS)
            .collect();
        format!("{time}-{prefix}")
    }

    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        self.time.as_deref().and_then(parse_time)
    }

    pub fn display_title(&self) -> &str {
        non_empty(self.title.as_deref()).unwrap_or(UNTITLED)
    }

    pub fn description(&self) -> &str {
        self.description.as_deref().unwrap_or_default()
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|s| !s.is_empty())
}

/// Reads the timestamp shapes feeds use in practice. Naive values are UTC and
/// bare integers are epoch milliseconds.
pub fn parse_time(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_rfc2822(raw) {
        return Some(dt.with_timezone(&Utc));
    }

    const NAIVE_FORMATS: [&str; 4] = [
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%dT%H:%M",
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%d %H:%M",
    ];
    for format in NAIVE_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, format) {
            return Some(naive.and_utc());
        }
    }
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return date.and_hms_opt(0, 0, 0).map(|naive| naive.and_utc());
    }

    let digits = raw.strip_prefix('-').unwrap_or(raw);
    if !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()) {
        return raw
            .parse::<i64>()
            .ok()
            .and_then(DateTime::from_timestamp_millis);
    }

    None
}

fn coerce_string(value: Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s),
        Value::Number(n) => Some(number_text(&n)),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Whole floats such as `1.7e12` or `7.0` read as integers.
fn number_text(n: &serde_json::Number) -> String {
    match n.as_f64() {
        Some(f) if !n.is_i64() && !n.is_u64() && f.fract() == 0.0 && f.abs() < 9.0e15 => {
            format!("{}", f as i64)
        }
        _ => n.to_string(),
    }
}

fn lenient_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(coerce_string(Value::deserialize(deserializer)?))
}

fn lenient_strings<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::Array(items) => items.into_iter().filter_map(coerce_string).collect(),
        _ => Vec::new(),
    })
}

fn lenient_bool<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::Null => false,
        Value::Bool(b) => b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0 && !f.is_nan()),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    })
}

fn lenient_embeds<'de, D>(deserializer: D) -> Result<Option<Embeds>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    if !value.is_object() {
        return Ok(None);
    }
    Ok(serde_json::from_value(value).ok())
}

fn lenient_meta<'de, D>(deserializer: D) -> Result<FeedMeta, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    if !value.is_object() {
        return Ok(FeedMeta::default());
    }
    Ok(serde_json::from_value(value).unwrap_or_default())
}

fn lenient_posts<'de, D>(deserializer: D) -> Result<Vec<Post>, D::Error>
where
    D: Deserializer<'de>,
{
    let Value::Array(items) = Value::deserialize(deserializer)? else {
        return Ok(Vec::new());
    };
    Ok(items
        .into_iter()
        .enumerate()
        .filter_map(|(index, item)| {
            if !item.is_object() {
                tracing::debug!(index, "skipping feed entry that is not an object");
                return None;
            }
            serde_json::from_value::<Post>(item)
                .map_err(|err| tracing::debug!(index, %err, "skipping unreadable feed entry"))
                .ok()
        })
        .collect())
}
