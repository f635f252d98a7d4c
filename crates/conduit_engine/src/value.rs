//! Scalar values flowing through rows, predicates, and assignments.

use std::cmp::Ordering;
use std::fmt;

use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, TimeZone, Utc};
use serde::{Serialize, Serializer};

use crate::schema::ColumnType;

const DATE_FORMAT: &str = "%Y-%m-%d";

/// One scalar cell value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Date(NaiveDate),
    Timestamp(DateTime<Utc>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Returns the text payload when this value is `Text`.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(text) => Some(text.as_str()),
            _ => None,
        }
    }

    /// Infers a value from an untyped JSON field, used for response-shaped rows.
    pub fn from_json(json: &serde_json::Value) -> Value {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(flag) => Value::Bool(*flag),
            serde_json::Value::Number(number) => match number.as_i64() {
                Some(int) => Value::Int(int),
                None => Value::Float(number.as_f64().unwrap_or(f64::NAN)),
            },
            serde_json::Value::String(text) => Value::Text(text.clone()),
            other => Value::Text(other.to_string()),
        }
    }

    /// Renders this value in the JSON form native APIs expect.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Bool(flag) => serde_json::Value::Bool(*flag),
            Value::Int(int) => serde_json::Value::from(*int),
            Value::Float(float) => serde_json::Number::from_f64(*float)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::Text(text) => serde_json::Value::String(text.clone()),
            Value::Date(date) => serde_json::Value::String(date.format(DATE_FORMAT).to_string()),
            Value::Timestamp(ts) => {
                serde_json::Value::String(ts.to_rfc3339_opts(SecondsFormat::AutoSi, true))
            }
        }
    }

    /// Converts a native JSON field into a value of `column_type`.
    ///
    /// Numbers are accepted for temporal columns: days since the epoch for
    /// dates and milliseconds since the epoch for timestamps.
    pub fn coerce_json(json: &serde_json::Value, column_type: ColumnType) -> Result<Value, String> {
        match json {
            serde_json::Value::Array(_) | serde_json::Value::Object(_) => match column_type {
                ColumnType::Text => Ok(Value::Text(json.to_string())),
                other => Err(format!("cannot read nested JSON as {}", other.as_str())),
            },
            scalar => Value::from_json(scalar).cast(column_type, true),
        }
    }

    /// Casts this value to `column_type`.
    ///
    /// With `strict == false`, numeric values destined for a text column stay
    /// numeric so they compare numerically against numeric-looking text.
    pub fn cast(self, column_type: ColumnType, strict: bool) -> Result<Value, String> {
        let described = self.describe();
        let cast = match (column_type, self) {
            (_, Value::Null) => Some(Value::Null),
            (ColumnType::Text, Value::Text(text)) => Some(Value::Text(text)),
            (ColumnType::Text, value @ (Value::Int(_) | Value::Float(_))) if !strict => Some(value),
            (ColumnType::Text, value) => Some(Value::Text(value.to_string())),

            (ColumnType::Int, Value::Int(int)) => Some(Value::Int(int)),
            (ColumnType::Int, Value::Float(float)) if float.fract() == 0.0 => {
                Some(Value::Int(float as i64))
            }
            (ColumnType::Int, Value::Text(text)) => text.trim().parse::<i64>().ok().map(Value::Int),

            (ColumnType::Float, Value::Int(int)) => Some(Value::Float(int as f64)),
            (ColumnType::Float, Value::Float(float)) => Some(Value::Float(float)),
            (ColumnType::Float, Value::Text(text)) => {
                text.trim().parse::<f64>().ok().map(Value::Float)
            }

            (ColumnType::Bool, Value::Bool(flag)) => Some(Value::Bool(flag)),
            (ColumnType::Bool, Value::Int(0)) => Some(Value::Bool(false)),
            (ColumnType::Bool, Value::Int(1)) => Some(Value::Bool(true)),
            (ColumnType::Bool, Value::Text(text)) => parse_bool(&text).map(Value::Bool),

            (ColumnType::Date, Value::Date(date)) => Some(Value::Date(date)),
            (ColumnType::Date, Value::Timestamp(ts)) => Some(Value::Date(ts.date_naive())),
            (ColumnType::Date, Value::Int(days)) => NaiveDate::from_ymd_opt(1970, 1, 1)
                .and_then(|epoch| epoch.checked_add_signed(chrono::Duration::days(days)))
                .map(Value::Date),
            (ColumnType::Date, Value::Text(text)) => parse_date(&text).map(Value::Date),

            (ColumnType::Timestamp, Value::Timestamp(ts)) => Some(Value::Timestamp(ts)),
            (ColumnType::Timestamp, Value::Date(date)) => date
                .and_hms_opt(0, 0, 0)
                .map(|midnight| Value::Timestamp(Utc.from_utc_datetime(&midnight))),
            (ColumnType::Timestamp, Value::Int(millis)) => {
                DateTime::<Utc>::from_timestamp_millis(millis).map(Value::Timestamp)
            }
            (ColumnType::Timestamp, Value::Text(text)) => parse_timestamp(&text).map(Value::Timestamp),

            _ => None,
        };
        cast.ok_or_else(|| format!("cannot convert {described} to {}", column_type.as_str()))
    }

    /// Orders two values the way SQL comparisons do; `None` when incomparable.
    ///
    /// Null never compares. Text compares numerically against numbers when it
    /// parses as one.
    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::Null, _) | (_, Value::Null) => None,
            (Value::Int(left), Value::Int(right)) => Some(left.cmp(right)),
            (Value::Int(left), Value::Float(right)) => (*left as f64).partial_cmp(right),
            (Value::Float(left), Value::Int(right)) => left.partial_cmp(&(*right as f64)),
            (Value::Float(left), Value::Float(right)) => left.partial_cmp(right),
            (Value::Text(left), Value::Text(right)) => Some(left.cmp(right)),
            (Value::Text(text), number @ (Value::Int(_) | Value::Float(_))) => {
                let parsed = text.trim().parse::<f64>().ok()?;
                parsed.partial_cmp(&number.as_f64()?)
            }
            (number @ (Value::Int(_) | Value::Float(_)), Value::Text(text)) => {
                let parsed = text.trim().parse::<f64>().ok()?;
                number.as_f64()?.partial_cmp(&parsed)
            }
            (Value::Bool(left), Value::Bool(right)) => Some(left.cmp(right)),
            (Value::Date(left), Value::Date(right)) => Some(left.cmp(right)),
            (Value::Timestamp(left), Value::Timestamp(right)) => Some(left.cmp(right)),
            (Value::Date(date), Value::Timestamp(ts)) => {
                Some(date.and_hms_opt(0, 0, 0)?.cmp(&ts.naive_utc()))
            }
            (Value::Timestamp(ts), Value::Date(date)) => {
                Some(ts.naive_utc().cmp(&date.and_hms_opt(0, 0, 0)?))
            }
            _ => None,
        }
    }

    fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(int) => Some(*int as f64),
            Value::Float(float) => Some(*float),
            _ => None,
        }
    }

    fn describe(&self) -> String {
        match self {
            Value::Null => "null".to_string(),
            Value::Text(text) => format!("text '{text}'"),
            other => format!("value {other}"),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("NULL"),
            Value::Bool(flag) => write!(f, "{flag}"),
            Value::Int(int) => write!(f, "{int}"),
            Value::Float(float) => write!(f, "{float}"),
            Value::Text(text) => f.write_str(text),
            Value::Date(date) => write!(f, "{}", date.format(DATE_FORMAT)),
            Value::Timestamp(ts) => f.write_str(&ts.to_rfc3339_opts(SecondsFormat::AutoSi, true)),
        }
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Text(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Text(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Int(i64::from(value))
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Float(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<NaiveDate> for Value {
    fn from(value: NaiveDate) -> Self {
        Value::Date(value)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(value: DateTime<Utc>) -> Self {
        Value::Timestamp(value)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(Value::Null)
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "t" | "1" | "yes" => Some(true),
        "false" | "f" | "0" | "no" => Some(false),
        _ => None,
    }
}

fn parse_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    NaiveDate::parse_from_str(raw, DATE_FORMAT)
        .ok()
        .or_else(|| parse_timestamp(raw).map(|ts| ts.date_naive()))
}

fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, format) {
            return Some(Utc.from_utc_datetime(&naive));
        }
    }
    NaiveDate::parse_from_str(raw, DATE_FORMAT)
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|midnight| Utc.from_utc_datetime(&midnight))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn coerces_strings_into_numbers_and_temporals() {
        assert_eq!(
            Value::coerce_json(&json!("12.50"), ColumnType::Float),
            Ok(Value::Float(12.5))
        );
        assert_eq!(
            Value::coerce_json(&json!("2023-04-11"), ColumnType::Date),
            Ok(Value::Date(NaiveDate::from_ymd_opt(2023, 4, 11).unwrap()))
        );
        let ts = Value::coerce_json(&json!("2024-01-02T10:00:00-05:00"), ColumnType::Timestamp)
            .expect("rfc3339");
        assert_eq!(ts.to_string(), "2024-01-02T15:00:00Z");
    }

    #[test]
    fn numeric_temporals_use_epoch_units() {
        assert_eq!(
            Value::coerce_json(&json!(19_000), ColumnType::Date),
            Ok(Value::Date(NaiveDate::from_ymd_opt(2022, 1, 8).unwrap()))
        );
        assert_eq!(
            Value::coerce_json(&json!(0), ColumnType::Timestamp)
                .unwrap()
                .to_string(),
            "1970-01-01T00:00:00Z"
        );
    }

    #[test]
    fn uncoercible_values_report_the_target_type() {
        let err = Value::coerce_json(&json!("twelve"), ColumnType::Int).unwrap_err();
        assert!(err.contains("int"), "{err}");
        assert!(Value::coerce_json(&json!({"a": 1}), ColumnType::Float).is_err());
        assert_eq!(
            Value::coerce_json(&json!(["food", "coffee"]), ColumnType::Text),
            Ok(Value::Text("[\"food\",\"coffee\"]".to_string()))
        );
    }

    #[test]
    fn text_compares_numerically_against_numbers() {
        let id = Value::from("10");
        assert_eq!(id.compare(&Value::Int(2)), Some(Ordering::Greater));
        assert_eq!(Value::from("abc").compare(&Value::Int(2)), None);
        assert_eq!(Value::Null.compare(&Value::Null), None);
    }

    #[test]
    fn lenient_text_cast_keeps_numbers() {
        assert_eq!(Value::Int(7).cast(ColumnType::Text, false), Ok(Value::Int(7)));
        assert_eq!(
            Value::Int(7).cast(ColumnType::Text, true),
            Ok(Value::Text("7".to_string()))
        );
    }
}
