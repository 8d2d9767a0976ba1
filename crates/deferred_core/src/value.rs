use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

use crate::{DeferredError, DeferredResult, RecordId};

pub type AttributeMap = serde_json::Map<String, JsonValue>;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueFamily {
    Text,
    DateTime,
    Integer,
    Float,
    Boolean,
}

impl ValueFamily {
    pub fn as_str(self) -> &'static str {
        match self {
            ValueFamily::Text => "text",
            ValueFamily::DateTime => "datetime",
            ValueFamily::Integer => "integer",
            ValueFamily::Float => "float",
            ValueFamily::Boolean => "boolean",
        }
    }
}

impl fmt::Display for ValueFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum StagedValue {
    Null,
    Text(String),
    Integer(i64),
    Float(f64),
    Boolean(bool),
    DateTime(#[serde(with = "time::serde::rfc3339")] OffsetDateTime),
}

impl StagedValue {
    pub fn kind(&self) -> &'static str {
        match self {
            StagedValue::Null => "null",
            StagedValue::Text(_) => "text",
            StagedValue::Integer(_) => "integer",
            StagedValue::Float(_) => "float",
            StagedValue::Boolean(_) => "boolean",
            StagedValue::DateTime(_) => "datetime",
        }
    }

    pub fn encode(&self) -> DeferredResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn decode(raw: &str) -> DeferredResult<Self> {
        Ok(serde_json::from_str(raw)?)
    }

    pub fn coerce(self, family: ValueFamily) -> DeferredResult<StagedValue> {
        let kind = self.kind();
        let mismatch =
            || DeferredError::validation(format!("cannot stage {kind} value into {family} column"));
        let coerced = match (family, self) {
            (_, StagedValue::Null) => StagedValue::Null,
            (ValueFamily::Text, StagedValue::Text(v)) => StagedValue::Text(v),
            (ValueFamily::Text, StagedValue::Integer(v)) => StagedValue::Text(v.to_string()),
            (ValueFamily::Text, StagedValue::Float(v)) => StagedValue::Text(v.to_string()),
            (ValueFamily::Text, StagedValue::Boolean(v)) => StagedValue::Text(v.to_string()),
            (ValueFamily::Text, StagedValue::DateTime(v)) => StagedValue::Text(
                v.format(&Rfc3339)
                    .map_err(|err| DeferredError::validation(err.to_string()))?,
            ),
            (ValueFamily::Integer, StagedValue::Integer(v)) => StagedValue::Integer(v),
            (ValueFamily::Integer, StagedValue::Float(v)) => {
                StagedValue::Integer(integral_float(v).ok_or_else(mismatch)?)
            }
            (ValueFamily::Integer, StagedValue::Boolean(v)) => StagedValue::Integer(i64::from(v)),
            (ValueFamily::Integer, StagedValue::Text(v)) => {
                StagedValue::Integer(v.trim().parse::<i64>().map_err(|_| mismatch())?)
            }
            (ValueFamily::Float, StagedValue::Float(v)) => StagedValue::Float(v),
            (ValueFamily::Float, StagedValue::Integer(v)) => StagedValue::Float(v as f64),
            (ValueFamily::Float, StagedValue::Text(v)) => {
                StagedValue::Float(v.trim().parse::<f64>().map_err(|_| mismatch())?)
            }
            (ValueFamily::Boolean, StagedValue::Boolean(v)) => StagedValue::Boolean(v),
            (ValueFamily::Boolean, StagedValue::Integer(v @ (0 | 1))) => StagedValue::Boolean(v == 1),
            (ValueFamily::DateTime, StagedValue::DateTime(v)) => StagedValue::DateTime(v),
            (ValueFamily::DateTime, StagedValue::Float(v)) => {
                StagedValue::DateTime(epoch_seconds_to_datetime(v)?)
            }
            (ValueFamily::DateTime, StagedValue::Integer(v)) => StagedValue::DateTime(
                OffsetDateTime::from_unix_timestamp(v).map_err(|_| mismatch())?,
            ),
            (ValueFamily::DateTime, StagedValue::Text(v)) => {
                StagedValue::DateTime(OffsetDateTime::parse(&v, &Rfc3339).map_err(|_| mismatch())?)
            }
            _ => return Err(mismatch()),
        };
        Ok(coerced)
    }
}

impl From<String> for StagedValue {
    fn from(value: String) -> Self {
        StagedValue::Text(value)
    }
}

impl From<&str> for StagedValue {
    fn from(value: &str) -> Self {
        StagedValue::Text(value.to_string())
    }
}

impl From<i64> for StagedValue {
    fn from(value: i64) -> Self {
        StagedValue::Integer(value)
    }
}

impl From<i32> for StagedValue {
    fn from(value: i32) -> Self {
        StagedValue::Integer(i64::from(value))
    }
}

impl From<f64> for StagedValue {
    fn from(value: f64) -> Self {
        StagedValue::Float(value)
    }
}

impl From<bool> for StagedValue {
    fn from(value: bool) -> Self {
        StagedValue::Boolean(value)
    }
}

impl From<OffsetDateTime> for StagedValue {
    fn from(value: OffsetDateTime) -> Self {
        StagedValue::DateTime(value)
    }
}

impl<T: Into<StagedValue>> From<Option<T>> for StagedValue {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(StagedValue::Null)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct BatchRow {
    pub id: RecordId,
    pub value: StagedValue,
}

impl BatchRow {
    pub fn new(id: impl Into<RecordId>, value: impl Into<StagedValue>) -> Self {
        Self {
            id: id.into(),
            value: value.into(),
        }
    }
}

const NANOS_PER_MICRO: i128 = 1_000;

pub fn datetime_to_epoch_seconds(value: OffsetDateTime) -> f64 {
    value.unix_timestamp_nanos() as f64 / 1e9
}

/// Inverse of [`datetime_to_epoch_seconds`], rounded to whole microseconds.
pub fn epoch_seconds_to_datetime(seconds: f64) -> DeferredResult<OffsetDateTime> {
    if !seconds.is_finite() {
        return Err(DeferredError::validation(format!(
            "ordering key {seconds} is not a timestamp"
        )));
    }
    let micros = (seconds * 1e6).round() as i128;
    let nanos = micros.checked_mul(NANOS_PER_MICRO).ok_or_else(|| {
        DeferredError::validation(format!("ordering key {seconds} is out of range"))
    })?;
    OffsetDateTime::from_unix_timestamp_nanos(nanos)
        .map_err(|err| DeferredError::validation(format!("ordering key {seconds}: {err}")))
}

pub fn now_epoch_seconds() -> f64 {
    datetime_to_epoch_seconds(OffsetDateTime::now_utc())
}

fn integral_float(value: f64) -> Option<i64> {
    if value.is_finite() && value.fract() == 0.0 && value.abs() < 9.007_199_254_740_992e15 {
        Some(value as i64)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn staged_values_survive_the_staging_encoding() {
        let values = [
            StagedValue::Null,
            StagedValue::Text("b".to_string()),
            StagedValue::Integer(-3),
            StagedValue::Boolean(true),
            StagedValue::DateTime(datetime!(2024-03-01 12:30:00.25 UTC)),
        ];
        for value in values {
            let raw = value.encode().expect("encode");
            assert_eq!(StagedValue::decode(&raw).expect("decode"), value);
        }
    }

    #[test]
    fn epoch_seconds_keep_microseconds() {
        let at = datetime!(2023-11-14 22:13:20.123456 UTC);
        let seconds = datetime_to_epoch_seconds(at);
        assert_eq!(epoch_seconds_to_datetime(seconds).expect("decode"), at);
    }

    #[test]
    fn non_finite_keys_are_not_timestamps() {
        assert!(epoch_seconds_to_datetime(f64::INFINITY).is_err());
        assert!(epoch_seconds_to_datetime(f64::NAN).is_err());
        assert!(epoch_seconds_to_datetime(1e300).is_err());
        assert!(epoch_seconds_to_datetime(-1e300).is_err());
    }

    #[test]
    fn coerces_ordering_keys_into_column_families() {
        let value = StagedValue::Float(1_700_000_000.5);
        let StagedValue::DateTime(at) = value.clone().coerce(ValueFamily::DateTime).expect("dt")
        else {
            panic!("expected datetime");
        };
        assert_eq!(at.unix_timestamp(), 1_700_000_000);
        assert!(value.coerce(ValueFamily::Integer).is_err());
        assert_eq!(
            StagedValue::Float(42.0)
                .coerce(ValueFamily::Integer)
                .expect("int"),
            StagedValue::Integer(42)
        );
    }

    #[test]
    fn text_columns_accept_rendered_scalars() {
        assert_eq!(
            StagedValue::Integer(7).coerce(ValueFamily::Text).expect("text"),
            StagedValue::Text("7".to_string())
        );
        assert_eq!(
            StagedValue::Null.coerce(ValueFamily::Integer).expect("null"),
            StagedValue::Null
        );
        assert!(
            StagedValue::Text("seven".to_string())
                .coerce(ValueFamily::Integer)
                .is_err()
        );
    }

    #[test]
    fn family_names_are_lowercase() {
        assert_eq!(ValueFamily::DateTime.to_string(), "datetime");
        assert_eq!(
            serde_json::to_string(&ValueFamily::Float).expect("json"),
            "\"float\""
        );
    }
}
