//! Built-in processing handlers.
use serde_json::Value;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

use gateway_common::record::Payload;

use crate::error::HandlerError;
use crate::registry::{Category, HandlerRegistry};

/// Readings whose `value` exceeds this are flagged.
pub const HIGH_VALUE_THRESHOLD: f64 = 100.0;
pub const HIGH_VALUE_ALERT: &str = "HIGH_VALUE_ALERT";

/// Mark a reading as processed, stamp it, and flag high values.
pub fn annotate_reading(payload: &Payload) -> Result<Payload, HandlerError> {
    annotate_reading_at(payload, OffsetDateTime::now_utc())
}

pub fn annotate_reading_at(
    payload: &Payload,
    now: OffsetDateTime,
) -> Result<Payload, HandlerError> {
    let Value::Object(fields) = payload else {
        return Err(HandlerError::new("reading must be a JSON object"));
    };

    let timestamp = now
        .format(&Rfc3339)
        .map_err(|error| HandlerError::new(format!("failed to format timestamp: {error}")))?;

    let mut annotated = fields.clone();
    annotated.insert("processed".to_owned(), Value::Bool(true));
    annotated.insert("processing_timestamp".to_owned(), Value::String(timestamp));

    let high_value = fields
        .get("value")
        .and_then(Value::as_f64)
        .is_some_and(|value| value > HIGH_VALUE_THRESHOLD);
    if high_value {
        annotated.insert(
            "alert".to_owned(),
            Value::String(HIGH_VALUE_ALERT.to_owned()),
        );
    }

    Ok(Value::Object(annotated))
}

/// Register the built-in handlers the worker ships with.
pub fn register_defaults(registry: &HandlerRegistry) {
    registry.register(Category::Default, annotate_reading);
    registry.register(Category::Sensor, annotate_reading);
}
