//! Dot-delimited field extraction over dynamic messages.

use prost_reflect::{DynamicMessage, ReflectMessage, Value};

use crate::Error;

/// Walks a dot-delimited field path through a message.
///
/// Every non-terminal segment must resolve to a message field; the terminal
/// value is returned as-is for the caller to coerce.
pub fn get_nested_field(message: &DynamicMessage, field_path: &str) -> Result<Value, Error> {
    let segments: Vec<&str> = field_path.split('.').collect();
    let mut current = message.clone();

    for (i, segment) in segments.iter().enumerate() {
        let descriptor = current.descriptor();
        let field = descriptor.get_field_by_name(segment).ok_or_else(|| Error::FieldNotFound {
            field: (*segment).to_owned(),
            message: descriptor.full_name().to_owned(),
        })?;

        let value = current.get_field(&field).into_owned();
        if i + 1 == segments.len() {
            return Ok(value);
        }

        match value {
            Value::Message(next) => current = next,
            _ => return Err(Error::NotAMessage { field: (*segment).to_owned() }),
        }
    }

    // split() yields at least one segment, so the loop always returns.
    Err(Error::FieldNotFound { field: field_path.to_owned(), message: String::new() })
}

/// Renders a scalar field value as text, the way the upstream node encodes
/// heights. Returns `None` for composite values.
pub(crate) fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(v) => Some(v.clone()),
        Value::U64(v) => Some(v.to_string()),
        Value::I64(v) => Some(v.to_string()),
        Value::U32(v) => Some(v.to_string()),
        Value::I32(v) => Some(v.to_string()),
        Value::Bool(v) => Some(v.to_string()),
        _ => None,
    }
}
