mod input;
mod output;

pub use input::CsvInput;
pub use output::CsvOutput;

use model::core::value::Value;

/// Infers a typed value from a raw CSV field: int, then float, then bool,
/// falling back to string. Empty fields become null.
pub(crate) fn infer_value(raw: &str) -> Value {
    let raw = raw.trim();
    if raw.is_empty() {
        return Value::Null;
    }
    if let Ok(int) = raw.parse::<i64>() {
        return Value::Int(int);
    }
    if let Ok(float) = raw.parse::<f64>() {
        return Value::Float(float);
    }
    match raw.to_ascii_lowercase().as_str() {
        "true" => Value::Boolean(true),
        "false" => Value::Boolean(false),
        _ => Value::String(raw.to_owned()),
    }
}

/// Formats a value for a CSV cell. Nulls become empty fields.
pub(crate) fn format_value(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inference_prefers_narrower_types() {
        assert_eq!(infer_value("42"), Value::Int(42));
        assert_eq!(infer_value("2.5"), Value::Float(2.5));
        assert_eq!(infer_value("true"), Value::Boolean(true));
        assert_eq!(infer_value("NYC"), Value::String("NYC".into()));
        assert_eq!(infer_value("  "), Value::Null);
    }
}
