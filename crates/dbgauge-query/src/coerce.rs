//! Label value coercion.
//!
//! Text is used verbatim. Integral numbers print as plain integers. Other
//! numbers use the shortest scientific form with a signed, at least
//! two-digit exponent (`5.25e+00`, `1.2345e+03`, `1e-03`). Anything else
//! falls back to its display form.

use dbgauge_core::Value;

/// Largest magnitude still printed through `i64`.
const INTEGRAL_LIMIT: f64 = 9.2e18;

pub fn format_label_value(value: &Value) -> String {
    match value {
        Value::Text(s) => s.clone(),
        Value::Int(i) => i.to_string(),
        Value::Float(f) if f.is_finite() && f.fract() == 0.0 && f.abs() < INTEGRAL_LIMIT => {
            (*f as i64).to_string()
        }
        Value::Float(f) => format_sci(*f),
        other => other.to_string(),
    }
}

/// Shortest round-trip scientific notation, exponent as `e±DD`.
pub fn format_sci(v: f64) -> String {
    if v.is_nan() {
        return "NaN".to_string();
    }
    if v.is_infinite() {
        return if v > 0.0 { "+Inf" } else { "-Inf" }.to_string();
    }
    let formatted = format!("{v:e}");
    let Some((mantissa, exponent)) = formatted.split_once('e') else {
        return formatted;
    };
    let exponent: i32 = exponent.parse().unwrap_or(0);
    let sign = if exponent < 0 { '-' } else { '+' };
    format!("{mantissa}e{sign}{:02}", exponent.unsigned_abs())
}
