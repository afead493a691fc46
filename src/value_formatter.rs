/// Shown in a slot whose value cannot be computed.
pub const ERROR_MARKER: &str = "ERROR";
/// Shown in a slot that is disabled or has no register configured.
pub const PLACEHOLDER: &str = "--,--";

/// Values above this are never exact halves of a hundredth worth adjusting.
const TIE_LIMIT: f64 = 1e12;

/// Renders a derived value with two decimals and a comma separator.
///
/// Exact halves round away from zero (`0.125` shows as `0,13`).
/// `None` and non-finite values become [`ERROR_MARKER`].
pub fn format_value(value: Option<f64>) -> String {
    match value {
        Some(value) if value.is_finite() => {
            format!("{:.2}", round_ties_away(value)).replace('.', ",")
        }
        _ => ERROR_MARKER.to_string(),
    }
}

/// `{:.2}` rounds exact ties to even. The only binary values sitting exactly
/// halfway between two hundredths are odd multiples of 1/8.
fn round_ties_away(value: f64) -> f64 {
    let eighths = value.abs() * 8.0;
    if value.abs() < TIE_LIMIT && eighths.fract() == 0.0 && eighths % 2.0 == 1.0 {
        (value * 100.0).round() / 100.0
    } else {
        value
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_value() {
        assert_eq!(format_value(Some(123.456)), "123,46");
        assert_eq!(format_value(Some(40.0)), "40,00");
        assert_eq!(format_value(Some(0.0)), "0,00");
        assert_eq!(format_value(Some(-7.5)), "-7,50");
        assert_eq!(format_value(Some(65535.0)), "65535,00");
    }

    #[test]
    fn test_format_value_rounds_halves_away_from_zero() {
        assert_eq!(format_value(Some(0.125)), "0,13");
        assert_eq!(format_value(Some(0.375)), "0,38");
        assert_eq!(format_value(Some(2.625)), "2,63");
        assert_eq!(format_value(Some(-0.125)), "-0,13");
        // Not an exact half in binary, stays below the tie.
        assert_eq!(format_value(Some(1.005)), "1,00");
        assert_eq!(format_value(Some(0.5)), "0,50");
    }

    #[test]
    fn test_format_value_errors() {
        assert_eq!(format_value(None), ERROR_MARKER);
        assert_eq!(format_value(Some(f64::NAN)), ERROR_MARKER);
        assert_eq!(format_value(Some(f64::INFINITY)), ERROR_MARKER);
        assert_eq!(format_value(Some(f64::NEG_INFINITY)), ERROR_MARKER);
    }
}
