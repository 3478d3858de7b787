use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IntervalError {
    #[error("invalid duration {0:?}; expected something like 1s, 1m or 1h")]
    Invalid(String),

    #[error("missing unit in duration {0:?}; valid units are ns, us, ms, s, m, h")]
    MissingUnit(String),

    #[error("unknown unit {unit:?} in duration {input:?}")]
    UnknownUnit { unit: String, input: String },

    #[error("polling interval must be greater than zero")]
    NotPositive,
}

fn unit_nanos(unit: &str) -> Option<u128> {
    Some(match unit {
        "ns" => 1,
        "us" | "µs" | "μs" => 1_000,
        "ms" => 1_000_000,
        "s" => 1_000_000_000,
        "m" => 60 * 1_000_000_000,
        "h" => 3_600 * 1_000_000_000,
        _ => return None,
    })
}

/// Parses a duration such as `1s`, `1m`, `1h30m`, `500ms` or `1.5s` into a
/// polling interval. Zero and negative durations are rejected.
pub fn parse_interval(input: &str) -> Result<Duration, IntervalError> {
    let invalid = || IntervalError::Invalid(input.to_string());

    let mut rest = input.trim();
    if let Some(stripped) = rest.strip_prefix('+') {
        rest = stripped;
    } else if rest.starts_with('-') {
        return Err(IntervalError::NotPositive);
    }
    if rest.is_empty() {
        return Err(invalid());
    }
    if rest == "0" {
        return Err(IntervalError::NotPositive);
    }

    let mut total_nanos: u128 = 0;
    while !rest.is_empty() {
        let number_len = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(rest.len());
        let (number, after_number) = rest.split_at(number_len);
        if number.is_empty() || number == "." || number.matches('.').count() > 1 {
            return Err(invalid());
        }

        let unit_len = after_number
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(after_number.len());
        let (unit, after_unit) = after_number.split_at(unit_len);
        if unit.is_empty() {
            return Err(IntervalError::MissingUnit(input.to_string()));
        }
        let scale = unit_nanos(unit).ok_or_else(|| IntervalError::UnknownUnit {
            unit: unit.to_string(),
            input: input.to_string(),
        })?;

        total_nanos = total_nanos
            .checked_add(scaled(number, scale).ok_or_else(invalid)?)
            .ok_or_else(invalid)?;
        rest = after_unit;
    }

    if total_nanos == 0 {
        return Err(IntervalError::NotPositive);
    }
    let secs = u64::try_from(total_nanos / 1_000_000_000).map_err(|_| invalid())?;
    // Remainder of a division by 1e9 always fits in u32.
    let nanos = (total_nanos % 1_000_000_000) as u32;
    Ok(Duration::new(secs, nanos))
}

/// `number` (digits with an optional fraction) times `scale` nanoseconds.
fn scaled(number: &str, scale: u128) -> Option<u128> {
    let (whole, fraction) = number.split_once('.').unwrap_or((number, ""));
    let whole: u128 = if whole.is_empty() { 0 } else { whole.parse().ok()? };
    let mut nanos = whole.checked_mul(scale)?;

    let mut place = scale;
    for digit in fraction.chars() {
        place /= 10;
        if place == 0 {
            break;
        }
        nanos = nanos.checked_add(u128::from(digit.to_digit(10)?) * place)?;
    }
    Some(nanos)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_single_units() {
        assert_eq!(parse_interval("1s"), Ok(Duration::from_secs(1)));
        assert_eq!(parse_interval("1m"), Ok(Duration::from_secs(60)));
        assert_eq!(parse_interval("1h"), Ok(Duration::from_secs(3600)));
        assert_eq!(parse_interval("250ms"), Ok(Duration::from_millis(250)));
        assert_eq!(parse_interval("10us"), Ok(Duration::from_micros(10)));
        assert_eq!(parse_interval("7ns"), Ok(Duration::from_nanos(7)));
    }

    #[test]
    fn parses_compound_and_fractional_durations() {
        assert_eq!(parse_interval("1h30m"), Ok(Duration::from_secs(5400)));
        assert_eq!(parse_interval("1m0.5s"), Ok(Duration::from_millis(60_500)));
        assert_eq!(parse_interval("1.5s"), Ok(Duration::from_millis(1500)));
        assert_eq!(parse_interval(".5m"), Ok(Duration::from_secs(30)));
        assert_eq!(parse_interval("+2s"), Ok(Duration::from_secs(2)));
    }

    #[test]
    fn rejects_missing_or_unknown_units() {
        assert_eq!(
            parse_interval("10"),
            Err(IntervalError::MissingUnit("10".into()))
        );
        assert!(matches!(
            parse_interval("3d"),
            Err(IntervalError::UnknownUnit { unit, .. }) if unit == "d"
        ));
    }

    #[test]
    fn rejects_garbage() {
        for input in ["", "s", "abc", "1..5s", "."] {
            assert!(parse_interval(input).is_err(), "{input:?} should not parse");
        }
    }

    #[test]
    fn rejects_non_positive_durations() {
        assert_eq!(parse_interval("0"), Err(IntervalError::NotPositive));
        assert_eq!(parse_interval("0s"), Err(IntervalError::NotPositive));
        assert_eq!(parse_interval("-1m"), Err(IntervalError::NotPositive));
    }
}
