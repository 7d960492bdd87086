//! Go-style duration strings such as `8h`, `1h30m` or `1.5h`.

use std::sync::LazyLock;

use chrono::Duration;
use regex::Regex;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid duration {input:?}: {reason}")]
pub struct InvalidDuration {
    pub input: String,
    pub reason: String,
}

static COMPONENT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\d*)(?:\.(\d*))?(ns|us|µs|μs|ms|s|m|h)")
        .unwrap_or_else(|e| unreachable!("static pattern: {e}"))
});

const NANOS_PER_MICRO: u128 = 1_000;
const NANOS_PER_MILLI: u128 = 1_000_000;
const NANOS_PER_SECOND: u128 = 1_000_000_000;

/// Parse a non-negative duration made of `<number><unit>` components.
///
/// A bare `0` is accepted; any other number needs a unit.
pub fn parse_duration(input: &str) -> Result<Duration, InvalidDuration> {
    let invalid = |reason: &str| InvalidDuration {
        input: input.to_string(),
        reason: reason.to_string(),
    };

    let s = input.trim();
    if s == "0" {
        return Ok(Duration::zero());
    }
    if s.is_empty() {
        return Err(invalid("empty duration"));
    }
    if s.starts_with('-') {
        return Err(invalid("duration must not be negative"));
    }

    let mut rest = s.strip_prefix('+').unwrap_or(s);
    let mut total: u128 = 0;
    while !rest.is_empty() {
        let caps = COMPONENT
            .captures(rest)
            .ok_or_else(|| invalid("expected <number><unit>, unit one of ns, us, ms, s, m, h"))?;
        let whole = caps.get(1).map_or("", |m| m.as_str());
        let fraction = caps.get(2).map_or("", |m| m.as_str());
        if whole.is_empty() && fraction.is_empty() {
            return Err(invalid("missing number before unit"));
        }
        let unit = match caps.get(3).map_or("", |m| m.as_str()) {
            "ns" => 1,
            "us" | "µs" | "μs" => NANOS_PER_MICRO,
            "ms" => NANOS_PER_MILLI,
            "s" => NANOS_PER_SECOND,
            "m" => 60 * NANOS_PER_SECOND,
            _ => 3_600 * NANOS_PER_SECOND,
        };

        let whole: u128 = if whole.is_empty() {
            0
        } else {
            whole.parse().map_err(|_| invalid("duration out of range"))?
        };
        let mut component = whole
            .checked_mul(unit)
            .ok_or_else(|| invalid("duration out of range"))?;
        if !fraction.is_empty() {
            let digits = &fraction[..fraction.len().min(18)];
            let numerator: u128 = digits.parse().map_err(|_| invalid("duration out of range"))?;
            component += numerator * unit / 10u128.pow(u32::try_from(digits.len()).unwrap_or(18));
        }
        total = total
            .checked_add(component)
            .ok_or_else(|| invalid("duration out of range"))?;
        rest = &rest[caps.get(0).map_or(rest.len(), |m| m.end())..];
    }

    i64::try_from(total)
        .map(Duration::nanoseconds)
        .map_err(|_| invalid("duration out of range"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("0", Duration::zero())]
    #[case("8h", Duration::hours(8))]
    #[case("90m", Duration::minutes(90))]
    #[case("1h30m", Duration::minutes(90))]
    #[case("1.5h", Duration::minutes(90))]
    #[case("45s", Duration::seconds(45))]
    #[case(" 2h ", Duration::hours(2))]
    #[case("0s", Duration::zero())]
    #[case("1m0.5s", Duration::milliseconds(60_500))]
    #[case("250ms", Duration::milliseconds(250))]
    #[case("3us", Duration::microseconds(3))]
    #[case(".5m", Duration::seconds(30))]
    fn test_parse_valid(#[case] input: &str, #[case] want: Duration) {
        assert_eq!(parse_duration(input).unwrap(), want);
    }

    #[rstest]
    #[case("")]
    #[case("8")]
    #[case("h")]
    #[case("8d")]
    #[case("-1h")]
    #[case("1h30")]
    #[case("soon")]
    #[case("99999999999999999999h")]
    fn test_parse_invalid(#[case] input: &str) {
        let err = parse_duration(input).unwrap_err();
        assert_eq!(err.input, input);
    }
}
