//! Byte-size and duration values with a human-readable, unit-suffixed text form.
//!
//! Both types format with the largest unit that represents the value exactly,
//! so `parse(format(v)) == v` and re-formatting is byte-identical.

use crate::error::Error;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::iter::Sum;
use std::str::FromStr;
use std::time::Duration as StdDuration;

const SIZE_UNITS: [(&str, u64); 6] = [
    ("PB", 1 << 50),
    ("TB", 1 << 40),
    ("GB", 1 << 30),
    ("MB", 1 << 20),
    ("kB", 1 << 10),
    ("B", 1),
];

const NANOS_PER_SECOND: u128 = 1_000_000_000;
const NANOS_PER_MILLI: u128 = 1_000_000;

const TIME_UNITS: [(&str, u128); 7] = [
    ("d", 86_400 * NANOS_PER_SECOND),
    ("h", 3_600 * NANOS_PER_SECOND),
    ("m", 60 * NANOS_PER_SECOND),
    ("s", NANOS_PER_SECOND),
    ("ms", NANOS_PER_MILLI),
    ("us", 1_000),
    ("ns", 1),
];

/// A non-negative number of bytes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DataSize(u64);

impl DataSize {
    pub const ZERO: Self = Self(0);

    pub const fn from_bytes(bytes: u64) -> Self {
        Self(bytes)
    }

    pub const fn bytes(self) -> u64 {
        self.0
    }

    pub fn saturating_add(self, other: Self) -> Self {
        Self(self.0.saturating_add(other.0))
    }
}

impl fmt::Display for DataSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0 == 0 {
            return f.write_str("0B");
        }
        let (suffix, factor) = SIZE_UNITS
            .into_iter()
            .find(|(_, factor)| self.0 % factor == 0)
            .unwrap_or(("B", 1));
        write!(f, "{}{}", self.0 / factor, suffix)
    }
}

impl FromStr for DataSize {
    type Err = Error;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let invalid = |reason| Error::InvalidDataSize {
            input: input.to_string(),
            reason,
        };
        let (magnitude, unit) = split_magnitude(input).ok_or_else(|| invalid("missing unit"))?;
        let factor = SIZE_UNITS
            .iter()
            .find(|(suffix, _)| *suffix == unit)
            .map(|(_, factor)| u128::from(*factor))
            .ok_or_else(|| invalid("unknown unit"))?;
        let bytes = scale(magnitude, factor).map_err(invalid)?;
        u64::try_from(bytes)
            .map(Self)
            .map_err(|_| invalid("value is too large"))
    }
}

impl Sum for DataSize {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Self::ZERO, Self::saturating_add)
    }
}

impl Serialize for DataSize {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for DataSize {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        text.parse().map_err(serde::de::Error::custom)
    }
}

/// A non-negative span of time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Duration(StdDuration);

impl Duration {
    pub const ZERO: Self = Self(StdDuration::ZERO);

    pub const fn from_millis(millis: u64) -> Self {
        Self(StdDuration::from_millis(millis))
    }

    pub const fn from_std(duration: StdDuration) -> Self {
        Self(duration)
    }

    pub const fn as_std(self) -> StdDuration {
        self.0
    }

    /// Whole milliseconds, rounding half away from zero.
    pub fn round_to_millis(self) -> u64 {
        let millis = (self.0.as_nanos() + NANOS_PER_MILLI / 2) / NANOS_PER_MILLI;
        u64::try_from(millis).unwrap_or(u64::MAX)
    }

    pub fn saturating_add(self, other: Self) -> Self {
        Self(self.0.saturating_add(other.0))
    }
}

impl From<StdDuration> for Duration {
    fn from(duration: StdDuration) -> Self {
        Self(duration)
    }
}

impl fmt::Display for Duration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let nanos = self.0.as_nanos();
        if nanos == 0 {
            return f.write_str("0ms");
        }
        let (suffix, factor) = TIME_UNITS
            .into_iter()
            .find(|(_, factor)| nanos % factor == 0)
            .unwrap_or(("ns", 1));
        write!(f, "{}{}", nanos / factor, suffix)
    }
}

impl FromStr for Duration {
    type Err = Error;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let invalid = |reason| Error::InvalidDuration {
            input: input.to_string(),
            reason,
        };
        let (magnitude, unit) = split_magnitude(input).ok_or_else(|| invalid("missing unit"))?;
        let factor = TIME_UNITS
            .iter()
            .find(|(suffix, _)| *suffix == unit)
            .map(|(_, factor)| *factor)
            .ok_or_else(|| invalid("unknown unit"))?;
        let nanos = scale(magnitude, factor).map_err(invalid)?;
        let seconds =
            u64::try_from(nanos / NANOS_PER_SECOND).map_err(|_| invalid("value is too large"))?;
        // Always < 1e9.
        let subsec_nanos = (nanos % NANOS_PER_SECOND) as u32;
        Ok(Self(StdDuration::new(seconds, subsec_nanos)))
    }
}

impl Sum for Duration {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Self::ZERO, Self::saturating_add)
    }
}

impl Serialize for Duration {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Duration {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        text.parse().map_err(serde::de::Error::custom)
    }
}

/// Splits `"1.5kB"` into `("1.5", "kB")`.
fn split_magnitude(input: &str) -> Option<(&str, &str)> {
    let trimmed = input.trim();
    let unit_start = trimmed.find(|c: char| c.is_ascii_alphabetic())?;
    Some((trimmed[..unit_start].trim(), &trimmed[unit_start..]))
}

/// Multiplies a textual magnitude by `factor`, rounding to the nearest whole unit.
fn scale(magnitude: &str, factor: u128) -> Result<u128, &'static str> {
    if magnitude.is_empty() {
        return Err("missing magnitude");
    }
    if magnitude.starts_with('-') {
        return Err("value must not be negative");
    }
    if let Ok(whole) = magnitude.parse::<u128>() {
        return whole.checked_mul(factor).ok_or("value is too large");
    }
    let value: f64 = magnitude.parse().map_err(|_| "magnitude is not a number")?;
    if !value.is_finite() {
        return Err("magnitude is not finite");
    }
    let scaled = (value * factor as f64).round();
    if scaled >= u128::MAX as f64 {
        return Err("value is too large");
    }
    Ok(scaled as u128)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_data_size_formats_with_largest_exact_unit() {
        assert_eq!(DataSize::from_bytes(0).to_string(), "0B");
        assert_eq!(DataSize::from_bytes(2048).to_string(), "2kB");
        assert_eq!(DataSize::from_bytes(2100).to_string(), "2100B");
        assert_eq!(DataSize::from_bytes(3 << 20).to_string(), "3MB");
        assert_eq!(DataSize::from_bytes(1536 << 10).to_string(), "1536kB");
    }

    #[test]
    fn test_data_size_parses_decimal_magnitudes() {
        assert_eq!("1.5kB".parse::<DataSize>().unwrap().bytes(), 1536);
        assert_eq!("2100B".parse::<DataSize>().unwrap().bytes(), 2100);
        assert_eq!(" 4 GB ".parse::<DataSize>().unwrap().bytes(), 4 << 30);
    }

    #[test]
    fn test_data_size_rejects_bad_input() {
        for input in ["-1B", "12", "kB", "1.2XB", "NaNB", "infB", "99999999999PB"] {
            assert!(input.parse::<DataSize>().is_err(), "accepted {input}");
        }
        let err = "-5MB".parse::<DataSize>().unwrap_err();
        assert_eq!(
            err.to_string(),
            "invalid data size '-5MB': value must not be negative"
        );
    }

    #[test]
    fn test_duration_formats_with_largest_exact_unit() {
        assert_eq!(Duration::ZERO.to_string(), "0ms");
        assert_eq!(Duration::from_millis(550).to_string(), "550ms");
        assert_eq!(Duration::from_millis(1500).to_string(), "1500ms");
        assert_eq!(Duration::from_millis(2000).to_string(), "2s");
        assert_eq!(Duration::from_millis(120_000).to_string(), "2m");
        assert_eq!(Duration::from_std(StdDuration::from_nanos(1_001)).to_string(), "1001ns");
    }

    #[test]
    fn test_duration_parses_and_rounds() {
        assert_eq!(
            "1.50s".parse::<Duration>().unwrap(),
            Duration::from_millis(1500)
        );
        assert_eq!("3h".parse::<Duration>().unwrap().as_std(), StdDuration::from_secs(10_800));
        assert!("-5ms".parse::<Duration>().is_err());
        assert!("5 parsecs".parse::<Duration>().is_err());
    }

    #[test]
    fn test_round_to_millis() {
        assert_eq!(Duration::from_std(StdDuration::from_micros(1_499)).round_to_millis(), 1);
        assert_eq!(Duration::from_std(StdDuration::from_micros(1_500)).round_to_millis(), 2);
        assert_eq!(Duration::ZERO.round_to_millis(), 0);
    }

    #[test]
    fn test_serde_uses_text_form() {
        let json = serde_json::to_string(&(DataSize::from_bytes(2048), Duration::from_millis(300)))
            .unwrap();
        assert_eq!(json, r#"["2kB","300ms"]"#);
        let (size, duration): (DataSize, Duration) = serde_json::from_str(&json).unwrap();
        assert_eq!(size.bytes(), 2048);
        assert_eq!(duration, Duration::from_millis(300));
        assert!(serde_json::from_str::<Duration>(r#""-1s""#).is_err());
    }

    #[test]
    fn test_sums_saturate() {
        let total: DataSize = [DataSize::from_bytes(u64::MAX), DataSize::from_bytes(1)]
            .into_iter()
            .sum();
        assert_eq!(total.bytes(), u64::MAX);
    }
}
