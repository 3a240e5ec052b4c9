/*!
Parsing of time values written with units, as used for scenario deadlines and timeout events.

```
# use netproctor::utility::units::*;
# use std::str::FromStr;
let time = Time::from_str("500 ms").unwrap();
assert_eq!(time, Time::new(500, TimePrefix::Milli));
assert_eq!(std::time::Duration::from(time).as_millis(), 500);
```
*/

use std::fmt::{self, Display};
use std::str::FromStr;
use std::time::Duration;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::de::{Deserialize, Deserializer, Visitor};
use serde::ser::{Serialize, Serializer};

/// Time units. If no unit is given, seconds are assumed.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum TimePrefix {
    Nano,
    Micro,
    Milli,
    #[default]
    Sec,
    Min,
}

impl TimePrefix {
    fn nanos(&self) -> u64 {
        match self {
            Self::Nano => 1,
            Self::Micro => 1_000,
            Self::Milli => 1_000_000,
            Self::Sec => 1_000_000_000,
            Self::Min => 60 * 1_000_000_000,
        }
    }
}

impl FromStr for TimePrefix {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ns" | "nanosecond" | "nanoseconds" => Ok(Self::Nano),
            "us" | "μs" | "microsecond" | "microseconds" => Ok(Self::Micro),
            "ms" | "millisecond" | "milliseconds" => Ok(Self::Milli),
            "s" | "sec" | "secs" | "second" | "seconds" => Ok(Self::Sec),
            "m" | "min" | "mins" | "minute" | "minutes" => Ok(Self::Min),
            _ => Err(
                "Unit was not one of (ns|nanosecond|nanoseconds|us|μs|microsecond|microseconds\
                |ms|millisecond|milliseconds|s|sec|secs|second|seconds|m|min|mins|minute|minutes)"
                    .to_string(),
            ),
        }
    }
}

impl Display for TimePrefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Nano => write!(f, "ns"),
            Self::Micro => write!(f, "μs"),
            Self::Milli => write!(f, "ms"),
            Self::Sec => write!(f, "sec"),
            Self::Min => write!(f, "min"),
        }
    }
}

/// An amount of time with the unit it was written in.
///
/// Fractional values are accepted ("0.5 s") and are stored in the largest unit that represents
/// them exactly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Time {
    value: u64,
    prefix: TimePrefix,
}

impl Time {
    pub fn new(value: u64, prefix: TimePrefix) -> Self {
        Self { value, prefix }
    }

    pub fn value(&self) -> u64 {
        self.value
    }

    pub fn prefix(&self) -> TimePrefix {
        self.prefix
    }

    /// Build from a fractional number of `prefix` units, rounding to the nearest nanosecond.
    fn from_fractional(value: f64, prefix: TimePrefix) -> Result<Self, String> {
        if !value.is_finite() || value < 0.0 {
            return Err(format!("Time must be a non-negative number, got {value}"));
        }

        if value.fract() == 0.0 {
            return Ok(Self::new(value as u64, prefix));
        }

        let nanos = (value * prefix.nanos() as f64).round();
        if nanos > u64::MAX as f64 {
            return Err(format!("Time {value} {prefix} is too large"));
        }
        let nanos = nanos as u64;

        // use the coarsest unit that still represents the value exactly
        let prefix = [TimePrefix::Milli, TimePrefix::Micro]
            .into_iter()
            .find(|p| nanos % p.nanos() == 0)
            .unwrap_or(TimePrefix::Nano);
        Ok(Self::new(nanos / prefix.nanos(), prefix))
    }
}

impl Display for Time {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.value, self.prefix)
    }
}

impl FromStr for Time {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        static RE: Lazy<Regex> =
            Lazy::new(|| Regex::new(r"^([0-9]*\.?[0-9]*)\s*(.*)$").expect("valid regex"));

        let captures = RE
            .captures(s.trim())
            .ok_or("Unable to identify value and unit")?;
        let (value, unit) = (
            captures.get(1).map_or("", |m| m.as_str()),
            captures.get(2).map_or("", |m| m.as_str()).trim(),
        );

        let prefix = match unit {
            "" => TimePrefix::default(),
            _ => TimePrefix::from_str(unit)?,
        };

        let value: f64 = value
            .parse()
            .map_err(|e| format!("Invalid time value {value:?}: {e}"))?;

        Self::from_fractional(value, prefix)
    }
}

impl From<Time> for Duration {
    fn from(time: Time) -> Self {
        Duration::from_nanos(time.value.saturating_mul(time.prefix.nanos()))
    }
}

impl From<Duration> for Time {
    fn from(duration: Duration) -> Self {
        let nanos = u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX);
        let prefix = [TimePrefix::Sec, TimePrefix::Milli, TimePrefix::Micro]
            .into_iter()
            .find(|p| nanos % p.nanos() == 0)
            .unwrap_or(TimePrefix::Nano);
        Self::new(nanos / prefix.nanos(), prefix)
    }
}

impl Serialize for Time {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

struct TimeVisitor;

impl<'de> Visitor<'de> for TimeVisitor {
    type Value = Time;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        formatter.write_str("a time such as \"1 s\", \"500 ms\", or a number of seconds")
    }

    fn visit_str<E: serde::de::Error>(self, s: &str) -> Result<Self::Value, E> {
        Time::from_str(s).map_err(E::custom)
    }

    fn visit_u64<E: serde::de::Error>(self, x: u64) -> Result<Self::Value, E> {
        Ok(Time::new(x, TimePrefix::Sec))
    }

    fn visit_i64<E: serde::de::Error>(self, x: i64) -> Result<Self::Value, E> {
        let x = u64::try_from(x).map_err(E::custom)?;
        self.visit_u64(x)
    }

    fn visit_f64<E: serde::de::Error>(self, x: f64) -> Result<Self::Value, E> {
        Time::from_fractional(x, TimePrefix::Sec).map_err(E::custom)
    }
}

impl<'de> Deserialize<'de> for Time {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(TimeVisitor)
    }
}
