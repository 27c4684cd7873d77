//! Rate strings for the bucket model.

use std::fmt;
use std::str::FromStr;

use crate::error::{FirewallError, Result};

/// Sustained request rate parsed from `"<n>r/s"` or `"<n>r/m"`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rate {
    per_second: f64,
}

impl Rate {
    pub fn per_second(&self) -> f64 {
        self.per_second
    }

    /// Backlog, in seconds, one request adds to a bucket.
    pub fn tick(&self) -> f64 {
        1.0 / self.per_second
    }
}

impl FromStr for Rate {
    type Err = FirewallError;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || FirewallError::Config(format!("Invalid rate \"{s}\", expected <n>r/s or <n>r/m"));
        let (count, unit) = s.trim().split_once("r/").ok_or_else(invalid)?;
        let count: u32 = count.parse().map_err(|_| invalid())?;
        if count == 0 {
            return Err(invalid());
        }
        let per_second = match unit {
            "s" => f64::from(count),
            "m" => f64::from(count) / 60.0,
            _ => return Err(invalid()),
        };
        Ok(Self { per_second })
    }
}

impl fmt::Display for Rate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.3}r/s", self.per_second)
    }
}

pub fn parse_rate(s: &str) -> Result<Rate> {
    s.parse()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_seconds_and_minutes() {
        let r = parse_rate("20r/s").map(|r| r.per_second()).unwrap_or_default();
        assert!((r - 20.0).abs() < f64::EPSILON);
        let m = parse_rate("120r/m").map(|r| r.per_second()).unwrap_or_default();
        assert!((m - 2.0).abs() < f64::EPSILON);
    }

    #[test]
    fn rejects_bad_strings() {
        for bad in ["", "20", "20r/h", "r/s", "0r/s", "-1r/s", "abc r/s"] {
            assert!(parse_rate(bad).is_err(), "{bad} should be rejected");
        }
    }
}
