use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::TidemarkError;

/// Bar granularity. Variants are declared from finest to coarsest so the derived
/// ordering compares granularity.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub enum IntervalLevel {
    #[serde(rename = "tick")]
    Tick,
    #[serde(rename = "1m")]
    Min1,
    #[serde(rename = "5m")]
    Min5,
    #[serde(rename = "15m")]
    Min15,
    #[serde(rename = "30m")]
    Min30,
    #[serde(rename = "1h")]
    Hour1,
    #[serde(rename = "4h")]
    Hour4,
    #[serde(rename = "1d")]
    Day1,
    #[serde(rename = "1wk")]
    Week1,
    #[serde(rename = "1mon")]
    Month1,
}

impl IntervalLevel {
    pub const ALL: [IntervalLevel; 10] = [
        IntervalLevel::Tick,
        IntervalLevel::Min1,
        IntervalLevel::Min5,
        IntervalLevel::Min15,
        IntervalLevel::Min30,
        IntervalLevel::Hour1,
        IntervalLevel::Hour4,
        IntervalLevel::Day1,
        IntervalLevel::Week1,
        IntervalLevel::Month1,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            IntervalLevel::Tick => "tick",
            IntervalLevel::Min1 => "1m",
            IntervalLevel::Min5 => "5m",
            IntervalLevel::Min15 => "15m",
            IntervalLevel::Min30 => "30m",
            IntervalLevel::Hour1 => "1h",
            IntervalLevel::Hour4 => "4h",
            IntervalLevel::Day1 => "1d",
            IntervalLevel::Week1 => "1wk",
            IntervalLevel::Month1 => "1mon",
        }
    }

    pub fn is_daily_or_coarser(self) -> bool {
        self >= IntervalLevel::Day1
    }
}

impl fmt::Display for IntervalLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IntervalLevel {
    type Err = TidemarkError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        IntervalLevel::ALL
            .into_iter()
            .find(|level| level.as_str() == value)
            .ok_or_else(|| TidemarkError::invalid(format!("unknown interval level '{value}'")))
    }
}

/// Price adjustment applied to bar data.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AdjustType {
    /// Unadjusted.
    Bfq,
    /// Forward adjusted; the naming default.
    #[default]
    Qfq,
    /// Backward adjusted.
    Hfq,
}

impl AdjustType {
    pub fn as_str(self) -> &'static str {
        match self {
            AdjustType::Bfq => "bfq",
            AdjustType::Qfq => "qfq",
            AdjustType::Hfq => "hfq",
        }
    }

    pub fn is_default(self) -> bool {
        self == AdjustType::default()
    }
}

impl fmt::Display for AdjustType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AdjustType {
    type Err = TidemarkError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "bfq" => Ok(AdjustType::Bfq),
            "qfq" => Ok(AdjustType::Qfq),
            "hfq" => Ok(AdjustType::Hfq),
            other => Err(TidemarkError::invalid(format!("unknown adjust type '{other}'"))),
        }
    }
}

/// Stock-like entities are stored backward adjusted; everything else forward adjusted.
pub fn default_adjust_type(entity_type: &str) -> AdjustType {
    if entity_type.to_lowercase().starts_with("stock") {
        AdjustType::Hfq
    } else {
        AdjustType::Qfq
    }
}

#[cfg(test)]
mod tests {
    use super::{AdjustType, IntervalLevel, default_adjust_type};

    #[test]
    fn levels_order_by_granularity() {
        assert!(IntervalLevel::Min30 < IntervalLevel::Day1);
        assert!(IntervalLevel::Week1 > IntervalLevel::Day1);
        assert!(IntervalLevel::Day1.is_daily_or_coarser());
        assert!(!IntervalLevel::Hour4.is_daily_or_coarser());
    }

    #[test]
    fn level_strings_roundtrip() {
        for level in IntervalLevel::ALL {
            let parsed: IntervalLevel = level.as_str().parse().expect("parse");
            assert_eq!(parsed, level);
        }
        assert!("2d".parse::<IntervalLevel>().is_err());
    }

    #[test]
    fn adjust_defaults_follow_entity_type() {
        assert_eq!(default_adjust_type("stock"), AdjustType::Hfq);
        assert_eq!(default_adjust_type("stockhk"), AdjustType::Hfq);
        assert_eq!(default_adjust_type("index"), AdjustType::Qfq);
        assert!(AdjustType::Qfq.is_default());
    }
}
