//! Rate policy model
//!
//! The pricing table applied when a session is opened (flat fee, included
//! minutes) and when it is closed (per-minute overage rate, rounding).

use serde::{Deserialize, Serialize};

/// Upper bound for prepaid minutes (one week)
pub const MAX_INCLUDED_MINUTES: i64 = 7 * 24 * 60;

/// How presented amounts are snapped to the `round_to` unit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RoundingStrategy {
    /// Round up to the next multiple (default)
    #[default]
    Ceil,
    /// Round down to the previous multiple
    Floor,
    /// Round half up to the closest multiple
    Nearest,
    /// Leave amounts untouched
    None,
}

impl std::fmt::Display for RoundingStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Ceil => write!(f, "ceil"),
            Self::Floor => write!(f, "floor"),
            Self::Nearest => write!(f, "nearest"),
            Self::None => write!(f, "none"),
        }
    }
}

impl std::str::FromStr for RoundingStrategy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "ceil" => Ok(Self::Ceil),
            "floor" => Ok(Self::Floor),
            "nearest" => Ok(Self::Nearest),
            "none" => Ok(Self::None),
            _ => Err(anyhow::anyhow!("Invalid rounding strategy: {}", s)),
        }
    }
}

/// Rounding rule: strategy plus the currency unit to snap to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rounding {
    #[serde(default)]
    pub strategy: RoundingStrategy,
    #[serde(default = "default_round_to")]
    pub round_to: i64,
}

impl Default for Rounding {
    fn default() -> Self {
        Self {
            strategy: RoundingStrategy::default(),
            round_to: default_round_to(),
        }
    }
}

fn default_round_to() -> i64 {
    500
}

impl Rounding {
    /// Snap a non-negative amount to the configured unit.
    pub fn apply(&self, amount: i64) -> i64 {
        let unit = self.round_to;
        if unit <= 1 {
            return amount;
        }
        match self.strategy {
            RoundingStrategy::None => amount,
            RoundingStrategy::Floor => amount.div_euclid(unit) * unit,
            RoundingStrategy::Ceil => {
                let floor = amount.div_euclid(unit) * unit;
                if floor == amount {
                    amount
                } else {
                    floor.saturating_add(unit)
                }
            }
            RoundingStrategy::Nearest => {
                amount.saturating_add(unit / 2).div_euclid(unit) * unit
            }
        }
    }
}

/// Pricing table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RatePolicy {
    /// Label persisted with every bill this policy produces
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default = "default_currency")]
    pub currency: String,
    /// Base amount charged at check-in
    #[serde(default = "default_flat_fee")]
    pub flat_fee: i64,
    /// Prepaid minutes bundled with the flat fee
    #[serde(default = "default_included_minutes")]
    pub included_minutes: i64,
    /// Overage price per started minute
    #[serde(default = "default_per_minute")]
    pub per_minute: i64,
    #[serde(default)]
    pub rounding: Rounding,
}

impl Default for RatePolicy {
    fn default() -> Self {
        Self {
            version: default_version(),
            currency: default_currency(),
            flat_fee: default_flat_fee(),
            included_minutes: default_included_minutes(),
            per_minute: default_per_minute(),
            rounding: Rounding::default(),
        }
    }
}

fn default_version() -> String {
    "default".to_string()
}

fn default_currency() -> String {
    "UZS".to_string()
}

fn default_flat_fee() -> i64 {
    50_000
}

fn default_included_minutes() -> i64 {
    60
}

fn default_per_minute() -> i64 {
    1000
}

impl RatePolicy {
    /// Reject tables that could produce negative or meaningless bills
    pub fn validate(&self) -> Result<(), String> {
        if self.version.trim().is_empty() {
            return Err("billing.version cannot be empty".to_string());
        }
        if self.flat_fee < 0 {
            return Err(format!("billing.flat_fee must be >= 0, got {}", self.flat_fee));
        }
        if !(0..=MAX_INCLUDED_MINUTES).contains(&self.included_minutes) {
            return Err(format!(
                "billing.included_minutes must be between 0 and {}, got {}",
                MAX_INCLUDED_MINUTES, self.included_minutes
            ));
        }
        if self.per_minute < 0 {
            return Err(format!("billing.per_minute must be >= 0, got {}", self.per_minute));
        }
        if self.rounding.strategy != RoundingStrategy::None && self.rounding.round_to <= 0 {
            return Err(format!(
                "billing.rounding.round_to must be positive, got {}",
                self.rounding.round_to
            ));
        }
        Ok(())
    }

    /// The subset of the policy frozen onto a session at checkout
    pub fn snapshot(&self) -> RateSnapshot {
        RateSnapshot {
            version: self.version.clone(),
            currency: self.currency.clone(),
            per_minute: self.per_minute,
            rounding: self.rounding,
        }
    }
}

/// Policy values in effect when a bill was produced
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateSnapshot {
    pub version: String,
    pub currency: String,
    pub per_minute: i64,
    pub rounding: Rounding,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rounding(strategy: RoundingStrategy, round_to: i64) -> Rounding {
        Rounding { strategy, round_to }
    }

    #[test]
    fn test_ceil_rounding() {
        let r = rounding(RoundingStrategy::Ceil, 500);
        assert_eq!(r.apply(0), 0);
        assert_eq!(r.apply(1), 500);
        assert_eq!(r.apply(500), 500);
        assert_eq!(r.apply(15_000), 15_000);
        assert_eq!(r.apply(15_001), 15_500);
    }

    #[test]
    fn test_floor_rounding() {
        let r = rounding(RoundingStrategy::Floor, 500);
        assert_eq!(r.apply(499), 0);
        assert_eq!(r.apply(1_250), 1_000);
    }

    #[test]
    fn test_nearest_rounding() {
        let r = rounding(RoundingStrategy::Nearest, 500);
        assert_eq!(r.apply(249), 0);
        assert_eq!(r.apply(250), 500);
        assert_eq!(r.apply(1_700), 1_500);
    }

    #[test]
    fn test_none_and_unit_rounding_are_identity() {
        assert_eq!(rounding(RoundingStrategy::None, 500).apply(1_234), 1_234);
        assert_eq!(rounding(RoundingStrategy::Ceil, 1).apply(1_234), 1_234);
    }

    #[test]
    fn test_strategy_parse_and_display() {
        for s in ["ceil", "floor", "nearest", "none"] {
            let parsed: RoundingStrategy = s.parse().unwrap();
            assert_eq!(parsed.to_string(), s);
        }
        assert!("CEIL".parse::<RoundingStrategy>().is_ok());
        assert!("up".parse::<RoundingStrategy>().is_err());
    }

    #[test]
    fn test_default_policy_is_valid() {
        let policy = RatePolicy::default();
        assert!(policy.validate().is_ok());
        assert_eq!(policy.snapshot().per_minute, 1000);
        assert_eq!(policy.snapshot().rounding.round_to, 500);
    }

    #[test]
    fn test_validate_rejects_negative_rate() {
        let policy = RatePolicy {
            per_minute: -1,
            ..RatePolicy::default()
        };
        assert!(policy.validate().is_err());
    }

    #[test]
    fn test_validate_caps_included_minutes() {
        let policy = RatePolicy {
            included_minutes: MAX_INCLUDED_MINUTES,
            ..RatePolicy::default()
        };
        assert!(policy.validate().is_ok());

        let policy = RatePolicy {
            included_minutes: MAX_INCLUDED_MINUTES + 1,
            ..RatePolicy::default()
        };
        assert!(policy.validate().is_err());

        let policy = RatePolicy {
            included_minutes: i64::MAX,
            ..RatePolicy::default()
        };
        assert!(policy.validate().is_err());
    }
}
