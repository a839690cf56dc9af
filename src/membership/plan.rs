//! Membership plans and their pricing table

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use solana_sdk::native_token::LAMPORTS_PER_SOL;
use thiserror::Error;

const DAY_MS: i64 = 24 * 60 * 60 * 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Plan {
    Weekly,
    Monthly,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown membership plan: {0}")]
pub struct UnknownPlan(pub String);

impl Plan {
    pub const ALL: [Plan; 2] = [Plan::Weekly, Plan::Monthly];

    pub fn id(&self) -> &'static str {
        match self {
            Plan::Weekly => "weekly",
            Plan::Monthly => "monthly",
        }
    }

    pub fn duration_days(&self) -> i64 {
        match self {
            Plan::Weekly => 7,
            Plan::Monthly => 30,
        }
    }

    pub fn duration_ms(&self) -> i64 {
        self.duration_days() * DAY_MS
    }

    pub fn duration(&self) -> Duration {
        Duration::from_millis(self.duration_ms() as u64)
    }

    /// Price when paid on-chain
    pub fn sol_price_lamports(&self) -> u64 {
        match self {
            Plan::Weekly => LAMPORTS_PER_SOL,
            Plan::Monthly => 3 * LAMPORTS_PER_SOL,
        }
    }

    /// Price when paid by card, in USD cents
    pub fn card_price_cents(&self) -> u64 {
        match self {
            Plan::Weekly => 29_900,
            Plan::Monthly => 84_900,
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Plan::Weekly => "Weekly Membership",
            Plan::Monthly => "Monthly Membership",
        }
    }
}

impl FromStr for Plan {
    type Err = UnknownPlan;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "weekly" => Ok(Plan::Weekly),
            "monthly" => Ok(Plan::Monthly),
            _ => Err(UnknownPlan(s.to_string())),
        }
    }
}

impl fmt::Display for Plan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pricing_table() {
        assert_eq!(Plan::Weekly.duration_days(), 7);
        assert_eq!(Plan::Monthly.duration_days(), 30);
        assert_eq!(Plan::Weekly.sol_price_lamports(), 1_000_000_000);
        assert_eq!(Plan::Monthly.sol_price_lamports(), 3_000_000_000);
        assert_eq!(Plan::Weekly.card_price_cents(), 29_900);
        assert_eq!(Plan::Monthly.card_price_cents(), 84_900);
    }

    #[test]
    fn test_parse_rejects_unknown_ids() {
        assert_eq!("weekly".parse::<Plan>(), Ok(Plan::Weekly));
        assert_eq!("Monthly".parse::<Plan>(), Ok(Plan::Monthly));
        assert!("yearly".parse::<Plan>().is_err());
        assert!("".parse::<Plan>().is_err());
    }

    #[test]
    fn test_serde_uses_lowercase_ids() {
        assert_eq!(serde_json::to_string(&Plan::Monthly).unwrap(), "\"monthly\"");
        let plan: Plan = serde_json::from_str("\"weekly\"").unwrap();
        assert_eq!(plan, Plan::Weekly);
    }
}
