use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Subscription tiers with a fixed monthly conversion allowance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "UPPERCASE")]
pub enum PlanTier {
    Free,
    Pro,
    Unlimited,
}

/// Outcome of parsing a stored plan value. Unrecognized values are
/// surfaced to the caller instead of being silently mapped to a tier,
/// so each call site decides (and logs) its own fallback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParsedPlan {
    Known(PlanTier),
    Unknown(String),
}

impl PlanTier {
    pub fn parse(value: &str) -> ParsedPlan {
        match value.trim().to_ascii_lowercase().as_str() {
            "free" => ParsedPlan::Known(PlanTier::Free),
            "pro" | "premium" => ParsedPlan::Known(PlanTier::Pro),
            "unlimited" => ParsedPlan::Known(PlanTier::Unlimited),
            _ => ParsedPlan::Unknown(value.to_string()),
        }
    }

    pub fn monthly_limit(self) -> i64 {
        match self {
            PlanTier::Free => 10,
            PlanTier::Pro => 100,
            PlanTier::Unlimited => 1_000_000,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PlanTier::Free => "FREE",
            PlanTier::Pro => "PRO",
            PlanTier::Unlimited => "UNLIMITED",
        }
    }
}

impl std::fmt::Display for PlanTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

pub const DEFAULT_PLAN: PlanTier = PlanTier::Free;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_canonical_names_case_insensitively() {
        assert_eq!(PlanTier::parse("FREE"), ParsedPlan::Known(PlanTier::Free));
        assert_eq!(PlanTier::parse("free"), ParsedPlan::Known(PlanTier::Free));
        assert_eq!(PlanTier::parse("Pro"), ParsedPlan::Known(PlanTier::Pro));
        assert_eq!(
            PlanTier::parse(" unlimited "),
            ParsedPlan::Known(PlanTier::Unlimited)
        );
    }

    #[test]
    fn premium_is_an_alias_for_pro() {
        assert_eq!(PlanTier::parse("premium"), ParsedPlan::Known(PlanTier::Pro));
        assert_eq!(PlanTier::parse("PREMIUM"), ParsedPlan::Known(PlanTier::Pro));
    }

    #[test]
    fn unknown_values_keep_the_original_text() {
        assert_eq!(
            PlanTier::parse("enterprise"),
            ParsedPlan::Unknown("enterprise".to_string())
        );
        assert_eq!(PlanTier::parse(""), ParsedPlan::Unknown(String::new()));
    }

    #[test]
    fn monthly_limits_match_the_catalog() {
        assert_eq!(PlanTier::Free.monthly_limit(), 10);
        assert_eq!(PlanTier::Pro.monthly_limit(), 100);
        assert_eq!(PlanTier::Unlimited.monthly_limit(), 1_000_000);
    }

    #[test]
    fn serializes_as_uppercase_strings() {
        assert_eq!(serde_json::to_string(&PlanTier::Free).unwrap(), "\"FREE\"");
        assert_eq!(
            serde_json::from_str::<PlanTier>("\"UNLIMITED\"").unwrap(),
            PlanTier::Unlimited
        );
    }
}
