use anyhow::bail;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Action {
    Buy,
    Sell,
    Hold,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Buy => "BUY",
            Action::Sell => "SELL",
            Action::Hold => "HOLD",
        }
    }
}

impl FromStr for Action {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "BUY" => Ok(Action::Buy),
            "SELL" => Ok(Action::Sell),
            "HOLD" => Ok(Action::Hold),
            other => bail!("unknown action: {other}"),
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RecommendationStatus {
    Active,
    Closed,
}

impl RecommendationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecommendationStatus::Active => "ACTIVE",
            RecommendationStatus::Closed => "CLOSED",
        }
    }
}

impl FromStr for RecommendationStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s {
            "ACTIVE" => Ok(RecommendationStatus::Active),
            "CLOSED" => Ok(RecommendationStatus::Closed),
            other => bail!("unknown recommendation status: {other}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OutcomeType {
    TargetHit,
    SlHit,
    Expired,
}

impl OutcomeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutcomeType::TargetHit => "TARGET_HIT",
            OutcomeType::SlHit => "SL_HIT",
            OutcomeType::Expired => "EXPIRED",
        }
    }
}

impl FromStr for OutcomeType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s {
            "TARGET_HIT" => Ok(OutcomeType::TargetHit),
            "SL_HIT" => Ok(OutcomeType::SlHit),
            "EXPIRED" => Ok(OutcomeType::Expired),
            other => bail!("unknown outcome type: {other}"),
        }
    }
}

impl fmt::Display for OutcomeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Advisory markers attached to recommendations that look internally inconsistent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FlagReason {
    IllogicalSlBuy,
    IllogicalSlSell,
    MissingEntry,
    MissingTarget,
    MissingSl,
    HighRiskRatio,
    SlEqualsEntry,
    TargetWrongDirection,
}

impl FlagReason {
    pub const ALL: [FlagReason; 8] = [
        FlagReason::IllogicalSlBuy,
        FlagReason::IllogicalSlSell,
        FlagReason::MissingEntry,
        FlagReason::MissingTarget,
        FlagReason::MissingSl,
        FlagReason::HighRiskRatio,
        FlagReason::SlEqualsEntry,
        FlagReason::TargetWrongDirection,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            FlagReason::IllogicalSlBuy => "ILLOGICAL_SL_BUY",
            FlagReason::IllogicalSlSell => "ILLOGICAL_SL_SELL",
            FlagReason::MissingEntry => "MISSING_ENTRY",
            FlagReason::MissingTarget => "MISSING_TARGET",
            FlagReason::MissingSl => "MISSING_SL",
            FlagReason::HighRiskRatio => "HIGH_RISK_RATIO",
            FlagReason::SlEqualsEntry => "SL_EQUALS_ENTRY",
            FlagReason::TargetWrongDirection => "TARGET_WRONG_DIRECTION",
        }
    }

    /// Message shown verbatim on the admin review surface.
    pub fn message(&self) -> &'static str {
        match self {
            FlagReason::IllogicalSlBuy => "Stop loss is above entry price for a BUY recommendation",
            FlagReason::IllogicalSlSell => {
                "Stop loss is below entry price for a SELL recommendation"
            }
            FlagReason::MissingEntry => "Entry price is missing",
            FlagReason::MissingTarget => "Target price is missing",
            FlagReason::MissingSl => "Stop loss is missing",
            FlagReason::HighRiskRatio => "Risk is more than 2x the potential reward",
            FlagReason::SlEqualsEntry => "Stop loss equals entry price",
            FlagReason::TargetWrongDirection => {
                "Target price is in the wrong direction for this action"
            }
        }
    }
}

impl FromStr for FlagReason {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        FlagReason::ALL
            .into_iter()
            .find(|r| r.as_str() == s)
            .ok_or_else(|| anyhow::anyhow!("unknown flag reason: {s}"))
    }
}

impl fmt::Display for FlagReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Recommendation {
    pub id: Uuid,
    pub expert_name: String,
    pub stock_id: Option<Uuid>,
    pub share_name: String,
    pub nse_symbol: Option<String>,
    pub action: Action,
    pub recommendation_date: NaiveDate,
    pub recommended_price: Option<f64>,
    pub target_price: Option<f64>,
    pub stop_loss: Option<f64>,
    pub status: RecommendationStatus,
    pub is_flagged: bool,
    pub flag_reasons: Vec<FlagReason>,
    pub reviewed_at: Option<DateTime<Utc>>,
    pub reviewer_notes: Option<String>,
}

impl Recommendation {
    /// Symbol used to key simulated positions; falls back to the free-text name.
    pub fn position_symbol(&self) -> &str {
        self.nse_symbol
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .unwrap_or(&self.share_name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Outcome {
    pub outcome_type: OutcomeType,
    pub outcome_date: NaiveDate,
    pub outcome_price: f64,
    pub return_percentage: f64,
    pub days_held: i32,
}

/// A recommendation joined with its (optional) outcome row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecommendationWithOutcome {
    pub recommendation: Recommendation,
    pub outcome: Option<Outcome>,
}

/// Admin-supplied corrections; `None` leaves the stored value untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RecommendationEdit {
    pub recommended_price: Option<f64>,
    pub target_price: Option<f64>,
    pub stop_loss: Option<f64>,
    pub action: Option<Action>,
}

impl RecommendationEdit {
    pub fn apply_to(&self, rec: &mut Recommendation) {
        if let Some(v) = self.recommended_price {
            rec.recommended_price = Some(v);
        }
        if let Some(v) = self.target_price {
            rec.target_price = Some(v);
        }
        if let Some(v) = self.stop_loss {
            rec.stop_loss = Some(v);
        }
        if let Some(a) = self.action {
            rec.action = a;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flag_reason_codes_round_trip_through_from_str() {
        for reason in FlagReason::ALL {
            assert_eq!(reason.as_str().parse::<FlagReason>().unwrap(), reason);
        }
        assert!("NOT_A_FLAG".parse::<FlagReason>().is_err());
    }

    #[test]
    fn flag_reason_serializes_as_stable_code() {
        let v = serde_json::to_value(FlagReason::TargetWrongDirection).unwrap();
        assert_eq!(v, serde_json::json!("TARGET_WRONG_DIRECTION"));
        let v = serde_json::to_value(OutcomeType::SlHit).unwrap();
        assert_eq!(v, serde_json::json!("SL_HIT"));
    }

    #[test]
    fn action_parse_is_case_insensitive() {
        assert_eq!(" buy ".parse::<Action>().unwrap(), Action::Buy);
        assert_eq!("Sell".parse::<Action>().unwrap(), Action::Sell);
        assert!("SHORT".parse::<Action>().is_err());
    }
}
