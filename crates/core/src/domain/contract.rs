use crate::domain::recommendation::Action;
use anyhow::{bail, ensure, Context};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Candidate batch as emitted by the extraction pipeline for one video.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractedBatch {
    pub recommendation_date: NaiveDate,
    #[serde(default)]
    pub source: Option<String>,
    pub items: Vec<ExtractedRecommendation>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractedRecommendation {
    pub expert_name: String,
    pub share_name: String,
    #[serde(default)]
    pub nse_symbol: Option<String>,
    pub action: String,
    #[serde(default)]
    pub recommendation_date: Option<NaiveDate>,
    #[serde(default)]
    pub recommended_price: Option<f64>,
    #[serde(default)]
    pub target_price: Option<f64>,
    #[serde(default)]
    pub stop_loss: Option<f64>,
}

/// A validated candidate, ready to be resolved against the stock master and stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewRecommendation {
    pub expert_name: String,
    pub share_name: String,
    pub nse_symbol: Option<String>,
    pub action: Action,
    pub recommendation_date: NaiveDate,
    pub recommended_price: Option<f64>,
    pub target_price: Option<f64>,
    pub stop_loss: Option<f64>,
}

impl ExtractedBatch {
    pub fn validate_and_into_new(self) -> anyhow::Result<Vec<NewRecommendation>> {
        ensure!(!self.items.is_empty(), "extracted batch has no items");

        let default_date = self.recommendation_date;
        self.items
            .into_iter()
            .enumerate()
            .map(|(idx, item)| {
                item.validate_and_into_new(default_date)
                    .with_context(|| format!("invalid extracted item #{idx}"))
            })
            .collect()
    }
}

impl ExtractedRecommendation {
    fn validate_and_into_new(self, default_date: NaiveDate) -> anyhow::Result<NewRecommendation> {
        let expert_name = self.expert_name.trim().to_string();
        ensure!(!expert_name.is_empty(), "expert_name must be non-empty");

        let share_name = self.share_name.trim().to_string();
        ensure!(!share_name.is_empty(), "share_name must be non-empty");

        let nse_symbol = self
            .nse_symbol
            .map(|s| s.trim().to_ascii_uppercase())
            .filter(|s| !s.is_empty());

        let action: Action = self.action.parse()?;

        Ok(NewRecommendation {
            expert_name,
            share_name,
            nse_symbol,
            action,
            recommendation_date: self.recommendation_date.unwrap_or(default_date),
            recommended_price: normalize_price("recommended_price", self.recommended_price)?,
            target_price: normalize_price("target_price", self.target_price)?,
            stop_loss: normalize_price("stop_loss", self.stop_loss)?,
        })
    }
}

// Extractors emit 0 for "not mentioned"; keep that as absent so the validator flags it.
fn normalize_price(field: &str, v: Option<f64>) -> anyhow::Result<Option<f64>> {
    match v {
        None => Ok(None),
        Some(p) if p == 0.0 => Ok(None),
        Some(p) if !p.is_finite() || p < 0.0 => bail!("{field} must be a positive number (got {p})"),
        Some(p) => Ok(Some(p)),
    }
}
