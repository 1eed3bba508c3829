use crate::domain::recommendation::OutcomeType;
use crate::outcome::detector::check_outcome;
use crate::storage::{PriceSource, RecommendationStore};
use anyhow::Context;
use serde::Serialize;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct OutcomeRunSummary {
    pub processed: u32,
    pub closed_target_hit: u32,
    pub closed_sl_hit: u32,
    pub closed_expired: u32,
    pub still_active: u32,
    pub errors: u32,
}

/// Evaluates every open recommendation and closes the ones whose outcome is now known.
///
/// Rows are processed one at a time; a failure on one row is logged and counted and never
/// stops the rest. Only the initial listing can fail the run as a whole.
pub async fn process_all_active_recommendations(
    recs: &dyn RecommendationStore,
    prices: &dyn PriceSource,
) -> anyhow::Result<OutcomeRunSummary> {
    let active = recs
        .list_evaluable_active()
        .await
        .context("list active recommendations failed")?;
    tracing::info!(count = active.len(), "active recommendations to process");

    let mut summary = OutcomeRunSummary::default();

    for rec in &active {
        let res = async {
            let outcome = check_outcome(prices, rec).await?;
            if let Some(outcome) = &outcome {
                recs.save_outcome(rec.id, outcome)
                    .await
                    .with_context(|| format!("save outcome failed (recommendation_id={})", rec.id))?;
            }
            anyhow::Ok(outcome)
        }
        .await;

        match res {
            Ok(Some(outcome)) => {
                match outcome.outcome_type {
                    OutcomeType::TargetHit => summary.closed_target_hit += 1,
                    OutcomeType::SlHit => summary.closed_sl_hit += 1,
                    OutcomeType::Expired => summary.closed_expired += 1,
                }
                tracing::info!(
                    recommendation_id = %rec.id,
                    outcome_type = %outcome.outcome_type,
                    return_pct = outcome.return_percentage,
                    "recommendation closed"
                );
                summary.processed += 1;
            }
            Ok(None) => {
                summary.still_active += 1;
                summary.processed += 1;
            }
            Err(err) => {
                tracing::error!(recommendation_id = %rec.id, error = %format!("{err:#}"), "outcome processing failed");
                summary.errors += 1;
            }
        }
    }

    tracing::info!(?summary, "outcome processing complete");
    Ok(summary)
}
