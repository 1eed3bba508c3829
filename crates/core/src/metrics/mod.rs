//! Per-expert performance snapshots and the composite ranking.

use crate::domain::expert::{Expert, ExpertMetrics};
use crate::domain::recommendation::{OutcomeType, RecommendationWithOutcome};
use crate::storage::{ExpertStore, RecommendationStore};
use anyhow::Context;
use chrono::{Duration, NaiveDate};

pub const WIN_RATE_WEIGHT: f64 = 0.50;
pub const RETURN_WEIGHT: f64 = 0.30;
pub const VOLUME_WEIGHT: f64 = 0.20;

const RETURN_FLOOR_PCT: f64 = -20.0;
const RETURN_CEIL_PCT: f64 = 50.0;
// Ten calls earn full volume credit.
const VOLUME_POINTS_PER_RECOMMENDATION: f64 = 10.0;

/// `0.50 * win rate + 0.30 * return score + 0.20 * volume score`, rounded to 2 decimals.
///
/// The return score maps the average return, clamped to [-20%, +50%], onto 0..100 and is 0
/// when no return is known. The volume score is `min(100, total * 10)`. The weights are a
/// fixed policy choice.
pub fn ranking_score(win_rate: Option<f64>, avg_return_pct: Option<f64>, total: i32) -> f64 {
    let win_rate_score = win_rate.unwrap_or(0.0);
    let return_score = avg_return_pct
        .map(|r| {
            let clamped = r.clamp(RETURN_FLOOR_PCT, RETURN_CEIL_PCT);
            (clamped - RETURN_FLOOR_PCT) / (RETURN_CEIL_PCT - RETURN_FLOOR_PCT) * 100.0
        })
        .unwrap_or(0.0);
    let volume_score = (f64::from(total) * VOLUME_POINTS_PER_RECOMMENDATION).min(100.0);

    let score = WIN_RATE_WEIGHT * win_rate_score
        + RETURN_WEIGHT * return_score
        + VOLUME_WEIGHT * volume_score;
    (score * 100.0).round() / 100.0
}

fn mean(values: &[f64]) -> Option<f64> {
    (!values.is_empty()).then(|| values.iter().sum::<f64>() / values.len() as f64)
}

fn win_rate(closed: usize, hits: usize) -> Option<f64> {
    (closed > 0).then(|| hits as f64 / closed as f64 * 100.0)
}

/// Computes one expert's snapshot from its recommendations joined with their outcomes.
///
/// Returns `None` when the expert has no recommendations dated on or before `as_of`.
/// `rank_position` is left unset; ranks only make sense across the whole cohort.
pub fn calculate_expert_metrics(
    expert: &Expert,
    history: &[RecommendationWithOutcome],
    as_of: NaiveDate,
) -> Option<ExpertMetrics> {
    // Only what was known on `as_of`: later calls are left out and later outcomes count as open.
    let known: Vec<_> = history
        .iter()
        .filter(|r| r.recommendation.recommendation_date <= as_of)
        .collect();
    if known.is_empty() {
        return None;
    }

    let outcomes: Vec<_> = known
        .iter()
        .filter_map(|r| r.outcome.as_ref())
        .filter(|o| o.outcome_date <= as_of)
        .collect();
    let total = known.len();
    let closed = outcomes.len();
    let count = |t: OutcomeType| outcomes.iter().filter(|o| o.outcome_type == t).count();
    let target_hits = count(OutcomeType::TargetHit);

    let trailing = |days: i64| {
        let since = as_of - Duration::days(days);
        let window: Vec<_> = outcomes.iter().filter(|o| o.outcome_date >= since).collect();
        let hits = window
            .iter()
            .filter(|o| o.outcome_type == OutcomeType::TargetHit)
            .count();
        win_rate(window.len(), hits)
    };

    let returns: Vec<f64> = outcomes
        .iter()
        .map(|o| o.return_percentage)
        .filter(|r| r.is_finite())
        .collect();
    let winning: Vec<f64> = returns.iter().copied().filter(|r| *r > 0.0).collect();
    let losing: Vec<f64> = returns.iter().copied().filter(|r| *r < 0.0).collect();
    let holding: Vec<f64> = outcomes
        .iter()
        .filter(|o| o.return_percentage.is_finite())
        .map(|o| f64::from(o.days_held))
        .collect();

    let overall_win_rate = win_rate(closed, target_hits);
    let avg_return_pct = mean(&returns);
    let total = i32::try_from(total).unwrap_or(i32::MAX);

    Some(ExpertMetrics {
        expert_id: expert.id,
        expert_name: expert.canonical_name.clone(),
        calculation_date: as_of,
        total_recommendations: total,
        active_recommendations: total - closed as i32,
        closed_recommendations: closed as i32,
        target_hit_count: target_hits as i32,
        sl_hit_count: count(OutcomeType::SlHit) as i32,
        expired_count: count(OutcomeType::Expired) as i32,
        overall_win_rate,
        last_30d_win_rate: trailing(30),
        last_90d_win_rate: trailing(90),
        avg_return_pct,
        avg_winning_return_pct: mean(&winning),
        avg_losing_return_pct: mean(&losing),
        total_return_pct: (!returns.is_empty()).then(|| returns.iter().sum()),
        avg_holding_days: mean(&holding),
        ranking_score: ranking_score(overall_win_rate, avg_return_pct, total),
        rank_position: None,
    })
}

/// Sorts by score, highest first, and assigns 1-based ranks. Ties keep their input order.
pub fn assign_ranks(snapshots: &mut [ExpertMetrics]) {
    snapshots.sort_by(|a, b| b.ranking_score.total_cmp(&a.ranking_score));
    for (idx, m) in snapshots.iter_mut().enumerate() {
        m.rank_position = Some(idx as i32 + 1);
    }
}

/// Recomputes and stores the snapshot of every active expert for `as_of`.
///
/// A failure on one expert is logged and that expert is left out of the ranking. Re-running
/// on the same date overwrites that date's snapshots.
pub async fn calculate_all_expert_metrics(
    experts: &dyn ExpertStore,
    recs: &dyn RecommendationStore,
    as_of: NaiveDate,
) -> anyhow::Result<Vec<ExpertMetrics>> {
    let active = experts
        .list_active_experts()
        .await
        .context("list active experts failed")?;
    tracing::info!(%as_of, experts = active.len(), "calculating expert metrics");

    let mut snapshots = Vec::with_capacity(active.len());
    for expert in &active {
        let history = match recs.list_with_outcomes_for_expert(&expert.canonical_name).await {
            Ok(h) => h,
            Err(err) => {
                tracing::error!(
                    expert = %expert.canonical_name,
                    error = %format!("{err:#}"),
                    "metrics calculation failed"
                );
                continue;
            }
        };

        match calculate_expert_metrics(expert, &history, as_of) {
            Some(m) => snapshots.push(m),
            None => tracing::debug!(expert = %expert.canonical_name, "no recommendations; skipped"),
        }
    }

    assign_ranks(&mut snapshots);

    for m in &snapshots {
        experts
            .upsert_metrics(m)
            .await
            .with_context(|| format!("upsert metrics failed (expert={})", m.expert_name))?;
    }

    tracing::info!(%as_of, saved = snapshots.len(), "expert metrics saved");
    Ok(snapshots)
}
