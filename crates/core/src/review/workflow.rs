use crate::domain::recommendation::{
    FlagReason, Recommendation, RecommendationEdit, RecommendationStatus,
};
use crate::review::validator::validate;
use crate::storage::RecommendationStore;
use anyhow::{ensure, Context};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct RecommendationNotFound(pub Uuid);

impl fmt::Display for RecommendationNotFound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "recommendation not found: {}", self.0)
    }
}

impl std::error::Error for RecommendationNotFound {}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FlagCheck {
    pub is_flagged: bool,
    pub reasons: Vec<FlagReason>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FlaggedDetail {
    pub id: Uuid,
    pub share: String,
    pub reasons: Vec<FlagReason>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ValidationSummary {
    pub total: u32,
    pub flagged: u32,
    pub flagged_details: Vec<FlaggedDetail>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FlagStats {
    pub flagged_count: u32,
    pub clean_count: u32,
    pub total_count: u32,
    /// Occurrences per reason across flagged rows, most frequent first.
    pub reason_breakdown: Vec<(FlagReason, u32)>,
}

async fn load(recs: &dyn RecommendationStore, id: Uuid) -> anyhow::Result<Recommendation> {
    recs.get_recommendation(id)
        .await
        .with_context(|| format!("load recommendation failed (id={id})"))?
        .ok_or_else(|| RecommendationNotFound(id).into())
}

/// Re-runs the validator on one stored recommendation and persists the result.
pub async fn validate_and_flag(
    recs: &dyn RecommendationStore,
    id: Uuid,
) -> anyhow::Result<FlagCheck> {
    let rec = load(recs, id).await?;
    let reasons = validate(&rec);
    recs.update_flags(id, &reasons)
        .await
        .with_context(|| format!("update flags failed (id={id})"))?;

    Ok(FlagCheck {
        is_flagged: !reasons.is_empty(),
        reasons,
    })
}

/// Re-validates every stored recommendation. Used to backfill flags after rule changes.
pub async fn validate_all(recs: &dyn RecommendationStore) -> anyhow::Result<ValidationSummary> {
    let all = recs.list_all().await.context("list recommendations failed")?;
    let mut summary = ValidationSummary {
        total: all.len() as u32,
        ..ValidationSummary::default()
    };

    for rec in &all {
        let reasons = validate(rec);
        recs.update_flags(rec.id, &reasons)
            .await
            .with_context(|| format!("update flags failed (id={})", rec.id))?;

        if !reasons.is_empty() {
            summary.flagged += 1;
            summary.flagged_details.push(FlaggedDetail {
                id: rec.id,
                share: rec.share_name.clone(),
                reasons,
            });
        }
    }

    tracing::info!(
        total = summary.total,
        flagged = summary.flagged,
        "validated recommendations"
    );
    Ok(summary)
}

/// Accepts a flagged recommendation as-is. The stored reasons are kept for audit.
pub async fn approve(
    recs: &dyn RecommendationStore,
    id: Uuid,
    notes: Option<&str>,
) -> anyhow::Result<()> {
    load(recs, id).await?;
    recs.approve(id, notes)
        .await
        .with_context(|| format!("approve failed (id={id})"))?;
    tracing::info!(recommendation_id = %id, "recommendation approved");
    Ok(())
}

/// Applies an admin correction and re-validates.
///
/// The flag is cleared either way; the recomputed reasons are stored so the review surface
/// can still show what the rules think. A CLOSED recommendation whose levels or action
/// change goes back to ACTIVE and loses its outcome, so the next outcome run re-evaluates
/// it against the corrected levels.
pub async fn edit(
    recs: &dyn RecommendationStore,
    id: Uuid,
    edit: &RecommendationEdit,
    notes: Option<&str>,
) -> anyhow::Result<FlagCheck> {
    for (field, v) in [
        ("recommended_price", edit.recommended_price),
        ("target_price", edit.target_price),
        ("stop_loss", edit.stop_loss),
    ] {
        if let Some(p) = v {
            ensure!(p.is_finite() && p > 0.0, "{field} must be a positive number");
        }
    }

    let current = load(recs, id).await?;
    let mut updated = current.clone();
    edit.apply_to(&mut updated);
    let reasons = validate(&updated);

    let levels_changed = updated.recommended_price != current.recommended_price
        || updated.target_price != current.target_price
        || updated.stop_loss != current.stop_loss
        || updated.action != current.action;
    let reopen = current.status == RecommendationStatus::Closed && levels_changed;

    recs.apply_edit(id, edit, &reasons, reopen, notes)
        .await
        .with_context(|| format!("apply edit failed (id={id})"))?;

    tracing::info!(
        recommendation_id = %id,
        reopened = reopen,
        reasons = reasons.len(),
        "recommendation edited"
    );
    Ok(FlagCheck {
        is_flagged: !reasons.is_empty(),
        reasons,
    })
}

pub fn flag_stats(all: &[Recommendation]) -> FlagStats {
    let mut counts: BTreeMap<&'static str, (FlagReason, u32)> = BTreeMap::new();
    let mut flagged = 0u32;

    for rec in all.iter().filter(|r| r.is_flagged) {
        flagged += 1;
        for reason in &rec.flag_reasons {
            counts.entry(reason.as_str()).or_insert((*reason, 0)).1 += 1;
        }
    }

    let mut reason_breakdown: Vec<(FlagReason, u32)> = counts.into_values().collect();
    reason_breakdown.sort_by(|a, b| b.1.cmp(&a.1));

    let total = all.len() as u32;
    FlagStats {
        flagged_count: flagged,
        clean_count: total - flagged,
        total_count: total,
        reason_breakdown,
    }
}
