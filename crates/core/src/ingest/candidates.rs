use crate::domain::contract::ExtractedBatch;
use crate::ingest::stocks::resolve_stock;
use crate::review::validator::validate_levels;
use crate::storage::{RecommendationStore, StockStore};
use anyhow::Context;
use serde::Serialize;
use uuid::Uuid;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ImportSummary {
    pub inserted: u32,
    pub flagged: u32,
    pub unlinked: u32,
    pub ids: Vec<Uuid>,
}

/// Stores one extraction batch: contract checks, stock resolution, validator flags.
///
/// The whole batch is rejected if any item fails the contract; nothing is written then.
pub async fn import_batch(
    batch: ExtractedBatch,
    stocks: &dyn StockStore,
    recs: &dyn RecommendationStore,
) -> anyhow::Result<ImportSummary> {
    let source = batch.source.clone();
    let items = batch
        .validate_and_into_new()
        .context("extracted batch failed validation")?;

    let mut summary = ImportSummary::default();
    for new in &items {
        let stock = resolve_stock(stocks, new.nse_symbol.as_deref(), &new.share_name).await?;
        let flags = validate_levels(
            new.action,
            new.recommended_price,
            new.target_price,
            new.stop_loss,
        );

        let stored = recs
            .insert_recommendation(new, stock.as_ref().map(|s| s.id), &flags)
            .await
            .with_context(|| format!("insert recommendation failed (share={})", new.share_name))?;

        summary.inserted += 1;
        if stored.is_flagged {
            summary.flagged += 1;
        }
        if stored.stock_id.is_none() {
            summary.unlinked += 1;
        }
        summary.ids.push(stored.id);
    }

    tracing::info!(
        source = source.as_deref().unwrap_or("-"),
        inserted = summary.inserted,
        flagged = summary.flagged,
        unlinked = summary.unlinked,
        "imported extracted recommendations"
    );
    Ok(summary)
}
