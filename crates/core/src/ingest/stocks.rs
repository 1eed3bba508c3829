use crate::domain::stock::{Exchange, Stock};
use crate::storage::{RecommendationStore, StockStore};
use anyhow::Context;
use serde::Serialize;

/// Best-effort link from a recommendation's free-text fields to the stock master.
///
/// The NSE symbol is tried first as an exact symbol; then the share name is matched against
/// symbols and company names of active stocks. `None` is a normal result.
pub async fn resolve_stock(
    stocks: &dyn StockStore,
    nse_symbol: Option<&str>,
    share_name: &str,
) -> anyhow::Result<Option<Stock>> {
    if let Some(symbol) = nse_symbol.map(str::trim).filter(|s| !s.is_empty()) {
        let symbol = symbol.to_ascii_uppercase();
        let found = stocks
            .find_stock_by_symbol(&symbol, Exchange::Nse)
            .await
            .with_context(|| format!("stock lookup failed (symbol={symbol})"))?;
        if let Some(stock) = found.filter(|s| s.is_active) {
            tracing::debug!(%symbol, stock_id = %stock.id, "resolved by symbol");
            return Ok(Some(stock));
        }
    }

    let found = stocks
        .find_stock_by_name(share_name)
        .await
        .with_context(|| format!("stock search failed (name={share_name})"))?;
    match &found {
        Some(stock) => tracing::debug!(share_name, stock_id = %stock.id, "resolved by name"),
        None => tracing::warn!(?nse_symbol, share_name, "could not resolve stock"),
    }
    Ok(found)
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BackfillSummary {
    pub checked: u32,
    pub linked: u32,
    pub unresolved: u32,
}

/// Retries stock resolution for recommendations stored without a link.
pub async fn backfill_stock_links(
    stocks: &dyn StockStore,
    recs: &dyn RecommendationStore,
) -> anyhow::Result<BackfillSummary> {
    let unlinked = recs
        .list_unlinked()
        .await
        .context("list unlinked recommendations failed")?;
    let mut summary = BackfillSummary::default();

    for rec in &unlinked {
        summary.checked += 1;
        match resolve_stock(stocks, rec.nse_symbol.as_deref(), &rec.share_name).await? {
            Some(stock) => {
                recs.set_stock_link(rec.id, stock.id)
                    .await
                    .with_context(|| format!("link stock failed (id={})", rec.id))?;
                summary.linked += 1;
            }
            None => summary.unresolved += 1,
        }
    }

    tracing::info!(?summary, "stock link backfill complete");
    Ok(summary)
}
