use crate::domain::stock::{Exchange, PriceBar};
use crate::ingest::provider::PriceProviderClient;
use crate::ingest::types::DailyPricesResponse;
use crate::storage::{PriceStore, StockStore};
use anyhow::Context;
use chrono::NaiveDate;
use serde::Serialize;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PriceRefreshSummary {
    pub received: u32,
    pub matched: u32,
    pub unknown_symbols: u32,
    pub upserted: u64,
}

/// Maps provider quotes onto known stocks. Unknown (symbol, exchange) pairs are counted and
/// dropped; a malformed exchange code is an error.
pub async fn bars_for_response(
    stocks: &dyn StockStore,
    resp: &DailyPricesResponse,
) -> anyhow::Result<(Vec<PriceBar>, PriceRefreshSummary)> {
    let mut summary = PriceRefreshSummary {
        received: resp.items.len() as u32,
        ..PriceRefreshSummary::default()
    };
    let mut bars = Vec::with_capacity(resp.items.len());

    for item in &resp.items {
        let exchange: Exchange = match item.exchange.as_deref() {
            Some(code) => code.parse()?,
            None => Exchange::default(),
        };
        let symbol = item.symbol.trim().to_ascii_uppercase();

        let stock = stocks
            .find_stock_by_symbol(&symbol, exchange)
            .await
            .with_context(|| format!("stock lookup failed (symbol={symbol})"))?;
        let Some(stock) = stock else {
            tracing::debug!(%symbol, %exchange, "quote for unknown stock; skipped");
            summary.unknown_symbols += 1;
            continue;
        };

        summary.matched += 1;
        bars.push(PriceBar {
            stock_id: stock.id,
            price_date: resp.as_of_date,
            open_price: item.open,
            high_price: item.high,
            low_price: item.low,
            close_price: item.close,
            volume: item.volume,
        });
    }

    Ok((bars, summary))
}

/// Pulls one day of quotes from the provider and stores them.
pub async fn refresh_prices(
    provider: &dyn PriceProviderClient,
    stocks: &dyn StockStore,
    prices: &dyn PriceStore,
    as_of_date: NaiveDate,
) -> anyhow::Result<(PriceRefreshSummary, serde_json::Value)> {
    let (resp, raw) = provider
        .fetch_daily_prices(as_of_date)
        .await
        .context("fetch daily prices failed")?;

    let (bars, mut summary) = bars_for_response(stocks, &resp).await?;
    summary.upserted = prices
        .upsert_price_bars(&bars)
        .await
        .context("upsert price bars failed")?;

    tracing::info!(
        %as_of_date,
        provider = provider.provider_name(),
        received = summary.received,
        matched = summary.matched,
        unknown = summary.unknown_symbols,
        upserted = summary.upserted,
        "prices refreshed"
    );
    Ok((summary, raw))
}

// Name recorded when the provider could not even be built from settings.
const UNCONFIGURED_PROVIDER: &str = "unconfigured";

/// The daily refresh step: refreshes prices and records the attempt either way.
///
/// A missing or failing provider is logged and recorded, then reported as `Ok(None)` so the
/// rest of the pipeline still runs on the prices already stored. Only a failure to write the
/// audit row is returned as an error.
pub async fn refresh_and_record(
    provider: Result<&dyn PriceProviderClient, &anyhow::Error>,
    stocks: &dyn StockStore,
    prices: &dyn PriceStore,
    as_of_date: NaiveDate,
) -> anyhow::Result<Option<PriceRefreshSummary>> {
    let (name, attempt) = match provider {
        Ok(p) => (
            p.provider_name(),
            refresh_prices(p, stocks, prices, as_of_date).await,
        ),
        Err(e) => (
            UNCONFIGURED_PROVIDER,
            Err(anyhow::anyhow!("price provider unavailable: {e:#}")),
        ),
    };

    match attempt {
        Ok((summary, raw)) => {
            prices
                .record_refresh_run(as_of_date, name, None, Some(raw))
                .await?;
            Ok(Some(summary))
        }
        Err(err) => {
            let msg = format!("{err:#}");
            tracing::error!(%as_of_date, provider = name, error = %msg, "price refresh failed; continuing with stored prices");
            prices
                .record_refresh_run(as_of_date, name, Some(&msg), None)
                .await?;
            Ok(None)
        }
    }
}
