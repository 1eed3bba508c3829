use crate::domain::stock::{Exchange, Stock};
use crate::storage::{PgStore, StockStore};
use anyhow::Context;
use uuid::Uuid;

type StockRow = (
    Uuid,
    String,
    String,
    String,
    Option<String>,
    Option<String>,
    Option<String>,
    Option<String>,
    bool,
);

const STOCK_COLUMNS: &str =
    "id, symbol, exchange, company_name, sector, industry, market_cap_category, isin, is_active";

fn stock_from_row(row: StockRow) -> anyhow::Result<Stock> {
    let (id, symbol, exchange, company_name, sector, industry, market_cap_category, isin, is_active) =
        row;
    Ok(Stock {
        id,
        symbol,
        exchange: exchange.parse()?,
        company_name,
        sector,
        industry,
        market_cap_category,
        isin,
        is_active,
    })
}

#[async_trait::async_trait]
impl StockStore for PgStore {
    async fn find_stock_by_symbol(
        &self,
        symbol: &str,
        exchange: Exchange,
    ) -> anyhow::Result<Option<Stock>> {
        let row: Option<StockRow> = sqlx::query_as(&format!(
            "SELECT {STOCK_COLUMNS} FROM stocks WHERE symbol = $1 AND exchange = $2"
        ))
        .persistent(false)
        .bind(symbol)
        .bind(exchange.as_str())
        .fetch_optional(self.pool())
        .await
        .with_context(|| format!("select stock failed (symbol={symbol})"))?;

        row.map(stock_from_row).transpose()
    }

    async fn find_stock_by_name(&self, name: &str) -> anyhow::Result<Option<Stock>> {
        let needle = name.trim();
        if needle.is_empty() {
            return Ok(None);
        }

        let row: Option<StockRow> = sqlx::query_as(&format!(
            "SELECT {STOCK_COLUMNS} FROM stocks \
             WHERE is_active = TRUE \
               AND (UPPER(symbol) = UPPER($1) OR company_name ILIKE '%' || $1 || '%') \
             ORDER BY CASE WHEN UPPER(symbol) = UPPER($1) THEN 0 ELSE 1 END, symbol \
             LIMIT 1"
        ))
        .persistent(false)
        .bind(needle)
        .fetch_optional(self.pool())
        .await
        .with_context(|| format!("search stock failed (name={needle})"))?;

        row.map(stock_from_row).transpose()
    }
}
