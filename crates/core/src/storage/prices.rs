use crate::domain::stock::{LatestPrice, PriceBar};
use crate::storage::{PgStore, PriceSource, PriceStore};
use anyhow::Context;
use chrono::{DateTime, NaiveDate, Utc};
use serde_json::Value;
use uuid::Uuid;

type BarRow = (
    Uuid,
    NaiveDate,
    Option<f64>,
    f64,
    f64,
    f64,
    Option<i64>,
);

fn bar_from_row(row: BarRow) -> PriceBar {
    let (stock_id, price_date, open_price, high_price, low_price, close_price, volume) = row;
    PriceBar {
        stock_id,
        price_date,
        open_price,
        high_price,
        low_price,
        close_price,
        volume,
    }
}

#[async_trait::async_trait]
impl PriceSource for PgStore {
    async fn prices_since(&self, stock_id: Uuid, since: NaiveDate) -> anyhow::Result<Vec<PriceBar>> {
        let rows: Vec<BarRow> = sqlx::query_as(
            "SELECT stock_id, price_date, open_price, high_price, low_price, close_price, volume \
             FROM stock_prices \
             WHERE stock_id = $1 AND price_date >= $2 \
             ORDER BY price_date ASC",
        )
        .persistent(false)
        .bind(stock_id)
        .bind(since)
        .fetch_all(self.pool())
        .await
        .context("select stock_prices failed")?;

        Ok(rows.into_iter().map(bar_from_row).collect())
    }

    async fn latest_price(&self, stock_id: Uuid) -> anyhow::Result<Option<LatestPrice>> {
        let row: Option<(NaiveDate, f64)> = sqlx::query_as(
            "SELECT price_date, close_price FROM stock_prices \
             WHERE stock_id = $1 \
             ORDER BY price_date DESC \
             LIMIT 1",
        )
        .persistent(false)
        .bind(stock_id)
        .fetch_optional(self.pool())
        .await
        .context("select latest stock_prices failed")?;

        Ok(row.map(|(price_date, close_price)| LatestPrice {
            price_date,
            close_price,
        }))
    }
}

#[async_trait::async_trait]
impl PriceStore for PgStore {
    async fn upsert_price_bars(&self, bars: &[PriceBar]) -> anyhow::Result<u64> {
        if bars.is_empty() {
            return Ok(0);
        }

        let chunk_size: usize = std::env::var("STOCK_PRICES_UPSERT_BATCH")
            .ok()
            .and_then(|s| s.parse::<usize>().ok())
            .unwrap_or(200);
        anyhow::ensure!(chunk_size >= 1, "STOCK_PRICES_UPSERT_BATCH must be >= 1");

        let mut tx = self.pool().begin().await.context("begin transaction failed")?;
        let mut affected: u64 = 0;

        for (batch_idx, chunk) in bars.chunks(chunk_size).enumerate() {
            let t0 = std::time::Instant::now();
            let mut qb = sqlx::QueryBuilder::new(
                "INSERT INTO stock_prices \
                 (stock_id, price_date, open_price, high_price, low_price, close_price, volume) ",
            );
            qb.push_values(chunk, |mut b, bar| {
                b.push_bind(bar.stock_id)
                    .push_bind(bar.price_date)
                    .push_bind(bar.open_price)
                    .push_bind(bar.high_price)
                    .push_bind(bar.low_price)
                    .push_bind(bar.close_price)
                    .push_bind(bar.volume);
            });
            qb.push(
                " ON CONFLICT (stock_id, price_date) DO UPDATE \
                   SET open_price = EXCLUDED.open_price, high_price = EXCLUDED.high_price, \
                       low_price = EXCLUDED.low_price, close_price = EXCLUDED.close_price, \
                       volume = EXCLUDED.volume, updated_at = NOW()",
            );

            let res = qb
                .build()
                .persistent(false)
                .execute(&mut *tx)
                .await
                .context("batch upsert stock_prices failed")?;
            affected += res.rows_affected();

            tracing::debug!(
                batch_idx,
                batch_size = chunk.len(),
                elapsed_ms = t0.elapsed().as_millis(),
                "stock_prices batch upsert"
            );
        }

        tx.commit().await.context("commit transaction failed")?;
        Ok(affected)
    }

    async fn record_refresh_run(
        &self,
        as_of_date: NaiveDate,
        provider: &str,
        error: Option<&str>,
        raw_response: Option<Value>,
    ) -> anyhow::Result<Uuid> {
        let id = Uuid::new_v4();
        let generated_at: DateTime<Utc> = Utc::now();
        let status = if error.is_some() { "error" } else { "success" };

        sqlx::query(
            "INSERT INTO price_refresh_runs (id, as_of_date, generated_at, provider, status, error, raw_response) \
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .persistent(false)
        .bind(id)
        .bind(as_of_date)
        .bind(generated_at)
        .bind(provider)
        .bind(status)
        .bind(error)
        .bind(raw_response)
        .execute(self.pool())
        .await
        .context("insert price_refresh_runs failed")?;

        Ok(id)
    }
}
