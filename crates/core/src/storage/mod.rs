use crate::domain::contract::NewRecommendation;
use crate::domain::expert::{Expert, ExpertMetrics, MetricsHistoryPoint};
use crate::domain::recommendation::{
    FlagReason, Outcome, Recommendation, RecommendationEdit, RecommendationWithOutcome,
};
use crate::domain::stock::{Exchange, LatestPrice, PriceBar, Stock};
use crate::simulation::{SavedSimulation, SimulationResult};
use anyhow::Context;
use chrono::NaiveDate;
use uuid::Uuid;

pub mod experts;
pub mod lock;
#[cfg(test)]
pub mod memory;
pub mod prices;
pub mod recommendations;
pub mod simulations;
pub mod stocks;

pub async fn migrate(pool: &sqlx::PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .context("sqlx migrations failed")?;
    Ok(())
}

/// Postgres-backed implementation of every store trait.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: sqlx::PgPool,
}

impl PgStore {
    pub fn new(pool: sqlx::PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &sqlx::PgPool {
        &self.pool
    }
}

/// Read side of the daily price store.
#[async_trait::async_trait]
pub trait PriceSource: Send + Sync {
    /// Bars with `price_date >= since`, ascending by date.
    async fn prices_since(&self, stock_id: Uuid, since: NaiveDate) -> anyhow::Result<Vec<PriceBar>>;

    async fn latest_price(&self, stock_id: Uuid) -> anyhow::Result<Option<LatestPrice>>;
}

#[async_trait::async_trait]
pub trait PriceStore: Send + Sync {
    /// Insert-or-replace keyed by (stock, date). Returns affected rows.
    async fn upsert_price_bars(&self, bars: &[PriceBar]) -> anyhow::Result<u64>;

    /// Audit row for one refresh attempt. `error` set means the attempt failed.
    async fn record_refresh_run(
        &self,
        as_of_date: NaiveDate,
        provider: &str,
        error: Option<&str>,
        raw_response: Option<serde_json::Value>,
    ) -> anyhow::Result<Uuid>;
}

#[async_trait::async_trait]
pub trait StockStore: Send + Sync {
    async fn find_stock_by_symbol(
        &self,
        symbol: &str,
        exchange: Exchange,
    ) -> anyhow::Result<Option<Stock>>;

    /// Active stock whose symbol equals `name` (case-insensitive) or whose company name
    /// contains it; symbol matches win.
    async fn find_stock_by_name(&self, name: &str) -> anyhow::Result<Option<Stock>>;
}

#[async_trait::async_trait]
pub trait RecommendationStore: Send + Sync {
    /// ACTIVE, stock-linked recommendations with a target or a stop-loss, newest first.
    async fn list_evaluable_active(&self) -> anyhow::Result<Vec<Recommendation>>;

    /// Upserts the outcome and closes the recommendation atomically.
    async fn save_outcome(&self, recommendation_id: Uuid, outcome: &Outcome) -> anyhow::Result<()>;

    async fn get_outcome(&self, recommendation_id: Uuid) -> anyhow::Result<Option<Outcome>>;

    async fn list_with_outcomes_for_expert(
        &self,
        expert_name: &str,
    ) -> anyhow::Result<Vec<RecommendationWithOutcome>>;

    /// BUY/SELL recommendations dated within `[start, end]`, ascending by date.
    async fn list_tradable_in_range(
        &self,
        expert_name: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> anyhow::Result<Vec<RecommendationWithOutcome>>;

    async fn get_recommendation(&self, id: Uuid) -> anyhow::Result<Option<Recommendation>>;

    async fn list_all(&self) -> anyhow::Result<Vec<Recommendation>>;

    async fn list_flagged(&self) -> anyhow::Result<Vec<Recommendation>>;

    async fn list_unlinked(&self) -> anyhow::Result<Vec<Recommendation>>;

    async fn set_stock_link(&self, id: Uuid, stock_id: Uuid) -> anyhow::Result<()>;

    async fn update_flags(&self, id: Uuid, flags: &[FlagReason]) -> anyhow::Result<()>;

    async fn insert_recommendation(
        &self,
        new: &NewRecommendation,
        stock_id: Option<Uuid>,
        flags: &[FlagReason],
    ) -> anyhow::Result<Recommendation>;

    /// Clears the flag, stamps review info and appends an `APPROVED` history row.
    async fn approve(&self, id: Uuid, notes: Option<&str>) -> anyhow::Result<()>;

    /// Applies the edit with its recomputed flags, clears the flag, stamps review info and
    /// appends an `EDITED` history row carrying previous and new values. With `reopen` the
    /// stored outcome is dropped and the recommendation goes back to ACTIVE.
    async fn apply_edit(
        &self,
        id: Uuid,
        edit: &RecommendationEdit,
        flags: &[FlagReason],
        reopen: bool,
        notes: Option<&str>,
    ) -> anyhow::Result<()>;
}

#[async_trait::async_trait]
pub trait ExpertStore: Send + Sync {
    async fn list_active_experts(&self) -> anyhow::Result<Vec<Expert>>;

    async fn get_expert(&self, id: Uuid) -> anyhow::Result<Option<Expert>>;

    /// Insert-or-replace keyed by (expert, calculation date).
    async fn upsert_metrics(&self, metrics: &ExpertMetrics) -> anyhow::Result<()>;

    async fn latest_metrics(&self, expert_name: &str) -> anyhow::Result<Option<ExpertMetrics>>;

    /// Snapshots of the most recent calculation date, ordered by rank.
    async fn leaderboard(&self, limit: i64) -> anyhow::Result<Vec<ExpertMetrics>>;

    async fn metrics_history(
        &self,
        expert_name: &str,
        since: NaiveDate,
    ) -> anyhow::Result<Vec<MetricsHistoryPoint>>;
}

#[async_trait::async_trait]
pub trait SimulationStore: Send + Sync {
    async fn save_simulation(&self, user_id: Uuid, result: &SimulationResult) -> anyhow::Result<Uuid>;

    async fn get_simulation(&self, id: Uuid) -> anyhow::Result<Option<SavedSimulation>>;
}
