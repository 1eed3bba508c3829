use crate::simulation::{SavedSimulation, SimulationResult};
use crate::storage::{PgStore, SimulationStore};
use anyhow::Context;
use chrono::{DateTime, Utc};
use serde_json::Value;
use uuid::Uuid;

#[async_trait::async_trait]
impl SimulationStore for PgStore {
    async fn save_simulation(&self, user_id: Uuid, result: &SimulationResult) -> anyhow::Result<Uuid> {
        let id = Uuid::new_v4();
        let payload = serde_json::to_value(result).context("serialize simulation result failed")?;

        sqlx::query(
            "INSERT INTO portfolio_simulations \
             (id, user_id, expert_id, initial_capital, start_date, end_date, position_sizing_method, \
              final_value, total_return_pct, xirr_pct, total_trades, win_rate, result) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)",
        )
        .persistent(false)
        .bind(id)
        .bind(user_id)
        .bind(result.expert_id)
        .bind(result.initial_capital)
        .bind(result.start_date)
        .bind(result.end_date)
        .bind(result.position_sizing_method.as_str())
        .bind(result.final_value)
        .bind(result.total_return_pct)
        .bind(result.xirr_pct)
        .bind(result.total_trades as i32)
        .bind(result.win_rate)
        .bind(payload)
        .execute(self.pool())
        .await
        .context("insert portfolio_simulations failed")?;

        Ok(id)
    }

    async fn get_simulation(&self, id: Uuid) -> anyhow::Result<Option<SavedSimulation>> {
        let row: Option<(Uuid, Uuid, DateTime<Utc>, Value)> = sqlx::query_as(
            "SELECT id, user_id, created_at, result FROM portfolio_simulations WHERE id = $1",
        )
        .persistent(false)
        .bind(id)
        .fetch_optional(self.pool())
        .await
        .with_context(|| format!("select portfolio_simulations failed (id={id})"))?;

        row.map(|(id, user_id, created_at, result)| {
            Ok(SavedSimulation {
                id,
                user_id,
                created_at,
                result: serde_json::from_value(result)
                    .with_context(|| format!("stored simulation {id} does not parse"))?,
            })
        })
        .transpose()
    }
}
