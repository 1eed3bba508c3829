use crate::domain::expert::{Expert, ExpertMetrics, MetricsHistoryPoint};
use crate::storage::{ExpertStore, PgStore};
use anyhow::Context;
use chrono::NaiveDate;
use uuid::Uuid;

#[derive(Debug, sqlx::FromRow)]
struct MetricsRow {
    expert_id: Uuid,
    expert_name: String,
    calculation_date: NaiveDate,
    total_recommendations: i32,
    active_recommendations: i32,
    closed_recommendations: i32,
    target_hit_count: i32,
    sl_hit_count: i32,
    expired_count: i32,
    overall_win_rate: Option<f64>,
    last_30d_win_rate: Option<f64>,
    last_90d_win_rate: Option<f64>,
    avg_return_pct: Option<f64>,
    avg_winning_return_pct: Option<f64>,
    avg_losing_return_pct: Option<f64>,
    total_return_pct: Option<f64>,
    avg_holding_days: Option<f64>,
    ranking_score: f64,
    rank_position: Option<i32>,
}

impl From<MetricsRow> for ExpertMetrics {
    fn from(r: MetricsRow) -> Self {
        ExpertMetrics {
            expert_id: r.expert_id,
            expert_name: r.expert_name,
            calculation_date: r.calculation_date,
            total_recommendations: r.total_recommendations,
            active_recommendations: r.active_recommendations,
            closed_recommendations: r.closed_recommendations,
            target_hit_count: r.target_hit_count,
            sl_hit_count: r.sl_hit_count,
            expired_count: r.expired_count,
            overall_win_rate: r.overall_win_rate,
            last_30d_win_rate: r.last_30d_win_rate,
            last_90d_win_rate: r.last_90d_win_rate,
            avg_return_pct: r.avg_return_pct,
            avg_winning_return_pct: r.avg_winning_return_pct,
            avg_losing_return_pct: r.avg_losing_return_pct,
            total_return_pct: r.total_return_pct,
            avg_holding_days: r.avg_holding_days,
            ranking_score: r.ranking_score,
            rank_position: r.rank_position,
        }
    }
}

const METRICS_SELECT: &str = "SELECT m.expert_id, e.canonical_name AS expert_name, m.calculation_date, \
       m.total_recommendations, m.active_recommendations, m.closed_recommendations, \
       m.target_hit_count, m.sl_hit_count, m.expired_count, \
       m.overall_win_rate, m.last_30d_win_rate, m.last_90d_win_rate, \
       m.avg_return_pct, m.avg_winning_return_pct, m.avg_losing_return_pct, \
       m.total_return_pct, m.avg_holding_days, m.ranking_score, m.rank_position \
     FROM expert_metrics m \
     JOIN experts e ON e.id = m.expert_id";

#[async_trait::async_trait]
impl ExpertStore for PgStore {
    async fn list_active_experts(&self) -> anyhow::Result<Vec<Expert>> {
        let rows: Vec<(Uuid, String, bool)> = sqlx::query_as(
            "SELECT id, canonical_name, is_active FROM experts \
             WHERE is_active = TRUE ORDER BY canonical_name",
        )
        .persistent(false)
        .fetch_all(self.pool())
        .await
        .context("select experts failed")?;

        Ok(rows
            .into_iter()
            .map(|(id, canonical_name, is_active)| Expert {
                id,
                canonical_name,
                is_active,
            })
            .collect())
    }

    async fn get_expert(&self, id: Uuid) -> anyhow::Result<Option<Expert>> {
        let row: Option<(Uuid, String, bool)> =
            sqlx::query_as("SELECT id, canonical_name, is_active FROM experts WHERE id = $1")
                .persistent(false)
                .bind(id)
                .fetch_optional(self.pool())
                .await
                .with_context(|| format!("select expert failed (id={id})"))?;

        Ok(row.map(|(id, canonical_name, is_active)| Expert {
            id,
            canonical_name,
            is_active,
        }))
    }

    async fn upsert_metrics(&self, m: &ExpertMetrics) -> anyhow::Result<()> {
        sqlx::query(
            "INSERT INTO expert_metrics ( \
               expert_id, calculation_date, \
               total_recommendations, active_recommendations, closed_recommendations, \
               target_hit_count, sl_hit_count, expired_count, \
               overall_win_rate, last_30d_win_rate, last_90d_win_rate, \
               avg_return_pct, avg_winning_return_pct, avg_losing_return_pct, \
               total_return_pct, avg_holding_days, ranking_score, rank_position) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18) \
             ON CONFLICT (expert_id, calculation_date) DO UPDATE SET \
               total_recommendations = EXCLUDED.total_recommendations, \
               active_recommendations = EXCLUDED.active_recommendations, \
               closed_recommendations = EXCLUDED.closed_recommendations, \
               target_hit_count = EXCLUDED.target_hit_count, \
               sl_hit_count = EXCLUDED.sl_hit_count, \
               expired_count = EXCLUDED.expired_count, \
               overall_win_rate = EXCLUDED.overall_win_rate, \
               last_30d_win_rate = EXCLUDED.last_30d_win_rate, \
               last_90d_win_rate = EXCLUDED.last_90d_win_rate, \
               avg_return_pct = EXCLUDED.avg_return_pct, \
               avg_winning_return_pct = EXCLUDED.avg_winning_return_pct, \
               avg_losing_return_pct = EXCLUDED.avg_losing_return_pct, \
               total_return_pct = EXCLUDED.total_return_pct, \
               avg_holding_days = EXCLUDED.avg_holding_days, \
               ranking_score = EXCLUDED.ranking_score, \
               rank_position = EXCLUDED.rank_position, \
               updated_at = NOW()",
        )
        .persistent(false)
        .bind(m.expert_id)
        .bind(m.calculation_date)
        .bind(m.total_recommendations)
        .bind(m.active_recommendations)
        .bind(m.closed_recommendations)
        .bind(m.target_hit_count)
        .bind(m.sl_hit_count)
        .bind(m.expired_count)
        .bind(m.overall_win_rate)
        .bind(m.last_30d_win_rate)
        .bind(m.last_90d_win_rate)
        .bind(m.avg_return_pct)
        .bind(m.avg_winning_return_pct)
        .bind(m.avg_losing_return_pct)
        .bind(m.total_return_pct)
        .bind(m.avg_holding_days)
        .bind(m.ranking_score)
        .bind(m.rank_position)
        .execute(self.pool())
        .await
        .context("upsert expert_metrics failed")?;
        Ok(())
    }

    async fn latest_metrics(&self, expert_name: &str) -> anyhow::Result<Option<ExpertMetrics>> {
        let row: Option<MetricsRow> = sqlx::query_as(&format!(
            "{METRICS_SELECT} WHERE e.canonical_name = $1 \
             ORDER BY m.calculation_date DESC LIMIT 1"
        ))
        .persistent(false)
        .bind(expert_name)
        .fetch_optional(self.pool())
        .await
        .with_context(|| format!("select expert_metrics failed (expert={expert_name})"))?;

        Ok(row.map(ExpertMetrics::from))
    }

    async fn leaderboard(&self, limit: i64) -> anyhow::Result<Vec<ExpertMetrics>> {
        let rows: Vec<MetricsRow> = sqlx::query_as(&format!(
            "{METRICS_SELECT} \
             WHERE m.calculation_date = (SELECT MAX(calculation_date) FROM expert_metrics) \
             ORDER BY m.rank_position ASC NULLS LAST \
             LIMIT $1"
        ))
        .persistent(false)
        .bind(limit)
        .fetch_all(self.pool())
        .await
        .context("select leaderboard failed")?;

        Ok(rows.into_iter().map(ExpertMetrics::from).collect())
    }

    async fn metrics_history(
        &self,
        expert_name: &str,
        since: NaiveDate,
    ) -> anyhow::Result<Vec<MetricsHistoryPoint>> {
        let rows: Vec<(NaiveDate, Option<f64>, Option<f64>, Option<i32>)> = sqlx::query_as(
            "SELECT m.calculation_date, m.overall_win_rate, m.avg_return_pct, m.rank_position \
             FROM expert_metrics m \
             JOIN experts e ON e.id = m.expert_id \
             WHERE e.canonical_name = $1 AND m.calculation_date >= $2 \
             ORDER BY m.calculation_date ASC",
        )
        .persistent(false)
        .bind(expert_name)
        .bind(since)
        .fetch_all(self.pool())
        .await
        .with_context(|| format!("select metrics history failed (expert={expert_name})"))?;

        Ok(rows
            .into_iter()
            .map(
                |(calculation_date, overall_win_rate, avg_return_pct, rank_position)| {
                    MetricsHistoryPoint {
                        calculation_date,
                        overall_win_rate,
                        avg_return_pct,
                        rank_position,
                    }
                },
            )
            .collect())
    }
}
