use crate::domain::contract::NewRecommendation;
use crate::domain::recommendation::{
    FlagReason, Outcome, Recommendation, RecommendationEdit, RecommendationWithOutcome,
};
use crate::storage::{PgStore, RecommendationStore};
use anyhow::Context;
use chrono::{DateTime, NaiveDate, Utc};
use uuid::Uuid;

const REC_COLUMNS: &str = "r.id, r.expert_name, r.stock_id, r.share_name, r.nse_symbol, r.action, \
     r.recommendation_date, r.recommended_price, r.target_price, r.stop_loss, r.status, \
     r.is_flagged, r.flag_reasons, r.reviewed_at, r.reviewer_notes";

const OUTCOME_COLUMNS: &str =
    "o.outcome_type, o.outcome_date, o.outcome_price, o.return_percentage, o.days_held";

#[derive(Debug, sqlx::FromRow)]
struct RecommendationRow {
    id: Uuid,
    expert_name: String,
    stock_id: Option<Uuid>,
    share_name: String,
    nse_symbol: Option<String>,
    action: String,
    recommendation_date: NaiveDate,
    recommended_price: Option<f64>,
    target_price: Option<f64>,
    stop_loss: Option<f64>,
    status: String,
    is_flagged: bool,
    flag_reasons: Option<Vec<String>>,
    reviewed_at: Option<DateTime<Utc>>,
    reviewer_notes: Option<String>,
}

impl TryFrom<RecommendationRow> for Recommendation {
    type Error = anyhow::Error;

    fn try_from(row: RecommendationRow) -> anyhow::Result<Self> {
        let flag_reasons = row
            .flag_reasons
            .unwrap_or_default()
            .iter()
            .map(|s| s.parse())
            .collect::<anyhow::Result<Vec<FlagReason>>>()
            .with_context(|| format!("bad flag_reasons on recommendation {}", row.id))?;

        Ok(Recommendation {
            id: row.id,
            expert_name: row.expert_name,
            stock_id: row.stock_id,
            share_name: row.share_name,
            nse_symbol: row.nse_symbol,
            action: row.action.parse()?,
            recommendation_date: row.recommendation_date,
            recommended_price: row.recommended_price,
            target_price: row.target_price,
            stop_loss: row.stop_loss,
            status: row.status.parse()?,
            is_flagged: row.is_flagged,
            flag_reasons,
            reviewed_at: row.reviewed_at,
            reviewer_notes: row.reviewer_notes,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct JoinedRow {
    #[sqlx(flatten)]
    rec: RecommendationRow,
    outcome_type: Option<String>,
    outcome_date: Option<NaiveDate>,
    outcome_price: Option<f64>,
    return_percentage: Option<f64>,
    days_held: Option<i32>,
}

impl TryFrom<JoinedRow> for RecommendationWithOutcome {
    type Error = anyhow::Error;

    fn try_from(row: JoinedRow) -> anyhow::Result<Self> {
        let outcome = match (row.outcome_type, row.outcome_date, row.outcome_price) {
            (Some(t), Some(outcome_date), Some(outcome_price)) => Some(Outcome {
                outcome_type: t.parse()?,
                outcome_date,
                outcome_price,
                return_percentage: row.return_percentage.unwrap_or(0.0),
                days_held: row.days_held.unwrap_or(0),
            }),
            _ => None,
        };
        Ok(RecommendationWithOutcome {
            recommendation: row.rec.try_into()?,
            outcome,
        })
    }
}

fn flag_codes(flags: &[FlagReason]) -> Option<Vec<String>> {
    (!flags.is_empty()).then(|| flags.iter().map(|f| f.as_str().to_string()).collect())
}

impl PgStore {
    async fn select_recommendations(
        &self,
        where_clause: &str,
        order_by: &str,
    ) -> anyhow::Result<Vec<Recommendation>> {
        let rows: Vec<RecommendationRow> = sqlx::query_as(&format!(
            "SELECT {REC_COLUMNS} FROM recommendations r WHERE {where_clause} ORDER BY {order_by}"
        ))
        .persistent(false)
        .fetch_all(self.pool())
        .await
        .context("select recommendations failed")?;

        rows.into_iter().map(Recommendation::try_from).collect()
    }
}

#[async_trait::async_trait]
impl RecommendationStore for PgStore {
    async fn list_evaluable_active(&self) -> anyhow::Result<Vec<Recommendation>> {
        self.select_recommendations(
            "r.status = 'ACTIVE' AND r.stock_id IS NOT NULL \
             AND (r.target_price IS NOT NULL OR r.stop_loss IS NOT NULL)",
            "r.recommendation_date DESC",
        )
        .await
    }

    async fn save_outcome(&self, recommendation_id: Uuid, outcome: &Outcome) -> anyhow::Result<()> {
        let mut tx = self.pool().begin().await.context("begin transaction failed")?;

        sqlx::query(
            "INSERT INTO recommendation_outcomes \
             (recommendation_id, outcome_type, outcome_date, outcome_price, return_percentage, days_held) \
             VALUES ($1, $2, $3, $4, $5, $6) \
             ON CONFLICT (recommendation_id) DO UPDATE \
               SET outcome_type = EXCLUDED.outcome_type, outcome_date = EXCLUDED.outcome_date, \
                   outcome_price = EXCLUDED.outcome_price, return_percentage = EXCLUDED.return_percentage, \
                   days_held = EXCLUDED.days_held, updated_at = NOW()",
        )
        .persistent(false)
        .bind(recommendation_id)
        .bind(outcome.outcome_type.as_str())
        .bind(outcome.outcome_date)
        .bind(outcome.outcome_price)
        .bind(outcome.return_percentage)
        .bind(outcome.days_held)
        .execute(&mut *tx)
        .await
        .context("upsert recommendation_outcomes failed")?;

        sqlx::query("UPDATE recommendations SET status = 'CLOSED' WHERE id = $1")
            .persistent(false)
            .bind(recommendation_id)
            .execute(&mut *tx)
            .await
            .context("close recommendation failed")?;

        tx.commit().await.context("commit transaction failed")?;
        Ok(())
    }

    async fn get_outcome(&self, recommendation_id: Uuid) -> anyhow::Result<Option<Outcome>> {
        let row: Option<(String, NaiveDate, f64, f64, i32)> = sqlx::query_as(
            "SELECT outcome_type, outcome_date, outcome_price, return_percentage, days_held \
             FROM recommendation_outcomes WHERE recommendation_id = $1",
        )
        .persistent(false)
        .bind(recommendation_id)
        .fetch_optional(self.pool())
        .await
        .context("select recommendation_outcomes failed")?;

        row.map(|(t, outcome_date, outcome_price, return_percentage, days_held)| {
            Ok(Outcome {
                outcome_type: t.parse()?,
                outcome_date,
                outcome_price,
                return_percentage,
                days_held,
            })
        })
        .transpose()
    }

    async fn list_with_outcomes_for_expert(
        &self,
        expert_name: &str,
    ) -> anyhow::Result<Vec<RecommendationWithOutcome>> {
        let rows: Vec<JoinedRow> = sqlx::query_as(&format!(
            "SELECT {REC_COLUMNS}, {OUTCOME_COLUMNS} \
             FROM recommendations r \
             LEFT JOIN recommendation_outcomes o ON o.recommendation_id = r.id \
             WHERE r.expert_name = $1 \
             ORDER BY r.recommendation_date ASC"
        ))
        .persistent(false)
        .bind(expert_name)
        .fetch_all(self.pool())
        .await
        .with_context(|| format!("select expert recommendations failed (expert={expert_name})"))?;

        rows.into_iter().map(RecommendationWithOutcome::try_from).collect()
    }

    async fn list_tradable_in_range(
        &self,
        expert_name: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> anyhow::Result<Vec<RecommendationWithOutcome>> {
        let rows: Vec<JoinedRow> = sqlx::query_as(&format!(
            "SELECT {REC_COLUMNS}, {OUTCOME_COLUMNS} \
             FROM recommendations r \
             LEFT JOIN recommendation_outcomes o ON o.recommendation_id = r.id \
             WHERE r.expert_name = $1 \
               AND r.action IN ('BUY', 'SELL') \
               AND r.recommendation_date BETWEEN $2 AND $3 \
             ORDER BY r.recommendation_date ASC, r.created_at ASC"
        ))
        .persistent(false)
        .bind(expert_name)
        .bind(start)
        .bind(end)
        .fetch_all(self.pool())
        .await
        .context("select simulation recommendations failed")?;

        rows.into_iter().map(RecommendationWithOutcome::try_from).collect()
    }

    async fn get_recommendation(&self, id: Uuid) -> anyhow::Result<Option<Recommendation>> {
        let row: Option<RecommendationRow> = sqlx::query_as(&format!(
            "SELECT {REC_COLUMNS} FROM recommendations r WHERE r.id = $1"
        ))
        .persistent(false)
        .bind(id)
        .fetch_optional(self.pool())
        .await
        .with_context(|| format!("select recommendation failed (id={id})"))?;

        row.map(Recommendation::try_from).transpose()
    }

    async fn list_all(&self) -> anyhow::Result<Vec<Recommendation>> {
        self.select_recommendations("TRUE", "r.recommendation_date DESC")
            .await
    }

    async fn list_flagged(&self) -> anyhow::Result<Vec<Recommendation>> {
        self.select_recommendations("r.is_flagged = TRUE", "r.created_at DESC")
            .await
    }

    async fn list_unlinked(&self) -> anyhow::Result<Vec<Recommendation>> {
        self.select_recommendations("r.stock_id IS NULL", "r.recommendation_date DESC")
            .await
    }

    async fn set_stock_link(&self, id: Uuid, stock_id: Uuid) -> anyhow::Result<()> {
        sqlx::query("UPDATE recommendations SET stock_id = $1 WHERE id = $2")
            .persistent(false)
            .bind(stock_id)
            .bind(id)
            .execute(self.pool())
            .await
            .with_context(|| format!("link stock failed (id={id})"))?;
        Ok(())
    }

    async fn update_flags(&self, id: Uuid, flags: &[FlagReason]) -> anyhow::Result<()> {
        sqlx::query("UPDATE recommendations SET is_flagged = $1, flag_reasons = $2 WHERE id = $3")
            .persistent(false)
            .bind(!flags.is_empty())
            .bind(flag_codes(flags))
            .bind(id)
            .execute(self.pool())
            .await
            .with_context(|| format!("update flags failed (id={id})"))?;
        Ok(())
    }

    async fn insert_recommendation(
        &self,
        new: &NewRecommendation,
        stock_id: Option<Uuid>,
        flags: &[FlagReason],
    ) -> anyhow::Result<Recommendation> {
        let row: RecommendationRow = sqlx::query_as(
            "INSERT INTO recommendations AS r \
             (expert_name, stock_id, share_name, nse_symbol, action, recommendation_date, \
              recommended_price, target_price, stop_loss, is_flagged, flag_reasons) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11) \
             RETURNING r.id, r.expert_name, r.stock_id, r.share_name, r.nse_symbol, r.action, \
               r.recommendation_date, r.recommended_price, r.target_price, r.stop_loss, r.status, \
               r.is_flagged, r.flag_reasons, r.reviewed_at, r.reviewer_notes",
        )
        .persistent(false)
        .bind(&new.expert_name)
        .bind(stock_id)
        .bind(&new.share_name)
        .bind(&new.nse_symbol)
        .bind(new.action.as_str())
        .bind(new.recommendation_date)
        .bind(new.recommended_price)
        .bind(new.target_price)
        .bind(new.stop_loss)
        .bind(!flags.is_empty())
        .bind(flag_codes(flags))
        .fetch_one(self.pool())
        .await
        .context("insert recommendations failed")?;

        row.try_into()
    }

    async fn approve(&self, id: Uuid, notes: Option<&str>) -> anyhow::Result<()> {
        let mut tx = self.pool().begin().await.context("begin transaction failed")?;

        sqlx::query(
            "UPDATE recommendations \
             SET is_flagged = FALSE, reviewed_at = NOW(), reviewer_notes = $1 \
             WHERE id = $2",
        )
        .persistent(false)
        .bind(notes)
        .bind(id)
        .execute(&mut *tx)
        .await
        .context("approve recommendation failed")?;

        sqlx::query(
            "INSERT INTO recommendation_flag_history (recommendation_id, action, notes) \
             VALUES ($1, 'APPROVED', $2)",
        )
        .persistent(false)
        .bind(id)
        .bind(notes)
        .execute(&mut *tx)
        .await
        .context("insert recommendation_flag_history failed")?;

        tx.commit().await.context("commit transaction failed")?;
        Ok(())
    }

    async fn apply_edit(
        &self,
        id: Uuid,
        edit: &RecommendationEdit,
        flags: &[FlagReason],
        reopen: bool,
        notes: Option<&str>,
    ) -> anyhow::Result<()> {
        let mut tx = self.pool().begin().await.context("begin transaction failed")?;

        let previous: (Option<f64>, Option<f64>, Option<f64>, String) = sqlx::query_as(
            "SELECT recommended_price, target_price, stop_loss, action \
             FROM recommendations WHERE id = $1 FOR UPDATE",
        )
        .persistent(false)
        .bind(id)
        .fetch_one(&mut *tx)
        .await
        .with_context(|| format!("select recommendation for edit failed (id={id})"))?;

        sqlx::query(
            "UPDATE recommendations \
             SET recommended_price = COALESCE($1, recommended_price), \
                 target_price = COALESCE($2, target_price), \
                 stop_loss = COALESCE($3, stop_loss), \
                 action = COALESCE($4, action), \
                 is_flagged = FALSE, flag_reasons = $5, \
                 reviewed_at = NOW(), reviewer_notes = $6, \
                 status = CASE WHEN $7 THEN 'ACTIVE' ELSE status END \
             WHERE id = $8",
        )
        .persistent(false)
        .bind(edit.recommended_price)
        .bind(edit.target_price)
        .bind(edit.stop_loss)
        .bind(edit.action.map(|a| a.as_str()))
        .bind(flag_codes(flags))
        .bind(notes)
        .bind(reopen)
        .bind(id)
        .execute(&mut *tx)
        .await
        .context("update recommendation failed")?;

        if reopen {
            sqlx::query("DELETE FROM recommendation_outcomes WHERE recommendation_id = $1")
                .persistent(false)
                .bind(id)
                .execute(&mut *tx)
                .await
                .context("delete recommendation_outcomes failed")?;
        }

        let (recommended_price, target_price, stop_loss, action) = previous;
        sqlx::query(
            "INSERT INTO recommendation_flag_history \
             (recommendation_id, action, previous_values, new_values, notes) \
             VALUES ($1, 'EDITED', $2, $3, $4)",
        )
        .persistent(false)
        .bind(id)
        .bind(serde_json::json!({
            "recommended_price": recommended_price,
            "target_price": target_price,
            "stop_loss": stop_loss,
            "action": action,
        }))
        .bind(serde_json::to_value(edit).context("serialize edit failed")?)
        .bind(notes)
        .execute(&mut *tx)
        .await
        .context("insert recommendation_flag_history failed")?;

        tx.commit().await.context("commit transaction failed")?;
        Ok(())
    }
}
