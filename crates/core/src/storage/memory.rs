//! In-process implementation of every store trait, used by the unit tests. Clones share the
//! same state.

use crate::domain::contract::NewRecommendation;
use crate::domain::expert::{Expert, ExpertMetrics, MetricsHistoryPoint};
use crate::domain::recommendation::{
    Action, FlagReason, Outcome, Recommendation, RecommendationEdit, RecommendationStatus,
    RecommendationWithOutcome,
};
use crate::domain::stock::{Exchange, LatestPrice, PriceBar, Stock};
use crate::simulation::{SavedSimulation, SimulationResult};
use crate::storage::{
    ExpertStore, PriceSource, PriceStore, RecommendationStore, SimulationStore, StockStore,
};
use anyhow::Context;
use chrono::{NaiveDate, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq)]
pub struct ReviewEntry {
    pub recommendation_id: Uuid,
    pub action: &'static str,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RefreshRunEntry {
    pub as_of_date: NaiveDate,
    pub provider: String,
    pub error: Option<String>,
}

#[derive(Debug, Default)]
struct Inner {
    stocks: HashMap<Uuid, Stock>,
    bars: BTreeMap<(Uuid, NaiveDate), PriceBar>,
    recommendations: HashMap<Uuid, Recommendation>,
    outcomes: HashMap<Uuid, Outcome>,
    experts: HashMap<Uuid, Expert>,
    metrics: BTreeMap<(Uuid, NaiveDate), ExpertMetrics>,
    simulations: HashMap<Uuid, SavedSimulation>,
    reviews: Vec<ReviewEntry>,
    refresh_runs: Vec<RefreshRunEntry>,
}

#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryStore {
    fn state(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn put_stock(&self, stock: Stock) {
        self.state().stocks.insert(stock.id, stock);
    }

    pub fn put_bars(&self, bars: Vec<PriceBar>) {
        let mut state = self.state();
        for bar in bars {
            state.bars.insert((bar.stock_id, bar.price_date), bar);
        }
    }

    pub fn put_recommendation(&self, rec: Recommendation) {
        self.state().recommendations.insert(rec.id, rec);
    }

    pub fn put_expert(&self, expert: Expert) {
        self.state().experts.insert(expert.id, expert);
    }

    pub fn review_history(&self) -> Vec<ReviewEntry> {
        self.state().reviews.clone()
    }

    pub fn refresh_runs(&self) -> Vec<RefreshRunEntry> {
        self.state().refresh_runs.clone()
    }

    pub fn bar_count(&self) -> usize {
        self.state().bars.len()
    }
}

fn with_outcomes(state: &Inner, recs: Vec<Recommendation>) -> Vec<RecommendationWithOutcome> {
    recs.into_iter()
        .map(|recommendation| RecommendationWithOutcome {
            outcome: state.outcomes.get(&recommendation.id).cloned(),
            recommendation,
        })
        .collect()
}

#[async_trait::async_trait]
impl PriceSource for MemoryStore {
    async fn prices_since(&self, stock_id: Uuid, since: NaiveDate) -> anyhow::Result<Vec<PriceBar>> {
        let state = self.state();
        Ok(state
            .bars
            .range((stock_id, since)..=(stock_id, NaiveDate::MAX))
            .map(|(_, bar)| bar.clone())
            .collect())
    }

    async fn latest_price(&self, stock_id: Uuid) -> anyhow::Result<Option<LatestPrice>> {
        let state = self.state();
        Ok(state
            .bars
            .range((stock_id, NaiveDate::MIN)..=(stock_id, NaiveDate::MAX))
            .next_back()
            .map(|(_, bar)| LatestPrice::from(bar)))
    }
}

#[async_trait::async_trait]
impl PriceStore for MemoryStore {
    async fn upsert_price_bars(&self, bars: &[PriceBar]) -> anyhow::Result<u64> {
        self.put_bars(bars.to_vec());
        Ok(bars.len() as u64)
    }

    async fn record_refresh_run(
        &self,
        as_of_date: NaiveDate,
        provider: &str,
        error: Option<&str>,
        _raw_response: Option<serde_json::Value>,
    ) -> anyhow::Result<Uuid> {
        self.state().refresh_runs.push(RefreshRunEntry {
            as_of_date,
            provider: provider.to_string(),
            error: error.map(str::to_string),
        });
        Ok(Uuid::new_v4())
    }
}

#[async_trait::async_trait]
impl StockStore for MemoryStore {
    async fn find_stock_by_symbol(
        &self,
        symbol: &str,
        exchange: Exchange,
    ) -> anyhow::Result<Option<Stock>> {
        let state = self.state();
        Ok(state
            .stocks
            .values()
            .find(|s| s.symbol == symbol && s.exchange == exchange)
            .cloned())
    }

    async fn find_stock_by_name(&self, name: &str) -> anyhow::Result<Option<Stock>> {
        let needle = name.trim().to_lowercase();
        if needle.is_empty() {
            return Ok(None);
        }

        let state = self.state();
        let mut active: Vec<&Stock> = state.stocks.values().filter(|s| s.is_active).collect();
        active.sort_by(|a, b| a.symbol.cmp(&b.symbol));

        let by_symbol = active.iter().find(|s| s.symbol.to_lowercase() == needle);
        let by_name = || {
            active
                .iter()
                .find(|s| s.company_name.to_lowercase().contains(&needle))
        };
        Ok(by_symbol.or_else(by_name).map(|s| (*s).clone()))
    }
}

#[async_trait::async_trait]
impl RecommendationStore for MemoryStore {
    async fn list_evaluable_active(&self) -> anyhow::Result<Vec<Recommendation>> {
        let state = self.state();
        let mut out: Vec<Recommendation> = state
            .recommendations
            .values()
            .filter(|r| {
                r.status == RecommendationStatus::Active
                    && r.stock_id.is_some()
                    && (r.target_price.is_some() || r.stop_loss.is_some())
            })
            .cloned()
            .collect();
        out.sort_by(|a, b| b.recommendation_date.cmp(&a.recommendation_date));
        Ok(out)
    }

    async fn save_outcome(&self, recommendation_id: Uuid, outcome: &Outcome) -> anyhow::Result<()> {
        let mut state = self.state();
        let rec = state
            .recommendations
            .get_mut(&recommendation_id)
            .with_context(|| format!("recommendation not found: {recommendation_id}"))?;
        rec.status = RecommendationStatus::Closed;
        state.outcomes.insert(recommendation_id, outcome.clone());
        Ok(())
    }

    async fn get_outcome(&self, recommendation_id: Uuid) -> anyhow::Result<Option<Outcome>> {
        Ok(self.state().outcomes.get(&recommendation_id).cloned())
    }

    async fn list_with_outcomes_for_expert(
        &self,
        expert_name: &str,
    ) -> anyhow::Result<Vec<RecommendationWithOutcome>> {
        let state = self.state();
        let mut recs: Vec<Recommendation> = state
            .recommendations
            .values()
            .filter(|r| r.expert_name == expert_name)
            .cloned()
            .collect();
        recs.sort_by(|a, b| a.recommendation_date.cmp(&b.recommendation_date));
        Ok(with_outcomes(&state, recs))
    }

    async fn list_tradable_in_range(
        &self,
        expert_name: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> anyhow::Result<Vec<RecommendationWithOutcome>> {
        let state = self.state();
        let mut recs: Vec<Recommendation> = state
            .recommendations
            .values()
            .filter(|r| {
                r.expert_name == expert_name
                    && matches!(r.action, Action::Buy | Action::Sell)
                    && r.recommendation_date >= start
                    && r.recommendation_date <= end
            })
            .cloned()
            .collect();
        recs.sort_by(|a, b| a.recommendation_date.cmp(&b.recommendation_date));
        Ok(with_outcomes(&state, recs))
    }

    async fn get_recommendation(&self, id: Uuid) -> anyhow::Result<Option<Recommendation>> {
        Ok(self.state().recommendations.get(&id).cloned())
    }

    async fn list_all(&self) -> anyhow::Result<Vec<Recommendation>> {
        let mut out: Vec<Recommendation> = self.state().recommendations.values().cloned().collect();
        out.sort_by(|a, b| b.recommendation_date.cmp(&a.recommendation_date));
        Ok(out)
    }

    async fn list_flagged(&self) -> anyhow::Result<Vec<Recommendation>> {
        let mut out: Vec<Recommendation> = self
            .state()
            .recommendations
            .values()
            .filter(|r| r.is_flagged)
            .cloned()
            .collect();
        out.sort_by(|a, b| b.recommendation_date.cmp(&a.recommendation_date));
        Ok(out)
    }

    async fn list_unlinked(&self) -> anyhow::Result<Vec<Recommendation>> {
        Ok(self
            .state()
            .recommendations
            .values()
            .filter(|r| r.stock_id.is_none())
            .cloned()
            .collect())
    }

    async fn set_stock_link(&self, id: Uuid, stock_id: Uuid) -> anyhow::Result<()> {
        let mut state = self.state();
        let rec = state
            .recommendations
            .get_mut(&id)
            .with_context(|| format!("recommendation not found: {id}"))?;
        rec.stock_id = Some(stock_id);
        Ok(())
    }

    async fn update_flags(&self, id: Uuid, flags: &[FlagReason]) -> anyhow::Result<()> {
        let mut state = self.state();
        let rec = state
            .recommendations
            .get_mut(&id)
            .with_context(|| format!("recommendation not found: {id}"))?;
        rec.is_flagged = !flags.is_empty();
        rec.flag_reasons = flags.to_vec();
        Ok(())
    }

    async fn insert_recommendation(
        &self,
        new: &NewRecommendation,
        stock_id: Option<Uuid>,
        flags: &[FlagReason],
    ) -> anyhow::Result<Recommendation> {
        let rec = Recommendation {
            id: Uuid::new_v4(),
            expert_name: new.expert_name.clone(),
            stock_id,
            share_name: new.share_name.clone(),
            nse_symbol: new.nse_symbol.clone(),
            action: new.action,
            recommendation_date: new.recommendation_date,
            recommended_price: new.recommended_price,
            target_price: new.target_price,
            stop_loss: new.stop_loss,
            status: RecommendationStatus::Active,
            is_flagged: !flags.is_empty(),
            flag_reasons: flags.to_vec(),
            reviewed_at: None,
            reviewer_notes: None,
        };
        self.put_recommendation(rec.clone());
        Ok(rec)
    }

    async fn approve(&self, id: Uuid, notes: Option<&str>) -> anyhow::Result<()> {
        let mut state = self.state();
        let rec = state
            .recommendations
            .get_mut(&id)
            .with_context(|| format!("recommendation not found: {id}"))?;
        rec.is_flagged = false;
        rec.reviewed_at = Some(Utc::now());
        rec.reviewer_notes = notes.map(str::to_string);
        state.reviews.push(ReviewEntry {
            recommendation_id: id,
            action: "APPROVED",
            notes: notes.map(str::to_string),
        });
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
        let mut state = self.state();
        let rec = state
            .recommendations
            .get_mut(&id)
            .with_context(|| format!("recommendation not found: {id}"))?;
        edit.apply_to(rec);
        rec.flag_reasons = flags.to_vec();
        rec.is_flagged = false;
        rec.reviewed_at = Some(Utc::now());
        rec.reviewer_notes = notes.map(str::to_string);
        if reopen {
            rec.status = RecommendationStatus::Active;
            state.outcomes.remove(&id);
        }
        state.reviews.push(ReviewEntry {
            recommendation_id: id,
            action: "EDITED",
            notes: notes.map(str::to_string),
        });
        Ok(())
    }
}

#[async_trait::async_trait]
impl ExpertStore for MemoryStore {
    async fn list_active_experts(&self) -> anyhow::Result<Vec<Expert>> {
        let mut out: Vec<Expert> = self
            .state()
            .experts
            .values()
            .filter(|e| e.is_active)
            .cloned()
            .collect();
        out.sort_by(|a, b| a.canonical_name.cmp(&b.canonical_name));
        Ok(out)
    }

    async fn get_expert(&self, id: Uuid) -> anyhow::Result<Option<Expert>> {
        Ok(self.state().experts.get(&id).cloned())
    }

    async fn upsert_metrics(&self, metrics: &ExpertMetrics) -> anyhow::Result<()> {
        self.state()
            .metrics
            .insert((metrics.expert_id, metrics.calculation_date), metrics.clone());
        Ok(())
    }

    async fn latest_metrics(&self, expert_name: &str) -> anyhow::Result<Option<ExpertMetrics>> {
        let state = self.state();
        Ok(state
            .metrics
            .values()
            .filter(|m| m.expert_name == expert_name)
            .max_by_key(|m| m.calculation_date)
            .cloned())
    }

    async fn leaderboard(&self, limit: i64) -> anyhow::Result<Vec<ExpertMetrics>> {
        let state = self.state();
        let Some(latest) = state.metrics.values().map(|m| m.calculation_date).max() else {
            return Ok(Vec::new());
        };
        let mut out: Vec<ExpertMetrics> = state
            .metrics
            .values()
            .filter(|m| m.calculation_date == latest)
            .cloned()
            .collect();
        out.sort_by_key(|m| m.rank_position.unwrap_or(i32::MAX));
        out.truncate(usize::try_from(limit).unwrap_or(0));
        Ok(out)
    }

    async fn metrics_history(
        &self,
        expert_name: &str,
        since: NaiveDate,
    ) -> anyhow::Result<Vec<MetricsHistoryPoint>> {
        let state = self.state();
        let mut out: Vec<MetricsHistoryPoint> = state
            .metrics
            .values()
            .filter(|m| m.expert_name == expert_name && m.calculation_date >= since)
            .map(|m| MetricsHistoryPoint {
                calculation_date: m.calculation_date,
                overall_win_rate: m.overall_win_rate,
                avg_return_pct: m.avg_return_pct,
                rank_position: m.rank_position,
            })
            .collect();
        out.sort_by_key(|p| p.calculation_date);
        Ok(out)
    }
}

#[async_trait::async_trait]
impl SimulationStore for MemoryStore {
    async fn save_simulation(&self, user_id: Uuid, result: &SimulationResult) -> anyhow::Result<Uuid> {
        let id = Uuid::new_v4();
        self.state().simulations.insert(
            id,
            SavedSimulation {
                id,
                user_id,
                created_at: Utc::now(),
                result: result.clone(),
            },
        );
        Ok(id)
    }

    async fn get_simulation(&self, id: Uuid) -> anyhow::Result<Option<SavedSimulation>> {
        Ok(self.state().simulations.get(&id).cloned())
    }
}
