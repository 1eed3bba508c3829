//! "What if I had followed expert X with capital Y?" backtest replays.

use crate::domain::recommendation::{Action, OutcomeType};
use crate::storage::{ExpertStore, RecommendationStore};
use anyhow::{ensure, Context};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

pub mod engine;
pub mod xirr;

pub const DEFAULT_INITIAL_CAPITAL: f64 = 100_000.0;
pub const DEFAULT_POSITION_SIZE_VALUE: f64 = 10_000.0;
pub const DEFAULT_MAX_CONCURRENT_POSITIONS: u32 = 10;
pub const MIN_INITIAL_CAPITAL: f64 = 1_000.0;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PositionSizingMethod {
    EqualWeight,
    #[default]
    FixedAmount,
    Percentage,
}

impl PositionSizingMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            PositionSizingMethod::EqualWeight => "EQUAL_WEIGHT",
            PositionSizingMethod::FixedAmount => "FIXED_AMOUNT",
            PositionSizingMethod::Percentage => "PERCENTAGE",
        }
    }
}

impl std::str::FromStr for PositionSizingMethod {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s.trim().to_ascii_uppercase().replace('-', "_").as_str() {
            "EQUAL_WEIGHT" => Ok(PositionSizingMethod::EqualWeight),
            "FIXED_AMOUNT" => Ok(PositionSizingMethod::FixedAmount),
            "PERCENTAGE" => Ok(PositionSizingMethod::Percentage),
            other => anyhow::bail!("unknown position sizing method: {other}"),
        }
    }
}

fn default_initial_capital() -> f64 {
    DEFAULT_INITIAL_CAPITAL
}

fn default_position_size_value() -> f64 {
    DEFAULT_POSITION_SIZE_VALUE
}

fn default_max_concurrent_positions() -> u32 {
    DEFAULT_MAX_CONCURRENT_POSITIONS
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationParams {
    pub expert_id: Uuid,
    #[serde(default = "default_initial_capital")]
    pub initial_capital: f64,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    #[serde(default)]
    pub position_sizing_method: PositionSizingMethod,
    #[serde(default = "default_position_size_value")]
    pub position_size_value: f64,
    #[serde(default = "default_max_concurrent_positions")]
    pub max_concurrent_positions: u32,
}

impl SimulationParams {
    pub fn validate(&self) -> anyhow::Result<()> {
        ensure!(
            self.end_date >= self.start_date,
            "end date must be on or after start date"
        );
        ensure!(
            self.initial_capital.is_finite() && self.initial_capital >= MIN_INITIAL_CAPITAL,
            "initial capital must be at least {MIN_INITIAL_CAPITAL}"
        );
        ensure!(
            self.max_concurrent_positions >= 1,
            "max concurrent positions must be at least 1"
        );
        if self.position_sizing_method != PositionSizingMethod::EqualWeight {
            ensure!(
                self.position_size_value.is_finite() && self.position_size_value > 0.0,
                "position size value must be positive for {}",
                self.position_sizing_method.as_str()
            );
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CashFlowKind {
    Initial,
    Buy,
    Sell,
    ShortEntry,
    ShortExit,
    Final,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CashFlow {
    pub date: NaiveDate,
    pub amount: f64,
    #[serde(rename = "type")]
    pub kind: CashFlowKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeLogEntry {
    pub recommendation_id: Uuid,
    pub symbol: String,
    pub action: Action,
    pub entry_date: NaiveDate,
    pub entry_price: f64,
    pub exit_date: NaiveDate,
    pub exit_price: f64,
    pub shares: f64,
    pub pnl: f64,
    pub return_pct: f64,
    pub outcome: OutcomeType,
    pub days_held: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpenPosition {
    pub symbol: String,
    pub action: Action,
    pub shares: f64,
    pub entry_price: f64,
    pub entry_date: NaiveDate,
    pub cost: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationResult {
    pub expert_id: Uuid,
    pub expert_name: String,
    pub initial_capital: f64,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub position_sizing_method: PositionSizingMethod,
    pub position_size_value: f64,
    pub max_concurrent_positions: u32,
    pub final_value: f64,
    pub cash_balance: f64,
    pub total_return_pct: f64,
    /// Annualized, in percent.
    pub xirr_pct: Option<f64>,
    pub total_trades: u32,
    pub winning_trades: u32,
    pub losing_trades: u32,
    pub active_trades: u32,
    pub win_rate: Option<f64>,
    pub avg_return_per_trade: Option<f64>,
    pub trade_log: Vec<TradeLogEntry>,
    pub open_positions: Vec<OpenPosition>,
    pub cash_flows: Vec<CashFlow>,
    pub message: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SavedSimulation {
    pub id: Uuid,
    pub user_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub result: SimulationResult,
}

#[derive(Debug, Clone)]
pub struct ExpertNotFound(pub Uuid);

impl fmt::Display for ExpertNotFound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "expert not found: {}", self.0)
    }
}

impl std::error::Error for ExpertNotFound {}

/// Loads the expert's BUY/SELL calls in range and replays them.
pub async fn run_simulation(
    experts: &dyn ExpertStore,
    recs: &dyn RecommendationStore,
    params: &SimulationParams,
) -> anyhow::Result<SimulationResult> {
    params.validate()?;

    let expert = experts
        .get_expert(params.expert_id)
        .await
        .context("expert lookup failed")?
        .ok_or(ExpertNotFound(params.expert_id))?;

    tracing::info!(
        expert_id = %params.expert_id,
        expert = %expert.canonical_name,
        initial_capital = params.initial_capital,
        start_date = %params.start_date,
        end_date = %params.end_date,
        sizing = params.position_sizing_method.as_str(),
        "running simulation"
    );

    let history = recs
        .list_tradable_in_range(&expert.canonical_name, params.start_date, params.end_date)
        .await
        .context("load simulation recommendations failed")?;

    let result = engine::replay(params, &expert.canonical_name, &history);

    tracing::info!(
        expert_id = %params.expert_id,
        total_trades = result.total_trades,
        active_trades = result.active_trades,
        xirr_pct = ?result.xirr_pct,
        "simulation completed"
    );
    Ok(result)
}
