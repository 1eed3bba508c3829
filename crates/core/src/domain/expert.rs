use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Expert {
    pub id: Uuid,
    pub canonical_name: String,
    pub is_active: bool,
}

/// Per-expert performance snapshot for one calculation date.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExpertMetrics {
    pub expert_id: Uuid,
    pub expert_name: String,
    pub calculation_date: NaiveDate,
    pub total_recommendations: i32,
    pub active_recommendations: i32,
    pub closed_recommendations: i32,
    pub target_hit_count: i32,
    pub sl_hit_count: i32,
    pub expired_count: i32,
    pub overall_win_rate: Option<f64>,
    pub last_30d_win_rate: Option<f64>,
    pub last_90d_win_rate: Option<f64>,
    pub avg_return_pct: Option<f64>,
    pub avg_winning_return_pct: Option<f64>,
    pub avg_losing_return_pct: Option<f64>,
    pub total_return_pct: Option<f64>,
    pub avg_holding_days: Option<f64>,
    pub ranking_score: f64,
    pub rank_position: Option<i32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsHistoryPoint {
    pub calculation_date: NaiveDate,
    pub overall_win_rate: Option<f64>,
    pub avg_return_pct: Option<f64>,
    pub rank_position: Option<i32>,
}
