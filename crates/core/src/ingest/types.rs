use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// End-of-day quotes as returned by the price provider for one market date.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DailyPricesResponse {
    pub as_of_date: NaiveDate,
    pub items: Vec<DailyPriceItem>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DailyPriceItem {
    pub symbol: String,
    #[serde(default)]
    pub exchange: Option<String>,
    #[serde(default)]
    pub open: Option<f64>,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    #[serde(default)]
    pub volume: Option<i64>,
}
