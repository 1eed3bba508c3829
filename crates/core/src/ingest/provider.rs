use crate::config::Settings;
use crate::ingest::types::{DailyPriceItem, DailyPricesResponse};
use anyhow::{Context, Result};
use chrono::NaiveDate;
use reqwest::header::{HeaderMap, HeaderValue};
use serde_json::Value;
use std::time::Duration;

const DEFAULT_TIMEOUT_SECS: u64 = 30;
const DEFAULT_PATH: &str = "/v1/daily_prices";
const DEFAULT_RETRIES: u32 = 3;

#[async_trait::async_trait]
pub trait PriceProviderClient: Send + Sync {
    fn provider_name(&self) -> &'static str;

    /// Validated quotes for `as_of_date` plus the raw JSON body for auditing.
    async fn fetch_daily_prices(&self, as_of_date: NaiveDate)
        -> Result<(DailyPricesResponse, Value)>;
}

#[derive(Debug, Clone)]
pub struct HttpJsonPriceProvider {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    path: String,
    retries: u32,
}

impl HttpJsonPriceProvider {
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        let base_url = settings.require_price_provider_base_url()?.to_string();
        let api_key = settings.price_provider_api_key.clone();

        let timeout_secs = std::env::var("PRICE_PROVIDER_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .unwrap_or(DEFAULT_TIMEOUT_SECS);

        let retries = std::env::var("PRICE_PROVIDER_RETRIES")
            .ok()
            .and_then(|s| s.parse::<u32>().ok())
            .unwrap_or(DEFAULT_RETRIES)
            .max(1);

        let path = std::env::var("PRICE_PROVIDER_PATH")
            .ok()
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_PATH.to_string());

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .context("failed to build price provider http client")?;

        Ok(Self {
            http,
            base_url,
            api_key,
            path,
            retries,
        })
    }

    fn url(&self) -> String {
        let path = if self.path.starts_with('/') {
            self.path.clone()
        } else {
            format!("/{}", self.path)
        };

        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }

    fn headers(&self) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        if let Some(api_key) = &self.api_key {
            headers.insert("x-api-key", HeaderValue::from_str(api_key)?);
        }
        Ok(headers)
    }

    async fn fetch_once(&self, as_of_date: NaiveDate) -> Result<(DailyPricesResponse, Value)> {
        let res = self
            .http
            .get(self.url())
            .headers(self.headers()?)
            .query(&[("as_of_date", as_of_date.to_string())])
            .send()
            .await
            .context("price provider request failed")?;

        let status = res.status();
        let text = res
            .text()
            .await
            .context("failed to read provider response")?;
        let raw_json = serde_json::from_str::<Value>(&text)
            .with_context(|| format!("provider response is not valid JSON: {text}"))?;

        if !status.is_success() {
            anyhow::bail!("price provider HTTP {status}: {raw_json}");
        }

        let parsed = serde_json::from_value::<DailyPricesResponse>(raw_json.clone())
            .context("failed to parse provider response into DailyPricesResponse")?;
        Ok((parsed, raw_json))
    }
}

#[async_trait::async_trait]
impl PriceProviderClient for HttpJsonPriceProvider {
    fn provider_name(&self) -> &'static str {
        "external_http_json"
    }

    async fn fetch_daily_prices(
        &self,
        as_of_date: NaiveDate,
    ) -> Result<(DailyPricesResponse, Value)> {
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            match self.fetch_once(as_of_date).await {
                Ok((parsed, raw)) => {
                    validate_response(&parsed, as_of_date)?;
                    return Ok((parsed, raw));
                }
                Err(err) => {
                    if attempt >= self.retries {
                        return Err(err);
                    }
                    let backoff = Duration::from_secs(1 << (attempt - 1));
                    tracing::warn!(attempt, ?backoff, error = %err, "price provider fetch failed; retrying");
                    tokio::time::sleep(backoff).await;
                }
            }
        }
    }
}

pub fn validate_response(resp: &DailyPricesResponse, expected: NaiveDate) -> Result<()> {
    anyhow::ensure!(
        resp.as_of_date == expected,
        "provider as_of_date mismatch: expected {expected}, got {}",
        resp.as_of_date
    );

    for item in &resp.items {
        validate_item(item).with_context(|| format!("invalid quote for {:?}", item.symbol))?;
    }

    Ok(())
}

fn validate_item(item: &DailyPriceItem) -> Result<()> {
    anyhow::ensure!(!item.symbol.trim().is_empty(), "symbol must be non-empty");
    for (field, v) in [("high", item.high), ("low", item.low), ("close", item.close)] {
        anyhow::ensure!(v.is_finite() && v > 0.0, "{field} must be a positive number");
    }
    if let Some(open) = item.open {
        anyhow::ensure!(open.is_finite() && open > 0.0, "open must be a positive number");
    }
    anyhow::ensure!(item.high >= item.low, "high must be >= low");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn as_of() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 3, 10).unwrap()
    }

    #[test]
    fn parses_expected_shape() {
        let v = json!({
            "as_of_date": as_of(),
            "items": [
                {"symbol": "RELIANCE", "exchange": "NSE", "open": 1250.0, "high": 1262.5,
                 "low": 1241.1, "close": 1255.0, "volume": 8_123_456},
                {"symbol": "500325", "exchange": "BSE", "high": 1262.0, "low": 1241.0, "close": 1254.9}
            ]
        });

        let parsed: DailyPricesResponse = serde_json::from_value(v).unwrap();
        assert_eq!(parsed.items.len(), 2);
        assert_eq!(parsed.items[0].volume, Some(8_123_456));
        assert_eq!(parsed.items[1].open, None);
        assert!(validate_response(&parsed, as_of()).is_ok());
    }

    #[test]
    fn rejects_string_prices_via_deserialize() {
        let v = json!({
            "as_of_date": as_of(),
            "items": [{"symbol": "TCS", "high": "4100", "low": 4000.0, "close": 4050.0}]
        });
        assert!(serde_json::from_value::<DailyPricesResponse>(v).is_err());
    }

    #[test]
    fn rejects_inverted_bar_and_date_mismatch() {
        let v = json!({
            "as_of_date": as_of(),
            "items": [{"symbol": "TCS", "high": 3990.0, "low": 4000.0, "close": 4050.0}]
        });
        let parsed: DailyPricesResponse = serde_json::from_value(v).unwrap();
        assert!(validate_response(&parsed, as_of()).is_err());

        let other = NaiveDate::from_ymd_opt(2025, 3, 11).unwrap();
        let empty = DailyPricesResponse {
            as_of_date: as_of(),
            items: Vec::new(),
        };
        assert!(validate_response(&empty, other).is_err());
    }
}
