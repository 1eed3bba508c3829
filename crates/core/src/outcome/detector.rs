use crate::domain::recommendation::{Action, Outcome, OutcomeType, Recommendation};
use crate::domain::stock::{LatestPrice, PriceBar};
use crate::storage::PriceSource;
use anyhow::Context;
use chrono::NaiveDate;

/// Recommendations with no event after this many days close as EXPIRED.
pub const EXPIRY_DAYS: i64 = 90;

/// Evaluates one recommendation against the stored price history.
///
/// Returns `Ok(None)` while the recommendation is still open, and also when it cannot be
/// evaluated yet (no stock link, no prices); both leave the row ACTIVE for the next run.
pub async fn check_outcome(
    prices: &dyn PriceSource,
    rec: &Recommendation,
) -> anyhow::Result<Option<Outcome>> {
    let Some(stock_id) = rec.stock_id else {
        tracing::warn!(recommendation_id = %rec.id, "no stock link for recommendation");
        return Ok(None);
    };

    let latest = prices
        .latest_price(stock_id)
        .await
        .with_context(|| format!("latest price lookup failed (stock_id={stock_id})"))?;
    let Some(latest) = latest else {
        tracing::warn!(recommendation_id = %rec.id, %stock_id, "no price data for stock");
        return Ok(None);
    };

    if rec.action == Action::Hold {
        return Ok(None);
    }

    let bars = prices
        .prices_since(stock_id, rec.recommendation_date)
        .await
        .with_context(|| format!("price history lookup failed (stock_id={stock_id})"))?;

    let outcome = detect_outcome(rec, &bars, latest);
    tracing::debug!(
        recommendation_id = %rec.id,
        bars = bars.len(),
        outcome = ?outcome.as_ref().map(|o| o.outcome_type),
        "checked outcome"
    );
    Ok(outcome)
}

/// Walks `bars` (ascending, dated on/after the recommendation) for the first target or
/// stop-loss touch, falling back to expiry against `latest`.
///
/// Daily bars carry no intraday ordering, so when one bar touches both levels the target
/// is taken first. This is an approximation; do not change it without product input.
pub fn detect_outcome(
    rec: &Recommendation,
    bars: &[PriceBar],
    latest: LatestPrice,
) -> Option<Outcome> {
    let short = match rec.action {
        Action::Buy => false,
        Action::Sell => true,
        Action::Hold => return None,
    };

    let entry = rec
        .recommended_price
        .filter(|p| p.is_finite() && *p > 0.0)
        .unwrap_or(latest.close_price);

    for bar in bars {
        let days_held = days_between(rec.recommendation_date, bar.price_date);

        if let Some(target) = rec.target_price {
            let hit = if short {
                bar.low_price <= target
            } else {
                bar.high_price >= target
            };
            if hit {
                return Some(Outcome {
                    outcome_type: OutcomeType::TargetHit,
                    outcome_date: bar.price_date,
                    outcome_price: target,
                    return_percentage: return_pct(entry, target, short),
                    days_held,
                });
            }
        }

        if let Some(stop_loss) = rec.stop_loss {
            let hit = if short {
                bar.high_price >= stop_loss
            } else {
                bar.low_price <= stop_loss
            };
            if hit {
                return Some(Outcome {
                    outcome_type: OutcomeType::SlHit,
                    outcome_date: bar.price_date,
                    outcome_price: stop_loss,
                    return_percentage: return_pct(entry, stop_loss, short),
                    days_held,
                });
            }
        }
    }

    let days_held = days_between(rec.recommendation_date, latest.price_date);
    if i64::from(days_held) >= EXPIRY_DAYS {
        return Some(Outcome {
            outcome_type: OutcomeType::Expired,
            outcome_date: latest.price_date,
            outcome_price: latest.close_price,
            return_percentage: return_pct(entry, latest.close_price, short),
            days_held,
        });
    }

    None
}

/// Percentage return from `entry` to `exit`, profit on a fall when `short`. Rounded to 4 dp.
pub fn return_pct(entry: f64, exit: f64, short: bool) -> f64 {
    if entry == 0.0 {
        return 0.0;
    }
    let raw = if short {
        (entry - exit) / entry * 100.0
    } else {
        (exit - entry) / entry * 100.0
    };
    (raw * 10_000.0).round() / 10_000.0
}

fn days_between(from: NaiveDate, to: NaiveDate) -> i32 {
    i32::try_from((to - from).num_days()).unwrap_or(i32::MAX)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::domain::recommendation::RecommendationStatus;
    use uuid::Uuid;

    pub(crate) fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    pub(crate) fn rec(
        action: Action,
        entry: Option<f64>,
        target: Option<f64>,
        stop_loss: Option<f64>,
    ) -> Recommendation {
        Recommendation {
            id: Uuid::new_v4(),
            expert_name: "Expert".to_string(),
            stock_id: Some(Uuid::new_v4()),
            share_name: "Reliance Industries".to_string(),
            nse_symbol: Some("RELIANCE".to_string()),
            action,
            recommendation_date: d(2025, 1, 1),
            recommended_price: entry,
            target_price: target,
            stop_loss,
            status: RecommendationStatus::Active,
            is_flagged: false,
            flag_reasons: Vec::new(),
            reviewed_at: None,
            reviewer_notes: None,
        }
    }

    pub(crate) fn bar(stock_id: Uuid, date: NaiveDate, high: f64, low: f64, close: f64) -> PriceBar {
        PriceBar {
            stock_id,
            price_date: date,
            open_price: None,
            high_price: high,
            low_price: low,
            close_price: close,
            volume: None,
        }
    }

    fn latest_of(bars: &[PriceBar]) -> LatestPrice {
        LatestPrice::from(bars.last().unwrap())
    }

    #[test]
    fn buy_target_hit_before_stop_loss() {
        let r = rec(Action::Buy, Some(100.0), Some(110.0), Some(95.0));
        let s = r.stock_id.unwrap();
        let bars = vec![
            bar(s, d(2025, 1, 2), 104.0, 99.0, 103.0),
            bar(s, d(2025, 1, 6), 111.0, 102.0, 109.0),
            bar(s, d(2025, 1, 7), 108.0, 90.0, 91.0),
        ];

        let o = detect_outcome(&r, &bars, latest_of(&bars)).unwrap();
        assert_eq!(o.outcome_type, OutcomeType::TargetHit);
        assert_eq!(o.outcome_date, d(2025, 1, 6));
        assert_eq!(o.outcome_price, 110.0);
        assert_eq!(o.return_percentage, 10.0);
        assert_eq!(o.days_held, 5);
    }

    #[test]
    fn buy_stop_loss_hit() {
        let r = rec(Action::Buy, Some(200.0), Some(240.0), Some(190.0));
        let s = r.stock_id.unwrap();
        let bars = vec![
            bar(s, d(2025, 1, 1), 205.0, 195.0, 198.0),
            bar(s, d(2025, 1, 3), 199.0, 188.0, 189.0),
        ];

        let o = detect_outcome(&r, &bars, latest_of(&bars)).unwrap();
        assert_eq!(o.outcome_type, OutcomeType::SlHit);
        assert_eq!(o.outcome_price, 190.0);
        assert_eq!(o.return_percentage, -5.0);
        assert_eq!(o.days_held, 2);
    }

    #[test]
    fn sell_direction_is_inverted() {
        let r = rec(Action::Sell, Some(500.0), Some(450.0), Some(520.0));
        let s = r.stock_id.unwrap();
        let bars = vec![
            bar(s, d(2025, 1, 2), 510.0, 480.0, 490.0),
            bar(s, d(2025, 1, 9), 470.0, 449.0, 455.0),
        ];

        let o = detect_outcome(&r, &bars, latest_of(&bars)).unwrap();
        assert_eq!(o.outcome_type, OutcomeType::TargetHit);
        assert_eq!(o.outcome_price, 450.0);
        assert_eq!(o.return_percentage, 10.0);

        let bars = vec![bar(s, d(2025, 1, 2), 525.0, 495.0, 521.0)];
        let o = detect_outcome(&r, &bars, latest_of(&bars)).unwrap();
        assert_eq!(o.outcome_type, OutcomeType::SlHit);
        assert_eq!(o.return_percentage, -4.0);
    }

    // Known approximation: a bar touching both levels resolves optimistically.
    #[test]
    fn same_bar_touching_both_levels_resolves_to_target() {
        let r = rec(Action::Buy, Some(100.0), Some(110.0), Some(95.0));
        let s = r.stock_id.unwrap();
        let bars = vec![bar(s, d(2025, 1, 2), 112.0, 90.0, 100.0)];

        let o = detect_outcome(&r, &bars, latest_of(&bars)).unwrap();
        assert_eq!(o.outcome_type, OutcomeType::TargetHit);
    }

    #[test]
    fn expires_after_ninety_days_at_latest_close() {
        let r = rec(Action::Buy, Some(100.0), Some(150.0), Some(80.0));
        let s = r.stock_id.unwrap();
        let bars = vec![
            bar(s, d(2025, 1, 2), 105.0, 95.0, 101.0),
            bar(s, d(2025, 4, 1), 106.0, 96.0, 104.5),
        ];

        let o = detect_outcome(&r, &bars, latest_of(&bars)).unwrap();
        assert_eq!(o.outcome_type, OutcomeType::Expired);
        assert_eq!(o.outcome_date, d(2025, 4, 1));
        assert_eq!(o.outcome_price, 104.5);
        assert_eq!(o.return_percentage, 4.5);
        assert_eq!(o.days_held, 90);
    }

    #[test]
    fn still_active_inside_expiry_window() {
        let r = rec(Action::Buy, Some(100.0), Some(150.0), Some(80.0));
        let s = r.stock_id.unwrap();
        let bars = vec![bar(s, d(2025, 3, 31), 105.0, 95.0, 101.0)];

        assert!(detect_outcome(&r, &bars, latest_of(&bars)).is_none());
    }

    #[test]
    fn missing_entry_uses_latest_close_for_return() {
        let r = rec(Action::Buy, None, Some(110.0), None);
        let s = r.stock_id.unwrap();
        let bars = vec![bar(s, d(2025, 1, 2), 111.0, 100.0, 100.0)];

        let o = detect_outcome(&r, &bars, latest_of(&bars)).unwrap();
        assert_eq!(o.return_percentage, 10.0);
    }

    #[test]
    fn zero_entry_falls_back_to_latest_close() {
        let r = rec(Action::Buy, Some(0.0), Some(110.0), None);
        let s = r.stock_id.unwrap();
        let bars = vec![bar(s, d(2025, 1, 2), 111.0, 100.0, 100.0)];

        let o = detect_outcome(&r, &bars, latest_of(&bars)).unwrap();
        assert_eq!(o.outcome_type, OutcomeType::TargetHit);
        assert_eq!(o.return_percentage, 10.0);
    }

    #[test]
    fn hold_never_closes() {
        let r = rec(Action::Hold, Some(100.0), Some(110.0), Some(90.0));
        let s = r.stock_id.unwrap();
        let bars = vec![bar(s, d(2025, 6, 2), 200.0, 10.0, 100.0)];

        assert!(detect_outcome(&r, &bars, latest_of(&bars)).is_none());
    }

    #[test]
    fn zero_entry_yields_zero_return() {
        assert_eq!(return_pct(0.0, 110.0, false), 0.0);
        assert_eq!(return_pct(300.0, 301.0, false), 0.3333);
    }
}
