use crate::domain::recommendation::{Action, RecommendationWithOutcome};
use crate::simulation::xirr::{xirr, XirrOptions};
use crate::simulation::{
    CashFlow, CashFlowKind, OpenPosition, PositionSizingMethod, SimulationParams,
    SimulationResult, TradeLogEntry,
};
use std::collections::BTreeMap;

/// Positions smaller than this are not opened.
pub const MIN_POSITION_AMOUNT: f64 = 100.0;

const NO_DATA_MESSAGE: &str = "No recommendations found in the specified date range";

/// Replays `history` (ascending by date) against a cash ledger.
///
/// A call whose outcome is dated inside the window is opened and realized immediately;
/// anything else stays open and is valued at its entry price at the end. SELL calls are
/// short positions: the notional is set aside as margin and returned with the P&L.
pub fn replay(
    params: &SimulationParams,
    expert_name: &str,
    history: &[RecommendationWithOutcome],
) -> SimulationResult {
    if history.is_empty() {
        return no_data(params, expert_name);
    }

    let mut ledger = Ledger::new(params);

    for item in history {
        let rec = &item.recommendation;
        let short = match rec.action {
            Action::Buy => false,
            Action::Sell => true,
            Action::Hold => continue,
        };

        let Some(entry_price) = rec.recommended_price.filter(|p| p.is_finite() && *p > 0.0) else {
            continue;
        };

        let symbol = rec.position_symbol().to_string();
        let amount = ledger.position_amount(params).min(ledger.cash);
        if amount < MIN_POSITION_AMOUNT {
            continue;
        }
        if ledger.open.len() >= params.max_concurrent_positions as usize
            && !ledger.open.contains_key(&symbol)
        {
            continue;
        }

        let shares = (amount / entry_price).floor();
        if shares < 1.0 {
            continue;
        }
        let cost = shares * entry_price;

        ledger.cash -= cost;
        ledger.flows.push(CashFlow {
            date: rec.recommendation_date,
            amount: -cost,
            kind: if short {
                CashFlowKind::ShortEntry
            } else {
                CashFlowKind::Buy
            },
        });

        let realized = item
            .outcome
            .as_ref()
            .filter(|o| o.outcome_date <= params.end_date && o.outcome_price > 0.0);

        match realized {
            Some(outcome) => {
                let exit_price = outcome.outcome_price;
                let per_share = if short {
                    entry_price - exit_price
                } else {
                    exit_price - entry_price
                };
                let pnl = per_share * shares;
                let return_pct = per_share / entry_price * 100.0;
                let proceeds = cost + pnl;

                ledger.cash += proceeds;
                ledger.flows.push(CashFlow {
                    date: outcome.outcome_date,
                    amount: proceeds,
                    kind: if short {
                        CashFlowKind::ShortExit
                    } else {
                        CashFlowKind::Sell
                    },
                });

                ledger.total_trades += 1;
                ledger.sum_return_pct += return_pct;
                if pnl > 0.0 {
                    ledger.winning_trades += 1;
                } else {
                    ledger.losing_trades += 1;
                }

                ledger.trades.push(TradeLogEntry {
                    recommendation_id: rec.id,
                    symbol,
                    action: rec.action,
                    entry_date: rec.recommendation_date,
                    entry_price,
                    exit_date: outcome.outcome_date,
                    exit_price,
                    shares,
                    pnl: round2(pnl),
                    return_pct: round2(return_pct),
                    outcome: outcome.outcome_type,
                    days_held: outcome.days_held,
                });
            }
            None => {
                ledger
                    .open
                    .entry(symbol.clone())
                    .and_modify(|p| {
                        p.shares += shares;
                        p.cost += cost;
                        p.entry_price = p.cost / p.shares;
                    })
                    .or_insert(OpenPosition {
                        symbol,
                        action: rec.action,
                        shares,
                        entry_price,
                        entry_date: rec.recommendation_date,
                        cost,
                    });
                ledger.active_trades += 1;
            }
        }
    }

    ledger.finish(params, expert_name)
}

struct Ledger {
    cash: f64,
    open: BTreeMap<String, OpenPosition>,
    flows: Vec<CashFlow>,
    trades: Vec<TradeLogEntry>,
    total_trades: u32,
    winning_trades: u32,
    losing_trades: u32,
    active_trades: u32,
    sum_return_pct: f64,
}

impl Ledger {
    fn new(params: &SimulationParams) -> Self {
        Self {
            cash: params.initial_capital,
            open: BTreeMap::new(),
            flows: vec![CashFlow {
                date: params.start_date,
                amount: -params.initial_capital,
                kind: CashFlowKind::Initial,
            }],
            trades: Vec::new(),
            total_trades: 0,
            winning_trades: 0,
            losing_trades: 0,
            active_trades: 0,
            sum_return_pct: 0.0,
        }
    }

    // Open positions are carried at cost; there is no mark-to-market inside the window.
    fn open_value(&self) -> f64 {
        self.open.values().map(|p| p.cost).sum()
    }

    fn position_amount(&self, params: &SimulationParams) -> f64 {
        match params.position_sizing_method {
            PositionSizingMethod::EqualWeight => {
                self.cash / f64::from(params.max_concurrent_positions)
            }
            PositionSizingMethod::Percentage => {
                (self.cash + self.open_value()) * params.position_size_value / 100.0
            }
            PositionSizingMethod::FixedAmount => params.position_size_value,
        }
    }

    fn finish(mut self, params: &SimulationParams, expert_name: &str) -> SimulationResult {
        let final_value = self.cash + self.open_value();
        self.flows.push(CashFlow {
            date: params.end_date,
            amount: final_value,
            kind: CashFlowKind::Final,
        });

        let series: Vec<_> = self.flows.iter().map(|f| (f.date, f.amount)).collect();
        let xirr_pct = xirr(&series, XirrOptions::default()).map(|r| round2(r * 100.0));

        let total_return_pct =
            (final_value - params.initial_capital) / params.initial_capital * 100.0;
        let (win_rate, avg_return_per_trade) = if self.total_trades > 0 {
            let n = f64::from(self.total_trades);
            (
                Some(round2(f64::from(self.winning_trades) / n * 100.0)),
                Some(round2(self.sum_return_pct / n)),
            )
        } else {
            (None, None)
        };

        SimulationResult {
            expert_id: params.expert_id,
            expert_name: expert_name.to_string(),
            initial_capital: params.initial_capital,
            start_date: params.start_date,
            end_date: params.end_date,
            position_sizing_method: params.position_sizing_method,
            position_size_value: params.position_size_value,
            max_concurrent_positions: params.max_concurrent_positions,
            final_value: round2(final_value),
            cash_balance: round2(self.cash),
            total_return_pct: round2(total_return_pct),
            xirr_pct,
            total_trades: self.total_trades,
            winning_trades: self.winning_trades,
            losing_trades: self.losing_trades,
            active_trades: self.active_trades,
            win_rate,
            avg_return_per_trade,
            trade_log: self.trades,
            open_positions: self.open.into_values().collect(),
            cash_flows: self
                .flows
                .into_iter()
                .map(|f| CashFlow {
                    amount: round2(f.amount),
                    ..f
                })
                .collect(),
            message: None,
        }
    }
}

fn no_data(params: &SimulationParams, expert_name: &str) -> SimulationResult {
    SimulationResult {
        expert_id: params.expert_id,
        expert_name: expert_name.to_string(),
        initial_capital: params.initial_capital,
        start_date: params.start_date,
        end_date: params.end_date,
        position_sizing_method: params.position_sizing_method,
        position_size_value: params.position_size_value,
        max_concurrent_positions: params.max_concurrent_positions,
        final_value: params.initial_capital,
        cash_balance: params.initial_capital,
        total_return_pct: 0.0,
        xirr_pct: None,
        total_trades: 0,
        winning_trades: 0,
        losing_trades: 0,
        active_trades: 0,
        win_rate: None,
        avg_return_per_trade: None,
        trade_log: Vec::new(),
        open_positions: Vec::new(),
        cash_flows: Vec::new(),
        message: Some(NO_DATA_MESSAGE.to_string()),
    }
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::recommendation::{Outcome, OutcomeType};
    use crate::outcome::detector::tests::{d, rec};
    use chrono::NaiveDate;
    use uuid::Uuid;

    fn params(method: PositionSizingMethod, value: f64, max: u32) -> SimulationParams {
        SimulationParams {
            expert_id: Uuid::new_v4(),
            initial_capital: 100_000.0,
            start_date: d(2025, 1, 1),
            end_date: d(2025, 12, 31),
            position_sizing_method: method,
            position_size_value: value,
            max_concurrent_positions: max,
        }
    }

    fn call(
        action: Action,
        symbol: &str,
        date: NaiveDate,
        entry: f64,
        outcome: Option<(OutcomeType, NaiveDate, f64)>,
    ) -> RecommendationWithOutcome {
        let mut r = rec(action, Some(entry), None, None);
        r.nse_symbol = Some(symbol.to_string());
        r.recommendation_date = date;
        RecommendationWithOutcome {
            recommendation: r,
            outcome: outcome.map(|(outcome_type, outcome_date, outcome_price)| Outcome {
                outcome_type,
                outcome_date,
                outcome_price,
                return_percentage: 0.0,
                days_held: (outcome_date - date).num_days() as i32,
            }),
        }
    }

    #[test]
    fn buy_with_target_hit_realizes_profit() {
        let p = params(PositionSizingMethod::FixedAmount, 10_000.0, 10);
        let history = vec![call(
            Action::Buy,
            "TCS",
            d(2025, 2, 1),
            1_000.0,
            Some((OutcomeType::TargetHit, d(2025, 3, 1), 1_100.0)),
        )];

        let r = replay(&p, "Expert", &history);
        assert_eq!(r.total_trades, 1);
        assert_eq!(r.winning_trades, 1);
        assert_eq!(r.trade_log[0].shares, 10.0);
        assert_eq!(r.trade_log[0].pnl, 1_000.0);
        assert_eq!(r.trade_log[0].return_pct, 10.0);
        assert_eq!(r.final_value, 101_000.0);
        assert_eq!(r.total_return_pct, 1.0);
        assert_eq!(r.win_rate, Some(100.0));

        let kinds: Vec<_> = r.cash_flows.iter().map(|f| f.kind).collect();
        assert_eq!(
            kinds,
            vec![
                CashFlowKind::Initial,
                CashFlowKind::Buy,
                CashFlowKind::Sell,
                CashFlowKind::Final
            ]
        );
        assert!(r.xirr_pct.is_some());
    }

    #[test]
    fn sell_is_modelled_as_short() {
        let p = params(PositionSizingMethod::FixedAmount, 10_000.0, 10);
        let history = vec![
            call(
                Action::Sell,
                "INFY",
                d(2025, 2, 1),
                500.0,
                Some((OutcomeType::TargetHit, d(2025, 2, 20), 450.0)),
            ),
            call(
                Action::Sell,
                "WIPRO",
                d(2025, 3, 1),
                200.0,
                Some((OutcomeType::SlHit, d(2025, 3, 5), 210.0)),
            ),
        ];

        let r = replay(&p, "Expert", &history);
        assert_eq!(r.total_trades, 2);
        assert_eq!(r.trade_log[0].pnl, 1_000.0);
        assert_eq!(r.trade_log[0].return_pct, 10.0);
        assert_eq!(r.trade_log[1].pnl, -500.0);
        assert_eq!(r.winning_trades, 1);
        assert_eq!(r.losing_trades, 1);
        assert_eq!(r.final_value, 100_500.0);
        assert_eq!(
            r.cash_flows[1..3].iter().map(|f| f.kind).collect::<Vec<_>>(),
            vec![CashFlowKind::ShortEntry, CashFlowKind::ShortExit]
        );
    }

    #[test]
    fn cash_is_conserved_across_closed_and_open_positions() {
        let p = params(PositionSizingMethod::EqualWeight, 0.0, 4);
        let history = vec![
            call(
                Action::Buy,
                "HDFCBANK",
                d(2025, 1, 10),
                1_550.0,
                Some((OutcomeType::TargetHit, d(2025, 2, 1), 1_700.0)),
            ),
            call(Action::Buy, "ITC", d(2025, 1, 15), 433.35, None),
            call(
                Action::Sell,
                "ADANIENT",
                d(2025, 2, 3),
                2_310.0,
                Some((OutcomeType::SlHit, d(2025, 2, 10), 2_405.5)),
            ),
            call(Action::Sell, "SBIN", d(2025, 3, 3), 731.2, None),
            call(
                Action::Buy,
                "LT",
                d(2025, 4, 1),
                3_420.0,
                Some((OutcomeType::Expired, d(2025, 6, 30), 3_380.0)),
            ),
        ];

        let r = replay(&p, "Expert", &history);
        let realized: f64 = r.trade_log.iter().map(|t| t.pnl).sum();
        let open_cost: f64 = r.open_positions.iter().map(|o| o.cost).sum();

        assert_eq!(r.total_trades, 3);
        assert_eq!(r.active_trades, 2);
        assert_eq!(r.open_positions.len(), 2);
        assert!((r.final_value - (p.initial_capital + realized)).abs() < 0.05);
        assert!((r.final_value - (r.cash_balance + open_cost)).abs() < 0.05);
        assert_eq!(r.cash_flows.last().unwrap().amount, r.final_value);
    }

    #[test]
    fn outcome_after_window_end_stays_open() {
        let mut p = params(PositionSizingMethod::FixedAmount, 10_000.0, 10);
        p.end_date = d(2025, 2, 28);
        let history = vec![call(
            Action::Buy,
            "TCS",
            d(2025, 2, 1),
            1_000.0,
            Some((OutcomeType::TargetHit, d(2025, 3, 15), 1_100.0)),
        )];

        let r = replay(&p, "Expert", &history);
        assert_eq!(r.total_trades, 0);
        assert_eq!(r.active_trades, 1);
        assert_eq!(r.win_rate, None);
        assert_eq!(r.final_value, 100_000.0);
    }

    #[test]
    fn respects_max_concurrent_positions() {
        let p = params(PositionSizingMethod::FixedAmount, 10_000.0, 1);
        let history = vec![
            call(Action::Buy, "TCS", d(2025, 2, 1), 1_000.0, None),
            call(Action::Buy, "INFY", d(2025, 2, 2), 1_000.0, None),
            call(Action::Buy, "TCS", d(2025, 2, 3), 1_250.0, None),
        ];

        let r = replay(&p, "Expert", &history);
        assert_eq!(r.active_trades, 2);
        assert_eq!(r.open_positions.len(), 1);
        let tcs = &r.open_positions[0];
        assert_eq!(tcs.symbol, "TCS");
        assert_eq!(tcs.shares, 18.0);
        assert_eq!(tcs.cost, 20_000.0);
        assert_eq!(r.cash_balance, 80_000.0);
    }

    #[test]
    fn skips_calls_without_entry_or_below_minimum_size() {
        let p = params(PositionSizingMethod::FixedAmount, 50.0, 10);
        let mut no_entry = call(Action::Buy, "TCS", d(2025, 2, 1), 1_000.0, None);
        no_entry.recommendation.recommended_price = None;
        let tiny = call(Action::Buy, "ITC", d(2025, 2, 2), 10.0, None);

        let r = replay(&p, "Expert", &[no_entry, tiny]);
        assert_eq!(r.active_trades, 0);
        assert_eq!(r.final_value, 100_000.0);
        assert_eq!(r.cash_flows.len(), 2);
        assert!(r.xirr_pct.is_some_and(|x| x.abs() < 0.01));
    }

    #[test]
    fn percentage_sizing_uses_portfolio_value() {
        let p = params(PositionSizingMethod::Percentage, 5.0, 10);
        let history = vec![
            call(Action::Buy, "TCS", d(2025, 2, 1), 100.0, None),
            call(Action::Buy, "INFY", d(2025, 2, 2), 100.0, None),
        ];

        let r = replay(&p, "Expert", &history);
        // Open positions count toward portfolio value, so both trades size off 100k.
        assert!(r.open_positions.iter().all(|o| o.cost == 5_000.0));
    }
}
