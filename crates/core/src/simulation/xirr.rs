//! Money-weighted return over irregular cash flows.

use chrono::NaiveDate;

const DAYS_PER_YEAR: f64 = 365.0;
const MIN_DERIVATIVE: f64 = 1e-10;
const DERIVATIVE_NUDGE: f64 = 0.01;
const RATE_FLOOR: f64 = -0.99;
const PLAUSIBLE_MAX_RATE: f64 = 10.0;

#[derive(Debug, Clone, Copy)]
pub struct XirrOptions {
    pub guess: f64,
    pub max_iterations: u32,
    pub tolerance: f64,
}

impl Default for XirrOptions {
    fn default() -> Self {
        Self {
            guess: 0.1,
            max_iterations: 100,
            tolerance: 1e-7,
        }
    }
}

/// Annualized rate `r` solving `sum(amount_i / (1 + r)^(days_i / 365)) = 0`, where `days_i`
/// counts from the earliest flow. Negative amounts are outflows.
///
/// Returns `None` for degenerate input (fewer than two flows, or not both signs present)
/// and when Newton-Raphson ends outside the plausible band (-100%, +1000%).
pub fn xirr(flows: &[(NaiveDate, f64)], opts: XirrOptions) -> Option<f64> {
    if flows.len() < 2 {
        return None;
    }
    let has_inflow = flows.iter().any(|(_, a)| *a > 0.0);
    let has_outflow = flows.iter().any(|(_, a)| *a < 0.0);
    if !has_inflow || !has_outflow {
        return None;
    }

    let mut sorted = flows.to_vec();
    sorted.sort_by_key(|(date, _)| *date);
    let first = sorted[0].0;
    let timed: Vec<(f64, f64)> = sorted
        .iter()
        .map(|(date, amount)| ((*date - first).num_days() as f64 / DAYS_PER_YEAR, *amount))
        .collect();

    let mut rate = opts.guess;

    for _ in 0..opts.max_iterations {
        let (npv, derivative) = npv_with_derivative(&timed, rate);
        if !npv.is_finite() || !derivative.is_finite() {
            return None;
        }

        if npv.abs() < opts.tolerance {
            return Some(rate);
        }

        if derivative.abs() < MIN_DERIVATIVE {
            rate += DERIVATIVE_NUDGE;
            continue;
        }

        let next = rate - npv / derivative;
        if next <= -1.0 {
            // (1 + r)^t is undefined for fractional t once r <= -1.
            rate = (rate + RATE_FLOOR) / 2.0;
            continue;
        }
        rate = next;
    }

    (rate > -1.0 && rate < PLAUSIBLE_MAX_RATE).then_some(rate)
}

fn npv_with_derivative(timed: &[(f64, f64)], rate: f64) -> (f64, f64) {
    let mut npv = 0.0;
    let mut derivative = 0.0;
    for &(years, amount) in timed {
        let discount = (1.0 + rate).powf(years);
        npv += amount / discount;
        derivative -= amount * years / (discount * (1.0 + rate));
    }
    (npv, derivative)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn one_year_fifteen_percent() {
        let flows = [(d(2023, 1, 1), -100_000.0), (d(2024, 1, 1), 115_000.0)];
        let r = xirr(&flows, XirrOptions::default()).unwrap();
        assert!((r - 0.15).abs() < 1e-6, "got {r}");
    }

    #[test]
    fn input_order_does_not_matter() {
        let flows = [
            (d(2024, 1, 1), 115_000.0),
            (d(2023, 7, 1), -10_000.0),
            (d(2023, 1, 1), -100_000.0),
        ];
        let mut reversed = flows;
        reversed.reverse();
        let a = xirr(&flows, XirrOptions::default()).unwrap();
        let b = xirr(&reversed, XirrOptions::default()).unwrap();
        assert!((a - b).abs() < 1e-9);
        assert!(a > 0.0 && a < 0.15);
    }

    #[test]
    fn losing_investment_is_negative() {
        let flows = [(d(2023, 1, 1), -100_000.0), (d(2024, 1, 1), 80_000.0)];
        let r = xirr(&flows, XirrOptions::default()).unwrap();
        assert!((r + 0.2).abs() < 1e-6, "got {r}");
    }

    #[test]
    fn same_sign_flows_have_no_rate() {
        let out = [(d(2023, 1, 1), -1.0), (d(2023, 6, 1), -2.0)];
        let inn = [(d(2023, 1, 1), 1.0), (d(2023, 6, 1), 2.0)];
        assert_eq!(xirr(&out, XirrOptions::default()), None);
        assert_eq!(xirr(&inn, XirrOptions::default()), None);
    }

    #[test]
    fn fewer_than_two_flows_have_no_rate() {
        assert_eq!(xirr(&[], XirrOptions::default()), None);
        assert_eq!(xirr(&[(d(2023, 1, 1), -1.0)], XirrOptions::default()), None);
    }

    #[test]
    fn implausible_non_converged_rate_is_rejected() {
        // Tripling money in two days annualizes far beyond +1000%.
        let flows = [(d(2023, 1, 1), -100.0), (d(2023, 1, 3), 300.0)];
        let opts = XirrOptions {
            max_iterations: 3,
            ..XirrOptions::default()
        };
        assert_eq!(xirr(&flows, opts), None);
    }
}
