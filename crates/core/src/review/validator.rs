use crate::domain::recommendation::{Action, FlagReason, Recommendation};

// Zero is how extractors write "not mentioned", so it counts as missing.
fn present(v: Option<f64>) -> Option<f64> {
    v.filter(|p| p.is_finite() && *p != 0.0)
}

/// Consistency checks on a recommendation's price levels.
///
/// Pure and total: every rule is evaluated independently and the returned reasons are in a
/// fixed order. An empty list means the recommendation is clean.
pub fn validate(rec: &Recommendation) -> Vec<FlagReason> {
    validate_levels(rec.action, rec.recommended_price, rec.target_price, rec.stop_loss)
}

/// [`validate`] over bare fields, for candidates that are not stored yet.
pub fn validate_levels(
    action: Action,
    recommended_price: Option<f64>,
    target_price: Option<f64>,
    stop_loss: Option<f64>,
) -> Vec<FlagReason> {
    let mut flags = Vec::new();

    let entry = present(recommended_price);
    let target = present(target_price);
    let stop_loss = present(stop_loss);

    if entry.is_none() {
        flags.push(FlagReason::MissingEntry);
    }
    if target.is_none() {
        flags.push(FlagReason::MissingTarget);
    }
    if stop_loss.is_none() {
        flags.push(FlagReason::MissingSl);
    }

    if let (Some(entry), Some(sl)) = (entry, stop_loss) {
        if sl == entry {
            flags.push(FlagReason::SlEqualsEntry);
        }

        match action {
            Action::Buy => {
                if sl > entry {
                    flags.push(FlagReason::IllogicalSlBuy);
                }
                if target.is_some_and(|t| t < entry) {
                    flags.push(FlagReason::TargetWrongDirection);
                }
            }
            Action::Sell => {
                if sl < entry {
                    flags.push(FlagReason::IllogicalSlSell);
                }
                if target.is_some_and(|t| t > entry) {
                    flags.push(FlagReason::TargetWrongDirection);
                }
            }
            Action::Hold => {}
        }
    } else if let (Some(entry), Some(t)) = (entry, target) {
        let wrong = match action {
            Action::Buy => t < entry,
            Action::Sell => t > entry,
            Action::Hold => false,
        };
        if wrong {
            flags.push(FlagReason::TargetWrongDirection);
        }
    }

    if let (Some(entry), Some(target), Some(sl)) = (entry, target, stop_loss) {
        let risk_reward = match action {
            Action::Buy => Some((entry - sl, target - entry)),
            Action::Sell => Some((sl - entry, entry - target)),
            Action::Hold => None,
        };
        if let Some((risk, reward)) = risk_reward {
            if risk > 0.0 && reward > 0.0 && risk > 2.0 * reward {
                flags.push(FlagReason::HighRiskRatio);
            }
        }
    }

    flags
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::outcome::detector::tests::rec;

    #[test]
    fn clean_buy_and_sell_have_no_flags() {
        assert!(validate(&rec(Action::Buy, Some(100.0), Some(120.0), Some(95.0))).is_empty());
        assert!(validate(&rec(Action::Sell, Some(100.0), Some(80.0), Some(105.0))).is_empty());
    }

    #[test]
    fn buy_with_target_below_entry() {
        let flags = validate(&rec(Action::Buy, Some(100.0), Some(90.0), Some(95.0)));
        assert_eq!(flags, vec![FlagReason::TargetWrongDirection]);
    }

    #[test]
    fn buy_with_stop_above_entry() {
        let flags = validate(&rec(Action::Buy, Some(100.0), Some(90.0), Some(105.0)));
        assert_eq!(
            flags,
            vec![FlagReason::IllogicalSlBuy, FlagReason::TargetWrongDirection]
        );
    }

    #[test]
    fn sell_direction_rules() {
        let flags = validate(&rec(Action::Sell, Some(100.0), Some(110.0), Some(95.0)));
        assert_eq!(
            flags,
            vec![FlagReason::IllogicalSlSell, FlagReason::TargetWrongDirection]
        );
    }

    #[test]
    fn stop_equal_to_entry() {
        let flags = validate(&rec(Action::Buy, Some(100.0), Some(110.0), Some(100.0)));
        assert_eq!(flags, vec![FlagReason::SlEqualsEntry]);
    }

    #[test]
    fn risk_more_than_twice_reward() {
        // risk 30, reward 10
        let buy = validate(&rec(Action::Buy, Some(100.0), Some(110.0), Some(70.0)));
        assert_eq!(buy, vec![FlagReason::HighRiskRatio]);
        // risk exactly 2x is tolerated
        let edge = validate(&rec(Action::Buy, Some(100.0), Some(110.0), Some(80.0)));
        assert!(edge.is_empty());
        let sell = validate(&rec(Action::Sell, Some(100.0), Some(95.0), Some(120.0)));
        assert_eq!(sell, vec![FlagReason::HighRiskRatio]);
    }

    #[test]
    fn missing_and_zero_levels_are_flagged() {
        let flags = validate(&rec(Action::Buy, None, Some(0.0), Some(f64::NAN)));
        assert_eq!(
            flags,
            vec![
                FlagReason::MissingEntry,
                FlagReason::MissingTarget,
                FlagReason::MissingSl
            ]
        );
    }

    #[test]
    fn target_direction_checked_without_stop() {
        let flags = validate(&rec(Action::Sell, Some(100.0), Some(120.0), None));
        assert_eq!(
            flags,
            vec![FlagReason::MissingSl, FlagReason::TargetWrongDirection]
        );
    }

    #[test]
    fn hold_only_gets_missing_and_equality_flags() {
        let flags = validate(&rec(Action::Hold, Some(100.0), Some(50.0), Some(100.0)));
        assert_eq!(flags, vec![FlagReason::SlEqualsEntry]);
    }

    #[test]
    fn validation_is_idempotent() {
        let r = rec(Action::Buy, Some(100.0), Some(90.0), Some(130.0));
        assert_eq!(validate(&r), validate(&r));
    }
}
