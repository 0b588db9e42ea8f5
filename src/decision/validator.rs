//! Constraint normalization and validation for parsed decisions.
//!
//! A decision that fails validation is downgraded to a `wait` carrying the
//! diagnostic; the rest of the batch proceeds.

use tracing::warn;

use crate::domain::{Decision, DecisionAction};

use super::context::TradingLimits;

/// Minimum reward/risk ratio accepted on opening decisions.
const MIN_RISK_REWARD: f64 = 3.0;
/// Entry approximation: 20% into the SL->TP range on the near-SL side.
const ENTRY_RANGE_FRACTION: f64 = 0.2;
/// Tolerance on the equity-multiple size fallback for float slack.
const SIZE_TOLERANCE_FRACTION: f64 = 0.01;

/// Clamp `position_size_usd` on opening decisions into the configured
/// bounds, appending a note to the reasoning when adjusted.
pub fn normalize_decisions(decisions: &mut [Decision], limits: &TradingLimits) {
    for d in decisions.iter_mut() {
        if !d.action.is_open() {
            continue;
        }
        if limits.min_position_size_usd > 0.0
            && d.position_size_usd > 0.0
            && d.position_size_usd < limits.min_position_size_usd
        {
            d.position_size_usd = limits.min_position_size_usd;
            d.reasoning
                .push_str(" | size raised to the configured minimum");
        }
        if limits.max_position_size_usd > 0.0 && d.position_size_usd > limits.max_position_size_usd
        {
            d.position_size_usd = limits.max_position_size_usd;
            d.reasoning
                .push_str(" | size clamped to the configured maximum");
        }
    }
}

/// Validate a single decision against the account and policy limits.
pub fn validate_decision(
    d: &Decision,
    account_equity: f64,
    limits: &TradingLimits,
) -> std::result::Result<(), String> {
    if d.action == DecisionAction::Unknown {
        return Err("unrecognized action".to_string());
    }

    if !d.action.is_open() {
        return Ok(());
    }

    // Leverage within [1, cap] for the symbol class
    let cap = limits.leverage_cap(&d.symbol);
    if d.leverage < 1 || d.leverage > cap {
        return Err(format!(
            "leverage must be within 1-{cap} for {} (got {})",
            d.symbol, d.leverage
        ));
    }

    if d.position_size_usd <= 0.0 {
        return Err(format!(
            "position size must be positive (got {:.2})",
            d.position_size_usd
        ));
    }

    if limits.min_position_size_usd > 0.0 && d.position_size_usd < limits.min_position_size_usd {
        return Err(format!(
            "position size {:.2} below the {:.2} USDT minimum",
            d.position_size_usd, limits.min_position_size_usd
        ));
    }

    if limits.max_position_size_usd > 0.0 {
        if d.position_size_usd > limits.max_position_size_usd {
            return Err(format!(
                "position size {:.2} above the {:.2} USDT maximum",
                d.position_size_usd, limits.max_position_size_usd
            ));
        }
    } else {
        // Equity-multiple fallback, with 1% tolerance for float slack
        let max_value = account_equity * limits.size_multiple(&d.symbol);
        let tolerance = max_value * SIZE_TOLERANCE_FRACTION;
        if d.position_size_usd > max_value + tolerance {
            return Err(format!(
                "position value {:.0} exceeds the {:.0} USDT cap for {}",
                d.position_size_usd, max_value, d.symbol
            ));
        }
    }

    if d.stop_loss <= 0.0 || d.take_profit <= 0.0 {
        return Err("stop loss and take profit must both be positive".to_string());
    }

    // Directional bracket ordering
    match d.action {
        DecisionAction::OpenLong if d.stop_loss >= d.take_profit => {
            return Err(format!(
                "long bracket inverted: stop loss {:.2} must sit below take profit {:.2}",
                d.stop_loss, d.take_profit
            ));
        }
        DecisionAction::OpenShort if d.stop_loss <= d.take_profit => {
            return Err(format!(
                "short bracket inverted: stop loss {:.2} must sit above take profit {:.2}",
                d.stop_loss, d.take_profit
            ));
        }
        _ => {}
    }

    // Reward/risk with the entry approximated 20% into the SL->TP range
    let rr = risk_reward_ratio(d);
    if rr < MIN_RISK_REWARD {
        return Err(format!(
            "risk/reward {rr:.2}:1 below the required {MIN_RISK_REWARD:.1}:1 [sl {:.2} tp {:.2}]",
            d.stop_loss, d.take_profit
        ));
    }

    Ok(())
}

/// Reward/risk ratio under the 20%-into-the-range entry approximation.
///
/// This heuristic is part of the prompt contract; real execution price may
/// differ, but the model is committed to the same formula.
pub(crate) fn risk_reward_ratio(d: &Decision) -> f64 {
    let (entry, risk, reward) = match d.action {
        DecisionAction::OpenLong => {
            let entry = d.stop_loss + (d.take_profit - d.stop_loss) * ENTRY_RANGE_FRACTION;
            (entry, entry - d.stop_loss, d.take_profit - entry)
        }
        DecisionAction::OpenShort => {
            let entry = d.stop_loss - (d.stop_loss - d.take_profit) * ENTRY_RANGE_FRACTION;
            (entry, d.stop_loss - entry, entry - d.take_profit)
        }
        _ => return 0.0,
    };
    if entry <= 0.0 || risk <= 0.0 {
        return 0.0;
    }
    reward / risk
}

/// Normalize then validate a batch. Failing decisions degrade to `wait`
/// with the diagnostic as reasoning; surviving decisions pass unchanged.
pub fn vet_decisions(
    mut decisions: Vec<Decision>,
    account_equity: f64,
    limits: &TradingLimits,
) -> Vec<Decision> {
    normalize_decisions(&mut decisions, limits);

    decisions
        .into_iter()
        .map(|d| match validate_decision(&d, account_equity, limits) {
            Ok(()) => d,
            Err(reason) => {
                warn!(symbol = %d.symbol, action = %d.action, %reason, "decision rejected");
                Decision::wait(d.symbol.clone(), format!("rejected: {reason}"))
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limits() -> TradingLimits {
        TradingLimits {
            btc_eth_leverage: 20,
            altcoin_leverage: 5,
            ..Default::default()
        }
    }

    fn open_long(symbol: &str, sl: f64, tp: f64) -> Decision {
        Decision {
            symbol: symbol.into(),
            action: DecisionAction::OpenLong,
            leverage: 5,
            position_size_usd: 500.0,
            stop_loss: sl,
            take_profit: tp,
            confidence: 80,
            risk_usd: None,
            reasoning: "test".into(),
        }
    }

    fn open_short(symbol: &str, sl: f64, tp: f64) -> Decision {
        Decision {
            action: DecisionAction::OpenShort,
            ..open_long(symbol, sl, tp)
        }
    }

    #[test]
    fn rr_boundary_accepts_four_to_one_long() {
        // entry = 100000 + 900*0.2 = 100180; risk 180, reward 720 -> RR 4.0
        let d = open_long("BTCUSDT", 100_000.0, 100_900.0);
        let rr = risk_reward_ratio(&d);
        assert!((rr - 4.0).abs() < 1e-9);
        assert!(validate_decision(&d, 10_000.0, &limits()).is_ok());
    }

    #[test]
    fn rr_formula_is_scale_free_for_ordered_brackets() {
        // With the entry pinned 20% into the SL->TP range, reward/risk is
        // 0.8/0.2 = 4.0 for every correctly ordered bracket regardless of
        // width, so the RR gate binds only through bracket ordering.
        for (sl, tp) in [(100_000.0, 100_900.0), (100_000.0, 100_200.0), (1.0, 1.01)] {
            let rr = risk_reward_ratio(&open_long("BTCUSDT", sl, tp));
            assert!((rr - 4.0).abs() < 1e-6, "sl {sl} tp {tp} -> {rr}");
        }
        let rr = risk_reward_ratio(&open_short("ETHUSDT", 3928.18, 3772.58));
        assert!((rr - 4.0).abs() < 1e-6);
    }

    #[test]
    fn inverted_long_bracket_is_rejected_before_rr() {
        let d = open_long("BTCUSDT", 100_900.0, 100_000.0);
        let err = validate_decision(&d, 10_000.0, &limits()).unwrap_err();
        assert!(err.contains("long bracket inverted"), "{err}");
    }

    #[test]
    fn short_direction_literals() {
        // Accepted: sl 3928.18 above tp 3772.58 (entry approx 3897.06)
        let good = open_short("ETHUSDT", 3928.18, 3772.58);
        assert!(validate_decision(&good, 10_000.0, &limits()).is_ok());

        // Swapped: wrong direction for a short
        let bad = open_short("ETHUSDT", 3772.58, 3928.18);
        let err = validate_decision(&bad, 10_000.0, &limits()).unwrap_err();
        assert!(err.contains("short bracket inverted"), "{err}");
    }

    #[test]
    fn leverage_cap_literals() {
        let mut d = open_long("SOLUSDT", 100.0, 200.0);
        d.leverage = 25;
        let err = validate_decision(&d, 10_000.0, &limits()).unwrap_err();
        assert!(err.contains("1-5"), "{err}");

        d.leverage = 5;
        assert!(validate_decision(&d, 10_000.0, &limits()).is_ok());

        let mut btc = open_long("BTCUSDT", 100.0, 200.0);
        btc.leverage = 20;
        assert!(validate_decision(&btc, 10_000.0, &limits()).is_ok());
    }

    #[test]
    fn size_clamp_appends_reasoning_note() {
        let bounded = TradingLimits {
            max_position_size_usd: 150.0,
            ..limits()
        };
        let mut batch = vec![open_long("BTCUSDT", 100.0, 200.0)];
        batch[0].position_size_usd = 500.0;

        normalize_decisions(&mut batch, &bounded);
        assert_eq!(batch[0].position_size_usd, 150.0);
        assert!(batch[0].reasoning.contains("clamped to the configured maximum"));
    }

    #[test]
    fn equity_multiple_fallback_with_tolerance() {
        let l = limits(); // no USD bounds configured
        let mut d = open_long("SOLUSDT", 100.0, 200.0);

        // altcoin cap = 1.5 * 1000 = 1500, +1% tolerance
        d.position_size_usd = 1510.0;
        assert!(validate_decision(&d, 1000.0, &l).is_ok());

        d.position_size_usd = 1600.0;
        assert!(validate_decision(&d, 1000.0, &l).is_err());

        // majors get the 10x multiple
        let mut btc = open_long("BTCUSDT", 100.0, 200.0);
        btc.leverage = 10;
        btc.position_size_usd = 9000.0;
        assert!(validate_decision(&btc, 1000.0, &l).is_ok());
    }

    #[test]
    fn close_and_wait_need_no_open_fields() {
        let d = Decision::wait("BTCUSDT", "sitting out");
        assert!(validate_decision(&d, 1000.0, &limits()).is_ok());

        let close = Decision {
            action: DecisionAction::CloseShort,
            ..Decision::wait("BTCUSDT", "cover")
        };
        assert!(validate_decision(&close, 1000.0, &limits()).is_ok());
    }

    #[test]
    fn unknown_action_is_rejected() {
        let d = Decision {
            action: DecisionAction::Unknown,
            ..Decision::wait("BTCUSDT", "???")
        };
        assert!(validate_decision(&d, 1000.0, &limits()).is_err());
    }

    #[test]
    fn vet_downgrades_failures_to_wait_and_keeps_survivors() {
        let mut bad = open_long("SOLUSDT", 100.0, 200.0);
        bad.leverage = 25; // over the altcoin cap

        let good = open_short("ETHUSDT", 3928.18, 3772.58);

        let vetted = vet_decisions(vec![bad, good], 10_000.0, &limits());
        assert_eq!(vetted.len(), 2);
        assert_eq!(vetted[0].action, DecisionAction::Wait);
        assert!(vetted[0].reasoning.starts_with("rejected:"));
        assert_eq!(vetted[1].action, DecisionAction::OpenShort);
    }

    #[test]
    fn missing_bracket_prices_are_rejected() {
        let mut d = open_long("BTCUSDT", 0.0, 0.0);
        d.stop_loss = 0.0;
        d.take_profit = 0.0;
        let err = validate_decision(&d, 10_000.0, &limits()).unwrap_err();
        assert!(err.contains("must both be positive"));
    }
}
