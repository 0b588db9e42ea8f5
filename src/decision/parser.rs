//! Tolerant extraction of decisions from free-form model output.
//!
//! The contract with the model is only this: somewhere in the response there
//! is a JSON array of objects carrying `symbol`/`action`, and everything
//! before it is chain-of-thought prose. Anything else — scalar arrays,
//! arithmetic in numeric fields, smart quotes, truncation — is worked
//! around, and total failure degrades to a synthetic `wait`.

use regex::Regex;
use std::sync::OnceLock;

use crate::domain::Decision;

/// Parsed model response: chain-of-thought plus the decision batch.
#[derive(Debug, Clone)]
pub struct ParsedResponse {
    pub cot_trace: String,
    pub decisions: Vec<Decision>,
}

/// Numeric fields whose values may arrive as arithmetic expressions.
/// An expression is truncated to its leading number.
fn arithmetic_fixer() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r#"("(?:risk_usd|position_size_usd|stop_loss|take_profit|leverage|confidence)"\s*:\s*)([0-9][0-9.]*)\s*([*+\-/\s()0-9.]+?)(\s*[,}\]\n])"#,
        )
        .expect("arithmetic fixer regex is valid")
    })
}

/// Parse a raw model response. Never fails: when no usable decision array is
/// found, the result is a single synthetic `wait` with a diagnostic reason.
pub fn parse_response(raw: &str) -> ParsedResponse {
    let text = replace_smart_quotes(raw);

    let mut search_start = 0;
    while let Some(rel) = text[search_start..].find('[') {
        let array_start = search_start + rel;
        let Some(array_end) = find_matching_bracket(&text, array_start) else {
            search_start = array_start + 1;
            continue;
        };

        let candidate = text[array_start..=array_end].trim();

        // Skip arrays that are clearly not decision arrays (price lists etc).
        if !candidate.contains("\"symbol\"") && !candidate.contains("\"action\"") {
            search_start = array_end + 1;
            continue;
        }

        let fixed = fix_arithmetic_expressions(candidate);
        if let Ok(decisions) = serde_json::from_str::<Vec<Decision>>(&fixed) {
            if decisions.first().is_some_and(|d| !d.symbol.is_empty()) {
                return ParsedResponse {
                    cot_trace: cot_before(&text, array_start),
                    decisions,
                };
            }
        }

        search_start = array_end + 1;
    }

    ParsedResponse {
        cot_trace: text.trim().to_string(),
        decisions: vec![Decision::wait(
            "",
            "model response contained no valid decision array",
        )],
    }
}

/// The chain-of-thought trace is everything before the accepted array.
fn cot_before(text: &str, array_start: usize) -> String {
    text[..array_start].trim().to_string()
}

fn replace_smart_quotes(text: &str) -> String {
    text.replace(['\u{201c}', '\u{201d}'], "\"")
        .replace(['\u{2018}', '\u{2019}'], "'")
}

/// Find the `]` matching the `[` at `start`, tracking nesting depth.
fn find_matching_bracket(text: &str, start: usize) -> Option<usize> {
    let bytes = text.as_bytes();
    if bytes.get(start) != Some(&b'[') {
        return None;
    }
    let mut depth = 0usize;
    for (i, &b) in bytes.iter().enumerate().skip(start) {
        match b {
            b'[' => depth += 1,
            b']' => {
                depth -= 1;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }
    None
}

/// Truncate arithmetic expressions in known numeric fields to their leading
/// number: `"risk_usd": 150 * (0.62 - 0.61) * 5` becomes `"risk_usd": 150`.
fn fix_arithmetic_expressions(json: &str) -> String {
    arithmetic_fixer()
        .replace_all(json, |caps: &regex::Captures<'_>| {
            let expression = &caps[3];
            if expression.contains(['*', '+', '-', '/', '(', ')']) {
                format!("{}{}{}", &caps[1], &caps[2], &caps[4])
            } else {
                caps[0].to_string()
            }
        })
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::DecisionAction;

    #[test]
    fn extracts_trailing_array_after_cot() {
        let raw = r#"Market looks weak, BTC losing momentum.

[{"symbol": "BTCUSDT", "action": "open_short", "leverage": 10, "position_size_usd": 500, "stop_loss": 103000, "take_profit": 97000, "confidence": 80, "reasoning": "downtrend"}]"#;

        let parsed = parse_response(raw);
        assert_eq!(parsed.decisions.len(), 1);
        assert_eq!(parsed.decisions[0].action, DecisionAction::OpenShort);
        assert_eq!(parsed.decisions[0].stop_loss, 103_000.0);
        assert!(parsed.cot_trace.starts_with("Market looks weak"));
        assert!(!parsed.cot_trace.contains("open_short"));
    }

    #[test]
    fn picks_decision_array_over_price_array() {
        let raw = r#"Recent closes: [100000, 100100, 100200]
Decision follows.
[{"symbol":"BTCUSDT","action":"wait","reasoning":"x"}]"#;

        let parsed = parse_response(raw);
        assert_eq!(parsed.decisions.len(), 1);
        assert_eq!(parsed.decisions[0].symbol, "BTCUSDT");
        assert_eq!(parsed.decisions[0].action, DecisionAction::Wait);
    }

    #[test]
    fn truncates_arithmetic_expression_to_leading_number() {
        let raw = r#"[{"symbol":"OPUSDT","action":"open_long","leverage":5,"position_size_usd":100,"stop_loss":0.61,"take_profit":0.65,"confidence":80,"risk_usd": 150 * (0.62 - 0.61) * 5,"reasoning":"x"}]"#;

        let parsed = parse_response(raw);
        assert_eq!(parsed.decisions[0].risk_usd, Some(150.0));
    }

    #[test]
    fn smart_quotes_are_normalized() {
        let raw = "[{\u{201c}symbol\u{201d}: \u{201c}BTCUSDT\u{201d}, \u{201c}action\u{201d}: \u{201c}hold\u{201d}, \u{201c}reasoning\u{201d}: \u{201c}ok\u{201d}}]";
        let parsed = parse_response(raw);
        assert_eq!(parsed.decisions[0].symbol, "BTCUSDT");
        assert_eq!(parsed.decisions[0].action, DecisionAction::Hold);
    }

    #[test]
    fn garbage_degrades_to_synthetic_wait() {
        let parsed = parse_response("the model rambled and produced no JSON at all");
        assert_eq!(parsed.decisions.len(), 1);
        assert_eq!(parsed.decisions[0].action, DecisionAction::Wait);
        assert!(parsed.decisions[0].reasoning.contains("no valid decision array"));
    }

    #[test]
    fn unclosed_array_degrades_to_synthetic_wait() {
        let raw = r#"analysis... [{"symbol":"BTCUSDT","action":"wait","reasoning":"truncated"#;
        let parsed = parse_response(raw);
        assert_eq!(parsed.decisions.len(), 1);
        assert_eq!(parsed.decisions[0].action, DecisionAction::Wait);
    }

    #[test]
    fn empty_symbol_in_first_object_is_rejected() {
        let raw = r#"[{"symbol":"","action":"wait","reasoning":"?"}]"#;
        let parsed = parse_response(raw);
        // Falls through to the synthetic wait
        assert!(parsed.decisions[0].reasoning.contains("no valid decision array"));
    }

    #[test]
    fn nested_brackets_inside_array_are_matched() {
        let raw = r#"[{"symbol":"BTCUSDT","action":"wait","reasoning":"levels [100, 200] hold"}]"#;
        let parsed = parse_response(raw);
        assert_eq!(parsed.decisions[0].symbol, "BTCUSDT");
    }

    #[test]
    fn serialize_then_parse_is_identity_for_wellformed_batches() {
        let decisions = vec![
            Decision {
                symbol: "BTCUSDT".into(),
                action: DecisionAction::OpenLong,
                leverage: 10,
                position_size_usd: 500.0,
                stop_loss: 95_000.0,
                take_profit: 110_000.0,
                confidence: 82,
                risk_usd: Some(120.0),
                reasoning: "trend continuation".into(),
            },
            Decision::wait("ETHUSDT", "no edge"),
        ];

        let rendered = format!(
            "Some analysis first.\n{}",
            serde_json::to_string(&decisions).unwrap()
        );
        let parsed = parse_response(&rendered);
        assert_eq!(parsed.decisions, decisions);
    }

    #[test]
    fn multiple_objects_parse_in_order() {
        let raw = r#"[
            {"symbol":"BTCUSDT","action":"close_long","reasoning":"tp"},
            {"symbol":"ETHUSDT","action":"wait","reasoning":"chop"}
        ]"#;
        let parsed = parse_response(raw);
        assert_eq!(parsed.decisions.len(), 2);
        assert_eq!(parsed.decisions[0].symbol, "BTCUSDT");
        assert_eq!(parsed.decisions[1].symbol, "ETHUSDT");
    }
}
