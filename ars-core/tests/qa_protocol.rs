//! QA tests for the control-tag protocol and the dice engine.
//!
//! Covers the streaming/batch agreement of the scanner, the round-trip
//! property and grading totality of skill checks.
//!
//! Run with: `cargo test -p ars-core --test qa_protocol`

use ars_core::dice::{
    DiceConfig, DiceEngine, DiceExpression, SuccessLevel, FALLBACK_EXPRESSION_VALUE,
};
use ars_core::protocol::{
    extract_tags, strip_tags, ControlTag, DeltaMode, Scanner, StatTarget, TagFilter, Token,
    DEFAULT_MAX_TAG_LEN,
};
use ars_core::world::GameClock;
use proptest::prelude::*;
use rand::rngs::mock::StepRng;
use serde_json::json;

/// Feed `text` to a scanner in the given char-boundary chunks.
fn stream(text: &str, cuts: &[usize]) -> Vec<Token> {
    let chars: Vec<char> = text.chars().collect();
    let mut bounds: Vec<usize> = cuts.iter().map(|c| c % (chars.len() + 1)).collect();
    bounds.push(0);
    bounds.push(chars.len());
    bounds.sort_unstable();
    bounds.dedup();

    let mut scanner = Scanner::new();
    let mut tokens = Vec::new();
    for pair in bounds.windows(2) {
        let fragment: String = chars[pair[0]..pair[1]].iter().collect();
        tokens.extend(scanner.push(&fragment));
    }
    tokens.extend(scanner.finish());
    tokens
}

fn streamed_tags(tokens: &[Token]) -> Vec<ControlTag> {
    tokens
        .iter()
        .filter_map(Token::as_tag)
        .filter_map(|t| t.decode().ok())
        .collect()
}

// =============================================================================
// SCENARIOS
// =============================================================================

#[test]
fn test_krypta_decode() {
    let text = "Du betrittst die Krypta. [STABILITAET_VERLUST: 1d6] [FAKT: {\"krypta_betreten\": true}]";

    let tokens = Scanner::new().scan_all(text);
    let narrative: String = tokens.iter().filter_map(Token::as_narrative).collect();
    assert_eq!(narrative, "Du betrittst die Krypta.  ");
    assert_eq!(strip_tags(text, DEFAULT_MAX_TAG_LEN).trim_end(), "Du betrittst die Krypta.");
    assert_eq!(tokens[0], Token::Narrative("Du betrittst die Krypta. ".to_string()));

    let tags = extract_tags(text, DEFAULT_MAX_TAG_LEN);
    assert_eq!(
        tags,
        vec![
            ControlTag::StatDelta {
                stat: StatTarget::Sanity,
                expr: "1d6".to_string(),
                mode: DeltaMode::Loss,
            },
            ControlTag::Fact {
                facts: json!({"krypta_betreten": true}).as_object().cloned().unwrap(),
            },
        ]
    );
}

#[test]
fn test_unterminated_bracket_is_narrative() {
    let text = "Der Raum ist kalt. [WETTE";

    for cuts in [vec![], vec![3], vec![19, 21], vec![24]] {
        let tokens = stream(text, &cuts);
        assert!(tokens.iter().all(|t| t.as_tag().is_none()), "cuts {cuts:?}");
        let narrative: String = tokens.iter().filter_map(Token::as_narrative).collect();
        assert_eq!(narrative, text);
    }
    assert!(extract_tags(text, DEFAULT_MAX_TAG_LEN).is_empty());
}

#[test]
fn test_tag_split_across_many_fragments() {
    let fragments = ["Er fl", "uestert. [STI", "MME: ", "fluestern]Komm na", "eher."];
    let mut voices = Vec::new();
    let narrative: Vec<String> = TagFilter::new(fragments.iter().copied())
        .on_voice(|role| voices.push(role.to_string()))
        .collect();

    assert_eq!(narrative.concat(), "Er fluestert. Komm naeher.");
    assert_eq!(voices, vec!["fluestern"]);
}

#[test]
fn test_malformed_payloads_are_dropped() {
    let text = "[PROBE: Schleichen | viel] [FAKT: {kaputt] [XP_GEWINN: 5] [TAGESZEIT: 25:00]";
    assert_eq!(
        extract_tags(text, DEFAULT_MAX_TAG_LEN),
        vec![ControlTag::XpGain { amount: 5 }]
    );
}

#[test]
fn test_keywords_are_case_insensitive() {
    let tags = extract_tags("[probe: Horchen | 45] [Wetter: Nebel]", DEFAULT_MAX_TAG_LEN);
    assert_eq!(
        tags,
        vec![
            ControlTag::Probe {
                skill: "Horchen".to_string(),
                target: 45,
            },
            ControlTag::WeatherSet {
                text: "Nebel".to_string(),
            },
        ]
    );
}

#[test]
fn test_forced_critical() {
    let mut dice = DiceEngine::with_rng(DiceConfig::default(), StepRng::new(0, 0));
    let result = dice.skill_check(50, 0);
    assert_eq!(result.roll, 1);
    assert_eq!(result.level, SuccessLevel::Critical);
    assert!(result.success);

    // Regardless of target
    let result = dice.skill_check(1, 0);
    assert_eq!(result.level, SuccessLevel::Critical);
}

// =============================================================================
// PROPERTIES
// =============================================================================

fn piece() -> impl Strategy<Value = String> {
    prop_oneof![
        "[a-zA-Z äöü.,!]{0,12}",
        Just("[PROBE: Horchen | 40]".to_string()),
        Just("[HP_VERLUST: 1d4]".to_string()),
        Just("[FAKT: {\"a\": 1}]".to_string()),
        Just("[STIMME: erzaehler]".to_string()),
        Just("[WETTE".to_string()),
        Just("[".to_string()),
        Just("]".to_string()),
        Just("[WETTER: Regen".to_string()),
        Just("[Notiz] ".to_string()),
    ]
}

fn text() -> impl Strategy<Value = String> {
    prop::collection::vec(piece(), 0..12).prop_map(|pieces| pieces.concat())
}

proptest! {
    #[test]
    fn prop_round_trip(text in text(), cuts in prop::collection::vec(0usize..200, 0..8)) {
        let tokens = stream(&text, &cuts);
        let rebuilt: String = tokens.iter().map(Token::raw).collect();
        prop_assert_eq!(rebuilt, text);
    }

    #[test]
    fn prop_streaming_agrees_with_batch(text in text(), cuts in prop::collection::vec(0usize..200, 0..8)) {
        let tokens = stream(&text, &cuts);
        prop_assert_eq!(streamed_tags(&tokens), extract_tags(&text, DEFAULT_MAX_TAG_LEN));

        let narrative: String = tokens.iter().filter_map(Token::as_narrative).collect();
        prop_assert_eq!(narrative, strip_tags(&text, DEFAULT_MAX_TAG_LEN));
    }

    #[test]
    fn prop_dice_evaluation_total(roll in 1u32..=100, target in 1u32..=100) {
        let dice = DiceEngine::new(DiceConfig::default());
        let level = dice.evaluate(roll, target);
        prop_assert!(SuccessLevel::ALL.contains(&level));

        if roll >= 96 {
            prop_assert_eq!(level, SuccessLevel::Fumble);
        } else if roll == 1 {
            prop_assert_eq!(level, SuccessLevel::Critical);
        } else if roll > target {
            prop_assert_eq!(level, SuccessLevel::Failure);
        } else {
            prop_assert!(level.is_success());
        }
    }

    #[test]
    fn prop_dice_expressions_never_overflow(count in any::<u32>(), faces in any::<u32>(), flat in any::<u32>()) {
        let mut dice = DiceEngine::new(DiceConfig::default());

        let notation = format!("{count}d{faces}");
        let value = dice.evaluate_expression(&notation);
        match DiceExpression::parse(&notation) {
            Ok(_) => {
                let (low, high) = (i64::from(count), i64::from(count) * i64::from(faces));
                prop_assert!((low..=high).contains(&i64::from(value)));
            }
            Err(_) => prop_assert_eq!(value, FALLBACK_EXPRESSION_VALUE),
        }

        let value = dice.evaluate_expression(&flat.to_string());
        if DiceExpression::parse(&flat.to_string()).is_ok() {
            prop_assert_eq!(i64::from(value), i64::from(flat));
        } else {
            prop_assert_eq!(value, FALLBACK_EXPRESSION_VALUE);
        }
        prop_assert!(value >= 0);
    }

    #[test]
    fn prop_huge_loss_tags_are_dropped_or_negative(amount in any::<u64>()) {
        let text = format!("[HP_VERLUST: {amount}]");
        let mut dice = DiceEngine::new(DiceConfig::default());
        for tag in extract_tags(&text, DEFAULT_MAX_TAG_LEN) {
            if let ControlTag::StatDelta { expr, mode, .. } = tag {
                let delta = dice.evaluate_expression(&expr).saturating_mul(mode.sign());
                prop_assert!(delta <= 0);
            }
        }
    }

    #[test]
    fn prop_clock_advance_never_panics(hours in 0f32..1.0e12, day in any::<u32>()) {
        let mut clock = GameClock::new(day, 23, 59);
        clock.advance_hours(hours);
        prop_assert!(clock.day >= day.max(1));
        prop_assert!(clock.hour < 24 && clock.minute < 60);
    }

    #[test]
    fn prop_skill_check_in_range(target in -50i32..200, modifier in -2i32..=2, seed in any::<u64>()) {
        use rand::SeedableRng;
        let mut dice = DiceEngine::with_rng(DiceConfig::default(), rand::rngs::StdRng::seed_from_u64(seed));
        let result = dice.skill_check(target, modifier);
        prop_assert!((1..=100).contains(&result.roll));
        prop_assert!((1..=100).contains(&result.target));
        prop_assert_eq!(result.raw_rolls.len(), 1 + modifier.unsigned_abs() as usize);
        prop_assert_eq!(result.success, result.level.is_success());
    }
}
