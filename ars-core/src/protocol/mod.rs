//! Narrator control-tag protocol.
//!
//! The narrator embeds directives in its prose as `[KEYWORD: payload]`. One
//! keyword table drives both consumers: the incremental [`Scanner`] used while
//! a turn streams in, and [`extract_tags`], which runs the same scanner over a
//! finished turn to get the authoritative tag list.

pub mod scanner;

pub use scanner::{Scanner, TagFilter, TagToken, Token, DEFAULT_MAX_TAG_LEN};

use crate::dice::DiceExpression;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use tracing::warn;

/// Largest `ZEIT_VERGEHT` payload accepted, about a year.
pub const MAX_ADVANCE_HOURS: f32 = 8760.0;

/// Errors raised while decoding a recognised tag's payload.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TagError {
    #[error("Malformed {keyword} payload: {payload:?}")]
    MalformedPayload { keyword: Keyword, payload: String },

    #[error("Invalid FAKT JSON {payload:?}: {reason}")]
    InvalidJson { payload: String, reason: String },
}

/// Shape of a keyword's payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadShape {
    /// `name | integer`
    NameTarget,
    /// `NdM` or an integer literal.
    Amount,
    /// Non-negative integer.
    Integer,
    /// Free text, must not be empty.
    Text,
    /// A single JSON object literal.
    JsonObject,
    /// `name | state`
    NameState,
    /// Hours, optionally suffixed with `h`.
    Hours,
    /// `HH:MM`
    ClockTime,
    /// A single word.
    Word,
}

/// Recognised tag keywords. Matching is case-insensitive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Keyword {
    Probe,
    HpVerlust,
    HpHeilung,
    StabilitaetVerlust,
    FertigkeitGenutzt,
    XpGewinn,
    Fakt,
    Inventar,
    ZeitVergeht,
    Tageszeit,
    Wetter,
    Wuerfelergebnis,
    Stimme,
}

impl Keyword {
    pub const ALL: [Keyword; 13] = [
        Keyword::Probe,
        Keyword::HpVerlust,
        Keyword::HpHeilung,
        Keyword::StabilitaetVerlust,
        Keyword::FertigkeitGenutzt,
        Keyword::XpGewinn,
        Keyword::Fakt,
        Keyword::Inventar,
        Keyword::ZeitVergeht,
        Keyword::Tageszeit,
        Keyword::Wetter,
        Keyword::Wuerfelergebnis,
        Keyword::Stimme,
    ];

    /// Wire spelling.
    pub fn as_str(self) -> &'static str {
        match self {
            Keyword::Probe => "PROBE",
            Keyword::HpVerlust => "HP_VERLUST",
            Keyword::HpHeilung => "HP_HEILUNG",
            Keyword::StabilitaetVerlust => "STABILITAET_VERLUST",
            Keyword::FertigkeitGenutzt => "FERTIGKEIT_GENUTZT",
            Keyword::XpGewinn => "XP_GEWINN",
            Keyword::Fakt => "FAKT",
            Keyword::Inventar => "INVENTAR",
            Keyword::ZeitVergeht => "ZEIT_VERGEHT",
            Keyword::Tageszeit => "TAGESZEIT",
            Keyword::Wetter => "WETTER",
            Keyword::Wuerfelergebnis => "WUERFELERGEBNIS",
            Keyword::Stimme => "STIMME",
        }
    }

    pub fn shape(self) -> PayloadShape {
        match self {
            Keyword::Probe => PayloadShape::NameTarget,
            Keyword::HpVerlust | Keyword::HpHeilung | Keyword::StabilitaetVerlust => {
                PayloadShape::Amount
            }
            Keyword::XpGewinn => PayloadShape::Integer,
            Keyword::FertigkeitGenutzt | Keyword::Wetter | Keyword::Wuerfelergebnis => {
                PayloadShape::Text
            }
            Keyword::Fakt => PayloadShape::JsonObject,
            Keyword::Inventar => PayloadShape::NameState,
            Keyword::ZeitVergeht => PayloadShape::Hours,
            Keyword::Tageszeit => PayloadShape::ClockTime,
            Keyword::Stimme => PayloadShape::Word,
        }
    }

    /// Case-insensitive lookup by wire spelling.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|k| k.as_str().eq_ignore_ascii_case(name))
    }
}

impl fmt::Display for Keyword {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which vital a stat tag addresses; the ruleset maps it to a stat name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatTarget {
    Health,
    Sanity,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeltaMode {
    Loss,
    Heal,
}

impl DeltaMode {
    /// Sign applied to the rolled amount.
    pub fn sign(self) -> i32 {
        match self {
            DeltaMode::Loss => -1,
            DeltaMode::Heal => 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InventoryState {
    Found,
    Lost,
    Done,
}

impl InventoryState {
    pub fn parse(word: &str) -> Option<Self> {
        match word.trim().to_lowercase().as_str() {
            "gefunden" | "found" => Some(InventoryState::Found),
            "verloren" | "lost" => Some(InventoryState::Lost),
            "erledigt" | "done" => Some(InventoryState::Done),
            _ => None,
        }
    }
}

/// A decoded control tag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ControlTag {
    Probe {
        skill: String,
        target: i32,
    },
    StatDelta {
        stat: StatTarget,
        expr: String,
        mode: DeltaMode,
    },
    SkillUsed {
        name: String,
    },
    XpGain {
        amount: u32,
    },
    Fact {
        facts: serde_json::Map<String, serde_json::Value>,
    },
    InventoryEvent {
        name: String,
        state: InventoryState,
    },
    VoiceSwitch {
        role: String,
    },
    TimeAdvance {
        hours: f32,
    },
    TimeSet {
        hour: u8,
        minute: u8,
    },
    WeatherSet {
        text: String,
    },
    /// A roll result echoed back by the narrator. Recognised, never applied.
    RollEcho {
        text: String,
    },
}

impl ControlTag {
    /// Decode a payload according to the keyword's shape.
    pub fn decode(keyword: Keyword, payload: &str) -> Result<Self, TagError> {
        let payload = payload.trim();
        let malformed = || TagError::MalformedPayload {
            keyword,
            payload: payload.to_string(),
        };
        if payload.is_empty() {
            return Err(malformed());
        }

        match keyword.shape() {
            PayloadShape::NameTarget => {
                let (skill, target) = split_pair(payload).ok_or_else(malformed)?;
                let target: u32 = target.parse().map_err(|_| malformed())?;
                Ok(ControlTag::Probe {
                    skill: skill.to_string(),
                    target: i32::try_from(target).map_err(|_| malformed())?,
                })
            }
            PayloadShape::Amount => {
                let expr = DiceExpression::parse(payload).map_err(|_| malformed())?;
                let (stat, mode) = match keyword {
                    Keyword::HpHeilung => (StatTarget::Health, DeltaMode::Heal),
                    Keyword::StabilitaetVerlust => (StatTarget::Sanity, DeltaMode::Loss),
                    _ => (StatTarget::Health, DeltaMode::Loss),
                };
                Ok(ControlTag::StatDelta {
                    stat,
                    expr: expr.to_string(),
                    mode,
                })
            }
            PayloadShape::Integer => Ok(ControlTag::XpGain {
                amount: payload.parse().map_err(|_| malformed())?,
            }),
            PayloadShape::Text => {
                let text = payload.to_string();
                Ok(match keyword {
                    Keyword::FertigkeitGenutzt => ControlTag::SkillUsed { name: text },
                    Keyword::Wetter => ControlTag::WeatherSet { text },
                    _ => ControlTag::RollEcho { text },
                })
            }
            PayloadShape::JsonObject => {
                let value: serde_json::Value =
                    serde_json::from_str(payload).map_err(|e| TagError::InvalidJson {
                        payload: payload.to_string(),
                        reason: e.to_string(),
                    })?;
                match value {
                    serde_json::Value::Object(facts) => Ok(ControlTag::Fact { facts }),
                    _ => Err(TagError::InvalidJson {
                        payload: payload.to_string(),
                        reason: "expected a JSON object".to_string(),
                    }),
                }
            }
            PayloadShape::NameState => {
                let (name, state) = split_pair(payload).ok_or_else(malformed)?;
                Ok(ControlTag::InventoryEvent {
                    name: name.to_string(),
                    state: InventoryState::parse(state).ok_or_else(malformed)?,
                })
            }
            PayloadShape::Hours => {
                let number = payload
                    .strip_suffix(&['h', 'H'][..])
                    .unwrap_or(payload)
                    .trim();
                let hours: f32 = number.parse().map_err(|_| malformed())?;
                if !hours.is_finite() || !(0.0..=MAX_ADVANCE_HOURS).contains(&hours) {
                    return Err(malformed());
                }
                Ok(ControlTag::TimeAdvance { hours })
            }
            PayloadShape::ClockTime => {
                let (hour, minute) = payload.split_once(':').ok_or_else(malformed)?;
                let hour: u8 = hour.trim().parse().map_err(|_| malformed())?;
                let minute: u8 = minute.trim().parse().map_err(|_| malformed())?;
                if hour >= 24 || minute >= 60 {
                    return Err(malformed());
                }
                Ok(ControlTag::TimeSet { hour, minute })
            }
            PayloadShape::Word => {
                if !payload.chars().all(|c| c.is_alphanumeric() || c == '_') {
                    return Err(malformed());
                }
                Ok(ControlTag::VoiceSwitch {
                    role: payload.to_lowercase(),
                })
            }
        }
    }

    /// Position in the effect application order; lower applies first.
    pub fn apply_rank(&self) -> u8 {
        match self {
            ControlTag::Probe { .. } => 0,
            ControlTag::StatDelta { .. } => 1,
            ControlTag::SkillUsed { .. } | ControlTag::XpGain { .. } => 2,
            ControlTag::Fact { .. } => 3,
            ControlTag::InventoryEvent { .. }
            | ControlTag::TimeAdvance { .. }
            | ControlTag::TimeSet { .. }
            | ControlTag::WeatherSet { .. }
            | ControlTag::VoiceSwitch { .. }
            | ControlTag::RollEcho { .. } => 4,
        }
    }
}

/// Split `left | right`, both sides trimmed and non-empty.
fn split_pair(payload: &str) -> Option<(&str, &str)> {
    let (left, right) = payload.split_once('|')?;
    let (left, right) = (left.trim(), right.trim());
    if left.is_empty() || right.is_empty() {
        return None;
    }
    Some((left, right))
}

/// Decode every recognised tag in a scanned token list, dropping malformed
/// ones with a warning.
pub fn decode_tokens<'a>(tokens: impl IntoIterator<Item = &'a TagToken>) -> Vec<ControlTag> {
    tokens
        .into_iter()
        .filter_map(|token| match token.decode() {
            Ok(tag) => Some(tag),
            Err(e) => {
                warn!(raw = %token.raw, error = %e, "dropping malformed control tag");
                None
            }
        })
        .collect()
}

/// Batch mode: all well-formed tags of a complete text, in order.
pub fn extract_tags(text: &str, max_tag_len: usize) -> Vec<ControlTag> {
    let tokens = Scanner::with_max_len(max_tag_len).scan_all(text);
    decode_tokens(tokens.iter().filter_map(Token::as_tag))
}

/// Narrative part of a complete text with every recognised tag removed.
pub fn strip_tags(text: &str, max_tag_len: usize) -> String {
    Scanner::with_max_len(max_tag_len)
        .scan_all(text)
        .iter()
        .filter_map(Token::as_narrative)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn decode(keyword: Keyword, payload: &str) -> ControlTag {
        ControlTag::decode(keyword, payload).unwrap()
    }

    #[test]
    fn test_keyword_lookup_is_case_insensitive() {
        assert_eq!(Keyword::from_name("probe"), Some(Keyword::Probe));
        assert_eq!(
            Keyword::from_name("Stabilitaet_Verlust"),
            Some(Keyword::StabilitaetVerlust)
        );
        assert_eq!(Keyword::from_name("WETTE"), None);
    }

    #[test]
    fn test_decode_probe() {
        assert_eq!(
            decode(Keyword::Probe, " Bibliotheksnutzung | 60 "),
            ControlTag::Probe {
                skill: "Bibliotheksnutzung".to_string(),
                target: 60
            }
        );
        assert!(ControlTag::decode(Keyword::Probe, "Horchen | viel").is_err());
        assert!(ControlTag::decode(Keyword::Probe, "Horchen").is_err());
        assert!(ControlTag::decode(Keyword::Probe, " | 40").is_err());
    }

    #[test]
    fn test_decode_stat_deltas() {
        assert_eq!(
            decode(Keyword::StabilitaetVerlust, "1D6"),
            ControlTag::StatDelta {
                stat: StatTarget::Sanity,
                expr: "1d6".to_string(),
                mode: DeltaMode::Loss
            }
        );
        assert_eq!(
            decode(Keyword::HpHeilung, "2"),
            ControlTag::StatDelta {
                stat: StatTarget::Health,
                expr: "2".to_string(),
                mode: DeltaMode::Heal
            }
        );
        assert!(ControlTag::decode(Keyword::HpVerlust, "etwas").is_err());
    }

    #[test]
    fn test_decode_fact() {
        let tag = decode(Keyword::Fakt, r#"{"krypta_betreten": true, "npc": "Ada"}"#);
        let ControlTag::Fact { facts } = tag else {
            panic!("expected fact");
        };
        assert_eq!(facts["krypta_betreten"], json!(true));
        assert_eq!(facts["npc"], json!("Ada"));

        assert!(matches!(
            ControlTag::decode(Keyword::Fakt, "{kaputt"),
            Err(TagError::InvalidJson { .. })
        ));
        assert!(matches!(
            ControlTag::decode(Keyword::Fakt, "[1, 2]"),
            Err(TagError::InvalidJson { .. })
        ));
    }

    #[test]
    fn test_decode_inventory() {
        assert_eq!(
            decode(Keyword::Inventar, "Alte Laterne | gefunden"),
            ControlTag::InventoryEvent {
                name: "Alte Laterne".to_string(),
                state: InventoryState::Found
            }
        );
        assert_eq!(
            decode(Keyword::Inventar, "Brief | DONE"),
            ControlTag::InventoryEvent {
                name: "Brief".to_string(),
                state: InventoryState::Done
            }
        );
        assert!(ControlTag::decode(Keyword::Inventar, "Brief | zerrissen").is_err());
    }

    #[test]
    fn test_decode_time() {
        assert_eq!(
            decode(Keyword::ZeitVergeht, "2h"),
            ControlTag::TimeAdvance { hours: 2.0 }
        );
        assert_eq!(
            decode(Keyword::ZeitVergeht, "1.5 h"),
            ControlTag::TimeAdvance { hours: 1.5 }
        );
        assert_eq!(
            decode(Keyword::ZeitVergeht, "3"),
            ControlTag::TimeAdvance { hours: 3.0 }
        );
        assert!(ControlTag::decode(Keyword::ZeitVergeht, "-1h").is_err());
        assert!(ControlTag::decode(Keyword::ZeitVergeht, "lange").is_err());
        assert!(ControlTag::decode(Keyword::ZeitVergeht, "100000000h").is_err());
        assert_eq!(
            decode(Keyword::ZeitVergeht, "8760h"),
            ControlTag::TimeAdvance { hours: 8760.0 }
        );

        assert_eq!(
            decode(Keyword::Tageszeit, "23:05"),
            ControlTag::TimeSet {
                hour: 23,
                minute: 5
            }
        );
        assert!(ControlTag::decode(Keyword::Tageszeit, "24:00").is_err());
        assert!(ControlTag::decode(Keyword::Tageszeit, "12:60").is_err());
        assert!(ControlTag::decode(Keyword::Tageszeit, "mittags").is_err());
    }

    #[test]
    fn test_decode_voice() {
        assert_eq!(
            decode(Keyword::Stimme, "Keeper"),
            ControlTag::VoiceSwitch {
                role: "keeper".to_string()
            }
        );
        assert!(ControlTag::decode(Keyword::Stimme, "alte frau").is_err());
    }

    #[test]
    fn test_empty_payload_is_malformed() {
        for keyword in Keyword::ALL {
            assert!(ControlTag::decode(keyword, "   ").is_err(), "{keyword}");
        }
    }

    #[test]
    fn test_extract_tags_in_order() {
        let text = "Du betrittst die Krypta. [STABILITAET_VERLUST: 1d6] \
                    [FAKT: {\"krypta_betreten\": true}]";
        let tags = extract_tags(text, DEFAULT_MAX_TAG_LEN);
        assert_eq!(tags.len(), 2);
        assert!(matches!(
            tags[0],
            ControlTag::StatDelta {
                stat: StatTarget::Sanity,
                mode: DeltaMode::Loss,
                ..
            }
        ));
        assert!(matches!(tags[1], ControlTag::Fact { .. }));
    }

    #[test]
    fn test_extract_drops_malformed() {
        let text = "[PROBE: Horchen | viel] [XP_GEWINN: 5] [FAKT: {oops}]";
        let tags = extract_tags(text, DEFAULT_MAX_TAG_LEN);
        assert_eq!(tags, vec![ControlTag::XpGain { amount: 5 }]);
    }

    #[test]
    fn test_strip_tags() {
        let text = "Es regnet. [WETTER: Starkregen]Die Tür knarrt. [Notiz]";
        assert_eq!(
            strip_tags(text, DEFAULT_MAX_TAG_LEN),
            "Es regnet. Die Tür knarrt. [Notiz]"
        );
    }

    #[test]
    fn test_apply_rank_order() {
        let probe = ControlTag::Probe {
            skill: "Horchen".into(),
            target: 40,
        };
        let weather = ControlTag::WeatherSet { text: "Nebel".into() };
        let fact = ControlTag::Fact {
            facts: serde_json::Map::new(),
        };
        assert!(probe.apply_rank() < fact.apply_rank());
        assert!(fact.apply_rank() < weather.apply_rank());
    }
}
