//! Character vitals and skills.

use crate::ruleset::{Ruleset, Vitals};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CharacterError {
    #[error("Unknown stat: {0}")]
    UnknownStat(String),

    #[error("Unknown skill: {0}")]
    UnknownSkill(String),
}

/// A bounded stat. `0 <= current <= max` holds for every stored value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "RawStatValue")]
pub struct StatValue {
    pub current: i32,
    pub max: i32,
}

/// Stored shape of a [`StatValue`], clamped on load.
#[derive(Deserialize)]
struct RawStatValue {
    current: i32,
    max: i32,
}

impl From<RawStatValue> for StatValue {
    fn from(raw: RawStatValue) -> Self {
        StatValue::new(raw.current, raw.max)
    }
}

impl StatValue {
    pub fn new(current: i32, max: i32) -> Self {
        let max = max.max(0);
        Self {
            current: current.clamp(0, max),
            max,
        }
    }
}

/// Stat name to bounded value.
pub type CharacterStats = BTreeMap<String, StatValue>;

/// Outcome of [`CharacterState::apply_delta`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatChange {
    pub stat: String,
    pub old: i32,
    pub new: i32,
    pub max: i32,
    /// The unclamped amount asked for.
    pub requested: i32,
    pub clamped_to_max: bool,
    pub clamped_to_zero: bool,
}

impl StatChange {
    pub fn delta(&self) -> i32 {
        self.new - self.old
    }
}

/// A prepared character, as shipped alongside a ruleset.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CharacterTemplate {
    pub name: String,
    #[serde(default)]
    pub archetype: String,
    #[serde(default)]
    pub characteristics: BTreeMap<String, i32>,
    #[serde(default)]
    pub derived_stats: BTreeMap<String, i32>,
    /// Overrides on top of the ruleset's base values.
    #[serde(default)]
    pub skills: BTreeMap<String, i32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CharacterState {
    pub name: String,
    #[serde(default)]
    pub archetype: String,
    stats: CharacterStats,
    characteristics: BTreeMap<String, i32>,
    skills: BTreeMap<String, i32>,
    skills_used: BTreeSet<String>,
    xp: u32,
    vitals: Vitals,
}

impl CharacterState {
    /// A character with no stats or skills.
    pub fn new(name: impl Into<String>, vitals: Vitals) -> Self {
        Self {
            name: name.into(),
            archetype: String::new(),
            stats: BTreeMap::new(),
            characteristics: BTreeMap::new(),
            skills: BTreeMap::new(),
            skills_used: BTreeSet::new(),
            xp: 0,
            vitals,
        }
    }

    pub fn with_stat(mut self, name: &str, current: i32, max: i32) -> Self {
        self.set_stat(name, current, max);
        self
    }

    pub fn with_skill(mut self, name: impl Into<String>, value: i32) -> Self {
        self.skills.insert(name.into(), value);
        self
    }

    /// Default character with average characteristics for the ruleset.
    pub fn from_ruleset(ruleset: &Ruleset) -> Self {
        let mut character = Self::new(ruleset.character_title.clone(), ruleset.vitals.clone());
        character.characteristics = ruleset
            .characteristics
            .iter()
            .map(|(name, c)| (name.clone(), c.average()))
            .collect();
        character.skills = ruleset.skills.clone();

        let con = character.characteristic("CON").unwrap_or(65);
        let siz = character.characteristic("SIZ").unwrap_or(65);
        let pow = character.characteristic("POW").unwrap_or(65);

        let hp = (con + siz) / 10;
        let health = ruleset.vitals.health.clone();
        character.set_stat(&health, hp, hp);
        if ruleset.has_sanity {
            let sanity = ruleset.vitals.sanity.clone();
            character.set_stat(&sanity, pow, pow.min(99));
        }
        if ruleset.derived_stats.contains("MP") {
            character.set_stat("MP", pow / 5, pow / 5);
        }

        info!(name = %character.name, status = %character.status_line(), "created default character");
        character
    }

    /// Character from a prepared template; HP 10/10 if the template has none.
    pub fn from_template(ruleset: &Ruleset, template: &CharacterTemplate) -> Self {
        let mut character = Self::new(template.name.clone(), ruleset.vitals.clone());
        character.archetype = template.archetype.clone();
        character.characteristics = template.characteristics.clone();

        for (name, value) in &template.derived_stats {
            character.set_stat(name, *value, *value);
        }
        let health = ruleset.vitals.health.clone();
        if character.stat(&health).is_none() {
            character.set_stat(&health, 10, 10);
        }

        character.skills = ruleset.skills.clone();
        for (name, value) in &template.skills {
            character.skills.insert(name.clone(), *value);
        }

        info!(name = %character.name, archetype = %character.archetype, "created character from template");
        character
    }

    fn set_stat(&mut self, name: &str, current: i32, max: i32) {
        self.stats
            .insert(name.to_uppercase(), StatValue::new(current, max));
    }

    pub fn stat(&self, name: &str) -> Option<StatValue> {
        self.stats.get(&name.to_uppercase()).copied()
    }

    pub fn stats(&self) -> &CharacterStats {
        &self.stats
    }

    pub fn characteristic(&self, name: &str) -> Option<i32> {
        self.characteristics.get(name).copied()
    }

    pub fn skills(&self) -> &BTreeMap<String, i32> {
        &self.skills
    }

    pub fn skills_used(&self) -> &BTreeSet<String> {
        &self.skills_used
    }

    pub fn xp(&self) -> u32 {
        self.xp
    }

    pub fn vitals(&self) -> &Vitals {
        &self.vitals
    }

    /// Change a stat by `amount`, clamping the result to `[0, max]`.
    pub fn apply_delta(&mut self, stat: &str, amount: i32) -> Result<StatChange, CharacterError> {
        let key = stat.to_uppercase();
        let value = self
            .stats
            .get_mut(&key)
            .ok_or_else(|| CharacterError::UnknownStat(stat.to_string()))?;

        let old = value.current;
        let unclamped = old.saturating_add(amount);
        let new = unclamped.clamp(0, value.max);
        value.current = new;

        debug!(stat = %key, old, new, amount, "stat changed");
        Ok(StatChange {
            stat: key,
            old,
            new,
            max: value.max,
            requested: amount,
            clamped_to_max: unclamped > value.max,
            clamped_to_zero: unclamped < 0,
        })
    }

    /// Resolve a skill name against the known skills.
    pub fn find_skill(&self, name: &str) -> Option<&str> {
        let wanted = normalize_skill(name);
        if wanted.is_empty() {
            return None;
        }
        self.skills
            .keys()
            .find(|known| normalize_skill(known) == wanted)
            .map(String::as_str)
    }

    pub fn skill_value(&self, name: &str) -> Option<i32> {
        self.find_skill(name).and_then(|k| self.skills.get(k).copied())
    }

    /// Mark a skill for improvement. Returns the canonical skill name.
    pub fn mark_skill_used(&mut self, name: &str) -> Result<String, CharacterError> {
        let canonical = self
            .find_skill(name)
            .map(str::to_string)
            .ok_or_else(|| CharacterError::UnknownSkill(name.to_string()))?;
        self.skills_used.insert(canonical.clone());
        Ok(canonical)
    }

    /// Add experience, returning the new total.
    pub fn add_xp(&mut self, amount: u32) -> u32 {
        self.xp = self.xp.saturating_add(amount);
        self.xp
    }

    pub fn is_incapacitated(&self) -> bool {
        self.stat(&self.vitals.incapacitated)
            .is_some_and(|s| s.current == 0)
    }

    pub fn is_broken(&self) -> bool {
        self.stat(&self.vitals.broken).is_some_and(|s| s.current == 0)
    }

    /// Compact status, e.g. `HP: 13/13 | SAN: 60/65 | MP: 13/13`.
    pub fn status_line(&self) -> String {
        let health = self.vitals.health.to_uppercase();
        let sanity = self.vitals.sanity.to_uppercase();
        let mut order = vec![health.as_str(), sanity.as_str()];
        order.extend(
            self.stats
                .keys()
                .map(String::as_str)
                .filter(|k| *k != health && *k != sanity),
        );
        order.dedup();

        let mut parts: Vec<String> = order
            .into_iter()
            .filter_map(|key| {
                self.stats
                    .get(key)
                    .map(|s| format!("{key}: {}/{}", s.current, s.max))
            })
            .collect();
        if !self.skills_used.is_empty() {
            parts.push(format!("Fertigkeiten markiert: {}", self.skills_used.len()));
        }
        parts.join(" | ")
    }
}

/// Lowercase, fold German umlauts and drop everything but letters and digits.
pub fn normalize_skill(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for c in name.chars().flat_map(char::to_lowercase) {
        match c {
            'ä' => out.push_str("ae"),
            'ö' => out.push_str("oe"),
            'ü' => out.push_str("ue"),
            'ß' => out.push_str("ss"),
            c if c.is_alphanumeric() => out.push(c),
            _ => {}
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ruleset::Ruleset;

    fn investigator() -> CharacterState {
        CharacterState::new("Ada", Vitals::default())
            .with_stat("HP", 11, 13)
            .with_stat("SAN", 60, 65)
            .with_skill("Bibliotheksnutzung", 60)
            .with_skill("Verborgenes erkennen", 50)
            .with_skill("Schlösser öffnen", 20)
    }

    #[test]
    fn test_apply_delta() {
        let mut c = investigator();
        let change = c.apply_delta("san", -4).unwrap();
        assert_eq!((change.old, change.new), (60, 56));
        assert_eq!(change.stat, "SAN");
        assert!(!change.clamped_to_max && !change.clamped_to_zero);
        assert_eq!(c.stat("SAN").unwrap().current, 56);
    }

    #[test]
    fn test_apply_delta_clamps() {
        let mut c = investigator();
        let heal = c.apply_delta("HP", 10).unwrap();
        assert_eq!(heal.new, 13);
        assert!(heal.clamped_to_max);
        assert_eq!(heal.delta(), 2);

        let hit = c.apply_delta("HP", -100).unwrap();
        assert_eq!(hit.new, 0);
        assert!(hit.clamped_to_zero);

        let again = c.apply_delta("HP", -3).unwrap();
        assert_eq!((again.old, again.new), (0, 0));
    }

    #[test]
    fn test_status_line_with_lowercase_vitals() {
        let vitals = Vitals {
            health: "lp".to_string(),
            sanity: "sta".to_string(),
            incapacitated: "lp".to_string(),
            broken: "sta".to_string(),
        };
        let c = CharacterState::new("Ada", vitals)
            .with_stat("MP", 2, 2)
            .with_stat("sta", 3, 4)
            .with_stat("lp", 5, 9);
        assert_eq!(c.status_line(), "LP: 5/9 | STA: 3/4 | MP: 2/2");
    }

    #[test]
    fn test_stat_value_is_clamped_on_load() {
        let value: StatValue = serde_json::from_str(r#"{"current": 80, "max": 65}"#).unwrap();
        assert_eq!(value, StatValue::new(65, 65));
        let value: StatValue = serde_json::from_str(r#"{"current": -3, "max": 10}"#).unwrap();
        assert_eq!(value.current, 0);
    }

    #[test]
    fn test_unknown_stat_is_error_not_panic() {
        let mut c = investigator();
        assert_eq!(
            c.apply_delta("Glück", -5),
            Err(CharacterError::UnknownStat("Glück".to_string()))
        );
    }

    #[test]
    fn test_skill_matching() {
        let mut c = investigator();
        assert_eq!(c.mark_skill_used("bibliotheksnutzung").unwrap(), "Bibliotheksnutzung");
        assert_eq!(
            c.mark_skill_used("Schloesser Oeffnen").unwrap(),
            "Schlösser öffnen"
        );
        assert_eq!(c.mark_skill_used("verborgenes-erkennen").unwrap(), "Verborgenes erkennen");
        assert_eq!(
            c.mark_skill_used("Fliegen"),
            Err(CharacterError::UnknownSkill("Fliegen".to_string()))
        );
        assert_eq!(c.skills_used().len(), 3);
        assert_eq!(c.skill_value("BIBLIOTHEKSNUTZUNG"), Some(60));
    }

    #[test]
    fn test_normalize_skill() {
        assert_eq!(normalize_skill("Schlösser öffnen"), "schloesseroeffnen");
        assert_eq!(normalize_skill("Straße"), "strasse");
        assert_eq!(normalize_skill("  --  "), "");
    }

    #[test]
    fn test_predicates() {
        let mut c = investigator();
        assert!(!c.is_incapacitated());
        c.apply_delta("HP", -20).unwrap();
        assert!(c.is_incapacitated());
        assert!(!c.is_broken());
        c.apply_delta("SAN", -99).unwrap();
        assert!(c.is_broken());
    }

    #[test]
    fn test_status_line() {
        let mut c = investigator().with_stat("MP", 13, 13);
        c.mark_skill_used("Bibliotheksnutzung").unwrap();
        c.mark_skill_used("Verborgenes erkennen").unwrap();
        assert_eq!(
            c.status_line(),
            "HP: 11/13 | SAN: 60/65 | MP: 13/13 | Fertigkeiten markiert: 2"
        );
    }

    #[test]
    fn test_stat_value_invariant() {
        let v = StatValue::new(120, 99);
        assert_eq!((v.current, v.max), (99, 99));
        let v = StatValue::new(-3, 10);
        assert_eq!(v.current, 0);
    }

    #[test]
    fn test_from_ruleset() {
        let ruleset = Ruleset::from_json_str(
            r#"{
                "dice_system": {"default_die": "d100"},
                "characteristics": {
                    "CON": {"roll": "3d6", "multiplier": 5},
                    "SIZ": {"roll": "2d6+6", "multiplier": 5},
                    "POW": {"roll": "3d6", "multiplier": 5}
                },
                "skills": {"Horchen": {"base": 20}},
                "derived_stats": {"MP": "POW/5"},
                "sanity": {}
            }"#,
        )
        .unwrap();
        let c = CharacterState::from_ruleset(&ruleset);
        // CON 50, SIZ 65, POW 50
        assert_eq!(c.stat("HP"), Some(StatValue::new(11, 11)));
        assert_eq!(c.stat("SAN"), Some(StatValue::new(50, 50)));
        assert_eq!(c.stat("MP"), Some(StatValue::new(10, 10)));
        assert_eq!(c.skill_value("horchen"), Some(20));
    }

    #[test]
    fn test_from_template() {
        let ruleset = Ruleset {
            skills: [("Horchen".to_string(), 20), ("Erste Hilfe".to_string(), 30)]
                .into_iter()
                .collect(),
            ..Ruleset::default()
        };
        let template = CharacterTemplate {
            name: "Harvey Walters".to_string(),
            archetype: "Journalist".to_string(),
            derived_stats: [("SAN".to_string(), 45)].into_iter().collect(),
            skills: [("Horchen".to_string(), 55)].into_iter().collect(),
            ..Default::default()
        };
        let c = CharacterState::from_template(&ruleset, &template);
        assert_eq!(c.name, "Harvey Walters");
        assert_eq!(c.stat("HP"), Some(StatValue::new(10, 10)));
        assert_eq!(c.stat("SAN"), Some(StatValue::new(45, 45)));
        assert_eq!(c.skill_value("Horchen"), Some(55));
        assert_eq!(c.skill_value("Erste Hilfe"), Some(30));
    }
}
