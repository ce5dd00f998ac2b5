//! Ruleset configuration.
//!
//! A ruleset arrives as a loosely-shaped JSON document ([`RulesetFile`]) and is
//! validated exactly once into a typed [`Ruleset`]. Everything downstream
//! (dice engine, character derivation, stat tags) reads the validated form.

use crate::dice::{DiceConfig, DiceExpression};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use thiserror::Error;
use tracing::info;

/// Errors raised while loading or validating a ruleset.
#[derive(Debug, Error)]
pub enum RulesetError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid default die: {0:?}")]
    InvalidDie(String),

    #[error("Check die needs at least 2 faces, got {0}")]
    TooFewFaces(u32),

    #[error("Threshold '{name}' = {value} outside 1..={faces}")]
    ThresholdOutOfRange {
        name: &'static str,
        value: u32,
        faces: u32,
    },

    #[error("Critical threshold {critical} must be below fumble threshold {fumble}")]
    CriticalNotBelowFumble { critical: u32, fumble: u32 },

    #[error("Fraction '{name}' = {value} outside (0, 1]")]
    FractionOutOfRange { name: &'static str, value: f64 },

    #[error("Extreme fraction {extreme} exceeds hard fraction {hard}")]
    ExtremeAboveHard { extreme: f64, hard: f64 },

    #[error("Invalid roll formula for characteristic '{name}': {roll:?}")]
    InvalidCharacteristic { name: String, roll: String },
}

// ============================================================================
// Raw file shape
// ============================================================================

/// Ruleset document as found on disk.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RulesetFile {
    #[serde(default)]
    pub metadata: MetadataFile,
    pub dice_system: DiceSystemFile,
    #[serde(default)]
    pub characteristics: BTreeMap<String, CharacteristicFile>,
    #[serde(default)]
    pub skills: BTreeMap<String, SkillFile>,
    #[serde(default)]
    pub derived_stats: BTreeMap<String, serde_json::Value>,
    /// Presence of this section enables the sanity stat.
    #[serde(default)]
    pub sanity: Option<serde_json::Value>,
    #[serde(default)]
    pub vitals: VitalsFile,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetadataFile {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub system: String,
    #[serde(default)]
    pub player_character_title: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DiceSystemFile {
    pub default_die: String,
    #[serde(default)]
    pub success_levels: SuccessLevelsFile,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SuccessLevelsFile {
    pub critical: Option<u32>,
    pub fumble: Option<u32>,
    pub extreme: Option<f64>,
    pub hard: Option<f64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CharacteristicFile {
    /// Roll formula such as `3d6`, `2d6+6` or a flat `50`.
    #[serde(default)]
    pub roll: Option<String>,
    #[serde(default)]
    pub multiplier: Option<i32>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SkillFile {
    /// Base value; non-numeric bases (e.g. "half DEX") count as 0.
    #[serde(default)]
    pub base: serde_json::Value,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VitalsFile {
    pub health: Option<String>,
    pub sanity: Option<String>,
    pub incapacitated: Option<String>,
    pub broken: Option<String>,
}

// ============================================================================
// Validated configuration
// ============================================================================

/// Average-able roll formula for a characteristic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Characteristic {
    pub count: u32,
    pub faces: u32,
    pub bonus: i32,
    pub multiplier: i32,
}

impl Characteristic {
    /// Expected value of the formula, scaled by the multiplier.
    pub fn average(&self) -> i32 {
        let avg = if self.faces == 0 {
            self.bonus
        } else {
            (self.count * (self.faces + 1) / 2) as i32 + self.bonus
        };
        avg * self.multiplier
    }

    fn parse(name: &str, roll: &str, multiplier: i32) -> Result<Self, RulesetError> {
        let invalid = || RulesetError::InvalidCharacteristic {
            name: name.to_string(),
            roll: roll.to_string(),
        };

        let (dice_part, bonus) = match roll.split_once('+') {
            Some((dice, bonus)) => (dice, bonus.trim().parse::<i32>().map_err(|_| invalid())?),
            None => (roll, 0),
        };

        match DiceExpression::parse(dice_part).map_err(|_| invalid())? {
            DiceExpression::Dice { count, faces } => Ok(Self {
                count,
                faces,
                bonus,
                multiplier,
            }),
            DiceExpression::Flat(value) => Ok(Self {
                count: 0,
                faces: 0,
                bonus: value as i32 + bonus,
                multiplier,
            }),
        }
    }
}

/// Which stats the protocol and the derived predicates address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vitals {
    /// Stat targeted by `HP_VERLUST` / `HP_HEILUNG`.
    pub health: String,
    /// Stat targeted by `STABILITAET_VERLUST`.
    pub sanity: String,
    /// Stat whose zero value means incapacitated.
    pub incapacitated: String,
    /// Stat whose zero value means broken.
    pub broken: String,
}

impl Default for Vitals {
    fn default() -> Self {
        Self {
            health: "HP".to_string(),
            sanity: "SAN".to_string(),
            incapacitated: "HP".to_string(),
            broken: "SAN".to_string(),
        }
    }
}

/// A validated ruleset, immutable for the lifetime of a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ruleset {
    pub name: String,
    pub system: String,
    pub character_title: String,
    pub die: String,
    pub dice: DiceConfig,
    pub characteristics: BTreeMap<String, Characteristic>,
    /// Skill name to base value.
    pub skills: BTreeMap<String, i32>,
    pub derived_stats: BTreeSet<String>,
    pub has_sanity: bool,
    pub vitals: Vitals,
}

impl Default for Ruleset {
    fn default() -> Self {
        Self {
            name: "Standard".to_string(),
            system: "standard".to_string(),
            character_title: "Charakter".to_string(),
            die: "d100".to_string(),
            dice: DiceConfig::default(),
            characteristics: BTreeMap::new(),
            skills: BTreeMap::new(),
            derived_stats: BTreeSet::new(),
            has_sanity: true,
            vitals: Vitals::default(),
        }
    }
}

impl Ruleset {
    /// Validate a raw ruleset document.
    pub fn from_file(file: RulesetFile) -> Result<Self, RulesetError> {
        let dice = validate_dice(&file.dice_system)?;

        let mut characteristics = BTreeMap::new();
        for (name, def) in &file.characteristics {
            let roll = def.roll.as_deref().unwrap_or("3d6");
            let multiplier = def.multiplier.unwrap_or(5);
            characteristics.insert(name.clone(), Characteristic::parse(name, roll, multiplier)?);
        }

        let skills = file
            .skills
            .iter()
            .map(|(name, def)| {
                let base = def.base.as_f64().map(|b| b as i32).unwrap_or(0);
                (name.clone(), base)
            })
            .collect();

        let defaults = Vitals::default();
        let vitals = Vitals {
            health: file.vitals.health.unwrap_or(defaults.health),
            sanity: file.vitals.sanity.unwrap_or(defaults.sanity),
            incapacitated: file.vitals.incapacitated.unwrap_or(defaults.incapacitated),
            broken: file.vitals.broken.unwrap_or(defaults.broken),
        };

        let ruleset = Self {
            name: file.metadata.name,
            system: file.metadata.system,
            character_title: file
                .metadata
                .player_character_title
                .unwrap_or_else(|| "Charakter".to_string()),
            die: file.dice_system.default_die,
            dice,
            characteristics,
            skills,
            derived_stats: file.derived_stats.into_keys().collect(),
            has_sanity: file.sanity.is_some(),
            vitals,
        };

        info!(
            name = %ruleset.name,
            die = %ruleset.die,
            skills = ruleset.skills.len(),
            "ruleset validated"
        );
        Ok(ruleset)
    }

    pub fn from_json_str(json: &str) -> Result<Self, RulesetError> {
        Self::from_file(serde_json::from_str(json)?)
    }

    /// Read and validate a ruleset JSON file.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, RulesetError> {
        let json = tokio::fs::read_to_string(path).await?;
        Self::from_json_str(&json)
    }
}

fn validate_dice(system: &DiceSystemFile) -> Result<DiceConfig, RulesetError> {
    let faces = match DiceExpression::parse(&system.default_die) {
        Ok(DiceExpression::Dice { count: 1, faces }) => faces,
        _ => return Err(RulesetError::InvalidDie(system.default_die.clone())),
    };
    if faces < 2 {
        return Err(RulesetError::TooFewFaces(faces));
    }

    let defaults = DiceConfig::default();
    let levels = &system.success_levels;
    let config = DiceConfig {
        faces,
        critical: levels.critical.unwrap_or(defaults.critical),
        fumble: levels.fumble.unwrap_or(defaults.fumble),
        extreme_fraction: levels.extreme.unwrap_or(defaults.extreme_fraction),
        hard_fraction: levels.hard.unwrap_or(defaults.hard_fraction),
    };

    for (name, value) in [("critical", config.critical), ("fumble", config.fumble)] {
        if value < 1 || value > faces {
            return Err(RulesetError::ThresholdOutOfRange { name, value, faces });
        }
    }
    if config.critical >= config.fumble {
        return Err(RulesetError::CriticalNotBelowFumble {
            critical: config.critical,
            fumble: config.fumble,
        });
    }
    for (name, value) in [
        ("extreme", config.extreme_fraction),
        ("hard", config.hard_fraction),
    ] {
        if !(value > 0.0 && value <= 1.0) {
            return Err(RulesetError::FractionOutOfRange { name, value });
        }
    }
    if config.extreme_fraction > config.hard_fraction {
        return Err(RulesetError::ExtremeAboveHard {
            extreme: config.extreme_fraction,
            hard: config.hard_fraction,
        });
    }

    Ok(config)
}
