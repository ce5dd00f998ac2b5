//! Dice rolling and skill-check evaluation.
//!
//! Skill checks are roll-under: one die of the ruleset's size (d100 for the
//! default ruleset) against a target value, graded into success levels whose
//! thresholds come from the active ruleset. Damage and sanity-loss amounts use
//! a minimal expression grammar: `NdM` or a bare integer.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use tracing::{debug, warn};

/// Value substituted when a narrator-supplied dice expression cannot be parsed.
pub const FALLBACK_EXPRESSION_VALUE: i32 = 1;

/// Upper bound on dice in a single expression.
const MAX_DICE: u32 = 1000;

/// Upper bound on die faces and on flat amounts.
const MAX_VALUE: u32 = 10_000;

/// Error type for dice parsing.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DiceError {
    #[error("Invalid dice notation: {0}")]
    InvalidNotation(String),
    #[error("Invalid die size: {0}")]
    InvalidDieSize(u32),
    #[error("Too many dice: {0} (max {MAX_DICE})")]
    TooManyDice(u32),
    #[error("Amount too large: {0} (max {MAX_VALUE})")]
    AmountTooLarge(u32),
}

/// Graded outcome of a skill check.
///
/// Variants are declared in rank order, so `Ord` gives
/// `Fumble < Failure < Regular < Hard < Extreme < Critical`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum SuccessLevel {
    Fumble,
    Failure,
    Regular,
    Hard,
    Extreme,
    Critical,
}

impl SuccessLevel {
    pub const ALL: [SuccessLevel; 6] = [
        SuccessLevel::Fumble,
        SuccessLevel::Failure,
        SuccessLevel::Regular,
        SuccessLevel::Hard,
        SuccessLevel::Extreme,
        SuccessLevel::Critical,
    ];

    pub fn is_success(self) -> bool {
        !matches!(self, SuccessLevel::Fumble | SuccessLevel::Failure)
    }

    /// Machine name, matching the serde representation.
    pub fn as_str(self) -> &'static str {
        match self {
            SuccessLevel::Fumble => "fumble",
            SuccessLevel::Failure => "failure",
            SuccessLevel::Regular => "regular",
            SuccessLevel::Hard => "hard",
            SuccessLevel::Extreme => "extreme",
            SuccessLevel::Critical => "critical",
        }
    }

    /// Label used in narrator-facing text.
    pub fn label(self) -> &'static str {
        match self {
            SuccessLevel::Fumble => "PATZER",
            SuccessLevel::Failure => "Misserfolg",
            SuccessLevel::Regular => "Regulärer Erfolg",
            SuccessLevel::Hard => "Harter Erfolg",
            SuccessLevel::Extreme => "Extremer Erfolg",
            SuccessLevel::Critical => "Kritischer Erfolg",
        }
    }
}

impl fmt::Display for SuccessLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Dice parameters of the active ruleset.
///
/// Built by [`crate::ruleset::Ruleset`] after validation; the engine itself
/// carries no ruleset-specific numbers beyond these defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiceConfig {
    /// Faces of the check die.
    pub faces: u32,
    /// Rolls at or below this value are critical.
    pub critical: u32,
    /// Rolls at or above this value are fumbles.
    pub fumble: u32,
    /// Fraction of the target at or below which a success is extreme.
    pub extreme_fraction: f64,
    /// Fraction of the target at or below which a success is hard.
    pub hard_fraction: f64,
}

impl Default for DiceConfig {
    fn default() -> Self {
        Self {
            faces: 100,
            critical: 1,
            fumble: 96,
            extreme_fraction: 0.2,
            hard_fraction: 0.5,
        }
    }
}

/// Result of a single skill check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RollResult {
    /// The kept roll.
    pub roll: u32,
    /// Effective target after clamping to the die range.
    pub target: u32,
    pub level: SuccessLevel,
    pub success: bool,
    /// Every die thrown, including discarded bonus/penalty dice.
    pub raw_rolls: Vec<u32>,
}

impl RollResult {
    /// One-line description for logs and the presentation layer.
    pub fn describe(&self) -> String {
        let outcome = if self.success { "[OK]" } else { "[!!]" };
        format!(
            "Wurf: {} | Ziel: {} | {} {}",
            self.roll,
            self.target,
            outcome,
            self.level.label()
        )
    }

    /// The message handed back to the narrator after a probe.
    pub fn wire_text(&self, skill: &str) -> String {
        format!(
            "[WUERFELERGEBNIS: {} | Wurf: {} | Ziel: {} | {}]",
            skill,
            self.roll,
            self.target,
            self.level.label()
        )
    }
}

impl fmt::Display for RollResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.describe())
    }
}

/// Which side won an opposed check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Winner {
    Actor,
    Opponent,
    Tie,
}

/// Outcome of two independent checks compared by success level.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpposedOutcome {
    pub actor: RollResult,
    pub opponent: RollResult,
    pub winner: Winner,
}

/// A parsed amount expression: `NdM` or a bare integer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DiceExpression {
    Dice { count: u32, faces: u32 },
    Flat(u32),
}

impl DiceExpression {
    /// Parse `NdM`, `dM` (one die) or a non-negative integer literal.
    pub fn parse(notation: &str) -> Result<Self, DiceError> {
        let notation = notation.trim().to_lowercase();
        if notation.is_empty() {
            return Err(DiceError::InvalidNotation(notation));
        }

        let Some((count_str, faces_str)) = notation.split_once('d') else {
            let value: u32 = notation
                .parse()
                .map_err(|_| DiceError::InvalidNotation(notation.clone()))?;
            if value > MAX_VALUE {
                return Err(DiceError::AmountTooLarge(value));
            }
            return Ok(DiceExpression::Flat(value));
        };

        let count: u32 = if count_str.is_empty() {
            1
        } else {
            count_str
                .parse()
                .map_err(|_| DiceError::InvalidNotation(notation.clone()))?
        };
        let faces: u32 = faces_str
            .parse()
            .map_err(|_| DiceError::InvalidNotation(notation.clone()))?;

        if faces == 0 || faces > MAX_VALUE {
            return Err(DiceError::InvalidDieSize(faces));
        }
        if count == 0 {
            return Err(DiceError::InvalidNotation(notation));
        }
        if count > MAX_DICE {
            return Err(DiceError::TooManyDice(count));
        }

        Ok(DiceExpression::Dice { count, faces })
    }
}

impl FromStr for DiceExpression {
    type Err = DiceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DiceExpression::parse(s)
    }
}

impl fmt::Display for DiceExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DiceExpression::Dice { count, faces } => write!(f, "{count}d{faces}"),
            DiceExpression::Flat(value) => write!(f, "{value}"),
        }
    }
}

/// Rolls dice and grades skill checks against the active [`DiceConfig`].
///
/// The default RNG is a CSPRNG seeded from OS entropy; nothing the narrator
/// sees can predict it. Tests inject their own RNG via [`DiceEngine::with_rng`].
#[derive(Debug)]
pub struct DiceEngine<R: Rng = StdRng> {
    config: DiceConfig,
    rng: R,
}

impl DiceEngine<StdRng> {
    pub fn new(config: DiceConfig) -> Self {
        Self::with_rng(config, StdRng::from_entropy())
    }
}

impl<R: Rng> DiceEngine<R> {
    /// Create an engine with a specific RNG (useful for testing).
    pub fn with_rng(config: DiceConfig, rng: R) -> Self {
        Self { config, rng }
    }

    pub fn config(&self) -> &DiceConfig {
        &self.config
    }

    /// Swap in the dice parameters of another ruleset.
    pub fn set_config(&mut self, config: DiceConfig) {
        self.config = config;
    }

    /// Roll one die with `faces` sides.
    pub fn roll_die(&mut self, faces: u32) -> u32 {
        self.rng.gen_range(1..=faces.max(1))
    }

    /// Roll `count` dice with `faces` sides, returning every result.
    pub fn roll(&mut self, count: u32, faces: u32) -> Vec<u32> {
        (0..count).map(|_| self.roll_die(faces)).collect()
    }

    /// Run a skill check.
    ///
    /// A positive `modifier` adds bonus dice (lowest kept), a negative one
    /// adds penalty dice (highest kept).
    pub fn skill_check(&mut self, target: i32, modifier: i32) -> RollResult {
        let faces = self.config.faces;
        let effective_target = target.clamp(1, faces as i32) as u32;

        let raw_rolls = self.roll(1 + modifier.unsigned_abs(), faces);
        let roll = match modifier.signum() {
            1 => raw_rolls.iter().copied().min(),
            -1 => raw_rolls.iter().copied().max(),
            _ => raw_rolls.first().copied(),
        }
        .unwrap_or(faces);

        let level = self.evaluate(roll, effective_target);
        debug!(roll, target = effective_target, %level, "skill check");

        RollResult {
            roll,
            target: effective_target,
            level,
            success: level.is_success(),
            raw_rolls,
        }
    }

    /// Grade a roll against an (already clamped) target.
    ///
    /// Fumble and critical thresholds are checked before the target.
    pub fn evaluate(&self, roll: u32, target: u32) -> SuccessLevel {
        let cfg = &self.config;
        if roll >= cfg.fumble {
            return SuccessLevel::Fumble;
        }
        if roll <= cfg.critical {
            return SuccessLevel::Critical;
        }
        if roll > target {
            return SuccessLevel::Failure;
        }

        let extreme = (target as f64 * cfg.extreme_fraction).floor() as u32;
        let hard = (target as f64 * cfg.hard_fraction).floor() as u32;
        if roll <= extreme {
            SuccessLevel::Extreme
        } else if roll <= hard {
            SuccessLevel::Hard
        } else {
            SuccessLevel::Regular
        }
    }

    /// Two independent checks; the higher success level wins.
    pub fn opposed_check(&mut self, actor_target: i32, opponent_target: i32) -> OpposedOutcome {
        let actor = self.skill_check(actor_target, 0);
        let opponent = self.skill_check(opponent_target, 0);
        let winner = match actor.level.cmp(&opponent.level) {
            std::cmp::Ordering::Greater => Winner::Actor,
            std::cmp::Ordering::Less => Winner::Opponent,
            std::cmp::Ordering::Equal => Winner::Tie,
        };
        OpposedOutcome {
            actor,
            opponent,
            winner,
        }
    }

    /// Roll a parsed expression.
    pub fn roll_expression(&mut self, expr: &DiceExpression) -> i32 {
        match *expr {
            DiceExpression::Dice { count, faces } => {
                let total: i64 = self.roll(count, faces).iter().map(|&r| i64::from(r)).sum();
                i32::try_from(total).unwrap_or(i32::MAX)
            }
            DiceExpression::Flat(value) => i32::try_from(value).unwrap_or(i32::MAX),
        }
    }

    /// Evaluate narrator-supplied notation.
    ///
    /// Unparseable input yields [`FALLBACK_EXPRESSION_VALUE`] and a warning.
    pub fn evaluate_expression(&mut self, notation: &str) -> i32 {
        match DiceExpression::parse(notation) {
            Ok(expr) => self.roll_expression(&expr),
            Err(e) => {
                warn!(notation, error = %e, "unparseable dice expression, using fallback");
                FALLBACK_EXPRESSION_VALUE
            }
        }
    }
}
