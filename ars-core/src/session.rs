//! Session state and configuration.
//!
//! A [`Session`] bundles everything one playthrough owns: the character,
//! the archivist, the scene and the turn history. It is only mutated through
//! the [`TurnOrchestrator`](crate::orchestrator::TurnOrchestrator).

use crate::backend::BackendError;
use crate::character::{CharacterState, CharacterStats};
use crate::memory::{Archivist, Exchange, DEFAULT_SUMMARY_INTERVAL};
use crate::persist::{PersistError, SavedSession};
use crate::protocol::{ControlTag, DEFAULT_MAX_TAG_LEN};
use crate::ruleset::RulesetError;
use crate::world::{Scene, WorldError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Errors from session operations.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),

    #[error("Persistence error: {0}")]
    Persistence(#[from] PersistError),

    #[error("Ruleset error: {0}")]
    Ruleset(#[from] RulesetError),

    #[error("World error: {0}")]
    World(#[from] WorldError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Session already stopped")]
    Stopped,
}

/// Configuration for a session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Session name, also the save directory name.
    pub name: String,

    /// Turns between chronicle entries.
    pub summary_interval: u32,

    /// Longest tag (brackets included) the scanner will recognise.
    pub max_tag_len: usize,

    /// How many times each write is tried.
    pub persist_attempts: u32,

    /// Voice role active at session start.
    pub default_voice: String,

    /// Location id to open in when there is no adventure start location.
    pub opening_location: Option<String>,
}

impl SessionConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            summary_interval: DEFAULT_SUMMARY_INTERVAL,
            max_tag_len: DEFAULT_MAX_TAG_LEN,
            persist_attempts: 3,
            default_voice: "keeper".to_string(),
            opening_location: None,
        }
    }

    pub fn with_summary_interval(mut self, interval: u32) -> Self {
        self.summary_interval = interval.max(1);
        self
    }

    pub fn with_max_tag_len(mut self, max_len: usize) -> Self {
        self.max_tag_len = max_len;
        self
    }

    pub fn with_persist_attempts(mut self, attempts: u32) -> Self {
        self.persist_attempts = attempts.max(1);
        self
    }

    pub fn with_default_voice(mut self, voice: impl Into<String>) -> Self {
        self.default_voice = voice.into();
        self
    }

    pub fn with_opening_location(mut self, location: impl Into<String>) -> Self {
        self.opening_location = Some(location.into());
        self
    }
}

/// One completed turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    /// 1-based, strictly increasing within a session.
    pub index: u64,
    pub player_input: String,
    /// Raw narrator text, roll narrations appended, tags included.
    pub narrator_output: String,
    /// Every control tag decoded during the turn, in order.
    pub tags: Vec<ControlTag>,
    /// Stats after the turn's effects.
    pub stat_snapshot: CharacterStats,
    pub timestamp: DateTime<Utc>,
}

impl Turn {
    pub fn exchange(&self) -> Exchange {
        Exchange {
            input: self.player_input.clone(),
            output: self.narrator_output.clone(),
        }
    }
}

/// State owned by one playthrough.
#[derive(Debug, Clone)]
pub struct Session {
    id: Uuid,
    name: String,
    pub(crate) character: CharacterState,
    pub(crate) archivist: Archivist,
    pub(crate) scene: Scene,
    turns: Vec<Turn>,
}

impl Session {
    /// A fresh session for `character`.
    pub fn new(config: &SessionConfig, character: CharacterState) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: config.name.clone(),
            character,
            archivist: Archivist::new(config.summary_interval)
                .with_persist_attempts(config.persist_attempts),
            scene: Scene::new(config.default_voice.clone(), config.opening_location.clone()),
            turns: Vec::new(),
        }
    }

    /// Resume from stored state. `character` is used when the save holds none.
    pub fn restore(config: &SessionConfig, saved: SavedSession, character: CharacterState) -> Self {
        let mut turns = saved.turns;
        turns.sort_by_key(|t| t.index);

        Self {
            id: saved.meta.session_id,
            name: saved.meta.name,
            character: saved.character.unwrap_or(character),
            archivist: Archivist::restore(config.summary_interval, saved.chronicle, saved.world_state)
                .with_persist_attempts(config.persist_attempts),
            scene: saved.scene.unwrap_or_else(|| {
                Scene::new(config.default_voice.clone(), config.opening_location.clone())
            }),
            turns,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn character(&self) -> &CharacterState {
        &self.character
    }

    pub fn archivist(&self) -> &Archivist {
        &self.archivist
    }

    pub fn scene(&self) -> &Scene {
        &self.scene
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    /// Index of the last completed turn, 0 before the first.
    pub fn turn_counter(&self) -> u64 {
        self.turns.last().map_or(0, |t| t.index)
    }

    /// The last `n` exchanges, oldest first.
    pub fn recent_exchanges(&self, n: usize) -> Vec<Exchange> {
        let start = self.turns.len().saturating_sub(n);
        self.turns[start..].iter().map(Turn::exchange).collect()
    }

    pub(crate) fn record_turn(&mut self, turn: Turn) {
        self.turns.push(turn);
    }
}
