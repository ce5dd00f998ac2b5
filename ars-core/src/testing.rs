//! Testing utilities for the engine.
//!
//! - [`MemoryStore`] keeps session state in memory and can inject failures
//! - [`ScriptedInput`] feeds prepared lines to [`TurnOrchestrator::run`]
//! - [`TestHarness`] wires an orchestrator to scripted adapters
//! - Assertion helpers for verifying session state

use crate::backend::{BackendError, ExtractiveSummarizer, ScriptedNarrator, ScriptedResponse, Summarizer};
use crate::character::{CharacterState, StatValue};
use crate::events::{GameEvent, RecordingSink};
use crate::memory::{ChronicleEntry, Exchange, WorldState};
use crate::orchestrator::{Adapters, InputSource, TurnOrchestrator, TurnReport};
use crate::persist::{PersistError, SavedSession, SessionMeta, SessionStore};
use crate::ruleset::{Ruleset, Vitals};
use crate::session::{Session, SessionConfig, SessionError, Turn};
use crate::world::Scene;
use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

// ============================================================================
// In-memory store
// ============================================================================

#[derive(Debug, Default)]
struct Stored {
    character: Option<CharacterState>,
    world_state: WorldState,
    chronicle: Vec<ChronicleEntry>,
    scene: Option<Scene>,
    turns: Vec<Turn>,
}

/// A [`SessionStore`] that keeps everything in memory.
#[derive(Debug)]
pub struct MemoryStore {
    meta: SessionMeta,
    stored: Mutex<Stored>,
    failing_writes: AtomicU32,
    writes: AtomicU32,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            meta: SessionMeta::new("memory"),
            stored: Mutex::new(Stored::default()),
            failing_writes: AtomicU32::new(0),
            writes: AtomicU32::new(0),
        }
    }

    /// Make the next `n` writes fail with an IO error.
    pub fn fail_next_writes(&self, n: u32) {
        self.failing_writes.store(n, Ordering::SeqCst);
    }

    /// Successful writes so far.
    pub fn write_count(&self) -> u32 {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn character(&self) -> Option<CharacterState> {
        self.stored.lock().ok().and_then(|s| s.character.clone())
    }

    pub fn world_state(&self) -> WorldState {
        self.stored.lock().map(|s| s.world_state.clone()).unwrap_or_default()
    }

    pub fn chronicle(&self) -> Vec<ChronicleEntry> {
        self.stored.lock().map(|s| s.chronicle.clone()).unwrap_or_default()
    }

    pub fn scene(&self) -> Option<Scene> {
        self.stored.lock().ok().and_then(|s| s.scene.clone())
    }

    pub fn turns(&self) -> Vec<Turn> {
        self.stored.lock().map(|s| s.turns.clone()).unwrap_or_default()
    }

    fn write(&self, update: impl FnOnce(&mut Stored)) -> Result<(), PersistError> {
        let injected = self
            .failing_writes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(PersistError::Io(std::io::Error::new(std::io::ErrorKind::Other, "injected write failure")));
        }

        let mut stored = self
            .stored
            .lock()
            .map_err(|e| PersistError::InvalidFormat(e.to_string()))?;
        update(&mut stored);
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn save_turn(&self, turn: &Turn) -> Result<(), PersistError> {
        self.write(|s| s.turns.push(turn.clone()))
    }

    async fn save_stats(&self, character: &CharacterState) -> Result<(), PersistError> {
        self.write(|s| s.character = Some(character.clone()))
    }

    async fn save_world_state(&self, state: &WorldState) -> Result<(), PersistError> {
        self.write(|s| s.world_state = state.clone())
    }

    async fn append_chronicle(&self, entry: &ChronicleEntry) -> Result<(), PersistError> {
        self.write(|s| s.chronicle.push(entry.clone()))
    }

    async fn save_scene(&self, scene: &Scene) -> Result<(), PersistError> {
        self.write(|s| s.scene = Some(scene.clone()))
    }

    async fn load(&self) -> Result<Option<SavedSession>, PersistError> {
        let stored = self
            .stored
            .lock()
            .map_err(|e| PersistError::InvalidFormat(e.to_string()))?;
        if stored.character.is_none() && stored.turns.is_empty() && stored.world_state.is_empty() {
            return Ok(None);
        }
        Ok(Some(SavedSession {
            meta: self.meta.clone(),
            character: stored.character.clone(),
            world_state: stored.world_state.clone(),
            chronicle: stored.chronicle.clone(),
            scene: stored.scene.clone(),
            turns: stored.turns.clone(),
        }))
    }
}

// ============================================================================
// Scripted collaborators
// ============================================================================

/// Player input from a fixed list of lines.
#[derive(Debug, Default)]
pub struct ScriptedInput {
    lines: VecDeque<String>,
}

impl ScriptedInput {
    pub fn new<S: Into<String>>(lines: impl IntoIterator<Item = S>) -> Self {
        Self {
            lines: lines.into_iter().map(Into::into).collect(),
        }
    }
}

#[async_trait]
impl InputSource for ScriptedInput {
    async fn next_line(&mut self) -> Option<String> {
        self.lines.pop_front()
    }
}

/// A summarizer that always fails.
#[derive(Debug, Default)]
pub struct FailingSummarizer {
    calls: AtomicU32,
}

impl FailingSummarizer {
    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Summarizer for FailingSummarizer {
    async fn summarize(&self, _turns: &[Exchange]) -> Result<String, BackendError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(BackendError::Summary("summarizer offline".to_string()))
    }
}

/// An investigator with the usual vitals and a few skills.
pub fn sample_character() -> CharacterState {
    let mut character = CharacterState::new("Ermittlerin", Vitals::default())
        .with_stat("HP", 12, 12)
        .with_stat("SAN", 60, 65)
        .with_stat("MP", 13, 13)
        .with_skill("Bibliotheksnutzung", 60)
        .with_skill("Verborgenes erkennen", 50)
        .with_skill("Schleichen", 40)
        .with_skill("Okkultismus", 25);
    character.archetype = "Antiquarin".to_string();
    character
}

// ============================================================================
// Harness
// ============================================================================

/// An orchestrator wired to scripted adapters.
pub struct TestHarness {
    pub narrator: Arc<ScriptedNarrator>,
    pub store: Arc<MemoryStore>,
    pub sink: Arc<RecordingSink>,
    pub orchestrator: TurnOrchestrator,
}

impl TestHarness {
    /// The sample character, default ruleset, seeded dice.
    pub fn new() -> Self {
        Self::with_character(sample_character())
    }

    pub fn with_character(character: CharacterState) -> Self {
        Self::build(
            SessionConfig::new("test").with_persist_attempts(1),
            character,
            Arc::new(ExtractiveSummarizer),
        )
    }

    pub fn build(config: SessionConfig, character: CharacterState, summarizer: Arc<dyn Summarizer>) -> Self {
        let narrator = Arc::new(ScriptedNarrator::new([]));
        let store = Arc::new(MemoryStore::new());
        let sink = Arc::new(RecordingSink::new());
        let session = Session::new(&config, character);
        let adapters = Adapters {
            narrator: narrator.clone(),
            summarizer,
            store: store.clone(),
            sink: sink.clone(),
        };
        let orchestrator = TurnOrchestrator::new(config, Ruleset::default(), session, adapters)
            .with_rng(StdRng::seed_from_u64(7));

        Self {
            narrator,
            store,
            sink,
            orchestrator,
        }
    }

    /// Replace the dice RNG.
    pub fn with_rng(mut self, rng: impl RngCore + Send + 'static) -> Self {
        self.orchestrator = self.orchestrator.with_rng(rng);
        self
    }

    /// Queue a narrator response, split into small fragments.
    pub fn expect_narrative(&mut self, text: impl Into<String>) -> &mut Self {
        self.narrator.push(ScriptedResponse::Text(text.into()));
        self
    }

    /// Queue a narrator response delivered as exactly these fragments.
    pub fn expect_fragments(&mut self, fragments: &[&str]) -> &mut Self {
        self.narrator.push(ScriptedResponse::Fragments(
            fragments.iter().map(|f| f.to_string()).collect(),
        ));
        self
    }

    /// Queue a narrator response that breaks after `fragments`.
    pub fn expect_broken(&mut self, fragments: &[&str]) -> &mut Self {
        self.narrator.push(ScriptedResponse::Broken {
            fragments: fragments.iter().map(|f| f.to_string()).collect(),
            error: "connection reset".to_string(),
        });
        self
    }

    /// Play one turn.
    pub async fn input(&mut self, text: &str) -> Result<TurnReport, SessionError> {
        self.orchestrator.play_turn(text).await
    }

    pub fn stat(&self, name: &str) -> Option<StatValue> {
        self.orchestrator.session().character().stat(name)
    }

    pub fn fact(&self, key: &str) -> Option<&serde_json::Value> {
        self.orchestrator.session().archivist().fact(key)
    }

    pub fn events(&self) -> Vec<GameEvent> {
        self.sink.events()
    }

    pub fn count_events(&self, predicate: impl Fn(&GameEvent) -> bool) -> usize {
        self.sink.events().iter().filter(|e| predicate(e)).count()
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Assertion Helpers
// ============================================================================

/// Assert a stat is at the expected values.
#[track_caller]
pub fn assert_stat(harness: &TestHarness, name: &str, current: i32, max: i32) {
    let actual = harness.stat(name);
    assert_eq!(
        actual,
        Some(StatValue { current, max }),
        "Expected {name} {current}/{max}, got {actual:?}"
    );
}

/// Assert a fact holds the expected value.
#[track_caller]
pub fn assert_fact(harness: &TestHarness, key: &str, expected: serde_json::Value) {
    let actual = harness.fact(key);
    assert_eq!(
        actual,
        Some(&expected),
        "Expected fact '{key}' = {expected}, got {actual:?}"
    );
}

/// Assert a fact is not known.
#[track_caller]
pub fn assert_no_fact(harness: &TestHarness, key: &str) {
    assert!(
        harness.fact(key).is_none(),
        "Expected no fact '{key}', got {:?}",
        harness.fact(key)
    );
}
